//! Real UDP traffic against a receiver bound to an ephemeral loopback port

use spikeweb::channel::trigger_channel;
use spikeweb::config::NetworkConfig;
use spikeweb::engine::{EngineConfig, SynthEngine};
use spikeweb::params::SynthParams;
use spikeweb::receiver::NetworkReceiver;
use spikeweb::sender::SpikeSender;
use spikeweb::table::FrequencyTable;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

fn loopback_config() -> NetworkConfig {
    NetworkConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        read_timeout_ms: 50,
        ..NetworkConfig::default()
    }
}

/// Poll `check` until it holds or two seconds pass
fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn test_handshake_and_spikes_over_udp() {
    let (triggers, mut trigger_rx) = trigger_channel(64);
    let (table, writer) = FrequencyTable::new(64);
    let mut receiver = NetworkReceiver::start(&loopback_config(), triggers, writer).unwrap();
    assert_ne!(receiver.local_addr().port(), 0);

    let mut sender = SpikeSender::new(receiver.local_addr()).unwrap();
    let frequencies = [150.0, 250.0, 350.0, 450.0];
    sender.send_handshake(&frequencies, None).unwrap();

    assert!(wait_for(|| table.published_len() == Some(4)));
    assert_eq!(table.get(3), Some(450.0));

    for index in [0, 2, 2] {
        sender.spike(index).unwrap();
    }
    assert!(wait_for(|| trigger_rx.pending() == 3));

    let mut drained = Vec::new();
    trigger_rx.drain_into(&mut drained, 16);
    assert_eq!(drained, vec![0, 2, 2]);

    let stats = receiver.stats().snapshot();
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(stats.triggers_queued, 3);

    receiver.shutdown();
    assert!(!receiver.is_running());
}

#[test]
fn test_chunked_handshake_over_udp_feeds_engine() {
    let (triggers, trigger_rx) = trigger_channel(64);
    let (table, writer) = FrequencyTable::new(1_000);
    let receiver = NetworkReceiver::start(&loopback_config(), triggers, writer).unwrap();

    let frequencies: Vec<f32> = (0..600).map(|i| 100.0 + i as f32).collect();
    let mut sender = SpikeSender::new(receiver.local_addr()).unwrap();
    sender.send_handshake(&frequencies, Some(128)).unwrap();
    assert!(wait_for(|| table.published_len() == Some(600)));

    let mut engine = SynthEngine::new(
        EngineConfig {
            max_oscillators: 1_000,
            max_block: 128,
            seed: Some(3),
            ..EngineConfig::default()
        },
        48_000.0,
    )
    .with_network(trigger_rx, table);

    let params = SynthParams {
        network_mode: true,
        ..SynthParams::default()
    };
    engine.render(&params, 128);
    assert_eq!(engine.active_count(), 600);
    assert_eq!(engine.oscillators().frequency(599), 699.0);
    assert!(engine.stats().network_driven);
}

#[test]
fn test_garbage_is_counted_not_fatal() {
    let (triggers, _trigger_rx) = trigger_channel(8);
    let (_table, writer) = FrequencyTable::new(8);
    let receiver = NetworkReceiver::start(&loopback_config(), triggers, writer).unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(&[42, 1, 2, 3], receiver.local_addr()).unwrap();
    socket.send_to(&[0], receiver.local_addr()).unwrap();

    assert!(wait_for(|| receiver.stats().snapshot().decode_errors == 2));
    assert!(receiver.is_running());
}

#[test]
fn test_bind_conflict_reports_error() {
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = NetworkConfig {
        port: taken.local_addr().unwrap().port(),
        ..loopback_config()
    };

    let (triggers, _rx) = trigger_channel(8);
    let (_table, writer) = FrequencyTable::new(8);
    let result = NetworkReceiver::start(&config, triggers, writer);
    assert!(matches!(
        result,
        Err(spikeweb::receiver::ReceiverError::Bind { .. })
    ));
}
