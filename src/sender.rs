//! UDP client speaking the spike protocol
//!
//! Used by the `send` subcommand and the loopback tests to drive a running
//! receiver: push a frequency table through the handshake, then stream
//! spikes at it.

use crate::protocol::{encode_content, Message};
use rand::Rng;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Frequencies per content chunk when none is given
pub const DEFAULT_CHUNK_SIZE: u16 = 256;

pub struct SpikeSender {
    socket: UdpSocket,
    target: SocketAddr,
    buf: Vec<u8>,
    /// Pause between handshake datagrams
    pacing: Duration,
}

impl SpikeSender {
    pub fn new(target: impl ToSocketAddrs) -> io::Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no target address"))?;
        let bind = if target.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind)?;

        Ok(Self {
            socket,
            target,
            buf: Vec::with_capacity(1024),
            pacing: Duration::from_micros(200),
        })
    }

    /// Pause between handshake datagrams, to avoid overrunning the
    /// receiver's socket buffer
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Encode and send one message
    pub fn send(&mut self, message: &Message<'_>) -> io::Result<()> {
        self.buf.clear();
        message.encode(&mut self.buf);
        self.socket.send_to(&self.buf, self.target)?;
        Ok(())
    }

    /// Trigger oscillator `index`
    pub fn spike(&mut self, index: u16) -> io::Result<()> {
        self.send(&Message::Performance { index })
    }

    /// Send a whole frequency table.
    ///
    /// Without `chunk_size` each frequency goes in its own datagram followed
    /// by a done marker; with it, frequencies are packed into content chunks
    /// and the last chunk carries the terminating sentinel.
    pub fn send_handshake(&mut self, frequencies: &[f32], chunk_size: Option<u16>) -> io::Result<()> {
        if frequencies.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no frequencies to send",
            ));
        }
        if frequencies.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} frequencies exceed the protocol limit", frequencies.len()),
            ));
        }
        if let Some(f) = frequencies.iter().find(|f| !f.is_finite() || **f <= 0.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frequency {} is not a positive number", f),
            ));
        }

        let expected = frequencies.len() as u16;
        self.send(&Message::InitCount {
            expected,
            chunk_size,
        })?;
        self.pause();

        match chunk_size {
            Some(chunk) => {
                let chunk = chunk.max(1) as usize;
                let chunks = frequencies.chunks(chunk);
                let last = chunks.len().saturating_sub(1);
                for (i, part) in chunks.enumerate() {
                    self.buf.clear();
                    encode_content(part, i == last, &mut self.buf);
                    self.socket.send_to(&self.buf, self.target)?;
                    self.pause();
                }
            }
            None => {
                for (index, &frequency) in frequencies.iter().enumerate() {
                    self.send(&Message::InitFrequency {
                        index: index as u16,
                        frequency,
                    })?;
                    self.pause();
                }
                self.send(&Message::InitDone)?;
            }
        }

        info!(
            "Sent {} frequencies to {} ({})",
            frequencies.len(),
            self.target,
            if chunk_size.is_some() { "chunked" } else { "per index" }
        );
        Ok(())
    }

    /// Send `count` spikes at random indices below `oscillators`, paced at
    /// `rate` spikes per second (0 sends as fast as possible)
    pub fn send_spikes<R: Rng + ?Sized>(
        &mut self,
        count: usize,
        rate: f32,
        oscillators: u16,
        rng: &mut R,
    ) -> io::Result<()> {
        let oscillators = oscillators.max(1);
        let interval = if rate > 0.0 && rate.is_finite() {
            Some(Duration::from_secs_f64(1.0 / rate as f64))
        } else {
            None
        };
        let started = Instant::now();

        for n in 0..count {
            self.spike(rng.gen_range(0..oscillators))?;

            if let Some(interval) = interval {
                let deadline = started + interval.mul_f64((n + 1) as f64);
                if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
        }

        debug!("Sent {} spikes in {:?}", count, started.elapsed());
        Ok(())
    }

    fn pause(&self) {
        if !self.pacing.is_zero() {
            thread::sleep(self.pacing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    fn pair() -> (SpikeSender, UdpSocket) {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let sender = SpikeSender::new(listener.local_addr().unwrap())
            .unwrap()
            .with_pacing(Duration::ZERO);
        (sender, listener)
    }

    fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 2048];
        let (n, _) = socket.recv_from(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_handshake_per_index() {
        let (mut sender, listener) = pair();
        sender.send_handshake(&[100.0, 200.0], None).unwrap();

        assert_eq!(
            decode(&recv(&listener)).unwrap(),
            Message::InitCount {
                expected: 2,
                chunk_size: None
            }
        );
        assert_eq!(
            decode(&recv(&listener)).unwrap(),
            Message::InitFrequency {
                index: 0,
                frequency: 100.0
            }
        );
        assert_eq!(
            decode(&recv(&listener)).unwrap(),
            Message::InitFrequency {
                index: 1,
                frequency: 200.0
            }
        );
        assert_eq!(decode(&recv(&listener)).unwrap(), Message::InitDone);
    }

    #[test]
    fn test_handshake_chunked() {
        let (mut sender, listener) = pair();
        sender
            .send_handshake(&[100.0, 200.0, 300.0], Some(2))
            .unwrap();

        recv(&listener); // count header
        match decode(&recv(&listener)).unwrap() {
            Message::InitContent(content) => {
                assert!(!content.is_terminated());
                assert_eq!(content.collect::<Vec<_>>(), vec![100.0, 200.0]);
            }
            other => panic!("Expected content, got {:?}", other),
        }
        match decode(&recv(&listener)).unwrap() {
            Message::InitContent(content) => {
                assert!(content.is_terminated());
                assert_eq!(content.collect::<Vec<_>>(), vec![300.0]);
            }
            other => panic!("Expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_frequencies() {
        let (mut sender, _listener) = pair();
        let err = sender.send_handshake(&[100.0, 0.0], None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_rejects_empty_table() {
        let (mut sender, listener) = pair();
        listener
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        let err = sender.send_handshake(&[], Some(4)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        // Nothing reached the wire
        let mut buf = [0u8; 16];
        assert!(listener.recv_from(&mut buf).is_err());
    }

    #[test]
    fn test_spikes_in_range() {
        use rand::rngs::SmallRng;
        use rand::SeedableRng;

        let (mut sender, listener) = pair();
        let mut rng = SmallRng::seed_from_u64(5);
        sender.send_spikes(20, 0.0, 4, &mut rng).unwrap();

        for _ in 0..20 {
            match decode(&recv(&listener)).unwrap() {
                Message::Performance { index } => assert!(index < 4),
                other => panic!("Expected spike, got {:?}", other),
            }
        }
    }
}
