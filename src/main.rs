//! Spikeweb CLI - play, render, and drive the synthesizer over UDP

use clap::{Args, Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use spikeweb::audio::AudioOutput;
use spikeweb::cascade::CascadeMode;
use spikeweb::channel::trigger_channel;
use spikeweb::config::Config;
use spikeweb::engine::{EngineMonitor, SynthEngine};
use spikeweb::params::{SharedParams, SynthParams};
use spikeweb::receiver::NetworkReceiver;
use spikeweb::render::{RenderConfig, Renderer};
use spikeweb::sender::{SpikeSender, DEFAULT_CHUNK_SIZE};
use spikeweb::table::FrequencyTable;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "spikeweb")]
#[command(about = "Additive synthesizer driven by UDP spike events", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by `play` and `render`
#[derive(Args, Debug, Clone)]
struct SynthArgs {
    /// Take spikes and frequencies from the UDP receiver
    #[arg(short, long)]
    network: bool,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Oscillators in internal mode
    #[arg(short, long)]
    oscillators: Option<usize>,

    /// Master gain 0.0-1.0
    #[arg(short, long)]
    gain: Option<f32>,

    /// Frequency of the first oscillator in Hz
    #[arg(long)]
    base: Option<f32>,

    /// Cascade density 1.0-1.4
    #[arg(long)]
    density: Option<f32>,

    /// Use the linear cascade instead of the multiplicative one
    #[arg(long)]
    linear: bool,

    /// Disable random triggers
    #[arg(long)]
    no_stochastic: bool,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play through the default audio device
    Play {
        #[command(flatten)]
        synth: SynthArgs,

        /// Stop after this many seconds (default: run until interrupted)
        #[arg(short, long)]
        duration: Option<f32>,

        /// Seconds between statistics reports
        #[arg(long, default_value = "5")]
        report_interval: u64,
    },

    /// Render to a stereo WAV file
    Render {
        /// Output WAV file path
        output: PathBuf,

        #[command(flatten)]
        synth: SynthArgs,

        /// Duration in seconds (default: 10.0)
        #[arg(short, long, default_value = "10.0")]
        duration: f32,

        /// Sample rate in Hz (default: 44100)
        #[arg(short, long, default_value = "44100")]
        sample_rate: u32,

        /// Block size for processing (default: 512)
        #[arg(short, long, default_value = "512")]
        block_size: usize,

        /// Fade in time in seconds (default: 0.01)
        #[arg(long, default_value = "0.01")]
        fade_in: f32,

        /// Fade out time in seconds (default: 0.01)
        #[arg(long, default_value = "0.01")]
        fade_out: f32,
    },

    /// Send protocol messages to a running instance
    Send {
        /// Receiver address
        #[arg(short, long, default_value = "127.0.0.1:4001")]
        target: String,

        #[command(subcommand)]
        message: SendCommand,
    },
}

#[derive(Subcommand)]
enum SendCommand {
    /// Send a frequency table through the initialisation handshake
    Init {
        /// Frequencies in Hz, one per oscillator
        #[arg(required = true)]
        frequencies: Vec<f32>,

        /// Pack frequencies into content chunks
        #[arg(long)]
        chunked: bool,

        /// Frequencies per chunk with --chunked
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u16,
    },

    /// Send spikes to random oscillators
    Spikes {
        /// Number of spikes
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,

        /// Spikes per second (0 = as fast as possible)
        #[arg(short, long, default_value = "500")]
        rate: f32,

        /// Spikes target indices below this
        #[arg(short, long, default_value = "200")]
        oscillators: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };

    match cli.command {
        Commands::Play {
            synth,
            duration,
            report_interval,
        } => {
            apply_overrides(&mut config, &synth);
            play(&config, duration, Duration::from_secs(report_interval.max(1)))
        }

        Commands::Render {
            output,
            synth,
            duration,
            sample_rate,
            block_size,
            fade_in,
            fade_out,
        } => {
            apply_overrides(&mut config, &synth);
            let render_config = RenderConfig {
                sample_rate,
                block_size,
                duration,
                fade_in,
                fade_out,
                realtime: config.params.network_mode,
            };
            render(&config, render_config, output)
        }

        Commands::Send { target, message } => {
            let mut sender = SpikeSender::new(target.as_str())?;
            match message {
                SendCommand::Init {
                    frequencies,
                    chunked,
                    chunk_size,
                } => {
                    let chunk_size = chunked.then_some(chunk_size);
                    sender.send_handshake(&frequencies, chunk_size)?;
                    println!(
                        "✅ Sent {} frequencies to {}",
                        frequencies.len(),
                        sender.target()
                    );
                }
                SendCommand::Spikes {
                    count,
                    rate,
                    oscillators,
                } => {
                    let mut rng = SmallRng::from_entropy();
                    sender.send_spikes(count, rate, oscillators, &mut rng)?;
                    println!("✅ Sent {} spikes to {}", count, sender.target());
                }
            }
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut Config, args: &SynthArgs) {
    let params = &mut config.params;
    if args.network {
        params.network_mode = true;
    }
    if let Some(n) = args.oscillators {
        params.oscillator_count = n;
    }
    if let Some(gain) = args.gain {
        params.master_gain = gain;
    }
    if let Some(base) = args.base {
        params.base_hz = base;
    }
    if let Some(density) = args.density {
        params.density = density;
    }
    if args.linear {
        params.cascade_mode = CascadeMode::Linear;
    }
    if args.no_stochastic {
        params.stochastic = false;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if args.seed.is_some() {
        config.synth.seed = args.seed;
    }
}

/// Build the engine, attaching a UDP receiver when network mode is on.
///
/// A receiver that fails to bind is logged and the engine runs in internal
/// mode.
fn build_engine(
    config: &Config,
    max_block: usize,
    sample_rate: f32,
) -> (SynthEngine, Option<NetworkReceiver>) {
    let engine = SynthEngine::new(config.engine_config(max_block), sample_rate);
    if !config.params.network_mode {
        return (engine, None);
    }

    let (triggers, trigger_rx) = trigger_channel(config.network.channel_capacity);
    let (table, writer) = FrequencyTable::new(config.synth.max_oscillators);

    match NetworkReceiver::start(&config.network, triggers, writer) {
        Ok(receiver) => (engine.with_network(trigger_rx, table), Some(receiver)),
        Err(e) => {
            error!("❌ {}; continuing in internal mode", e);
            (engine, None)
        }
    }
}

fn play(
    config: &Config,
    duration: Option<f32>,
    report_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let buffer_size = config.audio.buffer_size();
    let (engine, mut receiver) = build_engine(config, buffer_size, 48_000.0);
    let monitor = engine.monitor();
    let params = SharedParams::new(config.params);

    let output = AudioOutput::start(&config.audio, engine, params.clone())?;
    info!(
        "🎵 Playing {} oscillators at {} Hz ({} mode)",
        config.params.oscillator_count,
        output.sample_rate(),
        if receiver.is_some() { "network" } else { "internal" }
    );

    let started = Instant::now();
    let deadline = duration.map(|d| started + Duration::from_secs_f32(d.max(0.0)));
    let mut last_report = Instant::now();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= report_interval {
            report(&monitor, receiver.as_ref());
            last_report = Instant::now();
        }
    }

    report(&monitor, receiver.as_ref());
    if let Some(receiver) = receiver.as_mut() {
        receiver.shutdown();
    }
    drop(output);
    info!("🛑 Stopped after {:.1}s", started.elapsed().as_secs_f32());
    Ok(())
}

fn render(
    config: &Config,
    render_config: RenderConfig,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut engine, mut receiver) = build_engine(
        config,
        render_config.block_size,
        render_config.sample_rate as f32,
    );
    let monitor = engine.monitor();
    let params: SynthParams = config.params;

    println!("Rendering to {}", output.display());
    println!("  Duration:    {} seconds", render_config.duration);
    println!("  Sample rate: {} Hz", render_config.sample_rate);
    println!("  Oscillators: {}", params.oscillator_count);
    if render_config.realtime {
        println!("  Recording network input in real time");
    }
    println!();

    let renderer = Renderer::new(render_config);
    let stats = renderer.render_to_file(&mut engine, &params, &output)?;
    stats.print_summary();

    report(&monitor, receiver.as_ref());
    if let Some(receiver) = receiver.as_mut() {
        receiver.shutdown();
    }

    println!("\n✅ Render complete: {}", output.display());
    Ok(())
}

fn report(monitor: &Arc<EngineMonitor>, receiver: Option<&NetworkReceiver>) {
    let engine = monitor.snapshot();
    info!(
        "Engine: {} blocks, {} oscillators, {} triggers, {} count changes{}",
        engine.blocks,
        engine.active_oscillators,
        engine.triggers_applied,
        engine.count_changes,
        if engine.network_driven {
            ", network driven"
        } else {
            ""
        }
    );
    debug!("Envelope saturations: {}", engine.saturations);

    if let Some(receiver) = receiver {
        let net = receiver.stats().snapshot();
        info!(
            "📡 Network: {} datagrams, {} spikes queued, {} dropped, {} decode errors, sessions {}/{}/{} (started/completed/aborted)",
            net.datagrams,
            net.triggers_queued,
            net.triggers_dropped,
            net.decode_errors,
            net.sessions_started,
            net.sessions_completed,
            net.sessions_aborted
        );
    }
}
