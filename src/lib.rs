//! # Spikeweb - Network-Driven Additive Synthesizer
//!
//! Spikeweb renders a bank of up to 20,000 wavetable sine oscillators whose
//! envelopes are triggered by "spikes". Spikes come either from a random
//! internal generator or from a remote process (typically a neural network
//! simulation) over UDP, together with a table of per-oscillator
//! frequencies sent in an initialisation handshake.
//!
//! ## Architecture
//!
//! ```text
//! UDP ──> NetworkReceiver ──> Dispatcher ─┬─> TriggerSender ══ ringbuf ══> TriggerReceiver ─┐
//!                                         └─> Handshake ──> TableWriter ──> FrequencyTable ─┤
//!                                                                                           v
//! SharedParams (ArcSwap) ─────────────────────────────────────────────────────────> SynthEngine
//!                                                                                  │  EnvelopeBank
//!                                                                                  │  OscillatorBank
//!                                                                                  v
//!                                                                   AudioOutput (cpal) / Renderer (hound)
//! ```
//!
//! The audio thread never locks or allocates per block. Triggers cross from
//! the UDP thread through a bounded SPSC queue, the frequency table is a
//! slab of atomics guarded by an "in init" flag, and parameters are
//! swapped in atomically.
//!
//! ## Quick Start
//!
//! ```rust
//! use spikeweb::engine::{EngineConfig, SynthEngine};
//! use spikeweb::params::SynthParams;
//!
//! let mut engine = SynthEngine::new(EngineConfig::default(), 44100.0);
//! let params = SynthParams {
//!     oscillator_count: 100,
//!     ..SynthParams::default()
//! };
//!
//! let (left, right) = engine.render(&params, 512);
//! assert_eq!(left.len(), 512);
//! assert_eq!(right.len(), 512);
//! ```
//!
//! ## Network Mode
//!
//! ```rust,no_run
//! use spikeweb::channel::trigger_channel;
//! use spikeweb::config::Config;
//! use spikeweb::engine::SynthEngine;
//! use spikeweb::receiver::NetworkReceiver;
//! use spikeweb::table::FrequencyTable;
//!
//! let config = Config::default();
//! let (triggers, trigger_rx) = trigger_channel(config.network.channel_capacity);
//! let (table, writer) = FrequencyTable::new(config.synth.max_oscillators);
//!
//! let _receiver = NetworkReceiver::start(&config.network, triggers, writer)?;
//! let engine = SynthEngine::new(config.engine_config(256), 48000.0)
//!     .with_network(trigger_rx, table);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod cascade;
pub mod channel;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod handshake;
pub mod oscillator;
pub mod params;
pub mod protocol;
pub mod receiver;
pub mod render;
pub mod sender;
pub mod table;
