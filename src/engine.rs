//! Block renderer tying triggers, envelopes and oscillators together
//!
//! Per block:
//! 1. sanitize the parameter snapshot and apply the envelope coefficients
//! 2. collect triggers: drained from the network queue, or drawn at random
//! 3. apply the triggers to the envelopes
//! 4. on an oscillator count change, new phases and reset envelopes
//! 5. render every oscillator below the cutoff into both channels
//! 6. scale the block by the master gain
//!
//! The per-block path does not allocate or lock. The only allocation-capable
//! step is the bank resize on a count change, and the bank reserves its
//! maximum size up front.

use crate::cascade::Cascade;
use crate::channel::TriggerReceiver;
use crate::envelope::EnvelopeBank;
use crate::oscillator::{OscillatorBank, DEFAULT_TABLE_LEN};
use crate::params::SynthParams;
use crate::table::FrequencyTable;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed scaling applied on top of the master gain
pub const OUTPUT_HEADROOM: f32 = 0.5;
/// Largest oscillator population addressable by the wire protocol
pub const MAX_OSCILLATORS: usize = 20_000;

/// Sizes and limits fixed for the lifetime of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_oscillators: usize,
    pub table_len: usize,
    /// Largest block rendered in one call; longer requests are split
    pub max_block: usize,
    /// Cap on network triggers drained per block
    pub max_triggers_per_block: usize,
    /// Upper bound (exclusive) of random trigger draws per block
    pub stochastic_draws: usize,
    /// Random indices are drawn from `0..stochastic_span`; only those
    /// below the active count fire
    pub stochastic_span: usize,
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_oscillators: MAX_OSCILLATORS,
            table_len: DEFAULT_TABLE_LEN,
            max_block: 1024,
            max_triggers_per_block: 512,
            stochastic_draws: 10_000,
            stochastic_span: MAX_OSCILLATORS,
            seed: None,
        }
    }
}

/// Counters published by the audio thread for other threads to read
#[derive(Debug, Default)]
pub struct EngineMonitor {
    blocks: AtomicU64,
    triggers_applied: AtomicU64,
    saturations: AtomicU64,
    count_changes: AtomicU64,
    active_oscillators: AtomicUsize,
    network_driven: AtomicBool,
}

/// Point-in-time copy of [`EngineMonitor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub blocks: u64,
    pub triggers_applied: u64,
    pub saturations: u64,
    pub count_changes: u64,
    pub active_oscillators: usize,
    pub network_driven: bool,
}

impl EngineMonitor {
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            blocks: self.blocks.load(Ordering::Relaxed),
            triggers_applied: self.triggers_applied.load(Ordering::Relaxed),
            saturations: self.saturations.load(Ordering::Relaxed),
            count_changes: self.count_changes.load(Ordering::Relaxed),
            active_oscillators: self.active_oscillators.load(Ordering::Relaxed),
            network_driven: self.network_driven.load(Ordering::Relaxed),
        }
    }
}

/// The additive synth: owns all audio-thread state
pub struct SynthEngine {
    config: EngineConfig,
    bank: OscillatorBank,
    envelopes: EnvelopeBank,
    triggers: Option<TriggerReceiver>,
    table: Option<Arc<FrequencyTable>>,
    rng: SmallRng,
    pending: Vec<u16>,
    left: Vec<f32>,
    right: Vec<f32>,
    active_count: usize,
    stats: EngineStats,
    monitor: Arc<EngineMonitor>,
}

impl SynthEngine {
    pub fn new(config: EngineConfig, sample_rate: f32) -> Self {
        let max_oscillators = config.max_oscillators.clamp(1, u16::MAX as usize + 1);
        let config = EngineConfig {
            max_oscillators,
            max_block: config.max_block.max(1),
            stochastic_span: config.stochastic_span.max(1),
            ..config
        };
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let params = SynthParams::default();

        Self {
            bank: OscillatorBank::new(max_oscillators, config.table_len, sample_rate),
            envelopes: EnvelopeBank::new(max_oscillators, params.envelope()),
            triggers: None,
            table: None,
            rng,
            pending: Vec::with_capacity(
                config
                    .max_triggers_per_block
                    .max(config.stochastic_draws)
                    .max(1),
            ),
            left: vec![0.0; config.max_block],
            right: vec![0.0; config.max_block],
            active_count: 0,
            stats: EngineStats::default(),
            monitor: Arc::new(EngineMonitor::default()),
            config,
        }
    }

    /// Attach the network side: the trigger queue and the frequency table
    pub fn with_network(mut self, triggers: TriggerReceiver, table: Arc<FrequencyTable>) -> Self {
        self.triggers = Some(triggers);
        self.table = Some(table);
        self
    }

    /// Adopt a new sample rate and maximum block size
    pub fn prepare(&mut self, sample_rate: f32, max_block: usize) {
        self.bank.prepare(sample_rate);
        let max_block = max_block.max(1);
        if max_block != self.config.max_block {
            self.config.max_block = max_block;
            self.left.resize(max_block, 0.0);
            self.right.resize(max_block, 0.0);
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f32 {
        self.bank.sample_rate()
    }

    pub fn max_block(&self) -> usize {
        self.config.max_block
    }

    pub fn monitor(&self) -> Arc<EngineMonitor> {
        self.monitor.clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Oscillators rendered in the last block
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn oscillators(&self) -> &OscillatorBank {
        &self.bank
    }

    pub fn envelopes(&self) -> &EnvelopeBank {
        &self.envelopes
    }

    /// Render `frames` samples into the internal stereo buffers.
    ///
    /// `frames` is capped at [`max_block`](Self::max_block).
    pub fn render(&mut self, params: &SynthParams, frames: usize) -> (&[f32], &[f32]) {
        let frames = frames.min(self.config.max_block);
        let mut left = std::mem::take(&mut self.left);
        let mut right = std::mem::take(&mut self.right);

        self.process_block(params, &mut left[..frames], &mut right[..frames]);

        self.left = left;
        self.right = right;
        (&self.left[..frames], &self.right[..frames])
    }

    /// Render one block into `left` and `right`, overwriting them
    pub fn process_block(&mut self, params: &SynthParams, left: &mut [f32], right: &mut [f32]) {
        let params = params.sanitized(self.config.max_oscillators);
        self.envelopes.set_params(params.envelope());

        let frames = left.len().min(right.len());
        left.fill(0.0);
        right.fill(0.0);

        let network_len = if params.network_mode && self.triggers.is_some() {
            self.table.as_ref().and_then(|t| t.published_len())
        } else {
            None
        };
        let count = network_len
            .unwrap_or(params.oscillator_count)
            .min(self.config.max_oscillators);

        self.collect_triggers(&params, network_len.is_some(), count);
        for &index in &self.pending {
            if (index as usize) < count {
                self.envelopes.trigger(index as usize);
                self.stats.triggers_applied += 1;
            }
        }

        if count != self.active_count {
            self.bank.resize(count, &mut self.rng);
            self.envelopes.reset();
            self.active_count = count;
            self.stats.count_changes += 1;
        }

        let cascade = Cascade::new(
            params.cascade_mode,
            params.density,
            params.base_hz,
            params.cutoff_hz,
            count,
        );
        let table = match network_len {
            Some(_) => self.table.as_deref(),
            None => None,
        };

        let mut frequency = params.base_hz;
        for i in 0..count {
            let f = match table {
                Some(table) => table.load(i),
                None => frequency,
            };

            if f > 0.0 && f < params.cutoff_hz {
                for s in 0..frames {
                    self.envelopes.tick(i);
                    let value = self.bank.sample(i) * self.envelopes.gain(i);
                    left[s] += value;
                    right[s] += value;
                    self.bank.update_frequency(f, i);
                }
            }

            if table.is_none() {
                frequency = cascade.next(frequency);
            }
        }

        let gain = params.master_gain * OUTPUT_HEADROOM;
        for sample in left[..frames].iter_mut().chain(right[..frames].iter_mut()) {
            *sample *= gain;
        }

        self.stats.blocks += 1;
        self.stats.saturations = self.envelopes.saturations();
        self.stats.active_oscillators = count;
        self.stats.network_driven = network_len.is_some();
        self.publish_stats();
    }

    fn collect_triggers(&mut self, params: &SynthParams, network_active: bool, count: usize) {
        self.pending.clear();

        match self.triggers.as_mut() {
            Some(triggers) if network_active => {
                triggers.drain_into(&mut self.pending, self.config.max_triggers_per_block);
                return;
            }
            Some(triggers) => {
                // Spikes without a published table have no target; discard
                // them so the queue does not fill up
                while triggers.try_pop().is_some() {}
            }
            None => {}
        }

        if !params.stochastic || self.config.stochastic_draws == 0 {
            return;
        }
        let draws = self.rng.gen_range(0..self.config.stochastic_draws);
        for _ in 0..draws {
            let index = self.rng.gen_range(0..self.config.stochastic_span);
            if index < count {
                self.pending.push(index as u16);
            }
        }
    }

    fn publish_stats(&self) {
        let m = &self.monitor;
        m.blocks.store(self.stats.blocks, Ordering::Relaxed);
        m.triggers_applied
            .store(self.stats.triggers_applied, Ordering::Relaxed);
        m.saturations.store(self.stats.saturations, Ordering::Relaxed);
        m.count_changes
            .store(self.stats.count_changes, Ordering::Relaxed);
        m.active_oscillators
            .store(self.stats.active_oscillators, Ordering::Relaxed);
        m.network_driven
            .store(self.stats.network_driven, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadeMode;
    use crate::channel::trigger_channel;

    fn engine(max_oscillators: usize) -> SynthEngine {
        SynthEngine::new(
            EngineConfig {
                max_oscillators,
                max_block: 256,
                seed: Some(42),
                ..EngineConfig::default()
            },
            48_000.0,
        )
    }

    fn quiet() -> SynthParams {
        SynthParams {
            stochastic: false,
            ..SynthParams::default()
        }
    }

    #[test]
    fn test_count_change_resizes_and_resets() {
        let mut engine = engine(100);
        let mut params = quiet();

        for n in [1, 17, 100, 3] {
            params.oscillator_count = n;
            engine.render(&params, 64);
            assert_eq!(engine.oscillators().len(), n);
            assert_eq!(engine.active_count(), n);
            assert!((0..n).all(|i| engine.envelopes().gain(i) == 0.0));
        }
        assert_eq!(engine.stats().count_changes, 4);
    }

    #[test]
    fn test_silent_without_triggers_or_floor() {
        let mut engine = engine(16);
        let (left, right) = engine.render(&quiet(), 128);
        assert!(left.iter().chain(right).all(|&s| s == 0.0));
    }

    #[test]
    fn test_floor_gain_produces_sound() {
        let mut engine = engine(16);
        let params = SynthParams {
            noise_floor: 1.0,
            oscillator_count: 1,
            master_gain: 1.0,
            ..quiet()
        };
        let (left, right) = engine.render(&params, 256);
        let peak = left.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.1 && peak <= OUTPUT_HEADROOM + 1e-6);
        assert_eq!(left, right);
    }

    #[test]
    fn test_cutoff_skips_but_cascade_continues() {
        let mut engine = engine(16);
        let params = SynthParams {
            oscillator_count: 4,
            cascade_mode: CascadeMode::Linear,
            density: 1.4,
            base_hz: 100.0,
            cutoff_hz: 125.0,
            noise_floor: 0.5,
            ..quiet()
        };
        engine.render(&params, 32);

        // 100, 120 render; 140 and 160 are above the cutoff
        assert_eq!(engine.oscillators().frequency(0), 100.0);
        assert_eq!(engine.oscillators().frequency(1), 120.0);
        assert_eq!(engine.oscillators().frequency(2), 0.0);
        assert_eq!(engine.oscillators().frequency(3), 0.0);
    }

    #[test]
    fn test_network_mode_uses_table_and_triggers() {
        let (mut tx, rx) = trigger_channel(16);
        let (table, mut writer) = FrequencyTable::new(16);
        let mut engine = engine(16).with_network(rx, table);

        writer.begin();
        writer.write(0, 200.0);
        writer.write(1, 300.0);
        writer.publish(2);

        let params = SynthParams {
            network_mode: true,
            ..quiet()
        };
        engine.render(&params, 8);
        assert_eq!(engine.active_count(), 2);
        assert!(engine.stats().network_driven);
        assert_eq!(engine.oscillators().frequency(1), 300.0);

        tx.push(1);
        tx.push(7); // beyond the published count
        engine.render(&params, 8);
        assert!(engine.envelopes().gain(1) > 1.0);
        assert_eq!(engine.stats().triggers_applied, 1);
    }

    #[test]
    fn test_network_mode_falls_back_while_in_init() {
        let (_tx, rx) = trigger_channel(16);
        let (table, mut writer) = FrequencyTable::new(16);
        let mut engine = engine(16).with_network(rx, table);
        writer.begin();

        let params = SynthParams {
            network_mode: true,
            oscillator_count: 5,
            ..quiet()
        };
        engine.render(&params, 8);
        assert_eq!(engine.active_count(), 5);
        assert!(!engine.stats().network_driven);
    }

    #[test]
    fn test_stochastic_triggers_fire() {
        let mut engine = engine(20_000);
        let params = SynthParams {
            oscillator_count: 20_000,
            stochastic: true,
            ..SynthParams::default()
        };
        // The first block resets envelopes after triggering
        engine.render(&params, 16);
        engine.render(&params, 16);
        engine.render(&params, 16);
        assert!(engine.stats().triggers_applied > 0);
    }

    #[test]
    fn test_monitor_mirrors_stats() {
        let mut engine = engine(8);
        let monitor = engine.monitor();
        engine.render(&quiet(), 8);
        engine.render(&quiet(), 8);
        assert_eq!(monitor.snapshot(), engine.stats());
        assert_eq!(monitor.snapshot().blocks, 2);
    }
}
