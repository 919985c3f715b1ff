//! Sine wavetable and the bank of phase-accumulating oscillators
//!
//! All oscillators read the same immutable one-cycle sine table. Each one
//! keeps a fractional phase in table samples and advances it by
//! `frequency * table_len / sample_rate` per sample.

use rand::Rng;
use std::f32::consts::PI;
use std::sync::Arc;

/// Default number of samples in one wavetable cycle
pub const DEFAULT_TABLE_LEN: usize = 1024;

/// One cycle of a sine wave, shared read-only
#[derive(Debug, Clone)]
pub struct Wavetable {
    samples: Arc<[f32]>,
}

impl Wavetable {
    pub fn sine(len: usize) -> Self {
        let len = len.max(2);
        let samples: Arc<[f32]> = (0..len)
            .map(|i| (2.0 * PI * i as f32 / len as f32).sin())
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Linearly interpolated read at a fractional `phase` in `[0, len)`
    #[inline]
    pub fn lookup(&self, phase: f32) -> f32 {
        let len = self.samples.len();
        let index = phase as usize % len;
        let next = if index + 1 == len { 0 } else { index + 1 };
        let frac = phase - phase.floor();

        let a = self.samples[index];
        let b = self.samples[next];
        a + frac * (b - a)
    }
}

/// Phase accumulators for up to `max_oscillators` oscillators.
///
/// Storage is reserved for the maximum up front, so resizing never
/// reallocates.
#[derive(Debug, Clone)]
pub struct OscillatorBank {
    wavetable: Wavetable,
    sample_rate: f32,
    phases: Vec<f32>,
    frequencies: Vec<f32>,
    increments: Vec<f32>,
    max_oscillators: usize,
}

impl OscillatorBank {
    pub fn new(max_oscillators: usize, table_len: usize, sample_rate: f32) -> Self {
        Self {
            wavetable: Wavetable::sine(table_len),
            sample_rate: sample_rate.max(1.0),
            phases: Vec::with_capacity(max_oscillators),
            frequencies: Vec::with_capacity(max_oscillators),
            increments: Vec::with_capacity(max_oscillators),
            max_oscillators,
        }
    }

    /// Adopt a new sample rate; increments are recomputed on the next
    /// frequency update
    pub fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate.max(1.0);
        self.frequencies.fill(0.0);
        self.increments.fill(0.0);
    }

    /// Recreate the bank with `count` oscillators and fresh random phases
    pub fn resize<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) {
        let count = count.min(self.max_oscillators);
        let table_len = self.wavetable.len() as f32;

        self.phases.clear();
        self.phases
            .extend((0..count).map(|_| rng.gen_range(0.0..table_len)));
        self.frequencies.clear();
        self.frequencies.resize(count, 0.0);
        self.increments.clear();
        self.increments.resize(count, 0.0);
    }

    /// Set oscillator `index` to `frequency` and advance its phase one sample
    #[inline]
    pub fn update_frequency(&mut self, frequency: f32, index: usize) {
        let table_len = self.wavetable.len() as f32;
        if self.frequencies[index] != frequency {
            self.frequencies[index] = frequency;
            self.increments[index] = frequency * table_len / self.sample_rate;
        }
        let phase = self.phases[index] + self.increments[index];
        self.phases[index] = if phase >= table_len {
            phase.rem_euclid(table_len)
        } else {
            phase
        };
    }

    /// Current output of oscillator `index`
    #[inline]
    pub fn sample(&self, index: usize) -> f32 {
        self.wavetable.lookup(self.phases[index])
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn max_oscillators(&self) -> usize {
        self.max_oscillators
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn wavetable(&self) -> &Wavetable {
        &self.wavetable
    }

    pub fn phase(&self, index: usize) -> f32 {
        self.phases[index]
    }

    pub fn frequency(&self, index: usize) -> f32 {
        self.frequencies[index]
    }

    pub fn increment(&self, index: usize) -> f32 {
        self.increments[index]
    }
}
