//! Frequency cascade: derive each oscillator's frequency from the previous
//!
//! Spreads N oscillators across the spectrum from one "density" control.
//! Linear mode adds a fixed step, multiplicative mode multiplies by a
//! factor derived from the frequency range and the oscillator count.

use serde::{Deserialize, Serialize};

/// Hz added per oscillator in linear mode, scaled by `density - 1`
pub const LINEAR_STEP_HZ: f32 = 50.0;
/// Span of the audible range used when the configured range is empty
pub const FULL_RANGE_HZ: f32 = 19_980.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeMode {
    Linear,
    #[default]
    Multiplicative,
}

/// The recurrence for one block, with its step precomputed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cascade {
    Add(f32),
    Multiply(f32),
}

impl Cascade {
    /// Build the recurrence for `count` oscillators between `base_hz` and
    /// `cutoff_hz`
    pub fn new(mode: CascadeMode, density: f32, base_hz: f32, cutoff_hz: f32, count: usize) -> Self {
        match mode {
            CascadeMode::Linear => Cascade::Add((density - 1.0) * LINEAR_STEP_HZ),
            CascadeMode::Multiplicative => {
                let range = if cutoff_hz > base_hz {
                    cutoff_hz - base_hz
                } else {
                    FULL_RANGE_HZ
                };
                let step = range / count.max(1) as f32;
                let remaining = range - step;
                let factor = if remaining > 0.0 {
                    range / remaining * density
                } else {
                    density
                };
                Cascade::Multiply(factor)
            }
        }
    }

    /// Frequency of the next oscillator
    #[inline]
    pub fn next(&self, current: f32) -> f32 {
        match *self {
            Cascade::Add(step) => current + step,
            Cascade::Multiply(factor) => current * factor,
        }
    }
}

/// One step of the cascade
pub fn next_frequency(
    current: f32,
    mode: CascadeMode,
    density: f32,
    base_hz: f32,
    cutoff_hz: f32,
    count: usize,
) -> f32 {
    Cascade::new(mode, density, base_hz, cutoff_hz, count).next(current)
}
