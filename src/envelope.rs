//! Per-oscillator trigger/decay envelopes
//!
//! Each oscillator has a single gain value. A trigger adds a fixed step
//! (clamped to the ceiling), every sample multiplies the excess over the
//! resting floor away, and once within `epsilon` of the floor the gain snaps
//! to it exactly.
//!
//! Gain is always finite and inside `[floor, ceiling]`.

/// Upper bound for any envelope gain
pub const DEFAULT_CEILING: f32 = 12.0;
/// Distance from the floor at which decay snaps to the floor
pub const DEFAULT_EPSILON: f32 = 0.01;

/// Tunable envelope coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeParams {
    /// Resting gain ("noise gain"), 0..1
    pub floor: f32,
    /// Gain added by one trigger
    pub attack_step: f32,
    /// Per-sample multiplier while above the floor, < 1
    pub decay_factor: f32,
    pub ceiling: f32,
    pub epsilon: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            floor: 0.0,
            attack_step: 1.3,
            decay_factor: 0.99996,
            ceiling: DEFAULT_CEILING,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl EnvelopeParams {
    /// Clamp every coefficient into a range that keeps gains bounded
    pub fn sanitized(self) -> Self {
        let ceiling = if self.ceiling.is_finite() && self.ceiling > 0.0 {
            self.ceiling
        } else {
            DEFAULT_CEILING
        };
        let floor = finite_or(self.floor, 0.0).clamp(0.0, ceiling);
        Self {
            floor,
            attack_step: finite_or(self.attack_step, 0.0).max(0.0),
            decay_factor: finite_or(self.decay_factor, 0.0).clamp(0.0, 0.999_999_9),
            ceiling,
            epsilon: finite_or(self.epsilon, DEFAULT_EPSILON).max(0.0),
        }
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Gains for every oscillator slot, preallocated to the maximum count
#[derive(Debug, Clone)]
pub struct EnvelopeBank {
    gains: Vec<f32>,
    params: EnvelopeParams,
    saturations: u64,
}

impl EnvelopeBank {
    pub fn new(max_oscillators: usize, params: EnvelopeParams) -> Self {
        let params = params.sanitized();
        Self {
            gains: vec![params.floor; max_oscillators],
            params,
            saturations: 0,
        }
    }

    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    /// Update coefficients; existing gains are pulled into the new range
    pub fn set_params(&mut self, params: EnvelopeParams) {
        let params = params.sanitized();
        if params == self.params {
            return;
        }
        let range_changed = params.floor != self.params.floor || params.ceiling != self.params.ceiling;
        self.params = params;
        if range_changed {
            for gain in self.gains.iter_mut() {
                *gain = gain.clamp(params.floor, params.ceiling);
            }
        }
    }

    /// Apply a trigger impulse to oscillator `index`.
    ///
    /// Returns `true` if the gain hit the ceiling.
    #[inline]
    pub fn trigger(&mut self, index: usize) -> bool {
        let Some(gain) = self.gains.get_mut(index) else {
            return false;
        };
        let raised = (*gain + self.params.attack_step).max(self.params.floor);
        if raised > self.params.ceiling {
            *gain = self.params.ceiling;
            self.saturations += 1;
            true
        } else {
            *gain = raised;
            false
        }
    }

    /// Advance oscillator `index` by one sample of decay
    #[inline]
    pub fn tick(&mut self, index: usize) {
        let floor = self.params.floor;
        let threshold = floor + self.params.epsilon;
        let gain = &mut self.gains[index];

        if *gain > threshold {
            *gain *= self.params.decay_factor;
        }
        if *gain <= threshold {
            *gain = floor;
        }
    }

    #[inline]
    pub fn gain(&self, index: usize) -> f32 {
        self.gains[index]
    }

    /// Put every oscillator back to the floor
    pub fn reset(&mut self) {
        self.gains.fill(self.params.floor);
    }

    /// Number of triggers that were clamped at the ceiling
    pub fn saturations(&self) -> u64 {
        self.saturations
    }

    pub fn len(&self) -> usize {
        self.gains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }
}
