//! Synth parameters polled once per audio block
//!
//! Whatever front end drives the synth (CLI, a GUI, a test) writes
//! [`SynthParams`] into a [`SharedParams`]; the render loop takes a
//! [`ParamSource::snapshot`] at the start of each block. The store is an
//! `ArcSwap`, so the audio thread never takes a lock to read it.

use crate::cascade::CascadeMode;
use crate::envelope::{EnvelopeParams, DEFAULT_CEILING, DEFAULT_EPSILON};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_FREQUENCY_HZ: f32 = 20.0;
pub const MAX_FREQUENCY_HZ: f32 = 20_000.0;
pub const MIN_DENSITY: f32 = 1.0;
pub const MAX_DENSITY: f32 = 1.4;
pub const MIN_ATTACK: f32 = 0.5;
pub const MAX_ATTACK: f32 = 2.0;
pub const MIN_DECAY: f32 = 0.999;
pub const MAX_DECAY: f32 = 0.99999;

/// Every value the render loop reads from the outside world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthParams {
    /// Output level, 0..1
    pub master_gain: f32,
    /// Oscillators in internal mode
    pub oscillator_count: usize,
    /// Cascade spread, 1.0..1.4
    pub density: f32,
    /// Oscillators above this frequency are not rendered
    pub cutoff_hz: f32,
    /// Frequency of oscillator 0 in internal mode
    pub base_hz: f32,
    pub cascade_mode: CascadeMode,
    /// Take triggers and frequencies from the UDP receiver
    pub network_mode: bool,
    /// Generate random triggers when not network driven
    pub stochastic: bool,
    /// Resting envelope gain, 0..1
    pub noise_floor: f32,
    /// Gain added per trigger, 0.5..2.0
    pub attack: f32,
    /// Per-sample envelope decay, 0.999..0.99999
    pub decay: f32,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            master_gain: 0.5,
            oscillator_count: 200,
            density: 1.1,
            cutoff_hz: MAX_FREQUENCY_HZ,
            base_hz: 440.0,
            cascade_mode: CascadeMode::Multiplicative,
            network_mode: false,
            stochastic: true,
            noise_floor: 0.0,
            attack: 1.3,
            decay: 0.99996,
        }
    }
}

impl SynthParams {
    /// Clamp every value into its control range
    pub fn sanitized(self, max_oscillators: usize) -> Self {
        Self {
            master_gain: clamp_finite(self.master_gain, 0.0, 1.0),
            oscillator_count: self.oscillator_count.clamp(1, max_oscillators.max(1)),
            density: clamp_finite(self.density, MIN_DENSITY, MAX_DENSITY),
            cutoff_hz: clamp_finite(self.cutoff_hz, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ),
            base_hz: clamp_finite(self.base_hz, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ).floor(),
            noise_floor: clamp_finite(self.noise_floor, 0.0, 1.0),
            attack: clamp_finite(self.attack, MIN_ATTACK, MAX_ATTACK),
            decay: clamp_finite(self.decay, MIN_DECAY, MAX_DECAY),
            ..self
        }
    }

    pub fn envelope(&self) -> EnvelopeParams {
        EnvelopeParams {
            floor: self.noise_floor,
            attack_step: self.attack,
            decay_factor: self.decay,
            ceiling: DEFAULT_CEILING,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

fn clamp_finite(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Where the render loop gets its per-block parameters from
pub trait ParamSource: Send + Sync {
    fn snapshot(&self) -> SynthParams;
}

/// Fixed parameters
impl ParamSource for SynthParams {
    fn snapshot(&self) -> SynthParams {
        *self
    }
}

/// Lock-free parameter store shared between a control thread and the
/// audio thread
#[derive(Debug)]
pub struct SharedParams {
    inner: ArcSwap<SynthParams>,
}

impl SharedParams {
    pub fn new(params: SynthParams) -> Arc<Self> {
        Arc::new(Self {
            inner: ArcSwap::from_pointee(params),
        })
    }

    pub fn store(&self, params: SynthParams) {
        self.inner.store(Arc::new(params));
    }

    /// Modify the current parameters in place
    pub fn update(&self, mut f: impl FnMut(&mut SynthParams)) {
        self.inner.rcu(|current| {
            let mut next = **current;
            f(&mut next);
            next
        });
    }
}

impl ParamSource for SharedParams {
    fn snapshot(&self) -> SynthParams {
        **self.inner.load()
    }
}

impl<P: ParamSource + ?Sized> ParamSource for Arc<P> {
    fn snapshot(&self) -> SynthParams {
        (**self).snapshot()
    }
}
