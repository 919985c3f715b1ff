//! Offline rendering
//!
//! Drives a [`SynthEngine`] block by block without an audio device and writes
//! the result as a stereo WAV file. With `realtime` set, blocks are paced to
//! the wall clock so a live UDP sender can be recorded.

use crate::engine::SynthEngine;
use crate::params::ParamSource;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("WAV output failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid render config: {0}")]
    InvalidConfig(String),
}

/// Configuration for rendering audio
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per engine block
    pub block_size: usize,
    /// Duration in seconds
    pub duration: f32,
    /// Fade in time in seconds
    pub fade_in: f32,
    /// Fade out time in seconds
    pub fade_out: f32,
    /// Sleep between blocks to keep pace with the wall clock
    pub realtime: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 512,
            duration: 1.0,
            fade_in: 0.01,
            fade_out: 0.01,
            realtime: false,
        }
    }
}

impl RenderConfig {
    pub fn total_frames(&self) -> usize {
        (self.duration.max(0.0) * self.sample_rate as f32) as usize
    }

    fn validate(&self) -> Result<(), RenderError> {
        if self.sample_rate == 0 {
            return Err(RenderError::InvalidConfig("sample rate is zero".to_string()));
        }
        if self.block_size == 0 {
            return Err(RenderError::InvalidConfig("block size is zero".to_string()));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(RenderError::InvalidConfig(format!(
                "duration {} is not a non-negative number",
                self.duration
            )));
        }
        Ok(())
    }
}

/// Two channels of rendered audio
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `duration` seconds into memory.
    ///
    /// Parameters are re-read from `params` before every block.
    pub fn render_to_buffer(
        &self,
        engine: &mut SynthEngine,
        params: &dyn ParamSource,
    ) -> Result<StereoBuffer, RenderError> {
        self.config.validate()?;

        let total = self.config.total_frames();
        let block = self.config.block_size;
        engine.prepare(self.config.sample_rate as f32, block);

        let mut out = StereoBuffer {
            left: Vec::with_capacity(total),
            right: Vec::with_capacity(total),
        };
        let block_time = Duration::from_secs_f64(block as f64 / self.config.sample_rate as f64);
        let started = Instant::now();
        let mut blocks = 0u32;

        while out.len() < total {
            let frames = block.min(total - out.len());
            let snapshot = params.snapshot();
            let (left, right) = engine.render(&snapshot, frames);
            out.left.extend_from_slice(left);
            out.right.extend_from_slice(right);
            blocks += 1;

            if self.config.realtime {
                let deadline = started + block_time * blocks;
                if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                    std::thread::sleep(wait);
                }
            }
        }

        debug!("Rendered {} blocks of {} frames", blocks, block);

        self.apply_fades(&mut out.left);
        self.apply_fades(&mut out.right);
        Ok(out)
    }

    /// Render to a 16-bit stereo WAV file
    pub fn render_to_file(
        &self,
        engine: &mut SynthEngine,
        params: &dyn ParamSource,
        output_path: &Path,
    ) -> Result<RenderStats, RenderError> {
        let buffer = self.render_to_buffer(engine, params)?;
        let stats = RenderStats::from_buffer(&buffer, self.config.sample_rate);
        self.write_wav(output_path, &buffer)?;
        info!("Wrote {} frames to {}", buffer.len(), output_path.display());
        Ok(stats)
    }

    /// Apply fade in and fade out to samples
    fn apply_fades(&self, samples: &mut [f32]) {
        let sample_rate = self.config.sample_rate as f32;

        if self.config.fade_in > 0.0 {
            let fade_in_samples = (self.config.fade_in * sample_rate) as usize;
            for (i, sample) in samples.iter_mut().take(fade_in_samples).enumerate() {
                *sample *= i as f32 / fade_in_samples as f32;
            }
        }

        if self.config.fade_out > 0.0 {
            let fade_out_samples = (self.config.fade_out * sample_rate) as usize;
            let start = samples.len().saturating_sub(fade_out_samples);
            for (i, sample) in samples[start..].iter_mut().enumerate() {
                *sample *= 1.0 - (i + 1) as f32 / fade_out_samples as f32;
            }
        }
    }

    fn write_wav(&self, path: &Path, buffer: &StereoBuffer) -> Result<(), RenderError> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)?;
        for (&l, &r) in buffer.left.iter().zip(&buffer.right) {
            writer.write_sample(to_i16(l))?;
            writer.write_sample(to_i16(r))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Statistics about rendered audio
#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    pub duration: f32,
    pub frame_count: usize,
    pub rms: f32,
    pub peak: f32,
    pub dc_offset: f32,
    pub zero_crossings: usize,
}

impl RenderStats {
    /// Measure both channels together
    pub fn from_buffer(buffer: &StereoBuffer, sample_rate: u32) -> Self {
        let frame_count = buffer.len();
        if frame_count == 0 {
            return Self::default();
        }
        let samples = || buffer.left.iter().chain(&buffer.right);
        let n = (frame_count * 2) as f32;

        let rms = (samples().map(|x| x * x).sum::<f32>() / n).sqrt();
        let peak = samples().map(|x| x.abs()).fold(0.0f32, f32::max);
        let dc_offset = samples().sum::<f32>() / n;
        let zero_crossings = buffer
            .left
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();

        Self {
            duration: frame_count as f32 / sample_rate.max(1) as f32,
            frame_count,
            rms,
            peak,
            dc_offset,
            zero_crossings,
        }
    }

    pub fn print_summary(&self) {
        println!("Render Statistics:");
        println!("  Duration:       {:.3} seconds", self.duration);
        println!("  Frames:         {}", self.frame_count);
        println!("  RMS:            {:.3}", self.rms);
        println!("  Peak:           {:.3}", self.peak);
        println!("  DC Offset:      {:.6}", self.dc_offset);
        println!("  Zero Crossings: {}", self.zero_crossings);
    }
}
