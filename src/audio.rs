//! Real-time audio output using cpal
//! Works with JACK, ALSA, CoreAudio, WASAPI, etc.
//!
//! The engine is moved into the device callback. Parameters reach it through
//! [`SharedParams`], statistics leave it through its
//! [`EngineMonitor`](crate::engine::EngineMonitor). The callback itself never
//! locks, allocates or logs.

use crate::config::AudioConfig;
use crate::engine::SynthEngine;
use crate::params::{ParamSource, SharedParams};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Failed to get default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("Unsupported sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("Failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// A running output stream. Audio stops when this is dropped.
pub struct AudioOutput {
    sample_rate: u32,
    channels: u16,
    buffer_size: usize,
    _stream: cpal::Stream,
}

impl AudioOutput {
    /// Open the default output device and start rendering `engine` into it
    pub fn start(
        config: &AudioConfig,
        mut engine: SynthEngine,
        params: Arc<SharedParams>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        match device.name() {
            Ok(name) => info!("Audio device: {}", name),
            Err(e) => warn!("Audio device name unavailable: {}", e),
        }

        let default_config = device.default_output_config()?;
        let sample_format = default_config.sample_format();
        let buffer_size = fit_buffer_size(config.buffer_size(), default_config.buffer_size());

        let mut stream_config: cpal::StreamConfig = default_config.config();
        if let Some(rate) = config.sample_rate {
            stream_config.sample_rate = cpal::SampleRate(rate);
        }
        stream_config.buffer_size = match buffer_size {
            Some(frames) => cpal::BufferSize::Fixed(frames as u32),
            None => cpal::BufferSize::Default,
        };

        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;
        let max_block = buffer_size.unwrap_or(config.buffer_size());
        engine.prepare(sample_rate as f32, max_block);

        info!(
            "🎵 Audio: {} Hz, {} channels, {:?}, buffer {:?}",
            sample_rate, channels, sample_format, stream_config.buffer_size
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, engine, params),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, engine, params),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, engine, params),
            other => return Err(AudioError::UnsupportedFormat(other)),
        }?;

        stream.play()?;
        info!("✅ Audio stream started at {} Hz", sample_rate);

        Ok(Self {
            sample_rate,
            channels,
            buffer_size: max_block,
            _stream: stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Fixed buffer size the device accepts, or `None` to let it choose
fn fit_buffer_size(requested: usize, supported: &cpal::SupportedBufferSize) -> Option<usize> {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some((requested as u32).clamp(*min, (*max).max(*min)) as usize)
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut engine: SynthEngine,
    params: Arc<SharedParams>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let snapshot = params.snapshot();
            write_interleaved(&mut engine, &snapshot, data, channels);
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )?;

    Ok(stream)
}

/// Render into an interleaved device buffer, one engine block at a time.
///
/// Mono devices get the average of both channels; channels beyond the
/// second are silent.
fn write_interleaved<T>(
    engine: &mut SynthEngine,
    params: &crate::params::SynthParams,
    data: &mut [T],
    channels: usize,
) where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = channels.max(1);
    let max_block = engine.max_block();

    for chunk in data.chunks_mut(max_block * channels) {
        let frames = chunk.len() / channels;
        let (left, right) = engine.render(params, frames);

        for (frame, (&l, &r)) in chunk.chunks_mut(channels).zip(left.iter().zip(right)) {
            match frame {
                [mono] => *mono = T::from_sample((l + r) * 0.5),
                [first, second, rest @ ..] => {
                    *first = T::from_sample(l);
                    *second = T::from_sample(r);
                    for sample in rest {
                        *sample = T::from_sample(0.0);
                    }
                }
                [] => {}
            }
        }
    }
}
