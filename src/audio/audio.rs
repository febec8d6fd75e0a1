//! Audio playback
//!
//! Rendered pattern buffers are played as one-shot clips. The [`Mixer`] sums
//! every active voice into the output buffer; [`AudioPlayer`] drives it from
//! a cpal output stream. cpal streams must stay on the thread that built
//! them, so [`AudioPlayerHandle`] keeps the player on its own thread and
//! shares only the mixer.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Voices beyond this are dropped, oldest first
pub const MAX_VOICES: usize = 64;

/// An interleaved clip ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
    /// Artifact the clip was written to, if any
    pub path: Option<PathBuf>,
}

impl Clip {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
            path: None,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Sample of `frame` for output channel `channel`, wrapping channels
    fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples
            .get(frame * self.channels + channel % self.channels)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Anything that can play a triggered clip
pub trait PlaybackSink: Send + Sync {
    fn trigger(&self, clip: Arc<Clip>, gain: f32);
    fn stop_all(&self);
}

struct Voice {
    clip: Arc<Clip>,
    /// Position in clip frames
    position: f64,
    gain: f32,
}

/// Sums active voices into an output buffer
#[derive(Default)]
pub struct Mixer {
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&mut self, clip: Arc<Clip>, gain: f32) {
        if clip.frames() == 0 {
            return;
        }
        if self.voices.len() >= MAX_VOICES {
            self.voices.remove(0);
        }
        self.voices.push(Voice {
            clip,
            position: 0.0,
            gain,
        });
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Mix into `out` (interleaved, `channels` wide) at `sample_rate`,
    /// resampling each clip by nearest frame
    pub fn render(&mut self, out: &mut [f32], channels: usize, sample_rate: u32) {
        out.fill(0.0);
        let channels = channels.max(1);
        for voice in &mut self.voices {
            let step = voice.clip.sample_rate as f64 / sample_rate.max(1) as f64;
            for frame in out.chunks_mut(channels) {
                let index = voice.position as usize;
                if index >= voice.clip.frames() {
                    break;
                }
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample += voice.clip.sample(index, c) * voice.gain;
                }
                voice.position += step;
            }
        }
        self.voices
            .retain(|voice| (voice.position as usize) < voice.clip.frames());
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

pub struct AudioPlayer {
    stream: Stream,
    sample_rate: u32,
}

impl AudioPlayer {
    pub fn new(mixer: Arc<Mutex<Mixer>>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;
        let config = device.default_output_config()?;

        let sample_format = config.sample_format();
        let config: StreamConfig = config.into();
        let sample_rate = config.sample_rate.0;

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, mixer)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, mixer)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, mixer)?,
            _ => return Err(anyhow!("Unsupported sample format: {:?}", sample_format)),
        };

        Ok(AudioPlayer {
            stream,
            sample_rate,
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mixer: Arc<Mutex<Mixer>>,
    ) -> Result<Stream>
    where
        T: Sample + SizedSample + Send + 'static + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;
        let mut scratch: Vec<f32> = Vec::new();

        let err_fn = |err| log::error!("an error occurred on the output audio stream: {:?}", err);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    match mixer.lock() {
                        Ok(mut mixer) => mixer.render(&mut scratch, channels, sample_rate),
                        Err(_) => scratch.fill(0.0),
                    }
                    for (out, value) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*value);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| anyhow!("Failed to build output stream: {}", e))?;

        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn play(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| anyhow!("Failed to play stream: {}", e))
    }

    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| anyhow!("Failed to pause stream: {}", e))
    }
}

/// Thread-safe handle to an [`AudioPlayer`] living on its own thread
pub struct AudioPlayerHandle {
    mixer: Arc<Mutex<Mixer>>,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl AudioPlayerHandle {
    /// Open the default output device and start the stream
    pub fn new() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let player_mixer = mixer.clone();

        let thread = thread::Builder::new()
            .name("facet-audio".to_string())
            .spawn(move || {
                let player = match AudioPlayer::new(player_mixer).and_then(|p| {
                    p.play()?;
                    Ok(p)
                }) {
                    Ok(player) => player,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                log::info!("audio output running at {} Hz", player.sample_rate());
                let _ = ready_tx.send(Ok(()));
                // park until the handle is dropped
                let _ = shutdown_rx.recv();
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                mixer,
                shutdown_tx,
                thread: Some(thread),
            }),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(anyhow!(message))
            }
            Err(_) => Err(anyhow!("audio thread exited during startup")),
        }
    }
}

impl PlaybackSink for AudioPlayerHandle {
    fn trigger(&self, clip: Arc<Clip>, gain: f32) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.trigger(clip, gain);
        }
    }

    fn stop_all(&self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.clear();
        }
    }
}

impl Drop for AudioPlayerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_sums_and_retires_voices() {
        let mut mixer = Mixer::new();
        let clip = Arc::new(Clip::new(vec![0.25, 0.5], 1, 100));
        mixer.trigger(clip.clone(), 1.0);
        mixer.trigger(clip, 0.5);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 1, 100);
        assert_eq!(out, vec![0.375, 0.75, 0.0, 0.0]);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_mono_clip_fills_every_output_channel() {
        let mut mixer = Mixer::new();
        mixer.trigger(Arc::new(Clip::new(vec![0.5], 1, 44100)), 1.0);
        let mut out = vec![0.0; 2];
        mixer.render(&mut out, 2, 44100);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_resampling_and_clipping() {
        let mut mixer = Mixer::new();
        mixer.trigger(Arc::new(Clip::new(vec![2.0, 0.0, -2.0, 0.0], 1, 200)), 1.0);
        let mut out = vec![0.0; 2];
        mixer.render(&mut out, 1, 100);
        assert_eq!(out, vec![1.0, -1.0]);
    }

    #[test]
    fn test_voice_limit() {
        let mut mixer = Mixer::new();
        let clip = Arc::new(Clip::new(vec![0.1; 8], 1, 100));
        for _ in 0..MAX_VOICES + 5 {
            mixer.trigger(clip.clone(), 1.0);
        }
        assert_eq!(mixer.active_voices(), MAX_VOICES);
        mixer.trigger(Arc::new(Clip::new(Vec::new(), 1, 100)), 1.0);
        assert_eq!(mixer.active_voices(), MAX_VOICES);
    }
}
