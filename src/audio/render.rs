//! Rendering pattern buffers to audio
//!
//! The flattened buffer of a pattern becomes an interleaved clip with as many
//! channels as `channels(n)` asked for. Without a pan pattern every channel
//! carries the full signal; with one, each sample is panned linearly between
//! the two channels adjacent to its position. Clips can be written out as
//! 32-bit float WAV files.

use crate::audio::audio::Clip;
use anyhow::{Context, Result};
use facet_core::algebra::resize::resample_nearest;
use facet_core::types::flatten;
use facet_core::PatternObject;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-channel gains for a pan position in 0..=1 across `channels` outputs
pub fn pan_gains(position: f64, channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    if channels == 1 {
        return vec![1.0];
    }
    let position = if position.is_finite() {
        position.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let x = position * (channels - 1) as f64;
    let lower = (x.floor() as usize).min(channels - 1);
    let frac = (x - lower as f64) as f32;
    let mut gains = vec![0.0; channels];
    gains[lower] = 1.0 - frac;
    if frac > 0.0 && lower + 1 < channels {
        gains[lower + 1] = frac;
    }
    gains
}

/// Interleave a mono signal into `channels` outputs
pub fn remix(samples: &[f32], channels: usize, pan: Option<&[f64]>) -> Vec<f32> {
    let channels = channels.max(1);
    let pan = match pan {
        Some(positions) if !positions.is_empty() && channels > 1 => {
            Some(resample_nearest(positions, samples.len()))
        }
        _ => None,
    };
    let mut out = Vec::with_capacity(samples.len() * channels);
    for (i, sample) in samples.iter().enumerate() {
        match &pan {
            Some(positions) => {
                let gains = pan_gains(positions.get(i).copied().unwrap_or(0.0), channels);
                out.extend(gains.iter().map(|g| sample * g));
            }
            None => out.extend(std::iter::repeat(*sample).take(channels)),
        }
    }
    out
}

/// Build the playback clip for a pattern from its unclamped flattened data
pub fn render_pattern(pattern: &PatternObject, sample_rate: u32) -> Clip {
    let mono: Vec<f32> = flatten(&pattern.data)
        .into_iter()
        .map(|s| if s.is_finite() { s as f32 } else { 0.0 })
        .collect();
    let samples = remix(&mono, pattern.channels, pattern.pan.as_deref());
    Clip::new(samples, pattern.channels, sample_rate)
}

/// Artifact path for a pattern name
pub fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    let file: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.wav", file))
}

/// Write a clip as a 32-bit float WAV
pub fn write_wav(path: &Path, clip: &Clip) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    let spec = hound::WavSpec {
        channels: clip.channels as u16,
        sample_rate: clip.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("could not create {}", path.display()))?;
    for sample in &clip.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Remove every artifact left in `dir`
pub fn clean_artifacts(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "wav") {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_core::Value;

    #[test]
    fn test_pan_gains_are_linear() {
        assert_eq!(pan_gains(0.3, 1), vec![1.0]);
        assert_eq!(pan_gains(0.0, 2), vec![1.0, 0.0]);
        assert_eq!(pan_gains(1.0, 2), vec![0.0, 1.0]);
        assert_eq!(pan_gains(0.5, 2), vec![0.5, 0.5]);
        assert_eq!(pan_gains(0.5, 3), vec![0.0, 1.0, 0.0]);
        assert_eq!(pan_gains(0.75, 3), vec![0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_remix_without_pan_copies_signal() {
        assert_eq!(remix(&[0.5, -0.5], 2, None), vec![0.5, 0.5, -0.5, -0.5]);
        assert_eq!(remix(&[0.5], 1, Some(&[1.0])), vec![0.5]);
    }

    #[test]
    fn test_remix_with_pan_pattern() {
        let out = remix(&[1.0, 1.0], 2, Some(&[0.0, 1.0]));
        assert_eq!(out, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_render_uses_unclamped_data() {
        let mut pattern = PatternObject::new("a", "", "a [1 [0 1]]");
        pattern.data = Value::Sequence(vec![Value::Number(1.0), Value::seq([0.0, f64::NAN])]);
        let clip = render_pattern(&pattern, 44100);
        assert_eq!(clip.samples, vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(clip.channels, 1);
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = std::env::temp_dir().join(format!("facet-render-{}", std::process::id()));
        let path = artifact_path(&dir, "kick vol");
        assert!(path.ends_with("kick_vol.wav"));

        let clip = Clip::new(vec![0.25, -0.5, 1.0, 0.0], 2, 44100);
        write_wav(&path, &clip).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().bits_per_sample, 32);
        let samples: Vec<f32> = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, clip.samples);

        assert_eq!(clean_artifacts(&dir).unwrap(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
