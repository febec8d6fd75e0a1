//! Spectral and windowing transforms
//!
//! These read the flattened buffer, so nested sub-steps are resolved before
//! the transform runs.

use crate::algebra::{Args, Registry, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::Result;
use crate::types::{flatten, Value};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Magnitude spectrum of the buffer zero-padded to the next power of two
pub fn magnitude_spectrum(samples: &[f64]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let size = samples.len().next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = (0..size)
        .map(|i| Complex {
            re: samples.get(i).copied().unwrap_or(0.0),
            im: 0.0,
        })
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(size);
    fft.process(&mut buffer);

    buffer.iter().map(|c| c.norm()).collect()
}

fn fft(value: Value, _: &Args, _: &mut EvalContext) -> Result<Value> {
    Ok(Value::seq(magnitude_spectrum(&flatten(&value))))
}

/// Centered convolution, normalized to 0..1
pub fn convolve_samples(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let al = signal.len();
    let wl = kernel.len();
    if al == 0 || wl == 0 {
        return signal.to_vec();
    }
    let offset = wl / 2;
    let output: Vec<f64> = (0..al)
        .map(|i| {
            let kmin = if i >= offset { 0 } else { offset - i };
            let kmax = if i + offset < al { wl - 1 } else { al - 1 - i + offset };
            (kmin..=kmax.min(wl - 1))
                .map(|k| signal[i + k - offset] * kernel[k])
                .sum()
        })
        .collect();

    let min = output.iter().copied().fold(f64::INFINITY, f64::min);
    let max = output.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    output
        .into_iter()
        .map(|x| if range == 0.0 { 0.0 } else { (x - min) / range })
        .collect()
}

fn convolve(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let kernel = args.pattern(0, ctx)?.leaves();
    Ok(Value::seq(convolve_samples(&flatten(&value), &kernel)))
}

fn hamming(i: usize, n: usize) -> f64 {
    0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()
}

fn flat_top(i: usize, n: usize) -> f64 {
    let (a0, a1, a2, a3, a4) = (1.0, 1.93, 1.29, 0.388, 0.028);
    let f = 2.0 * PI * i as f64 / (n - 1) as f64;
    a0 - a1 * f.cos() + a2 * (2.0 * f).cos() - a3 * (3.0 * f).cos() + a4 * (4.0 * f).cos()
}

fn apply_window(value: Value, window: fn(usize, usize) -> f64) -> Value {
    let samples = flatten(&value);
    let n = samples.len();
    if n < 2 {
        return Value::seq(samples);
    }
    Value::seq(
        samples
            .into_iter()
            .enumerate()
            .map(|(i, x)| x * window(i, n)),
    )
}

fn fade(value: Value, _: &Args, _: &mut EvalContext) -> Result<Value> {
    Ok(apply_window(value, hamming))
}

fn flattop(value: Value, _: &Args, _: &mut EvalContext) -> Result<Value> {
    Ok(apply_window(value, flat_top))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "fft",
        "Spectral",
        "Magnitude spectrum, zero-padded to a power of two.",
        "fft()",
        Transform::Sequence(fft),
    );
    registry.register(
        "convolve",
        "Spectral",
        "Convolves with an impulse response and normalizes.",
        "convolve(pattern)",
        Transform::Sequence(convolve),
    );
    registry.register(
        "fade",
        "Spectral",
        "Applies a Hamming window.",
        "fade()",
        Transform::Sequence(fade),
    );
    registry.register(
        "flattop",
        "Spectral",
        "Applies a flat-top window.",
        "flattop()",
        Transform::Sequence(flattop),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectrum_of_impulse_is_flat() {
        let spectrum = magnitude_spectrum(&[1.0, 0.0, 0.0]);
        assert_eq!(spectrum.len(), 4);
        assert!(spectrum.iter().all(|m| (m - 1.0).abs() < 1e-9));
        assert!(magnitude_spectrum(&[]).is_empty());
    }

    #[test]
    fn test_convolve_identity_kernel() {
        let out = convolve_samples(&[0.0, 2.0, 4.0], &[1.0]);
        assert_eq!(out, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_windows_taper_edges() {
        let faded = apply_window(Value::seq([1.0; 5]), hamming).leaves();
        assert!((faded[0] - 0.08).abs() < 1e-9);
        assert!((faded[2] - 1.0).abs() < 1e-9);
        let single = apply_window(Value::seq([3.0]), flat_top);
        assert_eq!(single, Value::seq([3.0]));
    }
}
