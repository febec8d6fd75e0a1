//! Generators
//!
//! Calls that produce a fresh pattern. They can start a statement, appear
//! inside arguments, or sit in a chain where they replace the current value.

use crate::algebra::level::scale;
use crate::algebra::resize::reduce;
use crate::algebra::sequence::shift_value;
use crate::algebra::{apply_level, round4, Args, GeneratorRule, Registry, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::types::Value;
use std::f64::consts::PI;

/// Bjorklund's algorithm: spread `pulses` as evenly as possible over `steps`
pub fn bjorklund(pulses: usize, steps: usize) -> Vec<bool> {
    if steps == 0 {
        return vec![];
    }
    if pulses >= steps {
        return vec![true; steps];
    }
    if pulses == 0 {
        return vec![false; steps];
    }

    let mut groups: Vec<Vec<bool>> = vec![vec![true]; pulses];
    let mut remainder: Vec<Vec<bool>> = vec![vec![false]; steps - pulses];

    while remainder.len() > 1 {
        let paired = groups.len().min(remainder.len());
        let mut merged = Vec::with_capacity(paired);
        for (group, rest) in groups.iter().zip(remainder.iter()) {
            let mut combined = group.clone();
            combined.extend(rest.iter().copied());
            merged.push(combined);
        }
        let leftover_groups: Vec<_> = groups.into_iter().skip(paired).collect();
        let leftover_remainder: Vec<_> = remainder.into_iter().skip(paired).collect();
        groups = merged;
        remainder = if leftover_groups.is_empty() {
            leftover_remainder
        } else {
            leftover_groups
        };
    }

    groups.into_iter().chain(remainder).flatten().collect()
}

fn count(n: f64) -> usize {
    if n.is_finite() {
        n.abs().ceil() as usize
    } else {
        0
    }
}

fn required(args: &Args, index: usize, name: &str, ctx: &mut EvalContext) -> Result<f64> {
    match args.value(index, ctx)?.and_then(|v| v.first_number()) {
        Some(n) => Ok(n),
        None => Err(FacetError::argument(
            args.raw(),
            format!("{} needs argument {}", name, index + 1),
        )),
    }
}

fn periods_and_length(args: &Args, name: &str, ctx: &mut EvalContext) -> Result<(f64, usize)> {
    let periods = args.number(0, 1.0, ctx)?.abs();
    let length_arg = count(required(args, 1, name, ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    Ok((periods, length))
}

fn raw_sine(repeats: usize, length: usize, total: usize) -> Vec<f64> {
    let mut samples = Vec::with_capacity(total);
    for _ in 0..repeats {
        for i in 0..length {
            samples.push(round4((2.0 * PI * (i as f64 / length as f64)).sin()));
        }
    }
    samples
}

/// Sine scaled to 0..1, rotated so the first sample is the trough
pub fn sine_wave(periods: f64, length: usize, ctx: &mut EvalContext) -> Result<Value> {
    if periods == 0.0 || length == 0 {
        return Ok(Value::empty());
    }
    let total = ctx.repeated_len(count(periods), length)?;
    let raw = raw_sine(count(periods), length, total);
    let scaled = apply_level(Value::seq(raw), scale, &[0.0, 1.0], ctx)?;
    Ok(shift_value(scaled, (1.0 / periods) * 0.25))
}

fn sine(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let (periods, length) = periods_and_length(args, "sine", ctx)?;
    sine_wave(periods, length, ctx)
}

fn cosine(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let (periods, length) = periods_and_length(args, "cosine", ctx)?;
    if periods == 0.0 || length == 0 {
        return Ok(Value::empty());
    }
    let sine = sine_wave(periods, length, ctx)?;
    Ok(shift_value(sine, (1.0 / periods) * -0.25))
}

fn tri(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let (periods, length) = periods_and_length(args, "tri", ctx)?;
    if length == 0 {
        return Ok(Value::empty());
    }
    let denominator = (length.max(2) - 1) as f64;
    let ramp: Vec<f64> = (0..length).map(|i| round4(i as f64 / denominator)).collect();
    let mut triangle = ramp.clone();
    triangle.extend(ramp.iter().rev());
    let triangle = reduce(&triangle, length);
    let mut out = Vec::with_capacity(ctx.repeated_len(count(periods), length)?);
    for _ in 0..count(periods) {
        out.extend(triangle.iter().copied());
    }
    Ok(Value::seq(out))
}

fn square(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let (periods, length) = periods_and_length(args, "square", ctx)?;
    let mut out = Vec::with_capacity(ctx.repeated_len(count(periods), length)?);
    for _ in 0..count(periods) {
        for i in 0..length {
            out.push(if i as f64 / length as f64 > 0.5 { 1.0 } else { 0.0 });
        }
    }
    Ok(Value::seq(out))
}

pub fn ramp_values(from: f64, to: f64, size: usize) -> Vec<f64> {
    if size == 0 {
        return Vec::new();
    }
    let mut step = (to - from).abs() / size as f64;
    if to < from {
        step = -step;
    }
    (0..size).map(|i| from + step * i as f64).collect()
}

fn ramp(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let from = required(args, 0, "ramp", ctx)?;
    let to = required(args, 1, "ramp", ctx)?;
    let size_arg = count(required(args, 2, "ramp", ctx)?);
    let size = ctx.pattern_len(size_arg)?;
    Ok(Value::seq(ramp_values(from, to, size)))
}

fn phasor(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let (periods, length) = periods_and_length(args, "phasor", ctx)?;
    let repeats = periods.round() as usize;
    let mut out = Vec::with_capacity(ctx.repeated_len(repeats, length)?);
    let ramp = ramp_values(0.0, 1.0, length);
    for _ in 0..repeats {
        out.extend(ramp.iter().copied());
    }
    Ok(Value::seq(out))
}

fn noise(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length_arg = count(required(args, 0, "noise", ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    Ok(Value::seq((0..length).map(|_| ctx.random()).collect::<Vec<_>>()))
}

fn turing(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length_arg = count(required(args, 0, "turing", ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    Ok(Value::seq(
        (0..length).map(|_| ctx.random().round()).collect::<Vec<_>>(),
    ))
}

fn drunk(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length_arg = count(required(args, 0, "drunk", ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    let intensity = args.number(1, 0.1, ctx)?;
    let mut position = ctx.random();
    let mut out = Vec::with_capacity(length);
    for _ in 0..length {
        let mut step = ctx.random() * intensity;
        if ctx.random() < 0.5 {
            step = -step;
        }
        position = (position + step).clamp(0.0, 1.0);
        out.push(round4(position));
    }
    Ok(Value::seq(out))
}

fn spiral(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length_arg = count(required(args, 0, "spiral", ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    let degrees = args.number(1, 137.5, ctx)?.abs();
    let mut angle = 0.0;
    let mut out = Vec::with_capacity(length);
    for _ in 0..length {
        angle += degrees;
        if angle > 359.0 {
            angle = (360.0 - angle).abs();
        }
        out.push(angle / 360.0);
    }
    Ok(Value::seq(out))
}

// iterates z -> z^2 + c along the real axis
fn brot(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length_arg = count(required(args, 0, "brot", ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    let mut x = args.number(1, 0.0, ctx)?;
    let y = args.number(2, 0.0, ctx)?;
    let mut out = Vec::with_capacity(length);
    for _ in 0..length {
        out.push(x.clamp(-1.0, 1.0));
        x = x * x + y;
    }
    Ok(Value::seq(out))
}

fn euclid(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let hits = required(args, 0, "euclid", ctx)?.abs().round() as usize;
    let steps_arg = required(args, 1, "euclid", ctx)?.abs().round() as usize;
    let steps = ctx.pattern_len(steps_arg)?;
    Ok(Value::seq(
        bjorklund(hits, steps)
            .into_iter()
            .map(|hit| if hit { 1.0 } else { 0.0 })
            .collect::<Vec<_>>(),
    ))
}

fn silence(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length_arg = count(required(args, 0, "silence", ctx)?);
    let length = ctx.pattern_len(length_arg)?;
    Ok(Value::seq(vec![0.0; length]))
}

fn data(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    match args.value(0, ctx)? {
        Some(value) => Ok(value.into_sequence()),
        None => Ok(Value::empty()),
    }
}

fn get(args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let Some(name) = args.string(0) else {
        return Err(FacetError::argument(args.raw(), "get needs a pattern name"));
    };
    ctx.store
        .get(&name)
        .cloned()
        .ok_or_else(|| FacetError::evaluation(format!("no stored pattern named '{}'", name)))
}

pub(crate) fn register(registry: &mut Registry) {
    let ops: [(&str, &str, &str, GeneratorRule); 15] = [
        ("sine", "Sine wave scaled to 0..1.", "sine(periods, length)", sine),
        ("cosine", "Cosine wave scaled to 0..1.", "cosine(periods, length)", cosine),
        ("tri", "Triangle wave.", "tri(periods, length)", tri),
        ("square", "Square wave.", "square(periods, length)", square),
        ("phasor", "Rising ramp from 0 to 1, repeated.", "phasor(periods, length)", phasor),
        ("ramp", "Linear ramp.", "ramp(from, to, size)", ramp),
        ("noise", "Uniform random values in 0..1.", "noise(length)", noise),
        ("turing", "Random 0s and 1s.", "turing(length)", turing),
        ("drunk", "Random walk within 0..1.", "drunk(length, intensity = 0.1)", drunk),
        ("spiral", "Angles stepped by a fixed amount, as 0..1.", "spiral(length, degrees = 137.5)", spiral),
        ("brot", "Real-axis Mandelbrot iteration.", "brot(length, x, y)", brot),
        ("euclid", "Euclidean rhythm of hits over steps.", "euclid(hits, steps)", euclid),
        ("silence", "All zeros.", "silence(length)", silence),
        ("data", "Literal data.", "data(list)", data),
        ("get", "Pattern stored with set().", "get(name)", get),
    ];
    for (name, description, signature, rule) in ops {
        registry.register(name, "Generator", description, signature, Transform::Generator(rule));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(rule: GeneratorRule, args: &str) -> Value {
        rule(&Args::new(args), &mut EvalContext::seeded(3)).unwrap()
    }

    #[test]
    fn test_bjorklund() {
        let pattern = bjorklund(3, 8);
        assert_eq!(pattern.len(), 8);
        assert_eq!(pattern.iter().filter(|&&b| b).count(), 3);
        assert_eq!(pattern, vec![true, false, false, true, false, false, true, false]);
        assert_eq!(bjorklund(0, 4), vec![false; 4]);
        assert_eq!(bjorklund(5, 4), vec![true; 4]);
    }

    #[test]
    fn test_sine_range_and_phase() {
        let wave = run(sine, "1, 8").leaves();
        assert_eq!(wave.len(), 8);
        assert_eq!(wave[0], 0.0);
        assert!(wave.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(wave.contains(&1.0));
    }

    #[test]
    fn test_ramp_and_phasor() {
        assert_eq!(run(ramp, "0, 1, 4"), Value::seq([0.0, 0.25, 0.5, 0.75]));
        assert_eq!(run(ramp, "1, 0, 2"), Value::seq([1.0, 0.5]));
        assert_eq!(run(phasor, "2, 2"), Value::seq([0.0, 0.5, 0.0, 0.5]));
    }

    #[test]
    fn test_tri_and_square() {
        let wave = run(tri, "1, 4").leaves();
        assert_eq!(wave.len(), 4);
        assert_eq!(wave[0], 0.0);
        assert_eq!(run(square, "1, 4"), Value::seq([0.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_random_generators_are_bounded() {
        let n = run(noise, "16").leaves();
        assert_eq!(n.len(), 16);
        assert!(n.iter().all(|v| (0.0..1.0).contains(v)));
        assert!(run(turing, "16").leaves().iter().all(|v| *v == 0.0 || *v == 1.0));
        assert!(run(drunk, "32, 0.5").leaves().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_euclid_and_silence() {
        assert_eq!(run(euclid, "2, 4"), Value::seq([1.0, 0.0, 1.0, 0.0]));
        assert_eq!(run(silence, "3"), Value::seq([0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_missing_length_is_an_argument_error() {
        let err = noise(&Args::new(""), &mut EvalContext::seeded(0)).unwrap_err();
        assert!(matches!(err, FacetError::ArgumentParse { .. }));
    }

    #[test]
    fn test_get_reads_store() {
        let mut ctx = EvalContext::seeded(0);
        ctx.store.set("lead", Value::seq([1.0, 2.0]));
        assert_eq!(get(&Args::new("'lead'"), &mut ctx).unwrap(), Value::seq([1.0, 2.0]));
        assert!(get(&Args::new("'nope'"), &mut ctx).is_err());
    }
}
