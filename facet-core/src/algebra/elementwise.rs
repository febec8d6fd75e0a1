//! Leaf rules
//!
//! Each rule sees one number plus the operator's numeric arguments, so the
//! registry can apply it at any depth without flattening.

use crate::algebra::{round4, Registry, Transform};
use crate::parser::context::EvalContext;

pub fn mtof(note: f64) -> f64 {
    2f64.powf((note.abs() - 69.0) / 12.0) * 440.0
}

pub fn ftom(freq: f64) -> f64 {
    if freq <= 0.0 {
        return 0.0;
    }
    69.0 + 12.0 * (freq / 440.0).log2()
}

fn param(params: &[f64], index: usize) -> f64 {
    params.get(index).copied().unwrap_or(0.0)
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn abs(n: f64, _: &[f64], _: &mut EvalContext) -> f64 {
    n.abs()
}

fn round(n: f64, _: &[f64], _: &mut EvalContext) -> f64 {
    n.round()
}

fn gain(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    n * param(params, 0)
}

fn offset(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    n + param(params, 0)
}

fn clip(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    let (min, max) = (param(params, 0), param(params, 1));
    if n < min {
        min
    } else if n > max {
        max
    } else {
        n
    }
}

fn gt(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    flag(n > param(params, 0))
}

fn gte(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    flag(n >= param(params, 0))
}

fn lt(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    flag(n < param(params, 0))
}

fn lte(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    flag(n <= param(params, 0))
}

fn modulo(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    let amt = param(params, 0);
    if amt == 0.0 {
        return 0.0;
    }
    n % amt
}

fn saturate(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    round4((n * param(params, 0)).tanh())
}

fn flip_above(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    let max = param(params, 0);
    if n > max {
        max - (n - max).abs()
    } else {
        n
    }
}

fn flip_below(n: f64, params: &[f64], _: &mut EvalContext) -> f64 {
    let min = param(params, 0);
    if n < min {
        min + (min - n).abs()
    } else {
        n
    }
}

// zero steps are rests and never get jammed
fn jam(n: f64, params: &[f64], ctx: &mut EvalContext) -> f64 {
    let (prob, amt) = (param(params, 0), param(params, 1));
    if n == 0.0 || ctx.random() >= prob {
        return n;
    }
    let mut distance = ctx.random() * amt;
    if ctx.random() < 0.5 {
        distance = -distance;
    }
    round4(n + distance)
}

fn prob(n: f64, params: &[f64], ctx: &mut EvalContext) -> f64 {
    let amt = param(params, 0).clamp(0.0, 1.0);
    if ctx.random() < amt {
        n
    } else {
        0.0
    }
}

fn to_frequency(n: f64, _: &[f64], _: &mut EvalContext) -> f64 {
    mtof(n)
}

fn to_note(n: f64, _: &[f64], _: &mut EvalContext) -> f64 {
    ftom(n)
}

pub(crate) fn register(registry: &mut Registry) {
    let ops: [(&str, &str, &str, &'static [f64], crate::algebra::ElementRule); 20] = [
        ("abs", "Math", "abs()", &[], abs),
        ("round", "Math", "round()", &[], round),
        ("gain", "Math", "gain(amount)", &[1.0], gain),
        ("offset", "Math", "offset(amount)", &[0.0], offset),
        ("clip", "Math", "clip(min, max)", &[0.0, 1.0], clip),
        ("gt", "Logic", "gt(amount)", &[0.0], gt),
        ("gte", "Logic", "gte(amount)", &[0.0], gte),
        ("lt", "Logic", "lt(amount)", &[0.0], lt),
        ("lte", "Logic", "lte(amount)", &[0.0], lte),
        ("modulo", "Math", "modulo(amount)", &[1.0], modulo),
        ("saturate", "Math", "saturate(gain = 1)", &[1.0], saturate),
        ("flipabove", "Math", "flipabove(max)", &[1.0], flip_above),
        ("flipAbove", "Math", "flipAbove(max)", &[1.0], flip_above),
        ("flipbelow", "Math", "flipbelow(min)", &[0.0], flip_below),
        ("flipBelow", "Math", "flipBelow(min)", &[0.0], flip_below),
        ("jam", "Chance", "jam(prob, amount)", &[0.0, 0.0], jam),
        ("prob", "Chance", "prob(amount)", &[1.0], prob),
        ("mtof", "Pitch", "mtof()", &[], to_frequency),
        ("ftom", "Pitch", "ftom()", &[], to_note),
        ("tanh", "Math", "tanh(gain = 1)", &[1.0], saturate),
    ];
    for (name, category, signature, defaults, rule) in ops {
        registry.register(
            name,
            category,
            description(name),
            signature,
            Transform::Elementwise { defaults, rule },
        );
    }
}

fn description(name: &str) -> &'static str {
    match name {
        "abs" => "Absolute value of every element.",
        "round" => "Rounds every element to the nearest integer.",
        "gain" => "Multiplies every element.",
        "offset" => "Adds a constant to every element.",
        "clip" => "Limits every element to [min, max].",
        "gt" => "1 where the element is greater than the amount, else 0.",
        "gte" => "1 where the element is at least the amount, else 0.",
        "lt" => "1 where the element is less than the amount, else 0.",
        "lte" => "1 where the element is at most the amount, else 0.",
        "modulo" => "Remainder after division by the amount.",
        "saturate" | "tanh" => "Soft clipping through tanh(x * gain).",
        "flipabove" | "flipAbove" => "Reflects values above the maximum back below it.",
        "flipbelow" | "flipBelow" => "Reflects values below the minimum back above it.",
        "jam" => "Randomly nudges nonzero elements by up to the amount.",
        "prob" => "Keeps each element with the given probability, else 0.",
        "mtof" => "MIDI note number to frequency.",
        "ftom" => "Frequency to MIDI note number.",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_conversions() {
        assert_eq!(mtof(69.0), 440.0);
        assert!((mtof(81.0) - 880.0).abs() < 1e-9);
        assert!((ftom(440.0) - 69.0).abs() < 1e-9);
        assert_eq!(ftom(0.0), 0.0);
    }

    #[test]
    fn test_flips() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(flip_above(1.5, &[1.0], &mut ctx), 0.5);
        assert_eq!(flip_below(-0.25, &[0.0], &mut ctx), 0.25);
        assert_eq!(flip_above(0.5, &[1.0], &mut ctx), 0.5);
    }

    #[test]
    fn test_jam_leaves_zeros() {
        let mut ctx = EvalContext::seeded(4);
        for _ in 0..50 {
            assert_eq!(jam(0.0, &[1.0, 10.0], &mut ctx), 0.0);
        }
        let jammed = jam(1.0, &[1.0, 0.5], &mut ctx);
        assert!((0.5..=1.5).contains(&jammed));
    }

    #[test]
    fn test_modulo_by_zero() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(modulo(5.0, &[0.0], &mut ctx), 0.0);
        assert_eq!(modulo(5.0, &[3.0], &mut ctx), 2.0);
    }
}
