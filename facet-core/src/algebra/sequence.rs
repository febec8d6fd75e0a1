//! Whole-sequence transforms
//!
//! Resizing, reordering and reshaping that operate on the top-level items.
//! Where a transform filters or reorders items, nested children travel as
//! single items and are transformed with the same arguments.

use crate::algebra::level::{fold, invert, reverse};
use crate::algebra::resize::{make_same_size, reduce, resample_nearest};
use crate::algebra::{apply_level, round4, Args, Registry, SequenceRule, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::types::{flatten, Value};

fn append(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let mut items = value.into_items();
    items.extend(args.pattern(0, ctx)?.into_items());
    Ok(Value::Sequence(items))
}

fn prepend(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let mut items = args.pattern(0, ctx)?.into_items();
    items.extend(value.into_items());
    Ok(Value::Sequence(items))
}

fn nest(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let mut items = value.into_items();
    items.push(args.pattern(0, ctx)?);
    Ok(Value::Sequence(items))
}

fn dup(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let copies = args.number(0, 1.0, ctx)?.abs().round() as usize;
    let items = value.into_items();
    let mut out = Vec::with_capacity(ctx.repeated_len(copies, items.len())?);
    for _ in 0..copies {
        out.extend(items.iter().cloned());
    }
    Ok(Value::Sequence(out))
}

fn palindrome(value: Value, _: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let reversed = apply_level(value.clone(), reverse, &[], ctx)?;
    let mut items = value.into_items();
    items.extend(reversed.into_items());
    Ok(Value::Sequence(items))
}

fn truncate(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let length = args.number(0, 0.0, ctx)?;
    if length <= 0.0 {
        return Ok(Value::empty());
    }
    let mut items = value.into_items();
    items.truncate(length as usize);
    Ok(Value::Sequence(items))
}

fn reduce_to(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let target = args.number(0, 0.0, ctx)?.abs().round() as usize;
    Ok(Value::Sequence(reduce(&value.into_items(), target)))
}

/// Nearest-neighbour resample to exactly `len` items, growing or shrinking
fn size(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let target_arg = args.number(0, 0.0, ctx)?.abs().round() as usize;
    let target = ctx.pattern_len(target_arg)?;
    Ok(Value::Sequence(resample_nearest(&value.into_items(), target)))
}

fn subset_items(items: Vec<Value>, percentage: f64, ctx: &mut EvalContext) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Sequence(children) => {
                out.push(Value::Sequence(subset_items(children, percentage, ctx)))
            }
            number => {
                if ctx.random() < percentage {
                    out.push(number);
                }
            }
        }
    }
    out
}

fn subset(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let percentage = args.number(0, 1.0, ctx)?.clamp(0.0, 1.0);
    Ok(Value::Sequence(subset_items(value.into_items(), percentage, ctx)))
}

fn range_items(items: Vec<Value>, new_min: f64, new_max: f64) -> Vec<Value> {
    let len = items.len() as f64;
    let min = (new_min * len).trunc() as i64;
    let max = (new_max * len).trunc() as i64;
    items
        .into_iter()
        .enumerate()
        .filter(|(key, _)| (min..max).contains(&(*key as i64)))
        .map(|(_, item)| match item {
            Value::Sequence(children) => Value::Sequence(range_items(children, new_min, new_max)),
            number => number,
        })
        .collect()
}

fn range(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let new_min = args.number(0, 0.0, ctx)?;
    let new_max = args.number(1, 1.0, ctx)?;
    Ok(Value::Sequence(range_items(value.into_items(), new_min, new_max)))
}

fn shift_items(items: Vec<Value>, amount: f64) -> Vec<Value> {
    let len = items.len();
    if len == 0 {
        return items;
    }
    // negative amounts move left, so keys grow
    let direction = -(amount * len as f64);
    (0..len)
        .map(|key| {
            let source = ((key as f64 + direction).round() as i64).rem_euclid(len as i64) as usize;
            match &items[source] {
                Value::Sequence(children) => Value::Sequence(shift_items(children.clone(), amount)),
                number => number.clone(),
            }
        })
        .collect()
}

/// Rotate by a fraction of the length, wrapped into -1..1
pub fn shift_value(value: Value, amount: f64) -> Value {
    let amount = if amount.is_finite() {
        fold(amount, -1.0, 1.0)
    } else {
        0.0
    };
    Value::Sequence(shift_items(value.into_items(), amount))
}

fn shift(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let amount = args.number(0, 0.0, ctx)?;
    Ok(shift_value(value, amount))
}

fn unique(value: Value, _: &Args, _: &mut EvalContext) -> Result<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in value.into_items() {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::Sequence(out))
}

fn fracture(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let max_chunk = args.number(0, 0.0, ctx)?.abs().round();
    if max_chunk == 0.0 {
        return Err(FacetError::evaluation(
            "fracture requires a nonzero maximum chunk size",
        ));
    }
    let items = value.into_items();
    let mut chunks: Vec<Vec<Value>> = Vec::new();
    let mut i = 0;
    while i < items.len() {
        let low = (ctx.random() * max_chunk).ceil() * 0.5;
        let high = (ctx.random() * max_chunk).ceil();
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let chunk = (ctx.random_range(low, high).round() as usize).max(1);
        let end = (i + chunk).min(items.len());
        chunks.push(items[i..end].to_vec());
        i = end;
    }
    for k in (1..chunks.len()).rev() {
        let j = ctx.random_index(k + 1);
        chunks.swap(k, j);
    }
    Ok(Value::Sequence(chunks.into_iter().flatten().collect()))
}

fn ramp_between(from: f64, to: f64, depth: usize, speed: f64, out: &mut Vec<Value>) {
    let ramp_len = (speed * depth as f64).round() as usize;
    for i in 0..depth {
        let sample = if i < ramp_len {
            let t = i as f64 / ramp_len as f64;
            from * (1.0 - t) + to * t
        } else {
            to
        };
        out.push(Value::Number(sample));
    }
}

/// Ramp between consecutive elements (the last ramps back to the first),
/// then reduce to the original length.
fn slew(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let depth = args.number(0, 25.0, ctx)?.abs().round() as usize;
    let up = args.number(1, 1.0, ctx)?.abs().clamp(0.0, 1.0);
    let down = args.number(2, 1.0, ctx)?.abs().clamp(0.0, 1.0);
    let items = value.into_items();
    let len = items.len();
    if len == 0 || depth == 0 {
        return Ok(Value::Sequence(items));
    }
    let mut slewed = Vec::with_capacity(ctx.repeated_len(depth, len)?);
    for (k, item) in items.iter().enumerate() {
        let Value::Number(current) = item else {
            slewed.push(item.clone());
            continue;
        };
        let next = items[(k + 1) % len].first_number().unwrap_or(*current);
        let speed = if next >= *current { up } else { down };
        ramp_between(*current, next, depth, speed, &mut slewed);
    }
    Ok(Value::Sequence(reduce(&slewed, len)))
}

/// Additive layering: every control ratio adds a copy of the buffer read
/// at that speed, scaled by `amp^n` for the n-th ratio.
fn harmonics(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let ratios = args.pattern(0, ctx)?.leaves();
    let amp = args.number(1, 0.5, ctx)?;
    let base = flatten(&value);
    let len = base.len();
    if len == 0 {
        return Ok(Value::empty());
    }
    let mut out = base.clone();
    for (n, ratio) in ratios.iter().enumerate() {
        let gain = amp.powi(n as i32);
        for (i, sample) in out.iter_mut().enumerate() {
            let position = (i as f64 * ratio.abs()).floor() as usize % len;
            *sample += base[position] * gain;
        }
    }
    Ok(Value::seq(out))
}

/// Index lookup through a logarithmic curve over the sequence length
fn warp_value(value: Value, base: f64, rotation: f64) -> Value {
    let items = value.into_items();
    let len = items.len();
    if len == 0 {
        return Value::empty();
    }
    let base = base.abs();
    let mut curve = vec![0.0; len];
    for i in 0..len {
        let index = if rotation > 0.0 { i } else { len - 1 - i };
        let x = i as f64 / len as f64;
        curve[index] = if base == 0.0 {
            x
        } else {
            (1.0 + base * x).ln() / (1.0 + base).ln()
        };
    }
    Value::Sequence(
        curve
            .into_iter()
            .map(|c| {
                let lookup = ((c * len as f64).round() as usize).min(len - 1);
                match &items[lookup] {
                    Value::Sequence(_) => warp_value(items[lookup].clone(), base, rotation),
                    number => number.clone(),
                }
            })
            .collect(),
    )
}

fn warp(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let base = args.number(0, 1.0, ctx)?;
    let rotation = args.number(1, 1.0, ctx)?;
    Ok(warp_value(value, base, rotation))
}

fn pow(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let warped = warp(value, args, ctx)?;
    let inverted = apply_level(warped, invert, &[], ctx)?;
    apply_level(inverted, reverse, &[], ctx)
}

// alternates the two reconciled sequences item by item
fn interlace(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let other = args.pattern(0, ctx)?.into_items();
    let items = value.into_items();
    if items.is_empty() || other.is_empty() {
        return Ok(Value::Sequence(items));
    }
    let (a, b) = make_same_size(items, other);
    let mut out = Vec::with_capacity(a.len() * 2);
    for (x, y) in a.into_iter().zip(b) {
        out.push(x);
        out.push(y);
    }
    Ok(Value::Sequence(out))
}

fn map(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let targets = args.pattern(0, ctx)?.leaves();
    if targets.is_empty() {
        return Ok(value);
    }
    Ok(value.map_leaves(&mut |n| {
        targets
            .iter()
            .copied()
            .reduce(|a, b| if (b - n).abs() < (a - n).abs() { b } else { a })
            .unwrap_or(n)
    }))
}

fn at(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let position = args.number(0, 0.0, ctx)?.abs().clamp(0.0, 1.0);
    let replacement = args.value(1, ctx)?.unwrap_or(Value::Number(0.0));
    let mut items = value.into_items();
    if items.is_empty() {
        return Ok(Value::empty());
    }
    let index = (position * (items.len() - 1) as f64).round() as usize;
    items[index] = replacement;
    Ok(Value::Sequence(items))
}

fn replace(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let original = args.number(0, 0.0, ctx)?;
    let new_value = args.number(1, 0.0, ctx)?;
    Ok(value.map_leaves(&mut |n| if n == original { new_value } else { n }))
}

fn audio(value: Value, _: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let normalized = apply_level(value, crate::algebra::level::normalize, &[], ctx)?;
    Ok(normalized.map_leaves(&mut |n| round4(n * 2.0 - 1.0)))
}

pub(crate) fn register(registry: &mut Registry) {
    let ops: [(&str, &str, &str, &str, SequenceRule); 24] = [
        ("append", "Structure", "Concatenates a second pattern.", "append(pattern)", append),
        ("prepend", "Structure", "Puts a second pattern in front.", "prepend(pattern)", prepend),
        ("nest", "Structure", "Adds a second pattern as one nested sub-step group.", "nest(pattern)", nest),
        ("dup", "Structure", "Repeats the pattern n times.", "dup(n)", dup),
        ("palindrome", "Structure", "Appends the reversed pattern.", "palindrome()", palindrome),
        ("truncate", "Structure", "Keeps the first n elements.", "truncate(n)", truncate),
        ("reduce", "Structure", "Downsamples to n elements.", "reduce(n)", reduce_to),
        ("size", "Structure", "Resamples to exactly n elements.", "size(n)", size),
        ("subset", "Chance", "Keeps each element with the given probability.", "subset(percentage)", subset),
        ("range", "Structure", "Keeps the slice between two relative positions.", "range(min, max)", range),
        ("shift", "Order", "Rotates by a fraction of the length.", "shift(amount)", shift),
        ("unique", "Structure", "Drops repeated values.", "unique()", unique),
        ("fracture", "Chance", "Shuffles random-sized chunks.", "fracture(max_chunk)", fracture),
        ("slew", "Math", "Ramps between consecutive values.", "slew(depth = 25, up = 1, down = 1)", slew),
        ("harmonics", "Math", "Sums the pattern with copies read at the control ratios.", "harmonics(ratios, amp = 0.5)", harmonics),
        ("warp", "Order", "Logarithmic index lookup.", "warp(base, rotation = 1)", warp),
        ("log", "Order", "Logarithmic index lookup.", "log(base, rotation = 1)", warp),
        ("pow", "Order", "Power-law index lookup.", "pow(base, rotation = 1)", pow),
        ("interlace", "Structure", "Alternates elements with a second pattern.", "interlace(pattern)", interlace),
        ("map", "Pitch", "Snaps every value to the nearest of the given values.", "map(values)", map),
        ("at", "Structure", "Replaces the element at a relative position.", "at(position, value)", at),
        ("replace", "Math", "Replaces one value with another.", "replace(original, new)", replace),
        ("audio", "Math", "Rescales the pattern to -1..1.", "audio()", audio),
        ("flat", "Structure", "Flattens nested sub-steps into one level.", "flat()", flat),
    ];
    for (name, category, description, signature, rule) in ops {
        registry.register(name, category, description, signature, Transform::Sequence(rule));
    }
}

fn flat(value: Value, _: &Args, _: &mut EvalContext) -> Result<Value> {
    Ok(Value::seq(flatten(&value)))
}
