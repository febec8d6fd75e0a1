//! Level rules
//!
//! These transforms need to see a whole sequence level at once (its range,
//! its neighbours, its order). Nested children have already been transformed
//! by the time a rule runs, so a rule only rewrites the numbers at its own
//! level and moves child sequences around as opaque items.

use crate::algebra::{level_bounds, round4, LevelRule, Registry, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::types::Value;

fn param(params: &[f64], index: usize) -> f64 {
    params.get(index).copied().unwrap_or(0.0)
}

fn map_numbers<F: FnMut(f64) -> f64>(items: Vec<Value>, mut f: F) -> Vec<Value> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Number(n) => Value::Number(f(n)),
            sequence => sequence,
        })
        .collect()
}

pub(crate) fn scale(items: Vec<Value>, params: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let (new_min, new_max) = (param(params, 0), param(params, 1));
    if let [Value::Number(_)] = items.as_slice() {
        return Ok(vec![Value::Number((new_min + new_max) / 2.0)]);
    }
    let Some((min, max)) = level_bounds(&items) else {
        return Ok(items);
    };
    let range = max - min;
    Ok(map_numbers(items, |n| {
        if range == 0.0 {
            new_min
        } else {
            round4((n - min) * (new_max - new_min) / range + new_min)
        }
    }))
}

fn quantize(items: Vec<Value>, params: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let resolution = (param(params, 0).trunc() as i64).max(1) as usize;
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(key, item)| match item {
            Value::Number(_) if key % resolution != 0 => Value::Number(0.0),
            other => other,
        })
        .collect())
}

/// Swap distance for one walked element: the whole part of `sample * amt`,
/// but always at least one step
fn walk_distance(sample: f64, amt: f64) -> i64 {
    ((sample * amt).trunc() as i64).max(1)
}

fn walk(items: Vec<Value>, params: &[f64], ctx: &mut EvalContext) -> Result<Vec<Value>> {
    let prob = param(params, 0).clamp(0.0, 1.0);
    let amt = param(params, 1);
    let len = items.len();
    if len < 2 {
        return Ok(items);
    }
    let x_max = (len - 1) as i64;
    let mut walked = items.clone();
    for (key, item) in items.iter().enumerate() {
        if !item.is_number() {
            walked[key] = item.clone();
            continue;
        }
        if ctx.random() >= prob {
            walked[key] = item.clone();
            continue;
        }
        let mut distance = walk_distance(ctx.random(), amt);
        if ctx.random() < 0.5 {
            distance = -distance;
        }
        let location = key as i64 + distance;
        let location = if location < 0 {
            x_max - (-location) % x_max
        } else {
            location % x_max
        } as usize;
        // two-way swap against the original level
        walked[key] = items[location].clone();
        walked[location] = item.clone();
    }
    Ok(walked)
}

fn sticky(items: Vec<Value>, params: &[f64], ctx: &mut EvalContext) -> Result<Vec<Value>> {
    let amt = param(params, 0).clamp(0.0, 1.0);
    let mut stuck: Option<usize> = None;
    let mut out = Vec::with_capacity(items.len());
    for (key, item) in items.iter().enumerate() {
        if !item.is_number() {
            out.push(item.clone());
            continue;
        }
        if ctx.random() > amt {
            stuck = Some(key);
            out.push(item.clone());
            continue;
        }
        let held = stuck
            .map(|k| &items[k])
            .filter(|v| !matches!(v, Value::Number(n) if *n == 0.0));
        out.push(held.unwrap_or(item).clone());
    }
    Ok(out)
}

pub(crate) fn reverse(mut items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    items.reverse();
    Ok(items)
}

pub(crate) fn invert(items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let Some((min, max)) = level_bounds(&items) else {
        return Ok(items);
    };
    Ok(map_numbers(items, |n| min + (max - n)))
}

fn sort(mut items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    items.sort_by(|a, b| {
        let a = a.first_number().unwrap_or(0.0);
        let b = b.first_number().unwrap_or(0.0);
        a.total_cmp(&b)
    });
    Ok(items)
}

fn shuffle(mut items: Vec<Value>, _: &[f64], ctx: &mut EvalContext) -> Result<Vec<Value>> {
    for i in (1..items.len()).rev() {
        let j = ctx.random_index(i + 1);
        items.swap(i, j);
    }
    Ok(items)
}

pub(crate) fn normalize(items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let Some((min, max)) = level_bounds(&items) else {
        return Ok(items);
    };
    let range = max - min;
    Ok(map_numbers(items, |n| if range == 0.0 { 0.0 } else { (n - min) / range }))
}

fn changed(items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let Some(last) = items.last().cloned() else {
        return Ok(items);
    };
    let mut previous = last;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.is_number() {
            out.push(Value::Number(if item == previous { 0.0 } else { 1.0 }));
        } else {
            out.push(item.clone());
        }
        previous = item;
    }
    Ok(out)
}

fn smooth(items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let len = items.len();
    if len < 2 {
        return Ok(items);
    }
    let mut out: Vec<Value> = Vec::with_capacity(len);
    for (k, item) in items.iter().enumerate() {
        if !item.is_number() || k == 0 {
            out.push(item.clone());
            continue;
        }
        let before = out[k - 1].first_number().unwrap_or(0.0);
        let after = if k + 1 < len { &items[k + 1] } else { &items[0] };
        let after = after.first_number().unwrap_or(0.0);
        out.push(Value::Number((before + after) / 2.0));
    }
    Ok(out)
}

// leading zeros have nothing to hold and are dropped
fn nonzero(items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let mut previous: Option<f64> = None;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Number(n) if n == 0.0 => {
                if let Some(p) = previous {
                    out.push(Value::Number(p));
                }
            }
            Value::Number(n) => {
                previous = Some(n);
                out.push(Value::Number(n));
            }
            sequence => out.push(sequence),
        }
    }
    Ok(out)
}

fn distavg(items: Vec<Value>, _: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let numbers = Value::level_numbers(&items);
    if numbers.is_empty() {
        return Ok(items);
    }
    let average = numbers.iter().sum::<f64>() / numbers.len() as f64;
    Ok(map_numbers(items, |n| round4(n - average)))
}

fn saheach(items: Vec<Value>, params: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let every = param(params, 0).abs().round() as usize;
    let mut held: Option<Value> = None;
    let mut out = Vec::with_capacity(items.len());
    for (key, item) in items.into_iter().enumerate() {
        if !item.is_number() {
            out.push(item);
            continue;
        }
        let sample = key == 0 || (every > 0 && key % every == 0);
        match (&held, sample) {
            (Some(value), false) => out.push(value.clone()),
            _ => {
                held = Some(item.clone());
                out.push(item);
            }
        }
    }
    Ok(out)
}

fn echo(items: Vec<Value>, params: &[f64], ctx: &mut EvalContext) -> Result<Vec<Value>> {
    let repeats = param(params, 0).abs().round() as usize;
    let feedback = param(params, 1);
    let mut out = Vec::with_capacity(ctx.repeated_len(repeats, items.len())?);
    let mut amplitude = 1.0;
    for _ in 0..repeats {
        let level = amplitude;
        out.extend(map_numbers(items.clone(), |n| n * level));
        amplitude *= feedback;
    }
    Ok(out)
}

fn pong(items: Vec<Value>, params: &[f64], _: &mut EvalContext) -> Result<Vec<Value>> {
    let (a, b) = (param(params, 0), param(params, 1));
    let (min, max) = if a <= b { (a, b) } else { (b, a) };
    if min == max {
        return Err(FacetError::evaluation(format!(
            "cannot run pong with equal min and max: {}",
            min
        )));
    }
    if !min.is_finite() || !max.is_finite() {
        return Err(FacetError::evaluation("pong bounds must be finite"));
    }
    Ok(map_numbers(items, |n| fold(n, min, max)))
}

/// Bring an out-of-range value back into `[min, max]`. Values past `max`
/// re-enter from `min` and values below `min` re-enter from `max`, one range
/// width per bounce; the bounce count is computed up front so huge inputs
/// still finish.
pub fn fold(n: f64, min: f64, max: f64) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let range = max - min;
    let mut value = if n > max {
        n - ((n - max) / range).ceil() * range
    } else if n < min {
        n + ((min - n) / range).ceil() * range
    } else {
        n
    };
    // rounding can leave the result a hair outside
    if value > max {
        value -= range;
    }
    if value < min {
        value += range;
    }
    value
}

fn recurse(items: Vec<Value>, params: &[f64], ctx: &mut EvalContext) -> Result<Vec<Value>> {
    let prob = param(params, 0).clamp(0.0, 1.0);
    let len = items.len();
    let mut out = Vec::with_capacity(len);
    for item in &items {
        if item.is_number() && ctx.random() < prob {
            let a = ctx.random_index(len);
            let b = ctx.random_index(len);
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            out.push(Value::Sequence(items[start..=end].to_vec()));
        } else {
            out.push(item.clone());
        }
    }
    Ok(out)
}

pub(crate) fn register(registry: &mut Registry) {
    let ops: [(&str, &str, &str, &str, &'static [f64], LevelRule); 19] = [
        ("scale", "Math", "Linear remap of the observed range to [min, max].", "scale(min, max)", &[0.0, 1.0], scale),
        ("quantize", "Rhythm", "Zeroes every element whose index is not a multiple of the resolution.", "quantize(resolution)", &[1.0], quantize),
        ("walk", "Chance", "Randomly swaps elements with neighbours up to the amount away.", "walk(prob, amount)", &[0.0, 0.0], walk),
        ("sticky", "Chance", "Holds the previous value with the given probability.", "sticky(amount)", &[0.0], sticky),
        ("reverse", "Order", "Reverses the order of elements.", "reverse()", &[], reverse),
        ("invert", "Math", "Flips values within the observed range.", "invert()", &[], invert),
        ("sort", "Order", "Sorts elements in ascending order.", "sort()", &[], sort),
        ("shuffle", "Chance", "Randomizes element order.", "shuffle()", &[], shuffle),
        ("normalize", "Math", "Rescales values to 0..1.", "normalize()", &[], normalize),
        ("changed", "Logic", "1 where an element differs from the previous one, else 0.", "changed()", &[], changed),
        ("smooth", "Math", "Averages each element with its neighbours.", "smooth()", &[], smooth),
        ("nonzero", "Rhythm", "Replaces zeros with the previous nonzero value.", "nonzero()", &[], nonzero),
        ("distavg", "Math", "Distance of each element from the average.", "distavg()", &[], distavg),
        ("saheach", "Rhythm", "Samples and holds every n-th element.", "saheach(n)", &[1.0], saheach),
        ("echo", "Rhythm", "Repeats the pattern with decaying amplitude.", "echo(num, feedback = 0.666)", &[1.0, 0.666], echo),
        ("pong", "Math", "Folds values back into [min, max].", "pong(min, max)", &[0.0, 1.0], pong),
        ("recurse", "Chance", "Replaces elements with random sub-selections of the pattern.", "recurse(prob)", &[0.0], recurse),
        ("flip", "Order", "Reverses the order of elements.", "flip()", &[], reverse),
        ("sah", "Rhythm", "Samples and holds every n-th element.", "sah(n)", &[1.0], saheach),
    ];
    for (name, category, description, signature, defaults, rule) in ops {
        registry.register(
            name,
            category,
            description,
            signature,
            Transform::Level { defaults, rule },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::Number).collect()
    }

    #[test]
    fn test_scale_single_element_midpoint() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(
            scale(nums(&[7.0]), &[200.0, 400.0], &mut ctx).unwrap(),
            nums(&[300.0])
        );
        assert_eq!(
            scale(nums(&[0.0, 0.5, 1.0]), &[10.0, 20.0], &mut ctx).unwrap(),
            nums(&[10.0, 15.0, 20.0])
        );
    }

    #[test]
    fn test_quantize() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(
            quantize(nums(&[1.0, 2.0, 3.0, 4.0, 5.0]), &[2.0], &mut ctx).unwrap(),
            nums(&[1.0, 0.0, 3.0, 0.0, 5.0])
        );
    }

    #[test]
    fn test_walk_preserves_values() {
        let mut ctx = EvalContext::seeded(12);
        let input = nums(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let walked = walk(input.clone(), &[1.0, 2.0], &mut ctx).unwrap();
        assert_eq!(walked.len(), input.len());
        assert!(walked.iter().all(|v| input.contains(v)));
    }

    #[test]
    fn test_walk_distance_truncates() {
        assert_eq!(walk_distance(0.6, 3.0), 1);
        assert_eq!(walk_distance(0.9, 3.0), 2);
        assert_eq!(walk_distance(0.99, 1.9), 1);
        assert_eq!(walk_distance(0.1, 0.5), 1);
    }

    #[test]
    fn test_changed_wraps_to_last() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(
            changed(nums(&[1.0, 1.0, 2.0, 1.0]), &[], &mut ctx).unwrap(),
            nums(&[0.0, 0.0, 1.0, 1.0])
        );
    }

    #[test]
    fn test_smooth() {
        let mut ctx = EvalContext::seeded(0);
        // out[1] = (1 + 3) / 2, out[2] = (2 + 1) / 2 wraps to the first element
        assert_eq!(
            smooth(nums(&[1.0, 0.0, 3.0]), &[], &mut ctx).unwrap(),
            nums(&[1.0, 2.0, 1.5])
        );
    }

    #[test]
    fn test_nonzero_holds_previous() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(
            nonzero(nums(&[0.0, 1.0, 0.0, 0.0, 2.0, 0.0]), &[], &mut ctx).unwrap(),
            nums(&[1.0, 1.0, 1.0, 2.0, 2.0])
        );
    }

    #[test]
    fn test_saheach() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(
            saheach(nums(&[1.0, 2.0, 3.0, 4.0, 5.0]), &[2.0], &mut ctx).unwrap(),
            nums(&[1.0, 1.0, 3.0, 3.0, 5.0])
        );
    }

    #[test]
    fn test_echo_decays_per_repeat() {
        let mut ctx = EvalContext::seeded(0);
        assert_eq!(
            echo(nums(&[1.0, 0.5]), &[3.0, 0.5], &mut ctx).unwrap(),
            nums(&[1.0, 0.5, 0.5, 0.25, 0.25, 0.125])
        );
    }

    #[test]
    fn test_pong_folds_and_rejects_equal_bounds() {
        assert_eq!(fold(1.25, 0.0, 1.0), 0.25);
        assert_eq!(fold(2.0, 0.0, 1.0), 1.0);
        assert_eq!(fold(-1.0, 0.0, 1.0), 0.0);
        assert_eq!(fold(-0.5, 0.0, 1.0), 0.5);
        assert_eq!(fold(3.5, 0.0, 1.0), 0.5);
        assert_eq!(fold(0.3, 0.0, 1.0), 0.3);
        let mut ctx = EvalContext::seeded(0);
        assert!(matches!(
            pong(nums(&[1.0]), &[1.0, 1.0], &mut ctx),
            Err(FacetError::Evaluation(_))
        ));
    }

    #[test]
    fn test_recurse_inserts_subselections() {
        let mut ctx = EvalContext::seeded(5);
        let out = recurse(nums(&[1.0, 2.0, 3.0]), &[1.0], &mut ctx).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| matches!(v, Value::Sequence(items) if !items.is_empty())));
    }
}
