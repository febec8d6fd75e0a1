//! Two-operand transforms
//!
//! Sequences are reconciled to the same length before pairing; a number
//! pairs with every leaf of the other side.

use crate::algebra::resize::make_same_size;
use crate::algebra::{Args, Registry, Transform};
use crate::parser::context::EvalContext;
use crate::parser::error::Result;
use crate::types::Value;

/// Pair two values leaf by leaf. An empty sequence on either side leaves
/// `a` unchanged.
pub fn combine(a: Value, b: Value, f: fn(f64, f64) -> f64) -> Value {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Value::Number(f(x, y)),
        (Value::Number(x), seq @ Value::Sequence(_)) => seq.map_leaves(&mut |y| f(x, y)),
        (seq @ Value::Sequence(_), Value::Number(y)) => seq.map_leaves(&mut |x| f(x, y)),
        (Value::Sequence(xs), Value::Sequence(ys)) => {
            if xs.is_empty() || ys.is_empty() {
                return Value::Sequence(xs);
            }
            let (xs, ys) = make_same_size(xs, ys);
            Value::Sequence(
                xs.into_iter()
                    .zip(ys)
                    .map(|(x, y)| combine(x, y, f))
                    .collect(),
            )
        }
    }
}

fn truth(n: f64) -> f64 {
    if n != 0.0 {
        1.0
    } else {
        0.0
    }
}

fn with_operand(
    value: Value,
    args: &Args,
    ctx: &mut EvalContext,
    f: fn(f64, f64) -> f64,
) -> Result<Value> {
    let operand = args.pattern(0, ctx)?;
    Ok(combine(value, operand, f))
}

fn add(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| a + b)
}

fn subtract(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| a - b)
}

fn times(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| a * b)
}

fn divide(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| if b == 0.0 { 0.0 } else { a / b })
}

fn and(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| truth(a) * truth(b))
}

fn or(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| truth(truth(a) + truth(b)))
}

fn equals(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    with_operand(value, args, ctx, |a, b| if a == b { 1.0 } else { 0.0 })
}

fn interp(value: Value, args: &Args, ctx: &mut EvalContext) -> Result<Value> {
    let amount = args.number(0, 0.5, ctx)?.abs().clamp(0.0, 1.0);
    let ys = args.pattern(1, ctx)?.into_items();
    let xs = value.into_items();
    if xs.is_empty() || ys.is_empty() {
        return Ok(Value::Sequence(xs));
    }
    let (xs, ys) = make_same_size(xs, ys);
    let blended = xs
        .into_iter()
        .zip(ys)
        .map(|(x, y)| {
            let x = x.map_leaves(&mut |n| (1.0 - amount) * n);
            let y = y.map_leaves(&mut |n| amount * n);
            combine(x, y, |a, b| a + b)
        })
        .collect();
    Ok(Value::Sequence(blended))
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register(
        "add",
        "Math",
        "Adds a second pattern after reconciling sizes.",
        "add(pattern)",
        Transform::Sequence(add),
    );
    registry.register(
        "subtract",
        "Math",
        "Subtracts a second pattern after reconciling sizes.",
        "subtract(pattern)",
        Transform::Sequence(subtract),
    );
    registry.register(
        "times",
        "Math",
        "Multiplies by a second pattern after reconciling sizes.",
        "times(pattern)",
        Transform::Sequence(times),
    );
    registry.register(
        "am",
        "Math",
        "Amplitude-modulates by a second pattern.",
        "am(pattern)",
        Transform::Sequence(times),
    );
    registry.register(
        "divide",
        "Math",
        "Divides by a second pattern; division by zero yields 0.",
        "divide(pattern)",
        Transform::Sequence(divide),
    );
    registry.register(
        "and",
        "Logic",
        "1 where both patterns are nonzero, else 0.",
        "and(pattern)",
        Transform::Sequence(and),
    );
    registry.register(
        "or",
        "Logic",
        "1 where either pattern is nonzero, else 0.",
        "or(pattern)",
        Transform::Sequence(or),
    );
    registry.register(
        "equals",
        "Logic",
        "1 where both patterns hold the same value, else 0.",
        "equals(pattern)",
        Transform::Sequence(equals),
    );
    registry.register(
        "interp",
        "Math",
        "Linear interpolation toward a second pattern.",
        "interp(amount = 0.5, pattern)",
        Transform::Sequence(interp),
    );
}
