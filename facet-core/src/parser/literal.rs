//! Bracketed literal datums
//!
//! `[1 0 [2 4]]`, `[1, 0, 1]` and `[sine(1,8)]` are all datums. Literals
//! are normalized to comma-delimited JSON and decoded; anything that is not
//! plain numbers falls back to the expression evaluator.

use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::parser::expression::evaluate;
use crate::parser::source::split_top_level;
use crate::types::Value;

/// Collapse repeated separators and turn space-delimited items into
/// comma-delimited ones: `[ 1  0 [2 4] ]` becomes `[1,0,[2,4]]`.
pub fn normalize_literal(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c != ' ' {
            out.push(*c);
            continue;
        }
        let prev = i.checked_sub(1).and_then(|j| chars.get(j)).copied();
        let next = chars.get(i + 1).copied();
        let touches_delimiter = matches!(prev, Some('[') | Some('(') | Some(','))
            || matches!(next, Some(']') | Some(')') | Some(','));
        if !touches_delimiter {
            out.push(',');
        }
    }
    while out.contains(",,") {
        out = out.replace(",,", ",");
    }
    out.replace("[,", "[").replace(",]", "]")
}

fn from_json(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
        serde_json::Value::Array(items) => items
            .iter()
            .map(from_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::Sequence),
        _ => None,
    }
}

/// Decode a bracketed datum into a pattern value
pub fn decode_literal(text: &str, ctx: &mut EvalContext) -> Result<Value> {
    ctx.enter_nesting(text)?;
    let value = decode_nested(text, ctx);
    ctx.leave_nesting();
    value
}

fn decode_nested(text: &str, ctx: &mut EvalContext) -> Result<Value> {
    let normalized = normalize_literal(text.trim());
    if !normalized.starts_with('[') || !normalized.ends_with(']') {
        return Err(FacetError::DatumParse(text.trim().to_string()));
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&normalized) {
        if let Some(value) = from_json(&json) {
            return Ok(value);
        }
    }

    let inner = &normalized[1..normalized.len() - 1];
    let parts = split_top_level(inner, ',');
    if parts.len() == 1 {
        // `[sine(1,8)]` is the generator's own sequence, not a nested group
        return match evaluate(parts[0], ctx)? {
            Value::Number(n) => Ok(Value::seq([n])),
            sequence => Ok(sequence),
        };
    }

    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        if part.trim().is_empty() {
            continue;
        }
        let item = if part.trim_start().starts_with('[') {
            decode_literal(part, ctx)?
        } else {
            evaluate(part, ctx)?
        };
        items.push(item);
    }
    Ok(Value::Sequence(items))
}
