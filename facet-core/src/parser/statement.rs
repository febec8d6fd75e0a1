//! Statement compiler
//!
//! Turns one statement such as
//!
//! ```text
//! every(2) synth freq sine(1, 8).scale(200, 400).rerun(2).play()
//! ```
//!
//! into a destination, a property, an initial datum and an ordered operation
//! chain. Arguments are classified and nested calls resolved here, so the
//! evaluator only ever sees plain argument text.

use crate::algebra::Args;
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::parser::expression::evaluate;
use crate::parser::literal::{decode_literal, normalize_literal};
use crate::parser::source::{
    chain_dots, has_chain, is_balanced, matching_close, normalize_whitespace, split_top_level,
    unquote,
};
use crate::types::{pattern_name, MultConnection, Value};

/// One link of an operation chain
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub args: Args,
}

impl Operation {
    pub fn new(name: &str, raw: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Args::new(raw),
        }
    }
}

/// A statement ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub source: String,
    pub destination: String,
    pub property: String,
    /// Set by an `every(N)` prefix
    pub hook_period: Option<u32>,
    pub datum: Value,
    pub operations: Vec<Operation>,
    pub mults: Vec<MultConnection>,
    /// `.stop()` anywhere in the top-level chain; nothing else was evaluated
    pub stop: bool,
}

/// Classify and resolve the argument text of `name(raw)`
pub fn parse_operation(name: &str, raw: &str, ctx: &mut EvalContext) -> Result<Operation> {
    if !is_balanced(raw) {
        return Err(FacetError::argument(raw.trim(), "unbalanced brackets"));
    }
    if name == "sometimes" {
        return parse_sometimes(raw);
    }
    let trimmed = raw.trim();
    if !trimmed.contains('(') {
        return Ok(Operation::new(name, trimmed));
    }

    let mut resolved = Vec::new();
    for piece in split_top_level(trimmed, ',') {
        resolved.push(resolve_argument(piece.trim(), ctx)?);
    }
    Ok(Operation::new(name, &resolved.join(",")))
}

fn resolve_argument(piece: &str, ctx: &mut EvalContext) -> Result<String> {
    if !piece.contains('(') {
        return Ok(piece.to_string());
    }
    let value = evaluate(piece, ctx)?;
    if has_chain(piece) {
        return Ok(value.into_sequence().to_string());
    }
    Ok(match value {
        Value::Number(n) => format!("{:.4}", n),
        sequence => sequence.to_string(),
    })
}

// `sometimes(0.5, 'reverse().gain(2)')`: the chain is kept as text and
// parsed only when the coin lands
fn parse_sometimes(raw: &str) -> Result<Operation> {
    let pieces = split_top_level(raw.trim(), ',');
    let [prob, chain] = pieces.as_slice() else {
        return Err(FacetError::argument(
            raw.trim(),
            "sometimes() takes a probability and an operation chain",
        ));
    };
    let chain = unquote(chain);
    let chain = chain.strip_prefix('.').unwrap_or(chain);
    Ok(Operation::new(
        "sometimes",
        &format!("{},{}", prob.trim(), chain),
    ))
}

/// Split `name(args)` or a bare `name`
fn split_fragment(fragment: &str) -> Result<(&str, &str)> {
    let fragment = fragment.trim();
    let Some(open) = fragment.find('(') else {
        return Ok((fragment, ""));
    };
    let close = matching_close(fragment, open)
        .ok_or_else(|| FacetError::argument(fragment, "unbalanced parentheses"))?;
    if close != fragment.len() - 1 {
        return Err(FacetError::parse(format!(
            "unexpected text after '{}'",
            &fragment[..=close]
        )));
    }
    let name = fragment[..open].trim();
    if name.is_empty() || !is_identifier(name) {
        return Err(FacetError::parse(format!("invalid operator name in '{}'", fragment)));
    }
    Ok((name, &fragment[open + 1..close]))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Fragments of a chain: the text between top-level method dots
fn chain_fragments(chain: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut start = 0;
    for dot in chain_dots(chain) {
        fragments.push(&chain[start..dot]);
        start = dot + 1;
    }
    fragments.push(&chain[start..]);
    fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect()
}

/// Parse `op(args).op(args)...`, with or without a leading dot
pub fn parse_chain(chain: &str, ctx: &mut EvalContext) -> Result<Vec<Operation>> {
    let chain = chain.trim();
    let chain = chain.strip_prefix('.').unwrap_or(chain);
    if chain.is_empty() {
        return Ok(Vec::new());
    }
    // chain_dots only splits after `)` or `]`, so anchor the first fragment
    let anchored = format!("[].{}", chain);
    let mut operations = Vec::new();
    for fragment in chain_fragments(&anchored).into_iter().skip(1) {
        let (name, raw) = split_fragment(fragment)?;
        operations.push(parse_operation(name, raw, ctx)?);
    }
    Ok(operations)
}

/// Byte offset where the datum starts: the first word that opens a bracket
/// or calls a function
fn datum_start(text: &str) -> Option<usize> {
    let mut word_start = true;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            word_start = true;
            continue;
        }
        if word_start {
            if c == '[' {
                return Some(i);
            }
            let rest = &text[i..];
            let ident_len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if ident_len > 0 && rest[ident_len..].starts_with('(') {
                return Some(i);
            }
        }
        word_start = false;
    }
    None
}

/// End of the datum starting at `start` (inclusive byte index)
fn datum_end(text: &str, start: usize) -> Result<usize> {
    let open = if text[start..].starts_with('[') {
        start
    } else {
        text[start..]
            .find('(')
            .map(|i| start + i)
            .ok_or_else(|| FacetError::DatumParse(text[start..].to_string()))?
    };
    matching_close(text, open).ok_or_else(|| FacetError::DatumParse(text[start..].to_string()))
}

fn decode_datum(datum: &str, ctx: &mut EvalContext) -> Result<Value> {
    if datum.starts_with('[') {
        decode_literal(datum, ctx)
    } else {
        Ok(evaluate(datum, ctx)?.into_sequence())
    }
}

/// Split `body` into datum text and chain text
fn split_body(body: &str) -> Result<(String, String)> {
    let body = body.trim();
    let end = datum_end(body, 0)?;
    let datum = if body.starts_with('[') {
        normalize_literal(&body[..=end])
    } else {
        body[..=end].to_string()
    };
    Ok((datum, body[end + 1..].trim().to_string()))
}

/// Replace every `.rerun(N)` with N independently evaluated copies of the
/// text before it. `N < 1` drops the segment.
pub fn expand_reruns(body: &str, ctx: &mut EvalContext) -> Result<String> {
    let mut body = body.trim().to_string();
    loop {
        let Some((dot, open, close)) = find_rerun(&body) else {
            return Ok(body);
        };
        let prefix = body[..dot].to_string();
        let rest = body[close + 1..].to_string();
        let count = evaluate(&body[open + 1..close], ctx)?
            .first_number()
            .unwrap_or(0.0)
            .round()
            .abs();

        if count < 1.0 {
            body = format!("{}{}", prefix, rest);
            continue;
        }

        let runs = ctx.pattern_len(count as usize)?;
        let mut expanded = String::from("[]");
        for _ in 0..runs {
            ctx.check_cancelled()?;
            let value = evaluate(&prefix, ctx)?.into_sequence();
            expanded.push_str(&format!(".append(data({}))", value));
        }
        log::trace!("expanded rerun of '{}' {} times", prefix, count);
        expanded.push_str(&rest);
        body = expanded;
    }
}

/// Leftmost top-level `.rerun(...)`: offsets of its dot and parentheses
fn find_rerun(body: &str) -> Option<(usize, usize, usize)> {
    chain_dots(body).into_iter().find_map(|dot| {
        let tail = &body[dot + 1..];
        if !tail.starts_with("rerun") {
            return None;
        }
        let after = tail["rerun".len()..].trim_start();
        if !after.starts_with('(') {
            return None;
        }
        let open = body.len() - after.len();
        matching_close(body, open).map(|close| (dot, open, close))
    })
}

/// Strip an `every(N)` prefix, returning the hook period and the remainder
fn hook_prefix(text: &str, ctx: &mut EvalContext) -> Result<(Option<u32>, String)> {
    let Some(after) = text.strip_prefix("every") else {
        return Ok((None, text.to_string()));
    };
    let after = after.trim_start();
    if !after.starts_with('(') {
        return Ok((None, text.to_string()));
    }
    let offset = text.len() - after.len();
    let close = matching_close(text, offset)
        .ok_or_else(|| FacetError::parse("unbalanced every() prefix"))?;
    let n = evaluate(&text[offset + 1..close], ctx)?
        .first_number()
        .unwrap_or(1.0)
        .round()
        .abs();
    let period = if n < 1.0 { 1 } else { n as u32 };
    Ok((Some(period), text[close + 1..].trim().to_string()))
}

/// Pattern key of a statement without evaluating anything: the destination
/// and property, skipping an `every(N)` prefix. `None` if there is no datum.
pub fn statement_key(text: &str) -> Option<String> {
    let source = normalize_whitespace(text);
    let mut rest = source.as_str();
    if let Some(after) = rest.strip_prefix("every") {
        let after = after.trim_start();
        if after.starts_with('(') {
            let offset = source.len() - after.len();
            let close = matching_close(&source, offset)?;
            rest = source[close + 1..].trim_start();
        }
    }
    let destination = rest.split_whitespace().next()?;
    if destination.starts_with('[') || destination.contains('(') {
        return None;
    }
    let after_destination = rest[destination.len()..].trim_start();
    let start = datum_start(after_destination)?;
    let property = normalize_whitespace(&after_destination[..start]);
    Some(pattern_name(destination, &property))
}

/// Compile a whole statement
pub fn compile_statement(text: &str, ctx: &mut EvalContext) -> Result<CompiledStatement> {
    let source = normalize_whitespace(text);
    if !is_balanced(&source) {
        return Err(FacetError::parse(format!("unbalanced brackets in '{}'", source)));
    }
    let (hook_period, rest) = hook_prefix(&source, ctx)?;

    let destination = rest.split_whitespace().next().unwrap_or("").to_string();
    if destination.is_empty() || destination.starts_with('[') || destination.contains('(') {
        return Err(FacetError::parse(format!(
            "no destination before the datum in '{}'",
            source
        )));
    }
    let after_destination = rest[destination.len()..].trim_start();
    let start = datum_start(after_destination)
        .ok_or_else(|| FacetError::DatumParse(source.clone()))?;
    let property = normalize_whitespace(&after_destination[..start]);
    let body = &after_destination[start..];

    let (datum_text, chain_text) = split_body(body)?;
    let stop = chain_fragments(&format!("[]{}", chain_text))
        .into_iter()
        .skip(1)
        .filter_map(|f| split_fragment(f).ok())
        .any(|(name, _)| name == "stop");
    if stop {
        return Ok(CompiledStatement {
            source,
            destination,
            property,
            hook_period,
            datum: Value::empty(),
            operations: Vec::new(),
            mults: Vec::new(),
            stop: true,
        });
    }

    let expanded = expand_reruns(&format!("{}{}", datum_text, chain_text), ctx)?;
    let (datum_text, chain_text) = split_body(&expanded)?;
    let datum = decode_datum(&datum_text, ctx)?;
    let operations = parse_chain(&chain_text, ctx)?;
    let mults = operations
        .iter()
        .filter(|op| op.name == "mult")
        .filter_map(|op| MultConnection::parse(&destination, &property, op.args.raw()))
        .collect();

    Ok(CompiledStatement {
        source,
        destination,
        property,
        hook_period,
        datum,
        operations,
        mults,
        stop: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> CompiledStatement {
        compile_statement(text, &mut EvalContext::seeded(5)).unwrap()
    }

    #[test]
    fn test_statement_key() {
        assert_eq!(statement_key("kick vol [1 0]").as_deref(), Some("kick vol"));
        assert_eq!(
            statement_key("every(2) lead noise(4).rerun(2)").as_deref(),
            Some("lead")
        );
        assert_eq!(statement_key("[1 2]"), None);
        assert_eq!(statement_key("lonely"), None);
    }

    #[test]
    fn test_literal_statement() {
        let compiled = compile("kick vol [1 0 1 0]");
        assert_eq!(compiled.destination, "kick");
        assert_eq!(compiled.property, "vol");
        assert_eq!(compiled.datum, Value::seq([1.0, 0.0, 1.0, 0.0]));
        assert!(compiled.operations.is_empty());
        assert!(!compiled.stop);
    }

    #[test]
    fn test_chain_and_call_datum() {
        let compiled = compile("synth freq [0 1].scale(200,400)");
        assert_eq!(compiled.operations, vec![Operation::new("scale", "200,400")]);

        let compiled = compile("lead ramp(0, 1, 4).reverse().gain(2)");
        assert_eq!(compiled.property, "");
        assert_eq!(compiled.datum, Value::seq([0.0, 0.25, 0.5, 0.75]));
        let names: Vec<&str> = compiled.operations.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["reverse", "gain"]);
    }

    #[test]
    fn test_multi_word_property() {
        let compiled = compile("osc filter cutoff  [1]");
        assert_eq!(compiled.property, "filter cutoff");
    }

    #[test]
    fn test_missing_destination_or_datum() {
        let mut ctx = EvalContext::seeded(0);
        assert!(matches!(
            compile_statement("[1 2 3]", &mut ctx),
            Err(FacetError::Parse(_))
        ));
        assert!(matches!(
            compile_statement("kick vol", &mut ctx),
            Err(FacetError::DatumParse(_))
        ));
    }

    #[test]
    fn test_hook_prefix() {
        let compiled = compile("every(4) kick [1]");
        assert_eq!(compiled.hook_period, Some(4));
        assert_eq!(compiled.destination, "kick");
        assert_eq!(compile("every(0) kick [1]").hook_period, Some(1));
    }

    #[test]
    fn test_stop_short_circuits() {
        let compiled = compile("kick vol noise(4).gain(frobnicate()).stop()");
        assert!(compiled.stop);
        assert!(compiled.operations.is_empty());
    }

    #[test]
    fn test_argument_classification() {
        let mut ctx = EvalContext::seeded(0);
        let op = parse_operation("gain", "ri(3, 3)", &mut ctx).unwrap();
        assert_eq!(op.args.raw(), "3.0000");
        let op = parse_operation("append", "ramp(0,1,2).reverse()", &mut ctx).unwrap();
        assert_eq!(op.args.raw(), "[0.5,0]");
        let op = parse_operation("mult", "b y", &mut ctx).unwrap();
        assert_eq!(op.args.raw(), "b y");
        let op = parse_operation("sometimes", "0.5, '.reverse().gain(2)'", &mut ctx).unwrap();
        assert_eq!(op.args.raw(), "0.5,reverse().gain(2)");
        assert!(matches!(
            parse_operation("gain", "sine(1", &mut ctx),
            Err(FacetError::ArgumentParse { .. })
        ));
    }

    #[test]
    fn test_rerun_expansion() {
        let mut ctx = EvalContext::seeded(2);
        let expanded = expand_reruns("noise(4).rerun(2).gain(2)", &mut ctx).unwrap();
        assert!(expanded.starts_with("[].append(data(["));
        assert_eq!(expanded.matches(".append(").count(), 2);
        assert!(expanded.ends_with(".gain(2)"));

        let dropped = expand_reruns("[1 2].rerun(0).gain(2)", &mut ctx).unwrap();
        assert_eq!(dropped, "[1 2].gain(2)");

        let nested = expand_reruns("[1].rerun(2).rerun(2)", &mut ctx).unwrap();
        assert_eq!(nested, "[].append(data([1,1])).append(data([1,1]))");
    }

    #[test]
    fn test_mult_connections() {
        let compiled = compile("a x [1].mult(b y)");
        assert_eq!(compiled.mults.len(), 1);
        assert_eq!(compiled.mults[0].to_destination, "b");
        assert_eq!(compiled.mults[0].to_property, "y");
    }

    #[test]
    fn test_chain_parsing() {
        let mut ctx = EvalContext::seeded(0);
        let ops = parse_chain(".reverse().gain(2)", &mut ctx).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(parse_chain("", &mut ctx).unwrap().is_empty());
        assert!(parse_chain("gain(2)x", &mut ctx).is_err());
    }
}
