//! Statement evaluation
//!
//! Runs a compiled statement's operation chain against a fresh pattern
//! object, flattens the result into its buffer, and folds a whole batch of
//! statements into a destination/property table.

use crate::algebra::{apply, get_registry};
use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::parser::expression::evaluate;
use crate::parser::source::{normalize_whitespace, split_statements};
use crate::parser::statement::{compile_statement, CompiledStatement, Operation};
use crate::types::{Buffer, DestinationTable, MultConnection, PatternObject, RunMode, Value};

/// A finished statement and the mult connections it asked for
#[derive(Debug, Clone, PartialEq)]
pub struct StatementOutcome {
    pub pattern: PatternObject,
    pub mults: Vec<MultConnection>,
}

/// Result of evaluating every statement in a submission
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub patterns: Vec<PatternObject>,
    pub table: DestinationTable,
    /// Failed statements with the error each raised
    pub errors: Vec<(String, FacetError)>,
}

/// Apply one operation to a pattern object in place
pub fn apply_operation(
    pattern: &mut PatternObject,
    operation: &Operation,
    ctx: &mut EvalContext,
) -> Result<()> {
    let op = get_registry().resolve(&operation.name);
    apply(op, &operation.args, pattern, ctx)
}

/// Apply one operation to a bare value. Controls have nowhere to record
/// their annotations and only affect the value they rescale.
pub fn apply_operation_to_value(
    value: Value,
    operation: &Operation,
    ctx: &mut EvalContext,
) -> Result<Value> {
    let mut scratch = PatternObject::new("", "", "");
    scratch.data = value;
    apply_operation(&mut scratch, operation, ctx)?;
    Ok(scratch.data)
}

/// Evaluate a bare expression such as `sine(1, 8).gain(2)`
pub fn evaluate_expression(text: &str, ctx: &mut EvalContext) -> Result<Value> {
    evaluate(&normalize_whitespace(text), ctx)
}

/// Run a compiled statement to completion
pub fn run_compiled(compiled: CompiledStatement, ctx: &mut EvalContext) -> Result<StatementOutcome> {
    if compiled.stop {
        return Ok(StatementOutcome {
            pattern: PatternObject::stop_sentinel(
                &compiled.destination,
                &compiled.property,
                &compiled.source,
            ),
            mults: Vec::new(),
        });
    }

    let mut pattern =
        PatternObject::new(&compiled.destination, &compiled.property, &compiled.source);
    pattern.hook_period = compiled.hook_period;
    pattern.data = compiled.datum;
    for operation in &compiled.operations {
        ctx.check_cancelled()?;
        apply_operation(&mut pattern, operation, ctx)?;
        ctx.pattern_len(pattern.data.len())?;
    }

    let data = std::mem::replace(&mut pattern.data, Value::empty());
    pattern.data = data.into_sequence();
    pattern.buffer = Buffer::from_value(&pattern.data, ctx.max_buffer_len);
    Ok(StatementOutcome {
        pattern,
        mults: compiled.mults,
    })
}

/// Compile and run one statement
pub fn evaluate_statement(text: &str, ctx: &mut EvalContext) -> Result<StatementOutcome> {
    let compiled = compile_statement(text, ctx)?;
    run_compiled(compiled, ctx)
}

/// Fold outcomes into a table in statement order. Stopped and skipped
/// patterns contribute nothing; each statement's mults are applied as soon as
/// its own buffer is in place.
pub fn build_table(outcomes: &[StatementOutcome]) -> DestinationTable {
    let mut table = DestinationTable::new();
    for outcome in outcomes {
        let pattern = &outcome.pattern;
        if pattern.stopped || pattern.skipped {
            continue;
        }
        table.insert(
            &pattern.destination,
            &pattern.property,
            pattern.buffer.serialize(),
        );
        for connection in &outcome.mults {
            if !table.apply(connection) {
                log::debug!(
                    "mult source {} {} has no buffer",
                    connection.from_destination,
                    connection.from_property
                );
            }
        }
    }
    table
}

/// Evaluate every statement in `code`. A failing statement is reported and
/// its siblings still run.
pub fn run_batch(code: &str, mode: RunMode, ctx: &mut EvalContext) -> BatchOutcome {
    let mut outcomes = Vec::new();
    let mut errors = Vec::new();
    for statement in split_statements(code) {
        let statement = mode.apply(&statement);
        match evaluate_statement(&statement, ctx) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                log::debug!("statement '{}' failed: {}", statement, e);
                errors.push((statement, e));
            }
        }
    }
    let table = build_table(&outcomes);
    BatchOutcome {
        patterns: outcomes.into_iter().map(|o| o.pattern).collect(),
        table,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_serializes() {
        let mut ctx = EvalContext::seeded(0);
        let outcome = evaluate_statement("kick vol [1 0 1 0]", &mut ctx).unwrap();
        assert_eq!(
            outcome.pattern.buffer.serialize(),
            "1.0000 0.0000 1.0000 0.0000"
        );
        assert_eq!(outcome.pattern.name(), "kick vol");
    }

    #[test]
    fn test_controls_annotate_pattern() {
        let mut ctx = EvalContext::seeded(0);
        let outcome =
            evaluate_statement("lead [60 62].note(90).play([0 0.5]).once()", &mut ctx).unwrap();
        let pattern = outcome.pattern;
        assert_eq!(pattern.sequence_data, vec![0.0, 0.5]);
        assert!(pattern.once);
        assert!(!pattern.regenerates());
        let Some(notes) = pattern.notes else {
            panic!("Expected note schedule");
        };
        assert_eq!(notes.velocity, vec![90.0, 90.0]);
    }

    #[test]
    fn test_stop_yields_sentinel() {
        let mut ctx = EvalContext::seeded(0);
        let outcome = evaluate_statement("kick [1 0].play()", &mut ctx).unwrap();
        assert!(!outcome.pattern.stopped);
        let code = RunMode::Stop.apply("kick [1 0].play()");
        let outcome = evaluate_statement(&code, &mut ctx).unwrap();
        assert!(outcome.pattern.stopped);
        assert!(outcome.pattern.buffer.is_empty());
    }

    #[test]
    fn test_unknown_operator_is_skipped() {
        let mut ctx = EvalContext::seeded(0);
        let outcome = evaluate_statement("a [1 2].frobnicate(3).gain(2)", &mut ctx).unwrap();
        assert_eq!(outcome.pattern.buffer.serialize(), "2.0000 4.0000");
    }

    #[test]
    fn test_batch_isolates_failures() {
        let mut ctx = EvalContext::seeded(0);
        let batch = run_batch("a x [1 2]; b y; c z [4].gain(2)", RunMode::Run, &mut ctx);
        assert_eq!(batch.patterns.len(), 2);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.table.get("c", "z"), Some("8.0000"));
    }

    #[test]
    fn test_set_is_visible_to_later_statements() {
        let mut ctx = EvalContext::seeded(0);
        let batch = run_batch("a [1 2].set('riff'); b get('riff').gain(2)", RunMode::Run, &mut ctx);
        assert!(batch.errors.is_empty());
        assert_eq!(batch.table.get("b", ""), Some("2.0000 4.0000"));
    }

    #[test]
    fn test_skipped_patterns_stay_out_of_table() {
        let mut ctx = EvalContext::seeded(0);
        let batch = run_batch("a [1].skip(1); b [2]", RunMode::Run, &mut ctx);
        assert!(batch.table.get("a", "").is_none());
        assert!(batch.patterns[0].regenerates());
    }

    #[test]
    fn test_cancelled_context_fails() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        let mut ctx = EvalContext::seeded(0).with_cancel(Arc::new(AtomicBool::new(true)));
        assert!(evaluate_statement("a [1].gain(2)", &mut ctx).is_err());
    }
}
