use facet_core::algebra::level::fold;
use facet_core::algebra::resize::{make_same_size, reduce};
use facet_core::parser::{compile_statement, evaluate_statement, run_batch, EvalContext};
use facet_core::types::{flatten, RunMode, Value};

#[test]
fn test_literal_datum() {
    let mut ctx = EvalContext::seeded(1);
    let compiled = compile_statement("kick vol [1 0 1 0]", &mut ctx).unwrap();
    assert_eq!(compiled.destination, "kick");
    assert_eq!(compiled.property, "vol");
    assert_eq!(compiled.datum, Value::seq([1.0, 0.0, 1.0, 0.0]));
    assert!(compiled.operations.is_empty());

    let outcome = evaluate_statement("kick vol [1 0 1 0]", &mut ctx).unwrap();
    assert_eq!(
        outcome.pattern.buffer.serialize(),
        "1.0000 0.0000 1.0000 0.0000"
    );
}

#[test]
fn test_chained_ops() {
    let mut ctx = EvalContext::seeded(1);
    let compiled = compile_statement("synth freq [0 1].scale(200,400)", &mut ctx).unwrap();
    assert_eq!(compiled.datum, Value::seq([0.0, 1.0]));
    assert_eq!(compiled.operations.len(), 1);
    assert_eq!(compiled.operations[0].name, "scale");
    assert_eq!(compiled.operations[0].args.raw(), "200,400");

    let outcome = evaluate_statement("synth freq [0 1].scale(200,400)", &mut ctx).unwrap();
    assert_eq!(outcome.pattern.buffer.serialize(), "200.0000 400.0000");
}

#[test]
fn test_mult_connection() {
    let mut ctx = EvalContext::seeded(1);
    let batch = run_batch("a x [1].mult(b y)", RunMode::Run, &mut ctx);
    assert!(batch.errors.is_empty());
    assert_eq!(batch.table.get("a", "x"), Some("1.0000"));
    assert_eq!(batch.table.get("b", "y"), Some("1.0000"));
}

#[test]
fn test_rerun_expansion() {
    let mut ctx = EvalContext::seeded(1);
    let outcome = evaluate_statement("x noise(4).rerun(2)", &mut ctx).unwrap();
    let samples = outcome.pattern.buffer.samples().to_vec();
    assert_eq!(samples.len(), 8);
    assert!(samples.iter().all(|s| (0.0..=1.0).contains(s)));
    assert_ne!(samples[..4], samples[4..]);
}

#[test]
fn test_nested_datum_flattens_by_depth() {
    let mut ctx = EvalContext::seeded(1);
    let outcome = evaluate_statement("hat [1 [0 1]]", &mut ctx).unwrap();
    assert_eq!(
        outcome.pattern.buffer.serialize(),
        "1.0000 1.0000 0.0000 1.0000"
    );
}

#[test]
fn test_oversized_buffers_are_clamped() {
    let mut ctx = EvalContext::seeded(1);
    let outcome = evaluate_statement("big noise(5000)", &mut ctx).unwrap();
    assert_eq!(outcome.pattern.buffer.len(), 1024);
    assert_eq!(outcome.pattern.data.len(), 5000);
}

#[test]
fn test_batch_errors_carry_statement() {
    let mut ctx = EvalContext::seeded(1);
    let batch = run_batch("good [1]; [2 3]; other [4]", RunMode::Run, &mut ctx);
    assert_eq!(batch.patterns.len(), 2);
    assert_eq!(batch.errors.len(), 1);
    assert_eq!(batch.errors[0].0, "[2 3]");
}

#[test]
fn test_reduce_determinism() {
    let seq: Vec<f64> = (0..37).map(f64::from).collect();
    for target in 0..=seq.len() {
        let first = reduce(&seq, target);
        assert_eq!(first.len(), target);
        assert_eq!(first, reduce(&seq, target));
    }
}

#[test]
fn test_size_reconciliation_closure() {
    for (la, lb) in [(1, 7), (3, 8), (8, 3), (5, 5), (16, 6), (2, 9)] {
        let a: Vec<f64> = (0..la).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..lb).map(|i| 100.0 + i as f64).collect();
        let (ra, rb) = make_same_size(a.clone(), b.clone());
        assert_eq!(ra.len(), rb.len());
        let (short, long) = (la.min(lb), la.max(lb));
        assert_eq!(ra.len(), short * (long / short));
        assert!(ra.iter().all(|v| a.contains(v)));
        assert!(rb.iter().all(|v| b.contains(v)));
    }
}

#[test]
fn test_recursion_contract_through_statements() {
    let mut ctx = EvalContext::seeded(1);
    let outcome = evaluate_statement("a [1 [2 3]].gain(2).offset(1)", &mut ctx).unwrap();
    assert_eq!(
        outcome.pattern.data,
        Value::Sequence(vec![Value::Number(3.0), Value::seq([5.0, 7.0])])
    );
}

#[test]
fn test_scale_keeps_lone_nested_child() {
    let mut ctx = EvalContext::seeded(1);
    let outcome = evaluate_statement("a [[0 1]].scale(0,10)", &mut ctx).unwrap();
    assert_eq!(
        outcome.pattern.data,
        Value::Sequence(vec![Value::seq([0.0, 10.0])])
    );

    let single = evaluate_statement("a [4].scale(0,10)", &mut ctx).unwrap();
    assert_eq!(single.pattern.data, Value::seq([5.0]));
}

#[test]
fn test_runaway_statements_fail_with_errors() {
    let mut ctx = EvalContext::seeded(1);
    let depth = 200_000;
    let nested = format!("a [1].gain({}1{})", "(".repeat(depth), ")".repeat(depth));
    assert!(evaluate_statement(&nested, &mut ctx).is_err());

    for statement in ["a sine(1e10, 1e10)", "a tri(1e10, 8)", "a noise(1e10)", "a [1].dup(1e12)"] {
        assert!(
            evaluate_statement(statement, &mut ctx).is_err(),
            "{} should fail",
            statement
        );
    }
}

#[test]
fn test_pong_idempotence() {
    for x in [-7.25, -1.0, 0.0, 0.3, 1.0, 1.75, 12.5] {
        let once = fold(x, 0.0, 1.0);
        assert!((0.0..=1.0).contains(&once));
        assert_eq!(fold(once, 0.0, 1.0), once);
    }
    assert_eq!(fold(0.4, 0.0, 1.0), 0.4);
}

#[test]
fn test_flatten_round_trip_on_flat_input() {
    let flat = Value::seq([0.5, -1.0, 3.0]);
    assert_eq!(flat.max_sub_steps(), 0);
    assert_eq!(flatten(&flat), vec![0.5, -1.0, 3.0]);
}
