// facet-core/src/parser/mod.rs
pub mod context;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod lexer;
pub mod literal;
pub mod source;
pub mod statement;

pub use context::EvalContext;
pub use environment::{ContextVars, Environment};
pub use error::{FacetError, Result};
pub use evaluator::{
    apply_operation, build_table, evaluate_expression, evaluate_statement, run_batch,
    run_compiled, BatchOutcome, StatementOutcome,
};
pub use expression::evaluate;
pub use lexer::{Lexer, Token};
pub use source::split_statements;
pub use statement::{
    compile_statement, expand_reruns, statement_key, CompiledStatement, Operation,
};
