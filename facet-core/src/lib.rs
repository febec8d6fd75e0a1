//! # Facet Core
//!
//! Device-free core of the Facet live-coding pattern language.
//! Provides the pattern value model, the operator algebra and the
//! statement compiler, without threads, audio or MIDI dependencies.
//!
//! ## Features
//!
//! - **serde**: Enable serialization of values, tables and pattern objects
//!
//! ## Example
//!
//! ```ignore
//! use facet_core::parser::{EvalContext, evaluate_statement};
//!
//! let mut ctx = EvalContext::seeded(7);
//! let outcome = evaluate_statement("synth freq [0 1].scale(200,400)", &mut ctx)?;
//! assert_eq!(outcome.pattern.buffer.serialize(), "200.0000 400.0000");
//! ```

pub mod algebra;
pub mod parser;
pub mod types;

pub use algebra::{get_registry, Operator, Registry};
pub use parser::{EvalContext, FacetError};
pub use types::{Buffer, DestinationTable, PatternObject, PatternStore, Value};
