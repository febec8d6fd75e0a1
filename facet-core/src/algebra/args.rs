//! Operator arguments
//!
//! Operators receive their argument text as written (after the compiler has
//! resolved nested calls). Each comma-separated part is evaluated lazily, so
//! an operator decides whether it wants a number, a pattern or a name.

use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::parser::expression::evaluate;
use crate::parser::literal::decode_literal;
use crate::parser::source::{matching_close, split_top_level, unquote};
use crate::types::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    raw: String,
    parts: Vec<String>,
}

impl Args {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let parts = if trimmed.is_empty() {
            Vec::new()
        } else {
            split_top_level(trimmed, ',')
                .into_iter()
                .map(|p| p.trim().to_string())
                .collect()
        };
        Self {
            raw: trimmed.to_string(),
            parts,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts
            .get(index)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }

    /// Evaluate one part; `None` when it is absent
    pub fn value(&self, index: usize, ctx: &mut EvalContext) -> Result<Option<Value>> {
        let Some(part) = self.part(index) else {
            return Ok(None);
        };
        let plain_literal =
            part.starts_with('[') && matching_close(part, 0) == Some(part.len() - 1);
        let value = if plain_literal {
            decode_literal(part, ctx)?
        } else {
            evaluate(part, ctx)?
        };
        Ok(Some(value))
    }

    /// Numeric part, falling back to `default` when absent
    pub fn number(&self, index: usize, default: f64, ctx: &mut EvalContext) -> Result<f64> {
        Ok(self
            .value(index, ctx)?
            .and_then(|v| v.first_number())
            .unwrap_or(default))
    }

    /// All numeric parts, padded with `defaults`
    pub fn numbers(&self, defaults: &[f64], ctx: &mut EvalContext) -> Result<Vec<f64>> {
        let count = defaults.len().max(self.parts.len());
        (0..count)
            .map(|i| self.number(i, defaults.get(i).copied().unwrap_or(0.0), ctx))
            .collect()
    }

    /// Pattern part; a bare number becomes a one-element sequence
    pub fn pattern(&self, index: usize, ctx: &mut EvalContext) -> Result<Value> {
        match self.value(index, ctx)? {
            Some(value) => Ok(value.into_sequence()),
            None => Err(FacetError::argument(
                self.raw.clone(),
                format!("missing pattern argument {}", index + 1),
            )),
        }
    }

    /// Textual part with quotes removed
    pub fn string(&self, index: usize) -> Option<String> {
        self.part(index).map(|p| unquote(p).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parts() {
        let args = Args::new(" 200, 400 ");
        assert_eq!(args.len(), 2);
        assert_eq!(args.part(1), Some("400"));
        assert!(Args::new("").is_empty());
    }

    #[test]
    fn test_numbers_with_defaults() {
        let mut ctx = EvalContext::seeded(0);
        let args = Args::new("0.5");
        assert_eq!(args.numbers(&[1.0, 2.0], &mut ctx).unwrap(), vec![0.5, 2.0]);
        assert_eq!(Args::new("bpm / 2").number(0, 0.0, &mut ctx).unwrap(), 45.0);
    }

    #[test]
    fn test_pattern_parts() {
        let mut ctx = EvalContext::seeded(0);
        let args = Args::new("[1 2 3], 4");
        assert_eq!(args.pattern(0, &mut ctx).unwrap(), Value::seq([1.0, 2.0, 3.0]));
        assert_eq!(args.pattern(1, &mut ctx).unwrap(), Value::seq([4.0]));
        assert!(args.pattern(2, &mut ctx).is_err());
    }

    #[test]
    fn test_string_parts() {
        let args = Args::new("'b y'");
        assert_eq!(args.string(0), Some("b y".to_string()));
        assert_eq!(Args::new("b y").string(0), Some("b y".to_string()));
    }
}
