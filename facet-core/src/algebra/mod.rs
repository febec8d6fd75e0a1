//! Pattern algebra
//!
//! The operator registry maps names to tagged transform implementations.
//! Every operator has one of a handful of shapes, and the shape decides how
//! nested sequences are traversed:
//!
//! - [`Transform::Elementwise`]: a numeric rule applied to every leaf.
//! - [`Transform::Level`]: a rule over one sequence level. Nested children
//!   are transformed first with the same arguments, then the rule sees the
//!   whole level.
//! - [`Transform::Sequence`]: operates once on the top-level sequence.
//! - [`Transform::Generator`]: produces a fresh value, ignoring its input.
//! - [`Transform::Control`]: annotates the pattern object (playback
//!   positions, MIDI schedules, lifecycle flags) without touching the value.
//!
//! Unknown names resolve to a no-op operator so a typo never stops a
//! performance.

pub mod args;
pub mod binary;
pub mod control;
pub mod elementwise;
pub mod generators;
pub mod level;
pub mod resize;
pub mod sequence;
pub mod spectral;


pub use args::Args;

use crate::parser::context::EvalContext;
use crate::parser::error::{FacetError, Result};
use crate::types::{PatternObject, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

pub type ElementRule = fn(f64, &[f64], &mut EvalContext) -> f64;
pub type LevelRule = fn(Vec<Value>, &[f64], &mut EvalContext) -> Result<Vec<Value>>;
pub type SequenceRule = fn(Value, &Args, &mut EvalContext) -> Result<Value>;
pub type GeneratorRule = fn(&Args, &mut EvalContext) -> Result<Value>;
pub type ControlRule = fn(&mut PatternObject, &Args, &mut EvalContext) -> Result<()>;

#[derive(Clone, Copy)]
pub enum Transform {
    Elementwise {
        defaults: &'static [f64],
        rule: ElementRule,
    },
    Level {
        defaults: &'static [f64],
        rule: LevelRule,
    },
    Sequence(SequenceRule),
    Generator(GeneratorRule),
    Control(ControlRule),
    NoOp,
}

impl Transform {
    pub fn kind(&self) -> &'static str {
        match self {
            Transform::Elementwise { .. } => "elementwise",
            Transform::Level { .. } => "level",
            Transform::Sequence(_) => "sequence",
            Transform::Generator(_) => "generator",
            Transform::Control(_) => "control",
            Transform::NoOp => "no-op",
        }
    }
}

pub struct Operator {
    pub name: String,
    pub category: String, // e.g. "Math", "Rhythm", "Generator", "MIDI"
    pub description: String,
    pub signature: String,
    pub transform: Transform,
}

pub struct DocItem {
    pub name: String,
    pub category: String,
    pub description: String,
    pub signature: String,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

static NO_OP: Operator = Operator {
    name: String::new(),
    category: String::new(),
    description: String::new(),
    signature: String::new(),
    transform: Transform::NoOp,
};

pub struct Registry {
    operators: HashMap<String, Operator>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Registry {
            operators: HashMap::new(),
        };
        elementwise::register(&mut registry);
        level::register(&mut registry);
        sequence::register(&mut registry);
        spectral::register(&mut registry);
        binary::register(&mut registry);
        generators::register(&mut registry);
        control::register(&mut registry);
        registry
    }

    pub(crate) fn register(
        &mut self,
        name: &str,
        category: &str,
        description: &str,
        signature: &str,
        transform: Transform,
    ) {
        self.operators.insert(
            name.to_string(),
            Operator {
                name: name.to_string(),
                category: category.to_string(),
                description: description.to_string(),
                signature: signature.to_string(),
                transform,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Look up an operator, falling back to the no-op for unknown names
    pub fn resolve(&self, name: &str) -> &Operator {
        match self.operators.get(name) {
            Some(op) => op,
            None => {
                log::debug!("unknown operator '{}' skipped", name);
                &NO_OP
            }
        }
    }

    /// Strict lookup for tooling that must know the name exists
    pub fn require(&self, name: &str) -> Result<&Operator> {
        self.operators
            .get(name)
            .ok_or_else(|| FacetError::UnknownOperator(name.to_string()))
    }

    pub fn documentation(&self) -> Vec<DocItem> {
        let mut docs: Vec<DocItem> = self
            .operators
            .values()
            .map(|op| DocItem {
                name: op.name.clone(),
                category: op.category.clone(),
                description: op.description.clone(),
                signature: op.signature.clone(),
            })
            .collect();

        docs.sort_by(|a, b| a.name.cmp(&b.name));
        docs
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

/// Run one operator against a pattern object
pub fn apply(
    op: &Operator,
    args: &Args,
    pattern: &mut PatternObject,
    ctx: &mut EvalContext,
) -> Result<()> {
    match op.transform {
        Transform::Elementwise { defaults, rule } => {
            let params = args.numbers(defaults, ctx)?;
            let data = std::mem::replace(&mut pattern.data, Value::empty());
            pattern.data = data.map_leaves(&mut |n| rule(n, &params, ctx));
        }
        Transform::Level { defaults, rule } => {
            let params = args.numbers(defaults, ctx)?;
            let data = std::mem::replace(&mut pattern.data, Value::empty());
            pattern.data = apply_level(data, rule, &params, ctx)?;
        }
        Transform::Sequence(rule) => {
            let data = std::mem::replace(&mut pattern.data, Value::empty());
            pattern.data = rule(data.into_sequence(), args, ctx)?;
        }
        Transform::Generator(generate) => {
            pattern.data = generate(args, ctx)?;
        }
        Transform::Control(control) => control(pattern, args, ctx)?,
        Transform::NoOp => {}
    }
    Ok(())
}

/// Children first, then the level itself
pub fn apply_level(
    value: Value,
    rule: LevelRule,
    params: &[f64],
    ctx: &mut EvalContext,
) -> Result<Value> {
    let items = value.into_items();
    let mut transformed = Vec::with_capacity(items.len());
    for item in items {
        transformed.push(match item {
            Value::Sequence(_) => apply_level(item, rule, params, ctx)?,
            number => number,
        });
    }
    Ok(Value::Sequence(rule(transformed, params, ctx)?))
}

/// Round to four decimals, the precision used by perturbing operators
pub(crate) fn round4(n: f64) -> f64 {
    (n * 10_000.0).round() / 10_000.0
}

/// Minimum and maximum over the numbers at one level
pub(crate) fn level_bounds(items: &[Value]) -> Option<(f64, f64)> {
    let numbers = Value::level_numbers(items);
    let min = numbers.iter().copied().reduce(f64::min)?;
    let max = numbers.iter().copied().reduce(f64::max)?;
    Some((min, max))
}
