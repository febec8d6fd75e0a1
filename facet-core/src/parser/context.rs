//! Evaluation context
//!
//! Everything one statement evaluation may read: environment bindings, a
//! snapshot of the stored pattern store, its own random generator and an
//! optional cancellation flag. A context is owned by exactly one evaluation.

use crate::parser::environment::{ContextVars, Environment};
use crate::parser::error::{FacetError, Result};
use crate::types::{PatternStore, Value, MAX_BUFFER_LEN, MAX_PATTERN_LEN};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Deepest bracket or parenthesis nesting an evaluation will descend into
pub const MAX_NESTING: usize = 64;

pub struct EvalContext {
    pub env: Environment,
    pub store: PatternStore,
    pub vars: ContextVars,
    pub max_buffer_len: usize,
    pub max_pattern_len: usize,
    rng: Xoshiro256PlusPlus,
    cancel: Option<Arc<AtomicBool>>,
    nesting: usize,
}

impl EvalContext {
    /// Context seeded from the thread-local generator
    pub fn new(vars: ContextVars, store: PatternStore) -> Self {
        let seed = rand::rng().random::<u64>();
        Self::with_seed(vars, store, seed)
    }

    pub fn with_seed(vars: ContextVars, store: PatternStore, seed: u64) -> Self {
        let stored: Vec<(String, Value)> = store
            .names()
            .into_iter()
            .filter_map(|name| store.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        Self {
            env: Environment::from_context(&vars, &stored),
            store,
            vars,
            max_buffer_len: MAX_BUFFER_LEN,
            max_pattern_len: MAX_PATTERN_LEN,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            cancel: None,
            nesting: 0,
        }
    }

    /// Default context with a fixed seed, for reproducible evaluation
    pub fn seeded(seed: u64) -> Self {
        Self::with_seed(ContextVars::default(), PatternStore::new(), seed)
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_max_buffer_len(mut self, max_buffer_len: usize) -> Self {
        self.max_buffer_len = max_buffer_len.max(1);
        self
    }

    pub fn with_max_pattern_len(mut self, max_pattern_len: usize) -> Self {
        self.max_pattern_len = max_pattern_len.max(1);
        self
    }

    /// Length of a pattern about to be built, refused past the working ceiling
    pub fn pattern_len(&self, len: usize) -> Result<usize> {
        if len > self.max_pattern_len {
            return Err(FacetError::evaluation(format!(
                "pattern of {} items exceeds the limit of {}",
                len, self.max_pattern_len
            )));
        }
        Ok(len)
    }

    /// Length of `repeats` back-to-back copies of a `len`-item pattern
    pub fn repeated_len(&self, repeats: usize, len: usize) -> Result<usize> {
        match repeats.checked_mul(len) {
            Some(total) => self.pattern_len(total),
            None => Err(FacetError::evaluation(format!(
                "{} repeats of {} items overflows the pattern limit",
                repeats, len
            ))),
        }
    }

    /// Descend one nesting level while parsing `fragment`. Every successful
    /// call must be paired with [`EvalContext::leave_nesting`].
    pub fn enter_nesting(&mut self, fragment: &str) -> Result<()> {
        if self.nesting >= MAX_NESTING {
            return Err(FacetError::argument(fragment.trim(), "nesting too deep"));
        }
        self.nesting += 1;
        Ok(())
    }

    pub fn leave_nesting(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    /// Fails once the owning task has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                Err(FacetError::evaluation("evaluation cancelled"))
            }
            _ => Ok(()),
        }
    }

    /// Uniform sample in `0..1`
    pub fn random(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform sample in `min..max`; an empty range yields `min`
    pub fn random_range(&mut self, min: f64, max: f64) -> f64 {
        if min < max {
            self.rng.random_range(min..max)
        } else {
            min
        }
    }

    /// Uniform index in `0..len`
    pub fn random_index(&mut self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.rng.random_range(0..len)
        }
    }

    /// Seed for a child generator, so nested work stays reproducible
    pub fn fork_seed(&mut self) -> u64 {
        self.rng.random::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_contexts_repeat() {
        let mut a = EvalContext::seeded(3);
        let mut b = EvalContext::seeded(3);
        for _ in 0..8 {
            assert_eq!(a.random(), b.random());
        }
    }

    #[test]
    fn test_random_range_bounds() {
        let mut ctx = EvalContext::seeded(1);
        for _ in 0..100 {
            let n = ctx.random_range(-2.0, 3.0);
            assert!((-2.0..3.0).contains(&n));
        }
        assert_eq!(ctx.random_range(5.0, 5.0), 5.0);
        assert_eq!(ctx.random_index(0), 0);
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = EvalContext::seeded(1).with_cancel(flag.clone());
        assert!(ctx.check_cancelled().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check_cancelled(), Err(FacetError::Evaluation(_))));
    }

    #[test]
    fn test_pattern_length_ceiling() {
        let ctx = EvalContext::seeded(1).with_max_pattern_len(100);
        assert_eq!(ctx.pattern_len(100).unwrap(), 100);
        assert!(matches!(ctx.pattern_len(101), Err(FacetError::Evaluation(_))));
        assert_eq!(ctx.repeated_len(4, 25).unwrap(), 100);
        assert!(ctx.repeated_len(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let mut ctx = EvalContext::seeded(1);
        for _ in 0..MAX_NESTING {
            ctx.enter_nesting("(").unwrap();
        }
        assert!(matches!(
            ctx.enter_nesting("("),
            Err(FacetError::ArgumentParse { .. })
        ));
        ctx.leave_nesting();
        assert!(ctx.enter_nesting("(").is_ok());
    }

    #[test]
    fn test_store_is_visible_as_variables() {
        let mut store = PatternStore::new();
        store.set("lead", Value::seq([1.0, 2.0]));
        let ctx = EvalContext::with_seed(ContextVars::default(), store, 0);
        assert_eq!(ctx.env.get("lead"), Some(&Value::seq([1.0, 2.0])));
    }
}
