//! Execution sandbox
//!
//! Each statement runs on its own thread with its own evaluation context:
//! a copy of the context variables, a snapshot of the stored patterns and a
//! generator seeded by the caller. Results come back over a channel, so a
//! statement that fails or never finishes cannot take its siblings down.
//! Cancellation is cooperative: the task's flag is raised, the evaluator
//! bails at its next check, and whatever it still sends is discarded.

use crate::cpu::CpuMeter;
use crossbeam_channel::Sender;
use facet_core::parser::{evaluate_statement, statement_key, ContextVars, StatementOutcome};
use facet_core::{EvalContext, FacetError, PatternStore};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type TaskId = u64;

/// Why a statement is being evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    /// Typed or loaded by the user
    Submitted,
    /// Regenerated at a loop boundary
    Rerun,
    /// Fired by an `every(N)` hook
    Hook,
}

/// Everything a task needs, owned outright
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub statement: String,
    pub origin: TaskOrigin,
    pub vars: ContextVars,
    pub store: PatternStore,
    pub seed: u64,
}

/// A finished task as sent back by its thread
#[derive(Debug)]
pub struct TaskReport {
    pub id: TaskId,
    pub statement: String,
    pub origin: TaskOrigin,
    pub result: Result<StatementOutcome, FacetError>,
    pub elapsed: Duration,
}

/// Size ceilings applied to every task's evaluation context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_buffer_len: usize,
    pub max_pattern_len: usize,
}

/// A task dropped for running past the timeout
#[derive(Debug)]
pub struct ExpiredTask {
    pub id: TaskId,
    pub statement: String,
    pub error: FacetError,
}

struct RunningTask {
    key: Option<String>,
    statement: String,
    started: Instant,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owner of all in-flight evaluation tasks
pub struct Sandbox {
    results_tx: Sender<TaskReport>,
    running: HashMap<TaskId, RunningTask>,
    next_id: TaskId,
    meter: Arc<CpuMeter>,
    timeout: Duration,
    limits: Limits,
}

impl Sandbox {
    pub fn new(
        results_tx: Sender<TaskReport>,
        meter: Arc<CpuMeter>,
        timeout: Duration,
        limits: Limits,
    ) -> Self {
        Self {
            results_tx,
            running: HashMap::new(),
            next_id: 1,
            meter,
            timeout,
            limits,
        }
    }

    /// Start evaluating a statement on a fresh thread
    pub fn spawn(&mut self, spec: TaskSpec) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;

        let cancel = Arc::new(AtomicBool::new(false));
        let key = statement_key(&spec.statement);
        let statement = spec.statement.clone();
        let results_tx = self.results_tx.clone();
        let meter = self.meter.clone();
        let flag = cancel.clone();
        let limits = self.limits;

        let handle = thread::spawn(move || {
            let started = Instant::now();
            let mut ctx = EvalContext::with_seed(spec.vars, spec.store, spec.seed)
                .with_cancel(flag)
                .with_max_buffer_len(limits.max_buffer_len)
                .with_max_pattern_len(limits.max_pattern_len);
            let result = contain_panic(|| evaluate_statement(&spec.statement, &mut ctx));
            let elapsed = started.elapsed();
            meter.record_busy(elapsed);
            // the receiver is gone once the engine shuts down
            let _ = results_tx.send(TaskReport {
                id,
                statement: spec.statement,
                origin: spec.origin,
                result,
                elapsed,
            });
        });

        log::debug!("task {} started: {}", id, statement);
        self.running.insert(
            id,
            RunningTask {
                key,
                statement,
                started: Instant::now(),
                cancel,
                handle,
            },
        );
        id
    }

    /// Retire a task whose report arrived. Returns false if it had already
    /// been cancelled, in which case the report must be discarded.
    pub fn finish(&mut self, id: TaskId) -> bool {
        match self.running.remove(&id) {
            Some(task) => {
                let _ = task.handle.join();
                true
            }
            None => false,
        }
    }

    /// Cancel every task evaluating a statement for `key`, returning their ids
    pub fn cancel_key(&mut self, key: &str) -> Vec<TaskId> {
        self.cancel_where(|task| task.key.as_deref() == Some(key))
    }

    pub fn cancel_all(&mut self) -> Vec<TaskId> {
        self.cancel_where(|_| true)
    }

    fn cancel_where<F: Fn(&RunningTask) -> bool>(&mut self, matches: F) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self
            .running
            .iter()
            .filter(|(_, task)| matches(task))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(task) = self.running.remove(id) {
                task.cancel.store(true, Ordering::Relaxed);
                log::debug!("task {} cancelled", id);
            }
        }
        ids
    }

    /// Cancel tasks that have run past the timeout
    pub fn expire(&mut self, now: Instant) -> Vec<ExpiredTask> {
        let timeout = self.timeout;
        let expired: Vec<TaskId> = self
            .running
            .iter()
            .filter(|(_, task)| now.saturating_duration_since(task.started) > timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut errors = Vec::new();
        for id in expired {
            if let Some(task) = self.running.remove(&id) {
                task.cancel.store(true, Ordering::Relaxed);
                log::warn!("task {} timed out after {:?}", id, timeout);
                errors.push(ExpiredTask {
                    id,
                    statement: task.statement,
                    error: FacetError::evaluation(format!(
                        "timed out after {} ms",
                        timeout.as_millis()
                    )),
                });
            }
        }
        errors
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.running
            .values()
            .any(|task| task.key.as_deref() == Some(key))
    }
}

/// Run `eval`, turning a panic into an evaluation error so the task still
/// reports back
fn contain_panic<F>(eval: F) -> Result<StatementOutcome, FacetError>
where
    F: FnOnce() -> Result<StatementOutcome, FacetError>,
{
    panic::catch_unwind(AssertUnwindSafe(eval)).unwrap_or_else(|payload| {
        Err(FacetError::evaluation(format!(
            "evaluation panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown cause"
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn spec(statement: &str) -> TaskSpec {
        TaskSpec {
            statement: statement.to_string(),
            origin: TaskOrigin::Submitted,
            vars: ContextVars::default(),
            store: PatternStore::new(),
            seed: 5,
        }
    }

    fn sandbox() -> (Sandbox, crossbeam_channel::Receiver<TaskReport>) {
        let (tx, rx) = unbounded();
        let sandbox = Sandbox::new(
            tx,
            Arc::new(CpuMeter::with_parallelism(1.0)),
            Duration::from_secs(5),
            Limits {
                max_buffer_len: 1024,
                max_pattern_len: 4096,
            },
        );
        (sandbox, rx)
    }

    #[test]
    fn test_task_reports_outcome() {
        let (mut sandbox, rx) = sandbox();
        let id = sandbox.spawn(spec("kick vol [1 0 1 0]"));
        assert!(sandbox.is_running("kick vol"));
        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.id, id);
        assert!(sandbox.finish(id));
        assert_eq!(sandbox.in_flight(), 0);
        let Ok(outcome) = report.result else {
            panic!("Expected a successful evaluation");
        };
        assert_eq!(outcome.pattern.buffer.serialize(), "1.0000 0.0000 1.0000 0.0000");
    }

    #[test]
    fn test_failures_are_reported_not_raised() {
        let (mut sandbox, rx) = sandbox();
        sandbox.spawn(spec("[1 2]"));
        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(report.result.is_err());
        assert_eq!(report.statement, "[1 2]");
    }

    #[test]
    fn test_panics_become_evaluation_errors() {
        let result = contain_panic(|| panic!("index out of bounds"));
        let Err(FacetError::Evaluation(message)) = result else {
            panic!("Expected an evaluation error");
        };
        assert_eq!(message, "evaluation panicked: index out of bounds");
    }

    #[test]
    fn test_oversized_generators_report_errors() {
        let (mut sandbox, rx) = sandbox();
        for statement in ["a sine(1e10, 1e10)", "a noise(1e10)", "a [1 2].dup(1e6)"] {
            let id = sandbox.spawn(spec(statement));
            let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(report.id, id);
            assert!(sandbox.finish(id));
            assert!(
                matches!(report.result, Err(FacetError::Evaluation(_))),
                "{} should fail",
                statement
            );
        }
        assert_eq!(sandbox.in_flight(), 0);
    }

    #[test]
    fn test_cancelled_reports_are_discarded() {
        let (mut sandbox, rx) = sandbox();
        let id = sandbox.spawn(spec("lead noise(8)"));
        assert_eq!(sandbox.cancel_key("lead"), vec![id]);
        let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.id, id);
        assert!(!sandbox.finish(id));
    }

    #[test]
    fn test_expire_cancels_old_tasks() {
        let (mut sandbox, _rx) = sandbox();
        let id = sandbox.spawn(spec("a [1]"));
        let expired = sandbox.expire(Instant::now() + Duration::from_secs(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(expired[0].statement, "a [1]");
        assert!(matches!(expired[0].error, FacetError::Evaluation(_)));
        assert_eq!(sandbox.in_flight(), 0);
    }
}
