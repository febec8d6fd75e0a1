//! Pattern generator
//!
//! The engine thread owns everything that changes when statements are
//! evaluated: the sandbox, the regeneration scheduler, the stored patterns,
//! the destination table and the list of reported errors. It reacts to
//! three sources: commands from the front end, reports from sandbox tasks
//! and loop boundaries from the transport.
//!
//! Statements of one submission run in parallel, but their table entries
//! are posted together, in statement order, once every sibling has
//! resolved. A mult therefore sees the same table whichever thread wins.

use crate::audio::render::{artifact_path, render_pattern, write_wav};
use crate::audio::transport::{LivePattern, LoopBoundary, StepSequencer, Transport, TransportSinks};
use crate::config::{validate_bpm, validate_steps, FacetConfig};
use crate::cpu::{CpuMeter, CpuMonitor, Telemetry};
use crate::sandbox::{Limits, Sandbox, TaskId, TaskOrigin, TaskReport, TaskSpec};
use crate::scheduler::Scheduler;
use anyhow::Result;
use crossbeam_channel::{bounded, tick, unbounded, Receiver, Sender};
use facet_core::parser::{
    build_table, split_statements, statement_key, ContextVars, StatementOutcome,
};
use facet_core::types::RunMode;
use facet_core::{DestinationTable, FacetError, PatternObject, PatternStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often in-flight tasks are checked against the timeout
const EXPIRY_INTERVAL: Duration = Duration::from_millis(50);

/// A failed statement as shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedError {
    pub message: String,
    pub statement: String,
}

/// Answer to a status request
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub bpm: f64,
    pub cpu_percent: f64,
    /// Errors reported since the previous status request
    pub errors: Vec<ReportedError>,
    pub in_flight: usize,
    pub regenerating: Vec<String>,
    pub hooks_muted: bool,
}

/// Table output of one submission, held until every statement resolves
#[derive(Default)]
struct PendingBatch {
    open: BTreeSet<TaskId>,
    outcomes: Vec<(TaskId, StatementOutcome)>,
}

enum EngineCommand {
    Submit { code: String, mode: RunMode },
    Meta { bpm: f64, bars_elapsed: u64 },
    Status { mousex: Option<f64>, mousey: Option<f64>, reply: Sender<EngineStatus> },
    Table(Sender<DestinationTable>),
    Stop(String),
    StopAll,
    Play,
    MuteHooks(bool),
    ClearHooks(Sender<usize>),
    Shutdown,
}

pub struct Engine {
    config: FacetConfig,
    vars: ContextVars,
    store: PatternStore,
    table: DestinationTable,
    batches: HashMap<u64, PendingBatch>,
    task_batches: HashMap<TaskId, u64>,
    next_batch: u64,
    scheduler: Scheduler,
    sandbox: Sandbox,
    errors: Vec<ReportedError>,
    rng: StdRng,
    meter: Arc<CpuMeter>,
    transport: Arc<Transport>,
    report_rx: Receiver<TaskReport>,
    loop_rx: Receiver<LoopBoundary>,
}

impl Engine {
    /// Build the engine and start its transport
    pub fn new(config: FacetConfig, sinks: TransportSinks) -> Result<Self> {
        config.validate()?;
        let meter = Arc::new(CpuMeter::new());
        let (report_tx, report_rx) = unbounded();
        let (loop_tx, loop_rx) = unbounded();

        let sequencer = StepSequencer::new(config.bpm, config.steps)?;
        let transport = Arc::new(Transport::spawn(
            sequencer,
            config.beats_per_bar,
            sinks,
            loop_tx,
        ));
        let sandbox = Sandbox::new(
            report_tx,
            meter.clone(),
            Duration::from_millis(config.eval_timeout_ms),
            Limits {
                max_buffer_len: config.max_buffer_len,
                max_pattern_len: config.max_pattern_len,
            },
        );
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());

        Ok(Self {
            vars: config.context_vars(),
            store: PatternStore::new(),
            table: DestinationTable::new(),
            batches: HashMap::new(),
            task_batches: HashMap::new(),
            next_batch: 1,
            scheduler: Scheduler::new(config.cpu_threshold),
            sandbox,
            errors: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            meter,
            transport,
            report_rx,
            loop_rx,
            config,
        })
    }

    /// Move the engine onto its own thread
    pub fn spawn(self) -> EngineHandle {
        let (command_tx, command_rx) = unbounded();
        let transport = self.transport.clone();
        let monitor = CpuMonitor::spawn(
            self.meter.clone(),
            transport.bpm_cell(),
            Duration::from_millis(self.config.cpu_poll_ms),
        );
        let thread = thread::spawn(move || self.run_loop(command_rx));
        EngineHandle {
            command_tx,
            transport,
            monitor,
            thread: Some(thread),
        }
    }

    fn run_loop(mut self, command_rx: Receiver<EngineCommand>) {
        let expiry = tick(EXPIRY_INTERVAL);
        loop {
            crossbeam_channel::select! {
                recv(command_rx) -> msg => match msg {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(self.report_rx) -> msg => {
                    if let Ok(report) = msg {
                        self.handle_report(report);
                    }
                },
                recv(self.loop_rx) -> msg => {
                    if let Ok(boundary) = msg {
                        self.on_loop_boundary(boundary);
                    }
                },
                recv(expiry) -> _ => self.expire(Instant::now()),
            }
        }
        self.sandbox.cancel_all();
        log::debug!("engine stopped");
    }

    /// Returns false on shutdown
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Submit { code, mode } => self.submit(&code, mode),
            EngineCommand::Meta { bpm, bars_elapsed } => {
                self.vars.bpm = bpm;
                self.vars.bars_elapsed = bars_elapsed;
            }
            EngineCommand::Status { mousex, mousey, reply } => {
                if let Some(x) = mousex {
                    self.vars.mousex = x;
                }
                if let Some(y) = mousey {
                    self.vars.mousey = y;
                }
                let _ = reply.send(self.status());
            }
            EngineCommand::Table(reply) => {
                let _ = reply.send(self.table.clone());
            }
            EngineCommand::Stop(name) => self.stop(&name),
            EngineCommand::StopAll => self.stop_all(),
            EngineCommand::Play => self.transport.play(),
            EngineCommand::MuteHooks(muted) => {
                self.scheduler.mute_hooks(muted);
                log::info!("hooks {}", if muted { "muted" } else { "unmuted" });
            }
            EngineCommand::ClearHooks(reply) => {
                let _ = reply.send(self.scheduler.clear_hooks());
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// Split a submission into statements and start one task per statement.
    /// A manual submission replaces whatever was pending for the same name.
    pub fn submit(&mut self, code: &str, mode: RunMode) {
        let batch = self.next_batch;
        self.next_batch += 1;
        let mut pending = PendingBatch::default();
        for statement in split_statements(code) {
            let statement = mode.apply(&statement);
            if let Some(key) = statement_key(&statement) {
                let cancelled = self.sandbox.cancel_key(&key);
                if !cancelled.is_empty() {
                    log::debug!("replaced {} pending evaluation(s) of {}", cancelled.len(), key);
                }
                for id in cancelled {
                    self.settle(id, None);
                }
                self.scheduler.forget(&key);
            }
            let id = self.spawn_task(statement, TaskOrigin::Submitted);
            pending.open.insert(id);
            self.task_batches.insert(id, batch);
        }
        if !pending.open.is_empty() {
            self.batches.insert(batch, pending);
        }
    }

    fn spawn_task(&mut self, statement: String, origin: TaskOrigin) -> TaskId {
        let spec = TaskSpec {
            statement,
            origin,
            vars: self.vars.clone(),
            store: self.store.clone(),
            seed: self.rng.random(),
        };
        self.sandbox.spawn(spec)
    }

    pub fn handle_report(&mut self, report: TaskReport) {
        if !self.sandbox.finish(report.id) {
            log::debug!("discarding result of cancelled task {}", report.id);
            return;
        }
        log::debug!("task {} finished in {:?}", report.id, report.elapsed);
        match report.result {
            Ok(outcome) => self.apply_outcome(report.id, outcome, report.origin),
            Err(error) => {
                if let Some(key) = statement_key(&report.statement) {
                    self.scheduler.release(&key);
                }
                self.settle(report.id, None);
                self.report_error(report.statement, error);
            }
        }
    }

    fn apply_outcome(&mut self, id: TaskId, outcome: StatementOutcome, origin: TaskOrigin) {
        let pattern = &outcome.pattern;
        let name = pattern.name();
        self.store.merge(pattern.stored.iter().cloned());
        self.scheduler.record(pattern, origin);

        if pattern.stopped {
            self.transport.remove(&name);
            self.table.remove(&pattern.destination, &pattern.property);
            self.settle(id, None);
            return;
        }
        if let Some(bpm) = &pattern.bpm_pattern {
            self.transport.set_bpm_pattern(bpm.clone());
        }
        if pattern.skipped {
            log::debug!("{} skipped this cycle", name);
            self.settle(id, None);
            return;
        }

        if pattern.has_playback() {
            self.post_to_transport(pattern);
        }
        self.settle(id, Some(outcome));
    }

    /// Mark a task resolved. Its batch's table entries are posted once the
    /// last sibling resolves; tasks outside any batch post straight away.
    fn settle(&mut self, id: TaskId, outcome: Option<StatementOutcome>) {
        let Some(batch_id) = self.task_batches.remove(&id) else {
            if let Some(outcome) = outcome {
                self.post_to_table(vec![outcome]);
            }
            return;
        };
        let Some(batch) = self.batches.get_mut(&batch_id) else {
            return;
        };
        batch.open.remove(&id);
        if let Some(outcome) = outcome {
            batch.outcomes.push((id, outcome));
        }
        if !batch.open.is_empty() {
            return;
        }
        if let Some(mut batch) = self.batches.remove(&batch_id) {
            // task ids follow statement order
            batch.outcomes.sort_by_key(|(id, _)| *id);
            self.post_to_table(batch.outcomes.into_iter().map(|(_, o)| o).collect());
        }
    }

    fn post_to_table(&mut self, outcomes: Vec<StatementOutcome>) {
        for (destination, property, buffer) in build_table(&outcomes).iter() {
            self.table.insert(destination, property, buffer.clone());
        }
    }

    fn post_to_transport(&self, pattern: &PatternObject) {
        let name = pattern.name();
        let clip = if pattern.sequence_data.is_empty() {
            None
        } else {
            let mut clip = render_pattern(pattern, self.config.sample_rate);
            if self.config.write_artifacts {
                let path = artifact_path(&self.config.artifact_dir, &name);
                match write_wav(&path, &clip) {
                    Ok(()) => clip.path = Some(path),
                    Err(e) => log::warn!("could not write artifact for {}: {:#}", name, e),
                }
            }
            Some(Arc::new(clip))
        };
        self.transport.update(LivePattern::from_pattern(pattern, clip));
    }

    fn report_error(&mut self, statement: String, error: FacetError) {
        log::warn!("{}: {}", statement, error);
        self.errors.push(ReportedError {
            message: error.to_string(),
            statement,
        });
    }

    /// Bring the context up to date and resubmit whatever is due
    pub fn on_loop_boundary(&mut self, boundary: LoopBoundary) {
        self.vars.bpm = boundary.bpm;
        self.vars.bars_elapsed = boundary.bars_elapsed;
        let due = self
            .scheduler
            .due(boundary.bars_elapsed, self.meter.load());
        for resubmission in due {
            log::trace!("regenerating {}", resubmission.name);
            self.spawn_task(resubmission.statement, resubmission.origin);
        }
    }

    fn expire(&mut self, now: Instant) {
        for expired in self.sandbox.expire(now) {
            if let Some(key) = statement_key(&expired.statement) {
                self.scheduler.release(&key);
            }
            self.settle(expired.id, None);
            self.report_error(expired.statement, expired.error);
        }
    }

    /// Cancel a pattern's tasks and drop it everywhere
    pub fn stop(&mut self, name: &str) {
        for id in self.sandbox.cancel_key(name) {
            self.settle(id, None);
        }
        self.scheduler.stop(name);
        self.transport.remove(name);
        let (destination, property) = name.split_once(' ').unwrap_or((name, ""));
        self.table.remove(destination, property.trim());
    }

    /// Halt everything: tasks, regeneration, stored patterns and playback
    pub fn stop_all(&mut self) {
        self.sandbox.cancel_all();
        self.batches.clear();
        self.task_batches.clear();
        self.scheduler.stop_all();
        self.store.clear();
        self.table.clear();
        self.transport.stop();
    }

    /// Snapshot for the status call. Drains the reported errors.
    pub fn status(&mut self) -> EngineStatus {
        EngineStatus {
            bpm: self.transport.bpm(),
            cpu_percent: self.meter.percent(),
            errors: std::mem::take(&mut self.errors),
            in_flight: self.sandbox.in_flight(),
            regenerating: self.scheduler.names().into_iter().cloned().collect(),
            hooks_muted: self.scheduler.hooks_muted(),
        }
    }

    pub fn table(&self) -> &DestinationTable {
        &self.table
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Block until the next task report arrives and apply it
    pub fn process_next_report(&mut self, timeout: Duration) -> bool {
        match self.report_rx.recv_timeout(timeout) {
            Ok(report) => {
                self.handle_report(report);
                true
            }
            Err(_) => false,
        }
    }
}

/// Front-end side of a running engine
pub struct EngineHandle {
    command_tx: Sender<EngineCommand>,
    transport: Arc<Transport>,
    monitor: CpuMonitor,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn submit(&self, code: &str, mode: RunMode) {
        let _ = self.command_tx.send(EngineCommand::Submit {
            code: code.to_string(),
            mode,
        });
    }

    /// Override the tempo and bar count seen by the next evaluations
    pub fn meta(&self, bpm: f64, bars_elapsed: u64) {
        let _ = self
            .command_tx
            .send(EngineCommand::Meta { bpm, bars_elapsed });
    }

    pub fn status(&self, mouse: Option<(f64, f64)>) -> Option<EngineStatus> {
        let (reply, rx) = bounded(1);
        let _ = self.command_tx.send(EngineCommand::Status {
            mousex: mouse.map(|(x, _)| x),
            mousey: mouse.map(|(_, y)| y),
            reply,
        });
        rx.recv_timeout(Duration::from_secs(1)).ok()
    }

    pub fn table(&self) -> Option<DestinationTable> {
        let (reply, rx) = bounded(1);
        let _ = self.command_tx.send(EngineCommand::Table(reply));
        rx.recv_timeout(Duration::from_secs(1)).ok()
    }

    pub fn stop(&self, name: &str) {
        let _ = self.command_tx.send(EngineCommand::Stop(name.to_string()));
    }

    pub fn stop_all(&self) {
        let _ = self.command_tx.send(EngineCommand::StopAll);
    }

    pub fn play(&self) {
        let _ = self.command_tx.send(EngineCommand::Play);
    }

    pub fn mute_hooks(&self, muted: bool) {
        let _ = self.command_tx.send(EngineCommand::MuteHooks(muted));
    }

    pub fn clear_hooks(&self) -> Option<usize> {
        let (reply, rx) = bounded(1);
        let _ = self.command_tx.send(EngineCommand::ClearHooks(reply));
        rx.recv_timeout(Duration::from_secs(1)).ok()
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), FacetError> {
        validate_bpm(bpm)?;
        self.transport.set_bpm(bpm)
    }

    pub fn set_steps(&self, steps: usize) -> Result<(), FacetError> {
        validate_steps(steps)?;
        self.transport.set_steps(steps)
    }

    pub fn bpm(&self) -> f64 {
        self.transport.bpm()
    }

    pub fn steps(&self) -> usize {
        self.transport.steps()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_running()
    }

    pub fn telemetry(&self) -> Receiver<Telemetry> {
        self.monitor.subscribe()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let config = FacetConfig {
            write_artifacts: false,
            seed: Some(11),
            ..FacetConfig::default()
        };
        Engine::new(config, TransportSinks::default()).unwrap()
    }

    fn settle(engine: &mut Engine, reports: usize) {
        for _ in 0..reports {
            assert!(engine.process_next_report(Duration::from_secs(5)));
        }
    }

    #[test]
    fn test_submission_fills_table_and_scheduler() {
        let mut engine = engine();
        engine.submit("kick vol [1 0 1 0]; synth freq [0 1].scale(200,400)", RunMode::Run);
        settle(&mut engine, 2);
        assert_eq!(
            engine.table().get("kick", "vol"),
            Some("1.0000 0.0000 1.0000 0.0000")
        );
        assert_eq!(engine.table().get("synth", "freq"), Some("200.0000 400.0000"));
        assert!(engine.scheduler().is_registered("kick vol"));
        assert!(engine.scheduler().is_registered("synth freq"));
    }

    #[test]
    fn test_failures_are_collected_and_drained() {
        let mut engine = engine();
        engine.submit("a x [1 0]; broken x (((", RunMode::Run);
        settle(&mut engine, 2);
        assert_eq!(engine.table().get("a", "x"), Some("1.0000 0.0000"));

        let status = engine.status();
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.errors[0].statement, "broken x (((");
        assert!(engine.status().errors.is_empty());
    }

    #[test]
    fn test_keep_and_stop_leave_the_scheduler() {
        let mut engine = engine();
        engine.submit("pad [1 2 3]", RunMode::Keep);
        settle(&mut engine, 1);
        assert!(!engine.scheduler().is_registered("pad"));
        assert!(engine.table().get("pad", "").is_some());

        engine.submit("lead noise(4)", RunMode::Run);
        settle(&mut engine, 1);
        assert!(engine.scheduler().is_registered("lead"));
        assert!(engine.table().get("lead", "").is_some());
        engine.submit("lead noise(4)", RunMode::Stop);
        settle(&mut engine, 1);
        assert!(!engine.scheduler().is_registered("lead"));
        assert_eq!(engine.table().get("lead", ""), None);
    }

    #[test]
    fn test_stop_removes_table_entry() {
        let mut engine = engine();
        engine.submit("a x [1 0]; a y [0 1]", RunMode::Run);
        settle(&mut engine, 2);
        assert_eq!(engine.table().get("a", "x"), Some("1.0000 0.0000"));

        engine.stop("a x");
        assert_eq!(engine.table().get("a", "x"), None);
        assert_eq!(engine.table().get("a", "y"), Some("0.0000 1.0000"));
        assert!(!engine.scheduler().is_registered("a x"));
    }

    #[test]
    fn test_mults_follow_statement_order() {
        for _ in 0..5 {
            let mut engine = engine();
            engine.submit("a x [1].mult(b y); b y [5]", RunMode::Run);
            settle(&mut engine, 2);
            assert_eq!(engine.table().get("a", "x"), Some("1.0000"));
            assert_eq!(engine.table().get("b", "y"), Some("5.0000"));

            engine.submit("b y [5]; a x [1].mult(b y)", RunMode::Run);
            settle(&mut engine, 2);
            assert_eq!(engine.table().get("b", "y"), Some("1.0000"));
        }
    }

    #[test]
    fn test_batch_posts_after_failed_sibling() {
        let mut engine = engine();
        engine.submit("a x [1]; b y noise(1e12)", RunMode::Run);
        settle(&mut engine, 2);
        assert_eq!(engine.table().get("a", "x"), Some("1.0000"));
        assert_eq!(engine.table().get("b", "y"), None);
        assert_eq!(engine.status().errors.len(), 1);
    }

    #[test]
    fn test_stored_patterns_reach_later_tasks() {
        let mut engine = engine();
        engine.submit("a [1 2 3].set('shared')", RunMode::Keep);
        settle(&mut engine, 1);
        assert!(engine.store().get("shared").is_some());

        engine.submit("b get('shared').gain(2)", RunMode::Keep);
        settle(&mut engine, 1);
        assert_eq!(
            engine.table().get("b", ""),
            Some("2.0000 4.0000 6.0000")
        );
    }

    #[test]
    fn test_loop_boundary_resubmits_reruns() {
        let mut engine = engine();
        engine.submit("n noise(4)", RunMode::Run);
        settle(&mut engine, 1);
        let first = engine.table().get("n", "").map(str::to_string);

        engine.on_loop_boundary(LoopBoundary {
            bars_elapsed: 1,
            bpm: 120.0,
        });
        settle(&mut engine, 1);
        let second = engine.table().get("n", "").map(str::to_string);
        assert!(first.is_some());
        assert_ne!(first, second);
        assert!(engine.scheduler().is_registered("n"));
    }

    #[test]
    fn test_handle_round_trip() {
        let handle = engine().spawn();
        let telemetry = handle.telemetry();
        handle.submit("kick vol [1 0 1 0].keep()", RunMode::Run);
        assert!(handle.set_bpm(-1.0).is_err());
        assert!(handle.set_steps(0).is_err());

        let mut table = None;
        for _ in 0..50 {
            table = handle.table().filter(|t| t.get("kick", "vol").is_some());
            if table.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        let Some(table) = table else {
            panic!("Expected kick vol in the table");
        };
        assert_eq!(table.get("kick", "vol"), Some("1.0000 0.0000 1.0000 0.0000"));

        let Some(status) = handle.status(Some((0.5, 0.25))) else {
            panic!("Expected a status reply");
        };
        assert_eq!(status.bpm, 90.0);
        assert!(status.errors.is_empty());
        assert!(telemetry.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_stop_all_clears_state() {
        let mut engine = engine();
        engine.submit("a [1].set('x')", RunMode::Run);
        settle(&mut engine, 1);
        engine.stop_all();
        assert!(engine.store().is_empty());
        assert!(engine.table().is_empty());
        assert!(engine.scheduler().is_empty());
    }
}
