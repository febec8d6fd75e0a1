//! CPU-load meter and telemetry broadcast
//!
//! Load is the evaluation busy time accumulated by the sandbox divided by
//! the wall time of the sampling window and the available parallelism. A
//! poller thread samples it every `cpu_poll_ms` and broadcasts a
//! [`Telemetry`] reading to every subscriber.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One telemetry reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub cpu_percent: f64,
    pub bpm: f64,
}

/// Shared busy-time accumulator and most recent load sample
pub struct CpuMeter {
    busy_nanos: AtomicU64,
    /// Last load as f64 bits, in 0..=1
    load: AtomicU64,
    parallelism: f64,
    window: Mutex<Window>,
}

struct Window {
    started: Instant,
    busy_at_start: u64,
}

impl CpuMeter {
    pub fn new() -> Self {
        let parallelism = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;
        Self::with_parallelism(parallelism)
    }

    pub fn with_parallelism(parallelism: f64) -> Self {
        Self {
            busy_nanos: AtomicU64::new(0),
            load: AtomicU64::new(0f64.to_bits()),
            parallelism: parallelism.max(1.0),
            window: Mutex::new(Window {
                started: Instant::now(),
                busy_at_start: 0,
            }),
        }
    }

    /// Add time spent evaluating
    pub fn record_busy(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Close the current window and start a new one, returning its load
    pub fn sample(&self) -> f64 {
        self.sample_at(Instant::now())
    }

    fn sample_at(&self, now: Instant) -> f64 {
        let busy = self.busy_nanos.load(Ordering::Relaxed);
        let Ok(mut window) = self.window.lock() else {
            return self.load();
        };
        let wall = now.saturating_duration_since(window.started).as_nanos() as f64;
        let load = if wall > 0.0 {
            let spent = busy.saturating_sub(window.busy_at_start) as f64;
            (spent / wall / self.parallelism).clamp(0.0, 1.0)
        } else {
            self.load()
        };
        window.started = now;
        window.busy_at_start = busy;
        self.load.store(load.to_bits(), Ordering::Relaxed);
        load
    }

    /// Most recent sample in 0..=1
    pub fn load(&self) -> f64 {
        f64::from_bits(self.load.load(Ordering::Relaxed))
    }

    pub fn percent(&self) -> f64 {
        self.load() * 100.0
    }

    /// Whether new rerun work should be held back
    pub fn is_overloaded(&self, threshold: f64) -> bool {
        self.load() >= threshold
    }
}

impl Default for CpuMeter {
    fn default() -> Self {
        Self::new()
    }
}

enum MonitorCommand {
    AddSubscriber(Sender<Telemetry>),
    Shutdown,
}

/// Background poller that samples the meter on a fixed interval
pub struct CpuMonitor {
    meter: Arc<CpuMeter>,
    command_tx: Sender<MonitorCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpuMonitor {
    /// `bpm` holds the transport tempo as f64 bits
    pub fn spawn(meter: Arc<CpuMeter>, bpm: Arc<AtomicU64>, poll: Duration) -> Self {
        let (command_tx, command_rx) = bounded(16);
        let thread_meter = meter.clone();
        let poll = poll.max(Duration::from_millis(1));

        let thread = thread::spawn(move || {
            let mut subscribers: Vec<Sender<Telemetry>> = Vec::new();
            loop {
                match command_rx.recv_timeout(poll) {
                    Ok(MonitorCommand::AddSubscriber(tx)) => subscribers.push(tx),
                    Ok(MonitorCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let load = thread_meter.sample();
                        let reading = Telemetry {
                            cpu_percent: load * 100.0,
                            bpm: f64::from_bits(bpm.load(Ordering::Relaxed)),
                        };
                        log::trace!("cpu {:.1}% at {:.1} bpm", reading.cpu_percent, reading.bpm);
                        subscribers.retain(|tx| tx.send(reading).is_ok());
                    }
                }
            }
        });

        Self {
            meter,
            command_tx,
            thread: Some(thread),
        }
    }

    pub fn subscribe(&self) -> Receiver<Telemetry> {
        let (tx, rx) = unbounded();
        let _ = self.command_tx.send(MonitorCommand::AddSubscriber(tx));
        rx
    }

    pub fn meter(&self) -> &Arc<CpuMeter> {
        &self.meter
    }
}

impl Drop for CpuMonitor {
    fn drop(&mut self) {
        let _ = self.command_tx.send(MonitorCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_is_busy_over_wall_and_cores() {
        let meter = CpuMeter::with_parallelism(2.0);
        let start = Instant::now();
        meter.sample_at(start);
        meter.record_busy(Duration::from_millis(50));
        let load = meter.sample_at(start + Duration::from_millis(100));
        assert!((load - 0.25).abs() < 1e-9);
        assert!(!meter.is_overloaded(0.5));
        assert_eq!(meter.percent(), 25.0);
    }

    #[test]
    fn test_load_is_clamped() {
        let meter = CpuMeter::with_parallelism(1.0);
        let start = Instant::now();
        meter.sample_at(start);
        meter.record_busy(Duration::from_secs(10));
        assert_eq!(meter.sample_at(start + Duration::from_millis(10)), 1.0);
        assert!(meter.is_overloaded(0.5));
    }

    #[test]
    fn test_monitor_broadcasts_readings() {
        let meter = Arc::new(CpuMeter::new());
        let bpm = Arc::new(AtomicU64::new(120f64.to_bits()));
        let monitor = CpuMonitor::spawn(meter, bpm, Duration::from_millis(5));
        let rx = monitor.subscribe();
        let Ok(reading) = rx.recv_timeout(Duration::from_secs(2)) else {
            panic!("Expected a telemetry reading");
        };
        assert_eq!(reading.bpm, 120.0);
        assert!((0.0..=100.0).contains(&reading.cpu_percent));
    }
}
