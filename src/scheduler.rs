//! Regeneration and hook scheduling
//!
//! Keeps the statements that must be evaluated again, keyed by pattern
//! name. Plain reruns are resubmitted at every loop boundary unless the
//! process is overloaded; `every(N)` hooks are resubmitted only on bars that
//! are a multiple of N and can be muted or cleared on their own. An entry is
//! never resubmitted while its previous evaluation is still in flight.

use crate::sandbox::TaskOrigin;
use facet_core::PatternObject;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    statement: String,
    /// Hook period in bars, `None` for a plain rerun
    period: Option<u32>,
    /// False while an evaluation for this entry is in flight
    available: bool,
    loops_since_generation: u64,
}

/// A statement the scheduler wants evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct Resubmission {
    pub name: String,
    pub statement: String,
    pub origin: TaskOrigin,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    entries: BTreeMap<String, Entry>,
    hooks_muted: bool,
    cpu_threshold: f64,
}

impl Scheduler {
    pub fn new(cpu_threshold: f64) -> Self {
        Self {
            entries: BTreeMap::new(),
            hooks_muted: false,
            cpu_threshold,
        }
    }

    /// Record the outcome of a successful evaluation
    pub fn record(&mut self, pattern: &PatternObject, origin: TaskOrigin) {
        let name = pattern.name();
        if pattern.stopped {
            self.stop(&name);
            return;
        }
        if !pattern.regenerates() {
            if self.entries.remove(&name).is_some() {
                log::debug!("{} no longer regenerates", name);
            }
            return;
        }
        match origin {
            TaskOrigin::Submitted => {
                let entry = Entry {
                    statement: pattern.statement.clone(),
                    period: pattern.hook_period,
                    available: true,
                    loops_since_generation: 0,
                };
                log::debug!("registered {} for regeneration", name);
                self.entries.insert(name, entry);
            }
            TaskOrigin::Rerun | TaskOrigin::Hook => self.release(&name),
        }
    }

    /// Make an entry eligible again after its evaluation finished, failed or
    /// timed out
    pub fn release(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.available = true;
        }
    }

    /// Drop a name ahead of a manual run replacing it
    pub fn forget(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Purge a name from both reruns and hooks
    pub fn stop(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            log::info!("stopped regenerating {}", name);
        }
        removed
    }

    pub fn stop_all(&mut self) {
        self.entries.clear();
    }

    pub fn mute_hooks(&mut self, muted: bool) {
        self.hooks_muted = muted;
    }

    pub fn hooks_muted(&self) -> bool {
        self.hooks_muted
    }

    /// Remove every hook, leaving plain reruns alone
    pub fn clear_hooks(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.period.is_none());
        before - self.entries.len()
    }

    /// Statements due at a loop boundary. Plain reruns are held back while
    /// `cpu_load` is at or above the threshold.
    pub fn due(&mut self, bars_elapsed: u64, cpu_load: f64) -> Vec<Resubmission> {
        let overloaded = cpu_load >= self.cpu_threshold;
        if overloaded {
            log::debug!("cpu at {:.0}%, holding back reruns", cpu_load * 100.0);
        }

        let muted = self.hooks_muted;
        let mut due = Vec::new();
        for (name, entry) in self.entries.iter_mut() {
            let origin = match entry.period {
                None if overloaded => continue,
                None => TaskOrigin::Rerun,
                Some(_) if muted => continue,
                Some(period) => {
                    let fires = entry.loops_since_generation > 0
                        && bars_elapsed % u64::from(period.max(1)) == 0;
                    if !fires {
                        entry.loops_since_generation += 1;
                        continue;
                    }
                    TaskOrigin::Hook
                }
            };
            if !entry.available {
                continue;
            }
            entry.available = false;
            entry.loops_since_generation = 1;
            due.push(Resubmission {
                name: name.clone(),
                statement: entry.statement.clone(),
                origin,
            });
        }
        due
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn hook_period(&self, name: &str) -> Option<u32> {
        self.entries.get(name).and_then(|entry| entry.period)
    }

    pub fn names(&self) -> Vec<&String> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(0.5)
    }
}
