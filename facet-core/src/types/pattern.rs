//! Pattern objects
//!
//! The stateful result of evaluating one statement. The scheduler keys them
//! by name; the transport reads their playback positions and MIDI schedules.

use crate::types::{Buffer, Value};
use std::fmt;
use std::str::FromStr;

/// Default MIDI note velocity
pub const DEFAULT_VELOCITY: f64 = 100.0;
/// Default MIDI note duration in milliseconds
pub const DEFAULT_DURATION_MS: f64 = 125.0;
/// Default MIDI controller number for `cc()`
pub const DEFAULT_CONTROLLER: u8 = 70;

/// How a submitted statement should be treated by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RunMode {
    /// Evaluate and keep regenerating every loop
    #[default]
    Run,
    /// Stop the named pattern
    Stop,
    /// Evaluate once and keep playing the result without regenerating
    Keep,
    /// Evaluate and play a single time
    Once,
}

impl RunMode {
    /// Chain suffix appended to a statement submitted in this mode
    pub fn suffix(&self) -> &'static str {
        match self {
            RunMode::Run => "",
            RunMode::Stop => ".stop()",
            RunMode::Keep => ".keep()",
            RunMode::Once => ".once()",
        }
    }

    /// Apply the mode to a single statement
    pub fn apply(&self, statement: &str) -> String {
        format!("{}{}", statement.trim_end(), self.suffix())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "run" => Ok(RunMode::Run),
            "stop" => Ok(RunMode::Stop),
            "keep" => Ok(RunMode::Keep),
            "once" => Ok(RunMode::Once),
            other => Err(format!("Unknown run mode '{}'", other)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Run => "run",
            RunMode::Stop => "stop",
            RunMode::Keep => "keep",
            RunMode::Once => "once",
        };
        write!(f, "{}", name)
    }
}

/// MIDI notes produced by `note()`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoteSchedule {
    /// Note numbers, one per pattern element
    pub data: Vec<f64>,
    pub velocity: Vec<f64>,
    /// Milliseconds
    pub duration: Vec<f64>,
    /// 1-based MIDI channel
    pub channel: u8,
}

/// MIDI control changes produced by `cc()`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlSchedule {
    /// Values in 0..=127
    pub data: Vec<f64>,
    pub controller: u8,
    pub channel: u8,
}

/// MIDI pitch bend produced by `pitchbend()`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PitchbendSchedule {
    /// Values in -1..=1
    pub data: Vec<f64>,
    pub channel: u8,
}

/// A fully evaluated statement
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternObject {
    pub destination: String,
    pub property: String,
    /// Source text the object was evaluated from
    pub statement: String,
    pub data: Value,
    /// Flattened and clamped result, filled in after the chain runs
    pub buffer: Buffer,
    /// Playback positions in 0..=1
    pub sequence_data: Vec<f64>,
    pub notes: Option<NoteSchedule>,
    /// Semitone offsets fired along with every note
    pub chord_intervals: Vec<f64>,
    pub cc: Option<ControlSchedule>,
    pub pitchbend: Option<PitchbendSchedule>,
    /// Per-step tempo, when this pattern drives the transport
    pub bpm_pattern: Option<Vec<f64>>,
    /// Bindings written by `set(name)`
    pub stored: Vec<(String, Value)>,
    /// Regenerate only every N bars
    pub hook_period: Option<u32>,
    pub channels: usize,
    pub pan: Option<Vec<f64>>,
    pub stopped: bool,
    pub keep: bool,
    pub once: bool,
    pub skipped: bool,
}

impl PatternObject {
    pub fn new(destination: &str, property: &str, statement: &str) -> Self {
        Self {
            destination: destination.to_string(),
            property: property.to_string(),
            statement: statement.to_string(),
            data: Value::empty(),
            buffer: Buffer::default(),
            sequence_data: Vec::new(),
            notes: None,
            chord_intervals: Vec::new(),
            cc: None,
            pitchbend: None,
            bpm_pattern: None,
            stored: Vec::new(),
            hook_period: None,
            channels: 1,
            pan: None,
            stopped: false,
            keep: false,
            once: false,
            skipped: false,
        }
    }

    /// An object carrying nothing but a stop instruction
    pub fn stop_sentinel(destination: &str, property: &str, statement: &str) -> Self {
        let mut object = Self::new(destination, property, statement);
        object.stopped = true;
        object
    }

    /// Unique key: `destination` or `destination property`
    pub fn name(&self) -> String {
        pattern_name(&self.destination, &self.property)
    }

    /// Whether the scheduler should re-run this statement every loop. A
    /// skipped pattern still regenerates; only this cycle's output is dropped.
    pub fn regenerates(&self) -> bool {
        !self.keep && !self.once && !self.stopped
    }

    /// Whether the transport has anything to do with this object
    pub fn has_playback(&self) -> bool {
        !self.sequence_data.is_empty()
            || self.notes.is_some()
            || self.cc.is_some()
            || self.pitchbend.is_some()
            || self.bpm_pattern.is_some()
    }
}

/// Pattern key from a destination/property pair
pub fn pattern_name(destination: &str, property: &str) -> String {
    if property.is_empty() {
        destination.to_string()
    } else {
        format!("{} {}", destination, property)
    }
}
