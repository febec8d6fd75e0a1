//! Step transport
//!
//! A timer thread that walks a fixed grid of `steps` slots per loop. Every
//! tick it asks the [`StepSequencer`] which clips, notes, control changes and
//! pitch bends fall on the current step and hands them to the sinks. When
//! the grid wraps it reports a [`LoopBoundary`] so patterns can be
//! regenerated for the next loop.
//!
//! One step lasts `(60000 / bpm) / steps * beats_per_bar` milliseconds.

use crate::audio::audio::{Clip, PlaybackSink};
use crate::audio::midi::MidiSink;
use crate::config::{validate_bpm, validate_steps};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use facet_core::algebra::resize::{spread_to_steps, stretch_to_steps};
use facet_core::types::pattern::{DEFAULT_DURATION_MS, DEFAULT_VELOCITY};
use facet_core::types::{ControlSchedule, NoteSchedule, PitchbendSchedule};
use facet_core::{FacetError, PatternObject};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Step (1-based) a playback position in 0..=1 fires on
pub fn position_to_step(position: f64, steps: usize) -> usize {
    let position = if position.is_finite() {
        position.clamp(0.0, 1.0)
    } else {
        0.0
    };
    (position * steps.saturating_sub(1) as f64).round() as usize + 1
}

/// Milliseconds between ticks
pub fn tick_interval_ms(bpm: f64, steps: usize, beats_per_bar: u32) -> f64 {
    (60000.0 / bpm) / steps.max(1) as f64 * beats_per_bar as f64
}

/// What the transport keeps of an evaluated pattern
#[derive(Debug, Clone, PartialEq)]
pub struct LivePattern {
    pub name: String,
    pub sequence_data: Vec<f64>,
    pub clip: Option<Arc<Clip>>,
    pub gain: f32,
    pub notes: Option<NoteSchedule>,
    pub chord_intervals: Vec<f64>,
    pub cc: Option<ControlSchedule>,
    pub pitchbend: Option<PitchbendSchedule>,
    /// Play a single loop, then drop out
    pub once: bool,
}

impl LivePattern {
    pub fn from_pattern(pattern: &PatternObject, clip: Option<Arc<Clip>>) -> Self {
        Self {
            name: pattern.name(),
            sequence_data: pattern.sequence_data.clone(),
            clip,
            gain: 1.0,
            notes: pattern.notes.clone(),
            chord_intervals: pattern.chord_intervals.clone(),
            cc: pattern.cc.clone(),
            pitchbend: pattern.pitchbend.clone(),
            once: pattern.once,
        }
    }
}

/// A pattern's schedules laid out on the step grid
#[derive(Debug, Clone, Default, PartialEq)]
struct StepGrid {
    triggers: Vec<usize>,
    notes: Vec<Option<f64>>,
    velocity: Vec<f64>,
    duration: Vec<f64>,
    cc: Vec<Option<f64>>,
    pitchbend: Vec<Option<f64>>,
}

impl StepGrid {
    fn build(pattern: &LivePattern, steps: usize) -> Self {
        let (notes, velocity, duration) = match &pattern.notes {
            Some(schedule) => (
                spread_to_steps(&schedule.data, steps),
                stretch_to_steps(&schedule.velocity, steps),
                stretch_to_steps(&schedule.duration, steps),
            ),
            None => Default::default(),
        };
        Self {
            triggers: pattern
                .sequence_data
                .iter()
                .map(|p| position_to_step(*p, steps))
                .collect(),
            notes,
            velocity,
            duration,
            cc: pattern
                .cc
                .as_ref()
                .map(|cc| spread_to_steps(&cc.data, steps))
                .unwrap_or_default(),
            pitchbend: pattern
                .pitchbend
                .as_ref()
                .map(|pb| spread_to_steps(&pb.data, steps))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Playing,
    /// A one-shot waiting for the start of the next loop
    Pending,
}

#[derive(Debug, Clone)]
struct Slot {
    pattern: LivePattern,
    grid: StepGrid,
    lifecycle: Lifecycle,
}

/// An event due on the current step
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Trigger {
        name: String,
        clip: Arc<Clip>,
        gain: f32,
    },
    Note {
        channel: u8,
        note: u8,
        velocity: u8,
        duration: Duration,
    },
    Control {
        channel: u8,
        controller: u8,
        value: u8,
    },
    PitchBend {
        channel: u8,
        value: f64,
    },
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// The step that just fired (1-based)
    pub step: usize,
    pub events: Vec<StepEvent>,
    /// Whether this tick closed a loop
    pub wrapped: bool,
    pub cycles_elapsed: u64,
    pub bpm: f64,
}

/// Pure step-grid state machine driven by the transport thread
#[derive(Debug, Clone)]
pub struct StepSequencer {
    steps: usize,
    current_step: usize,
    cycles_elapsed: u64,
    bpm: f64,
    /// Tempo per step, stretched onto the grid
    bpm_pattern: Vec<f64>,
    slots: BTreeMap<String, Slot>,
}

impl StepSequencer {
    pub fn new(bpm: f64, steps: usize) -> Result<Self, FacetError> {
        validate_bpm(bpm)?;
        validate_steps(steps)?;
        Ok(Self {
            steps,
            current_step: 1,
            cycles_elapsed: 0,
            bpm,
            bpm_pattern: vec![bpm],
            slots: BTreeMap::new(),
        })
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn cycles_elapsed(&self) -> u64 {
        self.cycles_elapsed
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), FacetError> {
        validate_bpm(bpm)?;
        self.bpm = bpm;
        self.bpm_pattern = vec![bpm];
        Ok(())
    }

    /// Tempo that changes per step. Unusable values are dropped.
    pub fn set_bpm_pattern(&mut self, pattern: &[f64]) -> Result<(), FacetError> {
        let usable: Vec<f64> = pattern
            .iter()
            .copied()
            .filter(|bpm| validate_bpm(*bpm).is_ok())
            .collect();
        if usable.is_empty() {
            return Err(FacetError::TransportConfig(
                "bpm pattern has no positive values".to_string(),
            ));
        }
        self.bpm_pattern = usable;
        Ok(())
    }

    pub fn set_steps(&mut self, steps: usize) -> Result<(), FacetError> {
        validate_steps(steps)?;
        self.steps = steps;
        if self.current_step > steps {
            self.current_step = 1;
        }
        for slot in self.slots.values_mut() {
            slot.grid = StepGrid::build(&slot.pattern, steps);
        }
        Ok(())
    }

    /// Replace (or add) a live pattern
    pub fn update(&mut self, pattern: LivePattern) {
        let lifecycle = if pattern.once && self.current_step != 1 {
            Lifecycle::Pending
        } else {
            Lifecycle::Playing
        };
        let grid = StepGrid::build(&pattern, self.steps);
        self.slots.insert(
            pattern.name.clone(),
            Slot {
                pattern,
                grid,
                lifecycle,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.slots.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn names(&self) -> Vec<&String> {
        self.slots.keys().collect()
    }

    /// Restart from step 1
    pub fn rewind(&mut self) {
        self.current_step = 1;
    }

    /// Fire the current step and advance
    pub fn tick(&mut self) -> StepOutcome {
        let step = self.current_step;
        let index = step - 1;

        let tempo = stretch_to_steps(&self.bpm_pattern, self.steps);
        if let Some(bpm) = tempo.get(index) {
            self.bpm = *bpm;
        }

        let mut events = Vec::new();
        for (name, slot) in &self.slots {
            if slot.lifecycle == Lifecycle::Pending {
                continue;
            }
            collect_events(name, slot, step, &mut events);
        }

        let wrapped = step >= self.steps;
        if wrapped {
            self.current_step = 1;
            self.cycles_elapsed += 1;
            self.slots.retain(|_, slot| {
                !(slot.pattern.once && slot.lifecycle == Lifecycle::Playing)
            });
            for slot in self.slots.values_mut() {
                slot.lifecycle = Lifecycle::Playing;
            }
        } else {
            self.current_step += 1;
        }

        StepOutcome {
            step,
            events,
            wrapped,
            cycles_elapsed: self.cycles_elapsed,
            bpm: self.bpm,
        }
    }
}

fn collect_events(name: &str, slot: &Slot, step: usize, events: &mut Vec<StepEvent>) {
    let index = step - 1;
    let pattern = &slot.pattern;
    let grid = &slot.grid;

    if let Some(clip) = &pattern.clip {
        for _ in grid.triggers.iter().filter(|s| **s == step) {
            events.push(StepEvent::Trigger {
                name: name.to_string(),
                clip: clip.clone(),
                gain: pattern.gain,
            });
        }
    }

    if let (Some(schedule), Some(Some(note))) = (&pattern.notes, grid.notes.get(index)) {
        if note.is_finite() {
            let velocity = grid.velocity.get(index).copied().unwrap_or(DEFAULT_VELOCITY);
            let duration = grid.duration.get(index).copied().unwrap_or(DEFAULT_DURATION_MS);
            let velocity = midi_byte(velocity);
            let duration = Duration::from_secs_f64(duration.max(0.0) / 1000.0);
            let intervals = std::iter::once(0.0).chain(pattern.chord_intervals.iter().copied());
            for interval in intervals {
                events.push(StepEvent::Note {
                    channel: schedule.channel,
                    note: midi_byte(note + interval),
                    velocity,
                    duration,
                });
            }
        }
    }

    if let (Some(cc), Some(Some(value))) = (&pattern.cc, grid.cc.get(index)) {
        events.push(StepEvent::Control {
            channel: cc.channel,
            controller: cc.controller,
            value: midi_byte(*value),
        });
    }

    if let (Some(pb), Some(Some(value))) = (&pattern.pitchbend, grid.pitchbend.get(index)) {
        events.push(StepEvent::PitchBend {
            channel: pb.channel,
            value: *value,
        });
    }
}

fn midi_byte(value: f64) -> u8 {
    if value.is_finite() {
        value.round().clamp(0.0, 127.0) as u8
    } else {
        0
    }
}

/// Reported when the grid wraps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopBoundary {
    pub bars_elapsed: u64,
    pub bpm: f64,
}

/// Where transport events go
#[derive(Clone, Default)]
pub struct TransportSinks {
    pub playback: Option<Arc<dyn PlaybackSink>>,
    pub midi: Option<Arc<dyn MidiSink>>,
}

impl TransportSinks {
    pub fn dispatch(&self, events: Vec<StepEvent>) {
        for event in events {
            match event {
                StepEvent::Trigger { clip, gain, .. } => {
                    if let Some(playback) = &self.playback {
                        playback.trigger(clip, gain);
                    }
                }
                StepEvent::Note {
                    channel,
                    note,
                    velocity,
                    duration,
                } => {
                    if let Some(midi) = &self.midi {
                        midi.play_note(channel, note, velocity, duration);
                    }
                }
                StepEvent::Control {
                    channel,
                    controller,
                    value,
                } => {
                    if let Some(midi) = &self.midi {
                        midi.control_change(channel, controller, value);
                    }
                }
                StepEvent::PitchBend { channel, value } => {
                    if let Some(midi) = &self.midi {
                        midi.pitch_bend(channel, value);
                    }
                }
            }
        }
    }

    fn silence(&self) {
        if let Some(playback) = &self.playback {
            playback.stop_all();
        }
        if let Some(midi) = &self.midi {
            midi.all_notes_off();
        }
    }
}

/// Commands that can be sent to the transport thread
#[derive(Debug)]
enum TransportCommand {
    Play,
    Stop,
    SetBpm(f64),
    SetBpmPattern(Vec<f64>),
    SetSteps(usize),
    Update(LivePattern),
    Remove(String),
    Shutdown,
}

/// Handle to the transport thread
pub struct Transport {
    /// Current tempo as f64 bits
    bpm: Arc<AtomicU64>,
    steps: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    command_tx: Sender<TransportCommand>,
    thread: Option<JoinHandle<()>>,
}

impl Transport {
    /// Start the transport thread. It begins in the running state.
    pub fn spawn(
        sequencer: StepSequencer,
        beats_per_bar: u32,
        sinks: TransportSinks,
        loop_tx: Sender<LoopBoundary>,
    ) -> Self {
        let bpm = Arc::new(AtomicU64::new(sequencer.bpm().to_bits()));
        let steps = Arc::new(AtomicUsize::new(sequencer.steps()));
        let running = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = bounded(256);

        let worker = TransportThread {
            sequencer,
            beats_per_bar: beats_per_bar.max(1),
            sinks,
            loop_tx,
            command_rx,
            bpm: bpm.clone(),
            steps: steps.clone(),
            running: running.clone(),
        };
        let thread = thread::spawn(move || worker.run());

        Self {
            bpm,
            steps,
            running,
            command_tx,
            thread: Some(thread),
        }
    }

    /// Shared tempo cell, readable from other threads
    pub fn bpm_cell(&self) -> Arc<AtomicU64> {
        self.bpm.clone()
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Restart from step 1
    pub fn play(&self) {
        let _ = self.command_tx.send(TransportCommand::Play);
    }

    /// Silence everything and drop all live patterns
    pub fn stop(&self) {
        let _ = self.command_tx.send(TransportCommand::Stop);
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), FacetError> {
        validate_bpm(bpm)?;
        let _ = self.command_tx.send(TransportCommand::SetBpm(bpm));
        Ok(())
    }

    pub fn set_bpm_pattern(&self, pattern: Vec<f64>) {
        let _ = self.command_tx.send(TransportCommand::SetBpmPattern(pattern));
    }

    pub fn set_steps(&self, steps: usize) -> Result<(), FacetError> {
        validate_steps(steps)?;
        let _ = self.command_tx.send(TransportCommand::SetSteps(steps));
        Ok(())
    }

    pub fn update(&self, pattern: LivePattern) {
        let _ = self.command_tx.send(TransportCommand::Update(pattern));
    }

    pub fn remove(&self, name: &str) {
        let _ = self
            .command_tx
            .send(TransportCommand::Remove(name.to_string()));
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.command_tx.send(TransportCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct TransportThread {
    sequencer: StepSequencer,
    beats_per_bar: u32,
    sinks: TransportSinks,
    loop_tx: Sender<LoopBoundary>,
    command_rx: Receiver<TransportCommand>,
    bpm: Arc<AtomicU64>,
    steps: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl TransportThread {
    fn interval(&self) -> Duration {
        let ms = tick_interval_ms(
            self.sequencer.bpm(),
            self.sequencer.steps(),
            self.beats_per_bar,
        );
        Duration::from_secs_f64(ms.max(1.0) / 1000.0)
    }

    fn run(mut self) {
        let mut interval = self.interval();
        let mut next_tick = Instant::now();

        loop {
            if self.running.load(Ordering::Relaxed) {
                let wait = next_tick.saturating_duration_since(Instant::now());
                match self.command_rx.recv_timeout(wait) {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        self.tick();
                        let current = self.interval();
                        if current != interval {
                            log::debug!("step interval now {:?}", current);
                            interval = current;
                        }
                        next_tick += interval;
                        // fell behind by more than a step: resync instead of bursting
                        let now = Instant::now();
                        if next_tick < now {
                            next_tick = now;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }

            match self.command_rx.recv() {
                Ok(cmd) => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                    if self.running.load(Ordering::Relaxed) {
                        next_tick = Instant::now();
                    }
                }
                Err(_) => break,
            }
        }
        self.sinks.silence();
    }

    fn tick(&mut self) {
        let outcome = self.sequencer.tick();
        self.bpm.store(outcome.bpm.to_bits(), Ordering::Relaxed);
        self.sinks.dispatch(outcome.events);
        if outcome.wrapped {
            let _ = self.loop_tx.send(LoopBoundary {
                bars_elapsed: outcome.cycles_elapsed,
                bpm: outcome.bpm,
            });
        }
    }

    /// Returns false on shutdown
    fn handle_command(&mut self, cmd: TransportCommand) -> bool {
        match cmd {
            TransportCommand::Play => {
                self.sequencer.rewind();
                self.running.store(true, Ordering::Relaxed);
                let _ = self.loop_tx.send(LoopBoundary {
                    bars_elapsed: self.sequencer.cycles_elapsed(),
                    bpm: self.sequencer.bpm(),
                });
                log::info!("transport playing");
            }
            TransportCommand::Stop => {
                self.sequencer.clear();
                self.sinks.silence();
                self.running.store(false, Ordering::Relaxed);
                log::info!("transport stopped");
            }
            TransportCommand::SetBpm(bpm) => {
                if self.sequencer.set_bpm(bpm).is_ok() {
                    self.bpm.store(bpm.to_bits(), Ordering::Relaxed);
                    log::info!("bpm set to {:.1}", bpm);
                }
            }
            TransportCommand::SetBpmPattern(pattern) => {
                if let Err(e) = self.sequencer.set_bpm_pattern(&pattern) {
                    log::warn!("{}", e);
                }
            }
            TransportCommand::SetSteps(steps) => {
                if self.sequencer.set_steps(steps).is_ok() {
                    self.steps.store(steps, Ordering::Relaxed);
                    log::info!("steps set to {}", steps);
                }
            }
            TransportCommand::Update(pattern) => self.sequencer.update(pattern),
            TransportCommand::Remove(name) => {
                self.sequencer.remove(&name);
            }
            TransportCommand::Shutdown => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn live(name: &str) -> LivePattern {
        let mut pattern = PatternObject::new(name, "", "");
        pattern.sequence_data = vec![0.0];
        LivePattern::from_pattern(&pattern, Some(Arc::new(Clip::new(vec![0.5], 1, 44100))))
    }

    fn fired_steps(sequencer: &mut StepSequencer, name: &str) -> Vec<usize> {
        let mut fired = Vec::new();
        for _ in 0..sequencer.steps() {
            let outcome = sequencer.tick();
            for event in outcome.events {
                if matches!(&event, StepEvent::Trigger { name: n, .. } if n == name) {
                    fired.push(outcome.step);
                }
            }
        }
        fired
    }

    #[test]
    fn test_step_mapping() {
        assert_eq!(position_to_step(0.0, 16), 1);
        assert_eq!(position_to_step(0.5, 16), 9);
        assert_eq!(position_to_step(0.999, 16), 16);
        assert_eq!(position_to_step(1.0, 16), 16);

        let mut sequencer = StepSequencer::new(120.0, 16).unwrap();
        let mut pattern = live("kick");
        pattern.sequence_data = vec![0.0, 0.5, 0.999];
        sequencer.update(pattern);
        assert_eq!(fired_steps(&mut sequencer, "kick"), vec![1, 9, 16]);
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval_ms(120.0, 16, 4), 125.0);
        assert_eq!(tick_interval_ms(60.0, 4, 1), 250.0);
    }

    #[test]
    fn test_wrap_counts_cycles() {
        let mut sequencer = StepSequencer::new(90.0, 4).unwrap();
        let wraps: Vec<bool> = (0..8).map(|_| sequencer.tick().wrapped).collect();
        assert_eq!(wraps, vec![false, false, false, true, false, false, false, true]);
        assert_eq!(sequencer.cycles_elapsed(), 2);
        assert_eq!(sequencer.current_step(), 1);
    }

    #[test]
    fn test_notes_upscale_with_gaps() {
        let mut pattern = PatternObject::new("lead", "", "");
        pattern.notes = Some(NoteSchedule {
            data: vec![60.0, 64.0],
            velocity: vec![90.0, 90.0],
            duration: vec![100.0, 100.0],
            channel: 2,
        });
        pattern.chord_intervals = vec![7.0];
        let mut sequencer = StepSequencer::new(120.0, 4).unwrap();
        sequencer.update(LivePattern::from_pattern(&pattern, None));

        let per_step: Vec<Vec<StepEvent>> = (0..4).map(|_| sequencer.tick().events).collect();
        assert_eq!(per_step[0].len(), 2);
        assert!(per_step[1].is_empty());
        assert_eq!(per_step[2].len(), 2);
        assert!(per_step[3].is_empty());
        assert_eq!(
            per_step[2][1],
            StepEvent::Note {
                channel: 2,
                note: 71,
                velocity: 90,
                duration: Duration::from_millis(100),
            }
        );
    }

    #[test]
    fn test_cc_and_pitchbend_on_grid() {
        let mut pattern = PatternObject::new("mod", "", "");
        pattern.cc = Some(ControlSchedule {
            data: vec![0.0, 127.0, 300.0, 64.4],
            controller: 70,
            channel: 1,
        });
        pattern.pitchbend = Some(PitchbendSchedule {
            data: vec![-1.0],
            channel: 1,
        });
        let mut sequencer = StepSequencer::new(120.0, 4).unwrap();
        sequencer.update(LivePattern::from_pattern(&pattern, None));

        let first = sequencer.tick().events;
        assert_eq!(first.len(), 2);
        assert!(matches!(first[1], StepEvent::PitchBend { value, .. } if value == -1.0));
        let mut events = vec![first[0].clone()];
        events.extend((0..3).flat_map(|_| sequencer.tick().events));
        let values: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                StepEvent::Control { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![0, 127, 127, 64]);
    }

    #[test]
    fn test_once_waits_for_loop_start_and_plays_one_loop() {
        let mut sequencer = StepSequencer::new(120.0, 4).unwrap();
        sequencer.tick();
        let mut pattern = live("fill");
        pattern.once = true;
        sequencer.update(pattern);

        // rest of the current loop is skipped
        assert!((0..3).all(|_| sequencer.tick().events.is_empty()));
        assert!(sequencer.contains("fill"));
        assert_eq!(fired_steps(&mut sequencer, "fill"), vec![1]);
        assert!(!sequencer.contains("fill"));
    }

    #[test]
    fn test_bpm_pattern_changes_tempo_per_step() {
        let mut sequencer = StepSequencer::new(120.0, 4).unwrap();
        sequencer.set_bpm_pattern(&[100.0, 0.0, 140.0]).unwrap();
        let tempi: Vec<f64> = (0..4).map(|_| sequencer.tick().bpm).collect();
        assert_eq!(tempi, vec![100.0, 100.0, 140.0, 140.0]);
        assert!(sequencer.set_bpm_pattern(&[-1.0]).is_err());
        assert!(sequencer.set_bpm(0.0).is_err());
    }

    #[test]
    fn test_set_steps_rebuilds_grids() {
        let mut sequencer = StepSequencer::new(120.0, 16).unwrap();
        let mut pattern = live("hat");
        pattern.sequence_data = vec![0.5];
        sequencer.update(pattern);
        sequencer.set_steps(8).unwrap();
        assert_eq!(fired_steps(&mut sequencer, "hat"), vec![5]);
        assert!(sequencer.set_steps(0).is_err());
    }

    #[derive(Default)]
    struct RecordingPlayback {
        triggers: Mutex<Vec<f32>>,
    }

    impl PlaybackSink for RecordingPlayback {
        fn trigger(&self, _clip: Arc<Clip>, gain: f32) {
            self.triggers.lock().unwrap().push(gain);
        }

        fn stop_all(&self) {}
    }

    #[derive(Default)]
    struct RecordingMidi {
        notes: Mutex<Vec<(u8, u8)>>,
    }

    impl MidiSink for RecordingMidi {
        fn play_note(&self, channel: u8, note: u8, _velocity: u8, _duration: Duration) {
            self.notes.lock().unwrap().push((channel, note));
        }
        fn control_change(&self, _channel: u8, _controller: u8, _value: u8) {}
        fn pitch_bend(&self, _channel: u8, _value: f64) {}
        fn all_notes_off(&self) {}
    }

    #[test]
    fn test_sinks_receive_dispatched_events() {
        let playback = Arc::new(RecordingPlayback::default());
        let midi = Arc::new(RecordingMidi::default());
        let sinks = TransportSinks {
            playback: Some(playback.clone()),
            midi: Some(midi.clone()),
        };
        sinks.dispatch(vec![
            StepEvent::Trigger {
                name: "a".to_string(),
                clip: Arc::new(Clip::new(vec![0.1], 1, 44100)),
                gain: 1.0,
            },
            StepEvent::Note {
                channel: 1,
                note: 60,
                velocity: 100,
                duration: Duration::from_millis(125),
            },
        ]);
        assert_eq!(*playback.triggers.lock().unwrap(), vec![1.0]);
        assert_eq!(*midi.notes.lock().unwrap(), vec![(1, 60)]);
    }

    #[test]
    fn test_transport_thread_reports_loop_boundaries() {
        let (loop_tx, loop_rx) = crossbeam_channel::unbounded();
        let sequencer = StepSequencer::new(6000.0, 2).unwrap();
        let transport = Transport::spawn(sequencer, 1, TransportSinks::default(), loop_tx);
        let Ok(boundary) = loop_rx.recv_timeout(Duration::from_secs(2)) else {
            panic!("Expected a loop boundary");
        };
        assert_eq!(boundary.bars_elapsed, 1);
        assert!(transport.is_running());
        assert!(transport.set_bpm(-5.0).is_err());
        transport.stop();
    }
}
