//! MIDI output
//!
//! A background thread owns the midir connection and receives commands over
//! a channel. Notes are sent with their duration; the thread keeps a queue of
//! pending note-offs and releases each one at its deadline, independent of
//! the transport's ticks.

use anyhow::{anyhow, Result};
use midir::{MidiOutput, MidiOutputConnection};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CLIENT_NAME: &str = "Facet";

/// Destination for MIDI events. Channels are 1-based, as written in patterns.
pub trait MidiSink: Send + Sync {
    /// Note-on now, note-off after `duration`
    fn play_note(&self, channel: u8, note: u8, velocity: u8, duration: Duration);
    fn control_change(&self, channel: u8, controller: u8, value: u8);
    /// `value` in -1..=1
    fn pitch_bend(&self, channel: u8, value: f64);
    fn all_notes_off(&self);
}

/// Zero-based wire channel for a 1-based pattern channel
pub fn wire_channel(channel: u8) -> u8 {
    channel.saturating_sub(1) & 0x0F
}

pub fn note_on_message(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [0x90 | wire_channel(channel), note & 0x7F, velocity & 0x7F]
}

/// Note-off with the default release velocity of 64
pub fn note_off_message(channel: u8, note: u8) -> [u8; 3] {
    [0x80 | wire_channel(channel), note & 0x7F, 64]
}

pub fn control_change_message(channel: u8, controller: u8, value: u8) -> [u8; 3] {
    [0xB0 | wire_channel(channel), controller & 0x7F, value & 0x7F]
}

/// 14-bit pitch bend, LSB first. -1 maps to 0, 0 to 8192, 1 to 16383.
pub fn pitch_bend_message(channel: u8, value: f64) -> [u8; 3] {
    let value = if value.is_finite() { value.clamp(-1.0, 1.0) } else { 0.0 };
    let raw = if value >= 0.0 {
        8192.0 + value * 8191.0
    } else {
        8192.0 + value * 8192.0
    };
    let raw = raw.round() as u16;
    [0xE0 | wire_channel(channel), (raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8]
}

/// Note-offs waiting for their deadline, earliest first
#[derive(Debug, Default)]
pub struct PendingNoteOffs {
    queue: BinaryHeap<Reverse<(Instant, u8, u8)>>,
}

impl PendingNoteOffs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, deadline: Instant, channel: u8, note: u8) {
        self.queue.push(Reverse((deadline, channel, note)));
    }

    /// Remove and return every note-off due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Vec<(u8, u8)> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, channel, note))) = self.queue.peek().copied() {
            if deadline > now {
                break;
            }
            self.queue.pop();
            due.push((channel, note));
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Commands that can be sent to the MIDI output thread
#[derive(Debug, Clone)]
pub enum MidiCommand {
    /// Connect to the first port whose name contains `port_name`
    Connect { port_name: String },
    PlayNote {
        channel: u8,
        note: u8,
        velocity: u8,
        duration: Duration,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    PitchBend { channel: u8, value: f64 },
    /// All Notes Off on every channel, dropping pending note-offs
    Panic,
    Disconnect,
    Shutdown,
}

/// Internal MIDI output handler that owns the connection
struct MidiOutputInternal {
    connection: Option<MidiOutputConnection>,
    command_rx: Receiver<MidiCommand>,
    pending: PendingNoteOffs,
}

impl MidiOutputInternal {
    fn new(command_rx: Receiver<MidiCommand>) -> Self {
        Self {
            connection: None,
            command_rx,
            pending: PendingNoteOffs::new(),
        }
    }

    fn connect(&mut self, port_name: &str) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();

        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|name| name.contains(port_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("MIDI port '{}' not found", port_name))?;

        let connection = midi_out
            .connect(port, "facet-out")
            .map_err(|e| anyhow!("could not connect: {}", e))?;
        self.connection = Some(connection);
        Ok(())
    }

    fn send(&mut self, message: &[u8]) {
        if let Some(conn) = &mut self.connection {
            if let Err(e) = conn.send(message) {
                log::warn!("MIDI send failed: {}", e);
            }
        }
    }

    fn release_due(&mut self) {
        for (channel, note) in self.pending.pop_due(Instant::now()) {
            self.send(&note_off_message(channel, note));
        }
    }

    fn panic(&mut self) {
        self.pending.clear();
        for channel in 1..=16u8 {
            self.send(&control_change_message(channel, 123, 0));
        }
    }

    fn run(&mut self) {
        loop {
            let cmd = match self.pending.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.command_rx.recv_timeout(wait) {
                        Ok(cmd) => cmd,
                        Err(RecvTimeoutError::Timeout) => {
                            self.release_due();
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.command_rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };

            match cmd {
                MidiCommand::Connect { port_name } => match self.connect(&port_name) {
                    Ok(()) => log::info!("MIDI connected to '{}'", port_name),
                    Err(e) => log::error!("MIDI connect error: {}", e),
                },
                MidiCommand::PlayNote {
                    channel,
                    note,
                    velocity,
                    duration,
                } => {
                    self.send(&note_on_message(channel, note, velocity));
                    self.pending.push(Instant::now() + duration, channel, note);
                }
                MidiCommand::ControlChange {
                    channel,
                    controller,
                    value,
                } => self.send(&control_change_message(channel, controller, value)),
                MidiCommand::PitchBend { channel, value } => {
                    self.send(&pitch_bend_message(channel, value))
                }
                MidiCommand::Panic => self.panic(),
                MidiCommand::Disconnect => {
                    self.panic();
                    self.connection = None;
                }
                MidiCommand::Shutdown => {
                    self.panic();
                    break;
                }
            }
            self.release_due();
        }
    }
}

/// Thread-safe handle to the MIDI output
pub struct MidiOutputHandle {
    command_tx: Mutex<Sender<MidiCommand>>,
    thread: Option<JoinHandle<()>>,
    /// Name of the connected port
    port_name: Mutex<Option<String>>,
}

impl MidiOutputHandle {
    /// Create a new MIDI output handle (not connected to any port yet)
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();

        let thread = thread::Builder::new()
            .name("facet-midi".to_string())
            .spawn(move || {
                let mut internal = MidiOutputInternal::new(rx);
                internal.run();
            })?;

        Ok(Self {
            command_tx: Mutex::new(tx),
            thread: Some(thread),
            port_name: Mutex::new(None),
        })
    }

    fn send(&self, cmd: MidiCommand) -> Result<()> {
        let tx = self
            .command_tx
            .lock()
            .map_err(|_| anyhow!("MIDI command channel poisoned"))?;
        tx.send(cmd)
            .map_err(|e| anyhow!("MIDI thread is gone: {}", e))
    }

    /// List available MIDI output ports.
    /// Creating a client can fail transiently on some platforms, so this
    /// retries up to 3 times with a small delay.
    pub fn list_ports() -> Result<Vec<String>> {
        let mut last_err = None;
        for attempt in 0..3 {
            if attempt > 0 {
                thread::sleep(Duration::from_millis(100));
            }
            match MidiOutput::new(CLIENT_NAME) {
                Ok(midi_out) => {
                    let names = midi_out
                        .ports()
                        .iter()
                        .filter_map(|p| midi_out.port_name(p).ok())
                        .collect();
                    return Ok(names);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(anyhow!(
            "MIDI initialization failed after 3 attempts: {:?}",
            last_err
        ))
    }

    /// Connect to a MIDI output port by name (partial match supported)
    pub fn connect(&self, port_name: &str) -> Result<String> {
        let actual_name = Self::list_ports()?
            .into_iter()
            .find(|name| name.contains(port_name))
            .ok_or_else(|| anyhow!("MIDI port '{}' not found", port_name))?;

        self.send(MidiCommand::Connect {
            port_name: port_name.to_string(),
        })?;
        if let Ok(mut stored) = self.port_name.lock() {
            *stored = Some(actual_name.clone());
        }
        Ok(actual_name)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(MidiCommand::Disconnect)?;
        if let Ok(mut stored) = self.port_name.lock() {
            *stored = None;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected_port().is_some()
    }

    pub fn connected_port(&self) -> Option<String> {
        self.port_name.lock().ok().and_then(|name| name.clone())
    }

    /// All Notes Off on every channel
    pub fn panic_all(&self) -> Result<()> {
        self.send(MidiCommand::Panic)
    }
}

impl MidiSink for MidiOutputHandle {
    fn play_note(&self, channel: u8, note: u8, velocity: u8, duration: Duration) {
        let _ = self.send(MidiCommand::PlayNote {
            channel,
            note,
            velocity,
            duration,
        });
    }

    fn control_change(&self, channel: u8, controller: u8, value: u8) {
        let _ = self.send(MidiCommand::ControlChange {
            channel,
            controller,
            value,
        });
    }

    fn pitch_bend(&self, channel: u8, value: f64) {
        let _ = self.send(MidiCommand::PitchBend { channel, value });
    }

    fn all_notes_off(&self) {
        let _ = self.send(MidiCommand::Panic);
    }
}

impl Drop for MidiOutputHandle {
    fn drop(&mut self) {
        let _ = self.send(MidiCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_one_based() {
        assert_eq!(note_on_message(1, 60, 100), [0x90, 60, 100]);
        assert_eq!(note_off_message(16, 60), [0x8F, 60, 64]);
        assert_eq!(control_change_message(2, 70, 127), [0xB1, 70, 127]);
        assert_eq!(wire_channel(0), 0);
    }

    #[test]
    fn test_pitch_bend_is_fourteen_bit() {
        assert_eq!(pitch_bend_message(1, 0.0), [0xE0, 0x00, 0x40]);
        assert_eq!(pitch_bend_message(1, -1.0), [0xE0, 0x00, 0x00]);
        assert_eq!(pitch_bend_message(1, 1.0), [0xE0, 0x7F, 0x7F]);
        assert_eq!(pitch_bend_message(1, 5.0), pitch_bend_message(1, 1.0));
        assert_eq!(pitch_bend_message(1, f64::NAN), pitch_bend_message(1, 0.0));
    }

    #[test]
    fn test_pending_note_offs_release_in_deadline_order() {
        let now = Instant::now();
        let mut pending = PendingNoteOffs::new();
        pending.push(now + Duration::from_millis(30), 1, 64);
        pending.push(now + Duration::from_millis(10), 1, 60);
        pending.push(now + Duration::from_millis(20), 2, 62);
        assert_eq!(pending.next_deadline(), Some(now + Duration::from_millis(10)));

        assert!(pending.pop_due(now).is_empty());
        assert_eq!(
            pending.pop_due(now + Duration::from_millis(20)),
            vec![(1, 60), (2, 62)]
        );
        assert_eq!(pending.len(), 1);
        pending.clear();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_handle_without_port_is_disconnected() {
        let Ok(handle) = MidiOutputHandle::new() else {
            panic!("Expected the MIDI thread to start");
        };
        assert!(!handle.is_connected());
        handle.play_note(1, 60, 100, Duration::from_millis(1));
        assert!(handle.panic_all().is_ok());
    }
}
