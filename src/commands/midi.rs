//! MIDI REPL commands

use crate::audio::midi::MidiOutputHandle;
use crate::commands::{CommandContext, CommandResult};
use colored::*;

/// Handle `midi devices` command - list available MIDI output ports
pub fn cmd_midi_devices(_args: &str, _ctx: &mut CommandContext) -> CommandResult {
    match MidiOutputHandle::list_ports() {
        Ok(ports) => {
            if ports.is_empty() {
                CommandResult::Message(
                    "No MIDI output ports found. Make sure a MIDI device or virtual port is connected."
                        .yellow()
                        .to_string(),
                )
            } else {
                let mut output = format!("{}\n", "Available MIDI Output Ports:".bold());
                for (i, port) in ports.iter().enumerate() {
                    output.push_str(&format!("  {}. {}\n", i + 1, port.cyan()));
                }
                output.push_str(&format!(
                    "\n{} {}",
                    "Use".dimmed(),
                    "midi connect <port name>".green()
                ));
                CommandResult::Message(output)
            }
        }
        Err(e) => CommandResult::Error(format!("Failed to list MIDI ports: {}", e)),
    }
}

/// Handle `midi connect <port>` command - connect to a MIDI output port
pub fn cmd_midi_connect(args: &str, ctx: &mut CommandContext) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Error(
            "Usage: midi connect <port name>\nUse 'midi devices' to see available ports"
                .to_string(),
        );
    }

    match &ctx.midi_handle {
        Some(handle) => match handle.connect(args) {
            Ok(name) => CommandResult::Message(format!("Connected to MIDI port: {}", name.green())),
            Err(e) => CommandResult::Error(format!("Failed to connect to '{}': {}", args, e)),
        },
        None => CommandResult::Error("MIDI output not initialized".to_string()),
    }
}

/// Handle `midi disconnect` command
pub fn cmd_midi_disconnect(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    match &ctx.midi_handle {
        Some(handle) => match handle.disconnect() {
            Ok(()) => CommandResult::Message("Disconnected from MIDI".to_string()),
            Err(e) => CommandResult::Error(format!("Failed to disconnect: {}", e)),
        },
        None => CommandResult::Error("MIDI output not initialized".to_string()),
    }
}

/// Handle `midi status` command - show MIDI connection status
pub fn cmd_midi_status(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    match &ctx.midi_handle {
        Some(handle) => {
            let mut output = format!("{}\n", "MIDI Status:".bold());
            match handle.connected_port() {
                Some(name) => {
                    output.push_str(&format!("  Status: {}\n", "Connected".green().bold()));
                    output.push_str(&format!("  Port: {}", name.cyan()));
                }
                None => output.push_str(&format!("  Status: {}", "Not connected".yellow())),
            }
            CommandResult::Message(output)
        }
        None => CommandResult::Error("MIDI output not initialized".to_string()),
    }
}

/// Handle `midi panic` command - send All Notes Off to all channels
pub fn cmd_midi_panic(_args: &str, ctx: &mut CommandContext) -> CommandResult {
    match &ctx.midi_handle {
        Some(handle) => match handle.panic_all() {
            Ok(()) => CommandResult::Message(
                "MIDI Panic: All Notes Off sent to all channels"
                    .yellow()
                    .to_string(),
            ),
            Err(e) => CommandResult::Error(format!("Failed to send MIDI panic: {}", e)),
        },
        None => CommandResult::Error("MIDI output not initialized".to_string()),
    }
}
