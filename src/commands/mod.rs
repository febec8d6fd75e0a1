//! Command registry for REPL commands
//!
//! Lines that start with a registered prefix are handled here. Anything
//! else is treated as pattern code and submitted to the engine.

pub mod general;
pub mod midi;
pub mod patterns;

use crate::audio::midi::MidiOutputHandle;
use crate::engine::EngineHandle;
use std::sync::Arc;

/// Result of executing a command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Command executed successfully, continue REPL
    Success,
    /// Command executed, show this message
    Message(String),
    /// Exit the REPL
    Exit,
    /// Not a command, submit as code
    NotACommand,
    /// Error occurred
    Error(String),
    /// Watch a file for changes
    Watch(String),
}

/// Context passed to command handlers
pub struct CommandContext {
    pub engine: Arc<EngineHandle>,
    pub midi_handle: Option<Arc<MidiOutputHandle>>,
    /// Last pointer position given with `mouse`
    pub mouse: (f64, f64),
}

impl CommandContext {
    pub fn new(engine: Arc<EngineHandle>) -> Self {
        Self {
            engine,
            midi_handle: None,
            mouse: (0.0, 0.0),
        }
    }

    /// Create a new context with MIDI support
    pub fn new_with_midi(engine: Arc<EngineHandle>, midi_handle: Arc<MidiOutputHandle>) -> Self {
        Self {
            midi_handle: Some(midi_handle),
            ..Self::new(engine)
        }
    }
}

/// A command handler function
pub type CommandHandler = fn(&str, &mut CommandContext) -> CommandResult;

/// Registry of available commands
pub struct CommandRegistry {
    /// Sorted by prefix length descending for longest-match-first lookup
    commands: Vec<(String, CommandHandler)>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Register a command with its prefix
    pub fn register(&mut self, prefix: &str, handler: CommandHandler) {
        self.commands.push((prefix.to_string(), handler));
        self.commands.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Handler and argument text for a line, if any prefix matches
    pub fn lookup<'a>(&self, input: &'a str) -> Option<(CommandHandler, &'a str)> {
        self.commands.iter().find_map(|(prefix, handler)| {
            if input == prefix {
                Some((*handler, ""))
            } else {
                input
                    .strip_prefix(prefix.as_str())
                    .filter(|rest| rest.starts_with(' '))
                    .map(|rest| (*handler, rest.trim()))
            }
        })
    }

    /// Execute a command, returning NotACommand if no match found
    pub fn execute(&self, input: &str, ctx: &mut CommandContext) -> CommandResult {
        match self.lookup(input) {
            Some((handler, args)) => handler(args, ctx),
            None => CommandResult::NotACommand,
        }
    }

    /// Get all registered command prefixes
    pub fn list_commands(&self) -> Vec<&str> {
        self.commands.iter().map(|(p, _)| p.as_str()).collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a fully populated command registry with all built-in commands
pub fn create_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    registry.register("midi devices", midi::cmd_midi_devices);
    registry.register("midi connect", midi::cmd_midi_connect);
    registry.register("midi disconnect", midi::cmd_midi_disconnect);
    registry.register("midi status", midi::cmd_midi_status);
    registry.register("midi panic", midi::cmd_midi_panic);

    registry.register("hooks mute", patterns::cmd_hooks_mute);
    registry.register("hooks unmute", patterns::cmd_hooks_unmute);
    registry.register("hooks clear", patterns::cmd_hooks_clear);
    registry.register("stop", patterns::cmd_stop);
    registry.register("play", patterns::cmd_play);
    registry.register("keep", patterns::cmd_keep);
    registry.register("once", patterns::cmd_once);
    registry.register("table", patterns::cmd_table);
    registry.register("status", patterns::cmd_status);
    registry.register("mouse", patterns::cmd_mouse);

    registry.register("tempo", general::cmd_tempo);
    registry.register("steps", general::cmd_steps);
    registry.register("help", general::cmd_help);
    registry.register("quit", general::cmd_quit);
    registry.register("exit", general::cmd_quit);
    registry.register("watch", general::cmd_watch);

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let registry = create_registry();
        let Some((_, args)) = registry.lookup("hooks clear") else {
            panic!("Expected hooks clear to be registered");
        };
        assert_eq!(args, "");
        assert!(registry.lookup("hooks").is_none());

        let Some((_, args)) = registry.lookup("midi connect IAC Driver Bus 1") else {
            panic!("Expected midi connect to be registered");
        };
        assert_eq!(args, "IAC Driver Bus 1");

        let Some((_, args)) = registry.lookup("keep  kick vol [1 0]") else {
            panic!("Expected keep to be registered");
        };
        assert_eq!(args, "kick vol [1 0]");
    }

    #[test]
    fn test_code_is_not_a_command() {
        let registry = create_registry();
        assert!(registry.lookup("kick vol [1 0 1 0]").is_none());
        // a destination that merely starts with a command word
        assert!(registry.lookup("stopper [1]").is_none());
        assert!(registry.lookup("tempo 120").is_some());
    }

    #[test]
    fn test_every_command_is_listed() {
        let registry = create_registry();
        let commands = registry.list_commands();
        for name in ["help", "quit", "exit", "tempo", "steps", "status", "table", "stop"] {
            assert!(commands.contains(&name), "missing {}", name);
        }
        assert_eq!(commands[0].len(), commands.iter().map(|c| c.len()).max().unwrap_or(0));
    }
}
