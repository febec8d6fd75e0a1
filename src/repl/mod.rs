//! REPL (Read-Eval-Print Loop) for Facet
//!
//! Input lines are read on their own thread and handed to the main loop,
//! which also listens for changes to watched files. Command lines go to the
//! command registry; everything else is submitted to the engine as code.

use crate::audio::audio::{AudioPlayerHandle, PlaybackSink};
use crate::audio::midi::{MidiOutputHandle, MidiSink};
use crate::audio::render::clean_artifacts;
use crate::audio::transport::TransportSinks;
use crate::commands::{create_registry, CommandContext, CommandRegistry, CommandResult};
use crate::config::FacetConfig;
use crate::engine::{Engine, EngineHandle};
use crate::repl::watcher::{changed_paths, FileWatcher};
use anyhow::{anyhow, Result};
use colored::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use facet_core::types::RunMode;
use notify::Event;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;
use std::sync::Arc;
use std::thread;

pub mod watcher;

/// Types of events the REPL loop handles
enum ReplEvent {
    Input(Result<String, ReadlineError>),
}

/// What the main loop should do after a line
enum Flow {
    Continue,
    Exit,
}

/// Interactive REPL for Facet
pub struct Repl {
    editor: Option<DefaultEditor>,
    registry: CommandRegistry,
    ctx: CommandContext,

    // Event channels
    tx_input: Sender<ReplEvent>,
    rx_input: Receiver<ReplEvent>,
    tx_watcher: Sender<notify::Result<Event>>,
    rx_watcher: Receiver<notify::Result<Event>>,

    // File watcher
    watcher: Option<FileWatcher>,
}

impl Repl {
    /// Open the output devices and start the engine
    pub fn new(config: FacetConfig) -> Result<Self> {
        let editor = DefaultEditor::new()?;

        // playback and MIDI are optional; the engine runs without either
        let audio_handle = match AudioPlayerHandle::new() {
            Ok(handle) => Some(Arc::new(handle)),
            Err(e) => {
                log::warn!("audio output unavailable: {:#}", e);
                None
            }
        };
        let midi_handle = match MidiOutputHandle::new() {
            Ok(handle) => Some(Arc::new(handle)),
            Err(e) => {
                log::warn!("MIDI output unavailable: {:#}", e);
                None
            }
        };
        if let (Some(handle), Some(port)) = (&midi_handle, &config.midi_port) {
            match handle.connect(port) {
                Ok(name) => log::info!("connected to MIDI port {}", name),
                Err(e) => log::warn!("could not connect to MIDI port '{}': {:#}", port, e),
            }
        }

        if config.write_artifacts {
            match clean_artifacts(&config.artifact_dir) {
                Ok(0) => {}
                Ok(removed) => log::debug!("removed {} stale artifact(s)", removed),
                Err(e) => log::warn!("could not clean {}: {:#}", config.artifact_dir.display(), e),
            }
        }

        let sinks = TransportSinks {
            playback: audio_handle.map(|h| h as Arc<dyn PlaybackSink>),
            midi: midi_handle.clone().map(|h| h as Arc<dyn MidiSink>),
        };
        let engine: Arc<EngineHandle> = Arc::new(Engine::new(config, sinks)?.spawn());
        let ctx = match midi_handle {
            Some(midi) => CommandContext::new_with_midi(engine, midi),
            None => CommandContext::new(engine),
        };

        let (tx_input, rx_input) = unbounded();
        let (tx_watcher, rx_watcher) = unbounded();

        Ok(Repl {
            editor: Some(editor),
            registry: create_registry(),
            ctx,
            tx_input,
            rx_input,
            tx_watcher,
            rx_watcher,
            watcher: None,
        })
    }

    /// Start the REPL loop
    pub fn run(&mut self) -> Result<()> {
        println!(
            "{}",
            "Facet live-coding pattern language".bright_cyan().bold()
        );
        println!(
            "Type patterns like: {}, {}",
            "kick vol [1 0 1 0]".cyan(),
            "synth freq sine(1,32).scale(200,400)".cyan()
        );
        println!(
            "Type '{}' for more information, '{}' or {} to exit.\n",
            "help".bright_green(),
            "quit".bright_red(),
            "Ctrl+C".bright_red()
        );

        let mut editor = self
            .editor
            .take()
            .ok_or_else(|| anyhow!("REPL is already running"))?;
        let tx_input = self.tx_input.clone();

        thread::spawn(move || loop {
            let prompt = format!("{} ", "facet>".bright_magenta().bold());
            match editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        let _ = editor.add_history_entry(&line);
                    }
                    if tx_input.send(ReplEvent::Input(Ok(line))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx_input.send(ReplEvent::Input(Err(err)));
                    break;
                }
            }
        });

        loop {
            crossbeam_channel::select! {
                recv(self.rx_input) -> msg => match msg {
                    Ok(ReplEvent::Input(Ok(line))) => {
                        if let Flow::Exit = self.handle_line(&line) {
                            break;
                        }
                    }
                    Ok(ReplEvent::Input(Err(ReadlineError::Interrupted)))
                    | Ok(ReplEvent::Input(Err(ReadlineError::Eof))) => {
                        println!("{}", "Goodbye!".bright_cyan());
                        break;
                    }
                    Ok(ReplEvent::Input(Err(err))) => {
                        println!(
                            "{} {}",
                            "Error reading input:".bright_red().bold(),
                            err.to_string().red()
                        );
                        break;
                    }
                    Err(_) => break,
                },
                recv(self.rx_watcher) -> msg => match msg {
                    Ok(Ok(event)) => self.handle_file_event(event),
                    Ok(Err(e)) => println!("{} Watch error: {}", "Error:".red(), e),
                    Err(_) => break,
                }
            }
        }

        self.ctx.engine.stop_all();
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Flow {
        if line.is_empty() {
            return Flow::Continue;
        }
        match self.registry.execute(line, &mut self.ctx) {
            CommandResult::Success => {}
            CommandResult::Message(msg) => println!("{}", msg),
            CommandResult::Exit => {
                println!("{}", "Goodbye!".bright_cyan());
                return Flow::Exit;
            }
            CommandResult::Error(e) => {
                println!("{} {}", "Error:".bright_red().bold(), e.red());
            }
            CommandResult::Watch(path) => self.watch(&path),
            CommandResult::NotACommand => self.ctx.engine.submit(line, RunMode::Run),
        }
        Flow::Continue
    }

    fn watch(&mut self, path: &str) {
        if self.watcher.is_none() {
            match FileWatcher::new(self.tx_watcher.clone()) {
                Ok(w) => self.watcher = Some(w),
                Err(e) => {
                    println!("{} Failed to create watcher: {}", "Error:".red(), e);
                    return;
                }
            }
        }
        let Some(watcher) = &mut self.watcher else {
            return;
        };
        if let Err(e) = watcher.watch(path) {
            println!("{} Failed to watch {}: {}", "Error:".red(), path, e);
            return;
        }
        println!("Watching {} for changes...", path.bright_green());
        self.submit_file(Path::new(path));
    }

    fn handle_file_event(&mut self, event: Event) {
        for path in changed_paths(event) {
            println!("File changed: {}", path.display());
            self.submit_file(&path);
        }
    }

    /// Submit the whole file as one batch
    fn submit_file(&self, path: &Path) {
        match std::fs::read_to_string(path) {
            Ok(contents) => self.ctx.engine.submit(&contents, RunMode::Run),
            Err(e) => println!("{} Failed to read file: {}", "Error:".red(), e),
        }
    }
}

/// Convenience function to start the REPL
pub fn start(config: FacetConfig) -> Result<()> {
    let mut repl = Repl::new(config)?;
    repl.run()
}
