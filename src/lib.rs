//! # Facet
//!
//! Live-coding runtime for the Facet pattern language. Statements typed at
//! the REPL (or loaded from a watched file) are evaluated on isolated
//! threads by `facet-core`, rendered to clips and MIDI schedules, and
//! played by a step transport that regenerates them every loop.
//!
//! ## Modules
//!
//! - `audio`: step transport, clip rendering, cpal playback and MIDI output.
//! - `commands`: REPL command registry.
//! - `config`: `facet.toml` configuration.
//! - `cpu`: evaluation load meter and telemetry.
//! - `engine`: the generator thread tying sandbox, scheduler and transport together.
//! - `repl`: interactive front end with file watching.
//! - `sandbox`: one thread per statement, with cancellation and timeouts.
//! - `scheduler`: reruns and `every(N)` hooks.

pub mod audio;
pub mod commands;
pub mod config;
pub mod cpu;
pub mod engine;
pub mod repl;
pub mod sandbox;
pub mod scheduler;

pub use config::FacetConfig;
pub use engine::{Engine, EngineHandle, EngineStatus, ReportedError};
pub use facet_core::{FacetError, PatternObject, Value};
