pub mod audio;
pub mod midi;
pub mod render;
pub mod transport;

pub use audio::{AudioPlayerHandle, Clip, PlaybackSink};
pub use midi::{MidiOutputHandle, MidiSink};
pub use transport::{LivePattern, LoopBoundary, StepSequencer, Transport, TransportSinks};
