//! Core data types: pattern values, flattened buffers, pattern objects
//! and the tables that hold them.

pub mod buffer;
pub mod pattern;
pub mod store;
pub mod table;
pub mod value;

pub use buffer::{flatten, Buffer, MAX_BUFFER_LEN, MAX_PATTERN_LEN};
pub use pattern::{
    pattern_name, ControlSchedule, NoteSchedule, PatternObject, PitchbendSchedule, RunMode,
};
pub use store::PatternStore;
pub use table::{DestinationTable, MultConnection};
pub use value::Value;
