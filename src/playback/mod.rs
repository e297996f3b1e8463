// src/playback/mod.rs
// Playback Time Index - narration position <-> text block

mod cursor;
mod time_index;

pub use cursor::{CursorUpdate, PlaybackCursor};
pub use time_index::{estimate_duration_secs, DurationSource, TimeIndex, TimeSpan, MIN_BLOCK_SECS};
