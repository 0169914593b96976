use serde::{Deserialize, Serialize};

use crate::time::format_ms;
use crate::PlaybackStatus;

/// What viewers see: the tape, how long it is, where it is, and what it is doing.
///
/// Field names match what the relay's viewers read (`Title`, `PositionMs`, ...).
/// The text fields are derived from the millisecond fields; mutate through
/// the setters so they never drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackState {
    pub title: String,
    pub length: String,
    pub length_ms: i64,
    pub position: String,
    pub position_ms: i64,
    pub status: PlaybackStatus,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl PlaybackState {
    pub fn new(title: String) -> Self {
        Self {
            title,
            length: String::new(),
            length_ms: 0,
            position: format_ms(0),
            position_ms: 0,
            status: PlaybackStatus::NoTape,
        }
    }

    pub fn set_length(&mut self, ms: i64) {
        self.length_ms = ms.max(0);
        self.length = format_ms(self.length_ms);
    }

    /// Set the playback offset; negative offsets clamp to zero.
    pub fn set_position(&mut self, ms: i64) {
        self.position_ms = ms.max(0);
        self.position = format_ms(self.position_ms);
    }

    /// Forget the tape entirely (title, length, position).
    pub fn eject(&mut self) {
        self.title.clear();
        self.length.clear();
        self.length_ms = 0;
        self.set_position(0);
    }
}
