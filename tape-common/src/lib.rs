mod command;
mod state;
mod status;
pub mod time;

pub use command::CastCommand;
pub use state::PlaybackState;
pub use status::PlaybackStatus;
pub use time::{format_ms, parse_offset, parse_to_ms, MalformedTime};
