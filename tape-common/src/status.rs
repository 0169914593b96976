use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Playback status shown to viewers.
///
/// Serialized as its on-screen label; `Playing` is the empty label so the
/// viewer's OSD clears while the tape runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    NoTape,
    Downloading,
    Ready,
    Starting,
    Playing,
    Paused,
    Seeking,
    SeekForward,
    SeekBack,
    LiveFeed,
    Finished,
    Error,
}

const ALL: [PlaybackStatus; 12] = [
    PlaybackStatus::NoTape,
    PlaybackStatus::Downloading,
    PlaybackStatus::Ready,
    PlaybackStatus::Starting,
    PlaybackStatus::Playing,
    PlaybackStatus::Paused,
    PlaybackStatus::Seeking,
    PlaybackStatus::SeekForward,
    PlaybackStatus::SeekBack,
    PlaybackStatus::LiveFeed,
    PlaybackStatus::Finished,
    PlaybackStatus::Error,
];

impl PlaybackStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "",
            PlaybackStatus::NoTape => "█ NO TAPE",
            PlaybackStatus::Starting => "⏵ PLAY",
            PlaybackStatus::Paused => "▊ PAUSE",
            PlaybackStatus::Ready => "⏯ TAPE READY",
            PlaybackStatus::Seeking => "⏩ SEEK",
            PlaybackStatus::SeekForward => "⏭ FWD",
            PlaybackStatus::SeekBack => "⏮ BACK",
            PlaybackStatus::Finished => "⏏ EJECT",
            PlaybackStatus::LiveFeed => "⏺ LIVE FEED",
            PlaybackStatus::Downloading => "⏬ DOWNLOADING",
            PlaybackStatus::Error => "! ERROR",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        ALL.into_iter().find(|status| status.label() == label)
    }

    /// Whether a subprocess is (or is about to be) feeding the ingress.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            PlaybackStatus::Starting
                | PlaybackStatus::Playing
                | PlaybackStatus::Seeking
                | PlaybackStatus::SeekForward
                | PlaybackStatus::SeekBack
        )
    }
}

#[allow(clippy::derivable_impls)]
impl Default for PlaybackStatus {
    fn default() -> Self {
        PlaybackStatus::NoTape
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Playing => f.write_str("playing"),
            other => f.write_str(other.label()),
        }
    }
}

impl Serialize for PlaybackStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for PlaybackStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        PlaybackStatus::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status label {label:?}")))
    }
}
