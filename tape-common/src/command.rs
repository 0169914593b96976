/// A chat command addressed to the cast session.
///
/// Time arguments are kept as typed by the viewer; the session parses them so
/// that a malformed time can be reported as an error state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastCommand {
    /// `/play [t]`, `/seek [t]`: start (or restart) the tape at `t`,
    /// defaulting to the current position.
    Play { at: Option<String> },
    /// `/pause`
    Pause,
    /// `/back [Δ]`: rewind by `Δ` (default 10 seconds).
    Back { by: Option<String> },
    /// `/fwd [Δ]`, `/forward [Δ]`: skip ahead by `Δ` (default 10 seconds).
    Forward { by: Option<String> },
    /// `/yt <url>`, `/youtube <url>`: download a video and play it.
    Fetch { url: String },
    /// `/stop`, `/eject`: stop and unload the tape.
    Stop,
}

impl CastCommand {
    /// Parse a chat message. Messages that are not commands, or commands that
    /// are missing a required argument, yield `None`.
    pub fn parse(message: &str) -> Option<Self> {
        let mut words = message.split_whitespace();
        let token = words.next()?;
        let arg = words.next().map(str::to_string);
        match token {
            "/play" | "/seek" => Some(CastCommand::Play { at: arg }),
            "/pause" => Some(CastCommand::Pause),
            "/back" => Some(CastCommand::Back { by: arg }),
            "/fwd" | "/forward" => Some(CastCommand::Forward { by: arg }),
            "/yt" | "/youtube" => arg.map(|url| CastCommand::Fetch { url }),
            "/stop" | "/eject" => Some(CastCommand::Stop),
            _ => None,
        }
    }

    /// Whether the command operates on a loaded tape.
    pub fn needs_tape(&self) -> bool {
        matches!(
            self,
            CastCommand::Play { .. } | CastCommand::Back { .. } | CastCommand::Forward { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_the_same_command() {
        assert_eq!(
            CastCommand::parse("/seek 01:30"),
            Some(CastCommand::Play {
                at: Some("01:30".into())
            })
        );
        assert_eq!(
            CastCommand::parse("/fwd"),
            CastCommand::parse("/forward")
        );
        assert_eq!(CastCommand::parse("/eject"), Some(CastCommand::Stop));
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(
            CastCommand::parse("  /back    5 "),
            Some(CastCommand::Back {
                by: Some("5".into())
            })
        );
    }

    #[test]
    fn chatter_and_unknown_tokens_are_ignored() {
        assert_eq!(CastCommand::parse("hello everyone"), None);
        assert_eq!(CastCommand::parse("/rewind 5"), None);
        assert_eq!(CastCommand::parse(""), None);
    }

    #[test]
    fn fetch_requires_url() {
        assert_eq!(CastCommand::parse("/yt"), None);
        assert_eq!(
            CastCommand::parse("/youtube https://youtu.be/abc"),
            Some(CastCommand::Fetch {
                url: "https://youtu.be/abc".into()
            })
        );
    }
}
