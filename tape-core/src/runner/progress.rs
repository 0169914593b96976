use std::collections::HashMap;

/// One block of `key=value` fields reported by ffmpeg's `-progress` channel.
pub type ProgressFields = HashMap<String, String>;

/// What a single progress line completed, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLine {
    /// The line added a field (or was skipped); the block is still open.
    Pending,
    /// `progress=continue` closed a block.
    Report(ProgressFields),
    /// `progress=end`: the transcoder is done and will report nothing more.
    End,
}

/// Accumulates ffmpeg `-progress` output into field blocks.
///
/// ffmpeg writes a block of `key=value` lines and terminates each block with
/// `progress=continue`, or `progress=end` for the last one. Lines that are
/// blank or not exactly one `key=value` pair are skipped.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: ProgressFields,
}

impl ProgressParser {
    pub fn feed(&mut self, line: &str) -> ProgressLine {
        if line.trim().is_empty() {
            return ProgressLine::Pending;
        }
        let mut parts = line.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return ProgressLine::Pending;
        };
        let key = key.trim();
        let value = value.trim();
        self.current.insert(key.to_string(), value.to_string());

        match (key, value) {
            ("progress", "continue") => ProgressLine::Report(std::mem::take(&mut self.current)),
            ("progress", "end") => ProgressLine::End,
            _ => ProgressLine::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "frame=42
fps=25.00
bitrate=3012.4kbits/s
out_time_us=1680000
out_time=00:00:01.680000
speed=1.00x
progress=continue
";

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<ProgressLine> {
        text.lines()
            .map(|line| parser.feed(line))
            .filter(|line| *line != ProgressLine::Pending)
            .collect()
    }

    #[test]
    fn continue_closes_a_block() {
        let mut parser = ProgressParser::default();
        let lines = feed_all(&mut parser, BLOCK);
        assert_eq!(lines.len(), 1);
        let ProgressLine::Report(fields) = &lines[0] else {
            panic!("expected a report, got {:?}", lines[0]);
        };
        assert_eq!(fields["out_time"], "00:00:01.680000");
        assert_eq!(fields["frame"], "42");
        assert_eq!(fields["progress"], "continue");
    }

    #[test]
    fn blocks_do_not_leak_into_each_other() {
        let mut parser = ProgressParser::default();
        let text = format!("{BLOCK}out_time=00:00:02.000000\nprogress=continue\n");
        let lines = feed_all(&mut parser, &text);
        let ProgressLine::Report(second) = &lines[1] else {
            panic!("expected a report");
        };
        assert_eq!(second.len(), 2);
        assert_eq!(second["out_time"], "00:00:02.000000");
    }

    #[test]
    fn end_marker_stops_reporting() {
        let mut parser = ProgressParser::default();
        let lines = feed_all(&mut parser, "out_time=00:02:05.000000\nprogress=end\n");
        assert_eq!(lines, vec![ProgressLine::End]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut parser = ProgressParser::default();
        assert_eq!(parser.feed("garbage"), ProgressLine::Pending);
        assert_eq!(parser.feed("a=b=c"), ProgressLine::Pending);
        assert_eq!(parser.feed("   "), ProgressLine::Pending);
        let ProgressLine::Report(fields) = parser.feed("progress = continue") else {
            panic!("expected a report");
        };
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn not_available_is_passed_through() {
        let mut parser = ProgressParser::default();
        parser.feed("out_time=N/A");
        let ProgressLine::Report(fields) = parser.feed("progress=continue") else {
            panic!("expected a report");
        };
        assert_eq!(fields["out_time"], "N/A");
    }
}
