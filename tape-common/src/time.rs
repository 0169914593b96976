//! Conversions between milliseconds and the `MM:SS` / `HH:MM:SS` text used in
//! chat commands, snapshots and ffmpeg's `out_time` progress field.
use thiserror::Error;

/// Time text that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed time: {0:?}")]
pub struct MalformedTime(pub String);

/// Format milliseconds as `HH:MM:SS` when there is at least one hour, else `MM:SS`.
///
/// Negative input is treated as zero.
pub fn format_ms(ms: i64) -> String {
    let seconds = ms.max(0) / 1000;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Parse `MM:SS`, `HH:MM:SS` or `HH:MM:SS.ffffff` into milliseconds.
///
/// The fraction is read as microseconds (ffmpeg always prints six digits) and
/// floored to whole milliseconds.
pub fn parse_to_ms(text: &str) -> Result<i64, MalformedTime> {
    let malformed = || MalformedTime(text.to_string());
    let parts: Vec<&str> = text.split(':').collect();
    let (h, m, s, frac) = match parts.as_slice() {
        [m, s] => (None, *m, *s, None),
        [h, m, rest] => match rest.split_once('.') {
            Some((s, frac)) => (Some(*h), *m, s, Some(frac)),
            None => (Some(*h), *m, *rest, None),
        },
        _ => return Err(malformed()),
    };

    let hours = match h {
        Some(h) => parse_segment(h).ok_or_else(malformed)?,
        None => 0,
    };
    let minutes = parse_segment(m).ok_or_else(malformed)?;
    let seconds = parse_segment(s).ok_or_else(malformed)?;
    let micros = match frac {
        Some(frac) => parse_micros(frac).ok_or_else(malformed)?,
        None => 0,
    };

    hours
        .checked_mul(3600)
        .and_then(|total| total.checked_add(minutes.checked_mul(60)?))
        .and_then(|total| total.checked_add(seconds))
        .and_then(|total| total.checked_mul(1000))
        .and_then(|total| total.checked_add(micros / 1000))
        .ok_or_else(malformed)
}

/// Parse a relative offset as used by `/back` and `/fwd`.
///
/// A bare number is seconds (`"30"` is `00:30`); anything with a colon goes
/// through [`parse_to_ms`].
pub fn parse_offset(arg: &str) -> Result<i64, MalformedTime> {
    if arg.contains(':') {
        parse_to_ms(arg)
    } else {
        parse_to_ms(&format!("00:{arg}")).map_err(|_| MalformedTime(arg.to_string()))
    }
}

fn parse_segment(segment: &str) -> Option<i64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn parse_micros(frac: &str) -> Option<i64> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut digits: String = frac.chars().take(6).collect();
    while digits.len() < 6 {
        digits.push('0');
    }
    digits.parse().ok()
}
