//! `Range` header parsing.
//!
//! Only a single `bytes=start-end` window is supported. Unlike RFC 9110
//! suffix ranges, an empty start means offset 0 (`bytes=-5` is bytes 0..=5).

use thiserror::Error;

/// A requested window before it is resolved against an object's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end; `None` reads to the end of the object.
    pub end: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("invalid range")]
    Malformed,
    #[error("multiple ranges not supported")]
    MultipleRanges,
}

pub fn parse_range(value: &str) -> Result<ByteRange, RangeParseError> {
    let ranges = value
        .strip_prefix("bytes=")
        .ok_or(RangeParseError::Malformed)?;
    if ranges.contains(',') {
        return Err(RangeParseError::MultipleRanges);
    }

    let (start, end) = ranges.split_once('-').unwrap_or((ranges, ""));
    Ok(ByteRange {
        start: parse_offset(start)?.unwrap_or(0),
        end: parse_offset(end)?,
    })
}

fn parse_offset(token: &str) -> Result<Option<u64>, RangeParseError> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(None);
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeParseError::Malformed);
    }
    token
        .parse::<u64>()
        .map(Some)
        .map_err(|_| RangeParseError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: Option<u64>) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn closed_and_open_ranges() {
        assert_eq!(parse_range("bytes=5-15"), Ok(range(5, Some(15))));
        assert_eq!(parse_range("bytes=10-"), Ok(range(10, None)));
        assert_eq!(parse_range("bytes=-5"), Ok(range(0, Some(5))));
        assert_eq!(parse_range("bytes=-"), Ok(range(0, None)));
        assert_eq!(parse_range("bytes=7"), Ok(range(7, None)));
    }

    #[test]
    fn prefix_is_required() {
        assert_eq!(parse_range("bad=0-10"), Err(RangeParseError::Malformed));
        assert_eq!(parse_range("0-10"), Err(RangeParseError::Malformed));
    }

    #[test]
    fn multiple_ranges_are_rejected() {
        assert_eq!(
            parse_range("bytes=0-1,2-3"),
            Err(RangeParseError::MultipleRanges)
        );
    }

    #[test]
    fn non_numeric_tokens_are_rejected() {
        for value in ["bytes=abc-", "bytes=1-x", "bytes=+1-2", "bytes=1-2-3", "bytes=-1-5"] {
            assert_eq!(parse_range(value), Err(RangeParseError::Malformed), "{value}");
        }
    }

    #[test]
    fn overflow_is_rejected() {
        assert_eq!(
            parse_range("bytes=99999999999999999999-"),
            Err(RangeParseError::Malformed)
        );
    }

    #[test]
    fn end_before_start_parses() {
        // Resolution against the object decides that this is invalid.
        assert_eq!(parse_range("bytes=5-2"), Ok(range(5, Some(2))));
    }
}
