//! Work and episode identifiers.
//!
//! An episode identifier is a fixed-format token:
//!
//! ```text
//! BT0000012345 001 001 01
//! └── prefix ─┘ └─ sequence, twice ┘ └ suffix
//! ```
//!
//! The prefix is `"BT"` followed by the zero-padded work id. The sequence
//! number is rendered as three zero-padded digits and appears twice. The
//! trailing two characters are carried through unchanged.

use std::fmt;

use thiserror::Error;

/// Width of a work id once zero-padded for identifiers and media URLs.
pub const WORK_ID_WIDTH: usize = 10;

/// Length of the server segment that follows an identifier in a storage key.
pub const SEGMENT_LEN: usize = 6;

const PREFIX_LEN: usize = 12;
const SUB_PREFIX_LEN: usize = 3;
const SUFFIX_LEN: usize = 2;
const SEQUENCE_DIGITS: usize = 3;
const MAX_SEQUENCE: u32 = 999;

const FIRST_PREFIX: &str = "BT";
const FIRST_SUFFIX: &str = "00100101";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Invalid work id {0:?}: expected 1 to 10 digits")]
    InvalidWorkId(String),

    #[error("Malformed episode identifier {0:?}")]
    MalformedIdentifier(String),

    #[error("Episode identifier {0} is at the last representable sequence number")]
    SequenceOverflow(String),

    #[error("Storage key does not carry a server segment for episode {0}")]
    SegmentNotFound(String),
}

/// Externally supplied numeric id of a serialized work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkId(String);

impl WorkId {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > WORK_ID_WIDTH || !raw.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(IdentifierError::InvalidWorkId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id left-padded with zeroes to [`WORK_ID_WIDTH`] digits.
    pub fn padded(&self) -> String {
        format!("{:0>width$}", self.0, width = WORK_ID_WIDTH)
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated episode identifier token.
///
/// Parsing guarantees that the embedded sequence number can be decoded, so
/// [`EpisodeId::sequence`] is infallible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EpisodeId {
    raw: String,
    sequence: u32,
}

impl EpisodeId {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        let sequence = decode_sequence(raw)
            .ok_or_else(|| IdentifierError::MalformedIdentifier(raw.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            sequence,
        })
    }

    /// The canonical seed identifier of a work: its first episode.
    pub fn first(work: &WorkId) -> Self {
        let raw = format!("{}{}{}", FIRST_PREFIX, work.padded(), FIRST_SUFFIX);
        Self { raw, sequence: 1 }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The sequence number embedded in the identifier.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The identifier of the following episode.
    pub fn next(&self) -> Result<Self, IdentifierError> {
        if self.sequence >= MAX_SEQUENCE {
            return Err(IdentifierError::SequenceOverflow(self.raw.clone()));
        }
        self.with_sequence(self.sequence + 1)
    }

    /// Re-render this identifier with another sequence number, keeping the
    /// prefix and suffix.
    pub fn with_sequence(&self, sequence: u32) -> Result<Self, IdentifierError> {
        if sequence > MAX_SEQUENCE {
            return Err(IdentifierError::SequenceOverflow(self.raw.clone()));
        }
        let prefix = &self.raw[..PREFIX_LEN];
        let suffix = &self.raw[self.raw.len() - SUFFIX_LEN..];
        let digits = format!("{:0>width$}", sequence, width = SEQUENCE_DIGITS);
        Ok(Self {
            raw: format!("{prefix}{digits}{digits}{suffix}"),
            sequence,
        })
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Build the first identifier of a work from its raw id.
pub fn first_identifier(work_id: &str) -> Result<EpisodeId, IdentifierError> {
    Ok(EpisodeId::first(&WorkId::parse(work_id)?))
}

/// Compute the identifier following `previous`.
pub fn next_identifier(previous: &str) -> Result<EpisodeId, IdentifierError> {
    EpisodeId::parse(previous)?.next()
}

/// Lenient sequence decoding used for the persisted ordering column.
///
/// Returns 0 when the identifier is malformed. Use [`EpisodeId::parse`]
/// wherever a bad identifier must not be mistaken for a real one.
pub fn sequence_number(identifier: &str) -> u32 {
    decode_sequence(identifier.trim()).unwrap_or(0)
}

/// Extract the server segment that follows `episode` inside a storage key.
pub fn server_segment(storage_key: &str, episode: &EpisodeId) -> Result<String, IdentifierError> {
    let missing = || IdentifierError::SegmentNotFound(episode.to_string());
    let start = storage_key.rfind(episode.as_str()).ok_or_else(missing)? + episode.as_str().len();
    storage_key
        .get(start..start + SEGMENT_LEN)
        .map(str::to_string)
        .ok_or_else(missing)
}

fn decode_sequence(raw: &str) -> Option<u32> {
    if !raw.is_ascii() || raw.len() <= PREFIX_LEN + SUB_PREFIX_LEN + SUFFIX_LEN {
        return None;
    }
    let digits = &raw[PREFIX_LEN + SUB_PREFIX_LEN..raw.len() - SUFFIX_LEN];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work() -> WorkId {
        WorkId::parse("12345").unwrap()
    }

    #[test]
    fn test_work_id_padding() {
        assert_eq!(work().padded(), "0000012345");
        assert_eq!(WorkId::parse("1234567890").unwrap().padded(), "1234567890");
    }

    #[test]
    fn test_work_id_rejects_bad_input() {
        assert!(WorkId::parse("").is_err());
        assert!(WorkId::parse("12345678901").is_err());
        assert!(WorkId::parse("12a45").is_err());
    }

    #[test]
    fn test_first_identifier_layout() {
        let first = EpisodeId::first(&work());
        assert_eq!(first.as_str(), "BT000001234500100101");
        assert_eq!(first.as_str().len(), 20);
        assert_eq!(first_identifier("12345").unwrap(), first);
    }

    #[test]
    fn test_first_identifier_is_episode_one() {
        let first = EpisodeId::first(&work());
        assert_eq!(first.sequence(), 1);
        assert_eq!(sequence_number(first.as_str()), 1);
        assert_eq!(EpisodeId::parse(first.as_str()).unwrap().sequence(), 1);
    }

    #[test]
    fn test_first_identifier_invalid_work() {
        assert_eq!(
            first_identifier(""),
            Err(IdentifierError::InvalidWorkId(String::new()))
        );
    }

    #[test]
    fn test_next_identifier_increments() {
        let next = next_identifier("BT000001234500100101").unwrap();
        assert_eq!(next.as_str(), "BT000001234500200201");
        assert_eq!(next.sequence(), 2);

        let next = next_identifier("BT000001234509909901").unwrap();
        assert_eq!(next.as_str(), "BT000001234510010001");
    }

    #[test]
    fn test_next_sequence_for_every_three_digit_number() {
        let first = EpisodeId::first(&work());
        for n in 0..MAX_SEQUENCE {
            let id = first.with_sequence(n).unwrap();
            let next = EpisodeId::parse(id.as_str()).unwrap().next().unwrap();
            assert_eq!(sequence_number(next.as_str()), n + 1);
            assert_eq!(next.as_str().len(), 20);
        }
    }

    #[test]
    fn test_next_at_999_overflows() {
        let last = EpisodeId::first(&work()).with_sequence(999).unwrap();
        assert!(matches!(
            last.next(),
            Err(IdentifierError::SequenceOverflow(_))
        ));
    }

    #[test]
    fn test_malformed_identifier() {
        assert!(matches!(
            next_identifier("BT0000012345ABCDEF01"),
            Err(IdentifierError::MalformedIdentifier(_))
        ));
        assert!(matches!(
            EpisodeId::parse("short"),
            Err(IdentifierError::MalformedIdentifier(_))
        ));
        assert_eq!(sequence_number("BT0000012345ABCDEF01"), 0);
        assert_eq!(sequence_number(""), 0);
    }

    #[test]
    fn test_suffix_carried_through() {
        let id = EpisodeId::parse("BT000001234500700799").unwrap();
        assert_eq!(id.next().unwrap().as_str(), "BT000001234500800899");
    }

    #[test]
    fn test_server_segment() {
        let episode = EpisodeId::parse("BT000001234500300301").unwrap();
        let key = "books/0000012345/BT000001234500300301a1b2c3_000";
        assert_eq!(server_segment(key, &episode).unwrap(), "a1b2c3");
    }

    #[test]
    fn test_server_segment_missing() {
        let episode = EpisodeId::parse("BT000001234500300301").unwrap();
        assert!(server_segment("books/other", &episode).is_err());
        assert!(server_segment("BT000001234500300301abc", &episode).is_err());
    }
}
