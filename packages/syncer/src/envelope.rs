//! Envelope Classification
//!
//! Maps a canonical extra string to one of the encrypted post envelope kinds.
//! Detection is purely structural; no cryptography happens here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extra::{canonicalize, MIN_EXTRA_LEN};

/// JSON key that marks a direct (box) envelope
pub const DIRECT_BOX_KEY: &str = "box";

/// JSON key that marks a group (sealed box) envelope
pub const GROUP_SEALED_BOX_KEY: &str = "sb";

/// Errors raised when a marker matched but the payload has the wrong shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEnvelopeError {
    #[error("Payload carries both direct and group envelope markers")]
    Ambiguous,

    #[error("Malformed direct envelope: {0}")]
    Direct(String),

    #[error("Malformed group envelope: {0}")]
    Group(String),
}

/// Envelope kind, used to key ciphertext-level deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    DirectBox,
    GroupSealedBox,
}

impl EnvelopeKind {
    /// Returns the marker key for this kind
    pub fn marker(&self) -> &'static str {
        match self {
            EnvelopeKind::DirectBox => DIRECT_BOX_KEY,
            EnvelopeKind::GroupSealedBox => GROUP_SEALED_BOX_KEY,
        }
    }

    /// Returns a short human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            EnvelopeKind::DirectBox => "direct",
            EnvelopeKind::GroupSealedBox => "group",
        }
    }
}

/// Pairwise encrypted envelope addressed to a single recipient key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectBox {
    #[serde(rename = "box")]
    pub ciphertext: String,
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp: u64,
}

/// Broadcast encrypted envelope with no recipient hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSealedBox {
    #[serde(rename = "sb")]
    pub ciphertext: String,
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp: u64,
}

/// A classified extra payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    DirectBox(DirectBox),
    GroupSealedBox(GroupSealedBox),
    Unrecognized,
}

impl Envelope {
    /// Envelope kind, `None` for [`Envelope::Unrecognized`]
    pub fn kind(&self) -> Option<EnvelopeKind> {
        match self {
            Envelope::DirectBox(_) => Some(EnvelopeKind::DirectBox),
            Envelope::GroupSealedBox(_) => Some(EnvelopeKind::GroupSealedBox),
            Envelope::Unrecognized => None,
        }
    }

    /// Ciphertext carried by the envelope, if any
    pub fn ciphertext(&self) -> Option<&str> {
        match self {
            Envelope::DirectBox(b) => Some(&b.ciphertext),
            Envelope::GroupSealedBox(sb) => Some(&sb.ciphertext),
            Envelope::Unrecognized => None,
        }
    }

    /// Timestamp carried by the envelope, if any
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Envelope::DirectBox(b) => Some(b.timestamp),
            Envelope::GroupSealedBox(sb) => Some(sb.timestamp),
            Envelope::Unrecognized => None,
        }
    }
}

/// Check whether `payload` contains `key` as a quoted JSON key
///
/// The key must be quoted and followed (after optional whitespace) by a colon,
/// so `"sb"` does not match inside `"sbx"` or inside a string value.
/// Only used for payloads that are not a complete JSON object.
pub fn has_marker(payload: &str, key: &str) -> bool {
    let quoted = format!("\"{}\"", key);
    payload.match_indices(&quoted).any(|(idx, m)| {
        payload[idx + m.len()..].trim_start().starts_with(':')
    })
}

/// Classify a canonical extra string
///
/// Markers are matched against the top-level keys of the JSON object, so a
/// marker key nested inside another value does not count. Text that is not a
/// complete JSON object falls back to [`has_marker`], which lets a truncated
/// envelope surface as malformed instead of unrecognized.
///
/// # Returns
/// The envelope variant, or an error if a marker matched but the payload does
/// not deserialize into its expected shape. Payloads matching both markers are
/// rejected as [`MalformedEnvelopeError::Ambiguous`].
pub fn classify(canonical: &str) -> Result<Envelope, MalformedEnvelopeError> {
    match serde_json::from_str::<Map<String, Value>>(canonical) {
        Ok(object) => classify_object(object),
        Err(e) => match (
            has_marker(canonical, DIRECT_BOX_KEY),
            has_marker(canonical, GROUP_SEALED_BOX_KEY),
        ) {
            (true, true) => Err(MalformedEnvelopeError::Ambiguous),
            (true, false) => Err(MalformedEnvelopeError::Direct(e.to_string())),
            (false, true) => Err(MalformedEnvelopeError::Group(e.to_string())),
            (false, false) => Ok(Envelope::Unrecognized),
        },
    }
}

fn classify_object(object: Map<String, Value>) -> Result<Envelope, MalformedEnvelopeError> {
    let is_direct = object.contains_key(DIRECT_BOX_KEY);
    let is_group = object.contains_key(GROUP_SEALED_BOX_KEY);

    match (is_direct, is_group) {
        (true, true) => Err(MalformedEnvelopeError::Ambiguous),
        (true, false) => serde_json::from_value::<DirectBox>(Value::Object(object))
            .map(Envelope::DirectBox)
            .map_err(|e| MalformedEnvelopeError::Direct(e.to_string())),
        (false, true) => serde_json::from_value::<GroupSealedBox>(Value::Object(object))
            .map(Envelope::GroupSealedBox)
            .map_err(|e| MalformedEnvelopeError::Group(e.to_string())),
        (false, false) => Ok(Envelope::Unrecognized),
    }
}

/// Run the length gate and codec, then classify
///
/// Fields that fail the length gate are [`Envelope::Unrecognized`] without
/// any marker detection.
pub fn classify_extra(raw: Option<&str>, min_len: usize) -> Result<Envelope, MalformedEnvelopeError> {
    match canonicalize(raw, min_len) {
        Some(canonical) => classify(&canonical),
        None => Ok(Envelope::Unrecognized),
    }
}

/// [`classify_extra`] with the default [`MIN_EXTRA_LEN`]
pub fn classify_raw(raw: Option<&str>) -> Result<Envelope, MalformedEnvelopeError> {
    classify_extra(raw, MIN_EXTRA_LEN)
}
