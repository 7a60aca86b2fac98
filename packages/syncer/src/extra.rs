//! Extra-Field Codec
//!
//! Normalizes the raw `extra` field of a transaction prefix into a canonical
//! string that the envelope classifier can inspect.
//! The node hands us the field hex-encoded; the leading sub-fields (the
//! transaction public key and the nonce/custom tag header) are stripped and the
//! remaining payload is decoded as text.

/// Raw extra fields shorter than this carry no social-post envelope
pub const MIN_EXTRA_LEN: usize = 200;

/// Sub-field tag for the transaction public key
pub const TAG_TX_PUBKEY: u8 = 0x01;

/// Sub-field tag for the extra nonce
pub const TAG_NONCE: u8 = 0x02;

/// Sub-field tag for arbitrary custom data
pub const TAG_CUSTOM: u8 = 0x7f;

/// Length of the public key that follows [`TAG_TX_PUBKEY`]
const PUBKEY_LEN: usize = 32;

/// Check whether a raw extra field is long enough to be worth parsing
///
/// # Arguments
/// * `raw` - The raw extra field as delivered by the node, if any
/// * `min_len` - Minimum number of characters (see [`MIN_EXTRA_LEN`])
pub fn passes_length_gate(raw: Option<&str>, min_len: usize) -> bool {
    matches!(raw, Some(extra) if extra.chars().count() >= min_len)
}

/// Canonicalize a raw extra field
///
/// Returns `None` when the field is absent or shorter than `min_len`; in that
/// case the transaction carries no recognizable envelope.
/// The same raw input always yields the same canonical string.
pub fn canonicalize(raw: Option<&str>, min_len: usize) -> Option<String> {
    if !passes_length_gate(raw, min_len) {
        return None;
    }
    raw.map(trim_extra)
}

/// Strip framing from an extra field and return the embedded payload text
pub fn trim_extra(raw: &str) -> String {
    let raw = raw.trim();
    let text = match decode_hex(raw) {
        Some(bytes) => String::from_utf8_lossy(strip_header(&bytes)).into_owned(),
        None => raw.to_string(),
    };
    narrow_to_object(strip_padding(&text)).to_string()
}

/// Decode `raw` when it is an even-length hex string
fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return None;
    }
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(raw).ok()
}

/// Walk the leading sub-fields and return the payload bytes
///
/// The public key is skipped. An extra nonce whose body opens a JSON object
/// carries the payload; any other nonce body (a payment id) is skipped by its
/// declared length. A custom tag ends the walk and its body is the payload.
/// Any other byte also ends the walk.
fn strip_header(bytes: &[u8]) -> &[u8] {
    let mut rest = bytes;

    loop {
        match rest.first() {
            Some(&TAG_TX_PUBKEY) if rest.len() > PUBKEY_LEN => {
                rest = &rest[1 + PUBKEY_LEN..];
            }
            Some(&TAG_NONCE) => match read_varint(&rest[1..]) {
                Some((len, consumed)) => {
                    let body = &rest[1 + consumed..];
                    if body.starts_with(b"{\"") {
                        return body;
                    }
                    match usize::try_from(len) {
                        Ok(len) if len <= body.len() => rest = &body[len..],
                        _ => return body,
                    }
                }
                None => return rest,
            },
            Some(&TAG_CUSTOM) => {
                return match read_varint(&rest[1..]) {
                    Some((_, consumed)) => &rest[1 + consumed..],
                    None => rest,
                };
            }
            _ => return rest,
        }
    }
}

/// Read an unsigned LEB128 varint, returning the value and bytes consumed
pub fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn strip_padding(text: &str) -> &str {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Narrow to the outermost JSON object, if the text contains one
///
/// The object starts at the first `{"` when there is one, so a stray `{` in
/// leftover binary does not become the start.
fn narrow_to_object(text: &str) -> &str {
    let start = text.find("{\"").or_else(|| text.find('{'));
    match (start, text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
