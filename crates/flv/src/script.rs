//! Metadata number lookup.
//!
//! Seekable FLV servers advertise `duration`, `filesize` and `timeBase` as
//! AMF numbers inside the leading script tags. Rather than demuxing the whole
//! AMF object graph, the lookup scans the body for the encoded key and reads
//! the double that follows it, which is exactly what the properties of
//! interest look like on the wire: a 2-byte big-endian key length, the key
//! bytes, a type marker (0x00 for Number) and the 8-byte big-endian IEEE-754
//! value.

/// Find the number keyed by `key` inside a script tag body.
///
/// Returns `None` when the key does not occur.
pub fn metadata_number(body: &[u8], key: &str) -> Option<f64> {
    let key = key.as_bytes();
    let mut needle = Vec::with_capacity(2 + key.len());
    needle.extend_from_slice(&(key.len() as u16).to_be_bytes());
    needle.extend_from_slice(key);

    let at = body
        .windows(needle.len())
        .position(|window| window == needle)?;

    // Skip the length prefix, the key itself and the type marker byte.
    let value_at = at + needle.len() + 1;
    let raw = body.get(value_at..value_at + 8)?;

    Some(f64::from_be_bytes(raw.try_into().ok()?))
}
