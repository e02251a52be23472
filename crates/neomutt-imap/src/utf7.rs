//! Modified UTF-7 mailbox-name codec (RFC 3501 §5.1.3).
//!
//! Printable ASCII other than `&` stands for itself and `&` is written
//! `&-`. Everything else is collected into UTF-16 code units, base64
//! encoded with the `A-Za-z0-9+,` alphabet and no padding, and wrapped
//! in `&` ... `-`.
//!
//! Decoding is strict: only the form the encoder would have produced is
//! accepted, so `encode(decode(t)) == t` holds for every name that
//! decodes at all.

use base64::Engine;
use base64::alphabet;
use base64::engine::{GeneralPurpose, general_purpose};

use crate::{Error, Result};

const MUTF7: GeneralPurpose = GeneralPurpose::new(&alphabet::IMAP_MUTF7, general_purpose::NO_PAD);

const fn is_direct(c: u32) -> bool {
    c >= 0x20 && c <= 0x7e
}

fn flush_run(out: &mut String, units: &mut Vec<u16>) {
    if units.is_empty() {
        return;
    }
    let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_be_bytes()).collect();
    out.push('&');
    out.push_str(&MUTF7.encode(bytes));
    out.push('-');
    units.clear();
}

/// Encodes a UTF-8 mailbox name as modified UTF-7.
#[must_use]
pub fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut units = Vec::new();
    let mut buf = [0u16; 2];

    for c in name.chars() {
        if is_direct(c as u32) {
            flush_run(&mut out, &mut units);
            if c == '&' {
                out.push_str("&-");
            } else {
                out.push(c);
            }
        } else {
            units.extend_from_slice(c.encode_utf16(&mut buf));
        }
    }
    flush_run(&mut out, &mut units);
    out
}

/// Decodes a modified UTF-7 mailbox name to UTF-8.
///
/// # Errors
///
/// Returns [`Error::Codec`] for raw non-ASCII bytes, an unterminated or
/// empty-but-not-`&-` shift, characters outside the base64 alphabet,
/// non-canonical trailing bits, odd byte counts, unpaired surrogates,
/// printable ASCII hidden inside a shift, and two adjacent shifts.
pub fn decode(name: &str) -> Result<String> {
    let bytes = name.as_bytes();
    let mut out = String::with_capacity(name.len());
    let mut i = 0;
    // End offset of the previous base64 shift, to catch "-&" joins.
    let mut last_run_end = None;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'&' {
            if !is_direct(u32::from(b)) {
                return Err(Error::Codec(format!("raw byte 0x{b:02x} at {i}")));
            }
            out.push(char::from(b));
            i += 1;
            continue;
        }

        let start = i + 1;
        let Some(len) = bytes[start..].iter().position(|&c| c == b'-') else {
            return Err(Error::Codec(format!("unterminated shift at {i}")));
        };
        let end = start + len;

        if len == 0 {
            out.push('&');
            i = end + 1;
            continue;
        }
        if last_run_end == Some(i) {
            return Err(Error::Codec(format!("adjacent shifts at {i}")));
        }

        let raw = MUTF7
            .decode(&bytes[start..end])
            .map_err(|e| Error::Codec(format!("bad base64 at {start}: {e}")))?;
        if raw.len() % 2 != 0 {
            return Err(Error::Codec(format!("odd UTF-16 length at {start}")));
        }

        let units = raw.chunks_exact(2).map(|p| u16::from_be_bytes([p[0], p[1]]));
        for c in char::decode_utf16(units) {
            let c = c.map_err(|e| Error::Codec(format!("bad surrogate at {start}: {e}")))?;
            if is_direct(c as u32) {
                return Err(Error::Codec(format!("printable ASCII inside shift at {start}")));
            }
            out.push(c);
        }

        i = end + 1;
        last_run_end = Some(i);
    }

    Ok(out)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cyrillic() {
        let name = "Отправленные";
        let encoded = encode(name);
        assert_eq!(encoded, "&BB4EQgQ,BEAEMAQyBDsENQQ9BD0ESwQ1-");
        assert_eq!(decode(&encoded).unwrap(), name);
    }

    #[test]
    fn test_rfc_examples() {
        assert_eq!(
            encode("~peter/mail/台北/日本語"),
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-"
        );
        assert_eq!(decode("&Jjo-!").unwrap(), "☺!");
        assert_eq!(encode("Tom & Jerry"), "Tom &- Jerry");
        assert_eq!(decode("Tom &- Jerry").unwrap(), "Tom & Jerry");
    }

    #[test]
    fn test_astral_plane() {
        let encoded = encode("📧");
        assert_eq!(decode(&encoded).unwrap(), "📧");
        assert!(encoded.starts_with('&') && encoded.ends_with('-'));
    }

    #[test]
    fn test_control_chars_are_shifted() {
        assert_eq!(encode("a\tb"), "a&AAk-b");
        assert_eq!(decode("a&AAk-b").unwrap(), "a\tb");
    }

    #[test]
    fn test_rejects_non_canonical() {
        // unterminated
        assert!(decode("&U,BTFw").is_err());
        // printable ASCII in a shift ("A")
        assert!(decode("&AEE-").is_err());
        // adjacent shifts
        assert!(decode("&U,A-&U,A-").is_err());
        // lone high surrogate
        assert!(decode("&2D0-").is_err());
        // raw 8-bit
        assert!(decode("caf\u{e9}").is_err());
        // bad alphabet
        assert!(decode("&U/A-").is_err());
    }

    #[test]
    fn test_shift_followed_by_ampersand() {
        let name = "é&";
        let encoded = encode(name);
        assert_eq!(encoded, "&AOk-&-");
        assert_eq!(decode(&encoded).unwrap(), name);
    }

    proptest! {
        #[test]
        fn prop_round_trip(name in "\\PC*") {
            let encoded = encode(&name);
            prop_assert!(encoded.is_ascii());
            prop_assert_eq!(decode(&encoded).unwrap(), name);
        }

        #[test]
        fn prop_canonical(name in ".*") {
            let encoded = encode(&name);
            let decoded = decode(&encoded).unwrap();
            prop_assert_eq!(encode(&decoded), encoded);
        }
    }
}
