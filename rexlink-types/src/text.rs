//! Single-byte string fields
//!
//! The device exchanges strings as one byte per character. Decoding maps each
//! byte to the code point of the same value; encoding replaces anything
//! outside ASCII with `?`.

/// Decode a fixed or variable string field, dropping trailing NUL padding
pub fn decode(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    bytes[..end].iter().map(|b| char::from(*b)).collect()
}

/// Encode text as ASCII
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_trims_nul_padding() {
        assert_eq!(decode(b"REX-01\0\0\0\0\0\0"), "REX-01");
        assert_eq!(decode(b"\0\0"), "");
        assert_eq!(decode(b""), "");
    }

    #[test]
    fn test_decode_keeps_inner_bytes() {
        assert_eq!(decode(b"a\0b"), "a\0b");
        assert_eq!(decode(&[0xE9]), "\u{e9}");
    }

    #[test]
    fn test_encode_replaces_non_ascii() {
        assert_eq!(encode("Olá"), b"Ol?".to_vec());
        assert_eq!(encode("Hi there"), b"Hi there".to_vec());
    }
}
