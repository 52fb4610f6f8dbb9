//! Explicit text decoding for remote output

use encoding_rs::{Decoder, Encoding};

/// Look up an encoding by WHATWG label (`utf-8`, `latin1`, `gbk`, ...)
pub fn resolve_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Decode a complete byte buffer. A leading BOM is kept as text, never
/// used to switch encodings.
pub fn decode_all(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Streaming decoder; multi-byte sequences split across chunks are kept
/// until the rest arrives.
pub struct TextDecoder {
    decoder: Decoder,
}

impl TextDecoder {
    /// Decoder fixed to `encoding`; BOM sniffing is disabled
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder_without_bom_handling(),
        }
    }

    /// Decode the next chunk, holding back an incomplete trailing sequence
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.run(bytes, false)
    }

    /// Flush whatever is left; malformed trailing bytes become U+FFFD
    pub fn finish(&mut self) -> String {
        self.run(&[], true)
    }

    fn run(&mut self, bytes: &[u8], last: bool) -> String {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 16);
        let mut out = String::with_capacity(capacity);
        let _ = self.decoder.decode_to_string(bytes, &mut out, last);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multibyte_sequence() {
        let bytes = "é→ok".as_bytes();
        let mut decoder = TextDecoder::new(encoding_rs::UTF_8);
        let mut text = decoder.decode(&bytes[..1]);
        text.push_str(&decoder.decode(&bytes[1..3]));
        text.push_str(&decoder.decode(&bytes[3..]));
        text.push_str(&decoder.finish());
        assert_eq!(text, "é→ok");
    }

    #[test]
    fn test_latin1_output() {
        let encoding = resolve_encoding("latin1").unwrap();
        let mut decoder = TextDecoder::new(encoding);
        assert_eq!(decoder.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }

    #[test]
    fn test_bom_does_not_override_configured_encoding() {
        let latin1 = resolve_encoding("latin1").unwrap();
        let bytes = [0xEF, 0xBB, 0xBF, 0x63];
        assert_eq!(decode_all(latin1, &bytes), "\u{EF}\u{BB}\u{BF}c");

        let mut decoder = TextDecoder::new(latin1);
        let mut text = decoder.decode(&bytes[..2]);
        text.push_str(&decoder.decode(&bytes[2..]));
        text.push_str(&decoder.finish());
        assert_eq!(text, "ï»¿c");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        assert_eq!(decode_all(encoding_rs::UTF_8, &[0x61, 0xFF, 0x62]), "a\u{FFFD}b");
        assert!(resolve_encoding("no-such-encoding").is_none());
    }
}
