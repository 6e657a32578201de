//! Wire-format string handling: NUL-terminated codepage names on the CAB
//! side, and multi-encoding detection for the embedded install manifest.

use std::io::{self, Read};

use byteorder::ReadBytesExt;

use crate::consts;

/// Reads a NUL-terminated name from a CFFILE record and decodes it as
/// Windows-1252/latin-1, which is how real CE cabinets store non-UTF names.
pub(crate) fn read_null_terminated_name<R: Read>(
    reader: &mut R,
) -> io::Result<String> {
    let mut bytes = Vec::<u8>::with_capacity(consts::MAX_STRING_SIZE);
    loop {
        let byte = reader.read_u8()?;
        if byte == 0 {
            break;
        } else if bytes.len() == consts::MAX_STRING_SIZE {
            crate::invalid_data!(
                "String longer than maximum of {} bytes",
                consts::MAX_STRING_SIZE
            );
        }
        bytes.push(byte);
    }
    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
    Ok(decoded.into_owned())
}

/// Encodes a name as latin-1/Windows-1252 for the CFFILE name field,
/// dropping characters with no representation (matching the original
/// writer's `errors="ignore"` behavior) and appending the NUL terminator.
pub(crate) fn encode_name_with_terminator(name: &str) -> Vec<u8> {
    let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(name);
    let mut out = encoded.into_owned();
    out.push(0);
    out
}

/// One of the encodings tried, in order, when decoding `_setup.xml`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XmlEncoding {
    Utf8,
    Utf16,
    Utf16Le,
    Latin1,
}

impl XmlEncoding {
    pub fn label(self) -> &'static str {
        match self {
            XmlEncoding::Utf8 => "utf-8",
            XmlEncoding::Utf16 => "utf-16",
            XmlEncoding::Utf16Le => "utf-16le",
            XmlEncoding::Latin1 => "latin-1",
        }
    }
}

/// Decodes `bytes` under every candidate encoding, in the order a caller
/// should try them: UTF-8, BOM-sniffed UTF-16 (default big-endian with no
/// BOM), strict UTF-16LE, then Latin-1/Windows-1252 as a last resort (which
/// never itself fails to decode). A byte-level decode succeeding is not
/// sufficient to pick an encoding — e.g. a no-BOM UTF-16BE document decodes
/// "successfully" under UTF-8 as NUL-laden garbage — so this returns every
/// candidate that decoded cleanly rather than committing to the first. The
/// caller must additionally confirm a candidate parses as XML and fall
/// through to the next one if it doesn't.
pub fn decode_setup_xml_candidates(bytes: &[u8]) -> Vec<(XmlEncoding, String)> {
    let mut candidates = Vec::new();
    if let Ok(text) = std::str::from_utf8(bytes) {
        candidates.push((XmlEncoding::Utf8, text.to_string()));
    }
    if let Some(text) = decode_utf16_bom_sniffed(bytes) {
        candidates.push((XmlEncoding::Utf16, text));
    }
    if let Some(text) = decode_utf16le_strict(bytes) {
        candidates.push((XmlEncoding::Utf16Le, text));
    }
    let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if !had_errors {
        candidates.push((XmlEncoding::Latin1, text.into_owned()));
    }
    candidates
}

fn decode_utf16_bom_sniffed(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 2 {
        return None;
    }
    let (encoding, rest) = if bytes[0] == 0xFF && bytes[1] == 0xFE {
        (encoding_rs::UTF_16LE, &bytes[2..])
    } else if bytes[0] == 0xFE && bytes[1] == 0xFF {
        (encoding_rs::UTF_16BE, &bytes[2..])
    } else {
        (encoding_rs::UTF_16BE, bytes)
    };
    let (text, _, had_errors) = encoding.decode(rest);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

fn decode_utf16le_strict(bytes: &[u8]) -> Option<String> {
    let rest = if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
        &bytes[2..]
    } else {
        bytes
    };
    let (text, _, had_errors) = encoding_rs::UTF_16LE.decode(rest);
    if had_errors {
        None
    } else {
        Some(text.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii_name() {
        let encoded = encode_name_with_terminator("hi.txt");
        let mut cursor = std::io::Cursor::new(encoded);
        assert_eq!(read_null_terminated_name(&mut cursor).unwrap(), "hi.txt");
    }

    #[test]
    fn utf8_is_the_first_candidate() {
        let bytes = "<root/>".as_bytes();
        let candidates = decode_setup_xml_candidates(bytes);
        assert_eq!(candidates[0].0, XmlEncoding::Utf8);
        assert_eq!(candidates[0].1, "<root/>");
    }

    #[test]
    fn utf16_with_bom_is_a_candidate() {
        let text = "<root/>";
        let mut bytes = vec![0xFFu8, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let candidates = decode_setup_xml_candidates(&bytes);
        let (enc, decoded) = candidates
            .into_iter()
            .find(|(enc, _)| *enc == XmlEncoding::Utf16)
            .unwrap();
        assert_eq!(enc, XmlEncoding::Utf16);
        assert_eq!(decoded, text);
    }

    #[test]
    fn no_bom_utf16be_decodes_cleanly_under_both_utf8_and_utf16_candidates() {
        // No-BOM UTF-16BE text is alternating NUL/ASCII bytes, which
        // std::str::from_utf8 accepts (every byte is a valid one-byte code
        // point) even though it isn't the intended encoding. Both the UTF-8
        // and the BOM-sniffed-default-big-endian UTF-16 candidates must be
        // present so a caller can reject the bogus UTF-8 "text" (it won't
        // parse as XML) and fall through to the real one.
        let text = "<root/>";
        let mut bytes = Vec::new();
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let candidates = decode_setup_xml_candidates(&bytes);
        assert_eq!(candidates[0].0, XmlEncoding::Utf8);
        assert_ne!(candidates[0].1, text);
        let (enc, decoded) = candidates
            .into_iter()
            .find(|(enc, _)| *enc == XmlEncoding::Utf16)
            .unwrap();
        assert_eq!(enc, XmlEncoding::Utf16);
        assert_eq!(decoded, text);
    }
}
