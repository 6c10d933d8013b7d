// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use strato_exceptions::{WebError, WebResult};
use strato_utils::bytes::strip_bom;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoder {
    Utf8,
    Utf16le,
    Utf16be,
    Windows1252,
}

// https://encoding.spec.whatwg.org/#names-and-labels
const ENCODING_MAP: phf::Map<&'static str, Encoder> = phf::phf_map! {
    "unicode-1-1-utf-8" => Encoder::Utf8,
    "unicode11utf8" => Encoder::Utf8,
    "unicode20utf8" => Encoder::Utf8,
    "utf-8" => Encoder::Utf8,
    "utf8" => Encoder::Utf8,
    "x-unicode20utf8" => Encoder::Utf8,
    "csunicode" => Encoder::Utf16le,
    "iso-10646-ucs-2" => Encoder::Utf16le,
    "ucs-2" => Encoder::Utf16le,
    "ucs2" => Encoder::Utf16le,
    "unicode" => Encoder::Utf16le,
    "unicodefeff" => Encoder::Utf16le,
    "utf-16" => Encoder::Utf16le,
    "utf-16le" => Encoder::Utf16le,
    "utf16le" => Encoder::Utf16le,
    "unicodefffe" => Encoder::Utf16be,
    "utf-16be" => Encoder::Utf16be,
    "utf16be" => Encoder::Utf16be,
    "ascii" => Encoder::Windows1252,
    "cp1252" => Encoder::Windows1252,
    "iso-8859-1" => Encoder::Windows1252,
    "iso8859-1" => Encoder::Windows1252,
    "l1" => Encoder::Windows1252,
    "latin1" => Encoder::Windows1252,
    "us-ascii" => Encoder::Windows1252,
    "windows-1252" => Encoder::Windows1252,
    "x-cp1252" => Encoder::Windows1252,
};

impl Encoder {
    pub fn from_label(label: &str) -> Option<Self> {
        ENCODING_MAP.get(label.trim().to_ascii_lowercase().as_str()).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoder::Utf8 => "utf-8",
            Encoder::Utf16le => "utf-16le",
            Encoder::Utf16be => "utf-16be",
            Encoder::Windows1252 => "windows-1252",
        }
    }
}

/// UTF-8 text encoder.
///
/// <https://developer.mozilla.org/en-US/docs/Web/API/TextEncoder>
#[derive(Default)]
pub struct TextEncoder;

impl TextEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encoding(&self) -> &'static str {
        "utf-8"
    }

    pub fn encode(&self, input: &str) -> Vec<u8> {
        input.as_bytes().to_vec()
    }

    /// Encodes into `destination`, returning (code units read, bytes written).
    pub fn encode_into(&self, input: &str, destination: &mut [u8]) -> (usize, usize) {
        let mut read = 0;
        let mut written = 0;
        for ch in input.chars() {
            let len = ch.len_utf8();
            if written + len > destination.len() {
                break;
            }
            ch.encode_utf8(&mut destination[written..written + len]);
            written += len;
            read += ch.len_utf16();
        }
        (read, written)
    }
}

#[derive(Debug)]
pub struct TextDecoder {
    encoder: Encoder,
    fatal: bool,
    ignore_bom: bool,
}

impl TextDecoder {
    pub fn new(label: Option<&str>) -> WebResult<Self> {
        Self::with_options(label, false, false)
    }

    pub fn with_options(label: Option<&str>, fatal: bool, ignore_bom: bool) -> WebResult<Self> {
        let label = label.unwrap_or("utf-8");
        let encoder = Encoder::from_label(label)
            .ok_or_else(|| WebError::range_error(format!("Unsupported encoding label: {}", label)))?;
        Ok(Self {
            encoder,
            fatal,
            ignore_bom,
        })
    }

    pub fn encoding(&self) -> &'static str {
        self.encoder.name()
    }

    pub fn fatal(&self) -> bool {
        self.fatal
    }

    pub fn decode(&self, bytes: &[u8]) -> WebResult<String> {
        let bytes: Vec<u8> = if self.ignore_bom {
            bytes.to_vec()
        } else {
            match self.encoder {
                Encoder::Utf8 => strip_bom(bytes.to_vec()),
                _ => bytes.to_vec(),
            }
        };

        match self.encoder {
            Encoder::Utf8 => {
                if self.fatal {
                    String::from_utf8(bytes)
                        .map_err(|_| WebError::type_error("The encoded data was not valid utf-8"))
                } else {
                    Ok(String::from_utf8_lossy(&bytes).into_owned())
                }
            },
            Encoder::Utf16le => self.decode_utf16(&bytes, u16::from_le_bytes),
            Encoder::Utf16be => self.decode_utf16(&bytes, u16::from_be_bytes),
            Encoder::Windows1252 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn decode_utf16(&self, bytes: &[u8], unit: fn([u8; 2]) -> u16) -> WebResult<String> {
        if self.fatal && bytes.len() % 2 != 0 {
            return Err(WebError::type_error("The encoded data was not valid utf-16"));
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| unit([pair[0], pair[1]]))
            .collect();
        if self.fatal {
            String::from_utf16(&units)
                .map_err(|_| WebError::type_error("The encoded data was not valid utf-16"))
        } else {
            Ok(String::from_utf16_lossy(&units))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_unicode() {
        let encoder = TextEncoder::new();
        let decoder = TextDecoder::new(None).unwrap();
        for input in ["", "ascii", "smörgåsbord", "日本語", "🦀 streams"] {
            let bytes = encoder.encode(input);
            assert_eq!(decoder.decode(&bytes).unwrap(), input);
        }
    }

    #[test]
    fn unknown_label_is_a_range_error() {
        let err = TextDecoder::new(Some("klingon")).unwrap_err();
        assert!(matches!(err, WebError::Range(_)));
    }

    #[test]
    fn fatal_utf8_rejects_invalid_input() {
        let decoder = TextDecoder::with_options(Some("utf-8"), true, false).unwrap();
        assert!(decoder.decode(&[0xFF, 0xFE, 0xFD]).is_err());

        let lossy = TextDecoder::new(Some("utf-8")).unwrap();
        assert_eq!(lossy.decode(&[0xFF]).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn utf16le_decodes() {
        let decoder = TextDecoder::new(Some("utf-16le")).unwrap();
        let bytes: Vec<u8> = "hi".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(decoder.decode(&bytes).unwrap(), "hi");
    }

    #[test]
    fn bom_is_stripped_unless_ignored() {
        let decoder = TextDecoder::new(None).unwrap();
        assert_eq!(decoder.decode(b"\xEF\xBB\xBFok").unwrap(), "ok");

        let keeping = TextDecoder::with_options(None, false, true).unwrap();
        assert_eq!(keeping.decode(b"\xEF\xBB\xBFok").unwrap(), "\u{FEFF}ok");
    }

    #[test]
    fn encode_into_reports_progress() {
        let encoder = TextEncoder::new();
        let mut buf = [0u8; 4];
        let (read, written) = encoder.encode_into("héllo", &mut buf);
        assert_eq!(written, 3); // 'h' + two-byte 'é'
        assert_eq!(read, 2);
        assert_eq!(&buf[..written], "hé".as_bytes());
    }
}
