//! Conversion contexts between UTF-8 and the wide-character encodings
//!
//! A [`Converter`] is bound to one (source, target) pair for its whole life.
//! It converts as many complete characters of a chunk as it can and reports
//! how many trailing bytes were left unconsumed, so the caller can carry them
//! into the next chunk.

use log::{debug, trace};

use crate::{Error, Result};

/// Longest byte sequence a chunk may leave unconsumed, plus one.
///
/// UTF-8 leaves at most 3 bytes of an incomplete character, UTF-32 at most 3
/// bytes of an incomplete unit and UTF-16 a high surrogate plus one odd byte.
pub const MAX_CARRY: usize = 4;

const REPLACEMENT: char = '\u{FFFD}';

/// Encodings a [`Converter`] can read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// UTF-8 Unicode encoding (variable length, 1-4 bytes)
    UTF8,
    /// UTF-16LE Unicode encoding (little endian)
    UTF16LE,
    /// UTF-16BE Unicode encoding (big endian)
    UTF16BE,
    /// UTF-32LE Unicode encoding (little endian)
    UTF32LE,
    /// UTF-32BE Unicode encoding (big endian)
    UTF32BE,
}

impl Encoding {
    /// The encoding of the platform's `wchar_t`
    #[cfg(windows)]
    pub const WCHAR_T: Encoding = Encoding::UTF16LE;

    /// The encoding of the platform's `wchar_t`
    #[cfg(all(not(windows), target_endian = "little"))]
    pub const WCHAR_T: Encoding = Encoding::UTF32LE;

    /// The encoding of the platform's `wchar_t`
    #[cfg(all(not(windows), target_endian = "big"))]
    pub const WCHAR_T: Encoding = Encoding::UTF32BE;

    /// Get the canonical name of this encoding
    pub fn name(self) -> &'static str {
        match self {
            Encoding::UTF8 => "UTF-8",
            Encoding::UTF16LE => "UTF-16LE",
            Encoding::UTF16BE => "UTF-16BE",
            Encoding::UTF32LE => "UTF-32LE",
            Encoding::UTF32BE => "UTF-32BE",
        }
    }

    /// Width in bytes of one code unit; `None` for UTF-8
    pub fn unit_width(self) -> Option<usize> {
        match self {
            Encoding::UTF8 => None,
            Encoding::UTF16LE | Encoding::UTF16BE => Some(2),
            Encoding::UTF32LE | Encoding::UTF32BE => Some(4),
        }
    }

    /// Check if this is a fixed-width wide encoding
    pub fn is_wide(self) -> bool {
        self.unit_width().is_some()
    }
}

/// What to do with input that is not a valid character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidPolicy {
    /// Fail the conversion
    #[default]
    Strict,
    /// Emit U+FFFD in place of each invalid sequence
    Replace,
}

/// Outcome of converting one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Conversion {
    /// Input bytes turned into output
    pub consumed: usize,
    /// Output bytes appended to the caller's buffer
    pub produced: usize,
    /// Trailing input bytes holding an incomplete character
    pub unconsumed: usize,
    /// Replacement characters emitted for invalid input
    pub replaced: usize,
}

/// Stateful conversion context for one encoding pair
#[derive(Debug)]
pub struct Converter {
    from: Encoding,
    to: Encoding,
    policy: InvalidPolicy,
    /// Absolute input offset of the next byte handed to `convert`
    position: u64,
}

impl Converter {
    /// Acquire a context converting `from` into `to`
    ///
    /// Only UTF-8 to a wide encoding and a wide encoding to UTF-8 are
    /// supported; any other pair is [`Error::UnsupportedEncoding`].
    pub fn new(from: Encoding, to: Encoding) -> Result<Self> {
        let supported = (from == Encoding::UTF8 && to.is_wide())
            || (from.is_wide() && to == Encoding::UTF8);
        if !supported {
            return Err(Error::UnsupportedEncoding {
                from: from.name(),
                to: to.name(),
            });
        }

        trace!("acquired conversion context {} -> {}", from.name(), to.name());
        Ok(Self {
            from,
            to,
            policy: InvalidPolicy::Strict,
            position: 0,
        })
    }

    /// Set how invalid input is handled
    pub fn with_policy(mut self, policy: InvalidPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get source encoding
    pub fn from_encoding(&self) -> Encoding {
        self.from
    }

    /// Get target encoding
    pub fn to_encoding(&self) -> Encoding {
        self.to
    }

    /// Input bytes consumed since the context was acquired
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Upper bound on the output produced for `input_len` input bytes
    pub fn max_output_len(&self, input_len: usize) -> usize {
        match self.to.unit_width() {
            // Each input byte yields at most one unit.
            Some(width) => input_len * width,
            // A 2-byte UTF-16 unit can turn into 3 bytes of UTF-8.
            None => input_len * 3 / 2 + REPLACEMENT.len_utf8(),
        }
    }

    /// Convert as much of `input` as forms complete characters
    ///
    /// Output is appended to `output`. Trailing bytes of an incomplete
    /// character are not consumed; pass them again at the front of the next
    /// chunk, or to [`Converter::finish`] once the input has ended.
    pub fn convert(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<Conversion> {
        let start = output.len();
        let (consumed, replaced) = match self.from {
            Encoding::UTF8 => self.decode_utf8(input, output)?,
            Encoding::UTF16LE | Encoding::UTF16BE => self.decode_utf16(input, output)?,
            Encoding::UTF32LE | Encoding::UTF32BE => self.decode_utf32(input, output)?,
        };
        self.position += consumed as u64;

        let conversion = Conversion {
            consumed,
            produced: output.len() - start,
            unconsumed: input.len() - consumed,
            replaced,
        };
        debug_assert!(conversion.unconsumed < MAX_CARRY);
        Ok(conversion)
    }

    /// Flush the bytes left over when the input ends
    ///
    /// A non-empty `tail` is an incomplete character: an error under
    /// [`InvalidPolicy::Strict`], one U+FFFD under [`InvalidPolicy::Replace`].
    pub fn finish(&mut self, tail: &[u8], output: &mut Vec<u8>) -> Result<Conversion> {
        if tail.is_empty() {
            return Ok(Conversion::default());
        }

        let start = output.len();
        self.invalid(self.position, "incomplete sequence at end of input", output)?;
        self.position += tail.len() as u64;

        Ok(Conversion {
            consumed: tail.len(),
            produced: output.len() - start,
            unconsumed: 0,
            replaced: 1,
        })
    }

    /// Convert a complete input in one call
    pub fn convert_all(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(self.max_output_len(input.len()));
        let conversion = self.convert(input, &mut output)?;
        self.finish(&input[conversion.consumed..], &mut output)?;
        Ok(output)
    }

    fn decode_utf8(&self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, usize)> {
        let mut rest = input;
        let mut replaced = 0;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.encode_str(text, output);
                    return Ok((input.len(), replaced));
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.encode_str(text, output);
                    }

                    let Some(bad_len) = e.error_len() else {
                        // Incomplete sequence at the end of the chunk.
                        return Ok((input.len() - after.len(), replaced));
                    };
                    let offset = self.position + (input.len() - after.len()) as u64;
                    self.invalid(offset, "invalid sequence", output)?;
                    replaced += 1;
                    rest = &after[bad_len..];
                }
            }
        }
    }

    fn decode_utf16(&self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, usize)> {
        let read_unit = |pair: &[u8]| match self.from {
            Encoding::UTF16BE => u16::from_be_bytes([pair[0], pair[1]]),
            _ => u16::from_le_bytes([pair[0], pair[1]]),
        };

        let mut pos = 0;
        let mut replaced = 0;
        while pos + 2 <= input.len() {
            let unit = read_unit(&input[pos..pos + 2]);
            let (decoded, len) = match unit {
                0xD800..=0xDBFF => {
                    if pos + 4 > input.len() {
                        // High surrogate waiting for its pair in the next chunk.
                        break;
                    }
                    let low = read_unit(&input[pos + 2..pos + 4]);
                    if (0xDC00..=0xDFFF).contains(&low) {
                        let scalar = 0x10000 + ((u32::from(unit) - 0xD800) << 10)
                            + (u32::from(low) - 0xDC00);
                        (char::from_u32(scalar), 4)
                    } else {
                        (None, 2)
                    }
                }
                0xDC00..=0xDFFF => (None, 2),
                _ => (char::from_u32(u32::from(unit)), 2),
            };

            match decoded {
                Some(ch) => self.encode_char(ch, output),
                None => {
                    self.invalid(self.position + pos as u64, "unpaired surrogate", output)?;
                    replaced += 1;
                }
            }
            pos += len;
        }

        Ok((pos, replaced))
    }

    fn decode_utf32(&self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, usize)> {
        let units = input.chunks_exact(4);
        let consumed = input.len() - units.remainder().len();
        let mut replaced = 0;

        for (index, unit) in units.enumerate() {
            let bytes = [unit[0], unit[1], unit[2], unit[3]];
            let scalar = match self.from {
                Encoding::UTF32BE => u32::from_be_bytes(bytes),
                _ => u32::from_le_bytes(bytes),
            };
            match char::from_u32(scalar) {
                Some(ch) => self.encode_char(ch, output),
                None => {
                    let offset = self.position + (index * 4) as u64;
                    self.invalid(offset, "code point out of range", output)?;
                    replaced += 1;
                }
            }
        }

        Ok((consumed, replaced))
    }

    fn encode_str(&self, text: &str, output: &mut Vec<u8>) {
        match self.to {
            Encoding::UTF8 => output.extend_from_slice(text.as_bytes()),
            _ => text.chars().for_each(|ch| self.encode_char(ch, output)),
        }
    }

    fn encode_char(&self, ch: char, output: &mut Vec<u8>) {
        match self.to {
            Encoding::UTF8 => {
                let mut buf = [0u8; 4];
                output.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            Encoding::UTF16LE | Encoding::UTF16BE => {
                let mut buf = [0u16; 2];
                for unit in ch.encode_utf16(&mut buf) {
                    match self.to {
                        Encoding::UTF16BE => output.extend_from_slice(&unit.to_be_bytes()),
                        _ => output.extend_from_slice(&unit.to_le_bytes()),
                    }
                }
            }
            Encoding::UTF32LE => output.extend_from_slice(&u32::from(ch).to_le_bytes()),
            Encoding::UTF32BE => output.extend_from_slice(&u32::from(ch).to_be_bytes()),
        }
    }

    fn invalid(&self, position: u64, detail: &'static str, output: &mut Vec<u8>) -> Result<()> {
        match self.policy {
            InvalidPolicy::Strict => Err(Error::InvalidInput {
                encoding: self.from.name(),
                position,
                detail,
            }),
            InvalidPolicy::Replace => {
                debug!("{} at byte {}, replaced with U+FFFD", detail, position);
                self.encode_char(REPLACEMENT, output);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf32le(text: &str) -> Vec<u8> {
        text.chars()
            .flat_map(|ch| u32::from(ch).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_utf8_to_utf32le() {
        let mut converter = Converter::new(Encoding::UTF8, Encoding::UTF32LE).unwrap();
        let output = converter.convert_all("Hé€😀".as_bytes()).unwrap();

        assert_eq!(output, utf32le("Hé€😀"));
        assert_eq!(converter.position(), "Hé€😀".len() as u64);
    }

    #[test]
    fn test_utf8_to_utf16_surrogate_pair() {
        let mut le = Converter::new(Encoding::UTF8, Encoding::UTF16LE).unwrap();
        let mut be = Converter::new(Encoding::UTF8, Encoding::UTF16BE).unwrap();

        // U+1F600 is D83D DE00 in UTF-16
        assert_eq!(le.convert_all("😀".as_bytes()).unwrap(), [0x3D, 0xD8, 0x00, 0xDE]);
        assert_eq!(be.convert_all("😀".as_bytes()).unwrap(), [0xD8, 0x3D, 0xDE, 0x00]);
    }

    #[test]
    fn test_ascii_round_trip_through_wchar_t() {
        let original: Vec<u8> = (0u8..0x80).cycle().take(1000).collect();

        let wide = Converter::new(Encoding::UTF8, Encoding::WCHAR_T)
            .unwrap()
            .convert_all(&original)
            .unwrap();
        let narrow = Converter::new(Encoding::WCHAR_T, Encoding::UTF8)
            .unwrap()
            .convert_all(&wide)
            .unwrap();

        assert_eq!(wide.len(), original.len() * Encoding::WCHAR_T.unit_width().unwrap());
        assert_eq!(narrow, original);
    }

    #[test]
    fn test_round_trip_every_wide_encoding() {
        let text = "Grüße, 世界! 🌍";
        for wide in [
            Encoding::UTF16LE,
            Encoding::UTF16BE,
            Encoding::UTF32LE,
            Encoding::UTF32BE,
        ] {
            let encoded = Converter::new(Encoding::UTF8, wide)
                .unwrap()
                .convert_all(text.as_bytes())
                .unwrap();
            let decoded = Converter::new(wide, Encoding::UTF8)
                .unwrap()
                .convert_all(&encoded)
                .unwrap();
            assert_eq!(decoded, text.as_bytes(), "{}", wide.name());
        }
    }

    #[test]
    fn test_unsupported_pairs() {
        let err = Converter::new(Encoding::UTF16LE, Encoding::UTF32BE).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedEncoding {
                from: "UTF-16LE",
                to: "UTF-32BE"
            }
        ));
        assert!(Converter::new(Encoding::UTF8, Encoding::UTF8).is_err());
    }

    #[test]
    fn test_incomplete_utf8_is_left_unconsumed() {
        let mut converter = Converter::new(Encoding::UTF8, Encoding::UTF32LE).unwrap();
        let euro = "€".as_bytes(); // E2 82 AC
        let mut output = Vec::new();

        let first = converter.convert(&[b'a', euro[0], euro[1]], &mut output).unwrap();
        assert_eq!(first.consumed, 1);
        assert_eq!(first.unconsumed, 2);
        assert_eq!(first.produced, 4);

        let second = converter.convert(&[euro[0], euro[1], euro[2], b'b'], &mut output).unwrap();
        assert_eq!(second.consumed, 4);
        assert_eq!(second.unconsumed, 0);
        assert_eq!(output, utf32le("a€b"));
    }

    #[test]
    fn test_strict_rejects_invalid_utf8_with_position() {
        let mut converter = Converter::new(Encoding::UTF8, Encoding::UTF32LE).unwrap();
        let mut output = Vec::new();
        converter.convert(b"abc", &mut output).unwrap();

        let err = converter.convert(b"de\xFFf", &mut output).unwrap_err();
        match err {
            Error::InvalidInput { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_replace_policy_substitutes_invalid_bytes() {
        let mut converter = Converter::new(Encoding::UTF8, Encoding::UTF32LE)
            .unwrap()
            .with_policy(InvalidPolicy::Replace);
        let mut output = Vec::new();

        let conversion = converter.convert(b"a\xFF\xFEb", &mut output).unwrap();
        assert_eq!(conversion.replaced, 2);
        assert_eq!(output, utf32le("a\u{FFFD}\u{FFFD}b"));
    }

    #[test]
    fn test_finish_with_truncated_tail() {
        let mut strict = Converter::new(Encoding::UTF8, Encoding::UTF32LE).unwrap();
        assert!(matches!(
            strict.convert_all(&[b'x', 0xE2, 0x82]),
            Err(Error::InvalidInput { position: 1, .. })
        ));

        let mut lossy = Converter::new(Encoding::UTF8, Encoding::UTF32LE)
            .unwrap()
            .with_policy(InvalidPolicy::Replace);
        let output = lossy.convert_all(&[b'x', 0xE2, 0x82]).unwrap();
        assert_eq!(output, utf32le("x\u{FFFD}"));
    }

    #[test]
    fn test_utf16_high_surrogate_carried() {
        let mut converter = Converter::new(Encoding::UTF16LE, Encoding::UTF8).unwrap();
        let mut output = Vec::new();

        // "a" then the high half of U+1F600 and an odd byte of the low half
        let conversion = converter
            .convert(&[0x61, 0x00, 0x3D, 0xD8, 0x00], &mut output)
            .unwrap();
        assert_eq!(conversion.consumed, 2);
        assert_eq!(conversion.unconsumed, 3);

        converter
            .convert(&[0x3D, 0xD8, 0x00, 0xDE], &mut output)
            .unwrap();
        assert_eq!(output, "a😀".as_bytes());
    }

    #[test]
    fn test_utf16_lone_low_surrogate_is_invalid() {
        let mut converter = Converter::new(Encoding::UTF16BE, Encoding::UTF8).unwrap();
        assert!(matches!(
            converter.convert_all(&[0x00, 0x41, 0xDC, 0x00]),
            Err(Error::InvalidInput { position: 2, .. })
        ));
    }

    #[test]
    fn test_utf32_out_of_range_scalar() {
        let mut converter = Converter::new(Encoding::UTF32BE, Encoding::UTF8)
            .unwrap()
            .with_policy(InvalidPolicy::Replace);
        let output = converter
            .convert_all(&[0x00, 0x00, 0x00, 0x41, 0x00, 0x11, 0x00, 0x00])
            .unwrap();
        assert_eq!(output, "A\u{FFFD}".as_bytes());
    }

    #[test]
    fn test_output_bound_holds_for_worst_case() {
        let mut converter = Converter::new(Encoding::UTF8, Encoding::UTF32LE).unwrap();
        let ascii = vec![b'z'; 4095];
        let bound = converter.max_output_len(ascii.len());

        let mut output = Vec::new();
        converter.convert(&ascii, &mut output).unwrap();
        assert_eq!(output.len(), bound);
    }

    #[test]
    fn test_wchar_t_is_wide() {
        assert!(Encoding::WCHAR_T.is_wide());
        assert!(!Encoding::UTF8.is_wide());
        assert_eq!(Encoding::UTF32LE.unit_width(), Some(4));
        assert_eq!(Encoding::UTF16BE.name(), "UTF-16BE");
    }
}
