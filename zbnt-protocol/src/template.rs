//! Frame templates for traffic generators.
//!
//! A template lists one token per frame byte. A hex pair is sent as-is, the other
//! tokens let the generator fill the byte in at transmission time:
//!
//! | token | byte                               |
//! |-------|------------------------------------|
//! | `xx`  | random                             |
//! | `nn`  | frame number, spanning bytes       |
//! | `nb`  | single byte of the frame number    |
//!
//! Whitespace between tokens is ignored and `#` starts a comment.
use crate::{encoding::PropertyValue, error::TemplateError};

/// Where the generator takes a template byte from.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ByteSource {
    Fixed = 0,
    Random = 1,
    FrameNumber = 2,
    FrameNumberByte = 3,
}

impl ByteSource {
    fn from_token(token: &str) -> Option<(u8, ByteSource)> {
        match token {
            "xx" => Some((0, ByteSource::Random)),
            "nn" => Some((0, ByteSource::FrameNumber)),
            "nb" => Some((0, ByteSource::FrameNumberByte)),
            _ => u8::from_str_radix(token, 16)
                .ok()
                .filter(|_| token.bytes().all(|b| b.is_ascii_hexdigit()))
                .map(|byte| (byte, ByteSource::Fixed)),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameTemplate {
    bytes: Vec<u8>,
    sources: Vec<u8>,
}

impl FrameTemplate {
    pub fn parse(text: &str) -> Result<FrameTemplate, TemplateError> {
        let mut template = FrameTemplate::default();

        for (index, line) in text.lines().enumerate() {
            let code = match line.find('#') {
                Some(start) => &line[..start],
                None => line,
            };

            let mut pending: Option<char> = None;
            for (offset, c) in code.char_indices() {
                if c.is_whitespace() && pending.is_none() {
                    continue;
                }
                let Some(first) = pending.take() else {
                    pending = Some(c);
                    continue;
                };

                let token: String = [first, c].iter().collect::<String>().to_ascii_lowercase();
                let (byte, source) =
                    ByteSource::from_token(&token).ok_or_else(|| TemplateError {
                        line: index + 1,
                        column: offset + 1,
                        message: format!("invalid sequence '{}'", token.to_ascii_uppercase()),
                    })?;
                template.bytes.push(byte);
                template.sources.push(source as u8);
            }

            if pending.is_some() {
                return Err(TemplateError {
                    line: index + 1,
                    column: code.len() + 1,
                    message: "incomplete byte sequence".to_string(),
                });
            }
        }

        Ok(template)
    }

    /// Bytes for the frame template property, zero where the generator fills in the value.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// One [`ByteSource`] per template byte, for the frame source property.
    pub fn sources(&self) -> &[u8] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn template_value(&self) -> PropertyValue {
        PropertyValue::Bytes(self.bytes.clone())
    }

    pub fn source_value(&self) -> PropertyValue {
        PropertyValue::Bytes(self.sources.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mixed_tokens() {
        let text = "FF ff ff ff ff ff   # broadcast\n\
                    xx xx xx xx xx xx\n\
                    08 00 nn nn nb 0a";
        let template = FrameTemplate::parse(text).unwrap();
        assert_eq!(template.len(), 18);
        assert_eq!(&template.bytes()[..6], [0xFF; 6]);
        assert_eq!(&template.bytes()[12..], [0x08, 0x00, 0, 0, 0, 0x0A]);
        assert_eq!(&template.sources()[6..12], [1; 6]);
        assert_eq!(&template.sources()[12..], [0, 0, 2, 2, 3, 0]);
    }

    #[test]
    fn whitespace_is_insignificant() {
        assert_eq!(
            FrameTemplate::parse("0a0B 0c\n\n  0d").unwrap().bytes(),
            [0x0A, 0x0B, 0x0C, 0x0D]
        );
    }

    #[test]
    fn pairs_cannot_be_split() {
        let err = FrameTemplate::parse("a b").unwrap_err();
        assert_eq!((err.line, err.column), (1, 2));
    }

    #[test]
    fn invalid_sequence() {
        let err = FrameTemplate::parse("00\n11 zz").unwrap_err();
        assert_eq!(
            err,
            TemplateError {
                line: 2,
                column: 5,
                message: "invalid sequence 'ZZ'".to_string(),
            }
        );
        // A sign is not a hex digit, even though integer parsing accepts it.
        assert!(FrameTemplate::parse("+1").is_err());
    }

    #[test]
    fn incomplete_sequence() {
        let err = FrameTemplate::parse("00 1# odd").unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert_eq!(err.message, "incomplete byte sequence");
    }
}
