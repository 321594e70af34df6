//! Line splitting, mnemonic grammar and literal parsing.
use super::opcode::{CompareOp, EditOp};
use crate::error::ScriptError;

/// A whitespace separated word and the 1-based column it starts at.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Token<'a> {
    pub text: &'a str,
    pub column: usize,
}

#[derive(Debug)]
pub(crate) struct SourceLine<'a> {
    pub number: usize,
    pub mnemonic: Token<'a>,
    pub parameter: Option<Token<'a>>,
}

impl SourceLine<'_> {
    pub fn syntax(&self, column: usize, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.number,
            column: Some(column),
            message: message.into(),
        }
    }

    pub fn invalid_parameter(&self, token: Token, reason: impl Into<String>) -> ScriptError {
        ScriptError::InvalidParameter {
            line: self.number,
            column: token.column,
            parameter: token.text.to_string(),
            reason: reason.into(),
        }
    }

    /// The parameter of an instruction that cannot work without one.
    pub fn required_parameter(&self) -> Result<Token<'_>, ScriptError> {
        self.parameter.ok_or_else(|| {
            self.syntax(
                self.mnemonic.column + self.mnemonic.text.len(),
                format!("'{}' requires a parameter", self.mnemonic.text),
            )
        })
    }

    pub fn no_parameter(&self) -> Result<(), ScriptError> {
        match self.parameter {
            Some(token) => Err(self.syntax(
                token.column,
                format!("'{}' does not take a parameter", self.mnemonic.text),
            )),
            None => Ok(()),
        }
    }
}

/// Splits one source line into mnemonic and parameter. Blank and comment-only lines
/// yield `None`.
pub(crate) fn split_line(number: usize, raw: &str) -> Result<Option<SourceLine<'_>>, ScriptError> {
    let code = match raw.find('#') {
        Some(start) => &raw[..start],
        None => raw,
    };

    let mut tokens = code
        .split_whitespace()
        .map(|word| Token {
            text: word,
            column: word.as_ptr() as usize - raw.as_ptr() as usize + 1,
        });

    let Some(mnemonic) = tokens.next() else {
        return Ok(None);
    };
    let parameter = tokens.next();
    if let Some(extra) = tokens.next() {
        return Err(ScriptError::Syntax {
            line: number,
            column: Some(extra.column),
            message: format!("unexpected '{}' after parameter", extra.text),
        });
    }

    Ok(Some(SourceLine {
        number,
        mnemonic,
        parameter,
    }))
}

/// Parses an integer literal with an optional sign and `0x`, `0o` or `0b` prefix.
/// Underscores may separate digits.
pub fn parse_integer(text: &str) -> Option<i128> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else {
        (10, lower.as_str())
    };

    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i128::from_str_radix(&digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>()
        .ok()
        .or_else(|| parse_integer(text).map(|value| value as f64))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Width {
    /// Integer width in bytes.
    Int(usize),
    Float,
    Double,
}

impl Width {
    const COMPARATOR: [usize; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
    const EDITOR: [usize; 4] = [1, 2, 4, 8];

    fn parse(text: &str, allowed: &[usize]) -> Option<Width> {
        match text {
            "f" => Some(Width::Float),
            "d" => Some(Width::Double),
            _ => {
                let bits: usize = text.parse().ok()?;
                (bits % 8 == 0 && allowed.contains(&(bits / 8))).then_some(Width::Int(bits / 8))
            }
        }
    }

    pub fn bytes(&self) -> usize {
        match self {
            Width::Int(bytes) => *bytes,
            Width::Float => 4,
            Width::Double => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        !matches!(self, Width::Int(_))
    }
}

/// Strips the trailing `l` and parses the width in front of it.
fn width_and_endianness(text: &str, allowed: &[usize]) -> Option<(Width, bool)> {
    match text.strip_suffix('l') {
        Some(width) => Some((Width::parse(width, allowed)?, true)),
        None => Some((Width::parse(text, allowed)?, false)),
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct CompareMnemonic {
    pub op: CompareOp,
    pub signed: bool,
    pub width: Width,
    pub little_endian: bool,
}

/// Parses `{s?}{op}{width}{l?}`. `mnemonic` must already be lowercase.
pub(crate) fn comparator_mnemonic(mnemonic: &str) -> Option<CompareMnemonic> {
    let (signed, rest) = match mnemonic.strip_prefix('s') {
        Some(rest) => (true, rest),
        None => (false, mnemonic),
    };
    let (op, rest) = CompareOp::MNEMONICS
        .iter()
        .find_map(|(name, op)| rest.strip_prefix(name).map(|rest| (*op, rest)))?;
    let (width, little_endian) = width_and_endianness(rest, &Width::COMPARATOR)?;

    Some(CompareMnemonic {
        op,
        signed,
        width,
        little_endian,
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum EditMnemonic {
    Single(EditOp),
    Wide {
        op: EditOp,
        width: Width,
        little_endian: bool,
    },
}

/// Parses an editor mnemonic. `mnemonic` must already be lowercase.
pub(crate) fn editor_mnemonic(mnemonic: &str) -> Option<EditMnemonic> {
    if let Some((_, op)) = EditOp::SINGLE_SLOT.iter().find(|(name, _)| *name == mnemonic) {
        return Some(EditMnemonic::Single(*op));
    }

    let (op, rest) = EditOp::MNEMONICS
        .iter()
        .find_map(|(name, op)| mnemonic.strip_prefix(name).map(|rest| (*op, rest)))?;
    let (width, little_endian) = width_and_endianness(rest, &Width::EDITOR)?;
    let op = if width.is_float() { op.to_float() } else { op };

    Some(EditMnemonic::Wide {
        op,
        width,
        little_endian,
    })
}

/// Encodes a numeric parameter big-endian in `width` bytes.
pub(crate) fn encode_operand(
    line: &SourceLine,
    token: Token,
    width: Width,
    signed: bool,
) -> Result<Vec<u8>, ScriptError> {
    match width {
        Width::Float | Width::Double => {
            let value = parse_float(token.text)
                .ok_or_else(|| line.invalid_parameter(token, "not a number"))?;
            if !value.is_finite() {
                return Err(line.invalid_parameter(token, "must be a finite number"));
            }
            if width == Width::Double {
                return Ok(value.to_be_bytes().to_vec());
            }

            let single = value as f32;
            if !single.is_finite() {
                return Err(line.invalid_parameter(token, "out of range for a 32-bit float"));
            }
            Ok(single.to_be_bytes().to_vec())
        }
        Width::Int(bytes) => {
            let value = parse_integer(token.text)
                .ok_or_else(|| line.invalid_parameter(token, "not an integer"))?;

            let bits = bytes as u32 * 8;
            let (min, max) = if signed {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            };
            if value < min || value > max {
                let kind = if signed { "signed" } else { "unsigned" };
                return Err(line.invalid_parameter(
                    token,
                    format!("does not fit in a {bits}-bit {kind} integer"),
                ));
            }

            Ok(value.to_be_bytes()[16 - bytes..].to_vec())
        }
    }
}

/// Parses the optional repeat count of `nop` and `ext`.
pub(crate) fn repeat_count(line: &SourceLine) -> Result<usize, ScriptError> {
    let Some(token) = line.parameter else {
        return Ok(1);
    };
    match parse_integer(token.text) {
        Some(count) if count >= 1 => {
            usize::try_from(count).map_err(|_| line.invalid_parameter(token, "count is too large"))
        }
        Some(_) => Err(line.invalid_parameter(token, "count must be at least 1")),
        None => Err(line.invalid_parameter(token, "not an integer")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_literals() {
        assert_eq!(parse_integer("100"), Some(100));
        assert_eq!(parse_integer("-0x80"), Some(-128));
        assert_eq!(parse_integer("0b1010"), Some(10));
        assert_eq!(parse_integer("0o17"), Some(15));
        assert_eq!(parse_integer("0XfF"), Some(255));
        assert_eq!(parse_integer("1_000"), Some(1000));
        assert_eq!(parse_integer("+7"), Some(7));
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("-"), None);
        assert_eq!(parse_integer("0x"), None);
        assert_eq!(parse_integer("--1"), None);
        assert_eq!(parse_integer("0b102"), None);
        assert_eq!(parse_integer("12a"), None);
    }

    #[test]
    fn comments_and_columns() {
        assert!(split_line(1, "   # only a comment").unwrap().is_none());
        assert!(split_line(1, "").unwrap().is_none());

        let line = split_line(3, "  eq16l\t0x1234 # trailing").unwrap().unwrap();
        assert_eq!(line.number, 3);
        assert_eq!(line.mnemonic.text, "eq16l");
        assert_eq!(line.mnemonic.column, 3);
        let parameter = line.parameter.unwrap();
        assert_eq!(parameter.text, "0x1234");
        assert_eq!(parameter.column, 9);

        let err = split_line(5, "eq8 1 2").unwrap_err();
        assert_eq!(
            err,
            ScriptError::Syntax {
                line: 5,
                column: Some(7),
                message: "unexpected '2' after parameter".to_string(),
            }
        );
    }

    #[test]
    fn comparator_grammar() {
        assert_eq!(
            comparator_mnemonic("sgtq24l"),
            Some(CompareMnemonic {
                op: CompareOp::Gtq,
                signed: true,
                width: Width::Int(3),
                little_endian: true,
            })
        );
        assert_eq!(comparator_mnemonic("ltd").map(|m| m.width), Some(Width::Double));
        assert_eq!(comparator_mnemonic("lt8").map(|m| m.op), Some(CompareOp::Lt));
        assert_eq!(comparator_mnemonic("eq"), None);
        assert_eq!(comparator_mnemonic("eq12"), None);
        assert_eq!(comparator_mnemonic("eq72"), None);
        assert_eq!(comparator_mnemonic("ne8"), None);
    }

    #[test]
    fn editor_grammar() {
        assert_eq!(editor_mnemonic("corrupt"), Some(EditMnemonic::Single(EditOp::Corrupt)));
        assert_eq!(editor_mnemonic("setr"), Some(EditMnemonic::Single(EditOp::SetRandom)));
        assert_eq!(
            editor_mnemonic("xnor32l"),
            Some(EditMnemonic::Wide {
                op: EditOp::Xnor,
                width: Width::Int(4),
                little_endian: true,
            })
        );
        assert_eq!(
            editor_mnemonic("smuld"),
            Some(EditMnemonic::Wide {
                op: EditOp::FloatMul,
                width: Width::Double,
                little_endian: false,
            })
        );
        // Editors only handle power-of-two widths.
        assert_eq!(editor_mnemonic("set24"), None);
        assert_eq!(editor_mnemonic("drop8"), None);
    }

    #[test]
    fn operand_range() {
        let line = split_line(1, "eq8 256").unwrap().unwrap();
        let token = line.parameter.unwrap();
        assert!(matches!(
            encode_operand(&line, token, Width::Int(1), false),
            Err(ScriptError::InvalidParameter { line: 1, column: 5, .. })
        ));
        assert_eq!(encode_operand(&line, token, Width::Int(2), false).unwrap(), [1, 0]);

        let line = split_line(1, "seq8 -128").unwrap().unwrap();
        let token = line.parameter.unwrap();
        assert_eq!(encode_operand(&line, token, Width::Int(1), true).unwrap(), [0x80]);
        assert!(encode_operand(&line, token, Width::Int(1), false).is_err());

        let line = split_line(1, "eqf 1.5").unwrap().unwrap();
        let token = line.parameter.unwrap();
        assert_eq!(
            encode_operand(&line, token, Width::Float, true).unwrap(),
            1.5f32.to_be_bytes()
        );
    }

    #[test]
    fn float_operands_must_be_finite() {
        for (text, width) in [
            ("eqf 1e300", Width::Float),
            ("eqf -1e39", Width::Float),
            ("eqd inf", Width::Double),
            ("eqd -infinity", Width::Double),
            ("eqf NaN", Width::Float),
            ("eqd nan", Width::Double),
        ] {
            let line = split_line(2, text).unwrap().unwrap();
            let token = line.parameter.unwrap();
            assert!(
                matches!(
                    encode_operand(&line, token, width, true),
                    Err(ScriptError::InvalidParameter { line: 2, column: 5, .. })
                ),
                "{text} should be rejected"
            );
        }

        let line = split_line(1, "eqd 1e300").unwrap().unwrap();
        let token = line.parameter.unwrap();
        assert_eq!(
            encode_operand(&line, token, Width::Double, true).unwrap(),
            1e300f64.to_be_bytes()
        );
    }
}
