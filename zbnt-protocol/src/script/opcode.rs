//! Bit layouts of the comparator and editor opcode bytes.

/// Comparison performed by the comparator unit, stored in the top nibble.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Nop = 0,
    Eq = 1,
    Gt = 2,
    Lt = 3,
    Gtq = 4,
    Ltq = 5,
    Or = 6,
    And = 7,
    Eof = 15,
}

impl CompareOp {
    fn from_nibble(nibble: u8) -> Option<CompareOp> {
        Some(match nibble {
            0 => CompareOp::Nop,
            1 => CompareOp::Eq,
            2 => CompareOp::Gt,
            3 => CompareOp::Lt,
            4 => CompareOp::Gtq,
            5 => CompareOp::Ltq,
            6 => CompareOp::Or,
            7 => CompareOp::And,
            15 => CompareOp::Eof,
            _ => return None,
        })
    }

    /// Mnemonic prefixes, longest first so that `gtq` wins over `gt`.
    pub(crate) const MNEMONICS: [(&'static str, CompareOp); 7] = [
        ("gtq", CompareOp::Gtq),
        ("ltq", CompareOp::Ltq),
        ("and", CompareOp::And),
        ("eq", CompareOp::Eq),
        ("gt", CompareOp::Gt),
        ("lt", CompareOp::Lt),
        ("or", CompareOp::Or),
    ];
}

/// Comparator opcode byte:
///
/// ```text
/// bit 7..4  comparison
/// bit 3     signed
/// bit 2     little-endian
/// bit 1     float
/// bit 0     last byte of the parameter
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ComparatorOpcode {
    pub op: CompareOp,
    pub signed: bool,
    pub little_endian: bool,
    pub float: bool,
    pub last: bool,
}

impl ComparatorOpcode {
    pub const NOP: u8 = 0x00;
    pub const EOF: u8 = ((CompareOp::Eof as u8) << 4) | 1;

    pub fn to_byte(&self) -> u8 {
        ((self.op as u8) << 4)
            | (self.signed as u8) << 3
            | (self.little_endian as u8) << 2
            | (self.float as u8) << 1
            | self.last as u8
    }

    pub fn from_byte(byte: u8) -> Option<ComparatorOpcode> {
        Some(ComparatorOpcode {
            op: CompareOp::from_nibble(byte >> 4)?,
            signed: byte & 0x08 != 0,
            little_endian: byte & 0x04 != 0,
            float: byte & 0x02 != 0,
            last: byte & 0x01 != 0,
        })
    }
}

/// Operation of the editor unit, stored in the top nibble.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EditOp {
    Nop = 0,
    SetRandom = 1,
    Drop = 2,
    Corrupt = 3,
    Set = 4,
    Xor = 5,
    Xnor = 6,
    Or = 7,
    And = 8,
    Add = 9,
    Mul = 10,
    SignedMul = 11,
    FloatAdd = 12,
    FloatMul = 13,
}

impl EditOp {
    fn from_nibble(nibble: u8) -> Option<EditOp> {
        Some(match nibble {
            0 => EditOp::Nop,
            1 => EditOp::SetRandom,
            2 => EditOp::Drop,
            3 => EditOp::Corrupt,
            4 => EditOp::Set,
            5 => EditOp::Xor,
            6 => EditOp::Xnor,
            7 => EditOp::Or,
            8 => EditOp::And,
            9 => EditOp::Add,
            10 => EditOp::Mul,
            11 => EditOp::SignedMul,
            12 => EditOp::FloatAdd,
            13 => EditOp::FloatMul,
            _ => return None,
        })
    }

    pub(crate) const SINGLE_SLOT: [(&'static str, EditOp); 4] = [
        ("nop", EditOp::Nop),
        ("setr", EditOp::SetRandom),
        ("drop", EditOp::Drop),
        ("corrupt", EditOp::Corrupt),
    ];

    pub(crate) const MNEMONICS: [(&'static str, EditOp); 8] = [
        ("xnor", EditOp::Xnor),
        ("smul", EditOp::SignedMul),
        ("set", EditOp::Set),
        ("xor", EditOp::Xor),
        ("and", EditOp::And),
        ("add", EditOp::Add),
        ("mul", EditOp::Mul),
        ("or", EditOp::Or),
    ];

    /// The floating point variant of an arithmetic operation.
    pub(crate) fn to_float(self) -> EditOp {
        match self {
            EditOp::Add => EditOp::FloatAdd,
            EditOp::Mul | EditOp::SignedMul => EditOp::FloatMul,
            other => other,
        }
    }
}

/// Bit 0 of the editor byte enables the extractor for that slot.
pub const EXTRACT_BIT: u8 = 0x01;

/// Editor opcode, sharing its byte with the extractor flag:
///
/// ```text
/// bit 7..4  operation
/// bit 3..2  log2 of the operand width in bytes
/// bit 1     little-endian
/// bit 0     extract (not part of the editor opcode)
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EditorOpcode {
    pub op: EditOp,
    pub shift: u8,
    pub little_endian: bool,
}

impl EditorOpcode {
    pub fn to_byte(&self) -> u8 {
        ((self.op as u8) << 4) | (self.shift & 0x03) << 2 | (self.little_endian as u8) << 1
    }

    pub fn from_byte(byte: u8) -> Option<EditorOpcode> {
        Some(EditorOpcode {
            op: EditOp::from_nibble(byte >> 4)?,
            shift: (byte >> 2) & 0x03,
            little_endian: byte & 0x02 != 0,
        })
    }

    /// Operand width in bytes.
    pub fn width(&self) -> usize {
        1 << self.shift
    }
}
