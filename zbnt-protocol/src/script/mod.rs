//! Assembler for frame detector scripts.
//!
//! A script drives three per-byte execution units of a frame detector. Each unit has
//! its own section in the source text:
//!
//! ```text
//! .comp           # comparator, matches bytes of incoming frames
//! nop 12
//! eq16 0x0800     # IPv4 ethertype
//! eof
//!
//! .edit 14        # editor, rewrites bytes of matched frames
//! xor8 0xFF
//!
//! .extr 26        # extractor, copies bytes into the measurement
//! ext 4
//! ```
//!
//! Compilation runs in two passes. [`assemble`] turns the text into a list of
//! [`SlotWrite`]s, one per slot touched, and [`materialize`] lays them out into a
//! [`ScriptProgram`] of exactly `max_size` slots.
use crate::{encoding::PropertyValue, error::ScriptError};

pub mod opcode;
mod parse;

use opcode::{ComparatorOpcode, EXTRACT_BIT, EditOp, EditorOpcode};
pub use parse::parse_integer;
use parse::{
    EditMnemonic, SourceLine, comparator_mnemonic, editor_mnemonic, encode_operand, repeat_count,
    split_line,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Section {
    Comparator,
    Extractor,
    Editor,
}

impl Section {
    fn from_directive(directive: &str) -> Option<Section> {
        match directive {
            ".comp" => Some(Section::Comparator),
            ".extr" => Some(Section::Extractor),
            ".edit" => Some(Section::Editor),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A single byte-level effect of an instruction on the slot array.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotWrite {
    Comparator { slot: usize, opcode: u8, param: u8 },
    Editor { slot: usize, opcode: u8, param: u8 },
    Extract { slot: usize, enabled: bool },
}

impl SlotWrite {
    pub fn slot(&self) -> usize {
        match self {
            SlotWrite::Comparator { slot, .. }
            | SlotWrite::Editor { slot, .. }
            | SlotWrite::Extract { slot, .. } => *slot,
        }
    }
}

/// One slot of a compiled script, as stored on the device.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptSlot {
    pub comparator_opcode: u8,
    pub comparator_param: u8,
    /// Editor opcode in bits 7..1, extractor flag in bit 0.
    pub editor_opcode: u8,
    pub editor_param: u8,
}

impl ScriptSlot {
    pub fn comparator(&self) -> Option<ComparatorOpcode> {
        ComparatorOpcode::from_byte(self.comparator_opcode)
    }

    pub fn editor(&self) -> Option<EditorOpcode> {
        EditorOpcode::from_byte(self.editor_opcode)
    }

    pub fn extract(&self) -> bool {
        self.editor_opcode & EXTRACT_BIT != 0
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.comparator_opcode,
            self.comparator_param,
            self.editor_opcode,
            self.editor_param,
        ]
    }
}

/// A compiled script. Its length always equals the `max_size` it was compiled for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptProgram {
    slots: Vec<ScriptSlot>,
}

impl ScriptProgram {
    pub fn slots(&self) -> &[ScriptSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The property value sent to the device, four bytes per slot.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.slots.iter().flat_map(ScriptSlot::to_bytes).collect()
    }
}

impl From<&ScriptProgram> for PropertyValue {
    fn from(program: &ScriptProgram) -> Self {
        PropertyValue::Bytes(program.to_bytes())
    }
}

struct Assembler {
    max_size: usize,
    section: Option<Section>,
    offsets: [usize; 3],
    writes: Vec<SlotWrite>,
}

impl Assembler {
    fn directive(&mut self, line: &SourceLine) -> Result<(), ScriptError> {
        let name = line.mnemonic.text.to_ascii_lowercase();
        let section = Section::from_directive(&name).ok_or_else(|| {
            line.syntax(
                line.mnemonic.column,
                format!("unknown section '{}'", line.mnemonic.text),
            )
        })?;

        let offset = match line.parameter {
            None => 0,
            Some(token) => parse_integer(token.text)
                .and_then(|offset| usize::try_from(offset).ok())
                .ok_or_else(|| {
                    line.syntax(token.column, format!("invalid section offset '{}'", token.text))
                })?,
        };

        self.section = Some(section);
        self.offsets[section.index()] = offset;
        Ok(())
    }

    /// Claims `count` consecutive slots of the current section.
    fn reserve(&mut self, section: Section, line: &SourceLine, count: usize) -> Result<usize, ScriptError> {
        let start = self.offsets[section.index()];
        let end = start.saturating_add(count);
        if end > self.max_size {
            return Err(ScriptError::ScriptTooLarge {
                line: line.number,
                overflow: end - self.max_size,
            });
        }
        self.offsets[section.index()] = end;
        Ok(start)
    }

    fn instruction(&mut self, line: &SourceLine) -> Result<(), ScriptError> {
        let Some(section) = self.section else {
            return Err(line.syntax(line.mnemonic.column, "instruction outside of a section"));
        };
        let mnemonic = line.mnemonic.text.to_ascii_lowercase();

        match section {
            Section::Comparator => self.comparator(line, &mnemonic),
            Section::Extractor => self.extractor(line, &mnemonic),
            Section::Editor => self.editor(line, &mnemonic),
        }
    }

    fn comparator(&mut self, line: &SourceLine, mnemonic: &str) -> Result<(), ScriptError> {
        if mnemonic == "nop" {
            let count = repeat_count(line)?;
            let start = self.reserve(Section::Comparator, line, count)?;
            self.writes
                .extend((start..start + count).map(|slot| SlotWrite::Comparator {
                    slot,
                    opcode: ComparatorOpcode::NOP,
                    param: 0,
                }));
            return Ok(());
        }

        let slots: Vec<(u8, u8)> = match mnemonic {
            "eof" => {
                line.no_parameter()?;
                vec![(ComparatorOpcode::EOF, 0)]
            }
            _ => {
                let parsed = comparator_mnemonic(mnemonic).ok_or_else(|| self.unknown(line))?;
                let float = parsed.width.is_float();
                let signed = parsed.signed || float;

                let mut operand =
                    encode_operand(line, line.required_parameter()?, parsed.width, signed)?;
                if parsed.little_endian {
                    operand.reverse();
                }

                let last = operand.len() - 1;
                operand
                    .into_iter()
                    .enumerate()
                    .map(|(i, byte)| {
                        let opcode = ComparatorOpcode {
                            op: parsed.op,
                            signed,
                            little_endian: parsed.little_endian,
                            float,
                            last: i == last,
                        };
                        (opcode.to_byte(), byte)
                    })
                    .collect()
            }
        };

        let start = self.reserve(Section::Comparator, line, slots.len())?;
        self.writes.extend(
            slots
                .into_iter()
                .enumerate()
                .map(|(i, (opcode, param))| SlotWrite::Comparator {
                    slot: start + i,
                    opcode,
                    param,
                }),
        );
        Ok(())
    }

    fn extractor(&mut self, line: &SourceLine, mnemonic: &str) -> Result<(), ScriptError> {
        let enabled = match mnemonic {
            "nop" => false,
            "ext" => true,
            _ => return Err(self.unknown(line)),
        };
        let count = repeat_count(line)?;
        let start = self.reserve(Section::Extractor, line, count)?;
        self.writes
            .extend((start..start + count).map(|slot| SlotWrite::Extract { slot, enabled }));
        Ok(())
    }

    fn editor(&mut self, line: &SourceLine, mnemonic: &str) -> Result<(), ScriptError> {
        let slots: Vec<(u8, u8)> = match editor_mnemonic(mnemonic).ok_or_else(|| self.unknown(line))? {
            EditMnemonic::Single(op) => {
                line.no_parameter()?;
                let opcode = EditorOpcode {
                    op,
                    shift: 0,
                    little_endian: false,
                };
                vec![(opcode.to_byte(), 0)]
            }
            EditMnemonic::Wide {
                op,
                width,
                little_endian,
            } => {
                let token = line.required_parameter()?;
                let signed = match op {
                    EditOp::SignedMul => true,
                    EditOp::Add => token.text.starts_with('-'),
                    _ => false,
                };

                let mut operand = encode_operand(line, token, width, signed)?;
                if little_endian {
                    operand.reverse();
                }

                let opcode = EditorOpcode {
                    op,
                    shift: width.bytes().trailing_zeros() as u8,
                    little_endian,
                };
                operand
                    .into_iter()
                    .map(|byte| (opcode.to_byte(), byte))
                    .collect()
            }
        };

        let start = self.reserve(Section::Editor, line, slots.len())?;
        self.writes.extend(
            slots
                .into_iter()
                .enumerate()
                .map(|(i, (opcode, param))| SlotWrite::Editor {
                    slot: start + i,
                    opcode,
                    param,
                }),
        );
        Ok(())
    }

    fn unknown(&self, line: &SourceLine) -> ScriptError {
        line.syntax(
            line.mnemonic.column,
            format!("unknown instruction '{}'", line.mnemonic.text),
        )
    }
}

/// First pass: turns script text into the ordered list of slot writes it performs.
pub fn assemble(source: &str, max_size: usize) -> Result<Vec<SlotWrite>, ScriptError> {
    let mut assembler = Assembler {
        max_size,
        section: None,
        offsets: [0; 3],
        writes: Vec::new(),
    };

    for (index, raw) in source.lines().enumerate() {
        let Some(line) = split_line(index + 1, raw)? else {
            continue;
        };
        if line.mnemonic.text.starts_with('.') {
            assembler.directive(&line)?;
        } else {
            assembler.instruction(&line)?;
        }
    }

    log::trace!("assembled {} slot writes", assembler.writes.len());
    Ok(assembler.writes)
}

/// Second pass: applies `writes` in order to an all-zero program of `max_size` slots.
/// Writes past the end are ignored; [`assemble`] never produces them.
pub fn materialize(writes: &[SlotWrite], max_size: usize) -> ScriptProgram {
    let mut slots = vec![ScriptSlot::default(); max_size];
    for write in writes {
        let Some(slot) = slots.get_mut(write.slot()) else {
            continue;
        };
        match *write {
            SlotWrite::Comparator { opcode, param, .. } => {
                slot.comparator_opcode = opcode;
                slot.comparator_param = param;
            }
            SlotWrite::Editor { opcode, param, .. } => {
                slot.editor_opcode = (slot.editor_opcode & EXTRACT_BIT) | (opcode & !EXTRACT_BIT);
                slot.editor_param = param;
            }
            SlotWrite::Extract { enabled, .. } => {
                slot.editor_opcode = (slot.editor_opcode & !EXTRACT_BIT) | enabled as u8;
            }
        }
    }
    ScriptProgram { slots }
}

/// Compiles script text into a program of exactly `max_size` slots.
pub fn compile(source: &str, max_size: usize) -> Result<ScriptProgram, ScriptError> {
    let writes = assemble(source, max_size)?;
    Ok(materialize(&writes, max_size))
}

#[cfg(test)]
mod test {
    use super::opcode::CompareOp;
    use super::*;

    #[test]
    fn eq32_spans_four_slots() {
        let program = compile(".comp\neq32 100", 4).unwrap();
        assert_eq!(
            program.to_bytes(),
            [
                0x10, 0x00, 0, 0, //
                0x10, 0x00, 0, 0, //
                0x10, 0x00, 0, 0, //
                0x11, 0x64, 0, 0,
            ]
        );
    }

    #[test]
    fn comparator_fields_survive_compilation() {
        let program = compile(".comp 2\nsltq16l -2\neof", 8).unwrap();
        let slots = program.slots();
        assert_eq!(slots[0], ScriptSlot::default());

        let first = slots[2].comparator().unwrap();
        assert_eq!(first.op, CompareOp::Ltq);
        assert!(first.signed && first.little_endian && !first.float && !first.last);
        assert!(slots[3].comparator().unwrap().last);
        // -2 as 0xFFFE, low byte first
        assert_eq!((slots[2].comparator_param, slots[3].comparator_param), (0xFE, 0xFF));
        assert_eq!(slots[4].comparator_opcode, 0xF1);
    }

    #[test]
    fn float_comparison_sets_signed_and_float() {
        let program = compile(".comp\neqf 1.0", 4).unwrap();
        let opcode = program.slots()[0].comparator().unwrap();
        assert!(opcode.signed && opcode.float);
        let params: Vec<u8> = program.slots().iter().map(|s| s.comparator_param).collect();
        assert_eq!(params, 1.0f32.to_be_bytes());
    }

    #[test]
    fn editor_and_extractor_share_a_byte() {
        let source = "
            .edit 1
            add16 -1   # signed because of the sign
            .extr
            ext 3
            nop
            ext
        ";
        let program = compile(source, 5).unwrap();
        let slots = program.slots();

        let editor = slots[1].editor().unwrap();
        assert_eq!(editor.op, EditOp::Add);
        assert_eq!(editor.width(), 2);
        assert_eq!(slots[2].editor(), Some(editor));
        assert_eq!((slots[1].editor_param, slots[2].editor_param), (0xFF, 0xFF));

        let extract: Vec<bool> = slots.iter().map(ScriptSlot::extract).collect();
        assert_eq!(extract, [true, true, true, false, true]);
    }

    #[test]
    fn float_arithmetic_selects_float_ops() {
        let program = compile(".edit\nmuld 0.5\n", 8).unwrap();
        let editor = program.slots()[7].editor().unwrap();
        assert_eq!(editor.op, EditOp::FloatMul);
        assert_eq!(editor.shift, 3);
    }

    #[test]
    fn sections_keep_separate_offsets() {
        let writes = assemble(".comp\neq8 1\n.edit\nset8 2\n.comp\neq8 3", 4).unwrap();
        let slots: Vec<usize> = writes.iter().map(SlotWrite::slot).collect();
        // The second .comp restarts at 0.
        assert_eq!(slots, [0, 0, 0]);
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        assert_eq!(compile(".COMP\nEQ8 1", 1), compile(".comp\neq8 1", 1));
    }

    #[test]
    fn too_large_reports_line_and_overflow() {
        let err = compile(".comp\nnop 2\neq32 0x01020304", 4).unwrap_err();
        assert_eq!(err, ScriptError::ScriptTooLarge { line: 3, overflow: 2 });
        assert_eq!(
            err.to_string(),
            "line 3: script too large, exceeds the maximum size by 2 slots"
        );

        let err = compile(".extr 10\next", 4).unwrap_err();
        assert_eq!(err, ScriptError::ScriptTooLarge { line: 2, overflow: 7 });
    }

    #[test]
    fn huge_repeat_counts_are_rejected_before_allocating() {
        let err = compile(".comp\nnop 0xFFFFFFFFFFFFFFFF", 4).unwrap_err();
        assert_eq!(
            err,
            ScriptError::ScriptTooLarge {
                line: 2,
                overflow: usize::MAX - 4,
            }
        );

        let err = compile(".comp 1\nnop 1_000_000_000", 4).unwrap_err();
        assert_eq!(
            err,
            ScriptError::ScriptTooLarge {
                line: 2,
                overflow: 1_000_000_000 - 3,
            }
        );
    }

    #[test]
    fn comparator_nop_fills_slots() {
        let writes = assemble(".comp 1\nnop 2\neq8 7", 4).unwrap();
        let slots: Vec<usize> = writes.iter().map(SlotWrite::slot).collect();
        assert_eq!(slots, [1, 2, 3]);
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(
            compile("eq8 1", 4).unwrap_err(),
            ScriptError::Syntax {
                line: 1,
                column: Some(1),
                message: "instruction outside of a section".to_string(),
            }
        );
        assert_eq!(
            compile(".comp\n  ne8 1", 4).unwrap_err(),
            ScriptError::Syntax {
                line: 2,
                column: Some(3),
                message: "unknown instruction 'ne8'".to_string(),
            }
        );
        assert!(matches!(
            compile(".data", 4),
            Err(ScriptError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            compile(".comp -1", 4),
            Err(ScriptError::Syntax { line: 1, column: Some(7), .. })
        ));
        assert!(matches!(
            compile(".edit\ndrop 1", 4),
            Err(ScriptError::Syntax { line: 2, column: Some(6), .. })
        ));
        assert!(matches!(
            compile(".comp\neq8", 4),
            Err(ScriptError::Syntax { line: 2, column: Some(4), .. })
        ));
    }

    #[test]
    fn invalid_parameters() {
        assert!(matches!(
            compile(".comp\neq8 0x100", 4),
            Err(ScriptError::InvalidParameter { line: 2, column: 5, .. })
        ));
        assert!(matches!(
            compile(".edit\nset16 -1", 4),
            Err(ScriptError::InvalidParameter { line: 2, .. })
        ));
        assert!(matches!(
            compile(".extr\next zero", 4),
            Err(ScriptError::InvalidParameter { line: 2, .. })
        ));
    }

    #[test]
    fn compilation_is_deterministic() {
        let source = ".comp\nnop 6\neq16 0x0800\neof\n.edit 14\nxor8 0xFF\n.extr 26\next 4";
        assert_eq!(compile(source, 64), compile(source, 64));
        assert_eq!(compile(source, 64).unwrap().len(), 64);
    }
}
