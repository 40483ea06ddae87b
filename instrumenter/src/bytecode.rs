//! Decoded instruction model. Branch targets, handler ranges, line entries,
//! stack map frames and local variable ranges refer to instruction indices
//! (`Label`), never to byte offsets, so code can be inserted without offset
//! arithmetic.

pub mod codec;
pub mod editor;
pub mod opcode;
pub mod stack;

pub use codec::{decode, encode};
pub use editor::CodeEditor;
pub use stack::compute_max_stack;

use crate::classfile::FrameKind;

/// Index of an instruction in `Code::instructions`. The label equal to the
/// instruction count stands for the end of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    /// `bipush`
    Byte(i8),
    /// `sipush`
    Short(i16),
    /// Constant pool index of `ldc`, field and method access, `new`, casts.
    /// `ldc` and `ldc_w` both decode to `LDC`; the encoder picks the form.
    Constant(u16),
    /// Local slot of a load, store or `ret`. A `wide` prefix is implied by the
    /// slot number rather than stored.
    Local(u16),
    Iinc { local: u16, delta: i16 },
    /// Conditional and unconditional jumps. `goto_w` and `jsr_w` decode to
    /// `GOTO` and `JSR`.
    Branch(Label),
    TableSwitch {
        default: Label,
        low: i32,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    InvokeInterface { index: u16, count: u8 },
    InvokeDynamic(u16),
    /// Primitive element type code of `newarray`.
    NewArray(u8),
    MultiANewArray { index: u16, dimensions: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub operand: Operand,
}

impl Instruction {
    pub fn simple(opcode: u8) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }

    pub fn constant(opcode: u8, index: u16) -> Self {
        Self {
            opcode,
            operand: Operand::Constant(index),
        }
    }

    pub fn local(opcode: u8, slot: u16) -> Self {
        Self {
            opcode,
            operand: Operand::Local(slot),
        }
    }

    pub fn branch(opcode: u8, target: Label) -> Self {
        Self {
            opcode,
            operand: Operand::Branch(target),
        }
    }

    /// Every label the operand refers to.
    pub fn labels(&self) -> Vec<Label> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, target)| *target))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn labels_mut(&mut self) -> Vec<&mut Label> {
        match &mut self.operand {
            Operand::Branch(target) => vec![target],
            Operand::TableSwitch {
                default, targets, ..
            } => std::iter::once(default).chain(targets.iter_mut()).collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(default)
                .chain(pairs.iter_mut().map(|(_, target)| target))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        opcode::mnemonic(self.opcode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: Label,
    /// Exclusive.
    pub end: Label,
    pub handler: Label,
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start: Label,
    pub line: u16,
}

/// Stack map frame at an instruction. `Uninitialized` entries point at the
/// `new` that created the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub at: Label,
    pub kind: FrameKind<Label>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start: Label,
    /// Exclusive.
    pub end: Label,
    pub name: u16,
    pub descriptor: u16,
    pub index: u16,
}

/// A decoded method body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<ExceptionHandler>,
    pub lines: Vec<LineNumber>,
    /// In increasing order of `at`.
    pub frames: Vec<Frame>,
    pub local_variables: Vec<LocalVariable>,
    pub local_variable_types: Vec<LocalVariable>,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl Code {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Source line of the instruction at `index`, from the closest preceding
    /// line entry.
    pub fn line_of(&self, index: usize) -> Option<u16> {
        self.lines
            .iter()
            .filter(|entry| entry.start.0 <= index)
            .max_by_key(|entry| entry.start)
            .map(|entry| entry.line)
    }
}
