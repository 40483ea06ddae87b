use thiserror::Error;

/// Structural problems met while reading or rewriting a method body.
///
/// None of these abort a whole rewrite: the rewriter logs them and leaves the
/// offending method as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("unknown opcode 0x{opcode:02x} at pc {pc}")]
    UnknownOpcode { opcode: u8, pc: usize },

    #[error("code ends in the middle of the instruction at pc {pc}")]
    TruncatedCode { pc: usize },

    #[error("branch at pc {pc} targets pc {target}, which is not an instruction boundary")]
    BadBranchTarget { pc: usize, target: i64 },

    #[error("{table} entry refers to pc {pc}, which is not an instruction boundary")]
    BadTableOffset { table: &'static str, pc: usize },

    #[error("switch at pc {pc} has a malformed jump table")]
    MalformedSwitch { pc: usize },

    #[error("label {label} does not name an instruction of this method")]
    DanglingLabel { label: usize },

    #[error("constant pool index {index} is out of range")]
    BadConstantIndex { index: u16 },

    #[error("constant pool index {index} is {found}, expected {expected}")]
    WrongConstantKind {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },

    #[error("malformed descriptor `{0}`")]
    BadDescriptor(String),

    #[error("constant pool is full")]
    ConstantPoolOverflow,

    #[error("method needs more than 65535 local slots")]
    LocalsOverflow,

    #[error("branch from instruction {index} no longer fits a 16-bit offset")]
    BranchOverflow { index: usize },

    #[error("code grew past the 65535 byte limit")]
    CodeTooLarge,

    #[error("operand stack underflow at instruction {index}")]
    StackUnderflow { index: usize },

    #[error("operand stack depth at instruction {index} is {found}, previously seen {expected}")]
    StackHeightMismatch {
        index: usize,
        expected: u32,
        found: u32,
    },

    #[error("operand stack needs more than 65535 words")]
    StackOverflow,

    #[error("subroutine instruction (jsr/ret) at instruction {index} is not supported")]
    UnsupportedSubroutine { index: usize },
}

pub type Result<T, E = InstrumentError> = std::result::Result<T, E>;
