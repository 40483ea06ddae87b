use crate::bytecode::opcode::*;
use crate::bytecode::Code;

/// What a single pass over a method found.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub field_stores: usize,
    pub static_stores: usize,
    pub array_stores: usize,
    pub monitor_ops: usize,
}

impl ScanSummary {
    pub fn writes(&self) -> usize {
        self.field_stores + self.static_stores + self.array_stores
    }

    /// Monitor operations count as triggers too: a method that only
    /// synchronizes must still keep the thread's lock set balanced.
    pub fn needs_injection(&self) -> bool {
        self.writes() + self.monitor_ops > 0
    }
}

pub fn is_array_store(opcode: u8) -> bool {
    (IASTORE..=SASTORE).contains(&opcode)
}

pub fn is_write(opcode: u8) -> bool {
    matches!(opcode, PUTFIELD | PUTSTATIC) || is_array_store(opcode)
}

pub fn is_monitor(opcode: u8) -> bool {
    matches!(opcode, MONITORENTER | MONITOREXIT)
}

pub fn scan(code: &Code) -> ScanSummary {
    let mut summary = ScanSummary::default();
    for instruction in &code.instructions {
        match instruction.opcode {
            PUTFIELD => summary.field_stores += 1,
            PUTSTATIC => summary.static_stores += 1,
            MONITORENTER | MONITOREXIT => summary.monitor_ops += 1,
            opcode if is_array_store(opcode) => summary.array_stores += 1,
            _ => {}
        }
    }
    summary
}
