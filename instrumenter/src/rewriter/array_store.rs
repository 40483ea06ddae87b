use super::{InjectionContext, SiteInstrumenter, ValueKind};
use crate::bytecode::opcode::*;
use crate::bytecode::Instruction;
use crate::error::Result;

/// `xastore`: spills value and index, reports the array itself as owner with
/// an empty descriptor, then puts both back.
#[derive(Debug)]
pub struct ArrayStoreInstrumenter;

impl SiteInstrumenter for ArrayStoreInstrumenter {
    #[inline]
    fn target_opcodes(&self) -> &'static [u8] {
        &[IASTORE, LASTORE, FASTORE, DASTORE, AASTORE, BASTORE, CASTORE, SASTORE]
    }

    fn instrument(&self, instruction: &Instruction, cx: &mut InjectionContext<'_>) -> Result<Vec<Instruction>> {
        let kind = ValueKind::of_array_store(instruction.opcode);
        Ok(vec![
            kind.store(cx.scratch.value),
            ValueKind::Int.store(cx.scratch.index),
            Instruction::simple(DUP),
            cx.load_string("")?,
            cx.load_position()?,
            cx.call_record_write()?,
            ValueKind::Int.load(cx.scratch.index),
            kind.load(cx.scratch.value),
        ])
    }
}
