use super::{InjectionContext, SiteInstrumenter};
use crate::bytecode::opcode::*;
use crate::bytecode::Instruction;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    Acquire,
    Release,
}

/// `monitorenter` / `monitorexit`: `dup; invokestatic addLock|removeLock`.
#[derive(Debug)]
pub struct MonitorInstrumenter;

impl SiteInstrumenter for MonitorInstrumenter {
    #[inline]
    fn target_opcodes(&self) -> &'static [u8] {
        &[MONITORENTER, MONITOREXIT]
    }

    fn instrument(&self, instruction: &Instruction, cx: &mut InjectionContext<'_>) -> Result<Vec<Instruction>> {
        let transition = if instruction.opcode == MONITORENTER {
            LockTransition::Acquire
        } else {
            LockTransition::Release
        };
        Ok(vec![Instruction::simple(DUP), cx.call_lock_hook(transition)?])
    }
}
