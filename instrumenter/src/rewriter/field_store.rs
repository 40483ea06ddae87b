use super::{constant_operand, InjectionContext, SiteInstrumenter, ValueKind};
use crate::bytecode::opcode::*;
use crate::bytecode::Instruction;
use crate::error::Result;

/// How the hook gets its owner argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// `putfield`: the object reference under the value, duplicated.
    Duplicate,
    /// `putstatic`: no receiver, the hook gets `null`.
    Absent,
}

/// `putfield` / `putstatic`:
///
/// ```text
/// <store> value -> scratch
/// dup | aconst_null
/// ldc "pkg.Class.field"
/// ldc "File.java:line"
/// invokestatic recordWrite
/// <load> scratch
/// ```
#[derive(Debug)]
pub struct FieldStoreInstrumenter {
    pub receiver: Receiver,
}

impl SiteInstrumenter for FieldStoreInstrumenter {
    #[inline]
    fn target_opcodes(&self) -> &'static [u8] {
        match self.receiver {
            Receiver::Duplicate => &[PUTFIELD],
            Receiver::Absent => &[PUTSTATIC],
        }
    }

    fn instrument(&self, instruction: &Instruction, cx: &mut InjectionContext<'_>) -> Result<Vec<Instruction>> {
        let field = cx.pool.fieldref(constant_operand(instruction)?)?;
        let kind = ValueKind::of_descriptor(&field.descriptor)?;
        let owner = match self.receiver {
            Receiver::Duplicate => Instruction::simple(DUP),
            Receiver::Absent => Instruction::simple(ACONST_NULL),
        };
        Ok(vec![
            kind.store(cx.scratch.value),
            owner,
            cx.load_string(&field.qualified_name())?,
            cx.load_position()?,
            cx.call_record_write()?,
            kind.load(cx.scratch.value),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ConstantPool;
    use crate::config::HookTarget;
    use crate::rewriter::ScratchLocals;

    #[test]
    fn static_double_store_spills_two_words() {
        let mut pool = ConstantPool::new();
        let field = pool.add_fieldref("com/acme/Stats", "mean", "D").unwrap();
        let hooks = HookTarget::default();
        let mut cx = InjectionContext {
            pool: &mut pool,
            hooks: &hooks,
            scratch: ScratchLocals { value: 4, index: 6 },
            position: "Stats.java:12".to_owned(),
        };
        let sequence = FieldStoreInstrumenter {
            receiver: Receiver::Absent,
        }
        .instrument(&Instruction::constant(PUTSTATIC, field), &mut cx)
        .unwrap();

        let opcodes: Vec<u8> = sequence.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![DSTORE, ACONST_NULL, LDC, LDC, INVOKESTATIC, DLOAD]);
        assert_eq!(sequence[0], Instruction::local(DSTORE, 4));
        assert_eq!(sequence[5], Instruction::local(DLOAD, 4));
        let descriptor = pool.add_string("com.acme.Stats.mean").unwrap();
        assert_eq!(sequence[2], Instruction::constant(LDC, descriptor));
    }
}
