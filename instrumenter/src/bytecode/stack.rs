//! Operand stack depth analysis, counted in JVM words.

use super::opcode::*;
use super::{Code, Instruction, Operand};
use crate::classfile::{field_words, method_words, ConstantPool};
use crate::error::{InstrumentError, Result};

/// Words popped and pushed by one instruction.
fn stack_effect(instruction: &Instruction, pool: &ConstantPool) -> Result<(u32, u32)> {
    let constant = || match instruction.operand {
        Operand::Constant(index) | Operand::InvokeDynamic(index) => Ok(index),
        Operand::InvokeInterface { index, .. } => Ok(index),
        _ => Err(InstrumentError::BadConstantIndex { index: 0 }),
    };
    let effect = match instruction.opcode {
        NOP | IINC | GOTO => (0, 0),
        ACONST_NULL | ICONST_M1..=ICONST_5 | FCONST_0..=FCONST_2 | BIPUSH | SIPUSH => (0, 1),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 | LDC2_W => (0, 2),
        LDC => (0, pool.loadable_words(constant()?)?),
        ILOAD | FLOAD | ALOAD | ILOAD_0..=ILOAD_3 | FLOAD_0..=FLOAD_3 | ALOAD_0..=ALOAD_3 => (0, 1),
        LLOAD | DLOAD | LLOAD_0..=LLOAD_3 | DLOAD_0..=DLOAD_3 => (0, 2),
        IALOAD | FALOAD | AALOAD | BALOAD | CALOAD | SALOAD => (2, 1),
        LALOAD | DALOAD => (2, 2),
        ISTORE | FSTORE | ASTORE | ISTORE_0..=ISTORE_3 | FSTORE_0..=FSTORE_3 | ASTORE_0..=ASTORE_3 => {
            (1, 0)
        }
        LSTORE | DSTORE | LSTORE_0..=LSTORE_3 | DSTORE_0..=DSTORE_3 => (2, 0),
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => (3, 0),
        LASTORE | DASTORE => (4, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => (1, 2),
        DUP_X1 => (2, 3),
        DUP_X2 => (3, 4),
        DUP2 => (2, 4),
        DUP2_X1 => (3, 5),
        DUP2_X2 => (4, 6),
        SWAP => (2, 2),
        IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => (2, 1),
        FADD | FSUB | FMUL | FDIV | FREM => (2, 1),
        LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => (4, 2),
        DADD | DSUB | DMUL | DDIV | DREM => (4, 2),
        LSHL | LSHR | LUSHR => (3, 2),
        INEG | FNEG | I2F | F2I | I2B | I2C | I2S => (1, 1),
        LNEG | DNEG | L2D | D2L => (2, 2),
        I2L | I2D | F2L | F2D => (1, 2),
        L2I | L2F | D2I | D2F => (2, 1),
        LCMP | DCMPL | DCMPG => (4, 1),
        FCMPL | FCMPG => (2, 1),
        IFEQ..=IFLE | IFNULL | IFNONNULL | TABLESWITCH | LOOKUPSWITCH => (1, 0),
        IF_ICMPEQ..=IF_ACMPNE => (2, 0),
        IRETURN | FRETURN | ARETURN | ATHROW | MONITORENTER | MONITOREXIT => (1, 0),
        LRETURN | DRETURN => (2, 0),
        RETURN => (0, 0),
        GETSTATIC => (0, field_words(pool.member_descriptor(constant()?)?)?),
        PUTSTATIC => (field_words(pool.member_descriptor(constant()?)?)?, 0),
        GETFIELD => (1, field_words(pool.member_descriptor(constant()?)?)?),
        PUTFIELD => (1 + field_words(pool.member_descriptor(constant()?)?)?, 0),
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKEINTERFACE => {
            let (arguments, returned) = method_words(pool.member_descriptor(constant()?)?)?;
            (1 + arguments, returned)
        }
        INVOKESTATIC | INVOKEDYNAMIC => method_words(pool.member_descriptor(constant()?)?)?,
        NEW => (0, 1),
        NEWARRAY | ANEWARRAY | ARRAYLENGTH | CHECKCAST | INSTANCEOF => (1, 1),
        MULTIANEWARRAY => match instruction.operand {
            Operand::MultiANewArray { dimensions, .. } => (dimensions as u32, 1),
            _ => (1, 1),
        },
        _ => (0, 0),
    };
    Ok(effect)
}

/// Whether control never falls through to the next instruction.
fn ends_flow(opcode: u8) -> bool {
    matches!(
        opcode,
        GOTO | ATHROW | TABLESWITCH | LOOKUPSWITCH | IRETURN..=RETURN
    )
}

/// Largest operand stack depth reached on any path through `code`.
///
/// Entry starts empty and every exception handler starts with the thrown
/// reference on the stack. Depths that disagree where paths merge are an
/// error, as are `jsr`/`ret` subroutines.
pub fn compute_max_stack(code: &Code, pool: &ConstantPool) -> Result<u16> {
    let count = code.len();
    let mut depths: Vec<Option<u32>> = vec![None; count];
    let mut worklist = Vec::new();
    let mut max = 0u32;

    let reach = |index: usize,
                 depth: u32,
                 depths: &mut Vec<Option<u32>>,
                 worklist: &mut Vec<usize>|
     -> Result<()> {
        if index >= count {
            return Ok(());
        }
        match depths[index] {
            None => {
                depths[index] = Some(depth);
                worklist.push(index);
                Ok(())
            }
            Some(seen) if seen == depth => Ok(()),
            Some(seen) => Err(InstrumentError::StackHeightMismatch {
                index,
                expected: seen,
                found: depth,
            }),
        }
    };

    reach(0, 0, &mut depths, &mut worklist)?;
    for handler in &code.handlers {
        reach(handler.handler.0, 1, &mut depths, &mut worklist)?;
    }
    max = max.max(if code.handlers.is_empty() { 0 } else { 1 });

    while let Some(index) = worklist.pop() {
        let instruction = &code.instructions[index];
        if matches!(instruction.opcode, JSR | RET) {
            return Err(InstrumentError::UnsupportedSubroutine { index });
        }
        let depth = depths[index].unwrap_or_default();
        let (popped, pushed) = stack_effect(instruction, pool)?;
        let after = depth
            .checked_sub(popped)
            .ok_or(InstrumentError::StackUnderflow { index })?
            + pushed;
        max = max.max(after);

        for target in instruction.labels() {
            reach(target.0, after, &mut depths, &mut worklist)?;
        }
        if !ends_flow(instruction.opcode) {
            reach(index + 1, after, &mut depths, &mut worklist)?;
        }
    }

    u16::try_from(max).map_err(|_| InstrumentError::StackOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ExceptionHandler, Label};

    fn code(instructions: Vec<Instruction>) -> Code {
        Code {
            instructions,
            ..Default::default()
        }
    }

    #[test]
    fn long_values_count_two_words() {
        let mut pool = ConstantPool::new();
        let field = pool.add_fieldref("a/Holder", "total", "J").unwrap();
        // aload_0; lconst_1; putfield total; return
        let body = code(vec![
            Instruction::simple(ALOAD_0),
            Instruction::simple(LCONST_1),
            Instruction::constant(PUTFIELD, field),
            Instruction::simple(RETURN),
        ]);
        assert_eq!(compute_max_stack(&body, &pool).unwrap(), 3);
    }

    #[test]
    fn invocation_uses_descriptor() {
        let mut pool = ConstantPool::new();
        let hook = pool
            .add_methodref(
                "umad/runtime/AccessMonitor",
                "recordWrite",
                "(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V",
            )
            .unwrap();
        let text = pool.add_string("X.java:1").unwrap();
        let body = code(vec![
            Instruction::simple(ACONST_NULL),
            Instruction::constant(LDC, text),
            Instruction::constant(LDC, text),
            Instruction::constant(INVOKESTATIC, hook),
            Instruction::simple(RETURN),
        ]);
        assert_eq!(compute_max_stack(&body, &pool).unwrap(), 3);
    }

    #[test]
    fn handlers_start_with_one_word() {
        let body = Code {
            instructions: vec![
                Instruction::simple(NOP),
                Instruction::simple(RETURN),
                Instruction::simple(ATHROW),
            ],
            handlers: vec![ExceptionHandler {
                start: Label(0),
                end: Label(1),
                handler: Label(2),
                catch_type: 0,
            }],
            ..Default::default()
        };
        assert_eq!(compute_max_stack(&body, &ConstantPool::new()).unwrap(), 1);
    }

    #[test]
    fn structural_errors() {
        let pool = ConstantPool::new();
        let underflow = code(vec![Instruction::simple(POP), Instruction::simple(RETURN)]);
        assert_eq!(
            compute_max_stack(&underflow, &pool),
            Err(InstrumentError::StackUnderflow { index: 0 })
        );

        // iload_1; ifeq L; iconst_0; L: return  (depth 0 and 1 meet at L)
        let mismatch = code(vec![
            Instruction::simple(ILOAD_1),
            Instruction::branch(IFEQ, Label(3)),
            Instruction::simple(ICONST_0),
            Instruction::simple(RETURN),
        ]);
        assert!(matches!(
            compute_max_stack(&mismatch, &pool),
            Err(InstrumentError::StackHeightMismatch { index: 3, .. })
        ));

        let subroutine = code(vec![Instruction::branch(JSR, Label(1)), Instruction::simple(RETURN)]);
        assert_eq!(
            compute_max_stack(&subroutine, &pool),
            Err(InstrumentError::UnsupportedSubroutine { index: 0 })
        );
    }
}
