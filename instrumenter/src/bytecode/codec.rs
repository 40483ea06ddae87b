//! Conversion between raw `Code` attribute bytes and the decoded instruction
//! list.

use std::collections::HashMap;

use super::opcode::*;
use super::{Code, ExceptionHandler, Frame, Instruction, Label, LineNumber, LocalVariable, Operand};
use crate::classfile::{CodeAttribute, ExceptionEntry, LineNumberEntry, LocalVariableEntry, StackMapFrame};
use crate::error::{InstrumentError, Result};

struct Reader<'a> {
    bytes: &'a [u8],
    /// Start of the instruction being read.
    pc: usize,
    position: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or(InstrumentError::TruncatedCode { pc: self.pc })?;
        self.position += 1;
        Ok(byte)
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    /// Skips the zero padding that aligns switch operands to four bytes.
    fn align(&mut self) -> Result<()> {
        while self.position % 4 != 0 {
            self.u8()?;
        }
        Ok(())
    }

    /// Absolute target pc of a relative jump, kept in a `Label` until the
    /// instruction boundaries are known.
    fn target(&self, offset: i32) -> Result<Label> {
        let target = self.pc as i64 + offset as i64;
        if target < 0 || target >= self.bytes.len() as i64 {
            return Err(InstrumentError::BadBranchTarget {
                pc: self.pc,
                target,
            });
        }
        Ok(Label(target as usize))
    }
}

pub fn decode(attribute: &CodeAttribute) -> Result<Code> {
    let bytes = attribute.code.as_slice();
    let mut reader = Reader {
        bytes,
        pc: 0,
        position: 0,
    };
    let mut instructions = Vec::new();
    let mut starts = Vec::new();
    while reader.position < bytes.len() {
        reader.pc = reader.position;
        starts.push(reader.pc);
        instructions.push(decode_one(&mut reader)?);
    }

    let count = instructions.len();
    let mut index_of: HashMap<usize, usize> = starts
        .iter()
        .enumerate()
        .map(|(index, pc)| (*pc, index))
        .collect();
    index_of.insert(bytes.len(), count);

    for (index, instruction) in instructions.iter_mut().enumerate() {
        for label in instruction.labels_mut() {
            match index_of.get(&label.0) {
                Some(resolved) if *resolved < count => *label = Label(*resolved),
                _ => {
                    return Err(InstrumentError::BadBranchTarget {
                        pc: starts[index],
                        target: label.0 as i64,
                    })
                }
            }
        }
    }

    let boundary = |pc: usize, table: &'static str, allow_end: bool| -> Result<Label> {
        match index_of.get(&pc) {
            Some(index) if allow_end || *index < count => Ok(Label(*index)),
            _ => Err(InstrumentError::BadTableOffset { table, pc }),
        }
    };

    let handlers = attribute
        .exception_table
        .iter()
        .map(|entry| -> Result<ExceptionHandler> {
            Ok(ExceptionHandler {
                start: boundary(entry.start_pc.into(), "exception table", false)?,
                end: boundary(entry.end_pc.into(), "exception table", true)?,
                handler: boundary(entry.handler_pc.into(), "exception table", false)?,
                catch_type: entry.catch_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let lines = attribute
        .line_numbers
        .iter()
        .map(|entry| -> Result<LineNumber> {
            Ok(LineNumber {
                start: boundary(entry.start_pc.into(), "line number table", false)?,
                line: entry.line,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut frame_pc: Option<usize> = None;
    let frames = attribute
        .stack_map
        .iter()
        .map(|frame| -> Result<Frame> {
            let delta = usize::from(frame.offset_delta);
            let pc = frame_pc.map_or(delta, |previous| previous + delta + 1);
            frame_pc = Some(pc);
            Ok(Frame {
                at: boundary(pc, "stack map table", false)?,
                kind: frame
                    .kind
                    .clone()
                    .map_offsets(|offset| boundary(offset.into(), "stack map table", false))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let variables = |entries: &[LocalVariableEntry], table: &'static str| -> Result<Vec<LocalVariable>> {
        entries
            .iter()
            .map(|entry| -> Result<LocalVariable> {
                let start = usize::from(entry.start_pc);
                Ok(LocalVariable {
                    start: boundary(start, table, true)?,
                    end: boundary(start + usize::from(entry.length), table, true)?,
                    name: entry.name,
                    descriptor: entry.descriptor,
                    index: entry.index,
                })
            })
            .collect()
    };

    Ok(Code {
        instructions,
        handlers,
        lines,
        frames,
        local_variables: variables(&attribute.local_variables, "local variable table")?,
        local_variable_types: variables(&attribute.local_variable_types, "local variable type table")?,
        max_stack: attribute.max_stack,
        max_locals: attribute.max_locals,
    })
}

fn decode_one(reader: &mut Reader<'_>) -> Result<Instruction> {
    let pc = reader.pc;
    let opcode = reader.u8()?;
    let operand = match opcode {
        NOP..=DCONST_1
        | ILOAD_0..=SALOAD
        | ISTORE_0..=LXOR
        | I2L..=DCMPG
        | IRETURN..=RETURN
        | ARRAYLENGTH
        | ATHROW
        | MONITORENTER
        | MONITOREXIT => Operand::None,
        BIPUSH => Operand::Byte(reader.i8()?),
        SIPUSH => Operand::Short(reader.i16()?),
        LDC => Operand::Constant(reader.u8()? as u16),
        LDC_W => return Ok(Instruction::constant(LDC, reader.u16()?)),
        LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            Operand::Constant(reader.u16()?)
        }
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Operand::Local(reader.u8()? as u16),
        IINC => Operand::Iinc {
            local: reader.u8()? as u16,
            delta: reader.i8()? as i16,
        },
        IFEQ..=JSR | IFNULL | IFNONNULL => {
            let offset = reader.i16()?;
            Operand::Branch(reader.target(offset as i32)?)
        }
        GOTO_W | JSR_W => {
            let offset = reader.i32()?;
            let narrow = if opcode == GOTO_W { GOTO } else { JSR };
            return Ok(Instruction::branch(narrow, reader.target(offset)?));
        }
        TABLESWITCH => {
            reader.align()?;
            let default = reader.i32()?;
            let default = reader.target(default)?;
            let low = reader.i32()?;
            let high = reader.i32()?;
            let count = high as i64 - low as i64 + 1;
            if count < 1 || count * 4 > (reader.bytes.len() - reader.position) as i64 {
                return Err(InstrumentError::MalformedSwitch { pc });
            }
            let targets = (0..count)
                .map(|_| {
                    let offset = reader.i32()?;
                    reader.target(offset)
                })
                .collect::<Result<Vec<_>>>()?;
            Operand::TableSwitch {
                default,
                low,
                targets,
            }
        }
        LOOKUPSWITCH => {
            reader.align()?;
            let default = reader.i32()?;
            let default = reader.target(default)?;
            let count = reader.i32()? as i64;
            if count < 0 || count * 8 > (reader.bytes.len() - reader.position) as i64 {
                return Err(InstrumentError::MalformedSwitch { pc });
            }
            let pairs = (0..count)
                .map(|_| -> Result<(i32, Label)> {
                    let key = reader.i32()?;
                    let offset = reader.i32()?;
                    Ok((key, reader.target(offset)?))
                })
                .collect::<Result<Vec<_>>>()?;
            Operand::LookupSwitch { default, pairs }
        }
        INVOKEINTERFACE => {
            let index = reader.u16()?;
            let count = reader.u8()?;
            reader.u8()?;
            Operand::InvokeInterface { index, count }
        }
        INVOKEDYNAMIC => {
            let index = reader.u16()?;
            reader.u16()?;
            Operand::InvokeDynamic(index)
        }
        NEWARRAY => Operand::NewArray(reader.u8()?),
        MULTIANEWARRAY => Operand::MultiANewArray {
            index: reader.u16()?,
            dimensions: reader.u8()?,
        },
        WIDE => {
            let inner = reader.u8()?;
            return match inner {
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Ok(Instruction::local(inner, reader.u16()?)),
                IINC => Ok(Instruction {
                    opcode: IINC,
                    operand: Operand::Iinc {
                        local: reader.u16()?,
                        delta: reader.i16()?,
                    },
                }),
                other => Err(InstrumentError::UnknownOpcode { opcode: other, pc }),
            };
        }
        _ => return Err(InstrumentError::UnknownOpcode { opcode, pc }),
    };
    Ok(Instruction { opcode, operand })
}

struct Layout {
    /// Byte offset of every instruction, plus the code length at the end.
    offsets: Vec<usize>,
    /// `goto`/`jsr` that need the 32-bit form.
    long_jumps: Vec<bool>,
}

impl Layout {
    fn pc_of(&self, label: Label) -> Result<usize> {
        pc_of(&self.offsets, label)
    }
}

fn pc_of(offsets: &[usize], label: Label) -> Result<usize> {
    offsets
        .get(label.0)
        .copied()
        .ok_or(InstrumentError::DanglingLabel { label: label.0 })
}

pub fn encode(code: &Code, max_stack: u16) -> Result<CodeAttribute> {
    let layout = layout(code)?;
    let mut bytes = Vec::with_capacity(layout.offsets[code.len()]);
    for (index, instruction) in code.instructions.iter().enumerate() {
        emit(&mut bytes, index, instruction, &layout)?;
    }

    let exception_table = code
        .handlers
        .iter()
        .map(|handler| -> Result<ExceptionEntry> {
            Ok(ExceptionEntry {
                start_pc: layout.pc_of(handler.start)? as u16,
                end_pc: layout.pc_of(handler.end)? as u16,
                handler_pc: layout.pc_of(handler.handler)? as u16,
                catch_type: handler.catch_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let line_numbers = code
        .lines
        .iter()
        .filter(|entry| entry.start.0 < code.len())
        .map(|entry| -> Result<LineNumberEntry> {
            Ok(LineNumberEntry {
                start_pc: layout.pc_of(entry.start)? as u16,
                line: entry.line,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut previous: Option<usize> = None;
    let stack_map = code
        .frames
        .iter()
        .map(|frame| -> Result<StackMapFrame> {
            let pc = layout.pc_of(frame.at)?;
            let delta = match previous {
                None => Some(pc),
                Some(previous) => pc.checked_sub(previous + 1),
            };
            let offset_delta = delta.ok_or(InstrumentError::BadTableOffset {
                table: "stack map table",
                pc,
            })? as u16;
            previous = Some(pc);
            Ok(StackMapFrame {
                offset_delta,
                kind: frame
                    .kind
                    .clone()
                    .map_offsets(|label| layout.pc_of(label).map(|pc| pc as u16))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let variables = |variables: &[LocalVariable]| -> Result<Vec<LocalVariableEntry>> {
        variables
            .iter()
            .map(|variable| -> Result<LocalVariableEntry> {
                let start = layout.pc_of(variable.start)?;
                let end = layout.pc_of(variable.end)?;
                Ok(LocalVariableEntry {
                    start_pc: start as u16,
                    length: end.saturating_sub(start) as u16,
                    name: variable.name,
                    descriptor: variable.descriptor,
                    index: variable.index,
                })
            })
            .collect()
    };

    Ok(CodeAttribute {
        max_stack,
        max_locals: code.max_locals,
        code: bytes,
        exception_table,
        line_numbers,
        stack_map,
        local_variables: variables(&code.local_variables)?,
        local_variable_types: variables(&code.local_variable_types)?,
    })
}

/// Assigns byte offsets, widening `goto`/`jsr` until every jump fits.
fn layout(code: &Code) -> Result<Layout> {
    let mut long_jumps = vec![false; code.len()];
    loop {
        let mut offsets = Vec::with_capacity(code.len() + 1);
        let mut pc = 0;
        for (index, instruction) in code.instructions.iter().enumerate() {
            offsets.push(pc);
            pc += encoded_size(instruction, pc, long_jumps[index]);
        }
        offsets.push(pc);
        if pc > u16::MAX as usize {
            return Err(InstrumentError::CodeTooLarge);
        }

        let mut widened = false;
        for (index, instruction) in code.instructions.iter().enumerate() {
            let Operand::Branch(target) = instruction.operand else {
                continue;
            };
            if long_jumps[index] {
                continue;
            }
            let offset = pc_of(&offsets, target)? as i64 - offsets[index] as i64;
            if i16::try_from(offset).is_ok() {
                continue;
            }
            if matches!(instruction.opcode, GOTO | JSR) {
                long_jumps[index] = true;
                widened = true;
            } else {
                return Err(InstrumentError::BranchOverflow { index });
            }
        }
        if !widened {
            return Ok(Layout {
                offsets,
                long_jumps,
            });
        }
    }
}

fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

fn encoded_size(instruction: &Instruction, pc: usize, long_jump: bool) -> usize {
    match &instruction.operand {
        Operand::None => 1,
        Operand::Byte(_) | Operand::NewArray(_) => 2,
        Operand::Short(_) => 3,
        Operand::Constant(index) if instruction.opcode == LDC && *index <= u8::MAX as u16 => 2,
        Operand::Constant(_) => 3,
        Operand::Local(slot) if *slot <= u8::MAX as u16 => 2,
        Operand::Local(_) => 4,
        Operand::Iinc { local, delta }
            if *local <= u8::MAX as u16 && i8::try_from(*delta).is_ok() =>
        {
            3
        }
        Operand::Iinc { .. } => 6,
        Operand::Branch(_) if long_jump => 5,
        Operand::Branch(_) => 3,
        Operand::TableSwitch { targets, .. } => 1 + switch_padding(pc) + 12 + 4 * targets.len(),
        Operand::LookupSwitch { pairs, .. } => 1 + switch_padding(pc) + 8 + 8 * pairs.len(),
        Operand::InvokeInterface { .. } | Operand::InvokeDynamic(_) => 5,
        Operand::MultiANewArray { .. } => 4,
    }
}

fn emit(bytes: &mut Vec<u8>, index: usize, instruction: &Instruction, layout: &Layout) -> Result<()> {
    let pc = layout.offsets[index];
    let relative = |label: Label| -> Result<i32> { Ok((layout.pc_of(label)? as i64 - pc as i64) as i32) };
    let opcode = instruction.opcode;
    match &instruction.operand {
        Operand::None => bytes.push(opcode),
        Operand::Byte(value) => bytes.extend([opcode, *value as u8]),
        Operand::Short(value) => {
            bytes.push(opcode);
            bytes.extend(value.to_be_bytes());
        }
        Operand::Constant(index) if opcode == LDC && *index <= u8::MAX as u16 => {
            bytes.extend([LDC, *index as u8]);
        }
        Operand::Constant(index) => {
            bytes.push(if opcode == LDC { LDC_W } else { opcode });
            bytes.extend(index.to_be_bytes());
        }
        Operand::Local(slot) if *slot <= u8::MAX as u16 => bytes.extend([opcode, *slot as u8]),
        Operand::Local(slot) => {
            bytes.extend([WIDE, opcode]);
            bytes.extend(slot.to_be_bytes());
        }
        Operand::Iinc { local, delta } => match i8::try_from(*delta) {
            Ok(narrow) if *local <= u8::MAX as u16 => {
                bytes.extend([IINC, *local as u8, narrow as u8]);
            }
            _ => {
                bytes.extend([WIDE, IINC]);
                bytes.extend(local.to_be_bytes());
                bytes.extend(delta.to_be_bytes());
            }
        },
        Operand::Branch(target) => {
            let offset = relative(*target)?;
            if layout.long_jumps[index] {
                bytes.push(if opcode == JSR { JSR_W } else { GOTO_W });
                bytes.extend(offset.to_be_bytes());
            } else {
                bytes.push(opcode);
                bytes.extend((offset as i16).to_be_bytes());
            }
        }
        Operand::TableSwitch {
            default,
            low,
            targets,
        } => {
            bytes.push(opcode);
            bytes.extend(std::iter::repeat(0).take(switch_padding(pc)));
            bytes.extend(relative(*default)?.to_be_bytes());
            bytes.extend(low.to_be_bytes());
            let high = *low as i64 + targets.len() as i64 - 1;
            bytes.extend((high as i32).to_be_bytes());
            for target in targets {
                bytes.extend(relative(*target)?.to_be_bytes());
            }
        }
        Operand::LookupSwitch { default, pairs } => {
            bytes.push(opcode);
            bytes.extend(std::iter::repeat(0).take(switch_padding(pc)));
            bytes.extend(relative(*default)?.to_be_bytes());
            bytes.extend((pairs.len() as i32).to_be_bytes());
            for (key, target) in pairs {
                bytes.extend(key.to_be_bytes());
                bytes.extend(relative(*target)?.to_be_bytes());
            }
        }
        Operand::InvokeInterface { index, count } => {
            bytes.push(opcode);
            bytes.extend(index.to_be_bytes());
            bytes.extend([*count, 0]);
        }
        Operand::InvokeDynamic(index) => {
            bytes.push(opcode);
            bytes.extend(index.to_be_bytes());
            bytes.extend([0, 0]);
        }
        Operand::NewArray(kind) => bytes.extend([opcode, *kind]),
        Operand::MultiANewArray { index, dimensions } => {
            bytes.push(opcode);
            bytes.extend(index.to_be_bytes());
            bytes.push(*dimensions);
        }
    }
    Ok(())
}
