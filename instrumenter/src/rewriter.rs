//! Injection of monitor hook calls around field stores, array stores and
//! monitor instructions.

mod array_store;
mod field_store;
mod monitor;
mod scanner;

use tracing::{debug, info, warn};

pub use array_store::ArrayStoreInstrumenter;
pub use field_store::{FieldStoreInstrumenter, Receiver};
pub use monitor::{LockTransition, MonitorInstrumenter};
pub use scanner::{is_array_store, is_monitor, is_write, scan, ScanSummary};

use crate::bytecode::opcode::*;
use crate::bytecode::{self, CodeEditor, Instruction, Operand};
use crate::classfile::{CompiledUnit, ConstantPool, MethodBody};
use crate::config::{HookTarget, RewriterConfig, LOCK_DESCRIPTOR, RECORD_WRITE_DESCRIPTOR};
use crate::error::{InstrumentError, Result};

/// Words reserved per instrumented method: two for the widest spilled value,
/// one for an array index.
pub const SCRATCH_WORDS: u16 = 3;

/// Local slots the injected code spills operands into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchLocals {
    pub value: u16,
    pub index: u16,
}

impl ScratchLocals {
    fn starting_at(base: u16) -> Self {
        Self {
            value: base,
            index: base + 2,
        }
    }
}

/// Computational type of a spilled value; picks the load/store opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ValueKind {
    pub fn of_descriptor(descriptor: &str) -> Result<Self> {
        match descriptor.as_bytes().first() {
            Some(b'B' | b'C' | b'I' | b'S' | b'Z') => Ok(ValueKind::Int),
            Some(b'J') => Ok(ValueKind::Long),
            Some(b'F') => Ok(ValueKind::Float),
            Some(b'D') => Ok(ValueKind::Double),
            Some(b'L' | b'[') => Ok(ValueKind::Reference),
            _ => Err(InstrumentError::BadDescriptor(descriptor.to_owned())),
        }
    }

    /// Element kind stored by an `xastore` opcode. Byte, char, short and
    /// boolean elements travel as ints.
    pub fn of_array_store(opcode: u8) -> Self {
        match opcode {
            LASTORE => ValueKind::Long,
            FASTORE => ValueKind::Float,
            DASTORE => ValueKind::Double,
            AASTORE => ValueKind::Reference,
            _ => ValueKind::Int,
        }
    }

    pub fn store(self, slot: u16) -> Instruction {
        let opcode = match self {
            ValueKind::Int => ISTORE,
            ValueKind::Long => LSTORE,
            ValueKind::Float => FSTORE,
            ValueKind::Double => DSTORE,
            ValueKind::Reference => ASTORE,
        };
        Instruction::local(opcode, slot)
    }

    pub fn load(self, slot: u16) -> Instruction {
        let opcode = match self {
            ValueKind::Int => ILOAD,
            ValueKind::Long => LLOAD,
            ValueKind::Float => FLOAD,
            ValueKind::Double => DLOAD,
            ValueKind::Reference => ALOAD,
        };
        Instruction::local(opcode, slot)
    }
}

/// Everything a site instrumenter needs besides the instruction itself.
pub struct InjectionContext<'a> {
    pub pool: &'a mut ConstantPool,
    pub hooks: &'a HookTarget,
    pub scratch: ScratchLocals,
    /// `File.java:line` of the instruction being instrumented.
    pub position: String,
}

impl InjectionContext<'_> {
    pub fn load_string(&mut self, value: &str) -> Result<Instruction> {
        Ok(Instruction::constant(LDC, self.pool.add_string(value)?))
    }

    pub fn load_position(&mut self) -> Result<Instruction> {
        let index = self.pool.add_string(&self.position)?;
        Ok(Instruction::constant(LDC, index))
    }

    pub fn call_record_write(&mut self) -> Result<Instruction> {
        let index = self.pool.add_methodref(
            &self.hooks.class,
            &self.hooks.record_write,
            RECORD_WRITE_DESCRIPTOR,
        )?;
        Ok(Instruction::constant(INVOKESTATIC, index))
    }

    pub fn call_lock_hook(&mut self, transition: LockTransition) -> Result<Instruction> {
        let name = match transition {
            LockTransition::Acquire => &self.hooks.add_lock,
            LockTransition::Release => &self.hooks.remove_lock,
        };
        let index = self
            .pool
            .add_methodref(&self.hooks.class, name, LOCK_DESCRIPTOR)?;
        Ok(Instruction::constant(INVOKESTATIC, index))
    }
}

/// Produces the code that runs right before one kind of instruction.
pub trait SiteInstrumenter: Sync {
    fn target_opcodes(&self) -> &'static [u8];

    fn instrument(&self, instruction: &Instruction, cx: &mut InjectionContext<'_>) -> Result<Vec<Instruction>>;
}

static INSTRUMENTERS: [&dyn SiteInstrumenter; 4] = [
    &FieldStoreInstrumenter {
        receiver: Receiver::Duplicate,
    },
    &FieldStoreInstrumenter {
        receiver: Receiver::Absent,
    },
    &ArrayStoreInstrumenter,
    &MonitorInstrumenter,
];

fn instrumenter_for(opcode: u8) -> Option<&'static dyn SiteInstrumenter> {
    INSTRUMENTERS
        .iter()
        .copied()
        .find(|instrumenter| instrumenter.target_opcodes().contains(&opcode))
}

/// Constant pool operand of a field instruction.
pub(crate) fn constant_operand(instruction: &Instruction) -> Result<u16> {
    match instruction.operand {
        Operand::Constant(index) => Ok(index),
        _ => Err(InstrumentError::BadConstantIndex { index: 0 }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Constructor,
    StaticInitializer,
    NoBody,
    NoTargets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOutcome {
    Instrumented { sites: usize },
    Skipped(SkipReason),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    pub instrumented: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failed: Vec<(String, InstrumentError)>,
}

#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    config: RewriterConfig,
}

impl Rewriter {
    pub fn new(config: RewriterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    /// Rewrites every method of `unit`. A method that fails keeps its
    /// original code; the others are unaffected.
    pub fn rewrite_unit(&self, unit: &mut CompiledUnit) -> RewriteReport {
        let source_file = unit.source_file_name();
        let mut report = RewriteReport::default();
        for method in &mut unit.methods {
            let name = format!("{}.{}{}", unit.name, method.name, method.descriptor);
            match self.rewrite_method(&source_file, &mut unit.constant_pool, method) {
                Ok(MethodOutcome::Instrumented { sites }) => {
                    info!("instrumented {} ({} sites)", name, sites);
                    report.instrumented.push(name);
                }
                Ok(MethodOutcome::Skipped(reason)) => {
                    debug!("skip method {} because {:?}", name, reason);
                    report.skipped.push((name, reason));
                }
                Err(error) => {
                    warn!("leaving method {} unchanged: {}", name, error);
                    report.failed.push((name, error));
                }
            }
        }
        report
    }

    /// Rewrites one method in place. On error `method` is untouched, though
    /// `pool` may have gained unused entries.
    pub fn rewrite_method(
        &self,
        source_file: &str,
        pool: &mut ConstantPool,
        method: &mut MethodBody,
    ) -> Result<MethodOutcome> {
        if method.is_constructor() {
            return Ok(MethodOutcome::Skipped(SkipReason::Constructor));
        }
        if method.is_static_initializer() && self.config.skip_static_initializers {
            return Ok(MethodOutcome::Skipped(SkipReason::StaticInitializer));
        }
        let Some(attribute) = &method.code else {
            return Ok(MethodOutcome::Skipped(SkipReason::NoBody));
        };

        let code = bytecode::decode(attribute)?;
        if !scan(&code).needs_injection() {
            return Ok(MethodOutcome::Skipped(SkipReason::NoTargets));
        }

        let mut editor = CodeEditor::new(code);
        let scratch = ScratchLocals::starting_at(editor.allocate_locals(SCRATCH_WORDS)?);
        let mut sites = 0;
        for index in 0..editor.code().len() {
            let instruction = editor.code().instructions[index].clone();
            let Some(instrumenter) = instrumenter_for(instruction.opcode) else {
                continue;
            };
            let line = editor
                .code()
                .line_of(index)
                .map_or(-1, |line| line as i32);
            let mut cx = InjectionContext {
                pool: &mut *pool,
                hooks: &self.config.hooks,
                scratch,
                position: format!("{source_file}:{line}"),
            };
            let sequence = instrumenter.instrument(&instruction, &mut cx)?;
            debug!(
                "inject {} instructions before {} at {} ({})",
                sequence.len(),
                instruction.mnemonic(),
                index,
                cx.position
            );
            editor.insert_before(index, sequence);
            sites += 1;
        }

        let code = editor.finish();
        let max_stack = bytecode::compute_max_stack(&code, pool)?.max(attribute.max_stack);
        let rewritten = bytecode::encode(&code, max_stack)?;
        method.code = Some(rewritten);
        Ok(MethodOutcome::Instrumented { sites })
    }
}
