use std::collections::BTreeMap;

use super::{Code, Instruction, Label};
use crate::error::{InstrumentError, Result};

/// Queues insertions against the original instruction indices of a method and
/// applies them all at once.
///
/// Inserted sequences must not contain branches: their labels would be read
/// as original indices.
#[derive(Debug)]
pub struct CodeEditor {
    code: Code,
    insertions: BTreeMap<usize, Vec<Instruction>>,
}

impl CodeEditor {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            insertions: BTreeMap::new(),
        }
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    /// Runs `sequence` right before the original instruction at `index`.
    /// Anything that jumped to that instruction now jumps to the sequence.
    pub fn insert_before(&mut self, index: usize, sequence: Vec<Instruction>) {
        self.insertions.entry(index).or_default().extend(sequence);
    }

    /// Reserves `words` fresh local slots past the current ones and returns
    /// the first.
    pub fn allocate_locals(&mut self, words: u16) -> Result<u16> {
        let first = self.code.max_locals;
        self.code.max_locals = first
            .checked_add(words)
            .ok_or(InstrumentError::LocalsOverflow)?;
        Ok(first)
    }

    pub fn inserted_count(&self) -> usize {
        self.insertions.values().map(Vec::len).sum()
    }

    pub fn finish(self) -> Code {
        let CodeEditor {
            mut code,
            mut insertions,
        } = self;
        let original = std::mem::take(&mut code.instructions);

        // remap[i]: where a reference to original instruction i now points.
        let mut remap = Vec::with_capacity(original.len() + 1);
        let mut position = 0;
        for index in 0..original.len() {
            remap.push(position);
            position += insertions.get(&index).map_or(0, Vec::len) + 1;
        }
        remap.push(position);
        let relabel = |label: Label| Label(remap.get(label.0).copied().unwrap_or(label.0));
        // The instruction itself, past whatever was inserted before it.
        let count = original.len();
        let follow = |label: Label| match remap.get(label.0 + 1) {
            Some(next) if label.0 < count => Label(next - 1),
            _ => relabel(label),
        };

        let mut instructions = Vec::with_capacity(position);
        for (index, mut instruction) in original.into_iter().enumerate() {
            if let Some(sequence) = insertions.remove(&index) {
                instructions.extend(sequence);
            }
            for label in instruction.labels_mut() {
                *label = relabel(*label);
            }
            instructions.push(instruction);
        }

        for handler in &mut code.handlers {
            handler.start = relabel(handler.start);
            handler.end = relabel(handler.end);
            handler.handler = relabel(handler.handler);
        }
        for line in &mut code.lines {
            line.start = relabel(line.start);
        }
        for frame in &mut code.frames {
            frame.at = relabel(frame.at);
            for offset in frame.kind.offsets_mut() {
                *offset = follow(*offset);
            }
        }
        for variable in code
            .local_variables
            .iter_mut()
            .chain(code.local_variable_types.iter_mut())
        {
            variable.start = relabel(variable.start);
            variable.end = relabel(variable.end);
        }
        code.instructions = instructions;
        code
    }
}
