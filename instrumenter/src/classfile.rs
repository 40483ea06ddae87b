//! Class-file shaped view of a compiled unit: just enough of a JVM class for
//! the rewriter to read method bodies and hand back rewritten ones.

mod constant_pool;

pub use constant_pool::{Constant, ConstantPool, FieldRef};

use crate::error::{InstrumentError, Result};

pub const ACC_STATIC: u16 = 0x0008;

pub const CONSTRUCTOR_NAME: &str = "<init>";
pub const STATIC_INITIALIZER_NAME: &str = "<clinit>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Constant pool index of the caught class, 0 for `finally`.
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line: u16,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name: u16,
    /// Descriptor index, or signature index in a `LocalVariableTypeTable`.
    pub descriptor: u16,
    pub index: u16,
}

/// `verification_type_info`. `T` is the representation of the offset of the
/// `new` instruction an uninitialized value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType<T = u16> {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class`.
    Object(u16),
    Uninitialized(T),
}

impl<T> VerificationType<T> {
    pub fn map_offset<U, E>(self, f: &mut impl FnMut(T) -> Result<U, E>) -> Result<VerificationType<U>, E> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(class) => VerificationType::Object(class),
            VerificationType::Uninitialized(offset) => VerificationType::Uninitialized(f(offset)?),
        })
    }
}

fn map_types<T, U, E>(
    types: Vec<VerificationType<T>>,
    f: &mut impl FnMut(T) -> Result<U, E>,
) -> Result<Vec<VerificationType<U>>, E> {
    types.into_iter().map(|ty| ty.map_offset(&mut *f)).collect()
}

/// Body of a `stack_map_frame`, independent of how its position is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind<T = u16> {
    Same,
    SameLocals1StackItem(VerificationType<T>),
    Chop(u8),
    Append(Vec<VerificationType<T>>),
    Full {
        locals: Vec<VerificationType<T>>,
        stack: Vec<VerificationType<T>>,
    },
}

impl<T> FrameKind<T> {
    pub fn map_offsets<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<FrameKind<U>, E> {
        Ok(match self {
            FrameKind::Same => FrameKind::Same,
            FrameKind::SameLocals1StackItem(item) => FrameKind::SameLocals1StackItem(item.map_offset(&mut f)?),
            FrameKind::Chop(count) => FrameKind::Chop(count),
            FrameKind::Append(locals) => FrameKind::Append(map_types(locals, &mut f)?),
            FrameKind::Full { locals, stack } => FrameKind::Full {
                locals: map_types(locals, &mut f)?,
                stack: map_types(stack, &mut f)?,
            },
        })
    }

    /// Every `Uninitialized` offset in the frame.
    pub fn offsets_mut(&mut self) -> Vec<&mut T> {
        let types: Vec<&mut VerificationType<T>> = match self {
            FrameKind::Same | FrameKind::Chop(_) => Vec::new(),
            FrameKind::SameLocals1StackItem(item) => vec![item],
            FrameKind::Append(locals) => locals.iter_mut().collect(),
            FrameKind::Full { locals, stack } => locals.iter_mut().chain(stack.iter_mut()).collect(),
        };
        types
            .into_iter()
            .filter_map(|ty| match ty {
                VerificationType::Uninitialized(offset) => Some(offset),
                _ => None,
            })
            .collect()
    }
}

/// One `StackMapTable` frame. The first frame sits at `offset_delta`, each
/// later one at `previous + offset_delta + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    pub offset_delta: u16,
    pub kind: FrameKind,
}

impl StackMapFrame {
    /// The `frame_type` tag this frame is written with. Small deltas use the
    /// compact forms, larger ones the `_extended` forms.
    pub fn frame_type(&self) -> u8 {
        let compact = self.offset_delta <= 63;
        match &self.kind {
            FrameKind::Same if compact => self.offset_delta as u8,
            FrameKind::Same => 251,
            FrameKind::SameLocals1StackItem(_) if compact => 64 + self.offset_delta as u8,
            FrameKind::SameLocals1StackItem(_) => 247,
            FrameKind::Chop(count) => 251 - count,
            FrameKind::Append(locals) => 251 + locals.len() as u8,
            FrameKind::Full { .. } => 255,
        }
    }
}

/// The `Code` attribute of a method, with the sub-attributes that refer to
/// code offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub line_numbers: Vec<LineNumberEntry>,
    pub stack_map: Vec<StackMapFrame>,
    pub local_variables: Vec<LocalVariableEntry>,
    pub local_variable_types: Vec<LocalVariableEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    /// `None` for abstract and native methods.
    pub code: Option<CodeAttribute>,
}

impl MethodBody {
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER_NAME
    }
}

/// One compiled class: its pool, its methods and the metadata the rewriter
/// needs to build `File.java:line` positions.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    /// Internal name, e.g. `com/acme/Counter`.
    pub name: String,
    /// Value of the `SourceFile` attribute, if present.
    pub source_file: Option<String>,
    pub constant_pool: ConstantPool,
    pub methods: Vec<MethodBody>,
}

impl CompiledUnit {
    /// Source file name used in positions; falls back to `SimpleName.java`
    /// when the unit carries no `SourceFile` attribute.
    pub fn source_file_name(&self) -> String {
        if let Some(source_file) = &self.source_file {
            return source_file.clone();
        }
        let simple = self.name.rsplit('/').next().unwrap_or(&self.name);
        let outer = simple.split('$').next().unwrap_or(simple);
        format!("{outer}.java")
    }
}

/// Operand stack words taken by a value of field type `descriptor`.
pub fn field_words(descriptor: &str) -> Result<u32> {
    match descriptor.as_bytes().first() {
        Some(b'J' | b'D') => Ok(2),
        Some(b'B' | b'C' | b'F' | b'I' | b'S' | b'Z' | b'L' | b'[') => Ok(1),
        _ => Err(InstrumentError::BadDescriptor(descriptor.to_owned())),
    }
}

/// Words of all arguments and of the return value of a method descriptor.
pub fn method_words(descriptor: &str) -> Result<(u32, u32)> {
    let bad = || InstrumentError::BadDescriptor(descriptor.to_owned());
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(bad());
    }
    let mut position = 1;
    let mut arguments = 0;
    loop {
        match bytes.get(position) {
            Some(b')') => break,
            Some(_) => {
                let (words, next) = next_field_type(bytes, position).ok_or_else(bad)?;
                arguments += words;
                position = next;
            }
            None => return Err(bad()),
        }
    }
    let returned = match &descriptor[position + 1..] {
        "V" => 0,
        rest => {
            let (words, next) = next_field_type(rest.as_bytes(), 0).ok_or_else(bad)?;
            if next != rest.len() {
                return Err(bad());
            }
            words
        }
    };
    Ok((arguments, returned))
}

/// Parses one field type starting at `start`; returns its words and the index
/// after it.
fn next_field_type(bytes: &[u8], start: usize) -> Option<(u32, usize)> {
    let mut position = start;
    while bytes.get(position) == Some(&b'[') {
        position += 1;
    }
    let is_array = position > start;
    let words = match bytes.get(position)? {
        b'J' | b'D' if !is_array => 2,
        b'B' | b'C' | b'F' | b'I' | b'S' | b'Z' | b'J' | b'D' => 1,
        b'L' => {
            let end = bytes[position..].iter().position(|byte| *byte == b';')?;
            position += end;
            1
        }
        _ => return None,
    };
    Some((words, position + 1))
}
