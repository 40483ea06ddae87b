use crate::error::{InstrumentError, Result};

/// One constant pool slot, as stored in a class file.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name: u16 },
    String { value: u16 },
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    /// Second slot of a `Long` or `Double`.
    Unusable,
}

impl Constant {
    fn kind(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Integer(_) => "Integer",
            Constant::Float(_) => "Float",
            Constant::Long(_) => "Long",
            Constant::Double(_) => "Double",
            Constant::Class { .. } => "Class",
            Constant::String { .. } => "String",
            Constant::Fieldref { .. } => "Fieldref",
            Constant::Methodref { .. } => "Methodref",
            Constant::InterfaceMethodref { .. } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
            Constant::MethodHandle { .. } => "MethodHandle",
            Constant::MethodType { .. } => "MethodType",
            Constant::InvokeDynamic { .. } => "InvokeDynamic",
            Constant::Unusable => "Unusable",
        }
    }

    /// Number of pool indices the entry occupies.
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// A resolved `Fieldref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Declaring class in dotted form, e.g. `java.lang.String`.
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    /// `declaring.Class.field`, the descriptor handed to the write hook.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}

/// Constant pool of one compiled unit. Indices are 1-based like in the class
/// file; index 0 is never valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `constant` and returns its index. `Long` and `Double` take the
    /// following index too.
    pub fn push(&mut self, constant: Constant) -> Result<u16> {
        let index = self.entries.len() + 1;
        if index + constant.width() - 1 >= u16::MAX as usize {
            return Err(InstrumentError::ConstantPoolOverflow);
        }
        let width = constant.width();
        self.entries.push(constant);
        if width == 2 {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    /// Number of indices in use, i.e. the class file's `constant_pool_count - 1`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        if index == 0 {
            return Err(InstrumentError::BadConstantIndex { index });
        }
        match self.entries.get(index as usize - 1) {
            Some(Constant::Unusable) | None => Err(InstrumentError::BadConstantIndex { index }),
            Some(constant) => Ok(constant),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            other => Err(wrong_kind(index, "Utf8", other)),
        }
    }

    /// Internal (slash separated) name of a `Class` entry.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class { name } => self.utf8(*name),
            other => Err(wrong_kind(index, "Class", other)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(wrong_kind(index, "NameAndType", other)),
        }
    }

    pub fn fieldref(&self, index: u16) -> Result<FieldRef> {
        match self.get(index)? {
            Constant::Fieldref {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(FieldRef {
                    class_name: self.class_name(*class)?.replace('/', "."),
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                })
            }
            other => Err(wrong_kind(index, "Fieldref", other)),
        }
    }

    /// Type descriptor of a field, method or invokedynamic reference.
    pub fn member_descriptor(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Fieldref { name_and_type, .. }
            | Constant::Methodref { name_and_type, .. }
            | Constant::InterfaceMethodref { name_and_type, .. }
            | Constant::InvokeDynamic { name_and_type, .. } => {
                Ok(self.name_and_type(*name_and_type)?.1)
            }
            other => Err(wrong_kind(index, "member reference", other)),
        }
    }

    /// Operand stack words pushed by `ldc`/`ldc_w`/`ldc2_w` of this entry.
    pub fn loadable_words(&self, index: u16) -> Result<u32> {
        match self.get(index)? {
            Constant::Long(_) | Constant::Double(_) => Ok(2),
            Constant::Integer(_)
            | Constant::Float(_)
            | Constant::String { .. }
            | Constant::Class { .. }
            | Constant::MethodHandle { .. }
            | Constant::MethodType { .. } => Ok(1),
            other => Err(wrong_kind(index, "loadable constant", other)),
        }
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        self.find_or_push(Constant::Utf8(value.to_owned()))
    }

    /// Index of a `String` constant holding `value`, reusing an existing one.
    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        let utf8 = self.add_utf8(value)?;
        self.find_or_push(Constant::String { value: utf8 })
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.add_utf8(internal_name)?;
        self.find_or_push(Constant::Class { name })
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.find_or_push(Constant::NameAndType { name, descriptor })
    }

    pub fn add_fieldref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::Fieldref {
            class,
            name_and_type,
        })
    }

    pub fn add_methodref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::Methodref {
            class,
            name_and_type,
        })
    }

    fn find_or_push(&mut self, constant: Constant) -> Result<u16> {
        if let Some(position) = self.entries.iter().position(|entry| *entry == constant) {
            return Ok(position as u16 + 1);
        }
        self.push(constant)
    }
}

fn wrong_kind(index: u16, expected: &'static str, found: &Constant) -> InstrumentError {
    InstrumentError::WrongConstantKind {
        index,
        expected,
        found: found.kind(),
    }
}
