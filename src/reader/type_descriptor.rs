//! Descriptor of types declared in the JFR chunk.
//! TypeDescriptor defines the "schema" of types.
//! Event and ConstantPool values are parsed based on declared TypeDescriptor.

use crate::reader::byte_stream::ByteStream;
use crate::reader::{Error, Result};
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct StringTable(Vec<Rc<str>>);

impl StringTable {
    pub fn try_new(stream: &mut ByteStream) -> Result<StringTable> {
        let string_count = stream.read_i32()?.max(0) as usize;
        let mut strings = Vec::with_capacity(string_count.min(stream.remaining()));

        for _ in 0..string_count {
            strings.push(Rc::from(stream.read_string()?.as_ref()));
        }

        Ok(StringTable(strings))
    }

    pub fn get(&self, idx: i32, offset: usize) -> Result<&Rc<str>> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.0.get(i))
            .ok_or(Error::MalformedMetadata {
                offset,
                reason: format!("string index {} out of range", idx),
            })
    }
}

/// Well-known types the decoder understands by name.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BuiltinType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
    String,
    Thread,
    ThreadGroup,
    Class,
    ClassLoader,
    Module,
    Package,
    Method,
    Symbol,
    StackTrace,
    StackFrame,
    FrameType,
    ThreadState,
    LogLevel,
}

impl BuiltinType {
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "boolean" => Self::Boolean,
            "char" => Self::Char,
            "float" => Self::Float,
            "double" => Self::Double,
            "byte" => Self::Byte,
            "short" => Self::Short,
            "int" => Self::Int,
            "long" => Self::Long,
            "java.lang.String" => Self::String,
            "java.lang.Thread" => Self::Thread,
            "jdk.types.ThreadGroup" => Self::ThreadGroup,
            "java.lang.Class" => Self::Class,
            "jdk.types.ClassLoader" => Self::ClassLoader,
            "jdk.types.Module" => Self::Module,
            "jdk.types.Package" => Self::Package,
            "jdk.types.Method" => Self::Method,
            "jdk.types.Symbol" => Self::Symbol,
            "jdk.types.StackTrace" => Self::StackTrace,
            "jdk.types.StackFrame" => Self::StackFrame,
            "jdk.types.FrameType" => Self::FrameType,
            "jdk.types.ThreadState" => Self::ThreadState,
            "jdk.types.LogLevel" => Self::LogLevel,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::Float => "float",
            Self::Double => "double",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::String => "java.lang.String",
            Self::Thread => "java.lang.Thread",
            Self::ThreadGroup => "jdk.types.ThreadGroup",
            Self::Class => "java.lang.Class",
            Self::ClassLoader => "jdk.types.ClassLoader",
            Self::Module => "jdk.types.Module",
            Self::Package => "jdk.types.Package",
            Self::Method => "jdk.types.Method",
            Self::Symbol => "jdk.types.Symbol",
            Self::StackTrace => "jdk.types.StackTrace",
            Self::StackFrame => "jdk.types.StackFrame",
            Self::FrameType => "jdk.types.FrameType",
            Self::ThreadState => "jdk.types.ThreadState",
            Self::LogLevel => "jdk.types.LogLevel",
        }
    }

    /// Whether values of this type are encoded directly rather than field by field.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Char
                | Self::Float
                | Self::Double
                | Self::Byte
                | Self::Short
                | Self::Int
                | Self::Long
                | Self::String
        )
    }
}

/// Identity of a class that is stable across chunks for builtins, chunk-local otherwise.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeId {
    Builtin(BuiltinType),
    Class(i64),
}

impl TypeId {
    pub fn new(class_id: i64, name: &str) -> Self {
        BuiltinType::from_name(name)
            .map(TypeId::Builtin)
            .unwrap_or(TypeId::Class(class_id))
    }

    pub fn primitive(&self) -> Option<BuiltinType> {
        match self {
            TypeId::Builtin(b) if b.is_primitive() => Some(*b),
            _ => None,
        }
    }
}

/// Per-chunk registry of declared classes, indexed by id and by name.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    inner: FxHashMap<i64, TypeDescriptor>,
    by_name: FxHashMap<Rc<str>, i64>,
}

impl ClassRegistry {
    pub fn register(&mut self, class_id: i64, desc: TypeDescriptor) {
        self.by_name.insert(desc.name.clone(), class_id);
        self.inner.insert(class_id, desc);
    }

    pub fn get(&self, class_id: i64) -> Option<&TypeDescriptor> {
        self.inner.get(&class_id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name).and_then(|id| self.inner.get(id))
    }

    pub fn class_id(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.inner.values()
    }
}

#[derive(Debug)]
pub struct TypeDescriptor {
    pub class_id: i64,
    pub type_id: TypeId,
    pub name: Rc<str>,
    pub super_type: Option<Rc<str>>,
    pub simple_type: bool,
    pub fields: Vec<FieldDescriptor>,

    // these fields are filled by annotations
    pub label: Option<Rc<str>>,
    pub description: Option<Rc<str>>,
    pub experimental: bool,
    pub category: Vec<Rc<str>>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name.as_ref() == name)
    }
}

#[derive(Debug)]
pub struct FieldDescriptor {
    pub class_id: i64,
    pub type_id: TypeId,
    pub name: Rc<str>,
    pub label: Option<Rc<str>>,
    pub description: Option<Rc<str>>,
    pub experimental: bool,
    pub constant_pool: bool,
    pub array_type: bool,
    pub dimension: i32,
    pub unsigned: bool,
    pub unit: Option<Unit>,
    pub tick_unit: Option<TickUnit>,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Unit {
    Byte,
    PercentUnity,
    AddressUnity,
    Hz,
    Nanosecond,
    Millisecond,
    Second,
    EpochNano,
    EpochMilli,
    EpochSecond,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TickUnit {
    Timespan,
    Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_id_resolves_builtins_by_name() {
        assert_eq!(TypeId::Builtin(BuiltinType::Int), TypeId::new(4, "int"));
        assert_eq!(
            TypeId::Builtin(BuiltinType::StackTrace),
            TypeId::new(99, "jdk.types.StackTrace")
        );
        assert_eq!(TypeId::Class(200), TypeId::new(200, "com.example.Custom"));
        assert_eq!(Some(BuiltinType::String), TypeId::new(20, "java.lang.String").primitive());
        assert_eq!(None, TypeId::new(21, "java.lang.Thread").primitive());
    }

    #[test]
    fn test_builtin_name_round_trip() {
        for ty in [BuiltinType::Long, BuiltinType::Method, BuiltinType::LogLevel] {
            assert_eq!(Some(ty), BuiltinType::from_name(ty.name()));
        }
    }
}
