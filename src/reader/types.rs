//! Predefined JFR types for ease of consuming decoded events, and typed lookups into the
//! constant pools of a chunk.
//!
//! Related JMC code: [TypesImpl.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder.writer/src/main/java/org/openjdk/jmc/flightrecorder/writer/TypesImpl.java)

use crate::reader::de::from_value;
use crate::reader::type_descriptor::BuiltinType;
use crate::reader::{Chunk, Result};
use serde::Deserialize;

pub mod builtin {
    use serde::Deserialize;

    // Fields a producer may leave out (dangling references, fields skipped because their
    // shape changed) are Option or have a default.

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct JdkThread<'a> {
        pub os_name: Option<&'a str>,
        #[serde(default)]
        pub os_thread_id: i64,
        pub java_name: Option<&'a str>,
        #[serde(default)]
        pub java_thread_id: i64,
        #[serde(borrow)]
        pub group: Option<ThreadGroup<'a>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadGroup<'a> {
        #[serde(borrow, default)]
        pub parent: Option<Box<ThreadGroup<'a>>>,
        pub name: Option<&'a str>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StackTrace<'a> {
        #[serde(default)]
        pub truncated: bool,
        #[serde(borrow, default)]
        pub frames: Vec<Option<StackFrame<'a>>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StackFrame<'a> {
        #[serde(borrow)]
        pub method: Option<JdkMethod<'a>>,
        #[serde(default)]
        pub line_number: i32,
        #[serde(default)]
        pub bytecode_index: i32,
        #[serde(rename = "type", borrow)]
        pub frame_type: Option<FrameType<'a>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FrameType<'a> {
        pub description: Option<&'a str>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct JdkMethod<'a> {
        #[serde(rename = "type", borrow)]
        pub class: Option<Class<'a>>,
        #[serde(borrow)]
        pub name: Option<Symbol<'a>>,
        #[serde(borrow)]
        pub descriptor: Option<Symbol<'a>>,
        #[serde(default)]
        pub modifiers: i32,
        #[serde(default)]
        pub hidden: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Symbol<'a> {
        pub string: Option<&'a str>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Class<'a> {
        #[serde(borrow, default)]
        pub class_loader: Option<ClassLoader<'a>>,
        #[serde(borrow)]
        pub name: Option<Symbol<'a>>,
        #[serde(borrow, default)]
        pub package: Option<Package<'a>>,
        #[serde(default)]
        pub modifiers: i32,
        #[serde(default)]
        pub hidden: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Package<'a> {
        #[serde(borrow)]
        pub name: Option<Symbol<'a>>,
        #[serde(borrow)]
        pub module: Option<Module<'a>>,
        #[serde(default)]
        pub exported: bool,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Module<'a> {
        #[serde(borrow)]
        pub name: Option<Symbol<'a>>,
        #[serde(borrow)]
        pub version: Option<Symbol<'a>>,
        #[serde(borrow)]
        pub location: Option<Symbol<'a>>,
        #[serde(borrow, default)]
        pub class_loader: Option<ClassLoader<'a>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ClassLoader<'a> {
        #[serde(rename = "type", borrow, default)]
        pub class: Option<Box<Class<'a>>>,
        #[serde(borrow)]
        pub name: Option<Symbol<'a>>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ThreadState<'a> {
        pub name: Option<&'a str>,
    }
}

pub mod jdk {
    use super::builtin::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExecutionSample<'a> {
        #[serde(default)]
        pub start_time: i64,
        #[serde(borrow)]
        pub sampled_thread: Option<JdkThread<'a>>,
        #[serde(borrow)]
        pub stack_trace: Option<StackTrace<'a>>,
        #[serde(borrow)]
        pub state: Option<ThreadState<'a>>,
    }
}

use builtin::{Class, JdkMethod, StackTrace, Symbol, ThreadState};

impl<'a> Chunk<'a> {
    /// Deserializes the row `index` of the pool of a built-in type.
    ///
    /// A missing pool or row is `Ok(None)`, like any other dangling reference.
    fn resolve_builtin<'c, T>(chunk: &'c Chunk<'c>, ty: BuiltinType, index: i64) -> Result<Option<T>>
    where
        T: Deserialize<'c>,
    {
        let value = chunk
            .metadata
            .class_registry
            .class_id(ty.name())
            .and_then(|class_id| chunk.constant_pool.get(class_id, index));
        match value {
            Some(value) => from_value(chunk, value).map(Some),
            None => Ok(None),
        }
    }

    pub fn resolve_method(&self, index: i64) -> Result<Option<JdkMethod<'_>>> {
        Self::resolve_builtin(self, BuiltinType::Method, index)
    }

    pub fn resolve_class(&self, index: i64) -> Result<Option<Class<'_>>> {
        Self::resolve_builtin(self, BuiltinType::Class, index)
    }

    /// The text of a symbol.
    pub fn resolve_symbol(&self, index: i64) -> Result<Option<&str>> {
        let symbol: Option<Symbol> = Self::resolve_builtin(self, BuiltinType::Symbol, index)?;
        Ok(symbol.and_then(|s| s.string))
    }

    pub fn resolve_stack_trace(&self, index: i64) -> Result<Option<StackTrace<'_>>> {
        Self::resolve_builtin(self, BuiltinType::StackTrace, index)
    }

    pub fn resolve_thread_state(&self, index: i64) -> Result<Option<ThreadState<'_>>> {
        Self::resolve_builtin(self, BuiltinType::ThreadState, index)
    }
}
