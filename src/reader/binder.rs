//! Binds the on-disk field layout of a class to a decode plan.
//!
//! The decoder knows an expected field layout for some well-known classes. Producers only ever
//! append fields to a class, so the expected layout is treated as a prefix of the declared one:
//! fields that match it are decoded, anything else (a changed shape, or fields appended by a newer
//! producer) is skipped structurally using the declared shape. Classes without an expected layout
//! decode every declared field.

use crate::reader::byte_stream::ByteStream;
use crate::reader::type_descriptor::{
    BuiltinType, ClassRegistry, FieldDescriptor, TypeDescriptor, TypeId,
};
use crate::reader::{Error, Result};
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// A field the decoder expects at a given position of a well-known class.
#[derive(Debug, Copy, Clone)]
pub struct ExpectedField {
    pub name: &'static str,
    pub ty: BuiltinType,
    pub constant_pool: bool,
    pub array: bool,
}

impl ExpectedField {
    const fn value(name: &'static str, ty: BuiltinType) -> Self {
        Self {
            name,
            ty,
            constant_pool: false,
            array: false,
        }
    }

    const fn reference(name: &'static str, ty: BuiltinType) -> Self {
        Self {
            name,
            ty,
            constant_pool: true,
            array: false,
        }
    }

    const fn array(name: &'static str, ty: BuiltinType) -> Self {
        Self {
            name,
            ty,
            constant_pool: false,
            array: true,
        }
    }

    /// Shape equality only. Field names are not compared.
    pub fn matches(&self, field: &FieldDescriptor) -> bool {
        field.type_id == TypeId::Builtin(self.ty)
            && field.constant_pool == self.constant_pool
            && field.array_type == self.array
    }
}

mod layouts {
    use super::ExpectedField as F;
    use crate::reader::type_descriptor::BuiltinType::*;

    pub const SYMBOL: &[F] = &[F::value("string", String)];
    pub const PACKAGE: &[F] = &[F::reference("name", Symbol)];
    pub const CLASS: &[F] = &[
        F::reference("classLoader", ClassLoader),
        F::reference("name", Symbol),
        F::reference("package", Package),
        F::value("modifiers", Int),
    ];
    pub const METHOD: &[F] = &[
        F::reference("type", Class),
        F::reference("name", Symbol),
        F::reference("descriptor", Symbol),
        F::value("modifiers", Int),
        F::value("hidden", Boolean),
    ];
    pub const STACK_FRAME: &[F] = &[
        F::reference("method", Method),
        F::value("lineNumber", Int),
        F::value("bytecodeIndex", Int),
        F::reference("type", FrameType),
    ];
    pub const STACK_TRACE: &[F] = &[
        F::value("truncated", Boolean),
        F::array("frames", StackFrame),
    ];
    pub const FRAME_TYPE: &[F] = &[F::value("description", String)];
    pub const THREAD_STATE: &[F] = &[F::value("name", String)];
    pub const LOG_LEVEL: &[F] = &[F::value("name", String)];
    pub const THREAD: &[F] = &[
        F::value("osName", String),
        F::value("osThreadId", Long),
        F::value("javaName", String),
        F::value("javaThreadId", Long),
        F::reference("group", ThreadGroup),
    ];
    pub const EXECUTION_SAMPLE: &[F] = &[
        F::value("startTime", Long),
        F::reference("sampledThread", Thread),
        F::reference("stackTrace", StackTrace),
        F::reference("state", ThreadState),
    ];
}

/// The compiled expected layout of a well-known class, if the decoder has one.
pub fn expected_layout(class_name: &str) -> Option<&'static [ExpectedField]> {
    let layout = match class_name {
        "jdk.types.Symbol" => layouts::SYMBOL,
        "jdk.types.Package" => layouts::PACKAGE,
        "java.lang.Class" => layouts::CLASS,
        "jdk.types.Method" => layouts::METHOD,
        "jdk.types.StackFrame" => layouts::STACK_FRAME,
        "jdk.types.StackTrace" => layouts::STACK_TRACE,
        "jdk.types.FrameType" => layouts::FRAME_TYPE,
        "jdk.types.ThreadState" => layouts::THREAD_STATE,
        "jdk.types.LogLevel" => layouts::LOG_LEVEL,
        "java.lang.Thread" => layouts::THREAD,
        "jdk.ExecutionSample" => layouts::EXECUTION_SAMPLE,
        _ => return None,
    };
    Some(layout)
}

/// How a single (non-array) value is read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValueShape {
    Primitive(BuiltinType),
    /// Constant pool index into the pool of the given class.
    Reference(i64),
    /// Value of the given class, encoded field by field.
    Inline(i64),
}

/// How a value is advanced past without being materialized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Skip {
    Primitive(BuiltinType),
    Reference,
    Inline(Vec<Skip>),
    Array(Box<Skip>),
}

impl Skip {
    pub fn apply(&self, stream: &mut ByteStream) -> Result<()> {
        match self {
            Skip::Primitive(ty) => stream.skip_primitive(*ty),
            Skip::Reference => stream.read_i64().map(drop),
            Skip::Inline(fields) => fields.iter().try_for_each(|f| f.apply(stream)),
            Skip::Array(element) => {
                let count = stream.read_i32()?;
                for _ in 0..count {
                    element.apply(stream)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Step {
    Decode {
        index: usize,
        shape: ValueShape,
        array: bool,
    },
    Skip(Skip),
}

/// Ordered steps reading one value of a class, following the class's declared field order.
#[derive(Debug)]
pub struct DecodePlan {
    pub class_id: i64,
    pub field_count: usize,
    pub steps: Vec<Step>,
}

impl DecodePlan {
    pub fn decoded_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().filter_map(|s| match s {
            Step::Decode { index, .. } => Some(*index),
            Step::Skip(_) => None,
        })
    }
}

/// Builds decode plans on first use and caches them for the lifetime of a chunk.
pub struct FieldBinder<'r> {
    registry: &'r ClassRegistry,
    use_expected_layouts: bool,
    plans: FxHashMap<i64, Rc<DecodePlan>>,
}

impl<'r> FieldBinder<'r> {
    pub fn new(registry: &'r ClassRegistry, use_expected_layouts: bool) -> Self {
        Self {
            registry,
            use_expected_layouts,
            plans: FxHashMap::default(),
        }
    }

    pub fn registry(&self) -> &'r ClassRegistry {
        self.registry
    }

    pub fn plan(&mut self, class_id: i64) -> Result<Rc<DecodePlan>> {
        if let Some(plan) = self.plans.get(&class_id) {
            return Ok(plan.clone());
        }
        let class = self
            .registry
            .get(class_id)
            .ok_or(Error::UnknownType(class_id))?;
        let plan = Rc::new(self.bind(class)?);
        self.plans.insert(class_id, plan.clone());
        Ok(plan)
    }

    fn bind(&self, class: &TypeDescriptor) -> Result<DecodePlan> {
        let expected = if self.use_expected_layouts {
            expected_layout(class.name())
        } else {
            None
        };

        let mut steps = Vec::with_capacity(class.fields.len());
        for (index, field) in class.fields.iter().enumerate() {
            let decode = match expected {
                Some(layout) => layout.get(index).map_or(false, |e| e.matches(field)),
                None => true,
            };
            let step = if decode {
                Step::Decode {
                    index,
                    shape: self.value_shape(class, field)?,
                    array: field.array_type,
                }
            } else {
                tracing::trace!(
                    class = class.name(),
                    field = field.name(),
                    "Field does not match the expected layout, skipping"
                );
                Step::Skip(self.skip_field(class, field, false, &mut vec![class.class_id])?)
            };
            steps.push(step);
        }

        Ok(DecodePlan {
            class_id: class.class_id,
            field_count: class.fields.len(),
            steps,
        })
    }

    fn value_shape(&self, class: &TypeDescriptor, field: &FieldDescriptor) -> Result<ValueShape> {
        if field.dimension > 1 {
            return Err(two_dimensional(class, field));
        }
        if field.constant_pool {
            return Ok(ValueShape::Reference(field.class_id));
        }
        Ok(match field.type_id.primitive() {
            Some(ty) => ValueShape::Primitive(ty),
            None => ValueShape::Inline(field.class_id),
        })
    }

    /// `visiting` holds the classes whose fields are currently being expanded.
    fn skip_field(
        &self,
        class: &TypeDescriptor,
        field: &FieldDescriptor,
        in_array: bool,
        visiting: &mut Vec<i64>,
    ) -> Result<Skip> {
        if field.dimension > 1 || (field.array_type && in_array) {
            return Err(two_dimensional(class, field));
        }
        let element = self.skip_value(field, in_array || field.array_type, visiting)?;
        Ok(if field.array_type {
            Skip::Array(Box::new(element))
        } else {
            element
        })
    }

    fn skip_value(
        &self,
        field: &FieldDescriptor,
        in_array: bool,
        visiting: &mut Vec<i64>,
    ) -> Result<Skip> {
        if field.constant_pool {
            return Ok(Skip::Reference);
        }
        if let Some(ty) = field.type_id.primitive() {
            return Ok(Skip::Primitive(ty));
        }

        let nested = self
            .registry
            .get(field.class_id)
            .ok_or(Error::UnknownType(field.class_id))?;
        if visiting.contains(&nested.class_id) {
            return Err(Error::NestingTooDeep {
                class_id: nested.class_id,
            });
        }
        if let Some(ty) = nested.type_id.primitive() {
            return Ok(Skip::Primitive(ty));
        }

        visiting.push(nested.class_id);
        let fields = nested
            .fields
            .iter()
            .map(|f| self.skip_field(nested, f, in_array, visiting))
            .collect::<Result<Vec<_>>>()?;
        visiting.pop();
        Ok(Skip::Inline(fields))
    }
}

fn two_dimensional(class: &TypeDescriptor, field: &FieldDescriptor) -> Error {
    Error::TwoDimensionalArrayUnsupported {
        class: class.name().to_string(),
        field: field.name().to_string(),
    }
}
