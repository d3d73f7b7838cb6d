//! Low-level representation of the decoded JFR values.

use crate::reader::binder::{FieldBinder, Step, ValueShape};
use crate::reader::byte_stream::ByteStream;
use crate::reader::type_descriptor::{BuiltinType, ClassRegistry};
use crate::reader::{Error, Result};
use std::borrow::Cow;
use std::rc::Rc;

const MAX_INLINE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ValueDescriptor<'a> {
    Primitive(Primitive<'a>),
    Object(Object<'a>),
    Array(Vec<ValueDescriptor<'a>>),
    /// Reference that has not been linked to a pool row (yet).
    ConstantPool { class_id: i64, constant_index: i64 },
    /// Reference linked to its pool row.
    Resolved(Rc<ValueDescriptor<'a>>),
    /// Skipped field, or a reference to a constant that does not exist.
    Absent,
}

impl<'a> ValueDescriptor<'a> {
    pub fn try_new(
        stream: &mut ByteStream<'a>,
        class_id: i64,
        binder: &mut FieldBinder,
    ) -> Result<ValueDescriptor<'a>> {
        Self::read_class(stream, class_id, binder, 0)
    }

    fn read_class(
        stream: &mut ByteStream<'a>,
        class_id: i64,
        binder: &mut FieldBinder,
        depth: usize,
    ) -> Result<ValueDescriptor<'a>> {
        if depth > MAX_INLINE_DEPTH {
            return Err(Error::NestingTooDeep { class_id });
        }

        let type_desc = binder
            .registry()
            .get(class_id)
            .ok_or(Error::UnknownType(class_id))?;
        if let Some(ty) = type_desc.type_id.primitive() {
            return Self::read_primitive(stream, ty);
        }

        let plan = binder.plan(class_id)?;
        let mut fields = vec![ValueDescriptor::Absent; plan.field_count];
        for step in plan.steps.iter() {
            match step {
                Step::Decode {
                    index,
                    shape,
                    array: false,
                } => fields[*index] = Self::read_shape(stream, shape, binder, depth)?,
                Step::Decode {
                    index,
                    shape,
                    array: true,
                } => {
                    let count = stream.read_i32()?.max(0) as usize;
                    let mut elems = Vec::with_capacity(count.min(stream.remaining()));
                    for _ in 0..count {
                        elems.push(Self::read_shape(stream, shape, binder, depth)?);
                    }
                    fields[*index] = ValueDescriptor::Array(elems);
                }
                Step::Skip(skip) => skip.apply(stream)?,
            }
        }

        Ok(ValueDescriptor::Object(Object { class_id, fields }))
    }

    fn read_shape(
        stream: &mut ByteStream<'a>,
        shape: &ValueShape,
        binder: &mut FieldBinder,
        depth: usize,
    ) -> Result<ValueDescriptor<'a>> {
        match *shape {
            ValueShape::Primitive(ty) => Self::read_primitive(stream, ty),
            ValueShape::Reference(class_id) => Ok(ValueDescriptor::ConstantPool {
                class_id,
                constant_index: stream.read_i64()?,
            }),
            ValueShape::Inline(class_id) => Self::read_class(stream, class_id, binder, depth + 1),
        }
    }

    fn read_primitive(stream: &mut ByteStream<'a>, ty: BuiltinType) -> Result<ValueDescriptor<'a>> {
        let value = match ty {
            BuiltinType::Int => Primitive::Integer(stream.read_i32()?),
            BuiltinType::Long => Primitive::Long(stream.read_i64()?),
            BuiltinType::Float => Primitive::Float(stream.read_f32()?),
            BuiltinType::Double => Primitive::Double(stream.read_f64()?),
            BuiltinType::Char => Primitive::Character(stream.read_char()?),
            BuiltinType::Boolean => Primitive::Boolean(stream.read_bool()?),
            BuiltinType::Short => Primitive::Short(stream.read_i16()?),
            BuiltinType::Byte => Primitive::Byte(stream.read_i8()?),
            BuiltinType::String => Primitive::String(stream.read_string()?),
            _ => return Ok(ValueDescriptor::Absent),
        };
        Ok(ValueDescriptor::Primitive(value))
    }

    /// Follows a linked reference. Unlinked references are returned as they are.
    pub fn follow(&self) -> &ValueDescriptor<'a> {
        match self {
            ValueDescriptor::Resolved(v) => v.follow(),
            v => v,
        }
    }

    pub fn get_field<'s>(
        &'s self,
        name: &str,
        registry: &ClassRegistry,
    ) -> Option<&'s ValueDescriptor<'a>> {
        match self.follow() {
            ValueDescriptor::Object(o) => registry
                .get(o.class_id)
                .and_then(|c| c.field_index(name))
                .and_then(|i| o.fields.get(i)),
            _ => None,
        }
    }

    /// Pushes the class ids of every unlinked constant pool reference reachable from this value.
    pub(crate) fn collect_references(&self, out: &mut Vec<i64>) {
        match self {
            ValueDescriptor::ConstantPool { class_id, .. } => out.push(*class_id),
            ValueDescriptor::Object(o) => o.fields.iter().for_each(|f| f.collect_references(out)),
            ValueDescriptor::Array(a) => a.iter().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object<'a> {
    pub class_id: i64,
    pub fields: Vec<ValueDescriptor<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive<'a> {
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Character(char),
    Boolean(bool),
    Short(i16),
    Byte(i8),
    String(Cow<'a, str>),
}

macro_rules! impl_try_from_primitive {
    ($ty:ty, $variant:ident) => {
        impl<'s, 'a> TryFrom<&'s ValueDescriptor<'a>> for $ty {
            type Error = Error;

            fn try_from(value: &'s ValueDescriptor<'a>) -> Result<Self> {
                match value.follow() {
                    ValueDescriptor::Primitive(Primitive::$variant(v)) => Ok(*v),
                    v => Err(Error::DeserializeError(format!(
                        "expected {}, found {:?}",
                        stringify!($variant),
                        v
                    ))),
                }
            }
        }
    };
}

impl_try_from_primitive!(i32, Integer);
impl_try_from_primitive!(i64, Long);
impl_try_from_primitive!(f32, Float);
impl_try_from_primitive!(f64, Double);
impl_try_from_primitive!(char, Character);
impl_try_from_primitive!(bool, Boolean);
impl_try_from_primitive!(i16, Short);
impl_try_from_primitive!(i8, Byte);

impl<'s, 'a> TryFrom<&'s ValueDescriptor<'a>> for &'s str {
    type Error = Error;

    fn try_from(value: &'s ValueDescriptor<'a>) -> Result<Self> {
        match value.follow() {
            ValueDescriptor::Primitive(Primitive::String(s)) => Ok(&**s),
            v => Err(Error::DeserializeError(format!("expected string, found {:?}", v))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::byte_stream::IntEncoding;
    use crate::reader::test_util::{registry, Buf, ClassDef};

    const INT: i64 = 4;
    const LONG: i64 = 5;
    const STRING: i64 = 20;
    const SYMBOL: i64 = 30;
    const FRAME: i64 = 40;
    const TRACE: i64 = 41;
    const METHOD: i64 = 42;

    fn decode<'a>(bytes: &'a [u8], class_id: i64, binder: &mut FieldBinder) -> ValueDescriptor<'a> {
        let mut stream = ByteStream::new(bytes);
        stream.set_int_encoding(IntEncoding::Compressed);
        let value = ValueDescriptor::try_new(&mut stream, class_id, binder).unwrap();
        assert_eq!(0, stream.remaining(), "plan must consume the whole value");
        value
    }

    #[test]
    fn test_decode_generic_object() {
        let registry = registry(vec![
            ClassDef::new(INT, "int"),
            ClassDef::new(STRING, "java.lang.String"),
            ClassDef::new(100, "T")
                .field("a", INT, false, 0)
                .field("b", STRING, false, 0)
                .field("refs", 100, true, 1),
        ]);
        let mut binder = FieldBinder::new(&registry, true);

        let mut buf = Buf::default();
        buf.int(5).string("x").int(2).long(0).long(1);
        let bytes = buf.into_inner();
        let value = decode(&bytes, 100, &mut binder);

        assert_eq!(
            Some(5),
            value.get_field("a", &registry).and_then(|v| i32::try_from(v).ok())
        );
        assert_eq!(
            Some("x"),
            value.get_field("b", &registry).and_then(|v| <&str>::try_from(v).ok())
        );
        assert_eq!(
            Some(&ValueDescriptor::Array(vec![
                ValueDescriptor::ConstantPool {
                    class_id: 100,
                    constant_index: 0
                },
                ValueDescriptor::ConstantPool {
                    class_id: 100,
                    constant_index: 1
                },
            ])),
            value.get_field("refs", &registry)
        );
    }

    #[test]
    fn test_appended_fields_are_consumed_but_not_materialized() {
        let registry = registry(vec![
            ClassDef::new(INT, "int"),
            ClassDef::new(LONG, "long"),
            ClassDef::new(STRING, "java.lang.String"),
            ClassDef::new(SYMBOL, "jdk.types.Symbol")
                .field("string", STRING, false, 0)
                .field("hash", LONG, false, 0)
                .field("tags", STRING, false, 1)
                .field("weight", INT, false, 0),
        ]);
        let mut binder = FieldBinder::new(&registry, true);

        let mut buf = Buf::default();
        buf.string("main").long(123_456_789).int(2).string("t1").string("t2").int(-1);
        // the sibling value right after must still decode correctly
        buf.string("next").long(1).int(0).int(3);
        let bytes = buf.into_inner();

        let mut stream = ByteStream::new(&bytes);
        stream.set_int_encoding(IntEncoding::Compressed);
        let first = ValueDescriptor::try_new(&mut stream, SYMBOL, &mut binder).unwrap();
        let second = ValueDescriptor::try_new(&mut stream, SYMBOL, &mut binder).unwrap();
        assert_eq!(0, stream.remaining());

        match first {
            ValueDescriptor::Object(o) => {
                assert_eq!(
                    ValueDescriptor::Primitive(Primitive::String(Cow::Borrowed("main"))),
                    o.fields[0]
                );
                assert!(o.fields[1..].iter().all(|f| *f == ValueDescriptor::Absent));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            Some("next"),
            second.get_field("string", &registry).and_then(|v| <&str>::try_from(v).ok())
        );
    }

    #[test]
    fn test_decode_inline_array_of_composites() {
        let registry = registry(vec![
            ClassDef::new(INT, "int"),
            ClassDef::new(6, "boolean"),
            ClassDef::new(METHOD, "jdk.types.Method"),
            ClassDef::new(43, "jdk.types.FrameType"),
            ClassDef::new(FRAME, "jdk.types.StackFrame")
                .field("method", METHOD, true, 0)
                .field("lineNumber", INT, false, 0)
                .field("bytecodeIndex", INT, false, 0)
                .field("type", 43, true, 0),
            ClassDef::new(TRACE, "jdk.types.StackTrace")
                .field("truncated", 6, false, 0)
                .field("frames", FRAME, false, 1),
        ]);
        let mut binder = FieldBinder::new(&registry, true);

        let mut buf = Buf::default();
        buf.boolean(true).int(2);
        buf.long(10).int(42).int(7).long(1);
        buf.long(11).int(-1).int(0).long(2);
        let bytes = buf.into_inner();
        let value = decode(&bytes, TRACE, &mut binder);

        let frames = match value.get_field("frames", &registry) {
            Some(ValueDescriptor::Array(frames)) => frames,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(2, frames.len());
        assert_eq!(
            Some(-1),
            frames[1]
                .get_field("lineNumber", &registry)
                .and_then(|v| i32::try_from(v).ok())
        );
        assert_eq!(
            Some(&ValueDescriptor::ConstantPool {
                class_id: METHOD,
                constant_index: 10
            }),
            frames[0].get_field("method", &registry)
        );
    }

    #[test]
    fn test_self_inlined_class_is_bounded() {
        let registry = registry(vec![ClassDef::new(300, "com.example.Node").field("next", 300, false, 0)]);
        let mut binder = FieldBinder::new(&registry, true);
        let bytes = [0u8; 8];
        let mut stream = ByteStream::new(&bytes);
        assert!(matches!(
            ValueDescriptor::try_new(&mut stream, 300, &mut binder),
            Err(Error::NestingTooDeep { class_id: 300 })
        ));
    }
}
