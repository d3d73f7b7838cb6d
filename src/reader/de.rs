//! serde support: deserialize decoded values into user-defined structs.
//!
//! Constant pool references are followed transparently. Absent values (dangling references and
//! fields skipped by the decode plan) are left out of objects, so they map to `None` for optional
//! fields and to the `#[serde(default)]` value for the others.
//!
//! Rows that reference each other through their pools are followed until a row already entered
//! on the way comes up again. That reference is treated as absent.

use crate::reader::event::Event;
use crate::reader::value_descriptor::{Object, Primitive, ValueDescriptor};
use crate::reader::{Chunk, Error, Result};
use serde::de::value::BorrowedStrDeserializer;
use serde::de::{Deserialize, DeserializeSeed, Visitor};
use serde::forward_to_deserialize_any;
use std::fmt::Display;
use std::rc::Rc;

/// Pool rows entered on the way to the current value, innermost first.
#[derive(Clone, Default)]
struct Trail(Option<Rc<Entered>>);

struct Entered {
    row: *const (),
    outer: Trail,
}

impl Trail {
    fn enter(&self, row: &ValueDescriptor<'_>) -> Self {
        Trail(Some(Rc::new(Entered {
            row: row as *const ValueDescriptor<'_> as *const (),
            outer: self.clone(),
        })))
    }

    fn contains(&self, row: &ValueDescriptor<'_>) -> bool {
        let row = row as *const ValueDescriptor<'_> as *const ();
        let mut next = &self.0;
        while let Some(entered) = next {
            if entered.row == row {
                return true;
            }
            next = &entered.outer.0;
        }
        false
    }
}

pub struct Deserializer<'de> {
    chunk: &'de Chunk<'de>,
    value: &'de ValueDescriptor<'de>,
    trail: Trail,
}

impl<'de> Deserializer<'de> {
    pub fn new(chunk: &'de Chunk<'de>, value: &'de ValueDescriptor<'de>) -> Self {
        Self {
            chunk,
            value,
            trail: Trail::default().enter(value),
        }
    }

    fn nested(chunk: &'de Chunk<'de>, value: &'de ValueDescriptor<'de>, trail: &Trail) -> Self {
        Self {
            chunk,
            value,
            trail: trail.clone(),
        }
    }

    /// Follows references to the row they point at. `None` for absent values, missing
    /// constants and rows already entered on the way here.
    fn resolved(self) -> Option<Self> {
        let Self {
            chunk,
            value,
            trail,
        } = self;
        let row = match value {
            ValueDescriptor::Resolved(row) => &**row,
            ValueDescriptor::ConstantPool {
                class_id,
                constant_index,
            } => chunk.constant_pool.get(*class_id, *constant_index)?,
            ValueDescriptor::Absent => return None,
            value => {
                return Some(Self {
                    chunk,
                    value,
                    trail,
                })
            }
        };
        if trail.contains(row) {
            tracing::trace!("Cyclic constant pool reference, treating as absent");
            return None;
        }
        Self {
            chunk,
            value: row,
            trail: trail.enter(row),
        }
        .resolved()
    }
}

pub fn from_value<'de, T>(chunk: &'de Chunk<'de>, value: &'de ValueDescriptor<'de>) -> Result<T>
where
    T: Deserialize<'de>,
{
    T::deserialize(Deserializer::new(chunk, value))
}

pub fn from_event<'de, T>(event: &Event<'de>) -> Result<T>
where
    T: Deserialize<'de>,
{
    from_value(event.chunk, &event.record.value)
}

impl serde::de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::DeserializeError(msg.to_string())
    }
}

struct ObjectDeserializer<'de> {
    chunk: &'de Chunk<'de>,
    trail: Trail,
    field_idx: usize,
    value: &'de Object<'de>,
}

impl<'de> serde::de::MapAccess<'de> for ObjectDeserializer<'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        let class = self
            .chunk
            .metadata
            .class_registry
            .get(self.value.class_id)
            .ok_or(Error::UnknownType(self.value.class_id))?;

        while let Some(field) = self.value.fields.get(self.field_idx) {
            if Deserializer::nested(self.chunk, field, &self.trail)
                .resolved()
                .is_some()
            {
                let name = class
                    .fields
                    .get(self.field_idx)
                    .map(|f| f.name())
                    .ok_or(Error::UnknownType(self.value.class_id))?;
                let key: BorrowedStrDeserializer<'de, Error> = BorrowedStrDeserializer::new(name);
                return seed.deserialize(key).map(Some);
            }
            self.field_idx += 1;
        }
        Ok(None)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let field = self.value.fields.get(self.field_idx).ok_or_else(|| {
            Error::DeserializeError("value requested past the last field".to_string())
        })?;
        self.field_idx += 1;
        seed.deserialize(Deserializer::nested(self.chunk, field, &self.trail))
    }
}

struct ArrayDeserializer<'de> {
    chunk: &'de Chunk<'de>,
    trail: Trail,
    iter: std::slice::Iter<'de, ValueDescriptor<'de>>,
}

impl<'de> serde::de::SeqAccess<'de> for ArrayDeserializer<'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        let (chunk, trail) = (self.chunk, &self.trail);
        self.iter
            .next()
            .map(|v| seed.deserialize(Deserializer::nested(chunk, v, trail)))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

impl<'de> serde::Deserializer<'de> for Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        use crate::reader::value_descriptor::Primitive::*;

        let Deserializer {
            chunk,
            value,
            trail,
        } = self
            .resolved()
            .ok_or_else(|| Error::DeserializeError("value is absent".to_string()))?;
        match value {
            ValueDescriptor::Primitive(p) => match p {
                Integer(v) => visitor.visit_i32(*v),
                Long(v) => visitor.visit_i64(*v),
                Float(v) => visitor.visit_f32(*v),
                Double(v) => visitor.visit_f64(*v),
                Character(v) => visitor.visit_char(*v),
                Boolean(v) => visitor.visit_bool(*v),
                Short(v) => visitor.visit_i16(*v),
                Byte(v) => visitor.visit_i8(*v),
                // owned strings live in the value, which outlives 'de as well
                Primitive::String(v) => visitor.visit_borrowed_str(v.as_ref()),
            },
            ValueDescriptor::Object(obj) => visitor.visit_map(ObjectDeserializer {
                chunk,
                trail,
                field_idx: 0,
                value: obj,
            }),
            ValueDescriptor::Array(array) => visitor.visit_seq(ArrayDeserializer {
                chunk,
                trail,
                iter: array.iter(),
            }),
            // resolved() never returns references
            _ => Err(Error::DeserializeError("unresolved value".to_string())),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.resolved() {
            Some(resolved) => visitor.visit_some(resolved),
            None => visitor.visit_none(),
        }
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier struct
    }
}
