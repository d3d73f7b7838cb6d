//! Read JFR Metadata event.
//! Metadata event contains the type definitions to parse further constant pools and recorded events.
//!
//! Related JMC code: [ChunkMetadata.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/ChunkMetadata.java)

use crate::reader::byte_stream::ByteStream;
use crate::reader::type_descriptor::{
    ClassRegistry, FieldDescriptor, StringTable, TickUnit, TypeDescriptor, TypeId, Unit,
};
use crate::reader::{Error, Result};
use crate::EVENT_TYPE_METADATA;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::rc::Rc;
use std::str::FromStr;

/// Metadata written by the JDK nests five levels deep.
const MAX_ELEMENT_DEPTH: usize = 32;

#[derive(Debug)]
enum ElementType<'st> {
    Root(RootElement<'st>),
    Metadata(MetadataElement<'st>),
    Region(RegionElement),
    Class(ClassElement<'st>),
    Field(FieldElement<'st>),
    Annotation(AnnotationElement<'st>),
    Setting(SettingElement<'st>),
    Unknown,
}

impl<'st> ElementType<'st> {
    fn new(name: &str) -> Self {
        match name {
            "metadata" => ElementType::Metadata(MetadataElement::default()),
            "region" => ElementType::Region(RegionElement::default()),
            "class" => ElementType::Class(ClassElement::default()),
            "field" => ElementType::Field(FieldElement::default()),
            "setting" => ElementType::Setting(SettingElement::default()),
            "annotation" => ElementType::Annotation(AnnotationElement::default()),
            _ => ElementType::Unknown,
        }
    }

    fn append_child(&mut self, child: Self) {
        match self {
            ElementType::Root(e) => match child {
                ElementType::Metadata(m) => e.metadata = Some(m),
                ElementType::Region(r) => e.region = Some(r),
                _ => {}
            },
            ElementType::Metadata(e) => {
                if let ElementType::Class(c) = child {
                    e.classes.push(c)
                }
            }
            ElementType::Class(e) => match child {
                ElementType::Field(f) => e.fields.push(f),
                ElementType::Annotation(a) => e.annotations.push(a),
                ElementType::Setting(s) => e.settings.push(s),
                _ => {}
            },
            ElementType::Field(e) => {
                if let ElementType::Annotation(a) = child {
                    e.annotations.push(a)
                }
            }
            ElementType::Setting(e) => {
                if let ElementType::Annotation(a) = child {
                    e.annotations.push(a)
                }
            }
            _ => {}
        }
    }

    fn set_attribute(&mut self, key: &'st str, value: &'st Rc<str>, offset: usize) -> Result<()> {
        match self {
            ElementType::Class(c) => match key {
                "id" => c.class_id = parse_attribute(key, value, offset)?,
                "name" => c.type_identifier = Some(value),
                "superType" => c.super_type = Some(value),
                "simpleType" => c.simple_type = Some(parse_attribute(key, value, offset)?),
                _ => {}
            },
            ElementType::Field(f) => match key {
                "name" => f.field_identifier = Some(value),
                "class" => f.class_id = parse_attribute(key, value, offset)?,
                "constantPool" => f.constant_pool = Some(parse_attribute(key, value, offset)?),
                "dimension" => f.dimension = Some(parse_attribute(key, value, offset)?),
                _ => {}
            },
            ElementType::Annotation(a) => match key {
                "class" => a.class_id = parse_attribute(key, value, offset)?,
                _ => {
                    a.attributes.insert(key, value.clone());
                }
            },
            _ => {}
        }
        Ok(())
    }
}

fn parse_attribute<T: FromStr>(key: &str, value: &str, offset: usize) -> Result<T> {
    value.parse().map_err(|_| Error::MalformedMetadata {
        offset,
        reason: format!("invalid value {:?} for attribute {:?}", value, key),
    })
}

#[derive(Debug, Default)]
struct RootElement<'st> {
    metadata: Option<MetadataElement<'st>>,
    region: Option<RegionElement>,
}

#[derive(Debug, Default)]
struct MetadataElement<'st> {
    classes: Vec<ClassElement<'st>>,
}

#[derive(Debug, Default)]
struct RegionElement {}

#[derive(Debug, Default)]
struct ClassElement<'st> {
    annotations: Vec<AnnotationElement<'st>>,
    fields: Vec<FieldElement<'st>>,
    settings: Vec<SettingElement<'st>>,
    class_id: i64,
    type_identifier: Option<&'st Rc<str>>,
    super_type: Option<&'st Rc<str>>,
    simple_type: Option<bool>,
}

#[derive(Debug, Default)]
struct FieldElement<'st> {
    annotations: Vec<AnnotationElement<'st>>,
    field_identifier: Option<&'st Rc<str>>,
    class_id: i64,
    constant_pool: Option<bool>,
    dimension: Option<i32>,
}

#[derive(Debug, Default)]
struct AnnotationElement<'st> {
    class_id: i64,
    attributes: HashMap<&'st str, Rc<str>>,
}

#[derive(Debug, Default)]
struct SettingElement<'st> {
    annotations: Vec<AnnotationElement<'st>>,
}

#[derive(Debug, Default)]
pub struct Metadata {
    pub start_time: i64,
    pub duration: i64,
    pub metadata_id: i64,
    pub class_registry: ClassRegistry,
}

impl Metadata {
    /// Decodes the metadata record starting at the current position of `stream`.
    /// Returns the metadata and the declared record size.
    pub fn try_new(stream: &mut ByteStream) -> Result<(Self, usize)> {
        let start = stream.position();
        let offset = stream.absolute_position();
        let size = stream.read_i32()?;
        if size <= 0 {
            return Err(Error::InvalidRecordSize { offset, size: size as i64 });
        }
        let mut record = stream.sub_stream(start, size as usize)?;
        record.skip(stream.position() - start)?;

        if record.read_i64()? != EVENT_TYPE_METADATA {
            return Err(Error::MalformedMetadata {
                offset,
                reason: "record is not a metadata event".to_string(),
            });
        }
        let start_time = record.read_i64()?;
        let duration = record.read_i64()?;
        let metadata_id = record.read_i64()?;

        let string_table = StringTable::try_new(&mut record)?;
        let class_registry = Self::read_types(&mut record, &string_table)?;

        tracing::debug!(
            offset,
            size,
            classes = class_registry.len(),
            "Decoded chunk metadata"
        );

        let metadata = Self {
            start_time,
            duration,
            metadata_id,
            class_registry,
        };
        Ok((metadata, size as usize))
    }

    fn read_types(stream: &mut ByteStream, string_table: &StringTable) -> Result<ClassRegistry> {
        let mut class_name_map = FxHashMap::default();

        let offset = stream.absolute_position();
        let root_name = string_table.get(stream.read_i32()?, offset)?;
        if root_name.as_ref() != "root" {
            return Err(Error::MalformedMetadata {
                offset,
                reason: format!("root element is named {:?}", root_name),
            });
        }

        let root_element = Self::read_element(
            stream,
            string_table,
            &mut class_name_map,
            ElementType::Root(RootElement::default()),
            0,
        )?;

        if let ElementType::Root(root) = root_element {
            Self::declare_types(root, &class_name_map)
        } else {
            Err(Error::MalformedMetadata {
                offset,
                reason: "missing root element".to_string(),
            })
        }
    }

    fn read_element<'st>(
        stream: &mut ByteStream,
        string_table: &'st StringTable,
        class_name_map: &mut FxHashMap<i64, &'st str>,
        mut current_element: ElementType<'st>,
        depth: usize,
    ) -> Result<ElementType<'st>> {
        if depth > MAX_ELEMENT_DEPTH {
            return Err(Error::MalformedMetadata {
                offset: stream.absolute_position(),
                reason: format!("elements nest deeper than {}", MAX_ELEMENT_DEPTH),
            });
        }

        let attribute_count = stream.read_i32()?;
        for _ in 0..attribute_count {
            let offset = stream.absolute_position();
            let key = string_table.get(stream.read_i32()?, offset)?;
            let value = string_table.get(stream.read_i32()?, offset)?;
            current_element.set_attribute(key.as_ref(), value, offset)?;
        }

        // at this point, class name is already resolved from attributes
        if let ElementType::Class(c) = &current_element {
            if let Some(name) = c.type_identifier {
                class_name_map.insert(c.class_id, name.as_ref());
            }
        }

        let children_count = stream.read_i32()?;
        for _ in 0..children_count {
            let offset = stream.absolute_position();
            let name = string_table.get(stream.read_i32()?, offset)?;
            let element = ElementType::new(name.as_ref());
            current_element.append_child(Self::read_element(
                stream,
                string_table,
                class_name_map,
                element,
                depth + 1,
            )?);
        }

        Ok(current_element)
    }

    fn declare_types(
        root_element: RootElement,
        class_name_map: &FxHashMap<i64, &str>,
    ) -> Result<ClassRegistry> {
        let mut registry = ClassRegistry::default();
        let classes = match root_element.metadata {
            Some(m) => m.classes,
            None => return Ok(registry),
        };

        for class_element in classes {
            let name = class_element
                .type_identifier
                .cloned()
                .ok_or_else(|| Error::MalformedMetadata {
                    offset: 0,
                    reason: format!("class {} has no name", class_element.class_id),
                })?;
            let mut desc = TypeDescriptor {
                class_id: class_element.class_id,
                type_id: TypeId::new(class_element.class_id, name.as_ref()),
                name,
                super_type: class_element.super_type.cloned(),
                simple_type: class_element.simple_type.unwrap_or(false),
                fields: Vec::with_capacity(class_element.fields.len()),
                label: None,
                description: None,
                experimental: false,
                category: vec![],
            };

            for annot in class_element.annotations {
                Self::resolve_class_annotation(&mut desc, &annot, class_name_map);
            }

            for field in class_element.fields {
                let field_class_name = class_name_map.get(&field.class_id).copied().unwrap_or("");
                let dimension = field.dimension.unwrap_or(0);
                let mut field_desc = FieldDescriptor {
                    class_id: field.class_id,
                    type_id: TypeId::new(field.class_id, field_class_name),
                    name: field.field_identifier.cloned().ok_or_else(|| {
                        Error::MalformedMetadata {
                            offset: 0,
                            reason: format!("field of class {} has no name", desc.name),
                        }
                    })?,
                    label: None,
                    description: None,
                    experimental: false,
                    constant_pool: field.constant_pool.unwrap_or(false),
                    array_type: dimension > 0,
                    dimension,
                    unsigned: false,
                    unit: None,
                    tick_unit: None,
                };

                for annot in field.annotations {
                    Self::resolve_field_annotation(&mut field_desc, &annot, class_name_map);
                }
                desc.fields.push(field_desc);
            }

            registry.register(class_element.class_id, desc);
        }

        Ok(registry)
    }

    fn resolve_class_annotation(
        desc: &mut TypeDescriptor,
        annot: &AnnotationElement,
        class_name_map: &FxHashMap<i64, &str>,
    ) {
        if let Some(&name) = class_name_map.get(&annot.class_id) {
            match name {
                "jdk.jfr.Label" => desc.label = annot.attributes.get("value").cloned(),
                "jdk.jfr.Description" => desc.description = annot.attributes.get("value").cloned(),
                "jdk.jfr.Experimental" => desc.experimental = true,
                "jdk.jfr.Category" => {
                    let mut idx = 0;
                    while let Some(v) = annot.attributes.get(format!("value-{}", idx).as_str()) {
                        desc.category.push(v.clone());
                        idx += 1;
                    }
                }
                _ => {}
            }
        }
    }

    fn resolve_field_annotation(
        desc: &mut FieldDescriptor,
        annot: &AnnotationElement,
        class_name_map: &FxHashMap<i64, &str>,
    ) {
        if let Some(&name) = class_name_map.get(&annot.class_id) {
            match name {
                "jdk.jfr.Label" => desc.label = annot.attributes.get("value").cloned(),
                "jdk.jfr.Description" => desc.description = annot.attributes.get("value").cloned(),
                "jdk.jfr.Experimental" => desc.experimental = true,
                "jdk.jfr.Unsigned" => desc.unsigned = true,
                "jdk.jfr.MemoryAmount" | "jdk.jfr.DataAmount" => desc.unit = Some(Unit::Byte),
                "jdk.jfr.Percentage" => desc.unit = Some(Unit::PercentUnity),
                "jdk.jfr.MemoryAddress" => desc.unit = Some(Unit::AddressUnity),
                "jdk.jfr.Frequency" => desc.unit = Some(Unit::Hz),
                "jdk.jfr.Timespan" => match annot.attributes.get("value").map(|v| v.as_ref()) {
                    Some("TICKS") => desc.tick_unit = Some(TickUnit::Timespan),
                    Some("NANOSECONDS") => desc.unit = Some(Unit::Nanosecond),
                    Some("MILLISECONDS") => desc.unit = Some(Unit::Millisecond),
                    Some("SECONDS") => desc.unit = Some(Unit::Second),
                    _ => {}
                },
                "jdk.jfr.Timestamp" => match annot.attributes.get("value").map(|v| v.as_ref()) {
                    Some("TICKS") => desc.tick_unit = Some(TickUnit::Timestamp),
                    Some("NANOSECONDS_SINCE_EPOCH") => desc.unit = Some(Unit::EpochNano),
                    Some("MILLISECONDS_SINCE_EPOCH") => desc.unit = Some(Unit::EpochMilli),
                    Some("SECONDS_SINCE_EPOCH") => desc.unit = Some(Unit::EpochSecond),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}
