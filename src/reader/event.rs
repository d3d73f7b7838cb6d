use crate::reader::binder::FieldBinder;
use crate::reader::byte_stream::ByteStream;
use crate::reader::constant_pool::PoolMap;
use crate::reader::type_descriptor::TypeDescriptor;
use crate::reader::value_descriptor::ValueDescriptor;
use crate::reader::{Chunk, Error, Result};
use crate::{EVENT_TYPE_CONSTANT_POOL, EVENT_TYPE_METADATA};
use rustc_hash::{FxHashMap, FxHashSet};

/// A decoded event record, owned by its chunk.
#[derive(Debug)]
pub struct EventRecord<'a> {
    pub class_id: i64,
    /// Absolute offset of the record in the input buffer.
    pub offset: usize,
    pub value: ValueDescriptor<'a>,
}

pub struct Event<'a> {
    pub class: &'a TypeDescriptor,
    pub(crate) chunk: &'a Chunk<'a>,
    pub(crate) record: &'a EventRecord<'a>,
}

impl<'a> Event<'a> {
    pub fn value(&self) -> Accessor<'a> {
        Accessor {
            chunk: self.chunk,
            value: &self.record.value,
        }
    }

    pub fn offset(&self) -> usize {
        self.record.offset
    }
}

#[derive(Copy, Clone)]
pub struct Accessor<'a> {
    chunk: &'a Chunk<'a>,
    pub value: &'a ValueDescriptor<'a>,
}

impl<'a> Accessor<'a> {
    pub fn new(chunk: &'a Chunk<'a>, value: &'a ValueDescriptor<'a>) -> Self {
        Self { chunk, value }
    }

    /// Follows constant pool references. `None` for absent values and missing constants.
    pub fn get_resolved(&self) -> Option<Self> {
        self.chunk
            .constant_pool
            .lookup(self.value)
            .map(|value| Accessor {
                value,
                chunk: self.chunk,
            })
    }

    pub fn get_field(&self, name: &str) -> Option<Self> {
        let resolved = self.get_resolved()?;
        resolved
            .value
            .get_field(name, &self.chunk.metadata.class_registry)
            .map(|v| Self {
                chunk: self.chunk,
                value: v,
            })
            .and_then(|a| a.get_resolved())
    }

    pub fn as_iter(self) -> Option<impl Iterator<Item = Accessor<'a>>> {
        let chunk = self.chunk;
        match self.get_resolved()?.value {
            ValueDescriptor::Array(a) => Some(a.iter().map(move |v| Accessor { value: v, chunk })),
            _ => None,
        }
    }
}

/// Walks the data region of a chunk once, decoding every event record.
///
/// Metadata and checkpoint records have already been decoded; their byte ranges are listed in
/// `consumed` (offset to size) and are stepped over.
pub(crate) struct EventScanner<'s, 'a> {
    stream: &'s ByteStream<'a>,
    consumed: &'s FxHashMap<usize, usize>,
}

impl<'s, 'a> EventScanner<'s, 'a> {
    pub fn new(stream: &'s ByteStream<'a>, consumed: &'s FxHashMap<usize, usize>) -> Self {
        Self { stream, consumed }
    }

    pub fn scan(
        &self,
        binder: &mut FieldBinder,
        pools: &PoolMap<'a>,
    ) -> Result<Vec<EventRecord<'a>>> {
        let end_offset = self.stream.len();
        let no_pools_in_progress = FxHashSet::default();
        let mut events = vec![];
        let mut skipped = 0usize;
        let mut offset = 0;

        while offset < end_offset {
            if let Some(&size) = self.consumed.get(&offset) {
                offset += size;
                continue;
            }

            let mut header = self.stream.clone();
            header.seek(offset)?;
            let absolute = header.absolute_position();
            let size = header.read_i32()?;
            if size <= 0 {
                return Err(Error::InvalidRecordSize {
                    offset: absolute,
                    size: size as i64,
                });
            }
            let mut record = self.stream.sub_stream(offset, size as usize)?;
            record.skip(header.position() - offset)?;
            let event_type = record.read_i64()?;

            match event_type {
                EVENT_TYPE_METADATA | EVENT_TYPE_CONSTANT_POOL => {
                    tracing::trace!(offset = absolute, event_type, "Skipping unlinked intrinsic record");
                    skipped += 1;
                }
                _ => {
                    if binder.registry().get(event_type).is_none() {
                        return Err(Error::UnknownEventClass {
                            offset: absolute,
                            class_id: event_type,
                        });
                    }
                    let mut value = ValueDescriptor::try_new(&mut record, event_type, binder)?;
                    pools.link(&mut value, &no_pools_in_progress);
                    events.push(EventRecord {
                        class_id: event_type,
                        offset: absolute,
                        value,
                    });
                }
            }

            // the declared size wins over what the plan consumed
            offset += size as usize;
        }

        tracing::debug!(events = events.len(), skipped, "Scanned chunk events");
        Ok(events)
    }
}
