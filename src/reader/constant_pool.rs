//! Constant pools of a chunk, read from the chain of checkpoint events.
//!
//! Pool rows may reference rows of other pools (or of their own pool) that appear later in the
//! chain, so references are linked in a second pass once every checkpoint has been read.
//!
//! Related JMC code: [ChunkLoaderV1.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/ChunkLoaderV1.java)

use crate::reader::binder::FieldBinder;
use crate::reader::byte_stream::{ByteStream, IntEncoding};
use crate::reader::value_descriptor::ValueDescriptor;
use crate::reader::{Error, Result};
use crate::EVENT_TYPE_CONSTANT_POOL;
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

const CHECKPOINT_TYPE_MASK: i32 = 1;

#[derive(Debug, Default)]
pub struct ConstantPool<'a> {
    pub(crate) inner: FxHashMap<i64, Rc<ValueDescriptor<'a>>>,
    resolved: bool,
}

impl<'a> ConstantPool<'a> {
    pub fn get(&self, constant_index: i64) -> Option<&ValueDescriptor<'a>> {
        self.inner.get(&constant_index).map(|v| v.as_ref())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &ValueDescriptor<'a>)> {
        self.inner.iter().map(|(k, v)| (*k, v.as_ref()))
    }
}

/// Every constant pool of a chunk, keyed by class id.
#[derive(Debug, Default)]
pub struct PoolMap<'a> {
    pub(crate) inner: FxHashMap<i64, ConstantPool<'a>>,
}

/// Summary of one checkpoint event.
#[derive(Debug)]
struct Checkpoint {
    size: usize,
    delta: i64,
}

impl<'a> PoolMap<'a> {
    /// Reads the checkpoint chain starting at `offset` (relative to `stream`).
    ///
    /// The byte range of every checkpoint read is recorded in `consumed`.
    pub fn try_new(
        stream: &ByteStream<'a>,
        offset: usize,
        binder: &mut FieldBinder,
        consumed: &mut FxHashMap<usize, usize>,
    ) -> Result<Self> {
        let mut pools = Self::default();
        let mut offset = offset as i64;
        loop {
            let position = usize::try_from(offset)
                .ok()
                .filter(|p| !consumed.contains_key(p))
                .ok_or_else(|| Error::MalformedCheckpoint {
                    offset: stream.absolute_position(),
                    reason: format!("checkpoint chain points to invalid offset {}", offset),
                })?;

            let checkpoint = pools.read_checkpoint_event(stream, position, binder)?;
            consumed.insert(position, checkpoint.size);

            if checkpoint.delta == 0 {
                break;
            }
            offset += checkpoint.delta;
        }

        tracing::debug!(
            pools = pools.inner.len(),
            constants = pools.row_count(),
            "Read constant pools"
        );
        Ok(pools)
    }

    pub fn register(&mut self, class_id: i64, constant_index: i64, value: ValueDescriptor<'a>) {
        self.inner
            .entry(class_id)
            .or_default()
            .inner
            .insert(constant_index, Rc::new(value));
    }

    pub fn get(&self, class_id: i64, constant_index: i64) -> Option<&ValueDescriptor<'a>> {
        self.get_rc(class_id, constant_index).map(|v| v.as_ref())
    }

    fn get_rc(&self, class_id: i64, constant_index: i64) -> Option<&Rc<ValueDescriptor<'a>>> {
        self.inner
            .get(&class_id)
            .and_then(|p| p.inner.get(&constant_index))
    }

    pub fn pool(&self, class_id: i64) -> Option<&ConstantPool<'a>> {
        self.inner.get(&class_id)
    }

    pub fn row_count(&self) -> usize {
        self.inner.values().map(|p| p.len()).sum()
    }

    fn read_checkpoint_event(
        &mut self,
        stream: &ByteStream<'a>,
        position: usize,
        binder: &mut FieldBinder,
    ) -> Result<Checkpoint> {
        let mut header = stream.clone();
        header.seek(position)?;
        let offset = header.absolute_position();
        let size = header.read_i32()?;
        if size <= 0 {
            return Err(Error::InvalidRecordSize {
                offset,
                size: size as i64,
            });
        }
        let mut record = stream.sub_stream(position, size as usize)?;
        record.skip(header.position() - position)?;

        if record.read_i64()? != EVENT_TYPE_CONSTANT_POOL {
            return Err(Error::MalformedCheckpoint {
                offset,
                reason: "record is not a checkpoint event".to_string(),
            });
        }

        // start
        record.read_i64()?;
        // duration
        record.read_i64()?;

        let delta = record.read_i64()?;
        let mask = match record.int_encoding() {
            IntEncoding::Compressed => record.read_i32()?,
            IntEncoding::Raw => record.read_i8()? as i32,
        };
        if mask != CHECKPOINT_TYPE_MASK {
            return Err(Error::UnsupportedCheckpointMask { offset, mask });
        }

        let pool_count = record.read_i32()?;
        for _ in 0..pool_count {
            let class_id = record.read_i64()?;
            let constant_count = record.read_i32()?;

            for _ in 0..constant_count {
                let constant_index = record.read_i64()?;
                let value = ValueDescriptor::try_new(&mut record, class_id, binder)?;
                self.register(class_id, constant_index, value);
            }
        }

        tracing::trace!(offset, size, delta, pool_count, "Read checkpoint");
        Ok(Checkpoint {
            size: size as usize,
            delta,
        })
    }

    /// Links the references of every pool that is not resolved yet.
    pub fn resolve(&mut self) {
        let mut class_ids: Vec<i64> = self.inner.keys().copied().collect();
        class_ids.sort_unstable();

        let mut in_progress = FxHashSet::default();
        let resolved = class_ids
            .into_iter()
            .filter(|&id| self.resolve_pool_inner(id, &mut in_progress))
            .count();
        tracing::debug!(resolved, "Resolved constant pools");
    }

    /// Links the references held by the rows of one pool, resolving the pools it refers to first.
    ///
    /// Returns `false` if the pool does not exist or was already resolved.
    pub fn resolve_pool(&mut self, class_id: i64) -> bool {
        self.resolve_pool_inner(class_id, &mut FxHashSet::default())
    }

    fn resolve_pool_inner(&mut self, class_id: i64, in_progress: &mut FxHashSet<i64>) -> bool {
        let pool = match self.inner.get_mut(&class_id) {
            Some(pool) if !pool.resolved => pool,
            _ => return false,
        };
        pool.resolved = true;
        in_progress.insert(class_id);

        let mut dependencies = vec![];
        for row in pool.inner.values() {
            row.collect_references(&mut dependencies);
        }
        dependencies.sort_unstable();
        dependencies.dedup();
        for dependency in dependencies {
            self.resolve_pool_inner(dependency, in_progress);
        }

        if let Some(pool) = self.inner.get_mut(&class_id) {
            let mut rows = std::mem::take(&mut pool.inner);
            for row in rows.values_mut() {
                // rows of a pool being resolved are never shared, so this does not clone
                self.link(Rc::make_mut(row), in_progress);
            }
            if let Some(pool) = self.inner.get_mut(&class_id) {
                pool.inner = rows;
            }
        }

        in_progress.remove(&class_id);
        true
    }

    /// Replaces the references in `value` by links to their rows.
    ///
    /// A reference to a missing pool or index becomes `Absent`. References into pools that are
    /// being resolved stay as they are and are looked up on access.
    pub(crate) fn link(&self, value: &mut ValueDescriptor<'a>, in_progress: &FxHashSet<i64>) {
        match value {
            ValueDescriptor::ConstantPool {
                class_id,
                constant_index,
            } => {
                if in_progress.contains(class_id) {
                    return;
                }
                *value = match self.get_rc(*class_id, *constant_index) {
                    Some(row) => ValueDescriptor::Resolved(row.clone()),
                    None => ValueDescriptor::Absent,
                };
            }
            ValueDescriptor::Object(o) => {
                for field in o.fields.iter_mut() {
                    self.link(field, in_progress);
                }
            }
            ValueDescriptor::Array(a) => {
                for elem in a.iter_mut() {
                    self.link(elem, in_progress);
                }
            }
            _ => {}
        }
    }

    /// Looks up a reference, linked or not. Missing constants yield `None`.
    pub fn lookup<'s>(&'s self, value: &'s ValueDescriptor<'a>) -> Option<&'s ValueDescriptor<'a>> {
        match value.follow() {
            ValueDescriptor::ConstantPool {
                class_id,
                constant_index,
            } => self.get(*class_id, *constant_index).map(|v| v.follow()),
            ValueDescriptor::Absent => None,
            v => Some(v),
        }
    }
}
