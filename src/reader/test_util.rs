//! Byte-level writers for building synthetic chunks in tests. Integers are written in the
//! compressed (varint) encoding unless a writer is given `IntEncoding::Raw`.

use crate::reader::byte_stream::{ByteStream, IntEncoding};
use crate::reader::chunk::CHUNK_HEADER_SIZE;
use crate::reader::metadata::Metadata;
use crate::reader::type_descriptor::ClassRegistry;
use crate::{EVENT_TYPE_CONSTANT_POOL, EVENT_TYPE_METADATA, MAGIC};

pub const T_CLASS: i64 = 100;

pub fn var_u32(mut x: u32) -> Vec<u8> {
    let mut out = vec![];
    while x >= 0x80 {
        out.push((x & 0x7f) as u8 | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
    out
}

pub fn var_u64(mut x: u64) -> Vec<u8> {
    let mut out = vec![];
    for _ in 0..8 {
        if x < 0x80 {
            out.push(x as u8);
            return out;
        }
        out.push((x & 0x7f) as u8 | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
    out
}

/// Record size in 4 bytes for either encoding, so the size can be patched in after the body is
/// known.
fn padded_size(size: usize, encoding: IntEncoding) -> Vec<u8> {
    let x = size as u32;
    if encoding == IntEncoding::Raw {
        return x.to_be_bytes().to_vec();
    }
    vec![
        (x & 0x7f) as u8 | 0x80,
        ((x >> 7) & 0x7f) as u8 | 0x80,
        ((x >> 14) & 0x7f) as u8 | 0x80,
        ((x >> 21) & 0x7f) as u8,
    ]
}

/// Any 64-bit value in a fixed width: a 9-byte varint, or 8 raw bytes.
fn padded_long(x: i64, encoding: IntEncoding) -> Vec<u8> {
    if encoding == IntEncoding::Raw {
        return x.to_be_bytes().to_vec();
    }
    let x = x as u64;
    let mut out: Vec<u8> = (0..8).map(|i| ((x >> (7 * i)) & 0x7f) as u8 | 0x80).collect();
    out.push((x >> 56) as u8);
    out
}

/// Prefixes `body` with its size. The size counts itself.
fn sized_record(body: Buf) -> Vec<u8> {
    let mut out = padded_size(body.bytes.len() + 4, body.encoding);
    out.extend(body.bytes);
    out
}

#[derive(Debug, Clone)]
pub struct Buf {
    bytes: Vec<u8>,
    encoding: IntEncoding,
}

impl Default for Buf {
    fn default() -> Self {
        Self::new(IntEncoding::Compressed)
    }
}

impl Buf {
    pub fn new(encoding: IntEncoding) -> Self {
        Self {
            bytes: vec![],
            encoding,
        }
    }

    pub fn int(&mut self, v: i32) -> &mut Self {
        match self.encoding {
            IntEncoding::Compressed => self.bytes.extend(var_u32(v as u32)),
            IntEncoding::Raw => self.bytes.extend_from_slice(&v.to_be_bytes()),
        }
        self
    }

    pub fn long(&mut self, v: i64) -> &mut Self {
        match self.encoding {
            IntEncoding::Compressed => self.bytes.extend(var_u64(v as u64)),
            IntEncoding::Raw => self.bytes.extend_from_slice(&v.to_be_bytes()),
        }
        self
    }

    /// UTF-8 tagged string.
    pub fn string(&mut self, v: &str) -> &mut Self {
        self.bytes.push(3);
        self.int(v.len() as i32);
        self.bytes.extend_from_slice(v.as_bytes());
        self
    }

    pub fn boolean(&mut self, v: bool) -> &mut Self {
        self.bytes.push(v as u8);
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: String,
    class_id: i64,
    constant_pool: bool,
    dimension: i32,
}

#[derive(Debug, Clone)]
struct AnnotationDef {
    class_id: i64,
    attributes: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    class_id: i64,
    name: String,
    fields: Vec<FieldDef>,
    annotations: Vec<AnnotationDef>,
}

impl ClassDef {
    pub fn new(class_id: i64, name: &str) -> Self {
        Self {
            class_id,
            name: name.to_string(),
            fields: vec![],
            annotations: vec![],
        }
    }

    pub fn field(mut self, name: &str, class_id: i64, constant_pool: bool, dimension: i32) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            class_id,
            constant_pool,
            dimension,
        });
        self
    }

    pub fn annotation(mut self, class_id: i64, attributes: &[(&str, &str)]) -> Self {
        self.annotations.push(AnnotationDef {
            class_id,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }
}

/// Element of the metadata tree, before string interning.
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: vec![],
            children: vec![],
        }
    }

    fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    fn intern(&self, strings: &mut Vec<String>) {
        let mut add = |s: &String| {
            if !strings.contains(s) {
                strings.push(s.clone());
            }
        };
        add(&self.name);
        for (k, v) in &self.attributes {
            add(k);
            add(v);
        }
        for c in &self.children {
            c.intern(strings);
        }
    }

    /// Writes attributes and children. The element's own name is written by the parent.
    fn write(&self, buf: &mut Buf, strings: &[String]) {
        let index = |s: &String| strings.iter().position(|x| x == s).unwrap_or(0) as i32;
        buf.int(self.attributes.len() as i32);
        for (k, v) in &self.attributes {
            buf.int(index(k)).int(index(v));
        }
        buf.int(self.children.len() as i32);
        for c in &self.children {
            buf.int(index(&c.name));
            c.write(buf, strings);
        }
    }
}

fn annotation_element(a: &AnnotationDef) -> Element {
    a.attributes
        .iter()
        .fold(Element::new("annotation").attr("class", a.class_id), |e, (k, v)| {
            e.attr(k, v)
        })
}

#[derive(Debug, Clone)]
pub struct MetadataWriter {
    classes: Vec<ClassDef>,
    root_name: String,
    unknown_root_children: Vec<String>,
    nested_root_children: Vec<(String, usize)>,
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self {
            classes: vec![],
            root_name: "root".to_string(),
            unknown_root_children: vec![],
            nested_root_children: vec![],
        }
    }
}

impl MetadataWriter {
    pub fn with_classes(classes: Vec<ClassDef>) -> Self {
        Self {
            classes,
            ..Default::default()
        }
    }

    pub fn class(&mut self, class: ClassDef) -> &mut Self {
        self.classes.push(class);
        self
    }

    pub fn root_name(&mut self, name: &str) -> &mut Self {
        self.root_name = name.to_string();
        self
    }

    pub fn unknown_root_child(&mut self, name: &str) -> &mut Self {
        self.unknown_root_children.push(name.to_string());
        self
    }

    /// An unknown element wrapping `depth` more elements of the same name.
    pub fn nested_root_child(&mut self, name: &str, depth: usize) -> &mut Self {
        self.nested_root_children.push((name.to_string(), depth));
        self
    }

    /// A complete metadata record, size prefix included.
    pub fn finish(&self) -> Vec<u8> {
        self.encode(IntEncoding::Compressed)
    }

    pub fn encode(&self, encoding: IntEncoding) -> Vec<u8> {
        let mut metadata = Element::new("metadata");
        for class in &self.classes {
            let mut e = Element::new("class")
                .attr("id", class.class_id)
                .attr("name", &class.name);
            for a in &class.annotations {
                e = e.child(annotation_element(a));
            }
            for f in &class.fields {
                let mut field = Element::new("field")
                    .attr("name", &f.name)
                    .attr("class", f.class_id);
                if f.constant_pool {
                    field = field.attr("constantPool", true);
                }
                if f.dimension > 0 {
                    field = field.attr("dimension", f.dimension);
                }
                e = e.child(field);
            }
            metadata = metadata.child(e);
        }

        let mut root = Element::new(&self.root_name)
            .child(metadata)
            .child(Element::new("region").attr("locale", "en_US"));
        for name in &self.unknown_root_children {
            root = root.child(Element::new(name).attr("unknown", 1).child(Element::new("nested")));
        }
        for (name, depth) in &self.nested_root_children {
            let element = (0..*depth).fold(Element::new(name), |e, _| Element::new(name).child(e));
            root = root.child(element);
        }

        let mut strings = vec![];
        root.intern(&mut strings);

        let mut body = Buf::new(encoding);
        body.long(EVENT_TYPE_METADATA).long(0).long(0).long(1);
        body.int(strings.len() as i32);
        for s in &strings {
            body.string(s);
        }
        body.int(0); // root name is always the first interned string
        root.write(&mut body, &strings);

        sized_record(body)
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    mask: i32,
    pools: Vec<(i64, Vec<(i64, Vec<u8>)>)>,
}

impl Default for CheckpointWriter {
    fn default() -> Self {
        Self {
            mask: 1,
            pools: vec![],
        }
    }
}

impl CheckpointWriter {
    /// Rows are `(constant index, encoded value)`.
    pub fn pool(&mut self, class_id: i64, rows: Vec<(i64, Vec<u8>)>) -> &mut Self {
        self.pools.push((class_id, rows));
        self
    }

    pub fn mask(&mut self, mask: i32) -> &mut Self {
        self.mask = mask;
        self
    }

    /// The length of the record does not depend on `delta`.
    pub fn finish(&self, delta: i64) -> Vec<u8> {
        self.encode(delta, IntEncoding::Compressed)
    }

    /// Rows must already be written in `encoding`.
    pub fn encode(&self, delta: i64, encoding: IntEncoding) -> Vec<u8> {
        let mut body = Buf::new(encoding);
        body.long(EVENT_TYPE_CONSTANT_POOL).long(0).long(0);
        body.raw(&padded_long(delta, encoding));
        match encoding {
            IntEncoding::Compressed => body.int(self.mask),
            IntEncoding::Raw => body.raw(&[self.mask as u8]),
        };
        body.int(self.pools.len() as i32);
        for (class_id, rows) in &self.pools {
            body.long(*class_id).int(rows.len() as i32);
            for (index, value) in rows {
                body.long(*index).raw(value);
            }
        }
        sized_record(body)
    }
}

pub fn registry_classes() -> Vec<ClassDef> {
    vec![
        ClassDef::new(4, "int"),
        ClassDef::new(20, "java.lang.String"),
        ClassDef::new(T_CLASS, "T")
            .field("a", 4, false, 0)
            .field("b", 20, false, 0),
    ]
}

/// Decodes the classes through an encoded metadata record.
pub fn registry(classes: Vec<ClassDef>) -> ClassRegistry {
    let bytes = MetadataWriter::with_classes(classes).finish();
    let mut stream = ByteStream::new(&bytes);
    stream.set_int_encoding(IntEncoding::Compressed);
    Metadata::try_new(&mut stream).unwrap().0.class_registry
}

enum Record {
    Metadata(Vec<u8>),
    Checkpoint(CheckpointWriter),
    Event(Vec<u8>),
}

impl Record {
    fn len(&self, encoding: IntEncoding) -> usize {
        match self {
            Record::Metadata(b) | Record::Event(b) => b.len(),
            Record::Checkpoint(c) => c.encode(0, encoding).len(),
        }
    }
}

/// Lays out records in the order they are added. Checkpoints are chained in that order.
pub struct ChunkBuilder {
    records: Vec<Record>,
    encoding: IntEncoding,
}

impl Default for ChunkBuilder {
    fn default() -> Self {
        Self::new(IntEncoding::Compressed)
    }
}

impl ChunkBuilder {
    /// Every record is written in `encoding`, and the header feature flag follows it.
    pub fn new(encoding: IntEncoding) -> Self {
        Self {
            records: vec![],
            encoding,
        }
    }

    pub fn metadata(&mut self, writer: MetadataWriter) -> &mut Self {
        self.records.push(Record::Metadata(writer.encode(self.encoding)));
        self
    }

    pub fn checkpoint(&mut self, writer: CheckpointWriter) -> &mut Self {
        self.records.push(Record::Checkpoint(writer));
        self
    }

    pub fn event(&mut self, type_id: i64, fields: impl FnOnce(&mut Buf)) -> &mut Self {
        let mut body = Buf::new(self.encoding);
        body.long(type_id);
        fields(&mut body);
        self.records.push(Record::Event(sized_record(body)));
        self
    }

    /// A record that is neither linked from the header nor chained.
    pub fn raw(&mut self, record: Vec<u8>) -> &mut Self {
        self.records.push(Record::Event(record));
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        if !self.records.iter().any(|r| matches!(r, Record::Metadata(_))) {
            self.metadata(MetadataWriter::default());
        }
        if !self.records.iter().any(|r| matches!(r, Record::Checkpoint(_))) {
            self.checkpoint(CheckpointWriter::default());
        }

        let mut offsets = Vec::with_capacity(self.records.len());
        let mut offset = 0;
        for r in &self.records {
            offsets.push(offset);
            offset += r.len(self.encoding);
        }
        let checkpoints: Vec<usize> = (0..self.records.len())
            .filter(|&i| matches!(self.records[i], Record::Checkpoint(_)))
            .collect();
        let metadata = (0..self.records.len())
            .find(|&i| matches!(self.records[i], Record::Metadata(_)))
            .unwrap();

        let mut body = vec![];
        for (i, r) in self.records.iter().enumerate() {
            match r {
                Record::Metadata(b) | Record::Event(b) => body.extend_from_slice(b),
                Record::Checkpoint(c) => {
                    let next = checkpoints.iter().skip_while(|&&j| j != i).nth(1);
                    let delta = next.map_or(0, |&n| offsets[n] as i64 - offsets[i] as i64);
                    body.extend(c.encode(delta, self.encoding));
                }
            }
        }

        let header_size = CHUNK_HEADER_SIZE as u64;
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&2u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(header_size + body.len() as u64).to_be_bytes());
        out.extend_from_slice(&(header_size + offsets[checkpoints[0]] as u64).to_be_bytes());
        out.extend_from_slice(&(header_size + offsets[metadata] as u64).to_be_bytes());
        out.extend_from_slice(&1_600_000_000_000_000_000i64.to_be_bytes());
        out.extend_from_slice(&1_000_000i64.to_be_bytes());
        out.extend_from_slice(&0i64.to_be_bytes());
        out.extend_from_slice(&1_000_000_000i64.to_be_bytes());
        let features: u32 = match self.encoding {
            IntEncoding::Compressed => 1,
            IntEncoding::Raw => 0,
        };
        out.extend_from_slice(&features.to_be_bytes());
        out.extend(body);
        out
    }
}

/// Class `T [a: int, b: String]` with a pool of two rows and no events.
pub fn sample_chunk() -> Vec<u8> {
    let row = |a: i32, b: &str| {
        let mut buf = Buf::default();
        buf.int(a).string(b);
        buf.into_inner()
    };
    let mut cp = CheckpointWriter::default();
    cp.pool(T_CLASS, vec![(0, row(5, "x")), (1, row(7, "y"))]);

    let mut builder = ChunkBuilder::default();
    builder.metadata(MetadataWriter::with_classes(registry_classes()));
    builder.checkpoint(cp);
    builder.build()
}
