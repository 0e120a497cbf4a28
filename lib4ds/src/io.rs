use crate::error::*;
use crate::resolve::PendingReference;
use crate::types::*;
use bytes::{Buf, BufMut};
use encoding_rs::WINDOWS_1250;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::mem::size_of;
use typed_ints::TypedInt;

/// The only file version this codec reads and writes.
pub const FORMAT_VERSION: u16 = 29;

/// Which lookup table a frame id was entered into while reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTable {
    Frame,
    Joint,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub node: NodeIndex,
    pub table: FrameTable,
}

/// Per-pass state shared by every codec. Decoding threads it as `&mut`,
/// encoding as `&`.
pub struct Context {
    pub version: u16,
    pub material_count: u16,
    /// Indexed by frame id - 1.
    pub frames: Vec<FrameSlot>,
    pub joint_names: HashMap<String, FrameId>,
    /// Frame currently being read, used to attribute warnings.
    pub current: FrameId,
    /// Vertex counts of the LODs of the mesh being read.
    pub lod_vertex_counts: Vec<usize>,
    pub pending: Vec<PendingReference>,
    pub warnings: Vec<Warning>,
    /// Encode side: frame id assigned to each arena node.
    pub frame_ids: Vec<FrameId>,
}

impl Context {
    pub fn new() -> Context {
        Context {
            version: FORMAT_VERSION,
            material_count: 0,
            frames: vec![],
            joint_names: HashMap::new(),
            current: FrameId::new(0),
            lod_vertex_counts: vec![],
            pending: vec![],
            warnings: vec![],
            frame_ids: vec![],
        }
    }

    pub fn for_encode(material_count: u16, frame_ids: Vec<FrameId>) -> Context {
        Context {
            material_count,
            frame_ids,
            ..Context::new()
        }
    }

    /// Assigns the next sequential id to a frame about to be read.
    pub fn begin_frame(&mut self) -> (FrameId, NodeIndex) {
        let node = NodeIndex::new(self.frames.len());
        let id = FrameId::new((self.frames.len() + 1) as u16);
        self.frames.push(FrameSlot {
            node,
            table: FrameTable::Frame,
        });
        self.current = id;
        (id, node)
    }

    /// Moves the frame being read into the joint table.
    pub fn register_joint(&mut self, name: &str) {
        let current = self.current;
        if let Some(slot) = self.slot_mut(current) {
            slot.table = FrameTable::Joint;
        }
        self.joint_names.insert(name.to_owned(), current);
    }

    pub fn slot(&self, id: FrameId) -> Option<&FrameSlot> {
        match id.into_inner() {
            0 => None,
            n => self.frames.get(n as usize - 1),
        }
    }

    fn slot_mut(&mut self, id: FrameId) -> Option<&mut FrameSlot> {
        match id.into_inner() {
            0 => None,
            n => self.frames.get_mut(n as usize - 1),
        }
    }

    /// Queues a reference from the frame being read to `target`.
    pub fn defer(&mut self, kind: ReferenceKind, target: FrameId) {
        let node = NodeIndex::new(self.frames.len().saturating_sub(1));
        self.pending.push(PendingReference {
            node,
            from: self.current,
            target,
            kind,
        });
    }

    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Encode side: id of an arena node.
    pub fn frame_id(&self, referrer: NodeIndex, node: NodeIndex) -> EncodeResult<FrameId> {
        self.frame_ids
            .get(node.into_inner())
            .copied()
            .ok_or(EncodeError::DanglingReference {
                node: referrer,
                target: node,
            })
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

pub trait Readable<T> {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<T>;
}

pub trait Writable<T> {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()>;
}

/// Fails with `Truncated` unless `needed` more bytes are available.
pub fn ensure_remaining(from: &dyn Buf, needed: usize) -> DecodeResult<()> {
    if from.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: from.remaining(),
        });
    }
    Ok(())
}

pub fn read_fixed(from: &mut dyn Buf, length: usize) -> DecodeResult<Vec<u8>> {
    ensure_remaining(from, length)?;
    let mut bytes = vec![0u8; length];
    from.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Integer widths used as element counts in front of arrays.
pub trait Count: Copy {
    const LIMIT: usize;
    fn to_usize(self) -> usize;
    fn from_len(len: usize) -> Option<Self>;
}

macro_rules! count_impl {
    ($ty: ty) => {
        impl Count for $ty {
            const LIMIT: usize = <$ty>::MAX as usize;
            fn to_usize(self) -> usize {
                self as usize
            }
            fn from_len(len: usize) -> Option<Self> {
                <$ty>::try_from(len).ok()
            }
        }
    };
}

count_impl!(u8);
count_impl!(u16);
count_impl!(u32);

/// Converts a length to the count type in front of an array, failing with
/// `Capacity` when it does not fit.
pub fn count_of<L: Count>(len: usize, what: &'static str) -> EncodeResult<L> {
    L::from_len(len).ok_or(EncodeError::Capacity {
        what,
        count: len,
        limit: L::LIMIT,
    })
}

pub fn read_vec<L, T>(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Vec<T>>
where
    L: Count + Readable<L>,
    T: Readable<T>,
{
    read_vec_fn::<L, T, _>(from, ctx, |from, ctx| T::read(from, ctx))
}

pub fn read_vec_fn<L, T, F>(
    from: &mut dyn Buf,
    ctx: &mut Context,
    read_func: F,
) -> DecodeResult<Vec<T>>
where
    L: Count + Readable<L>,
    F: FnMut(&mut dyn Buf, &mut Context) -> DecodeResult<T>,
{
    let length = L::read(from, ctx)?.to_usize();
    read_n(from, ctx, length, read_func)
}

/// Reads `length` items whose count was stored elsewhere.
pub fn read_n<T, F>(
    from: &mut dyn Buf,
    ctx: &mut Context,
    length: usize,
    mut read_func: F,
) -> DecodeResult<Vec<T>>
where
    F: FnMut(&mut dyn Buf, &mut Context) -> DecodeResult<T>,
{
    // Counts come from the file, so don't trust them for the allocation.
    let mut result: Vec<T> = Vec::with_capacity(length.min(from.remaining()));
    for _ in 0..length {
        result.push(read_func(from, ctx)?);
    }
    Ok(result)
}

pub fn write_vec<L, T>(
    vec: &[T],
    to: &mut dyn BufMut,
    ctx: &Context,
    what: &'static str,
) -> EncodeResult<()>
where
    L: Count + Writable<L>,
    T: Writable<T>,
{
    count_of::<L>(vec.len(), what)?.write(to, ctx)?;
    write_all(vec, to, ctx)
}

pub fn write_all<T>(vec: &[T], to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()>
where
    T: Writable<T>,
{
    for item in vec {
        item.write(to, ctx)?;
    }
    Ok(())
}

impl Readable<String> for String {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let length = u8::read(from, ctx)?;
        let bytes = read_fixed(from, length as usize)?;
        // Every byte maps to a character in windows-1250 except a handful of
        // holes, which decode to U+FFFD instead of failing.
        let (text, _) = WINDOWS_1250.decode_without_bom_handling(&bytes);
        Ok(text.into_owned())
    }
}

impl Writable<String> for String {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        let (bytes, _, had_errors) = WINDOWS_1250.encode(self);
        if had_errors {
            return Err(EncodeError::String {
                text: self.clone(),
                reason: "contains characters outside windows-1250",
            });
        }
        if bytes.len() > u8::MAX as usize {
            return Err(EncodeError::String {
                text: self.clone(),
                reason: "longer than 255 bytes",
            });
        }
        (bytes.len() as u8).write(to, ctx)?;
        to.put_slice(&bytes);
        Ok(())
    }
}

impl Readable<bool> for bool {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        Ok(u8::read(from, ctx)? != 0)
    }
}

impl Writable<bool> for bool {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        (*self as u8).write(to, ctx)
    }
}

macro_rules! primitive_readable {
    ($ty: ty, $read_fn: ident) => {
        impl Readable<$ty> for $ty {
            fn read(from: &mut dyn Buf, _ctx: &mut Context) -> DecodeResult<Self> {
                ensure_remaining(from, size_of::<Self>())?;
                Ok(from.$read_fn())
            }
        }
    };
}

macro_rules! primitive_writable {
    ($ty: ty, $write_fn: ident) => {
        impl Writable<$ty> for $ty {
            fn write(&self, to: &mut dyn BufMut, _ctx: &Context) -> EncodeResult<()> {
                Ok(to.$write_fn(*self))
            }
        }
    };
}

primitive_readable!(u8, get_u8);
primitive_readable!(u16, get_u16_le);
primitive_readable!(u32, get_u32_le);
primitive_readable!(u64, get_u64_le);
primitive_readable!(f32, get_f32_le);

primitive_writable!(u8, put_u8);
primitive_writable!(u16, put_u16_le);
primitive_writable!(u32, put_u32_le);
primitive_writable!(u64, put_u64_le);
primitive_writable!(f32, put_f32_le);

// Flag words keep unknown bits so they survive a round trip untouched.
macro_rules! flags_codec {
    ($ty: ty, $bits: ty) => {
        impl Readable<$ty> for $ty {
            fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
                Ok(<$ty>::from_bits_retain(<$bits>::read(from, ctx)?))
            }
        }

        impl Writable<$ty> for $ty {
            fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
                self.bits().write(to, ctx)
            }
        }
    };
}

impl<T, X> Readable<TypedInt<T, X>> for TypedInt<T, X>
where
    T: Readable<T> + Copy,
{
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<TypedInt<T, X>> {
        T::read(from, ctx).map(Self::from)
    }
}

impl<T, X> Writable<TypedInt<T, X>> for TypedInt<T, X>
where
    T: Writable<T> + Copy,
{
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        self.inner().write(to, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut out = vec![];
        let ctx = Context::new();
        0x1234u16.write(&mut out, &ctx).unwrap();
        0xdeadbeefu32.write(&mut out, &ctx).unwrap();
        1.0f32.write(&mut out, &ctx).unwrap();
        assert_eq!(
            out,
            vec![0x34, 0x12, 0xef, 0xbe, 0xad, 0xde, 0x00, 0x00, 0x80, 0x3f]
        );

        let mut ctx = Context::new();
        let mut cursor: &[u8] = &out;
        assert_eq!(u16::read(&mut cursor, &mut ctx).unwrap(), 0x1234);
        assert_eq!(u32::read(&mut cursor, &mut ctx).unwrap(), 0xdeadbeef);
        assert_eq!(f32::read(&mut cursor, &mut ctx).unwrap(), 1.0);
    }

    #[test]
    fn short_read_reports_counts() {
        let mut ctx = Context::new();
        let mut cursor: &[u8] = &[1, 2];
        match u32::read(&mut cursor, &mut ctx) {
            Err(DecodeError::Truncated { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn strings_use_windows_1250() {
        let ctx = Context::new();
        let mut out = vec![];
        String::from("Žluťoučký").write(&mut out, &ctx).unwrap();
        assert_eq!(out[0] as usize, out.len() - 1);
        assert_eq!(out.len(), 10);
        // Ž is 0x8E in windows-1250
        assert_eq!(out[1], 0x8e);

        let mut ctx = Context::new();
        let text = String::read(&mut &out[..], &mut ctx).unwrap();
        assert_eq!(text, "Žluťoučký");
    }

    #[test]
    fn empty_string_is_a_single_zero() {
        let ctx = Context::new();
        let mut out = vec![];
        String::new().write(&mut out, &ctx).unwrap();
        assert_eq!(out, vec![0]);
    }

    #[test]
    fn unencodable_strings_are_rejected() {
        let ctx = Context::new();
        let mut out = vec![];
        assert!(matches!(
            String::from("日本").write(&mut out, &ctx),
            Err(EncodeError::String { .. })
        ));
        assert!(matches!(
            "x".repeat(256).write(&mut out, &ctx),
            Err(EncodeError::String { .. })
        ));
    }

    #[test]
    fn counted_vectors_check_capacity() {
        let ctx = Context::new();
        let mut out = vec![];
        let items = vec![7u16; 300];
        assert!(matches!(
            write_vec::<u8, u16>(&items, &mut out, &ctx, "items"),
            Err(EncodeError::Capacity {
                count: 300,
                limit: 255,
                ..
            })
        ));

        out.clear();
        write_vec::<u16, u16>(&items[..3], &mut out, &ctx, "items").unwrap();
        let mut ctx = Context::new();
        let back = read_vec::<u16, u16>(&mut &out[..], &mut ctx).unwrap();
        assert_eq!(back, vec![7, 7, 7]);
    }
}
