use crate::protocol::PacketTag;

pub const DEFAULT_POOL_CAPACITY: usize = 10;
pub const DEFAULT_SCRATCH_CAPACITY: usize = 256;

/// Hard failure while decoding a positional payload. A reader never returns
/// partial or default data; the packet is dropped at the dispatch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer underrun: needed {needed} bytes, {remaining} remaining")]
    Underrun { needed: usize, remaining: usize },
    #[error("string payload is not valid UTF-8")]
    Utf8,
}

/// Growable little-endian packet writer. Payloads are positional: fields must
/// be read back in the exact order they were written.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// u16 LE length prefix + UTF-8 bytes. Strings longer than 64 KiB are
    /// truncated at a char boundary rather than producing a corrupt prefix.
    pub fn write_str(&mut self, value: &str) {
        let mut bytes = value.as_bytes();
        if bytes.len() > u16::MAX as usize {
            let mut end = u16::MAX as usize;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            bytes = &value.as_bytes()[..end];
        }
        self.write_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }

    /// u32 LE length prefix + raw bytes.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value);
    }

    pub fn write_vec2(&mut self, x: f32, y: f32) {
        self.write_f32(x);
        self.write_f32(y);
    }

    pub fn write_tag(&mut self, tag: PacketTag) {
        self.write_u8(tag as u8);
    }

    /// Raw append without a length prefix, used for framing.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Embed another writer's accumulated buffer as a sub-packet.
    pub fn append(&mut self, other: &PacketWriter) {
        self.buf.extend_from_slice(&other.buf);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Cursor-based reader over an owned copy of a datagram. `load` copies the
/// bytes in, so a recycled source buffer can never be observed through an
/// outstanding reader.
#[derive(Debug, Default)]
pub struct PacketReader {
    data: Vec<u8>,
    cursor: usize,
}

impl PacketReader {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut reader = Self::new();
        reader.load(bytes);
        reader
    }

    pub fn load(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.cursor = 0;
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    fn take(&mut self, count: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < count {
            return Err(CodecError::Underrun {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let start = self.cursor;
        self.cursor += count;
        Ok(&self.data[start..self.cursor])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::Utf8)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_vec2(&mut self) -> Result<(f32, f32), CodecError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        Ok((x, y))
    }
}

/// Bounded recycle pool for writers and readers. Recycling clears all state;
/// callers must copy bytes out of a writer before returning it.
#[derive(Debug)]
pub struct PacketPool {
    writers: Vec<PacketWriter>,
    readers: Vec<PacketReader>,
    capacity: usize,
    scratch: usize,
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl PacketPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_scratch(capacity, DEFAULT_SCRATCH_CAPACITY)
    }

    /// `scratch` sizes fresh buffers; pooled ones keep whatever they grew to.
    pub fn with_scratch(capacity: usize, scratch: usize) -> Self {
        Self {
            writers: Vec::with_capacity(capacity),
            readers: Vec::with_capacity(capacity),
            capacity,
            scratch,
        }
    }

    pub fn writer(&mut self) -> PacketWriter {
        self.writers
            .pop()
            .unwrap_or_else(|| PacketWriter::with_capacity(self.scratch))
    }

    pub fn reader(&mut self) -> PacketReader {
        self.readers
            .pop()
            .unwrap_or_else(|| PacketReader::with_capacity(self.scratch))
    }

    pub fn recycle_writer(&mut self, mut writer: PacketWriter) {
        if self.writers.len() < self.capacity {
            writer.clear();
            self.writers.push(writer);
        }
    }

    pub fn recycle_reader(&mut self, mut reader: PacketReader) {
        if self.readers.len() < self.capacity {
            reader.clear();
            self.readers.push(reader);
        }
    }

    pub fn pooled_writers(&self) -> usize {
        self.writers.len()
    }

    pub fn pooled_readers(&self) -> usize {
        self.readers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut writer = PacketWriter::new();
        writer.write_u8(0xAB);
        writer.write_bool(true);
        writer.write_bool(false);
        writer.write_i32(-123456);
        writer.write_u32(0xDEADBEEF);
        writer.write_i64(-9_876_543_210);
        writer.write_u64(u64::MAX);
        writer.write_f32(3.25);
        writer.write_f64(-0.5);
        writer.write_vec2(1.5, -2.5);

        let mut reader = PacketReader::from_bytes(writer.as_slice());
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), -123456);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_i64().unwrap(), -9_876_543_210);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX);
        assert_eq!(reader.read_f32().unwrap(), 3.25);
        assert_eq!(reader.read_f64().unwrap(), -0.5);
        assert_eq!(reader.read_vec2().unwrap(), (1.5, -2.5));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_int_then_string() {
        let mut writer = PacketWriter::new();
        writer.write_i32(42);
        writer.write_str("hi");

        let mut reader = PacketReader::from_bytes(writer.as_slice());
        assert_eq!(reader.read_i32().unwrap(), 42);
        assert_eq!(reader.read_str().unwrap(), "hi");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_string_roundtrip_unicode() {
        let mut writer = PacketWriter::new();
        writer.write_str("");
        writer.write_str("zömbie 🧟");

        let mut reader = PacketReader::from_bytes(writer.as_slice());
        assert_eq!(reader.read_str().unwrap(), "");
        assert_eq!(reader.read_str().unwrap(), "zömbie 🧟");
    }

    #[test]
    fn test_bytes_roundtrip() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut writer = PacketWriter::new();
        writer.write_bytes(&payload);
        writer.write_bytes(&[]);

        let mut reader = PacketReader::from_bytes(writer.as_slice());
        assert_eq!(reader.read_bytes().unwrap(), payload);
        assert_eq!(reader.read_bytes().unwrap(), Vec::<u8>::new());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_underrun_never_partial() {
        let mut reader = PacketReader::from_bytes(&[1, 2]);
        assert_eq!(
            reader.read_u32(),
            Err(CodecError::Underrun {
                needed: 4,
                remaining: 2
            })
        );
        // Failed read must not advance the cursor.
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_underrun_each_primitive() {
        assert!(PacketReader::from_bytes(&[]).read_u8().is_err());
        assert!(PacketReader::from_bytes(&[0]).read_u16().is_err());
        assert!(PacketReader::from_bytes(&[0; 3]).read_i32().is_err());
        assert!(PacketReader::from_bytes(&[0; 7]).read_u64().is_err());
        assert!(PacketReader::from_bytes(&[0; 3]).read_f32().is_err());
        assert!(PacketReader::from_bytes(&[0; 7]).read_f64().is_err());
        assert!(PacketReader::from_bytes(&[0; 7]).read_vec2().is_err());
    }

    #[test]
    fn test_truncated_string_is_underrun() {
        let mut writer = PacketWriter::new();
        writer.write_str("hello");
        let bytes = &writer.as_slice()[..4];
        assert!(matches!(
            PacketReader::from_bytes(bytes).read_str(),
            Err(CodecError::Underrun { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut writer = PacketWriter::new();
        writer.write_u16(2);
        writer.write_u8(0xFF);
        writer.write_u8(0xFE);
        assert_eq!(
            PacketReader::from_bytes(writer.as_slice()).read_str(),
            Err(CodecError::Utf8)
        );
    }

    #[test]
    fn test_append_sub_packet() {
        let mut inner = PacketWriter::new();
        inner.write_u32(7);
        inner.write_str("sub");

        let mut outer = PacketWriter::new();
        outer.write_u8(1);
        outer.append(&inner);

        let mut reader = PacketReader::from_bytes(outer.as_slice());
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.read_str().unwrap(), "sub");
    }

    #[test]
    fn test_pool_recycles_cleared() {
        let mut pool = PacketPool::new(2);
        let mut writer = pool.writer();
        writer.write_u64(0xFFFF_FFFF_FFFF_FFFF);
        pool.recycle_writer(writer);

        let writer = pool.writer();
        assert!(writer.is_empty());

        let mut reader = pool.reader();
        reader.load(&[1, 2, 3]);
        pool.recycle_reader(reader);
        let reader = pool.reader();
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_pool_capacity_bounded() {
        let mut pool = PacketPool::new(2);
        for _ in 0..5 {
            pool.recycle_writer(PacketWriter::new());
            pool.recycle_reader(PacketReader::new());
        }
        assert_eq!(pool.pooled_writers(), 2);
        assert_eq!(pool.pooled_readers(), 2);
    }
}
