/// Returned by every integer read once the cursor reaches the end of the data.
pub const END_OF_STREAM: i32 = -1;

/// Longest string (including the terminator) a read will keep.
pub const MAX_STRING_LENGTH: usize = 2048;

/// Fixed-capacity write buffer. Values are big-endian; writes that do not fit
/// are refused whole and flag the buffer as overflowed.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    data: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.overflowed = false;
    }

    /// Changes the capacity. Contents beyond the new capacity are discarded.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        if self.data.len() > capacity {
            self.data.truncate(capacity);
            self.overflowed = true;
        }
    }

    fn reserve(&mut self, size: usize) -> bool {
        if self.data.len() + size > self.capacity {
            if !self.overflowed {
                log::warn!(
                    "Packet buffer overflow: {} + {} bytes exceeds capacity {}",
                    self.data.len(),
                    size,
                    self.capacity
                );
            }
            self.overflowed = true;
            return false;
        }
        true
    }

    pub fn write_byte(&mut self, value: u8) {
        if self.reserve(1) {
            self.data.push(value);
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_byte(value as u8);
    }

    pub fn write_short(&mut self, value: i16) {
        if self.reserve(2) {
            self.data.extend_from_slice(&value.to_be_bytes());
        }
    }

    pub fn write_long(&mut self, value: i32) {
        if self.reserve(4) {
            self.data.extend_from_slice(&value.to_be_bytes());
        }
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_long(value.to_bits() as i32);
    }

    /// Writes the string followed by a NUL. Input is cut at its first NUL and
    /// at `MAX_STRING_LENGTH - 1` bytes so it always reads back intact.
    pub fn write_string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(bytes.len())
            .min(MAX_STRING_LENGTH - 1);

        if self.reserve(end + 1) {
            self.data.extend_from_slice(&bytes[..end]);
            self.data.push(0);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.reserve(bytes.len()) {
            self.data.extend_from_slice(bytes);
        }
    }
}

/// Read cursor over a received payload. The cursor never moves past the end;
/// reads that would cross it return `END_OF_STREAM` and leave it at the end.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Skips whatever is left.
    pub fn drain(&mut self) {
        self.cursor = self.data.len();
    }

    fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.remaining() < size {
            self.cursor = self.data.len();
            return None;
        }
        let slice = &self.data[self.cursor..self.cursor + size];
        self.cursor += size;
        Some(slice)
    }

    pub fn read_byte(&mut self) -> i32 {
        self.take(1).map_or(END_OF_STREAM, |b| b[0] as i32)
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_byte() > 0
    }

    /// Signed 16-bit value, sign-extended.
    pub fn read_short(&mut self) -> i32 {
        self.take(2)
            .map_or(END_OF_STREAM, |b| i16::from_be_bytes([b[0], b[1]]) as i32)
    }

    pub fn read_long(&mut self) -> i32 {
        self.take(4)
            .map_or(END_OF_STREAM, |b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Bit-reinterpreted long; past the end this is the reinterpretation of
    /// `END_OF_STREAM` (a NaN).
    pub fn read_float(&mut self) -> f32 {
        f32::from_bits(self.read_long() as u32)
    }

    /// Reads up to a NUL or the end. Characters past `MAX_STRING_LENGTH - 1`
    /// are consumed and dropped.
    pub fn read_string(&mut self) -> String {
        let mut bytes = Vec::new();
        loop {
            let c = self.read_byte();
            if c == END_OF_STREAM || c == 0 {
                break;
            }
            if bytes.len() < MAX_STRING_LENGTH - 1 {
                bytes.push(c as u8);
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn read_bytes(&mut self, size: usize) -> Option<&'a [u8]> {
        self.take(size)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.cursor..];
        self.cursor = self.data.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_values_read_back_in_order() {
        let mut buffer = PacketBuffer::new(128);
        buffer.write_byte(200);
        buffer.write_short(-1234);
        buffer.write_long(0x1234_5678);
        buffer.write_float(3.25);
        buffer.write_string("E1M1");
        buffer.write_bool(true);

        let mut reader = PacketReader::new(buffer.as_bytes());
        assert_eq!(reader.read_byte(), 200);
        assert_eq!(reader.read_short(), -1234);
        assert_eq!(reader.read_long(), 0x1234_5678);
        assert_eq!(reader.read_float(), 3.25);
        assert_eq!(reader.read_string(), "E1M1");
        assert!(reader.read_bool());
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_values_are_big_endian() {
        let mut buffer = PacketBuffer::new(16);
        buffer.write_short(0x0102);
        buffer.write_long(0x0304_0506);
        assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reads_past_end_return_sentinel() {
        let data = [7u8, 1];
        let mut reader = PacketReader::new(&data);

        assert_eq!(reader.read_long(), END_OF_STREAM);
        assert_eq!(reader.position(), data.len());
        assert_eq!(reader.read_byte(), END_OF_STREAM);
        assert_eq!(reader.read_short(), END_OF_STREAM);
        assert!(reader.read_float().is_nan());
        assert_eq!(reader.read_string(), "");
        assert_eq!(reader.position(), data.len());
    }

    #[test]
    fn test_partial_short_does_not_leak_next_bytes() {
        let data = [9u8];
        let mut reader = PacketReader::new(&data[..1]);
        assert_eq!(reader.read_short(), END_OF_STREAM);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_unterminated_string_stops_at_end() {
        let data = b"abc";
        let mut reader = PacketReader::new(data);
        assert_eq!(reader.read_string(), "abc");
        assert_eq!(reader.read_byte(), END_OF_STREAM);
    }

    #[test]
    fn test_long_string_is_truncated_on_read() {
        let mut data = vec![b'x'; MAX_STRING_LENGTH + 50];
        data.push(0);
        data.push(42);

        let mut reader = PacketReader::new(&data);
        let text = reader.read_string();
        assert_eq!(text.len(), MAX_STRING_LENGTH - 1);
        assert_eq!(reader.read_byte(), 42);
    }

    #[test]
    fn test_overflowing_write_is_refused() {
        let mut buffer = PacketBuffer::new(5);
        buffer.write_long(1);
        buffer.write_short(2);
        assert!(buffer.overflowed());
        assert_eq!(buffer.len(), 4);

        buffer.write_byte(3);
        assert_eq!(buffer.as_bytes(), &[0, 0, 0, 1, 3]);

        buffer.clear();
        assert!(!buffer.overflowed());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_string_with_embedded_nul_is_cut() {
        let mut buffer = PacketBuffer::new(32);
        buffer.write_string("ab\0cd");
        buffer.write_byte(1);

        let mut reader = PacketReader::new(buffer.as_bytes());
        assert_eq!(reader.read_string(), "ab");
        assert_eq!(reader.read_byte(), 1);
    }
}
