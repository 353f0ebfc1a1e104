use super::protocol::{
    DEFAULT_MAX_PACKET_SIZE, MAX_UDP_PACKET, PACKET_RING_SIZE, frame_payload, reliable_datagram,
    unreliable_datagram,
};
use super::stream::PacketBuffer;

/// Headroom kept below `max_packet_size` for the datagram header and sequence.
const PACKET_HEADROOM: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SentPacketRecord {
    sequence: i32,
    offset: usize,
    length: usize,
}

impl SentPacketRecord {
    fn overlaps(&self, offset: usize, length: usize) -> bool {
        self.offset < offset + length && offset < self.offset + self.length
    }
}

/// The last N reliable frames, kept in one byte arena that wraps to offset 0.
/// A sequence is resendable only while its record is intact: the record slot
/// is shared with `sequence + N` and the bytes may be overwritten when the
/// arena wraps.
#[derive(Debug)]
pub struct RetentionRing {
    arena: Vec<u8>,
    cursor: usize,
    records: Vec<Option<SentPacketRecord>>,
}

impl RetentionRing {
    pub fn new(max_packet_size: usize, ring_size: usize) -> Self {
        let ring_size = ring_size.max(1);
        Self {
            arena: vec![0; max_packet_size * ring_size],
            cursor: 0,
            records: vec![None; ring_size],
        }
    }

    pub fn ring_size(&self) -> usize {
        self.records.len()
    }

    pub fn arena_size(&self) -> usize {
        self.arena.len()
    }

    fn slot(&self, sequence: i32) -> usize {
        sequence as usize % self.records.len()
    }

    pub fn store(&mut self, sequence: i32, frame: &[u8]) {
        let slot = self.slot(sequence);
        if frame.len() > self.arena.len() {
            self.records[slot] = None;
            return;
        }

        if self.cursor + frame.len() >= self.arena.len() {
            self.cursor = 0;
        }
        let offset = self.cursor;

        for record in self.records.iter_mut() {
            if record.is_some_and(|r| r.overlaps(offset, frame.len())) {
                *record = None;
            }
        }

        self.arena[offset..offset + frame.len()].copy_from_slice(frame);
        self.cursor += frame.len();
        self.records[slot] = Some(SentPacketRecord {
            sequence,
            offset,
            length: frame.len(),
        });
    }

    pub fn get(&self, sequence: i32) -> Option<&[u8]> {
        if sequence < 0 {
            return None;
        }
        let record = self.records[self.slot(sequence)]?;
        if record.sequence != sequence {
            return None;
        }
        Some(&self.arena[record.offset..record.offset + record.length])
    }

    pub fn contains(&self, sequence: i32) -> bool {
        self.get(sequence).is_some()
    }

    /// Grows the arena for a larger packet size. Existing records stay valid.
    pub fn grow(&mut self, max_packet_size: usize) {
        let wanted = max_packet_size * self.records.len();
        if wanted > self.arena.len() {
            self.arena.resize(wanted, 0);
        }
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
        self.records.iter_mut().for_each(|r| *r = None);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub reliable_packets: u64,
    pub unreliable_packets: u64,
    pub premature_flushes: u64,
    pub resent_packets: u64,
    pub payload_bytes: u64,
    pub framed_bytes: u64,
}

/// Per-connection outbound state: reliable and unreliable assembly buffers,
/// the reliable sequence counter and the retention ring.
///
/// Finished datagrams collect in an outgoing queue which the owner drains
/// onto the socket.
#[derive(Debug)]
pub struct Channel {
    reliable: PacketBuffer,
    unreliable: PacketBuffer,
    ring: RetentionRing,
    next_sequence: i32,
    max_packet_size: usize,
    compression: bool,
    outgoing: Vec<Vec<u8>>,
    stats: ChannelStats,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE, PACKET_RING_SIZE, true)
    }
}

impl Channel {
    pub fn new(max_packet_size: usize, ring_size: usize, compression: bool) -> Self {
        let max_packet_size = max_packet_size.clamp(PACKET_HEADROOM * 2, MAX_UDP_PACKET);
        Self {
            reliable: PacketBuffer::new(MAX_UDP_PACKET),
            unreliable: PacketBuffer::new(MAX_UDP_PACKET),
            ring: RetentionRing::new(max_packet_size, ring_size),
            next_sequence: 0,
            max_packet_size,
            compression,
            outgoing: Vec::new(),
            stats: ChannelStats::default(),
        }
    }

    pub fn next_sequence(&self) -> i32 {
        self.next_sequence
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn ring(&self) -> &RetentionRing {
        &self.ring
    }

    pub fn set_max_packet_size(&mut self, max_packet_size: usize) {
        self.max_packet_size = max_packet_size.clamp(PACKET_HEADROOM * 2, MAX_UDP_PACKET);
        self.ring.grow(self.max_packet_size);
    }

    pub fn set_compression(&mut self, compression: bool) {
        self.compression = compression;
    }

    pub fn pending_reliable(&self) -> usize {
        self.reliable.len()
    }

    pub fn pending_unreliable(&self) -> usize {
        self.unreliable.len()
    }

    fn needs_flush(buffer: &PacketBuffer, size: usize, max_packet_size: usize) -> bool {
        !buffer.is_empty() && buffer.len() + size + PACKET_HEADROOM >= max_packet_size
    }

    /// Appends one encoded command to the reliable buffer, launching the
    /// buffer first when the command would not fit.
    pub fn push_reliable(&mut self, command: &[u8]) {
        if Self::needs_flush(&self.reliable, command.len(), self.max_packet_size) {
            self.stats.premature_flushes += 1;
            self.flush_reliable();
        }
        self.reliable.write_bytes(command);
    }

    pub fn push_unreliable(&mut self, command: &[u8]) {
        if Self::needs_flush(&self.unreliable, command.len(), self.max_packet_size) {
            self.stats.premature_flushes += 1;
            self.flush_unreliable();
        }
        self.unreliable.write_bytes(command);
    }

    pub fn flush_reliable(&mut self) {
        if self.reliable.is_empty() {
            return;
        }
        let sequence = self.next_sequence;
        let frame = frame_payload(self.reliable.as_bytes(), self.compression);

        self.stats.payload_bytes += self.reliable.len() as u64;
        self.stats.framed_bytes += frame.len() as u64;
        self.stats.reliable_packets += 1;

        self.ring.store(sequence, &frame);
        self.outgoing.push(reliable_datagram(sequence, &frame));
        self.next_sequence = (sequence + 1) & i32::MAX;
        self.reliable.clear();
    }

    pub fn flush_unreliable(&mut self) {
        if self.unreliable.is_empty() {
            return;
        }
        let frame = frame_payload(self.unreliable.as_bytes(), self.compression);

        self.stats.payload_bytes += self.unreliable.len() as u64;
        self.stats.framed_bytes += frame.len() as u64;
        self.stats.unreliable_packets += 1;

        self.outgoing.push(unreliable_datagram(&frame));
        self.unreliable.clear();
    }

    pub fn flush(&mut self) {
        self.flush_reliable();
        self.flush_unreliable();
    }

    /// Queues the retained bytes of `sequence` again. Returns false when the
    /// sequence has left the ring.
    pub fn resend(&mut self, sequence: i32) -> bool {
        let Some(frame) = self.ring.get(sequence) else {
            return false;
        };
        let datagram = reliable_datagram(sequence, frame);
        self.outgoing.push(datagram);
        self.stats.resent_packets += 1;
        true
    }

    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    /// Forgets everything: buffered commands, unsent datagrams, retained
    /// packets and the sequence counter.
    pub fn reset(&mut self) {
        self.reliable.clear();
        self.unreliable.clear();
        self.ring.clear();
        self.outgoing.clear();
        self.next_sequence = 0;
        self.stats = ChannelStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{ServerDatagram, parse_server_datagram};

    fn reliable_sequences(datagrams: &[Vec<u8>]) -> Vec<i32> {
        datagrams
            .iter()
            .filter_map(|d| match parse_server_datagram(d).unwrap() {
                ServerDatagram::Reliable { sequence, .. } => Some(sequence),
                ServerDatagram::Unreliable { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_flushes_carry_increasing_sequences() {
        let mut channel = Channel::default();
        for i in 0..5u8 {
            channel.push_reliable(&[i, i, i]);
            channel.flush();
        }
        let out = channel.take_outgoing();
        assert_eq!(reliable_sequences(&out), vec![0, 1, 2, 3, 4]);
        assert_eq!(channel.next_sequence(), 5);
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let mut channel = Channel::default();
        channel.flush();
        assert!(channel.take_outgoing().is_empty());
        assert_eq!(channel.next_sequence(), 0);
    }

    #[test]
    fn test_resend_is_byte_identical() {
        let mut channel = Channel::default();
        for i in 0..8u8 {
            channel.push_reliable(&[10, i, 0, 0, i]);
            channel.flush();
        }
        let original = channel.take_outgoing();

        assert!(channel.resend(5));
        assert!(channel.resend(7));
        let resent = channel.take_outgoing();

        assert_eq!(resent[0], original[5]);
        assert_eq!(resent[1], original[7]);
        assert_eq!(channel.stats().resent_packets, 2);
    }

    #[test]
    fn test_evicted_sequence_cannot_be_resent() {
        let mut channel = Channel::new(64, 4, true);
        for i in 0..6u8 {
            channel.push_reliable(&[i; 8]);
            channel.flush();
        }
        channel.take_outgoing();

        assert!(!channel.resend(0));
        assert!(!channel.resend(1));
        assert!(channel.resend(5));
        assert!(!channel.resend(6));
        assert!(!channel.resend(-1));
    }

    #[test]
    fn test_arena_wrap_invalidates_overwritten_records() {
        let mut ring = RetentionRing::new(10, 4);
        ring.store(0, &[1; 15]);
        ring.store(1, &[2; 15]);
        // Does not fit after offset 30 of 40: wraps and overwrites sequence 0.
        ring.store(2, &[3; 15]);

        assert!(!ring.contains(0));
        assert_eq!(ring.get(1), Some(&[2u8; 15][..]));
        assert_eq!(ring.get(2), Some(&[3u8; 15][..]));
    }

    #[test]
    fn test_premature_flush_splits_packets() {
        let mut channel = Channel::new(100, PACKET_RING_SIZE, false);
        for _ in 0..10 {
            channel.push_reliable(&[1; 30]);
        }
        channel.flush();

        let out = channel.take_outgoing();
        assert!(out.len() > 1);
        assert!(channel.stats().premature_flushes > 0);
        for datagram in &out {
            // header + sequence + stored frame marker stays within the limit
            assert!(datagram.len() <= 100 + 1);
        }
        assert_eq!(reliable_sequences(&out), (0..out.len() as i32).collect::<Vec<_>>());
    }

    #[test]
    fn test_unreliable_has_no_sequence() {
        let mut channel = Channel::default();
        channel.push_unreliable(&[1, 2, 3]);
        channel.flush();

        let out = channel.take_outgoing();
        assert_eq!(out.len(), 1);
        assert!(reliable_sequences(&out).is_empty());
        assert_eq!(channel.next_sequence(), 0);
    }

    #[test]
    fn test_reset_forgets_everything() {
        let mut channel = Channel::default();
        channel.push_reliable(&[1]);
        channel.flush();
        channel.push_reliable(&[2]);
        channel.reset();

        assert_eq!(channel.next_sequence(), 0);
        assert_eq!(channel.pending_reliable(), 0);
        assert!(channel.take_outgoing().is_empty());
        assert!(!channel.resend(0));
    }

    #[test]
    fn test_growing_packet_size_keeps_records() {
        let mut channel = Channel::new(64, 4, true);
        channel.push_reliable(&[9; 20]);
        channel.flush();
        channel.set_max_packet_size(1400);

        assert_eq!(channel.ring().arena_size(), 1400 * 4);
        assert!(channel.resend(0));
    }
}
