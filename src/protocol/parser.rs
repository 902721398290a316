// Streaming packet parser
//
// Buffers partial packets across `feed` calls, drops packets that fail the
// checksum and rescans for the next header. Raw input is queued untouched and
// moved into a bounded parse window as packets are pulled, so a burst of
// valid packets is never truncated and a corrupt length byte cannot grow the
// window past one maximal frame.

use std::collections::VecDeque;

use super::{HEADER, Packet, checksum};
use crate::error::FrameError;
use tracing::{debug, warn};

/// Upper bound on the parse window holding a not yet complete packet
pub const MAX_PENDING_BYTES: usize = 1024;

/// Header (2) + length (1) + checksum (1)
const FRAME_OVERHEAD: usize = 4;

/// Diagnostic counters for recovered framing errors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub packets: u64,
    pub checksum_errors: u64,
    pub resyncs: u64,
    pub discarded_bytes: u64,
    pub malformed_sub_payloads: u64,
}

/// Incremental parser for `[AA 55] [LEN] [PAYLOAD] [CS]` packets
#[derive(Debug, Default)]
pub struct FrameParser {
    incoming: VecDeque<u8>,
    pending: Vec<u8>,
    stats: ParserStats,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            incoming: VecDeque::new(),
            pending: Vec::with_capacity(MAX_PENDING_BYTES),
            stats: ParserStats::default(),
        }
    }

    /// Queue `bytes` and return a lazy iterator over the complete packets.
    /// Packets the iterator does not reach, and bytes of an incomplete
    /// trailing packet, stay buffered for the next call.
    pub fn feed<'a>(&'a mut self, bytes: &[u8]) -> Packets<'a> {
        self.incoming.extend(bytes);
        Packets { parser: self }
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Bytes received but not yet consumed as packets or garbage
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.incoming.len()
    }

    pub fn reset(&mut self) {
        self.incoming.clear();
        self.pending.clear();
    }

    pub(crate) fn note(&mut self, error: FrameError) {
        match &error {
            FrameError::ChecksumMismatch { .. } => {
                self.stats.checksum_errors += 1;
                warn!("Dropping packet: {}", error);
            }
            FrameError::Resync { skipped } => {
                self.stats.resyncs += 1;
                self.stats.discarded_bytes += *skipped as u64;
                debug!("{}", error);
            }
            FrameError::MalformedSubPayload { .. } => {
                self.stats.malformed_sub_payloads += 1;
                warn!("{}", error);
            }
        }
    }

    /// Move queued input into the window without exceeding `MAX_PENDING_BYTES`.
    /// Returns false when nothing was moved.
    fn refill(&mut self) -> bool {
        // A window that yielded no packet holds less than one maximal frame
        let room = MAX_PENDING_BYTES.saturating_sub(self.pending.len());
        let take = room.min(self.incoming.len());
        self.pending.extend(self.incoming.drain(..take));
        take > 0
    }

    /// Discard everything before the next header candidate
    fn resync(&mut self, from: usize) {
        let skipped = find_header(&self.pending[from..])
            .map(|pos| from + pos)
            .unwrap_or_else(|| {
                // Keep a trailing 0xAA: it may be the first half of a header
                if self.pending.last() == Some(&HEADER[0]) {
                    self.pending.len() - 1
                } else {
                    self.pending.len()
                }
            });
        if skipped > 0 {
            self.pending.drain(..skipped);
            self.note(FrameError::Resync { skipped });
        }
    }

    /// Next complete, valid packet, pulling queued input as needed
    fn next_packet(&mut self) -> Option<Packet> {
        loop {
            if let Some(packet) = self.extract() {
                return Some(packet);
            }
            if !self.refill() {
                return None;
            }
        }
    }

    /// Extract the next complete, valid packet from the window
    fn extract(&mut self) -> Option<Packet> {
        loop {
            if !self.pending.starts_with(&HEADER) {
                self.resync(0);
            }
            if self.pending.len() < FRAME_OVERHEAD {
                return None;
            }

            let length = self.pending[2] as usize;
            let total = length + FRAME_OVERHEAD;
            if self.pending.len() < total {
                return None;
            }

            let body = &self.pending[2..total - 1];
            let expected = checksum(body);
            let actual = self.pending[total - 1];
            if expected != actual {
                self.note(FrameError::ChecksumMismatch { expected, actual });
                // Skip this header and look for the next one
                self.resync(1);
                continue;
            }

            let payload = self.pending[3..total - 1].to_vec();
            self.pending.drain(..total);
            self.stats.packets += 1;
            return Some(Packet::new(payload));
        }
    }
}

fn find_header(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == HEADER)
}

/// Lazy sequence of packets produced by one `feed` call
pub struct Packets<'a> {
    parser: &'a mut FrameParser,
}

impl Packets<'_> {
    /// Parser behind this iterator, for recording sub-payload errors
    pub(crate) fn parser(&mut self) -> &mut FrameParser {
        self.parser
    }
}

impl Iterator for Packets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        self.parser.next_packet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_packet;

    fn sample_packet() -> Vec<u8> {
        build_packet(&[0x01, 0x02, 0x10, 0x20])
    }

    #[test]
    fn test_whole_packet() {
        let mut parser = FrameParser::new();
        let packets: Vec<_> = parser.feed(&sample_packet()).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload(), &[0x01, 0x02, 0x10, 0x20]);
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let packet = sample_packet();
        for split in 0..=packet.len() {
            let mut parser = FrameParser::new();
            let first: Vec<_> = parser.feed(&packet[..split]).collect();
            let second: Vec<_> = parser.feed(&packet[split..]).collect();
            let all: Vec<_> = first.into_iter().chain(second).collect();
            assert_eq!(all.len(), 1, "split at {}", split);
            assert_eq!(all[0].payload(), &[0x01, 0x02, 0x10, 0x20]);
        }
    }

    #[test]
    fn test_corrupt_checksum_then_valid() {
        let mut bad = sample_packet();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let good = build_packet(&[0x05, 0x01, 0x7F]);

        let mut stream = bad;
        stream.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        let packets: Vec<_> = parser.feed(&stream).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload(), &[0x05, 0x01, 0x7F]);
        assert_eq!(parser.stats().checksum_errors, 1);
        assert_eq!(parser.stats().packets, 1);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut stream = vec![0x00, 0x13, 0xAA, 0x42];
        stream.extend_from_slice(&sample_packet());

        let mut parser = FrameParser::new();
        let packets: Vec<_> = parser.feed(&stream).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(parser.stats().resyncs, 1);
        assert_eq!(parser.stats().discarded_bytes, 4);
    }

    #[test]
    fn test_header_split_across_feeds() {
        let packet = sample_packet();
        let mut parser = FrameParser::new();
        let mut first = vec![0x11, 0x22];
        first.push(packet[0]);
        assert_eq!(parser.feed(&first).count(), 0);
        assert_eq!(parser.pending_len(), 1);
        assert_eq!(parser.feed(&packet[1..]).count(), 1);
    }

    #[test]
    fn test_corrupt_length_is_bounded() {
        let mut parser = FrameParser::new();
        // Header claiming a 255-byte payload, followed by noise
        let mut stream = vec![0xAA, 0x55, 0xFF];
        stream.extend(std::iter::repeat_n(0x00, 2000));
        assert_eq!(parser.feed(&stream).count(), 0);
        assert!(parser.pending.len() <= MAX_PENDING_BYTES);
        assert_eq!(parser.stats().checksum_errors, 1);
        assert_eq!(parser.pending_len(), 0);

        // Parser still recovers once a valid packet shows up
        let packets: Vec<_> = parser.feed(&sample_packet()).collect();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_large_feed_keeps_every_packet() {
        let mut stream = Vec::new();
        for i in 0..100u8 {
            let mut payload = vec![0x01, 0x0F, i];
            payload.resize(17, 0);
            stream.extend_from_slice(&build_packet(&payload));
        }
        assert!(stream.len() > 2 * MAX_PENDING_BYTES);

        let mut parser = FrameParser::new();
        let packets: Vec<_> = parser.feed(&stream).collect();
        assert_eq!(packets.len(), 100);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.payload()[2], i as u8);
        }
        let stats = parser.stats();
        assert_eq!(stats.packets, 100);
        assert_eq!(stats.resyncs, 0);
        assert_eq!(stats.discarded_bytes, 0);
    }

    #[test]
    fn test_undrained_feeds_keep_every_packet() {
        let mut parser = FrameParser::new();
        for _ in 0..300 {
            // Iterator dropped without being polled
            let _ = parser.feed(&sample_packet());
        }
        assert!(parser.pending.len() <= MAX_PENDING_BYTES);
        assert_eq!(parser.feed(&[]).count(), 300);
        assert_eq!(parser.stats().discarded_bytes, 0);
    }

    #[test]
    fn test_iterator_is_lazy_and_restartable() {
        let mut stream = sample_packet();
        stream.extend_from_slice(&sample_packet());

        let mut parser = FrameParser::new();
        let mut packets = parser.feed(&stream);
        assert!(packets.next().is_some());
        drop(packets);
        // Second packet is still buffered and comes out on the next feed
        assert_eq!(parser.feed(&[]).count(), 1);
    }
}
