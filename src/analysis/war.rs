//! Byte-granular write-after-read detection.
//!
//! A detector tracks, per byte address, the most recent read and the most
//! recent write since its last reset. A write to a byte that was read within
//! the region ends the region, unless the byte was written before it was
//! read and the detector honors protecting writes (W-R-W).

use std::collections::HashMap;

use super::types::{ByteAccess, InstructionState};

/// Policy knobs distinguishing the four detector variants, plus the CSV sink
/// the variant reports to. Dispatch is by value; there is a single detector
/// implementation.
#[derive(Debug, Clone, Copy)]
pub struct WarPolicy {
    /// Treat an earlier write as protecting: W-R-W does not raise a WAR.
    pub detect_protected_war: bool,
    /// End the region (and emit a boundary record) on every function entry.
    pub inter_procedural: bool,
    /// File name of the CSV sink for this variant.
    pub sink_name: &'static str,
}

/// Byte-granular WAR detector for one policy variant.
///
/// The read set holds every byte read since the last reset; the write set
/// holds every byte whose last operation was a write. Both are keyed by byte
/// address, and re-inserting an address overwrites the PC/icount payload.
#[derive(Debug)]
pub struct WarDetector {
    detect_protected_war: bool,
    reads: HashMap<u64, ByteAccess>,
    writes: HashMap<u64, ByteAccess>,
    violating_read: Option<ByteAccess>,
    violating_write: Option<ByteAccess>,
}

impl WarDetector {
    /// Create an empty detector.
    pub fn new(detect_protected_war: bool) -> Self {
        Self {
            detect_protected_war,
            reads: HashMap::new(),
            writes: HashMap::new(),
            violating_read: None,
            violating_write: None,
        }
    }

    /// Clear both access sets and the violating pair. External counters are
    /// untouched.
    pub fn reset(&mut self) {
        self.reads.clear();
        self.writes.clear();
        self.violating_read = None;
        self.violating_write = None;
    }

    /// Record a read. A width-N access expands to N byte reads at ascending
    /// addresses; the most recent read of each byte is the one kept.
    pub fn add_read(&mut self, state: &InstructionState) {
        for i in 0..state.mem_size {
            self.add_read_byte(ByteAccess {
                address: state.mem_address.wrapping_add(i),
                pc: state.pc,
                icount: state.icount,
            });
        }
    }

    /// Record a write and report whether it completes a WAR.
    ///
    /// A width-N access expands to N byte writes at ascending addresses.
    /// Expansion stops at the first byte that raises a WAR: that byte's pair
    /// becomes the violating read/write, and the remaining bytes are applied
    /// by the caller re-issuing the write after it reset the region.
    pub fn add_write(&mut self, state: &InstructionState) -> bool {
        for i in 0..state.mem_size {
            let byte = ByteAccess {
                address: state.mem_address.wrapping_add(i),
                pc: state.pc,
                icount: state.icount,
            };
            if self.add_write_byte(byte) {
                return true;
            }
        }
        false
    }

    /// The read half of the most recent WAR, cleared on reset.
    pub fn violating_read(&self) -> Option<ByteAccess> {
        self.violating_read
    }

    /// The write half of the most recent WAR, cleared on reset.
    pub fn violating_write(&self) -> Option<ByteAccess> {
        self.violating_write
    }

    /// Number of distinct byte addresses in the read set.
    pub fn read_set_len(&self) -> usize {
        self.reads.len()
    }

    /// Number of distinct byte addresses in the write set.
    pub fn write_set_len(&self) -> usize {
        self.writes.len()
    }

    fn add_read_byte(&mut self, byte: ByteAccess) {
        // Upsert: the most recent read is the one a later write would violate.
        self.reads.insert(byte.address, byte);
    }

    fn add_write_byte(&mut self, byte: ByteAccess) -> bool {
        let read_before = self.reads.get(&byte.address).copied();
        let written_before = self.writes.contains_key(&byte.address);

        match read_before {
            // Never read in this region: record the write, no WAR. The last
            // write to an address is the one that counts.
            None => {
                self.writes.insert(byte.address, byte);
                false
            }
            // Read before, but an earlier write protects it under W-R-W.
            Some(_) if written_before && self.detect_protected_war => {
                self.writes.insert(byte.address, byte);
                false
            }
            // Write after read.
            Some(read) => {
                self.violating_read = Some(read);
                self.violating_write = Some(byte);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pc: u64, icount: u64, address: u64, size: u64) -> InstructionState {
        InstructionState {
            pc,
            icount,
            mem_address: address,
            mem_size: size,
            function_address: 0x0800_0100,
            function_name: "main".to_string(),
        }
    }

    #[test]
    fn test_write_alone_is_not_war() {
        let mut detector = WarDetector::new(true);
        assert!(!detector.add_write(&state(4, 1, 0x100, 1)));
        assert!(detector.violating_read().is_none());
    }

    #[test]
    fn test_read_then_write_is_war() {
        let mut detector = WarDetector::new(true);
        detector.add_read(&state(4, 1, 0x100, 1));
        assert!(detector.add_write(&state(8, 2, 0x100, 1)));

        let read = detector.violating_read().unwrap();
        let write = detector.violating_write().unwrap();
        assert_eq!(read.address, 0x100);
        assert_eq!(read.icount, 1);
        assert_eq!(write.icount, 2);
        assert_eq!(write.pc, 8);
    }

    #[test]
    fn test_read_write_disjoint_addresses_is_not_war() {
        let mut detector = WarDetector::new(true);
        detector.add_read(&state(4, 1, 0x100, 1));
        assert!(!detector.add_write(&state(8, 2, 0x200, 1)));
    }

    #[test]
    fn test_protecting_write_suppresses_war() {
        let mut detector = WarDetector::new(true);
        detector.add_write(&state(4, 1, 0x100, 1));
        detector.add_read(&state(8, 2, 0x100, 1));
        assert!(!detector.add_write(&state(12, 3, 0x100, 1)));
    }

    #[test]
    fn test_unprotected_variant_flags_wrw() {
        let mut detector = WarDetector::new(false);
        detector.add_write(&state(4, 1, 0x100, 1));
        detector.add_read(&state(8, 2, 0x100, 1));
        assert!(detector.add_write(&state(12, 3, 0x100, 1)));

        let read = detector.violating_read().unwrap();
        assert_eq!(read.icount, 2);
        assert_eq!(read.pc, 8);
    }

    #[test]
    fn test_read_upsert_keeps_latest_payload() {
        let mut detector = WarDetector::new(true);
        detector.add_read(&state(4, 1, 0x100, 1));
        detector.add_read(&state(20, 5, 0x100, 1));
        assert_eq!(detector.read_set_len(), 1);

        detector.add_write(&state(24, 6, 0x100, 1));
        let read = detector.violating_read().unwrap();
        assert_eq!(read.pc, 20);
        assert_eq!(read.icount, 5);
    }

    #[test]
    fn test_width_expansion_hits_overlapping_byte() {
        let mut detector = WarDetector::new(true);
        detector.add_read(&state(4, 1, 0x100, 4));
        assert_eq!(detector.read_set_len(), 4);

        // Write overlaps only the third byte of the read.
        assert!(detector.add_write(&state(8, 2, 0x102, 1)));
        assert_eq!(detector.violating_read().unwrap().address, 0x102);
    }

    #[test]
    fn test_width_expansion_reports_lowest_violating_byte() {
        let mut detector = WarDetector::new(true);
        detector.add_read(&state(4, 1, 0x102, 2));

        // Bytes 0x100 and 0x101 are clean, 0x102 raises the WAR.
        assert!(detector.add_write(&state(8, 2, 0x100, 4)));
        assert_eq!(detector.violating_read().unwrap().address, 0x102);
        // Expansion stopped at the violating byte: 0x103 was not applied.
        assert_eq!(detector.write_set_len(), 2);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut detector = WarDetector::new(true);
        detector.add_read(&state(4, 1, 0x100, 2));
        assert!(detector.add_write(&state(8, 2, 0x100, 1)));

        detector.reset();
        assert_eq!(detector.read_set_len(), 0);
        assert_eq!(detector.write_set_len(), 0);
        assert!(detector.violating_read().is_none());
        assert!(detector.violating_write().is_none());

        // A write alone after reset never raises a WAR.
        assert!(!detector.add_write(&state(12, 3, 0x100, 4)));
    }

    #[test]
    fn test_write_write_keeps_last_write() {
        let mut detector = WarDetector::new(false);
        detector.add_write(&state(4, 1, 0x100, 1));
        assert!(!detector.add_write(&state(8, 2, 0x100, 1)));
        assert_eq!(detector.write_set_len(), 1);
    }
}
