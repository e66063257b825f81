//! Data structures for idempotent-region analysis.
//!
//! These types describe the instruction/memory event stream delivered by the
//! execution host and the region-boundary records emitted by the detectors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemoryDirection {
    /// Load from memory.
    Read,
    /// Store to memory.
    Write,
}

/// A memory access performed by one executed instruction.
///
/// The access is atomic from the host's point of view. The detectors expand
/// it into `size` single-byte operations internally, at ascending addresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// PC of the issuing instruction.
    pub pc: u64,
    /// Target address of the access.
    pub address: u64,
    /// Width of the access in bytes, at least 1.
    pub size: u64,
    /// Read or write.
    pub direction: MemoryDirection,
}

impl MemoryEvent {
    /// Build a read event.
    pub fn read(pc: u64, address: u64, size: u64) -> Self {
        Self {
            pc,
            address,
            size,
            direction: MemoryDirection::Read,
        }
    }

    /// Build a write event.
    pub fn write(pc: u64, address: u64, size: u64) -> Self {
        Self {
            pc,
            address,
            size,
            direction: MemoryDirection::Write,
        }
    }
}

/// Read access to the emulated register file.
///
/// The analysis only ever needs the stack pointer; hosts implement this on
/// whatever register representation they carry, the same way emulator hook
/// callbacks receive the engine handle.
pub trait RegisterOracle {
    /// Current value of the stack pointer.
    fn sp(&self) -> u64;
}

/// A single byte touched by a read or a write.
///
/// Identity is the byte address alone; PC and instruction count are payload
/// and are overwritten when the same address is re-inserted into a set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ByteAccess {
    /// Byte address.
    pub address: u64,
    /// PC of the instruction that performed the access.
    pub pc: u64,
    /// Instruction count at the time of the access.
    pub icount: u64,
}

/// Snapshot of the tracker state at the moment a memory event is processed.
///
/// Carries an owned copy of the function name so no detector or record ever
/// points back into the symbol table.
#[derive(Debug, Clone)]
pub struct InstructionState {
    /// PC of the issuing instruction.
    pub pc: u64,
    /// Instruction count of the issuing instruction.
    pub icount: u64,
    /// Target address of the access.
    pub mem_address: u64,
    /// Width of the access in bytes.
    pub mem_size: u64,
    /// Entry address of the function the instruction belongs to.
    pub function_address: u64,
    /// Canonical name of that function.
    pub function_name: String,
}

/// Classification of an accessed address against the dynamic stack layout.
///
/// The integer codes are part of the on-disk format and must stay stable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccessClass {
    /// Classification unavailable.
    Unknown,
    /// No memory access involved (forced region boundaries).
    None,
    /// Inside the current activation frame.
    Local,
    /// On the stack but outside the current frame.
    Stack,
    /// Anything not on the stack.
    Global,
}

impl AccessClass {
    /// Stable on-disk code.
    pub fn code(self) -> u32 {
        match self {
            AccessClass::Unknown => 0,
            AccessClass::None => 1,
            AccessClass::Local => 2,
            AccessClass::Stack => 3,
            AccessClass::Global => 4,
        }
    }

    /// Decode from the stable on-disk code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(AccessClass::Unknown),
            1 => Some(AccessClass::None),
            2 => Some(AccessClass::Local),
            3 => Some(AccessClass::Stack),
            4 => Some(AccessClass::Global),
            _ => None,
        }
    }

    /// Stable on-disk name.
    pub fn name(self) -> &'static str {
        match self {
            AccessClass::Unknown => "UNKNOWN",
            AccessClass::None => "NONE",
            AccessClass::Local => "LOCAL",
            AccessClass::Stack => "STACK",
            AccessClass::Global => "GLOBAL",
        }
    }
}

impl fmt::Display for AccessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why an idempotent region ended.
///
/// The integer codes are part of the on-disk format and must stay stable.
/// `Forced` is reserved for host-driven checkpoints and is never emitted by
/// the analyzer itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RegionEndCause {
    /// A write hit a byte previously read within the region.
    War,
    /// An inter-procedural detector observed a function entry.
    FunctionEntry,
    /// The region exceeded the configured instruction budget.
    SizeLimit,
    /// Host-forced boundary.
    Forced,
}

impl RegionEndCause {
    /// Stable on-disk code.
    pub fn code(self) -> u32 {
        match self {
            RegionEndCause::War => 0,
            RegionEndCause::FunctionEntry => 1,
            RegionEndCause::SizeLimit => 2,
            RegionEndCause::Forced => 3,
        }
    }

    /// Decode from the stable on-disk code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(RegionEndCause::War),
            1 => Some(RegionEndCause::FunctionEntry),
            2 => Some(RegionEndCause::SizeLimit),
            3 => Some(RegionEndCause::Forced),
            _ => None,
        }
    }

    /// Stable on-disk name.
    pub fn name(self) -> &'static str {
        match self {
            RegionEndCause::War => "WAR",
            RegionEndCause::FunctionEntry => "FUNCTION_ENTRY",
            RegionEndCause::SizeLimit => "SIZE_LIMIT",
            RegionEndCause::Forced => "FORCED",
        }
    }
}

impl fmt::Display for RegionEndCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One closed idempotent region.
///
/// For WAR boundaries the read/write fields describe the violating pair; for
/// forced boundaries (function entry, size limit) they are zeroed except for
/// `write_icount`, which holds the instruction count where the new region
/// begins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionEndRecord {
    /// Instruction count of the violating read, 0 for forced boundaries.
    pub read_icount: u64,
    /// Instruction count of the violating write, or of the boundary itself.
    pub write_icount: u64,
    /// PC of the violating read, 0 for forced boundaries.
    pub read_pc: u64,
    /// PC of the violating write, 0 for forced boundaries.
    pub write_pc: u64,
    /// Byte address the WAR was detected on, 0 for forced boundaries.
    pub memory_address: u64,
    /// Entry address of the function active at the boundary.
    pub function_address: u64,
    /// Canonical name of that function, owned.
    pub function_name: String,
    /// Stack classification of the written address.
    pub access_class: AccessClass,
    /// Why the region ended.
    pub end_cause: RegionEndCause,
}

/// Number of fields in a CSV row.
const CSV_FIELD_COUNT: usize = 11;

/// Commas inside symbol names (C++ template instantiations) would shift the
/// unquoted CSV fields; they are replaced with `;` at format time.
fn sanitize_name(name: &str) -> String {
    name.replace(',', ";")
}

impl RegionEndRecord {
    /// Parse a CSV line previously produced by the `Display` impl.
    ///
    /// The redundant name fields are cross-checked against their codes.
    pub fn parse_csv(line: &str) -> Result<Self, AnalysisError> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != CSV_FIELD_COUNT {
            return Err(AnalysisError::MalformedRecord(format!(
                "expected {} fields, got {}",
                CSV_FIELD_COUNT,
                fields.len()
            )));
        }

        let int = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| AnalysisError::MalformedRecord(format!("bad integer field: {s}")))
        };
        let code = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| AnalysisError::MalformedRecord(format!("bad enum code: {s}")))
        };

        let access_class = AccessClass::from_code(code(fields[7])?)
            .ok_or_else(|| AnalysisError::MalformedRecord(format!("bad access class: {}", fields[7])))?;
        if access_class.name() != fields[8] {
            return Err(AnalysisError::MalformedRecord(format!(
                "access class name {} does not match code {}",
                fields[8], fields[7]
            )));
        }

        let end_cause = RegionEndCause::from_code(code(fields[9])?)
            .ok_or_else(|| AnalysisError::MalformedRecord(format!("bad end cause: {}", fields[9])))?;
        if end_cause.name() != fields[10] {
            return Err(AnalysisError::MalformedRecord(format!(
                "end cause name {} does not match code {}",
                fields[10], fields[9]
            )));
        }

        Ok(Self {
            read_icount: int(fields[0])?,
            write_icount: int(fields[1])?,
            read_pc: int(fields[2])?,
            write_pc: int(fields[3])?,
            memory_address: int(fields[4])?,
            function_address: int(fields[5])?,
            function_name: fields[6].to_string(),
            access_class,
            end_cause,
        })
    }
}

impl fmt::Display for RegionEndRecord {
    /// Byte-stable CSV rendering: decimal integers, unquoted strings, fixed
    /// field order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.read_icount,
            self.write_icount,
            self.read_pc,
            self.write_pc,
            self.memory_address,
            self.function_address,
            sanitize_name(&self.function_name),
            self.access_class.code(),
            self.access_class.name(),
            self.end_cause.code(),
            self.end_cause.name(),
        )
    }
}
