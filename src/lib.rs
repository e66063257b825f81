//! Idempotent-region analysis for emulated ARM firmware.
//!
//! This crate is the analysis side of an instruction-level firmware
//! emulator: the emulator executes the binary and delivers an event stream
//! (one instruction event per executed instruction, zero or more memory
//! events per instruction); this crate partitions that stream into maximal
//! idempotent regions by detecting byte-granular write-after-read (WAR)
//! hazards, and dumps one CSV of region boundaries per detector variant.
//!
//! The emulator itself, ELF loading, and hook plumbing are out of scope
//! here. Hosts provide a [`SymbolTable`] snapshot at construction, implement
//! [`RegisterOracle`] for stack-pointer reads, and forward events to
//! [`IdempotencyAnalyzer`].

pub mod analysis;
pub mod error;
pub mod symbols;

pub use analysis::{
    classify_address, output_dir_from_args, AccessClass, AnalyzerConfig, ByteAccess,
    IdempotencyAnalyzer, InstructionState, InstructionTracker, MemoryDirection, MemoryEvent,
    RegionEndCause, RegionEndRecord, RegionLog, RegisterOracle, WarDetector, WarPolicy,
    DETECTOR_VARIANTS, OUTPUT_DIR_ARG,
};
pub use error::AnalysisError;
pub use symbols::{Symbol, SymbolKind, SymbolTable, ESTACK_SYMBOL};
