//! Idempotent-region analysis over an emulated instruction stream.
//!
//! The analyzer partitions an executing firmware trace into maximal
//! idempotent regions: spans of instructions that can be re-executed after a
//! crash because no memory byte is written after being read. Four detector
//! variants run side by side, the Cartesian product of two policies: whether
//! an earlier write protects a byte (W-R-W), and whether function entries
//! end a region.
//!
//! The host drives the analyzer with one [`IdempotencyAnalyzer::on_instruction`]
//! call per executed instruction, followed by zero or more
//! [`IdempotencyAnalyzer::on_memory`] calls for that instruction's accesses,
//! and finally [`IdempotencyAnalyzer::finish`] at teardown.
//!
//! # Example
//!
//! ```ignore
//! use icemu_idempotency::{IdempotencyAnalyzer, MemoryEvent, SymbolTable};
//!
//! let mut analyzer = IdempotencyAnalyzer::new(&symbols)?;
//! analyzer.on_instruction(pc, &regs);
//! analyzer.on_memory(&MemoryEvent::write(pc, 0x2000_0010, 4), &regs);
//! analyzer.finish(&plugin_args);
//! ```

use log::{error, info, warn};
use std::path::PathBuf;

pub mod classify;
pub mod logger;
pub mod tracker;
pub mod types;
pub mod war;

pub use classify::classify_address;
pub use logger::RegionLog;
pub use tracker::InstructionTracker;
pub use types::{
    AccessClass, ByteAccess, InstructionState, MemoryDirection, MemoryEvent, RegionEndCause,
    RegionEndRecord, RegisterOracle,
};
pub use war::{WarDetector, WarPolicy};

use crate::error::AnalysisError;
use crate::symbols::SymbolTable;

/// Plugin-argument key selecting the output directory for the CSV sinks.
pub const OUTPUT_DIR_ARG: &str = "idempotent-stats-output-dir=";

/// The four detector variants, in processing and construction order.
pub const DETECTOR_VARIANTS: [WarPolicy; 4] = [
    WarPolicy {
        detect_protected_war: true,
        inter_procedural: false,
        sink_name: "idempotent-sections-intra-procedural.csv",
    },
    WarPolicy {
        detect_protected_war: true,
        inter_procedural: true,
        sink_name: "idempotent-sections-inter-procedural-dump.csv",
    },
    WarPolicy {
        detect_protected_war: false,
        inter_procedural: false,
        sink_name: "idempotent-sections-no-protected-intra-procedural-dump.csv",
    },
    WarPolicy {
        detect_protected_war: false,
        inter_procedural: true,
        sink_name: "idempotent-sections-no-protected-inter-procedural-dump.csv",
    },
];

/// Scan the host's plugin arguments for the output directory key. Unknown
/// keys are ignored; the first match wins.
pub fn output_dir_from_args(args: &[String]) -> Option<String> {
    args.iter().find_map(|arg| {
        arg.find(OUTPUT_DIR_ARG)
            .map(|pos| arg[pos + OUTPUT_DIR_ARG.len()..].to_string())
    })
}

/// Tunables for the analyzer.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Maximum instructions a region may span before a `SIZE_LIMIT` boundary
    /// is forced on the next write. 0 means unlimited.
    pub max_region_size: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_region_size: 1000,
        }
    }
}

/// One detector variant with its policy, sink, and region bookkeeping.
#[derive(Debug)]
struct DetectorLane {
    policy: WarPolicy,
    detector: WarDetector,
    log: RegionLog,
    region_start_icount: u64,
}

impl DetectorLane {
    fn new(policy: WarPolicy) -> Self {
        Self {
            policy,
            detector: WarDetector::new(policy.detect_protected_war),
            log: RegionLog::new(policy.sink_name),
            region_start_icount: 0,
        }
    }

    fn reset_region(&mut self, icount: u64) {
        self.detector.reset();
        self.region_start_icount = icount;
    }

    /// Process one memory event against this lane.
    ///
    /// At most one boundary record is emitted per call.
    fn process(
        &mut self,
        state: &InstructionState,
        is_read: bool,
        new_function: bool,
        function_entry_icount: u64,
        current_sp: u64,
        entry_sp: u64,
        estack: u64,
        config: &AnalyzerConfig,
    ) {
        // Inter-procedural lanes end the region on the first memory event
        // after a function entry. Zeroed access fields mark the forced
        // boundary; write_icount carries the entry icount.
        if self.policy.inter_procedural && new_function {
            self.log.add(RegionEndRecord {
                read_icount: 0,
                write_icount: function_entry_icount,
                read_pc: 0,
                write_pc: 0,
                memory_address: 0,
                function_address: state.function_address,
                function_name: state.function_name.clone(),
                access_class: AccessClass::None,
                end_cause: RegionEndCause::FunctionEntry,
            });
            self.reset_region(state.icount);
        }

        // The instruction budget is checked on writes, before the write is
        // applied, so the record for the closing region never includes it.
        if !is_read
            && config.max_region_size != 0
            && state.icount - self.region_start_icount > config.max_region_size
        {
            self.log.add(RegionEndRecord {
                read_icount: 0,
                write_icount: state.icount,
                read_pc: 0,
                write_pc: 0,
                memory_address: 0,
                function_address: state.function_address,
                function_name: state.function_name.clone(),
                access_class: AccessClass::None,
                end_cause: RegionEndCause::SizeLimit,
            });
            self.reset_region(state.icount);
        }

        if is_read {
            self.detector.add_read(state);
            return;
        }

        if self.detector.add_write(state) {
            match (
                self.detector.violating_read(),
                self.detector.violating_write(),
            ) {
                (Some(read), Some(write)) => {
                    self.log.add(RegionEndRecord {
                        read_icount: read.icount,
                        write_icount: write.icount,
                        read_pc: read.pc,
                        write_pc: write.pc,
                        memory_address: read.address,
                        function_address: state.function_address,
                        function_name: state.function_name.clone(),
                        access_class: classify_address(
                            state.mem_address,
                            current_sp,
                            entry_sp,
                            estack,
                        ),
                        end_cause: RegionEndCause::War,
                    });
                }
                // A reported WAR without a violating pair is a programmer
                // error; keep going in release builds.
                _ => debug_assert!(false, "WAR reported without violating accesses"),
            }

            // The write that broke the region opens the next one.
            self.reset_region(state.icount);
            self.detector.add_write(state);
        }
    }
}

/// The analysis facade: one instruction tracker feeding four WAR detector
/// lanes in a fixed order.
#[derive(Debug)]
pub struct IdempotencyAnalyzer {
    tracker: InstructionTracker,
    lanes: Vec<DetectorLane>,
    config: AnalyzerConfig,
}

impl IdempotencyAnalyzer {
    /// Build an analyzer with the default configuration.
    ///
    /// Fails when the symbol table lacks `_estack`; a host must treat that
    /// as "do not register this analyzer".
    pub fn new(symbols: &SymbolTable) -> Result<Self, AnalysisError> {
        Self::with_config(symbols, AnalyzerConfig::default())
    }

    /// Build an analyzer with an explicit configuration.
    pub fn with_config(
        symbols: &SymbolTable,
        config: AnalyzerConfig,
    ) -> Result<Self, AnalysisError> {
        let tracker = InstructionTracker::new(symbols)?;
        let lanes = DETECTOR_VARIANTS.iter().map(|&p| DetectorLane::new(p)).collect();
        Ok(Self {
            tracker,
            lanes,
            config,
        })
    }

    /// Consume one instruction event. Must be called before the memory
    /// events of that instruction.
    pub fn on_instruction(&mut self, pc: u64, regs: &dyn RegisterOracle) {
        self.tracker.on_instruction(pc, regs);
    }

    /// Consume one memory event, fanning it out to all four lanes in order.
    ///
    /// Zero-width events are malformed; they are dropped with a diagnostic
    /// rather than aborting the trace.
    pub fn on_memory(&mut self, event: &MemoryEvent, regs: &dyn RegisterOracle) {
        if event.size == 0 {
            warn!(
                "dropping zero-width memory event at pc {:#x}, address {:#x}",
                event.pc, event.address
            );
            return;
        }

        let state = InstructionState {
            pc: event.pc,
            icount: self.tracker.icount(),
            mem_address: event.address,
            mem_size: event.size,
            function_address: self.tracker.function_address(),
            function_name: self.tracker.function_name().to_string(),
        };
        let is_read = event.direction == MemoryDirection::Read;
        let current_sp = regs.sp();
        let new_function = self.tracker.new_function();
        let function_entry_icount = self.tracker.function_entry_icount();
        let entry_sp = self.tracker.entry_sp();
        let estack = self.tracker.estack();

        for lane in &mut self.lanes {
            lane.process(
                &state,
                is_read,
                new_function,
                function_entry_icount,
                current_sp,
                entry_sp,
                estack,
                &self.config,
            );
        }

        // The one-shot edge is consumed once every lane has seen the event.
        self.tracker.clear_new_function();
    }

    /// Flush all four sinks at teardown, resolving the output directory from
    /// the host's plugin arguments. State accumulated for the still-open
    /// region is discarded without a terminal record.
    pub fn finish(&self, plugin_args: &[String]) -> Vec<PathBuf> {
        let out_dir = output_dir_from_args(plugin_args).unwrap_or_default();
        self.flush(&out_dir)
    }

    /// Flush all four sinks into `out_dir`. A sink that cannot be opened is
    /// reported and skipped; the others still flush. Returns the paths
    /// written.
    pub fn flush(&self, out_dir: &str) -> Vec<PathBuf> {
        info!(
            "dumping region logs to {}",
            if out_dir.is_empty() { "." } else { out_dir }
        );
        let mut written = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            match lane.log.flush(out_dir) {
                Ok(path) => {
                    info!(
                        "wrote {} region records to {}",
                        lane.log.records().len(),
                        path.display()
                    );
                    written.push(path);
                }
                Err(err) => {
                    error!(
                        "error opening log file {}: {err}",
                        lane.log.sink_path(out_dir).display()
                    );
                }
            }
        }
        written
    }

    /// The instruction tracker, for hosts that want the current context.
    pub fn tracker(&self) -> &InstructionTracker {
        &self.tracker
    }

    /// Sink names in lane order.
    pub fn sinks(&self) -> impl Iterator<Item = &str> {
        self.lanes.iter().map(|lane| lane.log.sink_name())
    }

    /// Records accumulated by the lane reporting to `sink_name`.
    pub fn records_for(&self, sink_name: &str) -> Option<&[RegionEndRecord]> {
        self.lanes
            .iter()
            .find(|lane| lane.log.sink_name() == sink_name)
            .map(|lane| lane.log.records())
    }
}
