//! Instruction stream tracking.
//!
//! The tracker consumes the host's per-instruction events and maintains the
//! monotonic instruction count plus the current-function context the
//! detectors classify against. Function entries are recognized by PC against
//! the symbol table snapshot taken at construction.

use std::collections::HashMap;

use log::info;

use super::types::RegisterOracle;
use crate::error::AnalysisError;
use crate::symbols::{SymbolTable, ESTACK_SYMBOL};

/// Tracks the instruction stream and the current function context.
#[derive(Debug)]
pub struct InstructionTracker {
    icount: u64,
    pc: u64,
    function_name: String,
    function_address: u64,
    function_entry_icount: u64,
    entry_sp: u64,
    estack: u64,
    new_function: bool,
    function_map: HashMap<u64, Vec<String>>,
}

impl InstructionTracker {
    /// Build a tracker over the host's symbol table.
    ///
    /// Fails with [`AnalysisError::MissingSymbol`] when `_estack` is absent;
    /// without it stack accesses cannot be classified and the analyzer must
    /// not be registered.
    pub fn new(symbols: &SymbolTable) -> Result<Self, AnalysisError> {
        let estack = symbols
            .get(ESTACK_SYMBOL)
            .ok_or_else(|| AnalysisError::MissingSymbol(ESTACK_SYMBOL.to_string()))?
            .address;
        info!("estack at {estack:#x}");

        Ok(Self {
            icount: 0,
            pc: 0,
            function_name: String::from("<unknown>"),
            function_address: 0,
            function_entry_icount: 0,
            entry_sp: 0,
            estack,
            new_function: false,
            function_map: symbols.functions_by_address().clone(),
        })
    }

    /// Consume one instruction event.
    ///
    /// Increments the instruction count eagerly and, when the PC is a known
    /// function entry, refreshes the function context and raises the
    /// one-shot `new_function` edge.
    pub fn on_instruction(&mut self, pc: u64, regs: &dyn RegisterOracle) {
        self.icount += 1;
        self.pc = pc;

        if let Some(name) = self.function_map.get(&pc).and_then(|names| names.first()) {
            self.function_name = name.clone();
            self.function_address = pc;
            self.function_entry_icount = self.icount;
            self.entry_sp = regs.sp();
            self.new_function = true;
        }
    }

    /// Lower the `new_function` edge once the memory events of the current
    /// instruction have been processed by every detector.
    pub(crate) fn clear_new_function(&mut self) {
        self.new_function = false;
    }

    /// Monotonic instruction count; the first instruction is 1.
    pub fn icount(&self) -> u64 {
        self.icount
    }

    /// PC of the most recent instruction.
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Canonical name of the current function (first alias wins).
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Entry address of the current function.
    pub fn function_address(&self) -> u64 {
        self.function_address
    }

    /// Instruction count at the current function's entry.
    pub fn function_entry_icount(&self) -> u64 {
        self.function_entry_icount
    }

    /// Stack pointer captured at the current function's entry.
    pub fn entry_sp(&self) -> u64 {
        self.entry_sp
    }

    /// Address of the `_estack` symbol, captured once at construction.
    pub fn estack(&self) -> u64 {
        self.estack
    }

    /// Whether the most recent instruction entered a function and the edge
    /// has not been consumed yet.
    pub fn new_function(&self) -> bool {
        self.new_function
    }
}
