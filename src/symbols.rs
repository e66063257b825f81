//! Symbol oracle consumed by the analysis.
//!
//! The execution host owns ELF parsing and hands the analysis a flat symbol
//! list. The analysis only cares about function entry addresses (with their
//! alias names) and the top-of-stack marker `_estack`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of the architectural top-of-stack symbol, per the usual Cortex-M
/// linker script convention.
pub const ESTACK_SYMBOL: &str = "_estack";

/// Coarse symbol classification, mirroring the ELF symbol types the host
/// cares to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    /// Function entry point (ELF `STT_FUNC`).
    Function,
    /// Data object (ELF `STT_OBJECT`), including linker markers like `_estack`.
    Object,
    /// Anything else the host chose to forward.
    Other,
}

/// A single symbol as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name, owned. Names are copied out of the host's tables so no
    /// analysis state ever points back into them.
    pub name: String,
    /// Symbol address. For functions this is the entry address.
    pub address: u64,
    /// Symbol classification.
    pub kind: SymbolKind,
}

impl Symbol {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, address: u64, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            address,
            kind,
        }
    }
}

/// Lookup structure over the host's symbols.
///
/// Function symbols are indexed by entry address; a single address may carry
/// several alias names (weak symbols, `__aeabi_*` wrappers). Alias lists
/// preserve insertion order so "first name wins" stays deterministic.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
    functions_by_address: HashMap<u64, Vec<String>>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from an iterator of symbols.
    pub fn from_symbols<I: IntoIterator<Item = Symbol>>(symbols: I) -> Self {
        let mut table = Self::new();
        for symbol in symbols {
            table.insert(symbol);
        }
        table
    }

    /// Insert a symbol. For duplicate names the first insertion wins on
    /// name lookup; function aliases accumulate on their entry address.
    pub fn insert(&mut self, symbol: Symbol) {
        let index = self.symbols.len();
        self.by_name.entry(symbol.name.clone()).or_insert(index);
        if symbol.kind == SymbolKind::Function {
            self.functions_by_address
                .entry(symbol.address)
                .or_default()
                .push(symbol.name.clone());
        }
        self.symbols.push(symbol);
    }

    /// Look up a symbol by name.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// Alias names of the function entered at `address`, if any.
    pub fn function_names(&self, address: u64) -> Option<&[String]> {
        self.functions_by_address
            .get(&address)
            .map(|names| names.as_slice())
    }

    /// Map of function entry address to alias names.
    pub fn functions_by_address(&self) -> &HashMap<u64, Vec<String>> {
        &self.functions_by_address
    }

    /// All symbols in insertion order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
