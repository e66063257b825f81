//! Error types for the analysis crate.

use thiserror::Error;

/// Errors surfaced by the idempotency analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A symbol required at construction time is missing from the symbol
    /// table. The analyzer cannot classify stack accesses without it and
    /// must not be registered with the host.
    #[error("required symbol {0} not found in symbol table")]
    MissingSymbol(String),

    /// A CSV row did not match the region-end record layout.
    #[error("malformed region record: {0}")]
    MalformedRecord(String),
}
