//! Error types for the extraction pass and the reference interpreter

use thiserror::Error;

/// Extraction and interpretation errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Internal-consistency failures of the pass
    /// Two different in-region instructions lead to the same exit target
    ///
    /// **Triggered by:** a merge block outside the region reached from two
    /// region blocks. Growth and extraction disagree about the CFG shape;
    /// the run is aborted rather than emitting a malformed dispatch.
    #[error("Conflicting exit for region {region}: target {target} reached from both {existing} and {incoming}")]
    ConflictingExit {
        /// Region id
        region: u64,
        /// Out-of-region instruction
        target: String,
        /// Predecessor recorded first
        existing: String,
        /// Conflicting predecessor
        incoming: String,
    },

    /// A value used inside an extracted function is defined elsewhere
    #[error("Use escaped from {function}: {user} uses {value}")]
    UseEscaped {
        /// Function containing the use
        function: String,
        /// Using instruction
        user: String,
        /// Referenced value
        value: String,
    },

    /// A control edge of an extracted block leaves its function
    #[error("Edge escaped from {function}: block {block} branches to {target}")]
    EdgeEscaped {
        /// Function containing the edge
        function: String,
        /// Source block
        block: String,
        /// Target block
        target: String,
    },

    /// A region visits an instruction it does not own
    #[error("Region {region} visits {inst} owned by {owner:?}")]
    OwnershipMismatch {
        /// Region id
        region: u64,
        /// Offending instruction
        inst: String,
        /// Recorded owner, if any
        owner: Option<u64>,
    },

    /// Structurally malformed IR
    #[error("Invalid IR: {0}")]
    InvalidIr(String),

    // Interpreter errors
    /// Call to a declaration with no host implementation
    #[error("Unknown function: {name}")]
    UnknownFunction {
        /// Symbol name
        name: String,
    },

    /// Access outside allocated memory
    #[error("Memory fault at 0x{address:x} ({size} bytes)")]
    MemoryFault {
        /// Faulting address
        address: u64,
        /// Access size
        size: u64,
    },

    /// Executed an `unreachable` instruction
    #[error("Reached unreachable code in {function}")]
    Unreachable {
        /// Function name
        function: String,
    },

    /// Step budget exhausted
    #[error("Execution limit exceeded (max: {limit} instructions)")]
    ExecutionLimitExceeded {
        /// Maximum allowed instructions
        limit: u64,
    },

    /// General runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Internal inconsistency; the current module must not be emitted
    Fatal,
    /// Failure of one execution or input, the pass itself is sound
    Recoverable,
}

impl Error {
    /// Create an invalid-IR error with a message
    pub fn invalid_ir(msg: impl Into<String>) -> Self {
        Error::InvalidIr(msg.into())
    }

    /// Create a runtime error with a message
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::RuntimeError(msg.into())
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::ConflictingExit { .. }
            | Error::UseEscaped { .. }
            | Error::EdgeEscaped { .. }
            | Error::OwnershipMismatch { .. }
            | Error::InvalidIr(_) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Recoverable,
        }
    }
}

/// Result type for pass and interpreter operations
pub type Result<T> = std::result::Result<T, Error>;
