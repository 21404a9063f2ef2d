use thiserror::Error;

use crate::typesystem::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Recoverable situations never surface here: a transform whose pattern does not match simply
/// reports "no change", and expression lowering produces an error placeholder node instead of
/// failing. An `Error` means the current function could not be processed at all.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - The raw instruction stream or the tree handed in is inconsistent
/// - [`Error::NotSupported`] - An opcode or construct the reader does not handle
///
/// ## Analysis Errors
/// - [`Error::GraphError`] - Control-flow graph or dominator construction failed
/// - [`Error::AnalysisFailed`] - An internal invariant of the instruction tree was violated
/// - [`Error::Cancelled`] - The caller cancelled the work through a [`crate::CancellationToken`]
///
/// ## Type System Errors
/// - [`Error::TypeNotFound`] - An entity token could not be resolved
/// - [`Error::LockError`] - The shared entity table lock was poisoned
///
/// # Examples
///
/// ```rust,ignore
/// use dotlift::{CancellationToken, Decompiler, Error};
///
/// match decompiler.decompile(function, &CancellationToken::new()) {
///     Ok(result) => println!("{} statements", result.body.statement_count()),
///     Err(Error::Cancelled) => eprintln!("cancelled"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("malformed input: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input could not be turned into a valid instruction tree.
    ///
    /// Raised by the IL reader for truncated streams, branches into the middle of an
    /// instruction, stack underflow and inconsistent stack heights at merge points.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The construct is valid CIL but not handled by this library.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// The operation was cancelled through its cancellation token.
    ///
    /// No partial results are produced for the function that observed the cancellation.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Control-flow graph construction or dominator computation failed.
    #[error("{0}")]
    GraphError(String),

    /// An internal consistency check on the instruction tree failed.
    ///
    /// Seeing this error indicates a bug in a transform rather than bad input; the
    /// function is abandoned but other functions in a batch are unaffected.
    #[error("Analysis failed - {0}")]
    AnalysisFailed(String),

    /// Failed to find an entity in the type system.
    ///
    /// The associated [`Token`] identifies which entity was not found.
    #[error("Failed to find entity in TypeSystem - {0}")]
    TypeNotFound(Token),

    /// Failed to lock target.
    ///
    /// Raised when the shared entity table mutex was poisoned by a panicking thread.
    #[error("Failed to lock target")]
    LockError,
}
