//! # Error Types
//!
//! General error handling for the symbol ingestion engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Main error type for symbol-ingestion operations
///
/// This enum represents all the ways a load or expansion can fail.
/// Each variant corresponds to a specific error condition that can occur
/// while decoding a debug-record stream.
///
/// ## Error Categories
///
/// 1. **Malformed stream**: BadStringOffset, ScopeMismatch, UnknownHeaderFile,
///    UnknownDescriptor, UnknownTypeCode, InvalidTypeNumber, MalformedType,
///    SelfSubrange, MissingSourceRecord, NestedCommon
/// 2. **Cancellation**: Cancelled (cooperative, checked once per record)
/// 3. **I/O errors**: Io (for record sources backed by real files)
///
/// Malformed-stream errors abort only the current top-level operation (one
/// scanner pass or one expansion); previously completed symtabs stay intact.
/// Every malformed-stream variant carries the ordinal position of the record
/// that triggered it, counted from the start of the stream.
#[derive(Error, Debug)]
pub enum UrsaError
{
    /// A record's name offset fell outside the string table.
    #[error("Invalid symbol data: bad string table offset {offset} at record {ordinal}")]
    BadStringOffset
    {
        /// Offset into the string table that was requested
        offset: u32,
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A scope-close record's nesting depth did not match the open scope.
    ///
    /// The compiler stamps each scope-begin/scope-end pair with a depth
    /// token; a mismatch means the record stream cannot be trusted.
    #[error("Invalid symbol data: mismatched lexical scope nesting at record {ordinal}")]
    ScopeMismatch
    {
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A scope-close record appeared with no scope open.
    #[error("Invalid symbol data: scope close with no open scope at record {ordinal}")]
    UnbalancedScope
    {
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// An excluded-include record referenced a header file never begun.
    ///
    /// Repeated-header references are only valid for (name, instance) pairs
    /// already registered by an earlier begin-include record.
    #[error("Invalid symbol data: \"repeated\" header file {name:?} not previously seen, at record {ordinal}")]
    UnknownHeaderFile
    {
        /// Name of the header file the record referenced
        name: String,
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A symbol definition used a descriptor character outside the known set.
    #[error("Invalid symbol data: unknown symbol-type code `{descriptor}` at record {ordinal}")]
    UnknownDescriptor
    {
        /// The unrecognized descriptor character
        descriptor: char,
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A type definition used a type code outside the known set.
    #[error("Invalid symbol data: unrecognized type code `{code}` at record {ordinal}")]
    UnknownTypeCode
    {
        /// The unrecognized type-code character
        code: char,
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A type number referenced a header file index out of range.
    #[error("Invalid symbol data: type number ({file},{index}) out of range at record {ordinal}")]
    InvalidTypeNumber
    {
        /// File part of the type-number pair
        file: u32,
        /// Local index part of the type-number pair
        index: i32,
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// Type or symbol text that does not follow the encoding grammar.
    #[error("Invalid symbol data: {detail} at record {ordinal}")]
    MalformedType
    {
        /// Human-readable description of the grammar violation
        detail: String,
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A subrange declared itself as its own base with non-idiomatic bounds.
    ///
    /// The historical bound-pair idioms (void, float widths, the standard
    /// integer widths) are the only self-subranges compilers emit; anything
    /// else is flagged rather than guessed at.
    #[error("Type defined as subrange of itself at record {ordinal}")]
    SelfSubrange
    {
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// Debug data appeared before any source-file record.
    #[error("Invalid symbol data: does not start by identifying a source file (record {ordinal})")]
    MissingSourceRecord
    {
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// A common-block begin appeared while another common block was open.
    #[error("Invalid symbol data: common within common at record {ordinal}")]
    NestedCommon
    {
        /// Ordinal position of the offending record
        ordinal: u64,
    },

    /// The current operation was cancelled via the shared [`CancelToken`].
    ///
    /// All storage allocated since the start of the cancelled operation is
    /// released as a unit; the database is left as it was before the
    /// operation began (an interrupted scanner pass leaves it empty, an
    /// interrupted expansion leaves the partial symtab unexpanded).
    ///
    /// [`CancelToken`]: crate::cancel::CancelToken
    #[error("Symbol load cancelled")]
    Cancelled,

    /// I/O error from a record source backed by a real file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, UrsaError>`
///
/// ```rust
/// use ursa_core::error::UrsaResult;
/// fn foo() -> UrsaResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type UrsaResult<T> = std::result::Result<T, UrsaError>;
