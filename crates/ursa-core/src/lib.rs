//! # ursa-core
//!
//! Debug-symbol ingestion and the symbol database for Ursa.
//!
//! This crate reads the compact textual debugging encoding a classic
//! compiler embeds in an executable's symbol table and turns it into a
//! queryable in-memory database of source files, lexical blocks, variables,
//! and types. It consumes only three things from its environment: a
//! sequential stream of debug records, a companion flat string table, and
//! the linker's own symbol vector. It knows nothing about object-file
//! container formats, process control, or expression evaluation.
//!
//! ## Loading model
//!
//! Loading is two-phase and lazy:
//!
//! - The **scanner** walks the record stream once per program load and
//!   builds a cheap index: one partial symtab per compilation with just
//!   enough name information to answer "does this file define symbol X",
//!   plus the misc-function table of linker-resolved symbols.
//! - The **expander** materializes a file's full detail (types, blocks,
//!   line tables) only when a lookup first needs it, recursively expanding
//!   the header files the compilation depends on.
//!
//! After each expansion a fixup pass reconciles forward-declared externs
//! against the linker symbols, including the common-block special case.
//!
//! ## Entry points
//!
//! [`database::SymbolDatabase`] is the whole public surface: load with
//! [`database::SymbolDatabase::load_program`], then query with
//! `lookup_symbol`, `find_pc_line`, `block_for_pc`, `lookup_misc_function`,
//! and `list_source_files`.

pub mod arena;
pub mod blocks;
pub mod cancel;
pub mod database;
mod decode;
pub mod error;
mod expander;
mod fixup;
pub mod misc;
pub mod records;
pub mod scanner;
mod session;
pub mod symbols;
pub mod types;

pub use cancel::CancelToken;
pub use database::{PcLineInfo, SymbolDatabase};
// Re-export commonly used types
pub use error::{UrsaError, UrsaResult};
pub use records::{DebugRecord, LinkerSymbol, RecordKind, RecordSource, SectionKind, StringTable};
pub use symbols::{Namespace, StorageClass, Symbol};
