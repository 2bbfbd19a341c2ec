//! # Symbol Database
//!
//! The queryable in-memory database of source files, blocks, variables, and
//! types, and the only interface the rest of the debugger uses.
//!
//! A [`SymbolDatabase`] is loaded once per program image: the scanner makes
//! one linear pass producing the partial-symtab index and the misc-function
//! table, and every later query that touches an unexpanded file triggers the
//! expander as a side effect. All state is reset as a unit when the next
//! program is loaded.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ursa_core::database::SymbolDatabase;
//! use ursa_core::records::{LinkerSymbol, RecordStreamBuilder, SectionKind, SliceRecordSource};
//! use ursa_core::symbols::Namespace;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let builder = RecordStreamBuilder::new();
//!     // ... push the program's debug records ...
//!     let (records, strings) = builder.finish();
//!     let linker = vec![LinkerSymbol::new("main", 0x1000, SectionKind::Text)];
//!
//!     let mut db = SymbolDatabase::new();
//!     db.load_program(Box::new(SliceRecordSource::new(records)), strings, linker, None)?;
//!
//!     if let Some(symbol) = db.lookup_symbol("main", None, Namespace::Var)? {
//!         println!("main: {:?}", db.symbol(symbol).class);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;

use tracing::info;

use crate::arena::Arena;
use crate::blocks::{Block, Blockvector, GLOBAL_BLOCK, STATIC_BLOCK};
use crate::cancel::CancelToken;
use crate::error::UrsaResult;
use crate::expander;
use crate::fixup;
use crate::misc::{MiscFunction, MiscFunctionTable};
use crate::records::{LinkerSymbol, RecordSource, StringTable};
use crate::scanner::{PartialSymtab, Scanner};
use crate::symbols::{BlockId, Namespace, Symbol, SymbolId};
use crate::types::{TypeSlot, TypeStore};

/// Index of one expanded compilation unit within the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(u32);

impl UnitId
{
    pub(crate) const fn from_raw(raw: u32) -> Self
    {
        Self(raw)
    }

    /// Raw index value.
    #[must_use]
    pub const fn to_raw(self) -> u32
    {
        self.0
    }
}

/// A symbol within a specific compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef
{
    /// Owning unit
    pub unit: UnitId,
    /// Symbol within the unit's arena
    pub symbol: SymbolId,
}

/// A block within a specific compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef
{
    /// Owning unit
    pub unit: UnitId,
    /// Block within the unit's arena
    pub block: BlockId,
}

/// One (line, address) pair of a line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry
{
    /// Source line number
    pub line: u32,
    /// First code address generated for the line
    pub address: u64,
}

/// The fully decoded representation of one source file (or sub-file within a
/// compilation). Immutable once created.
#[derive(Debug, Clone)]
pub struct Symtab
{
    /// Source file name
    pub filename: String,
    /// Line table, sorted by address
    pub lines: Vec<LineEntry>,
}

/// Everything one expansion produced, committed to the database atomically.
///
/// Several symtabs (one per contributing source file via file inclusion)
/// share this unit's single blockvector.
#[derive(Debug)]
pub struct CompilationUnit
{
    /// All symbols of the compilation
    pub symbols: Arena<Symbol>,
    /// All blocks of the compilation
    pub blocks: Arena<Block>,
    /// The shared, address-ordered block set
    pub blockvector: Blockvector,
    /// One symtab per contributing source file
    pub symtabs: Vec<Symtab>,
    /// Snapshot of the compilation's local type numbering
    pub type_index: Vec<Option<TypeSlot>>,
}

impl CompilationUnit
{
    /// Whether `ancestor` appears on `block`'s superblock chain.
    #[must_use]
    pub fn block_has_ancestor(&self, block: BlockId, ancestor: BlockId) -> bool
    {
        let mut current = self.blocks[block].superblock;
        while let Some(next) = current {
            if next == ancestor {
                return true;
            }
            current = self.blocks[next].superblock;
        }
        false
    }
}

/// Result of a PC-to-source-line query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcLineInfo
{
    /// Name of the symtab the address belongs to
    pub filename: String,
    /// Source line, when the file has line information covering the address
    pub line: Option<u32>,
    /// Address range `[start, end)` sharing this answer
    pub pc_range: (u64, u64),
}

/// One loaded object stream and its string table.
pub(crate) struct ObjectFile
{
    pub(crate) source: Box<dyn RecordSource>,
    pub(crate) strings: StringTable,
}

/// The symbol database for one loaded program image.
#[derive(Default)]
pub struct SymbolDatabase
{
    pub(crate) files: Vec<ObjectFile>,
    pub(crate) partials: Vec<PartialSymtab>,
    pub(crate) units: Vec<CompilationUnit>,
    pub(crate) misc: MiscFunctionTable,
    pub(crate) types: TypeStore,
    pub(crate) pending_externs: HashMap<String, Vec<SymbolRef>>,
    pub(crate) cancel: CancelToken,
    startup_range: Option<(u64, u64)>,
}

impl SymbolDatabase
{
    /// Create an empty database.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// A handle to the database's cancellation flag.
    ///
    /// Cancelling aborts the scanner pass or expansion currently in
    /// progress; the interrupted operation's storage is released as a unit.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken
    {
        self.cancel.clone()
    }

    /// Load a program image, replacing everything from the previous load.
    ///
    /// Runs the scanner pass over the whole record stream, producing the
    /// partial-symtab index and misc-function table. No types or blocks are
    /// built until a query demands them.
    ///
    /// ## Errors
    ///
    /// A malformed stream or cancellation aborts the load and leaves the
    /// database empty.
    pub fn load_program(
        &mut self,
        mut source: Box<dyn RecordSource>,
        strings: StringTable,
        linker_symbols: Vec<LinkerSymbol>,
        entry_point: Option<u64>,
    ) -> UrsaResult<()>
    {
        self.reset();
        match self.scan_object(&mut source, &strings, &linker_symbols, entry_point, true) {
            Ok(()) => {
                self.files.push(ObjectFile { source, strings });
                info!(
                    files = self.partials.len(),
                    misc = self.misc.len(),
                    "loaded program symbols"
                );
                Ok(())
            }
            Err(error) => {
                self.reset();
                Err(error)
            }
        }
    }

    /// Incrementally merge one additional object file's symbols.
    ///
    /// Previously expanded symtabs are untouched; unresolved externals from
    /// earlier expansions are re-checked against the new linker symbols.
    ///
    /// ## Errors
    ///
    /// A malformed stream aborts the merge and retracts the new file's
    /// entries, leaving the earlier load intact.
    pub fn add_object_file(
        &mut self,
        mut source: Box<dyn RecordSource>,
        strings: StringTable,
        linker_symbols: Vec<LinkerSymbol>,
    ) -> UrsaResult<()>
    {
        let partials_before = self.partials.len();
        let misc_before = self.misc.len();
        match self.scan_object(&mut source, &strings, &linker_symbols, None, false) {
            Ok(()) => {
                self.files.push(ObjectFile { source, strings });
                // New linker symbols may satisfy externals still pending
                // from earlier expansions.
                fixup::resolve_externals(&mut self.units, &mut self.pending_externs, &self.misc);
                info!(files = self.partials.len() - partials_before, "added object file symbols");
                Ok(())
            }
            Err(error) => {
                self.partials.truncate(partials_before);
                self.misc.truncate(misc_before);
                Err(error)
            }
        }
    }

    fn scan_object(
        &mut self,
        source: &mut Box<dyn RecordSource>,
        strings: &StringTable,
        linker_symbols: &[LinkerSymbol],
        entry_point: Option<u64>,
        main_program: bool,
    ) -> UrsaResult<()>
    {
        for symbol in linker_symbols {
            self.misc.push(&symbol.name, symbol.address, symbol.section);
        }

        let file_index = self.files.len();
        let scanner = Scanner::new(strings, &self.cancel, &mut self.partials, &mut self.misc, file_index, entry_point);
        let summary = scanner.run(source.as_mut())?;
        self.misc.finish();
        if main_program {
            self.startup_range = summary.startup_range;
        }
        Ok(())
    }

    fn reset(&mut self)
    {
        self.files.clear();
        self.partials.clear();
        self.units.clear();
        self.misc = MiscFunctionTable::new();
        self.types = TypeStore::new();
        self.pending_externs.clear();
        self.startup_range = None;
    }

    /// Look up a symbol by name, innermost scope first.
    ///
    /// Search order: the given scope block and its superblocks, then every
    /// expanded file's global symbols, then unexpanded files claiming the
    /// name (triggering expansion as a side effect), then file statics.
    ///
    /// ## Errors
    ///
    /// Propagates a failed expansion; the partial symtab that failed stays
    /// unexpanded for a later retry.
    pub fn lookup_symbol(&mut self, name: &str, scope: Option<BlockRef>, namespace: Namespace) -> UrsaResult<Option<SymbolRef>>
    {
        if let Some(scope) = scope {
            let unit = &self.units[scope.unit.to_raw() as usize];
            let mut current = Some(scope.block);
            while let Some(block_id) = current {
                let block = &unit.blocks[block_id];
                if let Some(found) = Self::search_block_symbols(unit, block, name, namespace) {
                    return Ok(Some(SymbolRef {
                        unit: scope.unit,
                        symbol: found,
                    }));
                }
                current = block.superblock;
            }
        }

        loop {
            if let Some(found) = self.search_top_blocks(name, namespace, GLOBAL_BLOCK) {
                return Ok(Some(found));
            }
            if let Some(partial) = self.find_partial_defining(name, namespace, true) {
                expander::expand_partial(self, partial)?;
                continue;
            }
            if let Some(found) = self.search_top_blocks(name, namespace, STATIC_BLOCK) {
                return Ok(Some(found));
            }
            if let Some(partial) = self.find_partial_defining(name, namespace, false) {
                expander::expand_partial(self, partial)?;
                continue;
            }
            return Ok(None);
        }
    }

    fn search_block_symbols(unit: &CompilationUnit, block: &Block, name: &str, namespace: Namespace) -> Option<SymbolId>
    {
        block
            .symbols
            .iter()
            .copied()
            .find(|&id| unit.symbols[id].name == name && unit.symbols[id].namespace == namespace)
    }

    fn search_top_blocks(&self, name: &str, namespace: Namespace, which: usize) -> Option<SymbolRef>
    {
        for (index, unit) in self.units.iter().enumerate() {
            let Some(&block_id) = unit.blockvector.blocks.get(which) else {
                continue;
            };
            let block = &unit.blocks[block_id];
            if let Some(found) = Self::search_block_symbols(unit, block, name, namespace) {
                return Some(SymbolRef {
                    unit: UnitId::from_raw(index as u32),
                    symbol: found,
                });
            }
        }
        None
    }

    fn find_partial_defining(&self, name: &str, namespace: Namespace, global: bool) -> Option<usize>
    {
        self.partials
            .iter()
            .position(|partial| !partial.expanded && partial.defines(name, namespace, global))
    }

    /// Map a code address to its source file, line, and covering PC range.
    ///
    /// ## Errors
    ///
    /// Propagates a failed expansion of the covering file.
    pub fn find_pc_line(&mut self, pc: u64) -> UrsaResult<Option<PcLineInfo>>
    {
        self.expand_covering(pc)?;
        let Some(block_ref) = self.search_block_for_pc(pc) else {
            return Ok(None);
        };
        let unit = &self.units[block_ref.unit.to_raw() as usize];
        let block = &unit.blocks[block_ref.block];

        // Best line entry at or below the address, but never one from
        // before the containing block.
        let mut best: Option<(usize, usize)> = None;
        for (symtab_index, symtab) in unit.symtabs.iter().enumerate() {
            let position = symtab.lines.partition_point(|entry| entry.address <= pc);
            let Some(entry_index) = position.checked_sub(1) else {
                continue;
            };
            let candidate = symtab.lines[entry_index].address;
            if candidate < block.start {
                continue;
            }
            let better = best.is_none_or(|(si, ei)| candidate > unit.symtabs[si].lines[ei].address);
            if better {
                best = Some((symtab_index, entry_index));
            }
        }

        Ok(Some(match best {
            Some((symtab_index, entry_index)) => {
                let symtab = &unit.symtabs[symtab_index];
                let entry = symtab.lines[entry_index];
                let end = symtab
                    .lines
                    .get(entry_index + 1)
                    .map_or(block.end, |next| next.address);
                PcLineInfo {
                    filename: symtab.filename.clone(),
                    line: Some(entry.line),
                    pc_range: (entry.address, end),
                }
            }
            None => PcLineInfo {
                filename: unit.symtabs.first().map(|s| s.filename.clone()).unwrap_or_default(),
                line: None,
                pc_range: (block.start, block.end),
            },
        }))
    }

    /// The innermost lexical block containing an address.
    ///
    /// ## Errors
    ///
    /// Propagates a failed expansion of the covering file.
    pub fn block_for_pc(&mut self, pc: u64) -> UrsaResult<Option<BlockRef>>
    {
        self.expand_covering(pc)?;
        Ok(self.search_block_for_pc(pc))
    }

    fn expand_covering(&mut self, pc: u64) -> UrsaResult<()>
    {
        while let Some(index) = self
            .partials
            .iter()
            .position(|p| !p.expanded && p.has_records() && p.textlow <= pc && pc < p.texthigh)
        {
            expander::expand_partial(self, index)?;
        }
        Ok(())
    }

    fn search_block_for_pc(&self, pc: u64) -> Option<BlockRef>
    {
        let mut best: Option<(BlockRef, u64, u64)> = None;
        for (unit_index, unit) in self.units.iter().enumerate() {
            for (block_id, block) in unit.blocks.iter() {
                if !block.contains(pc) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, start, end)) => {
                        block.start > start || (block.start == start && block.end - block.start < end - start)
                    }
                };
                if better {
                    best = Some((
                        BlockRef {
                            unit: UnitId::from_raw(unit_index as u32),
                            block: block_id,
                        },
                        block.start,
                        block.end,
                    ));
                }
            }
        }
        best.map(|(reference, _, _)| reference)
    }

    /// First-scan-match lookup in the misc-function table.
    #[must_use]
    pub fn lookup_misc_function(&self, name: &str) -> Option<&MiscFunction>
    {
        self.misc.lookup(name)
    }

    /// Source files known to the database: (expanded, still pending).
    #[must_use]
    pub fn list_source_files(&self) -> (Vec<&str>, Vec<&str>)
    {
        let mut expanded = Vec::new();
        let mut pending = Vec::new();
        for partial in &self.partials {
            if partial.expanded {
                expanded.push(partial.filename.as_str());
            } else {
                pending.push(partial.filename.as_str());
            }
        }
        (expanded, pending)
    }

    /// Explicitly expand the named source file.
    ///
    /// Returns whether a file of that name was found.
    ///
    /// ## Errors
    ///
    /// Propagates decode errors from the expansion; the file stays pending.
    pub fn expand_file(&mut self, filename: &str) -> UrsaResult<bool>
    {
        let Some(index) = self.partials.iter().position(|p| p.filename == filename) else {
            return Ok(false);
        };
        expander::expand_partial(self, index)?;
        Ok(true)
    }

    /// Access a symbol through its reference.
    #[must_use]
    pub fn symbol(&self, reference: SymbolRef) -> &Symbol
    {
        &self.units[reference.unit.to_raw() as usize].symbols[reference.symbol]
    }

    /// Access a block through its reference.
    #[must_use]
    pub fn block(&self, reference: BlockRef) -> &Block
    {
        &self.units[reference.unit.to_raw() as usize].blocks[reference.block]
    }

    /// The block owned by a function symbol, if the symbol is a function.
    #[must_use]
    pub fn function_block(&self, reference: SymbolRef) -> Option<BlockRef>
    {
        match self.symbol(reference).value {
            crate::symbols::SymbolValue::Block(block) => Some(BlockRef {
                unit: reference.unit,
                block,
            }),
            _ => None,
        }
    }

    /// Every expanded compilation unit, in expansion order.
    #[must_use]
    pub fn units(&self) -> &[CompilationUnit]
    {
        &self.units
    }

    /// The partial-symtab index.
    #[must_use]
    pub fn partial_symtabs(&self) -> &[PartialSymtab]
    {
        &self.partials
    }

    /// The misc-function table.
    #[must_use]
    pub fn misc_functions(&self) -> &MiscFunctionTable
    {
        &self.misc
    }

    /// The type registry for the current load.
    #[must_use]
    pub fn types(&self) -> &TypeStore
    {
        &self.types
    }

    /// Address range of C-runtime startup code, when the scanner found the
    /// program's entry point inside a scanned object file.
    ///
    /// A pure side channel: used to stop backtraces from running off into
    /// startup code, not part of the symbol data model.
    #[must_use]
    pub fn startup_range(&self) -> Option<(u64, u64)>
    {
        self.startup_range
    }
}
