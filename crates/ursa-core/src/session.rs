//! # Scan Session
//!
//! Per-expansion state threaded through the decoder and block builder.
//!
//! One `ScanSession` lives for exactly one materialization of one
//! compilation: it accumulates pending symbols, tracks the open lexical
//! scopes, collects per-subfile line vectors, and owns the arenas the
//! finished [`CompilationUnit`] is assembled from. Dropping the session
//! (on error or cancellation) releases everything it built as a unit.

use tracing::debug;

use crate::arena::Arena;
use crate::blocks::{Block, Blockvector};
use crate::cancel::CancelToken;
use crate::database::{CompilationUnit, LineEntry, Symtab};
use crate::decode;
use crate::error::{UrsaError, UrsaResult};
use crate::records::{DebugRecord, RecordKind};
use crate::symbols::{BlockId, Namespace, StorageClass, Symbol, SymbolId, SymbolValue};
use crate::types::{AggregateKind, Type, TypeId, TypeSlot, TypeStore};

/// Dummy line number some runtimes emit; carries no information.
const DUMMY_LINE: i32 = 0xffff;

/// Marker symbol names identifying the alternate compiler.
///
/// When the record immediately preceding a compilation's slice carries one of
/// these, narrow (`char`/`short`) parameters follow the promoting calling
/// convention and are widened to `int` at symbol-construction time.
pub(crate) fn is_compiler_mark(name: &str) -> bool
{
    name.ends_with("_compiled.")
}

/// One open lexical nesting level.
pub(crate) struct ContextFrame
{
    /// Pending-symbol accumulator saved when this level opened
    locals: Vec<SymbolId>,
    /// Length of the finished-block list when this level opened
    old_blocks: usize,
    /// Start address of the scope
    start: u64,
    /// The function symbol, for the outermost (function) level
    function: Option<SymbolId>,
    /// Nesting-depth token the matching scope-end must repeat
    depth: i32,
}

/// One sub-source-file of the compilation, with its line vector.
struct Subfile
{
    name: String,
    lines: Vec<LineEntry>,
}

/// State for materializing one compilation.
pub(crate) struct ScanSession<'a>
{
    pub(crate) store: &'a mut TypeStore,
    cancel: &'a CancelToken,

    pub(crate) symbols: Arena<Symbol>,
    blocks: Arena<Block>,

    pub(crate) file_symbols: Vec<SymbolId>,
    pub(crate) global_symbols: Vec<SymbolId>,
    pub(crate) local_symbols: Vec<SymbolId>,
    context: Vec<ContextFrame>,
    pending_blocks: Vec<BlockId>,

    subfiles: Vec<Subfile>,
    current_subfile: usize,
    subfile_stack: Vec<usize>,

    /// Local type numbering for this compilation (file part 0)
    type_index: Vec<Option<TypeSlot>>,
    /// Maps this compilation's header-file numbers to store entries;
    /// index 0 is a placeholder (file 0 is the compilation's own numbering)
    this_files: Vec<usize>,
    /// Forward-reference stubs awaiting end-of-compilation resolution
    pub(crate) undefined_types: Vec<TypeSlot>,

    /// Start of the open common block in `local_symbols`, if one is open
    common_mark: Option<usize>,
    /// Symbols awaiting linker fixup, resolved against the misc table
    pub(crate) pending_externs: Vec<SymbolId>,

    pub(crate) promote_narrow_args: bool,
    pub(crate) within_function: bool,
    source_file: Option<String>,
    source_start: u64,
}

impl<'a> ScanSession<'a>
{
    pub(crate) fn new(store: &'a mut TypeStore, cancel: &'a CancelToken, promote_narrow_args: bool) -> Self
    {
        Self {
            store,
            cancel,
            symbols: Arena::new(),
            blocks: Arena::new(),
            file_symbols: Vec::new(),
            global_symbols: Vec::new(),
            local_symbols: Vec::new(),
            context: Vec::new(),
            pending_blocks: Vec::new(),
            subfiles: Vec::new(),
            current_subfile: 0,
            subfile_stack: Vec::new(),
            type_index: Vec::new(),
            this_files: vec![usize::MAX],
            undefined_types: Vec::new(),
            common_mark: None,
            pending_externs: Vec::new(),
            promote_narrow_args,
            within_function: false,
            source_file: None,
            source_start: 0,
        }
    }

    pub(crate) fn cancel_check(&self) -> UrsaResult<()>
    {
        self.cancel.check()
    }

    /// Handle one record of the compilation's slice.
    pub(crate) fn process_record(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        if self.source_file.is_none() && rec.kind != RecordKind::SourceFile {
            if rec.kind.is_debug() {
                return Err(UrsaError::MissingSourceRecord { ordinal: rec.ordinal });
            }
            return Ok(());
        }

        match rec.kind {
            RecordKind::Function | RecordKind::FunctionName => self.process_function(rec),

            RecordKind::ScopeBegin => {
                let locals = std::mem::take(&mut self.local_symbols);
                self.context.push(ContextFrame {
                    locals,
                    old_blocks: self.pending_blocks.len(),
                    start: self.source_start.wrapping_add(rec.value as u64),
                    function: None,
                    depth: rec.desc,
                });
                Ok(())
            }

            RecordKind::ScopeEnd => self.process_scope_end(rec),

            RecordKind::SourceFile => {
                if self.source_file.is_none() {
                    self.start_symtab(rec.name, rec.value as u64);
                } else {
                    // Some compilers emit a source-file record where an
                    // include record belongs; treat it as one.
                    self.start_subfile(rec.name);
                }
                Ok(())
            }

            RecordKind::IncludedFile => {
                self.start_subfile(rec.name);
                Ok(())
            }

            RecordKind::BeginInclude => {
                self.subfile_stack.push(self.current_subfile);
                let header = self.store.add_header(rec.name, rec.value);
                self.this_files.push(header);
                self.start_subfile(rec.name);
                Ok(())
            }

            RecordKind::EndInclude => match self.subfile_stack.pop() {
                Some(previous) => {
                    self.current_subfile = previous;
                    Ok(())
                }
                None => Err(UrsaError::MalformedType {
                    detail: "end-include with no open include".to_string(),
                    ordinal: rec.ordinal,
                }),
            },

            RecordKind::RepeatedInclude => {
                match self.store.find_header(rec.name, rec.value) {
                    Some(header) => {
                        self.this_files.push(header);
                        Ok(())
                    }
                    None => Err(UrsaError::UnknownHeaderFile {
                        name: rec.name.to_string(),
                        ordinal: rec.ordinal,
                    }),
                }
            }

            RecordKind::SourceLine => {
                self.record_line(rec.desc, rec.value as u64);
                Ok(())
            }

            RecordKind::CommonBegin => {
                if self.common_mark.is_some() {
                    return Err(UrsaError::NestedCommon { ordinal: rec.ordinal });
                }
                self.common_mark = Some(self.local_symbols.len());
                Ok(())
            }

            RecordKind::CommonEnd => self.process_common_end(rec),

            RecordKind::Text { external: false } if is_compiler_mark(rec.name) => {
                self.promote_narrow_args = true;
                Ok(())
            }

            RecordKind::CommonEndLocal
            | RecordKind::SymbolLength
            | RecordKind::AltEntry
            | RecordKind::StructElement => Ok(()),

            kind if kind.is_debug() && !rec.name.is_empty() => {
                decode::define_symbol(self, rec.value, rec.name, rec.ordinal)?;
                Ok(())
            }

            _ => Ok(()),
        }
    }

    /// A function record either defines a text-segment variable (any
    /// descriptor other than `f`/`F`) or opens a new function context,
    /// closing the previous function's.
    fn process_function(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        let descriptor = rec
            .name
            .split_once(':')
            .and_then(|(_, rest)| rest.bytes().next());
        if !matches!(descriptor, Some(b'f' | b'F')) {
            decode::define_symbol(self, rec.value, rec.name, rec.ordinal)?;
            return Ok(());
        }

        self.within_function = true;
        if let Some(frame) = self.context.pop() {
            let locals = std::mem::take(&mut self.local_symbols);
            self.finish_block(frame.function, locals, frame.old_blocks, frame.start, rec.value as u64);
        }
        if !self.context.is_empty() {
            return Err(UrsaError::ScopeMismatch { ordinal: rec.ordinal });
        }

        let old_blocks = self.pending_blocks.len();
        let function = decode::define_symbol(self, rec.value, rec.name, rec.ordinal)?;
        self.context.push(ContextFrame {
            locals: Vec::new(),
            old_blocks,
            start: rec.value as u64,
            function,
            depth: 0,
        });
        self.local_symbols.clear();
        Ok(())
    }

    fn process_scope_end(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        let Some(frame) = self.context.pop() else {
            return Err(UrsaError::UnbalancedScope { ordinal: rec.ordinal });
        };
        if frame.depth != rec.desc {
            return Err(UrsaError::ScopeMismatch { ordinal: rec.ordinal });
        }

        // The locals saved at the matching scope-begin are the ones declared
        // for this scope; whatever accumulated since belongs elsewhere.
        self.local_symbols = frame.locals;

        if !self.local_symbols.is_empty() && self.context.len() > 1 {
            let mut start = frame.start;
            let end = self.source_start.wrapping_add(rec.value as u64);
            // Compilers occasionally emit a zero- or negative-width
            // innermost block; correct it silently.
            if start > end {
                start = end;
            }
            let locals = std::mem::take(&mut self.local_symbols);
            self.finish_block(None, locals, frame.old_blocks, start, end);
        } else if self.context.len() <= 1 {
            // The function body's own brace pair: its locals stay attached
            // to the function block itself.
            self.within_function = false;
        }
        Ok(())
    }

    fn process_common_end(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        let Some(mark) = self.common_mark.take() else {
            return Err(UrsaError::MalformedType {
                detail: "common end with no open common block".to_string(),
                ordinal: rec.ordinal,
            });
        };
        let members: Vec<SymbolId> = self.local_symbols[mark.min(self.local_symbols.len())..].to_vec();
        let void_type = self.store.basic().void_type;
        let symbol = self.symbols.alloc(Symbol {
            name: rec.name.to_string(),
            namespace: Namespace::Var,
            class: StorageClass::External,
            ty: void_type,
            value: SymbolValue::CommonMembers(members),
        });
        self.pending_externs.push(symbol);
        Ok(())
    }

    fn start_symtab(&mut self, name: &str, start: u64)
    {
        debug!(file = name, start, "reading symbols for compilation");
        self.source_file = Some(name.to_string());
        self.source_start = start;
        self.within_function = false;
        self.start_subfile(name);
    }

    fn start_subfile(&mut self, name: &str)
    {
        if let Some(index) = self.subfiles.iter().position(|s| s.name == name) {
            self.current_subfile = index;
            return;
        }
        self.subfiles.push(Subfile {
            name: name.to_string(),
            lines: Vec::new(),
        });
        self.current_subfile = self.subfiles.len() - 1;
    }

    fn record_line(&mut self, line: i32, pc: u64)
    {
        if line == DUMMY_LINE || line < 0 || self.subfiles.is_empty() {
            return;
        }
        self.subfiles[self.current_subfile].lines.push(LineEntry {
            line: line as u32,
            address: pc,
        });
    }

    /// Fold a pending-symbol list into an immutable block.
    ///
    /// Every block finished since `old_blocks` that still lacks a superblock
    /// becomes a child of the new block; this is how nested scopes end up
    /// pointing at their enclosing function.
    fn finish_block(
        &mut self,
        function: Option<SymbolId>,
        symbols: Vec<SymbolId>,
        old_blocks: usize,
        start: u64,
        end: u64,
    ) -> BlockId
    {
        let id = self.blocks.alloc(Block {
            start,
            end,
            function,
            superblock: None,
            symbols,
        });
        if let Some(function) = function {
            self.symbols[function].value = SymbolValue::Block(id);
        }
        for &pending in &self.pending_blocks[old_blocks.min(self.pending_blocks.len())..] {
            if self.blocks[pending].superblock.is_none() {
                self.blocks[pending].superblock = Some(id);
            }
        }
        self.pending_blocks.push(id);
        id
    }

    /// Close the compilation: resolve leftover stubs, fold the file-static
    /// and global blocks, order the blockvector, and emit one symtab per
    /// subfile sharing it.
    pub(crate) fn end_symtab(mut self, end_addr: u64, ordinal: u64) -> UrsaResult<(CompilationUnit, Vec<SymbolId>)>
    {
        if let Some(frame) = self.context.pop() {
            let locals = std::mem::take(&mut self.local_symbols);
            self.finish_block(frame.function, locals, frame.old_blocks, frame.start, end_addr);
        }
        if !self.context.is_empty() {
            return Err(UrsaError::ScopeMismatch { ordinal });
        }

        self.resolve_undefined_types();

        let start = self.source_start;
        let mut file_symbols = std::mem::take(&mut self.file_symbols);
        let mut global_symbols = std::mem::take(&mut self.global_symbols);
        self.sort_by_name(&mut file_symbols);
        self.sort_by_name(&mut global_symbols);

        // File-static block: adopts every block still lacking a superblock
        // (the function blocks). The global block adopts nothing; the two
        // top-level blocks have no superblock themselves.
        let static_block = self.finish_block(None, file_symbols, 0, start, end_addr);
        let global_block = self.blocks.alloc(Block {
            start,
            end: end_addr,
            function: None,
            superblock: None,
            symbols: global_symbols,
        });
        debug_assert!(self.blocks[static_block].superblock.is_none());

        // Fold order put subblocks before superblocks; reversing yields the
        // global and static blocks first, and a stable sort by start address
        // finishes the required ordering.
        let mut ordered: Vec<BlockId> = Vec::with_capacity(self.pending_blocks.len() + 1);
        ordered.push(global_block);
        ordered.extend(self.pending_blocks.iter().rev().copied());
        let blocks = &self.blocks;
        ordered.sort_by_key(|&id| blocks[id].start);

        let mut symtabs: Vec<Symtab> = self
            .subfiles
            .drain(..)
            .map(|subfile| {
                let mut lines = subfile.lines;
                lines.sort_by_key(|entry| entry.address);
                Symtab {
                    filename: subfile.name,
                    lines,
                }
            })
            .collect();
        if symtabs.is_empty() {
            symtabs.push(Symtab {
                filename: self.source_file.clone().unwrap_or_default(),
                lines: Vec::new(),
            });
        }

        debug!(
            file = self.source_file.as_deref().unwrap_or(""),
            blocks = ordered.len(),
            symtabs = symtabs.len(),
            "finished compilation"
        );

        let unit = CompilationUnit {
            symbols: self.symbols,
            blocks: self.blocks,
            blockvector: Blockvector { blocks: ordered },
            symtabs,
            type_index: self.type_index,
        };
        Ok((unit, self.pending_externs))
    }

    fn sort_by_name(&self, list: &mut [SymbolId])
    {
        let symbols = &self.symbols;
        list.sort_by(|&a, &b| symbols[a].name.cmp(&symbols[b].name));
    }

    /// Best-effort resolution of forward-reference stubs against every
    /// aggregate typedef seen at file scope, in place so existing holders
    /// observe the definition. Stubs with no match stay opaque.
    fn resolve_undefined_types(&mut self)
    {
        let worklist = std::mem::take(&mut self.undefined_types);
        for slot in worklist {
            let (name, kind) = match self.store.get(slot) {
                Type::Stub { name, kind } => (name.clone(), *kind),
                _ => continue,
            };
            if let Some(found) = self.find_struct_type(kind, &name, false) {
                if found != slot {
                    let content = self.store.get(found).clone();
                    self.store.set(slot, content);
                }
            }
        }
    }

    /// Search the file-scope symbols for an aggregate typedef of the given
    /// kind and name. `allow_stub` controls whether a still-unresolved stub
    /// satisfies the search (it does for cross-references, which may then
    /// share the stub; it does not for stub resolution itself).
    pub(crate) fn find_struct_type(&self, kind: AggregateKind, name: &str, allow_stub: bool) -> Option<TypeSlot>
    {
        for &id in &self.file_symbols {
            let symbol = &self.symbols[id];
            if symbol.class != StorageClass::Typedef || symbol.namespace != Namespace::Struct || symbol.name != name {
                continue;
            }
            let content = self.store.get(symbol.ty);
            if content.aggregate_kind() != Some(kind) {
                continue;
            }
            if !allow_stub && content.is_stub() {
                continue;
            }
            return Some(symbol.ty);
        }
        None
    }

    /// Resolve a type-number pair to its current slot, if any.
    pub(crate) fn lookup_type(&mut self, id: TypeId, ordinal: u64) -> UrsaResult<Option<TypeSlot>>
    {
        Ok(*self.type_entry(id, ordinal)?)
    }

    /// Resolve a type-number pair, allocating an empty placeholder slot the
    /// first time the pair is referenced.
    pub(crate) fn reserve_type(&mut self, id: TypeId, ordinal: u64) -> UrsaResult<TypeSlot>
    {
        if let Some(slot) = *self.type_entry(id, ordinal)? {
            return Ok(slot);
        }
        let slot = self.store.alloc(Type::Undefined);
        *self.type_entry(id, ordinal)? = Some(slot);
        Ok(slot)
    }

    /// Point a type-number pair at an existing slot.
    pub(crate) fn assign_type(&mut self, id: TypeId, slot: TypeSlot, ordinal: u64) -> UrsaResult<()>
    {
        *self.type_entry(id, ordinal)? = Some(slot);
        Ok(())
    }

    fn type_entry(&mut self, id: TypeId, ordinal: u64) -> UrsaResult<&mut Option<TypeSlot>>
    {
        let index = usize::try_from(id.local).map_err(|_| UrsaError::InvalidTypeNumber {
            file: id.file,
            index: id.local,
            ordinal,
        })?;

        if id.file == 0 {
            if index >= self.type_index.len() {
                self.type_index.resize(index + 1, None);
            }
            return Ok(&mut self.type_index[index]);
        }

        let file = id.file as usize;
        if file >= self.this_files.len() {
            return Err(UrsaError::InvalidTypeNumber {
                file: id.file,
                index: id.local,
                ordinal,
            });
        }
        Ok(self.store.header_entry(self.this_files[file], id.local))
    }
}
