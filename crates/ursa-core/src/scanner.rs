//! # Scanner
//!
//! First pass over the record stream: builds the partial-symtab index and
//! the misc-function table in one linear sweep, without allocating any type
//! or block.

use smallvec::SmallVec;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::database::UnitId;
use crate::error::{UrsaError, UrsaResult};
use crate::misc::MiscFunctionTable;
use crate::records::{DebugRecord, RecordKind, RecordSource, StringTable};
use crate::symbols::{Namespace, PartialSymbol, StorageClass};

/// Cheap index for one compilation: enough to answer "does this file define
/// symbol X" without decoding anything.
///
/// Created by the scanner; replaced by a full symtab when the expander runs
/// for it.
#[derive(Debug)]
pub struct PartialSymtab
{
    /// Source file name from the compilation-unit-start record
    pub filename: String,
    /// Lowest text address of the compilation
    pub textlow: u64,
    /// First text address past the compilation
    pub texthigh: u64,
    /// Record offsets `[start, end)` of the compilation's slice
    pub record_range: (u64, u64),
    /// Which loaded object stream the slice lives in
    pub file_index: usize,
    /// Name-sorted stub entries for file-global symbols
    pub globals: Vec<PartialSymbol>,
    /// Name-sorted stub entries for file-static symbols
    pub statics: Vec<PartialSymbol>,
    /// Include files named by this compilation
    pub includes: SmallVec<[String; 4]>,
    /// Indices of partial symtabs that must expand before this one
    pub dependencies: SmallVec<[usize; 4]>,
    /// Whether the expander has already materialized this entry
    pub expanded: bool,
    /// The compilation unit holding the expansion's results
    pub unit: Option<UnitId>,
}

impl PartialSymtab
{
    fn new(filename: &str, textlow: u64, record_start: u64, file_index: usize) -> Self
    {
        Self {
            filename: filename.to_string(),
            textlow,
            texthigh: 0,
            record_range: (record_start, record_start),
            file_index,
            globals: Vec::new(),
            statics: Vec::new(),
            includes: SmallVec::new(),
            dependencies: SmallVec::new(),
            expanded: false,
            unit: None,
        }
    }

    /// Whether this entry has its own record slice (include files named by a
    /// compilation get record-less entries that expand through their parent).
    #[must_use]
    pub fn has_records(&self) -> bool
    {
        self.record_range.0 != self.record_range.1
    }

    /// Binary-search one stub list for `name` in `namespace`.
    #[must_use]
    pub fn defines(&self, name: &str, namespace: Namespace, global: bool) -> bool
    {
        let list = if global { &self.globals } else { &self.statics };
        let mut index = list.partition_point(|entry| entry.name.as_str() < name);
        while let Some(entry) = list.get(index) {
            if entry.name != name {
                break;
            }
            if entry.namespace == namespace {
                return true;
            }
            index += 1;
        }
        false
    }
}

/// Side-channel results of one scanner pass.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ScanSummary
{
    /// Address range of C-runtime startup code, when the entry point was
    /// found inside a scanned object file's range
    pub startup_range: Option<(u64, u64)>,
}

/// One linear pass over a record stream.
pub(crate) struct Scanner<'a>
{
    strings: &'a StringTable,
    cancel: &'a CancelToken,
    partials: &'a mut Vec<PartialSymtab>,
    misc: &'a mut MiscFunctionTable,
    file_index: usize,
    entry_point: Option<u64>,

    current: Option<usize>,
    bincl: Vec<(String, i64, usize)>,
    last_o_file_start: u64,
    startup_range: Option<(u64, u64)>,
    end_of_text: Option<u64>,
    first_partial: usize,
}

impl<'a> Scanner<'a>
{
    pub(crate) fn new(
        strings: &'a StringTable,
        cancel: &'a CancelToken,
        partials: &'a mut Vec<PartialSymtab>,
        misc: &'a mut MiscFunctionTable,
        file_index: usize,
        entry_point: Option<u64>,
    ) -> Self
    {
        let first_partial = partials.len();
        Self {
            strings,
            cancel,
            partials,
            misc,
            file_index,
            entry_point,
            current: None,
            bincl: Vec::new(),
            last_o_file_start: 0,
            startup_range: None,
            end_of_text: None,
            first_partial,
        }
    }

    pub(crate) fn run(mut self, source: &mut dyn RecordSource) -> UrsaResult<ScanSummary>
    {
        let mut ordinal = source.position();
        let mut last_value = 0u64;
        while let Some(raw) = source.next_record()? {
            self.cancel.check()?;
            let record = DebugRecord::resolve(raw, self.strings, ordinal)?;
            self.process(&record)?;
            last_value = record.value as u64;
            ordinal += 1;
        }

        let end = self
            .end_of_text
            .unwrap_or_else(|| self.misc.iter().map(|m| m.address).max().unwrap_or(last_value));
        if let Some(entry) = self.entry_point {
            if self.startup_range.is_none() && entry < end && entry >= self.last_o_file_start {
                self.startup_range = Some((self.last_o_file_start, end));
            }
        }
        if let Some(current) = self.current.take() {
            self.close_partial(current, ordinal, end);
        }

        // Sort each stub list so lookups can binary search; ties keep
        // declaration order.
        for partial in &mut self.partials[self.first_partial..] {
            partial.globals.sort_by(|a, b| a.name.cmp(&b.name));
            partial.statics.sort_by(|a, b| a.name.cmp(&b.name));
        }

        debug!(
            partials = self.partials.len() - self.first_partial,
            misc = self.misc.len(),
            "scanned record stream"
        );

        Ok(ScanSummary {
            startup_range: self.startup_range,
        })
    }

    fn process(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        match rec.kind {
            // Externally visible linker symbols go to the misc table
            // unconditionally.
            RecordKind::Text { external: true }
            | RecordKind::Data { external: true }
            | RecordKind::Bss { external: true }
            | RecordKind::Absolute { external: true } => {
                if let Some(section) = rec.kind.section() {
                    self.misc.push(rec.name, rec.value as u64, section);
                }
                if matches!(rec.name, "_etext" | "etext") {
                    self.end_of_text = Some(rec.value as u64);
                }
                Ok(())
            }

            RecordKind::Text { external: false } | RecordKind::FileBoundary => {
                if rec.name.starts_with("-l") || rec.name.ends_with(".o") {
                    self.object_file_boundary(rec);
                } else if !crate::session::is_compiler_mark(rec.name) {
                    self.misc.push(rec.name, rec.value as u64, crate::records::SectionKind::Text);
                }
                Ok(())
            }

            RecordKind::Data { external: false } | RecordKind::Bss { external: false } | RecordKind::Absolute { external: false } => {
                if let Some(section) = rec.kind.section() {
                    self.misc.push(rec.name, rec.value as u64, section);
                }
                Ok(())
            }

            RecordKind::SourceFile => {
                if let Some(current) = self.current.take() {
                    self.close_partial(current, rec.ordinal, rec.value as u64);
                }
                self.partials.push(PartialSymtab::new(
                    rec.name,
                    rec.value as u64,
                    rec.ordinal,
                    self.file_index,
                ));
                self.current = Some(self.partials.len() - 1);
                Ok(())
            }

            RecordKind::IncludedFile => {
                self.add_include(rec.name);
                Ok(())
            }

            RecordKind::BeginInclude => {
                if let Some(current) = self.current {
                    self.bincl.push((rec.name.to_string(), rec.value, current));
                }
                self.add_include(rec.name);
                Ok(())
            }

            RecordKind::RepeatedInclude => self.repeated_include(rec),

            RecordKind::LocalSym => {
                self.local_stub(rec);
                Ok(())
            }

            RecordKind::GlobalVar | RecordKind::DataStatic | RecordKind::BssStatic | RecordKind::Function | RecordKind::FunctionName => {
                self.descriptor_stub(rec)
            }

            // Nothing else matters in this pass.
            _ => Ok(()),
        }
    }

    /// An object-file boundary: check the startup-file side channel and
    /// close the open partial symtab.
    fn object_file_boundary(&mut self, rec: &DebugRecord<'_>)
    {
        let value = rec.value as u64;
        if let Some(entry) = self.entry_point {
            if entry < value && entry >= self.last_o_file_start {
                self.startup_range = Some((self.last_o_file_start, value));
            }
        }
        if let Some(current) = self.current.take() {
            self.close_partial(current, rec.ordinal, value);
        }
        self.last_o_file_start = value;
    }

    fn close_partial(&mut self, index: usize, record_end: u64, texthigh: u64)
    {
        let includes: SmallVec<[String; 4]> = {
            let partial = &mut self.partials[index];
            partial.record_range.1 = record_end;
            partial.texthigh = texthigh.max(partial.textlow);
            partial.includes.clone()
        };

        // Every include file named by this compilation gets its own
        // record-less entry that expands through this one.
        for include in includes {
            let mut sub = PartialSymtab::new(&include, 0, 0, self.file_index);
            sub.dependencies.push(index);
            self.partials.push(sub);
        }
    }

    fn add_include(&mut self, name: &str)
    {
        let Some(current) = self.current else { return };
        let partial = &mut self.partials[current];
        if partial.filename != name && !partial.includes.iter().any(|i| i == name) {
            partial.includes.push(name.to_string());
        }
    }

    fn repeated_include(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        let owner = self
            .bincl
            .iter()
            .find(|(name, instance, _)| name == rec.name && *instance == rec.value)
            .map(|&(_, _, owner)| owner);
        let Some(owner) = owner else {
            return Err(UrsaError::UnknownHeaderFile {
                name: rec.name.to_string(),
                ordinal: rec.ordinal,
            });
        };
        let Some(current) = self.current else { return Ok(()) };
        if owner == current {
            return Ok(());
        }
        let partial = &mut self.partials[current];
        if !partial.dependencies.contains(&owner) {
            partial.dependencies.push(owner);
        }
        Ok(())
    }

    /// Local-symbol records contribute stubs only for typedefs and
    /// module-scope constants; plain locals are not indexed.
    fn local_stub(&mut self, rec: &DebugRecord<'_>)
    {
        let Some((name, rest)) = rec.name.split_once(':') else { return };
        match rest.bytes().next() {
            Some(b'T') => {
                self.push_stub(false, name, Namespace::Struct, StorageClass::Typedef, rec.value);
                self.enum_constant_stubs(rest);
            }
            Some(b't') => {
                self.push_stub(false, name, Namespace::Var, StorageClass::Typedef, rec.value);
                self.enum_constant_stubs(rest);
            }
            Some(b'c') => {
                self.push_stub(false, name, Namespace::Var, StorageClass::Constant, rec.value);
            }
            _ => {}
        }
    }

    /// An enumerated-type definition also indexes each of its constants, so
    /// a lookup by constant name finds the right file without expansion.
    fn enum_constant_stubs(&mut self, rest: &str)
    {
        // rest is `t...` or `T...`: skip the descriptor and the type number
        // and look for the `e` that opens an enum body.
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() && matches!(bytes[i], b'0'..=b'9' | b'(' | b')' | b',' | b'-' | b'=') {
            i += 1;
        }
        if bytes.get(i) != Some(&b'e') {
            return;
        }
        i += 1;

        let mut rest = &rest[i..];
        loop {
            if rest.is_empty() || rest.starts_with(';') || rest.starts_with(',') {
                break;
            }
            let Some(colon) = rest.find(':') else { break };
            let name = rest[..colon].to_string();
            self.push_stub(false, &name, Namespace::Var, StorageClass::Constant, 0);
            rest = &rest[colon + 1..];
            match rest.find(',') {
                Some(comma) => rest = &rest[comma + 1..],
                None => break,
            }
        }
    }

    /// Stub entries keyed by the variable-descriptor character, for records
    /// that describe module-scope data.
    fn descriptor_stub(&mut self, rec: &DebugRecord<'_>) -> UrsaResult<()>
    {
        let Some((name, rest)) = rec.name.split_once(':') else {
            // Not a debugging symbol.
            return Ok(());
        };
        let value = rec.value;
        match rest.bytes().next() {
            Some(b'c') => self.push_stub(false, name, Namespace::Var, StorageClass::Constant, value),
            Some(b'S') => self.push_stub(false, name, Namespace::Var, StorageClass::Static, value),
            Some(b'G') => self.push_stub(true, name, Namespace::Var, StorageClass::External, value),
            Some(b't') => self.push_stub(true, name, Namespace::Var, StorageClass::Typedef, value),
            Some(b'f') => self.push_stub(false, name, Namespace::Var, StorageClass::Block, value),
            Some(b'F') => self.push_stub(true, name, Namespace::Var, StorageClass::Block, value),
            Some(b'V') => self.push_stub(false, name, Namespace::Var, StorageClass::Static, value),
            Some(b'0'..=b'9' | b'(') => self.push_stub(false, name, Namespace::Var, StorageClass::Local, value),
            Some(other) => {
                return Err(UrsaError::UnknownDescriptor {
                    descriptor: other as char,
                    ordinal: rec.ordinal,
                });
            }
            None => {}
        }
        Ok(())
    }

    fn push_stub(&mut self, global: bool, name: &str, namespace: Namespace, class: StorageClass, address: i64)
    {
        let Some(current) = self.current else { return };
        let partial = &mut self.partials[current];
        let list = if global { &mut partial.globals } else { &mut partial.statics };
        list.push(PartialSymbol {
            name: name.to_string(),
            namespace,
            class,
            address,
        });
    }
}
