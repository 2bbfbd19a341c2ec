//! Tests for the scanner index, lazy expansion, lookups, and linker fixup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ursa_core::blocks::{GLOBAL_BLOCK, STATIC_BLOCK};
use ursa_core::database::SymbolDatabase;
use ursa_core::records::{kind, LinkerSymbol, RawRecord, RecordSource, RecordStreamBuilder, SectionKind, SliceRecordSource, StringTable};
use ursa_core::symbols::{Namespace, StorageClass, SymbolValue};
use ursa_core::{UrsaError, UrsaResult};

const INT_DEF: &str = "int:t1=r1;-2147483648;2147483647;";
const CHAR_DEF: &str = "char:t2=r2;0;127;";

/// A record source that counts how many records are actually read.
struct CountingSource
{
    inner: SliceRecordSource,
    reads: Arc<AtomicUsize>,
}

impl RecordSource for CountingSource
{
    fn next_record(&mut self) -> UrsaResult<Option<RawRecord>>
    {
        let record = self.inner.next_record()?;
        if record.is_some() {
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        Ok(record)
    }

    fn seek(&mut self, offset: u64) -> UrsaResult<()>
    {
        self.inner.seek(offset)
    }

    fn position(&self) -> u64
    {
        self.inner.position()
    }
}

/// One compilation `main.c` with a function `main` holding a nested scope
/// with local `i`, recorded at compiler-relative addresses.
fn main_program() -> (Vec<RawRecord>, StringTable)
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "main.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::FUN, 0, 100, "main:F1");
    builder.push(kind::LBRAC, 1, 100, "");
    builder.push(kind::LSYM, 0, 4, "i:1");
    builder.push(kind::LBRAC, 2, 110, "");
    builder.push(kind::RBRAC, 2, 140, "");
    builder.push(kind::RBRAC, 1, 195, "");
    builder.push(kind::TEXT | kind::EXT, 0, 0x2000, "_etext");
    builder.finish()
}

fn main_linker() -> Vec<LinkerSymbol>
{
    vec![LinkerSymbol::new("main", 0x1000, SectionKind::Text)]
}

fn load_main() -> SymbolDatabase
{
    let (records, strings) = main_program();
    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, main_linker(), None)
        .expect("load");
    db
}

#[test]
fn test_scanner_builds_index_without_expanding()
{
    let db = load_main();
    let (expanded, pending) = db.list_source_files();
    assert!(expanded.is_empty());
    assert_eq!(pending, vec!["main.c"]);

    let partial = &db.partial_symtabs()[0];
    assert!(!partial.expanded);
    assert!(partial.defines("main", Namespace::Var, true));
    assert!(partial.defines("int", Namespace::Var, false));
    assert!(!partial.defines("i", Namespace::Var, false));

    assert_eq!(db.lookup_misc_function("main").map(|m| m.address), Some(0x1000));
}

#[test]
fn test_lookup_triggers_expansion_and_fixup_rebases_function()
{
    let mut db = load_main();

    let main = db
        .lookup_symbol("main", None, Namespace::Var)
        .expect("lookup")
        .expect("main found");
    let symbol = db.symbol(main);
    assert_eq!(symbol.class, StorageClass::Block);

    // The block's start is the linker-resolved address, not the
    // compiler-relative 100 originally recorded.
    let block = db.function_block(main).expect("function owns a block");
    assert_eq!(db.block(block).start, 0x1000);

    let (expanded, pending) = db.list_source_files();
    assert_eq!(expanded, vec!["main.c"]);
    assert!(pending.is_empty());
}

#[test]
fn test_find_pc_line_after_fixup()
{
    let mut db = load_main();
    let info = db.find_pc_line(0x1050).expect("query").expect("pc known");
    assert_eq!(info.filename, "main.c");
    assert_eq!(info.line, None);
}

#[test]
fn test_nested_scope_lookup_through_block_chain()
{
    let mut db = load_main();
    // The nested scope 110..140 was rebased along with its function
    // (delta = 0x1000 - 100).
    let delta = 0x1000 - 100;
    let inner = db
        .block_for_pc(120 + delta)
        .expect("query")
        .expect("inner block found");
    let i = db
        .lookup_symbol("i", Some(inner), Namespace::Var)
        .expect("lookup")
        .expect("local i visible in nested scope");
    let symbol = db.symbol(i);
    assert_eq!(symbol.class, StorageClass::Local);
    assert_eq!(symbol.value, SymbolValue::Integer(4));

    // Outside the nested scope the local is not in scope.
    let outer = db
        .block_for_pc(150 + delta)
        .expect("query")
        .expect("function block found");
    assert_ne!(inner, outer);
}

#[test]
fn test_expansion_is_idempotent()
{
    let (records, strings) = main_program();
    let reads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: SliceRecordSource::new(records),
        reads: reads.clone(),
    };

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(source), strings, main_linker(), None).expect("load");

    assert!(db.expand_file("main.c").expect("expand"));
    let after_first = reads.load(Ordering::Relaxed);
    let units_after_first = db.units().len();

    assert!(db.expand_file("main.c").expect("expand again"));
    assert_eq!(reads.load(Ordering::Relaxed), after_first, "second expansion read records");
    assert_eq!(db.units().len(), units_after_first);
}

#[test]
fn test_block_invariants_hold()
{
    // Same program, but recorded at its linked addresses so no rebasing
    // happens and the whole blockvector stays self-consistent.
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0x1000, "main.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::FUN, 0, 0x1000, "main:F1");
    builder.push(kind::LBRAC, 1, 0, "");
    builder.push(kind::LSYM, 0, 4, "i:1");
    builder.push(kind::LBRAC, 2, 16, "");
    builder.push(kind::RBRAC, 2, 64, "");
    builder.push(kind::RBRAC, 1, 240, "");
    builder.push(kind::TEXT | kind::EXT, 0, 0x2000, "_etext");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![LinkerSymbol::new("main", 0x1000, SectionKind::Text)],
        None,
    )
    .expect("load");
    db.expand_file("main.c").expect("expand");

    let unit = &db.units()[0];
    let vector = &unit.blockvector.blocks;
    assert!(vector.len() >= 3);

    // Ascending start addresses.
    for pair in vector.windows(2) {
        assert!(unit.blocks[pair[0]].start <= unit.blocks[pair[1]].start);
    }

    // Containment within the superblock, for every block that has one.
    for &id in vector {
        let block = &unit.blocks[id];
        if let Some(superblock) = block.superblock {
            let outer = &unit.blocks[superblock];
            assert!(outer.start <= block.start && block.end <= outer.end);
        }
    }

    // The two top-level blocks have no superblock.
    assert!(unit.blocks[vector[GLOBAL_BLOCK]].superblock.is_none());
    assert!(unit.blocks[vector[STATIC_BLOCK]].superblock.is_none());
}

#[test]
fn test_global_variable_fixup()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "globals.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::GSYM, 0, 0, "counter:G1");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![LinkerSymbol::new("counter", 0x4000, SectionKind::Data)],
        None,
    )
    .expect("load");

    let counter = db
        .lookup_symbol("counter", None, Namespace::Var)
        .expect("lookup")
        .expect("global found");
    let symbol = db.symbol(counter);
    assert_eq!(symbol.class, StorageClass::External);
    assert_eq!(symbol.address(), Some(0x4000));
}

#[test]
fn test_unresolved_external_resolves_after_incremental_load()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "a.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::GSYM, 0, 0, "late:G1");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("load");

    let late = db
        .lookup_symbol("late", None, Namespace::Var)
        .expect("lookup")
        .expect("external found");
    // No linker symbol yet: the address query reports not-available.
    assert_eq!(db.symbol(late).address(), None);

    // An incrementally linked object file supplies the definition.
    let mut extra = RecordStreamBuilder::new();
    extra.push(kind::SO, 0, 0x8000, "b.c");
    let (records, strings) = extra.finish();
    db.add_object_file(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![LinkerSymbol::new("late", 0x8100, SectionKind::Bss)],
    )
    .expect("add object");

    assert_eq!(db.symbol(late).address(), Some(0x8100));
}

#[test]
fn test_common_block_members_inherit_base_address()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "fort.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::FUN, 0, 100, "calc:F1");
    builder.push(kind::BCOMM, 0, 0, "shared_");
    builder.push(kind::LSYM, 0, 0, "a:1");
    builder.push(kind::LSYM, 0, 4, "b:1");
    builder.push(kind::ECOMM, 0, 0, "shared_");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![
            LinkerSymbol::new("calc", 100, SectionKind::Text),
            LinkerSymbol::new("shared_", 0x6000, SectionKind::Bss),
        ],
        None,
    )
    .expect("load");
    db.expand_file("fort.c").expect("expand");

    let calc_block = db.block_for_pc(100).expect("query").expect("function block");
    let a = db
        .lookup_symbol("a", Some(calc_block), Namespace::Var)
        .expect("lookup")
        .expect("common member a");
    let b = db
        .lookup_symbol("b", Some(calc_block), Namespace::Var)
        .expect("lookup")
        .expect("common member b");
    assert_eq!(db.symbol(a).value, SymbolValue::Address(0x6000));
    assert_eq!(db.symbol(b).value, SymbolValue::Address(0x6004));
}

#[test]
fn test_misc_lookup_returns_first_scan_match()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "dup.c");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![
            LinkerSymbol::new("dup", 0x100, SectionKind::Text),
            LinkerSymbol::new("dup", 0x200, SectionKind::Text),
        ],
        None,
    )
    .expect("load");

    assert_eq!(db.lookup_misc_function("dup").map(|m| m.address), Some(0x100));
}

#[test]
fn test_include_dependency_expands_defining_file_first()
{
    let mut builder = RecordStreamBuilder::new();
    // a.c pulls in defs.h, defining char-typed (1,1) inside it.
    builder.push(kind::SO, 0, 0, "a.c");
    builder.push(kind::BINCL, 0, 7, "defs.h");
    builder.push(kind::LSYM, 0, 0, "byte:t(1,1)=r(1,1);0;127;");
    builder.push(kind::EINCL, 0, 0, "");
    // b.c reuses the same header expansion and refers into it.
    builder.push(kind::SO, 0, 0x100, "b.c");
    builder.push(kind::EXCL, 0, 7, "defs.h");
    builder.push(kind::LSYM, 0, 0, "bp:t2=*(1,1)");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("load");

    {
        let partials = db.partial_symtabs();
        let b = partials.iter().find(|p| p.filename == "b.c").expect("b.c indexed");
        assert_eq!(b.dependencies.len(), 1);
        assert_eq!(partials[b.dependencies[0]].filename, "a.c");
    }

    // Expanding b.c must pull a.c in first to get the header's types.
    db.expand_file("b.c").expect("expand");
    let (expanded, _) = db.list_source_files();
    assert!(expanded.contains(&"a.c"));
    assert!(expanded.contains(&"b.c"));

    let bp = db
        .lookup_symbol("bp", None, Namespace::Var)
        .expect("lookup")
        .expect("typedef in b.c");
    match db.types().get(db.symbol(bp).ty) {
        ursa_core::types::Type::Pointer { to } => {
            assert_eq!(*to, db.types().basic().char_type);
        }
        other => panic!("expected pointer into the shared header, got {other:?}"),
    }
}

#[test]
fn test_repeated_include_without_begin_is_fatal()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "a.c");
    builder.push(kind::EXCL, 0, 7, "never.h");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    let error = db
        .load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .unwrap_err();
    assert!(matches!(error, UrsaError::UnknownHeaderFile { .. }));

    // A failed scanner pass leaves no partial or full symtabs.
    let (expanded, pending) = db.list_source_files();
    assert!(expanded.is_empty());
    assert!(pending.is_empty());
}

#[test]
fn test_bad_string_offset_is_fatal()
{
    let records = vec![RawRecord {
        kind: kind::SO,
        desc: 0,
        value: 0,
        name_offset: 9999,
    }];
    let mut db = SymbolDatabase::new();
    let error = db
        .load_program(
            Box::new(SliceRecordSource::new(records)),
            StringTable::new(),
            Vec::new(),
            None,
        )
        .unwrap_err();
    assert!(matches!(error, UrsaError::BadStringOffset { offset: 9999, .. }));
}

#[test]
fn test_scope_mismatch_leaves_partial_retryable()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "bad.c");
    builder.push(kind::FUN, 0, 100, "f:F1");
    builder.push(kind::LBRAC, 1, 100, "");
    builder.push(kind::RBRAC, 2, 140, "");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("scan is fine; the mismatch is a decode-time error");

    let error = db.expand_file("bad.c").unwrap_err();
    assert!(matches!(error, UrsaError::ScopeMismatch { .. }));
    let (expanded, pending) = db.list_source_files();
    assert!(expanded.is_empty());
    assert_eq!(pending, vec!["bad.c"]);

    // Retrying hits the same record, not a corrupted registry.
    let error = db.expand_file("bad.c").unwrap_err();
    assert!(matches!(error, UrsaError::ScopeMismatch { .. }));
}

#[test]
fn test_cancellation_aborts_load_and_leaves_database_empty()
{
    let (records, strings) = main_program();
    let mut db = SymbolDatabase::new();
    db.cancel_token().cancel();
    let error = db
        .load_program(Box::new(SliceRecordSource::new(records)), strings, main_linker(), None)
        .unwrap_err();
    assert!(matches!(error, UrsaError::Cancelled));
    let (expanded, pending) = db.list_source_files();
    assert!(expanded.is_empty());
    assert!(pending.is_empty());
}

#[test]
fn test_argument_promotion_under_alternate_compiler()
{
    let build = |marked: bool| {
        let mut builder = RecordStreamBuilder::new();
        if marked {
            builder.push(kind::TEXT, 0, 0, "gcc_compiled.");
        }
        builder.push(kind::SO, 0, 0, "args.c");
        builder.push(kind::LSYM, 0, 0, INT_DEF);
        builder.push(kind::LSYM, 0, 0, CHAR_DEF);
        builder.push(kind::FUN, 0, 100, "f:F1");
        builder.push(kind::PSYM, 0, 8, "c:p2");
        builder.push(kind::TEXT | kind::EXT, 0, 0x200, "_etext");
        builder.finish()
    };

    for (marked, expect_promoted) in [(true, true), (false, false)] {
        let (records, strings) = build(marked);
        let mut db = SymbolDatabase::new();
        db.load_program(
            Box::new(SliceRecordSource::new(records)),
            strings,
            vec![LinkerSymbol::new("f", 100, SectionKind::Text)],
            None,
        )
        .expect("load");
        db.expand_file("args.c").expect("expand");

        let scope = db.block_for_pc(100).expect("query").expect("function block");
        let arg = db
            .lookup_symbol("c", Some(scope), Namespace::Var)
            .expect("lookup")
            .expect("parameter");
        let ty = db.symbol(arg).ty;
        if expect_promoted {
            assert_eq!(ty, db.types().basic().int_type, "narrow argument not widened");
        } else {
            assert_eq!(ty, db.types().basic().char_type, "argument widened without the marker");
        }
    }
}

#[test]
fn test_startup_range_side_channel()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::TEXT, 0, 0x100, "crt0.o");
    builder.push(kind::SO, 0, 0x100, "crt0.c");
    builder.push(kind::TEXT, 0, 0x400, "main.o");
    builder.push(kind::SO, 0, 0x400, "main.c");
    builder.push(kind::TEXT | kind::EXT, 0, 0x900, "_etext");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        Vec::new(),
        Some(0x180),
    )
    .expect("load");
    assert_eq!(db.startup_range(), Some((0x100, 0x400)));
}

#[test]
fn test_register_parameter_coalescing()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "reg.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::FUN, 0, 100, "f:F1");
    builder.push(kind::PSYM, 0, 8, "n:p1");
    builder.push(kind::RSYM, 0, 3, "n:r1");
    builder.push(kind::TEXT | kind::EXT, 0, 0x200, "_etext");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![LinkerSymbol::new("f", 100, SectionKind::Text)],
        None,
    )
    .expect("load");
    db.expand_file("reg.c").expect("expand");

    let scope = db.block_for_pc(100).expect("query").expect("function block");
    let n = db
        .lookup_symbol("n", Some(scope), Namespace::Var)
        .expect("lookup")
        .expect("parameter");
    let symbol = db.symbol(n);
    assert_eq!(symbol.class, StorageClass::RegisterParam);
    assert_eq!(symbol.value, SymbolValue::Integer(3));

    // One symbol, not a parameter plus a shadowing register variable.
    let block = db.block(scope);
    let count = block
        .symbols
        .iter()
        .filter(|&&id| db.units()[0].symbols[id].name == "n")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn test_line_table_query()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0x1000, "lines.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    builder.push(kind::FUN, 0, 0x1000, "f:F1");
    builder.push(kind::SLINE, 10, 0x1000, "");
    builder.push(kind::SLINE, 11, 0x1010, "");
    builder.push(kind::SLINE, 12, 0x1030, "");
    builder.push(kind::TEXT | kind::EXT, 0, 0x2000, "_etext");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(
        Box::new(SliceRecordSource::new(records)),
        strings,
        vec![LinkerSymbol::new("f", 0x1000, SectionKind::Text)],
        None,
    )
    .expect("load");

    let info = db.find_pc_line(0x1018).expect("query").expect("line found");
    assert_eq!(info.filename, "lines.c");
    assert_eq!(info.line, Some(11));
    assert_eq!(info.pc_range, (0x1010, 0x1030));
}

#[test]
fn test_lookup_by_enum_constant_expands_right_file()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "colors.c");
    builder.push(kind::LSYM, 0, 0, "color:T1=ered:0,green:1,blue:2,;");
    builder.push(kind::SO, 0, 0x100, "other.c");
    builder.push(kind::LSYM, 0, 0, INT_DEF);
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("load");

    let green = db
        .lookup_symbol("green", None, Namespace::Var)
        .expect("lookup")
        .expect("enumerator indexed at scan time");
    assert_eq!(db.symbol(green).value, SymbolValue::Integer(1));

    let (expanded, pending) = db.list_source_files();
    assert_eq!(expanded, vec!["colors.c"]);
    assert_eq!(pending, vec!["other.c"]);
}
