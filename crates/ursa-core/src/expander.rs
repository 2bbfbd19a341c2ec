//! # Expander
//!
//! Lazy second pass: re-drives the decoder and block builder over the record
//! slice recorded for one partial symtab, producing the full compilation
//! unit that replaces it.

use tracing::debug;

use crate::database::{SymbolDatabase, SymbolRef, UnitId};
use crate::error::{UrsaError, UrsaResult};
use crate::fixup;
use crate::records::{DebugRecord, RecordKind};
use crate::session::{is_compiler_mark, ScanSession};

/// Materialize one partial symtab (and, depth-first, everything it depends
/// on). Idempotent: an already-expanded entry returns immediately with no
/// records consumed.
///
/// On error the triggering entry stays unexpanded and everything the failed
/// attempt allocated is released, so a later explicit request can retry.
pub(crate) fn expand_partial(db: &mut SymbolDatabase, index: usize) -> UrsaResult<()>
{
    if db.partials[index].expanded {
        return Ok(());
    }

    // Dependency graphs here are acyclic by construction: a file cannot
    // begin-include itself.
    let dependencies = db.partials[index].dependencies.clone();
    for dependency in dependencies {
        expand_partial(db, dependency)?;
    }

    if !db.partials[index].has_records() {
        // An include file's entry: its contents were materialized by the
        // parent compilation just expanded.
        let unit = db.partials[index]
            .dependencies
            .first()
            .and_then(|&parent| db.partials[parent].unit);
        let partial = &mut db.partials[index];
        partial.expanded = true;
        partial.unit = unit;
        return Ok(());
    }

    debug!(file = %db.partials[index].filename, "expanding partial symtab");

    let mark = db.types.mark();
    match run_expansion(db, index) {
        Ok((unit, pending)) => {
            let unit_id = UnitId::from_raw(db.units.len() as u32);
            for symbol in pending {
                let name = unit.symbols[symbol].name.clone();
                db.pending_externs.entry(name).or_default().push(SymbolRef {
                    unit: unit_id,
                    symbol,
                });
            }
            db.units.push(unit);
            let partial = &mut db.partials[index];
            partial.expanded = true;
            partial.unit = Some(unit_id);

            fixup::resolve_externals(&mut db.units, &mut db.pending_externs, &db.misc);
            Ok(())
        }
        Err(error) => {
            db.types.rollback(mark);
            Err(error)
        }
    }
}

fn run_expansion(
    db: &mut SymbolDatabase,
    index: usize,
) -> UrsaResult<(crate::database::CompilationUnit, Vec<crate::symbols::SymbolId>)>
{
    let (start, end) = db.partials[index].record_range;
    let texthigh = db.partials[index].texthigh;
    let file_index = db.partials[index].file_index;
    let cancel = db.cancel.clone();

    let file = &mut db.files[file_index];
    let types = &mut db.types;

    // The record immediately preceding the slice is inspected (without being
    // counted as part of this compilation) for the alternate-compiler
    // marker, which changes argument-type promotion downstream.
    let mut promote = false;
    if start > 0 {
        file.source.seek(start - 1)?;
        if let Some(raw) = file.source.next_record()? {
            let record = DebugRecord::resolve(raw, &file.strings, start - 1)?;
            if matches!(record.kind, RecordKind::Text { .. }) && is_compiler_mark(record.name) {
                promote = true;
            }
        }
    } else {
        file.source.seek(start)?;
    }

    let mut session = ScanSession::new(types, &cancel, promote);
    let mut ordinal = start;
    while ordinal < end {
        session.cancel_check()?;
        let Some(raw) = file.source.next_record()? else { break };
        let record = DebugRecord::resolve(raw, &file.strings, ordinal)?;
        if ordinal == start && record.kind != RecordKind::SourceFile {
            return Err(UrsaError::MissingSourceRecord { ordinal });
        }
        session.process_record(&record)?;
        ordinal += 1;
    }

    session.end_symtab(texthigh, ordinal)
}
