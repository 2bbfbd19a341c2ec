//! # Global Fixup Resolver
//!
//! After an expansion, reconciles forward-declared externs against the misc
//! function table.
//!
//! Externals decoded from debug records carry no address; the linker's
//! symbol table has it. Every external produced by an expansion waits in a
//! hash keyed by name, so one scan of the misc table resolves same-named
//! symbols from any number of compilations. Unresolved entries stay in the
//! hash: a later expansion (or an incrementally added object file) repeats
//! the pass, and until then their value reads as not-available, which is
//! expected and not an error.

use std::collections::HashMap;

use tracing::debug;

use crate::database::{CompilationUnit, SymbolRef};
use crate::misc::MiscFunctionTable;
use crate::symbols::{BlockId, SymbolValue};

/// Resolve every pending external whose name the misc table knows.
pub(crate) fn resolve_externals(
    units: &mut [CompilationUnit],
    pending: &mut HashMap<String, Vec<SymbolRef>>,
    misc: &MiscFunctionTable,
)
{
    if pending.is_empty() {
        return;
    }

    let mut resolved = 0usize;
    for entry in misc.iter() {
        let Some(refs) = pending.remove(&entry.name) else {
            continue;
        };
        for reference in refs {
            let unit = &mut units[reference.unit.to_raw() as usize];
            apply(unit, reference, entry.address);
            resolved += 1;
        }
    }
    if resolved > 0 {
        debug!(resolved, unresolved = pending.len(), "fixed up external symbols");
    }
}

fn apply(unit: &mut CompilationUnit, reference: SymbolRef, address: u64)
{
    match unit.symbols[reference.symbol].value.clone() {
        // A common block: each member recorded between the begin/end marker
        // pair inherits the resolved address as a base added to its own
        // previously-relative value.
        SymbolValue::CommonMembers(members) => {
            for member in members {
                let value = &mut unit.symbols[member].value;
                if let SymbolValue::Integer(offset) = *value {
                    *value = SymbolValue::Address(address.wrapping_add(offset as u64));
                }
            }
        }

        // A function: rebase its block (and the scopes nested in it, and its
        // line entries) from the compiler-relative start to the linker's
        // address.
        SymbolValue::Block(block) => rebase_function(unit, block, address),

        _ => unit.symbols[reference.symbol].value = SymbolValue::Address(address),
    }
}

fn rebase_function(unit: &mut CompilationUnit, block: BlockId, address: u64)
{
    let old_start = unit.blocks[block].start;
    let old_end = unit.blocks[block].end;
    let delta = address.wrapping_sub(old_start);
    if delta == 0 {
        return;
    }

    let targets: Vec<BlockId> = unit
        .blocks
        .iter()
        .filter(|&(id, _)| id == block || unit.block_has_ancestor(id, block))
        .map(|(id, _)| id)
        .collect();
    for id in targets {
        let b = &mut unit.blocks[id];
        b.start = b.start.wrapping_add(delta);
        b.end = b.end.wrapping_add(delta);
    }

    for symtab in &mut unit.symtabs {
        for entry in &mut symtab.lines {
            if old_start <= entry.address && entry.address < old_end {
                entry.address = entry.address.wrapping_add(delta);
            }
        }
    }
}
