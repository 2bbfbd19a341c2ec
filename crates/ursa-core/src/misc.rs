//! # Misc Functions
//!
//! Symbols known only from the linker's symbol table, with no debug-record
//! description.

use std::collections::HashMap;

use crate::records::SectionKind;

/// One linker-resolved symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiscFunction
{
    /// Symbol name
    pub name: String,
    /// Resolved address
    pub address: u64,
    /// Section the symbol lives in
    pub section: SectionKind,
}

/// The table of all misc functions for the loaded image.
///
/// Entries are kept in scan order. Name lookup returns the *first* scan
/// match even when duplicate names exist across compilation units; callers
/// must tolerate this. A separate address-sorted index supports range
/// queries.
#[derive(Debug, Default)]
pub struct MiscFunctionTable
{
    entries: Vec<MiscFunction>,
    by_name: HashMap<String, usize>,
    by_address: Vec<usize>,
}

impl MiscFunctionTable
{
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Append one entry in scan order.
    ///
    /// The name map keeps the first entry for a duplicated name.
    pub fn push(&mut self, name: &str, address: u64, section: SectionKind)
    {
        let index = self.entries.len();
        self.entries.push(MiscFunction {
            name: name.to_string(),
            address,
            section,
        });
        self.by_name.entry(name.to_string()).or_insert(index);
    }

    /// Rebuild the address-sorted index after a batch of pushes.
    pub fn finish(&mut self)
    {
        self.by_address = (0..self.entries.len()).collect();
        self.by_address.sort_by_key(|&i| (self.entries[i].address, i));
    }

    /// First-scan-match lookup by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&MiscFunction>
    {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// The entry with the greatest address not above `pc`, by sorted order.
    #[must_use]
    pub fn nearest_below(&self, pc: u64) -> Option<&MiscFunction>
    {
        let pos = self.by_address.partition_point(|&i| self.entries[i].address <= pc);
        pos.checked_sub(1).map(|p| &self.entries[self.by_address[p]])
    }

    /// Iterate entries in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &MiscFunction>
    {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Drop every entry past `len`, rebuilding the indexes.
    ///
    /// Used to retract a failed incremental scan.
    pub fn truncate(&mut self, len: usize)
    {
        self.entries.truncate(len);
        self.by_name.clear();
        for (index, entry) in self.entries.iter().enumerate() {
            self.by_name.entry(entry.name.clone()).or_insert(index);
        }
        self.finish();
    }
}
