//! # Lexical Blocks
//!
//! Immutable address-ranged scopes and the per-compilation block vector.

use crate::arena::Arena;
use crate::symbols::{BlockId, SymbolId};

/// Index of the per-compilation global block in a [`Blockvector`].
pub const GLOBAL_BLOCK: usize = 0;

/// Index of the per-compilation file-static block in a [`Blockvector`].
pub const STATIC_BLOCK: usize = 1;

/// One lexical scope: an address range plus the symbols declared in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block
{
    /// First address of the range
    pub start: u64,
    /// First address past the range
    pub end: u64,
    /// The function symbol this block is the body of, if any
    pub function: Option<SymbolId>,
    /// Enclosing block; `None` only for the two per-file top-level blocks
    pub superblock: Option<BlockId>,
    /// Symbols declared directly in this scope, in declaration order
    /// (top-level blocks are re-sorted by name when the compilation closes)
    pub symbols: Vec<SymbolId>,
}

impl Block
{
    /// Whether `pc` falls inside this block's range.
    #[must_use]
    pub fn contains(&self, pc: u64) -> bool
    {
        self.start <= pc && pc < self.end
    }
}

/// The ordered set of blocks for one compilation.
///
/// Index 0 is the global block and index 1 the file-static block; both span
/// the whole compilation. The remaining blocks are ordered by ascending
/// start address, and every block's range is contained in its superblock's
/// range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blockvector
{
    /// Block ids in the order described above
    pub blocks: Vec<BlockId>,
}

impl Blockvector
{
    /// The innermost block containing `pc`, if any.
    ///
    /// Among containing blocks the one starting latest wins; on a tie the
    /// narrower block wins, so a nested scope shadows its enclosing function.
    #[must_use]
    pub fn innermost_containing(&self, blocks: &Arena<Block>, pc: u64) -> Option<BlockId>
    {
        let mut best: Option<BlockId> = None;
        for &id in &self.blocks {
            let block = &blocks[id];
            if !block.contains(pc) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    let cur = &blocks[current];
                    block.start > cur.start || (block.start == cur.start && block.end - block.start < cur.end - cur.start)
                }
            };
            if better {
                best = Some(id);
            }
        }
        best
    }

    /// The global block's address range, when the vector is non-empty.
    #[must_use]
    pub fn range(&self, blocks: &Arena<Block>) -> Option<(u64, u64)>
    {
        self.blocks.get(GLOBAL_BLOCK).map(|&id| {
            let block = &blocks[id];
            (block.start, block.end)
        })
    }
}
