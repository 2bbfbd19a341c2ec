//! # Symbols
//!
//! Decoded symbol values and the lightweight stub entries the scanner
//! records before full decoding.

use crate::arena::ArenaIndex;
use crate::blocks::Block;
use crate::types::TypeSlot;

/// Index of a symbol within one compilation unit's arena.
pub type SymbolId = ArenaIndex<Symbol>;

/// Index of a block within one compilation unit's arena.
pub type BlockId = ArenaIndex<Block>;

/// Which name space a symbol's name lives in.
///
/// C keeps variable names, aggregate tags, and labels in separate spaces; a
/// lookup must say which one it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace
{
    /// Variables, functions, typedefs
    Var,
    /// Struct/union/enum tags
    Struct,
    /// Goto labels
    Label,
}

/// How a symbol's value is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass
{
    /// Integer constant
    Constant,
    /// Constant stored as raw bytes (floating constants)
    ConstantBytes,
    /// Static storage, address known at compile/link time
    Static,
    /// Lives in a register
    Register,
    /// Parameter passed in a register
    RegisterParam,
    /// Parameter at a frame offset
    Argument,
    /// Parameter passed by reference
    RefArgument,
    /// Local at a frame offset
    Local,
    /// Code label
    Label,
    /// Function: the value owns the function body's block
    Block,
    /// Type name definition
    Typedef,
    /// Defined elsewhere; address supplied by the linker fixup pass
    External,
}

/// The payload interpreted according to [`StorageClass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolValue
{
    /// Not yet resolved (externals awaiting linker fixup)
    Unresolved,
    /// Plain integer: constant value, frame offset, or register number
    Integer(i64),
    /// Raw constant bytes
    Bytes(Vec<u8>),
    /// Resolved absolute address
    Address(u64),
    /// The block of a function body
    Block(BlockId),
    /// Members of a named common block, each holding an offset to which the
    /// block's resolved base address is later added
    CommonMembers(Vec<SymbolId>),
}

/// One fully decoded symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol
{
    /// Symbol name
    pub name: String,
    /// Name space the name belongs to
    pub namespace: Namespace,
    /// Storage class
    pub class: StorageClass,
    /// The symbol's type
    pub ty: TypeSlot,
    /// Value, interpreted per class
    pub value: SymbolValue,
}

impl Symbol
{
    /// The symbol's address, when it has one.
    ///
    /// Returns `None` for unresolved externals and non-address classes;
    /// callers must tolerate the not-available state.
    #[must_use]
    pub fn address(&self) -> Option<u64>
    {
        match self.value {
            SymbolValue::Address(address) => Some(address),
            _ => None,
        }
    }
}

/// Lightweight stub entry recorded by the scanner: just enough to answer
/// "does this file define symbol X" without decoding anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSymbol
{
    /// Symbol name
    pub name: String,
    /// Name space
    pub namespace: Namespace,
    /// Storage class the descriptor character implied
    pub class: StorageClass,
    /// Raw value field of the record
    pub address: i64,
}
