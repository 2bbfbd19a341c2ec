//! Type registry for one load generation.
//!
//! The store owns every [`Type`] value produced while a program image is
//! loaded. A slot, once handed out, is never replaced by a different
//! allocation; forward references are filled in by mutating the slot's
//! content, so every earlier holder of the [`TypeSlot`] observes the final
//! definition. The whole store is dropped as a unit when a new program is
//! loaded.

use crate::types::model::{Type, TypeSlot};

/// Storage width in bytes of `int`, `enum`, and pointers in the encoding's
/// numeric conventions.
pub const WORD_BYTES: u8 = 4;

/// Canonical slots for the basic types every compilation references.
#[derive(Debug, Clone, Copy)]
#[allow(clippy::struct_field_names)]
pub struct BasicTypes
{
    /// `void`
    pub void_type: TypeSlot,
    /// Signed 1-byte `char`
    pub char_type: TypeSlot,
    /// `unsigned char`
    pub unsigned_char: TypeSlot,
    /// `short`
    pub short_type: TypeSlot,
    /// `unsigned short`
    pub unsigned_short: TypeSlot,
    /// `int`
    pub int_type: TypeSlot,
    /// `unsigned int`
    pub unsigned_int: TypeSlot,
    /// `float`
    pub float_type: TypeSlot,
    /// `double`
    pub double_type: TypeSlot,
}

/// One header file whose types may be shared across compilations.
///
/// Multiple entries may carry the same name when the same header produced
/// different expansions in different inclusion contexts; the `instance` code
/// from the begin-include record tells them apart.
#[derive(Debug)]
pub struct HeaderFile
{
    name: String,
    instance: i64,
    slots: Vec<Option<TypeSlot>>,
}

/// Rollback mark capturing the store's extent at the start of an expansion.
///
/// A failed or cancelled expansion rolls the store back to its mark so the
/// abandoned operation leaves nothing behind.
#[derive(Debug, Clone, Copy)]
pub struct TypeMark
{
    slots: usize,
    headers: usize,
}

/// The registry of all types for the currently loaded program image.
#[derive(Debug)]
pub struct TypeStore
{
    slots: Vec<Type>,
    headers: Vec<HeaderFile>,
    basic: BasicTypes,
}

impl TypeStore
{
    /// Create a store pre-populated with the canonical basic types.
    #[must_use]
    pub fn new() -> Self
    {
        let mut slots = Vec::new();
        let mut alloc = |ty: Type| {
            let slot = TypeSlot(slots.len() as u32);
            slots.push(ty);
            slot
        };

        let basic = BasicTypes {
            void_type: alloc(Type::Void),
            char_type: alloc(Type::Int { width: 1, signed: true }),
            unsigned_char: alloc(Type::Int { width: 1, signed: false }),
            short_type: alloc(Type::Int { width: 2, signed: true }),
            unsigned_short: alloc(Type::Int { width: 2, signed: false }),
            int_type: alloc(Type::Int {
                width: WORD_BYTES,
                signed: true,
            }),
            unsigned_int: alloc(Type::Int {
                width: WORD_BYTES,
                signed: false,
            }),
            float_type: alloc(Type::Float { width: 4 }),
            double_type: alloc(Type::Float { width: 8 }),
        };

        Self {
            slots,
            headers: Vec::new(),
            basic,
        }
    }

    /// The canonical basic-type slots.
    #[must_use]
    pub fn basic(&self) -> BasicTypes
    {
        self.basic
    }

    /// Allocate a fresh slot holding `content`.
    pub fn alloc(&mut self, content: Type) -> TypeSlot
    {
        let slot = TypeSlot(u32::try_from(self.slots.len()).expect("type store overflow"));
        self.slots.push(content);
        slot
    }

    /// Read a slot's current content.
    #[must_use]
    pub fn get(&self, slot: TypeSlot) -> &Type
    {
        &self.slots[slot.0 as usize]
    }

    /// Overwrite a slot's content in place.
    ///
    /// This is the fill-in path for forward references: the slot index stays
    /// valid, only the content changes.
    pub fn set(&mut self, slot: TypeSlot, content: Type)
    {
        self.slots[slot.0 as usize] = content;
    }

    /// Byte length of the value a slot describes.
    ///
    /// Stubs and undefined placeholders report zero; callers treat that as
    /// "not available" rather than an error.
    #[must_use]
    pub fn length_of(&self, slot: TypeSlot) -> u64
    {
        match self.get(slot) {
            Type::Void => 1,
            Type::Int { width, .. } | Type::Float { width } | Type::Range { width, .. } => u64::from(*width),
            Type::Pointer { .. } | Type::Reference { .. } | Type::Member { .. } => u64::from(WORD_BYTES),
            Type::Enum { .. } => u64::from(WORD_BYTES),
            Type::Array { length, .. } => *length,
            Type::Struct { data } | Type::Union { data } => data.length,
            Type::Function { .. } | Type::Method { .. } | Type::Stub { .. } | Type::Undefined => 0,
        }
    }

    /// Register a new header-file entry and return its index.
    pub fn add_header(&mut self, name: &str, instance: i64) -> usize
    {
        self.headers.push(HeaderFile {
            name: name.to_string(),
            instance,
            slots: Vec::new(),
        });
        self.headers.len() - 1
    }

    /// Find an existing header-file entry by (name, instance).
    #[must_use]
    pub fn find_header(&self, name: &str, instance: i64) -> Option<usize>
    {
        self.headers
            .iter()
            .position(|header| header.name == name && header.instance == instance)
    }

    /// Mutable access to the slot mapping of a header-file entry, growing the
    /// mapping as needed to cover `local`.
    pub fn header_entry(&mut self, header: usize, local: i32) -> &mut Option<TypeSlot>
    {
        let header = &mut self.headers[header];
        let index = usize::try_from(local).expect("negative local type index");
        if index >= header.slots.len() {
            header.slots.resize(index + 1, None);
        }
        &mut header.slots[index]
    }

    /// Capture the store's current extent for later rollback.
    #[must_use]
    pub fn mark(&self) -> TypeMark
    {
        TypeMark {
            slots: self.slots.len(),
            headers: self.headers.len(),
        }
    }

    /// Roll back to a mark, retracting every slot and header entry created
    /// after it.
    pub fn rollback(&mut self, mark: TypeMark)
    {
        self.slots.truncate(mark.slots);
        self.headers.truncate(mark.headers);
        let limit = mark.slots as u32;
        for header in &mut self.headers {
            for entry in &mut header.slots {
                if entry.is_some_and(|slot| slot.0 >= limit) {
                    *entry = None;
                }
            }
        }
    }

    /// Number of slots currently allocated.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.slots.len()
    }

    /// Whether no slots are allocated (never true in practice: the basic
    /// types occupy the first slots).
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.slots.is_empty()
    }
}

impl Default for TypeStore
{
    fn default() -> Self
    {
        Self::new()
    }
}
