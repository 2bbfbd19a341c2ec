//! Decoded type values.

use std::fmt;

/// A (file, local index) type number as written in the encoding.
///
/// `file == 0` means the compilation's own numbering; other values index the
/// compilation's header-file list established by begin-include records.
/// `local == -1` marks an anonymous type never entered in any registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId
{
    /// Header-file part of the pair
    pub file: u32,
    /// Index within that file's numbering
    pub local: i32,
}

impl TypeId
{
    /// Pair constructor.
    #[must_use]
    pub const fn new(file: u32, local: i32) -> Self
    {
        Self { file, local }
    }

    /// Whether this id refers to a registry slot at all.
    #[must_use]
    pub const fn is_anonymous(self) -> bool
    {
        self.local < 0
    }
}

impl fmt::Display for TypeId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "({},{})", self.file, self.local)
    }
}

/// Index of a slot in the [`TypeStore`].
///
/// [`TypeStore`]: crate::types::TypeStore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeSlot(pub(crate) u32);

impl TypeSlot
{
    /// Raw slot number.
    #[must_use]
    pub const fn to_raw(self) -> u32
    {
        self.0
    }
}

/// Which aggregate a cross-reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind
{
    /// `struct`
    Struct,
    /// `union`
    Union,
    /// `enum`
    Enum,
}

/// Member visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility
{
    /// Encoded as `0`
    Private,
    /// Encoded as `1`
    Protected,
    /// Encoded as `2` (and the default when no marker is present)
    Public,
}

/// One struct or union field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field
{
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeSlot,
    /// Bit offset from the start of the aggregate; -1 for static members
    pub bitpos: i64,
    /// Bit width; 0 once normalized to "unpacked"
    pub bitsize: u64,
    /// Visibility marker
    pub visibility: Visibility,
    /// Linkage name, present only for static members
    pub physical_name: Option<String>,
}

/// One base class of a derived struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseClass
{
    /// The base type
    pub ty: TypeSlot,
    /// Virtual inheritance
    pub virtual_base: bool,
    /// Public inheritance
    pub public: bool,
    /// Offset of the base sub-object; nonzero offsets are not supported and
    /// arrive here clamped to zero
    pub offset: u64,
}

/// How one member function is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind
{
    /// Ordinary member function
    Plain,
    /// Static member function
    Static,
    /// Virtual member function with its vtable index
    Virtual
    {
        /// Index into the vtable
        index: i64,
    },
}

/// One overload within a method group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method
{
    /// The method's type (domain, return, arguments)
    pub ty: TypeSlot,
    /// Linkage name
    pub physical_name: String,
    /// Visibility marker
    pub visibility: Visibility,
    /// Dispatch kind
    pub kind: MethodKind,
}

/// All overloads sharing one method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodGroup
{
    /// Method name
    pub name: String,
    /// The overloads, in encoding order
    pub methods: Vec<Method>,
}

/// Shared payload of struct and union types.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructData
{
    /// Total size in bytes
    pub length: u64,
    /// Fields in declaration order
    pub fields: Vec<Field>,
    /// Base classes, if any
    pub base_classes: Vec<BaseClass>,
    /// Method groups, if any
    pub methods: Vec<MethodGroup>,
    /// The type declares a constructor
    pub has_constructor: bool,
    /// The type declares a destructor
    pub has_destructor: bool,
    /// Type holding the vtable pointer, when recorded
    pub vptr_base: Option<TypeSlot>,
}

/// A decoded type.
///
/// Nested references are always [`TypeSlot`] indices into the store, never
/// owned sub-values, so mutually recursive and forward-referenced types cost
/// nothing special.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type
{
    /// Referenced by number but not yet defined; the slot placeholder.
    Undefined,
    /// The void type
    Void,
    /// Integer of a given byte width and signedness
    Int
    {
        /// Width in bytes
        width: u8,
        /// Signedness
        signed: bool,
    },
    /// Floating type of a given byte width
    Float
    {
        /// Width in bytes
        width: u8,
    },
    /// Pointer
    Pointer
    {
        /// Pointed-to type
        to: TypeSlot,
    },
    /// C++ reference
    Reference
    {
        /// Referenced type
        to: TypeSlot,
    },
    /// Function returning a value
    Function
    {
        /// Return type
        returns: TypeSlot,
    },
    /// Array with explicit bounds
    Array
    {
        /// Element type
        element: TypeSlot,
        /// Lower index bound
        lower: i64,
        /// Upper index bound
        upper: i64,
        /// Total size in bytes
        length: u64,
    },
    /// Bounded subrange of a base type
    Range
    {
        /// The type this is a subrange of
        base: TypeSlot,
        /// Lower bound
        lower: i64,
        /// Upper bound
        upper: i64,
        /// Storage width in bytes
        width: u8,
    },
    /// Enumeration
    Enum
    {
        /// (name, value) pairs in declaration order
        constants: Vec<(String, i64)>,
    },
    /// Struct
    Struct
    {
        /// Fields, bases, methods
        data: StructData,
    },
    /// Union
    Union
    {
        /// Fields, bases, methods
        data: StructData,
    },
    /// Pointer-to-member
    Member
    {
        /// Containing class
        domain: TypeSlot,
        /// Member type
        to: TypeSlot,
    },
    /// Member function
    Method
    {
        /// Containing class
        domain: TypeSlot,
        /// Return type
        returns: TypeSlot,
        /// Argument types
        args: Vec<TypeSlot>,
    },
    /// Forward cross-reference to a named aggregate, awaiting its definition
    Stub
    {
        /// Bare name of the aggregate (no `struct `/`union `/`enum ` prefix)
        name: String,
        /// Which aggregate kind the reference named
        kind: AggregateKind,
    },
}

impl Type
{
    /// The aggregate kind this type would satisfy a cross-reference for.
    #[must_use]
    pub fn aggregate_kind(&self) -> Option<AggregateKind>
    {
        match self {
            Type::Struct { .. } => Some(AggregateKind::Struct),
            Type::Union { .. } => Some(AggregateKind::Union),
            Type::Enum { .. } => Some(AggregateKind::Enum),
            Type::Stub { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this is still a forward-reference placeholder.
    #[must_use]
    pub fn is_stub(&self) -> bool
    {
        matches!(self, Type::Stub { .. } | Type::Undefined)
    }
}
