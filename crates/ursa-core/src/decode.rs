//! # Stab Grammar Decoder
//!
//! Recursive-descent parser over the type/variable encoding text embedded in
//! each debug record's name field.
//!
//! A symbol's name field reads `NAME:D...`, where `D` is a descriptor
//! character saying what kind of definition follows. Type references are
//! either a bare number `N`, a parenthesised pair `(F,N)`, or (at a defining
//! position) `N=` followed by a type body. The parser owns an immutable
//! slice plus an explicit offset; every production advances the cursor and
//! returns a [`TypeSlot`].

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::error::{UrsaError, UrsaResult};
use crate::session::ScanSession;
use crate::symbols::{Namespace, StorageClass, Symbol, SymbolId, SymbolValue};
use crate::types::store::WORD_BYTES;
use crate::types::{AggregateKind, BaseClass, Field, Method, MethodGroup, MethodKind, StructData, Type, TypeId, TypeSlot, Visibility};

/// Set once the first time a nonzero base-class offset is seen; the
/// construct is approximated (offset clamped to zero) rather than rejected.
static BASECLASS_OFFSET_WARNED: OnceCell<()> = OnceCell::new();

/// Parser position over one record's encoding text.
pub(crate) struct Cursor<'a>
{
    text: &'a str,
    pos: usize,
    ordinal: u64,
}

impl<'a> Cursor<'a>
{
    pub(crate) fn new(text: &'a str, ordinal: u64) -> Self
    {
        Self { text, pos: 0, ordinal }
    }

    fn peek(&self) -> Option<u8>
    {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8>
    {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn retreat(&mut self)
    {
        self.pos = self.pos.saturating_sub(1);
    }

    fn expect(&mut self, byte: u8, what: &str) -> UrsaResult<()>
    {
        if self.bump() == Some(byte) {
            Ok(())
        } else {
            Err(self.malformed(what))
        }
    }

    fn malformed(&self, detail: &str) -> UrsaError
    {
        UrsaError::MalformedType {
            detail: detail.to_string(),
            ordinal: self.ordinal,
        }
    }

    /// Consume up to and including `delim`, returning the text before it.
    fn take_until(&mut self, delim: u8) -> UrsaResult<&'a str>
    {
        let rest = &self.text.as_bytes()[self.pos..];
        match rest.iter().position(|&b| b == delim) {
            Some(offset) => {
                let piece = &self.text[self.pos..self.pos + offset];
                self.pos += offset + 1;
                Ok(piece)
            }
            None => Err(self.malformed("unterminated token")),
        }
    }

    /// Read a decimal number with optional leading minus.
    ///
    /// With `end` given, the character after the digits must be `end` (it is
    /// consumed) or the end of the text. Without it the cursor is left on
    /// the first non-digit.
    fn read_number(&mut self, end: Option<u8>) -> UrsaResult<i64>
    {
        let mut sign = 1i64;
        if self.peek() == Some(b'-') {
            sign = -1;
            self.pos += 1;
        }
        let mut n = 0i64;
        while let Some(b @ b'0'..=b'9') = self.peek() {
            n = n.wrapping_mul(10).wrapping_add(i64::from(b - b'0'));
            self.pos += 1;
        }
        if let Some(end) = end {
            match self.peek() {
                None => {}
                Some(b) if b == end => {
                    self.pos += 1;
                }
                Some(b) => {
                    return Err(self.malformed(&format!("invalid character `{}` after number", b as char)));
                }
            }
        }
        Ok(n.wrapping_mul(sign))
    }

    fn rest(&self) -> &'a str
    {
        &self.text[self.pos..]
    }
}

/// Read a type-number: either a bare integer or a `(file,index)` pair.
fn read_type_number(cur: &mut Cursor<'_>) -> UrsaResult<TypeId>
{
    if cur.peek() == Some(b'(') {
        cur.pos += 1;
        let file = cur.read_number(Some(b','))?;
        let local = cur.read_number(Some(b')'))?;
        let file = u32::try_from(file).map_err(|_| cur.malformed("negative header-file number"))?;
        Ok(TypeId::new(file, local as i32))
    } else {
        let local = cur.read_number(None)?;
        Ok(TypeId::new(0, local as i32))
    }
}

/// Enter `content` under `id` (mutating the id's placeholder slot if one
/// exists), or allocate an anonymous slot when there is no id.
fn define(sess: &mut ScanSession<'_>, id: Option<TypeId>, content: Type, ordinal: u64) -> UrsaResult<TypeSlot>
{
    match id {
        Some(id) => {
            let slot = sess.reserve_type(id, ordinal)?;
            sess.store.set(slot, content);
            Ok(slot)
        }
        None => Ok(sess.store.alloc(content)),
    }
}

/// Make `id` refer to `target`'s slot.
///
/// When the id was already forward-referenced it owns a placeholder slot
/// that other holders may have captured; that slot is filled with a copy of
/// the target's content instead of being abandoned, so every holder resolves
/// to the same structural definition.
fn alias(sess: &mut ScanSession<'_>, id: Option<TypeId>, target: TypeSlot, ordinal: u64) -> UrsaResult<TypeSlot>
{
    let Some(id) = id else { return Ok(target) };
    match sess.lookup_type(id, ordinal)? {
        None => {
            sess.assign_type(id, target, ordinal)?;
            Ok(target)
        }
        Some(existing) if existing == target => Ok(target),
        Some(existing) => {
            let content = sess.store.get(target).clone();
            sess.store.set(existing, content);
            Ok(existing)
        }
    }
}

/// Decode one symbol definition: `NAME:D...` with record value `value`.
///
/// Returns the new symbol's id, or `None` for records that carry no
/// definition (empty names, no descriptor).
pub(crate) fn define_symbol(sess: &mut ScanSession<'_>, value: i64, text: &str, ordinal: u64) -> UrsaResult<Option<SymbolId>>
{
    if text.is_empty() {
        return Ok(None);
    }
    let Some((name, rest)) = text.split_once(':') else {
        return Ok(None);
    };
    let name = name.to_string();
    let mut cur = Cursor::new(rest, ordinal);

    let deftype = match cur.peek() {
        Some(b) if b.is_ascii_digit() || b == b'(' => b'l',
        Some(b) => {
            cur.pos += 1;
            b
        }
        None => return Ok(None),
    };

    // Constants are special: no type number follows, the value is in the
    // text itself.
    if deftype == b'c' {
        return define_constant(sess, name, &mut cur, ordinal).map(Some);
    }

    let ty = if deftype == b'p' && cur.peek() == Some(b'F') {
        // Fortran function parameter: the type number gives the return
        // value; express it as pointer-to-function.
        cur.pos += 1;
        let returns = read_type(sess, &mut cur)?;
        let function = sess.store.alloc(Type::Function { returns });
        sess.store.alloc(Type::Pointer { to: function })
    } else {
        let ty = read_type(sess, &mut cur)?;
        if matches!(deftype, b'f' | b'F') && !matches!(sess.store.get(ty), Type::Function { .. }) {
            sess.store.alloc(Type::Function { returns: ty })
        } else {
            ty
        }
    };

    let symbol = match deftype {
        b'f' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Block,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.file_symbols.push(id);
            id
        }

        b'F' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Block,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.global_symbols.push(id);
            // Global functions carry a compiler-relative value; the linker
            // fixup pass rebases the finished block.
            sess.pending_externs.push(id);
            id
        }

        b'G' => {
            // The recorded value is not the address; the linker definition
            // supplies it after expansion.
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::External,
                ty,
                value: SymbolValue::Unresolved,
            });
            sess.global_symbols.push(id);
            sess.pending_externs.push(id);
            id
        }

        b'l' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Local,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.local_symbols.push(id);
            id
        }

        b'p' => {
            let ty = promote_argument(sess, ty);
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Argument,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.local_symbols.push(id);
            id
        }

        b'P' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::RegisterParam,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.local_symbols.push(id);
            id
        }

        b'r' => {
            // A register record immediately following a parameter of the
            // same name is that parameter living in a register, not a
            // second symbol.
            if let Some(&last) = sess.local_symbols.last() {
                let matches_param = {
                    let prev = &sess.symbols[last];
                    prev.class == StorageClass::Argument && prev.name == name
                };
                if matches_param {
                    let prev = &mut sess.symbols[last];
                    prev.class = StorageClass::RegisterParam;
                    prev.value = SymbolValue::Integer(value);
                    return Ok(Some(last));
                }
            }
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Register,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.local_symbols.push(id);
            id
        }

        b'S' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Static,
                ty,
                value: SymbolValue::Address(value as u64),
            });
            sess.file_symbols.push(id);
            id
        }

        b't' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Typedef,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.file_symbols.push(id);
            id
        }

        b'T' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Struct,
                class: StorageClass::Typedef,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.file_symbols.push(id);
            id
        }

        b'V' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Static,
                ty,
                value: SymbolValue::Address(value as u64),
            });
            sess.local_symbols.push(id);
            id
        }

        b'v' => {
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::RefArgument,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.local_symbols.push(id);
            id
        }

        b'X' => {
            // Sun Fortran "function result value"; a local as far as the
            // rest of the debugger cares.
            let id = sess.symbols.alloc(Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Local,
                ty,
                value: SymbolValue::Integer(value),
            });
            sess.local_symbols.push(id);
            id
        }

        other => {
            return Err(UrsaError::UnknownDescriptor {
                descriptor: other as char,
                ordinal,
            });
        }
    };

    Ok(Some(symbol))
}

/// `NAME:c=iVALUE`, `NAME:c=rVALUE`, or `NAME:c=eTYPE,VALUE`.
fn define_constant(sess: &mut ScanSession<'_>, name: String, cur: &mut Cursor<'_>, ordinal: u64) -> UrsaResult<SymbolId>
{
    cur.expect(b'=', "constant symbol without `=`")?;
    let basic = sess.store.basic();
    let symbol = match cur.bump() {
        Some(b'i') => Symbol {
            name,
            namespace: Namespace::Var,
            class: StorageClass::Constant,
            ty: basic.int_type,
            value: SymbolValue::Integer(cur.read_number(None)?),
        },
        Some(b'r') => {
            let text = cur.rest();
            let end = text
                .bytes()
                .position(|b| !(b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E')))
                .unwrap_or(text.len());
            let value: f64 = text[..end].parse().map_err(|_| cur.malformed("bad floating constant"))?;
            cur.pos += end;
            Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::ConstantBytes,
                ty: basic.double_type,
                value: SymbolValue::Bytes(value.to_le_bytes().to_vec()),
            }
        }
        Some(b'e') => {
            let id = read_type_number(cur)?;
            cur.expect(b',', "no comma in enum constant symbol")?;
            let ty = sess.reserve_type(id, ordinal)?;
            Symbol {
                name,
                namespace: Namespace::Var,
                class: StorageClass::Constant,
                ty,
                value: SymbolValue::Integer(cur.read_number(None)?),
            }
        }
        _ => return Err(cur.malformed("unknown constant kind")),
    };
    let id = sess.symbols.alloc(symbol);
    sess.file_symbols.push(id);
    Ok(id)
}

/// Widen `char`/`short` parameters to `int` width under the promoting
/// calling convention. Applied exactly once, at symbol-construction time.
fn promote_argument(sess: &ScanSession<'_>, ty: TypeSlot) -> TypeSlot
{
    if !sess.promote_narrow_args {
        return ty;
    }
    let basic = sess.store.basic();
    match sess.store.get(ty) {
        Type::Int { width, signed } if *width < WORD_BYTES => {
            if *signed {
                basic.int_type
            } else {
                basic.unsigned_int
            }
        }
        _ => ty,
    }
}

/// Read a type reference or definition and return the slot it denotes.
pub(crate) fn read_type(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>) -> UrsaResult<TypeSlot>
{
    let ordinal = cur.ordinal;

    // A leading number may reference an existing type or, followed by `=`,
    // open a definition. No number means an anonymous definition.
    let id = match cur.peek() {
        Some(b) if b.is_ascii_digit() || b == b'(' => {
            let id = read_type_number(cur)?;
            if cur.peek() != Some(b'=') {
                return sess.reserve_type(id, ordinal);
            }
            cur.pos += 1;
            Some(id)
        }
        _ => None,
    };

    let code = cur.bump().ok_or_else(|| cur.malformed("truncated type definition"))?;
    match code {
        b'x' => {
            let kind = match cur.bump() {
                Some(b's') => AggregateKind::Struct,
                Some(b'u') => AggregateKind::Union,
                Some(b'e') => AggregateKind::Enum,
                _ => return Err(cur.malformed("bad type cross reference")),
            };
            let name = cur.take_until(b':')?;
            // The aggregate may already be declared in this file; share it.
            if let Some(existing) = sess.find_struct_type(kind, name, true) {
                return alias(sess, id, existing, ordinal);
            }
            let slot = define(
                sess,
                id,
                Type::Stub {
                    name: name.to_string(),
                    kind,
                },
                ordinal,
            )?;
            sess.undefined_types.push(slot);
            Ok(slot)
        }

        b'0'..=b'9' | b'(' => {
            // `N=M`: the definition is another number; both share one slot.
            cur.retreat();
            let reference = read_type_number(cur)?;
            let target = match sess.lookup_type(reference, ordinal)? {
                Some(slot) => slot,
                None => sess.store.basic().void_type,
            };
            alias(sess, id, target, ordinal)
        }

        b'*' => {
            let to = read_type(sess, cur)?;
            define(sess, id, Type::Pointer { to }, ordinal)
        }

        b'&' => {
            let to = read_type(sess, cur)?;
            define(sess, id, Type::Reference { to }, ordinal)
        }

        b'@' => {
            let domain = read_type(sess, cur)?;
            cur.expect(b',', "invalid member type format")?;
            let to = read_type(sess, cur)?;
            define(sess, id, Type::Member { domain, to }, ordinal)
        }

        b'#' => {
            let domain = read_type(sess, cur)?;
            cur.expect(b',', "invalid method type format")?;
            let returns = read_type(sess, cur)?;
            let args = read_args(sess, cur, b';')?;
            define(sess, id, Type::Method { domain, returns, args }, ordinal)
        }

        b'f' => {
            let returns = read_type(sess, cur)?;
            define(sess, id, Type::Function { returns }, ordinal)
        }

        b'r' => read_range_type(sess, cur, id),

        b'e' => read_enum_type(sess, cur, id),

        b's' => read_struct_type(sess, cur, id, false),

        b'u' => read_struct_type(sess, cur, id, true),

        b'a' => {
            if cur.bump() != Some(b'r') {
                return Err(UrsaError::UnknownTypeCode { code: 'a', ordinal });
            }
            read_array_type(sess, cur, id)
        }

        other => Err(UrsaError::UnknownTypeCode {
            code: other as char,
            ordinal,
        }),
    }
}

/// Argument list: `,T,T,...` terminated by `end` (consumed).
fn read_args(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, end: u8) -> UrsaResult<Vec<TypeSlot>>
{
    let mut args = Vec::new();
    while cur.peek() != Some(end) {
        cur.expect(b',', "no `,` in argument list")?;
        args.push(read_type(sess, cur)?);
    }
    cur.pos += 1;
    Ok(args)
}

/// `rT;L;U;`: subrange of T with bounds L,U.
///
/// The bound pairs carry a historical overloading that must be reproduced
/// exactly; only the fall-through case allocates a genuine range type.
fn read_range_type(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, id: Option<TypeId>) -> UrsaResult<TypeSlot>
{
    let ordinal = cur.ordinal;
    let base_id = read_type_number(cur)?;
    let self_subrange = id == Some(base_id);

    if cur.peek() == Some(b';') {
        cur.pos += 1;
    }
    let lower = cur.read_number(Some(b';'))?;
    let upper = cur.read_number(Some(b';'))?;

    let basic = sess.store.basic();

    // A subrange of itself with bounds (0,0) is the void type.
    if self_subrange && lower == 0 && upper == 0 {
        return alias(sess, id, basic.void_type, ordinal);
    }

    // Upper bound zero with positive lower bound: a floating type whose
    // width in bytes is the lower bound.
    if upper == 0 && lower > 0 {
        let float = if lower == 4 { basic.float_type } else { basic.double_type };
        return alias(sess, id, float, ordinal);
    }

    // Upper bound -1: unsigned int-width integer.
    if lower == 0 && upper == -1 {
        return alias(sess, id, basic.unsigned_int, ordinal);
    }

    // char is historically encoded as a subrange of itself over 0..127.
    if self_subrange && lower == 0 && upper == 127 {
        return alias(sess, id, basic.char_type, ordinal);
    }

    let base_is_int = !self_subrange && sess.lookup_type(base_id, ordinal)? == Some(basic.int_type);

    if lower == 0 && (self_subrange || base_is_int) {
        let unsigned = match upper {
            0xff => Some(basic.unsigned_char),
            0xffff => Some(basic.unsigned_short),
            0xffff_ffff => Some(basic.unsigned_int),
            _ => None,
        };
        if let Some(slot) = unsigned {
            return alias(sess, id, slot, ordinal);
        }
    }

    if lower == -upper - 1 {
        let signed = match upper {
            0x7fff_ffff => Some(basic.int_type),
            0x7fff => Some(basic.short_type),
            0x7f => Some(basic.char_type),
            _ => None,
        };
        if let Some(slot) = signed {
            return alias(sess, id, slot, ordinal);
        }
    }

    // A self-subrange with any other bound pair is not something compilers
    // emit; flag it rather than guessing.
    if self_subrange {
        return Err(UrsaError::SelfSubrange { ordinal });
    }

    let base = sess.reserve_type(base_id, ordinal)?;
    let width = if i8::try_from(lower).is_ok() && i8::try_from(upper).is_ok() {
        1
    } else if i16::try_from(lower).is_ok() && i16::try_from(upper).is_ok() {
        2
    } else if i32::try_from(lower).is_ok() && i32::try_from(upper).is_ok() {
        4
    } else {
        8
    };
    define(
        sess,
        id,
        Type::Range {
            base,
            lower,
            upper,
            width,
        },
        ordinal,
    )
}

/// `eNAME:VALUE,NAME:VALUE,...;`: also defines one constant symbol per
/// enumerator in the current scope.
fn read_enum_type(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, id: Option<TypeId>) -> UrsaResult<TypeSlot>
{
    let ordinal = cur.ordinal;
    let slot = match id {
        Some(id) => sess.reserve_type(id, ordinal)?,
        None => sess.store.alloc(Type::Undefined),
    };

    let mut constants = Vec::new();
    loop {
        match cur.peek() {
            None | Some(b';' | b',') => break,
            _ => {}
        }
        let name = cur.take_until(b':')?.to_string();
        let value = cur.read_number(Some(b','))?;
        let symbol = sess.symbols.alloc(Symbol {
            name: name.clone(),
            namespace: Namespace::Var,
            class: StorageClass::Constant,
            ty: slot,
            value: SymbolValue::Integer(value),
        });
        if sess.within_function {
            sess.local_symbols.push(symbol);
        } else {
            sess.file_symbols.push(symbol);
        }
        constants.push((name, value));
    }
    if cur.peek() == Some(b';') {
        cur.pos += 1;
    }

    sess.store.set(slot, Type::Enum { constants });
    Ok(slot)
}

/// `sLEN...` / `uLEN...`: byte length, optional base classes, fields,
/// optional method lists, optional `~` trailer.
fn read_struct_type(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, id: Option<TypeId>, union: bool) -> UrsaResult<TypeSlot>
{
    let ordinal = cur.ordinal;
    // Reserve the slot first so self-referential members resolve to it.
    let slot = match id {
        Some(id) => sess.reserve_type(id, ordinal)?,
        None => sess.store.alloc(Type::Undefined),
    };

    let mut data = StructData {
        length: cur.read_number(None)?.max(0) as u64,
        ..StructData::default()
    };

    if cur.peek() == Some(b'!') {
        cur.pos += 1;
        read_base_classes(sess, cur, &mut data)?;
    }

    let mut method_name: Option<String> = None;
    loop {
        match cur.peek() {
            Some(b';') => {
                cur.pos += 1;
                break;
            }
            None => return Err(cur.malformed("unterminated structure type")),
            _ => {}
        }

        let name = cur.take_until(b':')?.to_string();
        if cur.peek() == Some(b':') {
            // `NAME::` switches to the method-list sub-grammar.
            cur.pos += 1;
            method_name = Some(name);
            break;
        }

        let visibility = read_visibility_marker(cur)?;
        let ty = read_type(sess, cur)?;

        if cur.peek() == Some(b':') {
            // Static member: `NAME:TYPE:PHYSNAME;`
            cur.pos += 1;
            let physical = cur.take_until(b';')?.to_string();
            data.fields.push(Field {
                name,
                ty,
                bitpos: -1,
                bitsize: 0,
                visibility,
                physical_name: Some(physical),
            });
            continue;
        }

        cur.expect(b',', "bad structure-type format")?;
        let bitpos = cur.read_number(Some(b','))?;
        let bitsize = cur.read_number(Some(b';'))?.max(0) as u64;
        let bitsize = normalize_bitsize(sess, ty, bitpos, bitsize);
        data.fields.push(Field {
            name,
            ty,
            bitpos,
            bitsize,
            visibility,
            physical_name: None,
        });
    }

    if let Some(first) = method_name {
        read_method_lists(sess, cur, &mut data, first)?;
    }

    if cur.peek() == Some(b'~') {
        cur.pos += 1;
        read_special_trailer(sess, cur, &mut data)?;
    }

    let content = if union { Type::Union { data } } else { Type::Struct { data } };
    sess.store.set(slot, content);
    Ok(slot)
}

/// `!N,` then N entries of `VIRTUAL PUBLIC OFFSET,TYPE;`.
fn read_base_classes(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, data: &mut StructData) -> UrsaResult<()>
{
    let count = cur.read_number(Some(b','))?;
    for _ in 0..count {
        let virtual_base = match cur.bump() {
            Some(b'0') => false,
            Some(b'1') => true,
            _ => return Err(cur.malformed("bad visibility format in base class")),
        };
        let public = match cur.bump() {
            Some(b'0') => false,
            Some(b'2') => true,
            _ => return Err(cur.malformed("bad visibility format in base class")),
        };
        let offset = cur.read_number(Some(b','))?;
        let ty = read_type(sess, cur)?;
        cur.expect(b';', "unterminated base class")?;

        if offset != 0 && BASECLASS_OFFSET_WARNED.set(()).is_ok() {
            warn!("nonzero base-class offsets are not supported; multiple inheritance layouts will be approximate");
        }

        // A base class may itself still be a forward reference; queue it for
        // the end-of-file resolution pass along with the other stubs.
        if sess.store.get(ty).is_stub() {
            sess.undefined_types.push(ty);
        }

        data.base_classes.push(BaseClass {
            ty,
            virtual_base,
            public,
            offset: 0,
        });
    }
    Ok(())
}

/// Optional `/D` visibility prefix before a field's type.
fn read_visibility_marker(cur: &mut Cursor<'_>) -> UrsaResult<Visibility>
{
    if cur.peek() != Some(b'/') {
        return Ok(Visibility::Public);
    }
    cur.pos += 1;
    match cur.bump() {
        Some(b'0') => Ok(Visibility::Private),
        Some(b'1') => Ok(Visibility::Protected),
        Some(b'2') => Ok(Visibility::Public),
        _ => Err(cur.malformed("bad field visibility marker")),
    }
}

/// A bitsize equal to the field type's full width at a byte-aligned
/// position carries no packing information; clear it. Non-integral fields
/// never carry a real bitsize.
fn normalize_bitsize(sess: &ScanSession<'_>, ty: TypeSlot, bitpos: i64, bitsize: u64) -> u64
{
    let content = sess.store.get(ty);
    let is_int = matches!(content, Type::Int { .. } | Type::Range { .. });
    let is_enum = matches!(content, Type::Enum { .. });
    if !is_int && !is_enum {
        return 0;
    }
    let full_width = if is_enum {
        u64::from(WORD_BYTES) * 8
    } else {
        sess.store.length_of(ty) * 8
    };
    if bitsize == full_width && bitpos % 8 == 0 {
        return 0;
    }
    bitsize
}

/// Method groups: `NAME::` then repeated `TYPE:PHYSNAME;VIS CTRL`, each
/// group ended by `;`, the whole list ended by a bare `;`.
fn read_method_lists(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, data: &mut StructData, first: String) -> UrsaResult<()>
{
    let mut name = first;
    loop {
        let mut methods = Vec::new();
        loop {
            let ty = read_type(sess, cur)?;
            cur.expect(b':', "missing physical name in method")?;
            let physical_name = cur.take_until(b';')?.to_string();
            let visibility = match cur.bump() {
                Some(b'0') => Visibility::Private,
                Some(b'1') => Visibility::Protected,
                Some(b'2') => Visibility::Public,
                _ => return Err(cur.malformed("bad method visibility")),
            };
            let kind = match cur.bump() {
                Some(b'*') => MethodKind::Virtual {
                    index: cur.read_number(Some(b';'))?,
                },
                Some(b'?') => MethodKind::Static,
                Some(b'.') => MethodKind::Plain,
                _ => return Err(cur.malformed("bad method control character")),
            };
            methods.push(Method {
                ty,
                physical_name,
                visibility,
                kind,
            });
            if cur.peek() == Some(b';') {
                cur.pos += 1;
                break;
            }
        }
        data.methods.push(MethodGroup { name, methods });

        if cur.peek() == Some(b';') {
            cur.pos += 1;
            return Ok(());
        }
        name = cur.take_until(b':')?.to_string();
        cur.expect(b':', "malformed method group name")?;
    }
}

/// `~` trailer: constructor/destructor flags and the vtable-pointer base.
fn read_special_trailer(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, data: &mut StructData) -> UrsaResult<()>
{
    match cur.peek() {
        Some(b'=') => {
            data.has_constructor = true;
            data.has_destructor = true;
            cur.pos += 1;
        }
        Some(b'+') => {
            data.has_constructor = true;
            cur.pos += 1;
        }
        Some(b'-') => {
            data.has_destructor = true;
            cur.pos += 1;
        }
        _ => {}
    }

    match cur.bump() {
        Some(b'%') => {
            let ty = read_type(sess, cur)?;
            // The vtable-pointer field name follows; only the base type
            // matters here.
            cur.take_until(b';')?;
            data.vptr_base = Some(ty);
            Ok(())
        }
        Some(b';') => Ok(()),
        _ => Err(cur.malformed("bad destructor/vtable trailer")),
    }
}

/// `arT;L;U;E`: array with index type T bounded L..U of element type E.
fn read_array_type(sess: &mut ScanSession<'_>, cur: &mut Cursor<'_>, id: Option<TypeId>) -> UrsaResult<TypeSlot>
{
    let ordinal = cur.ordinal;
    let _index_type = read_type(sess, cur)?;
    cur.expect(b';', "improper format of array type")?;

    // Adjustable (Fortran) bounds are marked with a letter; such arrays
    // decode with an empty 0..-1 range.
    let mut adjustable = false;
    if !matches!(cur.peek(), Some(b'0'..=b'9')) {
        cur.pos += 1;
        adjustable = true;
    }
    let lower = cur.read_number(Some(b';'))?;
    if !matches!(cur.peek(), Some(b'0'..=b'9')) {
        cur.pos += 1;
        adjustable = true;
    }
    let upper = cur.read_number(Some(b';'))?;

    let element = read_type(sess, cur)?;

    let (lower, upper) = if adjustable { (0, -1) } else { (lower, upper) };
    let count = (upper - lower + 1).max(0) as u64;
    let length = count.saturating_mul(sess.store.length_of(element));

    define(
        sess,
        id,
        Type::Array {
            element,
            lower,
            upper,
            length,
        },
        ordinal,
    )
}
