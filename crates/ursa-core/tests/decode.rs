//! Tests for the type-encoding decoder, driven through the database.

use ursa_core::database::SymbolDatabase;
use ursa_core::records::{kind, RecordStreamBuilder, SliceRecordSource};
use ursa_core::symbols::{Namespace, StorageClass, SymbolValue};
use ursa_core::types::{AggregateKind, Type};
use ursa_core::UrsaError;

/// Load a single compilation whose local symbols are given as
/// (descriptor text, value) pairs.
fn load_locals(entries: &[(&str, i64)]) -> SymbolDatabase
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "types.c");
    for (text, value) in entries {
        builder.push(kind::LSYM, 0, *value, text);
    }
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("load");
    db.expand_file("types.c").expect("expand");
    db
}

fn typedef_slot(db: &mut SymbolDatabase, name: &str) -> ursa_core::types::TypeSlot
{
    let reference = db
        .lookup_symbol(name, None, Namespace::Var)
        .expect("lookup")
        .unwrap_or_else(|| panic!("typedef {name} not found"));
    db.symbol(reference).ty
}

#[test]
fn test_subrange_void()
{
    let mut db = load_locals(&[("v:t1=r1;0;0;", 0)]);
    let slot = typedef_slot(&mut db, "v");
    assert_eq!(slot, db.types().basic().void_type);
    assert_eq!(*db.types().get(slot), Type::Void);
}

#[test]
fn test_subrange_unsigned_int()
{
    let mut db = load_locals(&[("u:t1=r2;0;-1;", 0)]);
    let slot = typedef_slot(&mut db, "u");
    assert_eq!(slot, db.types().basic().unsigned_int);
}

#[test]
fn test_subrange_float_width_four()
{
    let mut db = load_locals(&[("f:t1=r2;4;0;", 0)]);
    let slot = typedef_slot(&mut db, "f");
    assert_eq!(slot, db.types().basic().float_type);
    assert_eq!(*db.types().get(slot), Type::Float { width: 4 });
}

#[test]
fn test_subrange_signed_char()
{
    let mut db = load_locals(&[("c:t1=r2;-128;127;", 0)]);
    let slot = typedef_slot(&mut db, "c");
    assert_eq!(slot, db.types().basic().char_type);
    assert_eq!(*db.types().get(slot), Type::Int { width: 1, signed: true });
}

#[test]
fn test_subrange_char_as_self_subrange()
{
    let mut db = load_locals(&[("c:t1=r1;0;127;", 0)]);
    assert_eq!(typedef_slot(&mut db, "c"), db.types().basic().char_type);
}

#[test]
fn test_subrange_int_definition()
{
    let mut db = load_locals(&[("int:t1=r1;-2147483648;2147483647;", 0)]);
    assert_eq!(typedef_slot(&mut db, "int"), db.types().basic().int_type);
}

#[test]
fn test_subrange_genuine_range()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("small:t2=r1;3;15;", 0),
    ]);
    let slot = typedef_slot(&mut db, "small");
    match db.types().get(slot) {
        Type::Range { lower, upper, width, .. } => {
            assert_eq!((*lower, *upper), (3, 15));
            assert_eq!(*width, 1);
        }
        other => panic!("expected range type, got {other:?}"),
    }
}

#[test]
fn test_self_subrange_with_odd_bounds_is_an_error()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "bad.c");
    builder.push(kind::LSYM, 0, 0, "b:t1=r1;1;10;");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("scan succeeds; the decode error surfaces at expansion");
    let error = db.expand_file("bad.c").unwrap_err();
    assert!(matches!(error, UrsaError::SelfSubrange { .. }));

    // The failed expansion leaves the file pending for a retry.
    let (expanded, pending) = db.list_source_files();
    assert!(expanded.is_empty());
    assert_eq!(pending, vec!["bad.c"]);
}

#[test]
fn test_struct_two_int_fields_unpacked()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("pair:T2=s8x:1,0,32;y:1,32,32;;", 0),
    ]);
    let reference = db
        .lookup_symbol("pair", None, Namespace::Struct)
        .expect("lookup")
        .expect("struct tag");
    let slot = db.symbol(reference).ty;
    match db.types().get(slot) {
        Type::Struct { data } => {
            assert_eq!(data.length, 8);
            assert_eq!(data.fields.len(), 2);
            assert_eq!(data.fields[0].name, "x");
            assert_eq!(data.fields[0].bitpos, 0);
            // 32 bits is exactly 8 * sizeof(int) at a byte-aligned
            // position: no packing information, bitsize cleared.
            assert_eq!(data.fields[0].bitsize, 0);
            assert_eq!(data.fields[1].name, "y");
            assert_eq!(data.fields[1].bitpos, 32);
            assert_eq!(data.fields[1].bitsize, 0);
        }
        other => panic!("expected struct, got {other:?}"),
    }
}

#[test]
fn test_struct_real_bitfield_keeps_width()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("flags:T2=s4a:1,0,3;b:1,3,5;;", 0),
    ]);
    let reference = db
        .lookup_symbol("flags", None, Namespace::Struct)
        .expect("lookup")
        .expect("struct tag");
    match db.types().get(db.symbol(reference).ty) {
        Type::Struct { data } => {
            assert_eq!(data.fields[0].bitsize, 3);
            assert_eq!(data.fields[1].bitsize, 5);
        }
        other => panic!("expected struct, got {other:?}"),
    }
}

#[test]
fn test_pointer_and_array()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("ip:t2=*1", 0),
        ("vec:t3=ar1;0;9;1", 0),
    ]);
    let pointer = typedef_slot(&mut db, "ip");
    match db.types().get(pointer) {
        Type::Pointer { to } => assert_eq!(*to, db.types().basic().int_type),
        other => panic!("expected pointer, got {other:?}"),
    }

    let array = typedef_slot(&mut db, "vec");
    match db.types().get(array) {
        Type::Array {
            element,
            lower,
            upper,
            length,
        } => {
            assert_eq!(*element, db.types().basic().int_type);
            assert_eq!((*lower, *upper), (0, 9));
            assert_eq!(*length, 40);
        }
        other => panic!("expected array, got {other:?}"),
    }
}

#[test]
fn test_enum_defines_type_and_constants()
{
    let mut db = load_locals(&[("color:T1=ered:0,green:1,blue:2,;", 0)]);

    let tag = db
        .lookup_symbol("color", None, Namespace::Struct)
        .expect("lookup")
        .expect("enum tag");
    match db.types().get(db.symbol(tag).ty) {
        Type::Enum { constants } => {
            assert_eq!(
                constants,
                &[
                    ("red".to_string(), 0),
                    ("green".to_string(), 1),
                    ("blue".to_string(), 2)
                ]
            );
        }
        other => panic!("expected enum, got {other:?}"),
    }

    // Each enumerator is also a file-scope constant symbol.
    let green = db
        .lookup_symbol("green", None, Namespace::Var)
        .expect("lookup")
        .expect("enumerator");
    let symbol = db.symbol(green);
    assert_eq!(symbol.class, StorageClass::Constant);
    assert_eq!(symbol.value, SymbolValue::Integer(1));
}

#[test]
fn test_cross_reference_resolves_in_place()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        // A pointer to `struct node` before the struct is defined.
        ("head:t2=*3=xsnode:", 0),
        ("node:T4=s4v:1,0,32;;", 0),
    ]);

    let head = typedef_slot(&mut db, "head");
    let target = match db.types().get(head) {
        Type::Pointer { to } => *to,
        other => panic!("expected pointer, got {other:?}"),
    };
    // The stub was overwritten in place with the real definition, so the
    // pointer target now shows the struct's fields.
    match db.types().get(target) {
        Type::Struct { data } => {
            assert_eq!(data.fields.len(), 1);
            assert_eq!(data.fields[0].name, "v");
        }
        other => panic!("stub not resolved: {other:?}"),
    }
}

#[test]
fn test_unresolved_cross_reference_stays_opaque()
{
    let mut db = load_locals(&[("mystery:t1=*2=xsnever_defined:", 0)]);
    let pointer = typedef_slot(&mut db, "mystery");
    let target = match db.types().get(pointer) {
        Type::Pointer { to } => *to,
        other => panic!("expected pointer, got {other:?}"),
    };
    match db.types().get(target) {
        Type::Stub { name, kind } => {
            assert_eq!(name, "never_defined");
            assert_eq!(*kind, AggregateKind::Struct);
        }
        other => panic!("expected opaque stub, got {other:?}"),
    }
}

#[test]
fn test_type_id_stability_across_forward_reference()
{
    // `p` captures type 5's slot before 5 is defined; the later definition
    // must fill that same slot, not allocate a new one.
    let mut db = load_locals(&[
        ("p:t2=*5", 0),
        ("c:t5=r5;0;127;", 0),
    ]);
    let pointer = typedef_slot(&mut db, "p");
    let early_slot = match db.types().get(pointer) {
        Type::Pointer { to } => *to,
        other => panic!("expected pointer, got {other:?}"),
    };
    let late_slot = typedef_slot(&mut db, "c");
    assert_eq!(*db.types().get(early_slot), Type::Int { width: 1, signed: true });
    assert_eq!(db.types().get(early_slot), db.types().get(late_slot));
}

#[test]
fn test_number_alias_shares_one_slot()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("myint:t2=1", 0),
    ]);
    assert_eq!(typedef_slot(&mut db, "myint"), db.types().basic().int_type);
}

#[test]
fn test_base_class_offset_clamped()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("Base:T2=s4x:1,0,32;;", 0),
        // Nonzero base-class offset (10) is unsupported; clamp, don't fail.
        ("Derived:T3=s8!1,0210,2;y:1,32,32;;", 0),
    ]);
    let derived = db
        .lookup_symbol("Derived", None, Namespace::Struct)
        .expect("lookup")
        .expect("struct tag");
    match db.types().get(db.symbol(derived).ty) {
        Type::Struct { data } => {
            assert_eq!(data.base_classes.len(), 1);
            let base = &data.base_classes[0];
            assert!(base.public);
            assert!(!base.virtual_base);
            assert_eq!(base.offset, 0);
        }
        other => panic!("expected struct, got {other:?}"),
    }
}

#[test]
fn test_method_list()
{
    let mut db = load_locals(&[
        ("int:t1=r1;-2147483648;2147483647;", 0),
        ("Obj:T9=s4x:1,0,32;m::#9,1;:m__3Obj;2.;;", 0),
    ]);
    let tag = db
        .lookup_symbol("Obj", None, Namespace::Struct)
        .expect("lookup")
        .expect("struct tag");
    match db.types().get(db.symbol(tag).ty) {
        Type::Struct { data } => {
            assert_eq!(data.fields.len(), 1);
            assert_eq!(data.methods.len(), 1);
            let group = &data.methods[0];
            assert_eq!(group.name, "m");
            assert_eq!(group.methods.len(), 1);
            assert_eq!(group.methods[0].physical_name, "m__3Obj");
            match db.types().get(group.methods[0].ty) {
                Type::Method { returns, args, .. } => {
                    assert_eq!(*returns, db.types().basic().int_type);
                    assert!(args.is_empty());
                }
                other => panic!("expected method type, got {other:?}"),
            }
        }
        other => panic!("expected struct, got {other:?}"),
    }
}

#[test]
fn test_unknown_type_code_is_an_error()
{
    let mut builder = RecordStreamBuilder::new();
    builder.push(kind::SO, 0, 0, "bad.c");
    builder.push(kind::LSYM, 0, 0, "z:t1=q5");
    let (records, strings) = builder.finish();

    let mut db = SymbolDatabase::new();
    db.load_program(Box::new(SliceRecordSource::new(records)), strings, Vec::new(), None)
        .expect("load");
    let error = db.expand_file("bad.c").unwrap_err();
    assert!(matches!(error, UrsaError::UnknownTypeCode { code: 'q', .. }));
}

#[test]
fn test_integer_constant_symbol()
{
    let mut db = load_locals(&[("answer:c=i42", 0)]);
    let reference = db
        .lookup_symbol("answer", None, Namespace::Var)
        .expect("lookup")
        .expect("constant");
    let symbol = db.symbol(reference);
    assert_eq!(symbol.class, StorageClass::Constant);
    assert_eq!(symbol.value, SymbolValue::Integer(42));
    assert_eq!(symbol.ty, db.types().basic().int_type);
}

#[test]
fn test_float_constant_symbol()
{
    let mut db = load_locals(&[("pi:c=r3.25", 0)]);
    let reference = db
        .lookup_symbol("pi", None, Namespace::Var)
        .expect("lookup")
        .expect("constant");
    let symbol = db.symbol(reference);
    assert_eq!(symbol.class, StorageClass::ConstantBytes);
    assert_eq!(symbol.value, SymbolValue::Bytes(3.25f64.to_le_bytes().to_vec()));
}
