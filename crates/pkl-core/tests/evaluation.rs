//! End-to-end evaluator scenarios built directly from hand-assembled IR (the parser front-end
//! is out of scope, §1), exercising the testable properties: determinism, insertion-order
//! preservation, memoization idempotence, the amend-super law, and the arithmetic-overflow
//! trap; plus upward import resolution through the public loader API.

use std::fs;

use pkl_core::{
    build_object, force, BinOp, CodeRange, ErrorKind, EvalContext, Expr, Interner, Literal, Member, MemberBody, MemberKey, Modifiers,
    ModuleLoader, NoLimitTracker, NullTracer, ObjectData, ObjectBodyNode, ObjectKind, ReadTarget, SecurityManager, StringId, Uri, Value,
};

fn const_member(name_id: StringId, name: &str, value: i64) -> Member {
    Member {
        range: CodeRange::default(),
        modifiers: Modifiers::empty(),
        name: name_id,
        qualified_name: name.to_string(),
        type_annotation: None,
        body: MemberBody::Constant(Literal::Int(value)),
    }
}

#[test]
fn evaluating_the_same_body_twice_produces_structurally_equal_objects() {
    let mut interner = Interner::new();
    let a_id = interner.intern("a");
    let b_id = interner.intern("b");

    let body = ObjectBodyNode::PropertiesOnly {
        properties: vec![const_member(a_id, "a", 1), const_member(b_id, "b", 2)],
    };

    let mut resources = NoLimitTracker;
    let mut tracer = NullTracer;
    let mut ctx = EvalContext { resources: &mut resources, tracer: &mut tracer, interner: &interner, depth: 0 };

    let root = ObjectData::new_root(ObjectKind::Dynamic, None);
    let first = build_object(ObjectKind::Dynamic, None, Some(&root), &body, &mut ctx).unwrap();
    let second = build_object(ObjectKind::Dynamic, None, Some(&root), &body, &mut ctx).unwrap();

    // Two independently-built objects from the same body are never `==` (object identity),
    // but forcing the same property on each must agree.
    let Value::Object(first_obj) = first else { panic!("expected object") };
    let Value::Object(second_obj) = second else { panic!("expected object") };
    let a_first = force(&first_obj, &MemberKey::Property(a_id), &mut ctx).unwrap();
    let a_second = force(&second_obj, &MemberKey::Property(a_id), &mut ctx).unwrap();
    assert!(a_first.structural_eq(&a_second));
}

#[test]
fn amending_an_object_preserves_insertion_order_and_lets_super_read_through() {
    let mut interner = Interner::new();
    let name_id = interner.intern("name");
    let age_id = interner.intern("age");
    let city_id = interner.intern("city");

    let mut resources = NoLimitTracker;
    let mut tracer = NullTracer;
    let mut ctx = EvalContext { resources: &mut resources, tracer: &mut tracer, interner: &interner, depth: 0 };

    let parent_body = ObjectBodyNode::PropertiesOnly {
        properties: vec![const_member(name_id, "name", 0), const_member(age_id, "age", 30)],
    };
    let Value::Object(parent) = build_object(ObjectKind::Dynamic, None, None, &parent_body, &mut ctx).unwrap() else {
        panic!("expected object")
    };

    let super_read = Expr::PropertyRead { target: ReadTarget::Super, name: name_id, range: CodeRange::default() };
    let child_name = Member {
        range: CodeRange::default(),
        modifiers: Modifiers::empty(),
        name: name_id,
        qualified_name: "name".to_string(),
        type_annotation: None,
        body: MemberBody::Expr(Box::new(super_read)),
    };
    let child_body = ObjectBodyNode::PropertiesOnly {
        properties: vec![child_name, const_member(city_id, "city", 7)],
    };
    let Value::Object(child) =
        build_object(ObjectKind::Dynamic, Some(&parent), Some(&parent), &child_body, &mut ctx).unwrap()
    else {
        panic!("expected object")
    };

    let names: Vec<String> = child.members.borrow().values().map(|slot| slot.def.member.qualified_name.clone()).collect();
    assert_eq!(names, vec!["name", "age", "city"]);

    let forced_name = force(&child, &MemberKey::Property(name_id), &mut ctx).unwrap();
    assert!(matches!(forced_name, Value::Int(0)));
}

#[test]
fn forcing_the_same_member_twice_returns_the_memoized_value() {
    let mut interner = Interner::new();
    let x_id = interner.intern("x");

    let mut resources = NoLimitTracker;
    let mut tracer = NullTracer;
    let mut ctx = EvalContext { resources: &mut resources, tracer: &mut tracer, interner: &interner, depth: 0 };

    let root = ObjectData::new_root(ObjectKind::Dynamic, None);
    let body = ObjectBodyNode::PropertiesOnly { properties: vec![const_member(x_id, "x", 1)] };
    let Value::Object(obj) = build_object(ObjectKind::Dynamic, None, Some(&root), &body, &mut ctx).unwrap() else {
        panic!("expected object")
    };

    let first = force(&obj, &MemberKey::Property(x_id), &mut ctx).unwrap();
    let second = force(&obj, &MemberKey::Property(x_id), &mut ctx).unwrap();
    assert!(first.structural_eq(&second));
}

#[test]
fn integer_overflow_traps_instead_of_wrapping() {
    let mut interner = Interner::new();
    let overflowed_id = interner.intern("overflowed");

    let mut resources = NoLimitTracker;
    let mut tracer = NullTracer;
    let mut ctx = EvalContext { resources: &mut resources, tracer: &mut tracer, interner: &interner, depth: 0 };

    let max_member = Member {
        range: CodeRange::default(),
        modifiers: Modifiers::empty(),
        name: overflowed_id,
        qualified_name: "overflowed".to_string(),
        type_annotation: None,
        body: MemberBody::Expr(Box::new(Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::Literal(Literal::Int(i64::MAX), CodeRange::default())),
            rhs: Box::new(Expr::Literal(Literal::Int(1), CodeRange::default())),
            range: CodeRange::default(),
        })),
    };
    let body = ObjectBodyNode::PropertiesOnly { properties: vec![max_member] };
    let root = ObjectData::new_root(ObjectKind::Dynamic, None);
    let Value::Object(obj) = build_object(ObjectKind::Dynamic, None, Some(&root), &body, &mut ctx).unwrap() else {
        panic!("expected object")
    };

    let err = force(&obj, &MemberKey::Property(overflowed_id), &mut ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arithmetic);
}

#[test]
fn upward_search_resolves_an_import_above_the_referrer() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();
    fs::write(dir.path().join("a").join("shared.pkl"), "x = 1").unwrap();
    fs::write(nested.join("main.pkl"), "amends \"...shared.pkl\"").unwrap();

    let loader = ModuleLoader::new(SecurityManager::new()).root_dir(dir.path().to_path_buf());
    let referrer = Uri::parse(&format!("file://{}", nested.join("main.pkl").display())).unwrap();
    let resolved = loader.resolve_upward(&referrer, "shared.pkl").unwrap();
    assert_eq!(resolved.to_file_path(), dir.path().join("a").join("shared.pkl"));
}
