//! The lazy, memoized, amend-aware object-evaluation engine (§4.4, §4.5, §4.6) — the largest
//! single subsystem per the component-share table in `SPEC_FULL.md` §2.
//!
//! Grounded on the teacher's force/memoize loop (its `Value`/`Object` forcing dispatch) and on
//! its namespace/frame closure model (`src/frame.rs`, `src/symtab.rs`) for how a member body's
//! `(receiver, owner, memberKey)` triple becomes a concrete evaluation frame (§4.5).

use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::ast::{BinOp, Expr, GeneratorMember, Literal, MemberBody, ObjectBodyNode, ReadTarget, StringPart, TypeNode, UnOp};
use crate::error::{ErrorKind, PklError};
use crate::frame::FrameInstance;
use crate::function::FunctionValue;
use crate::intern::{Interner, StringId};
use crate::resource::ResourceTracker;
use crate::symtab::SlotId;
use crate::tracer::{VmEvent, VmTracer};
use crate::value::{MemberDef, MemberKey, MemberSlot, ObjectData, ObjectKind, Value, ValueKey};

/// Everything a single force/evaluation call needs threaded through it: the resource tracker
/// (§4.6 depth/timeout), the tracer (§10), the interner (for resolving `StringId`s back to
/// text when building diagnostics), and the current call depth.
pub struct EvalContext<'a> {
    pub resources: &'a mut dyn ResourceTracker,
    pub tracer: &'a mut dyn VmTracer,
    pub interner: &'a Interner,
    pub depth: usize,
}

impl<'a> EvalContext<'a> {
    fn enter(&mut self) -> Result<(), PklError> {
        self.resources.check_depth(self.depth)?;
        self.resources.check_time()?;
        self.depth += 1;
        Ok(())
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }
}

/// The `(receiver, owner, memberKey)` triple a member body is invoked with (§4.5).
struct Activation {
    receiver: Rc<ObjectData>,
    owner: Rc<ObjectData>,
    current_def: Rc<MemberDef>,
    frame: Option<Rc<FrameInstance>>,
}

/// Forces `key` on `receiver`: returns the memoized value if present, otherwise evaluates the
/// member's body and memoizes the result (§4.5 "Force", §8 property 3 "Memoization idempotence").
pub fn force(receiver: &Rc<ObjectData>, key: &MemberKey, ctx: &mut EvalContext) -> Result<Value, PklError> {
    force_slot(receiver, key, ctx).map(|(_, value)| value)
}

/// Like [`force`] but also returns the [`MemberSlot`] that was forced, so callers dispatching a
/// method call can read its declared type without forcing it a second time.
fn force_slot(receiver: &Rc<ObjectData>, key: &MemberKey, ctx: &mut EvalContext) -> Result<(Rc<MemberSlot>, Value), PklError> {
    let slot = {
        let members = receiver.members.borrow();
        members
            .get(key)
            .cloned()
            .ok_or_else(|| PklError::new(ErrorKind::NameResolution, format!("unknown member {key:?}")))?
    };

    if let Some(value) = slot.memo.borrow().as_ref() {
        return Ok((slot.clone(), value.clone()));
    }

    ctx.enter()?;
    let owner = slot
        .def
        .owner
        .upgrade()
        .ok_or_else(|| PklError::bug("member owner was dropped while still referenced"))?;
    let qualified_name = slot.def.member.qualified_name.clone();
    ctx.tracer.on_event(VmEvent::ForceStart { qualified_name: qualified_name.clone() });

    let activation = Activation {
        receiver: receiver.clone(),
        owner,
        current_def: slot.def.clone(),
        frame: slot.def.frame.clone(),
    };
    let result = eval_member_body(&slot, &activation, ctx);
    ctx.exit();
    ctx.tracer.on_event(VmEvent::ForceEnd { qualified_name });

    let value = result?;
    *slot.memo.borrow_mut() = Some(value.clone());
    Ok((slot.clone(), value))
}

fn eval_member_body(slot: &MemberSlot, activation: &Activation, ctx: &mut EvalContext) -> Result<Value, PklError> {
    match &slot.def.member.body {
        MemberBody::Constant(lit) => Ok(literal_value(lit)),
        MemberBody::Expr(expr) => eval_expr(expr, activation, ctx),
    }
}

/// Evaluates a `super.<name>` read: walks to the definition this member's current one
/// shadowed and forces *that* body, but still against the original receiver (§4.5 "Super
/// reads", §8 property 4 "Amend-super law").
fn eval_super(name_key: &MemberKey, activation: &Activation, ctx: &mut EvalContext) -> Result<Value, PklError> {
    let Some(previous) = &activation.current_def.previous else {
        return Err(PklError::new(
            ErrorKind::NameResolution,
            "super reference has no parent definition to read".to_string(),
        ));
    };
    if !matches!(name_key, MemberKey::Property(_)) {
        return Err(PklError::bug("super read used with a non-property key"));
    }
    ctx.enter()?;
    let owner = previous
        .owner
        .upgrade()
        .ok_or_else(|| PklError::bug("super owner was dropped while still referenced"))?;
    let super_activation = Activation {
        receiver: activation.receiver.clone(),
        owner,
        current_def: previous.clone(),
        frame: previous.frame.clone(),
    };
    let synthetic_slot = MemberSlot {
        def: previous.clone(),
        memo: std::cell::RefCell::new(None),
    };
    let result = eval_member_body(&synthetic_slot, &super_activation, ctx);
    ctx.exit();
    result
}

fn eval_expr(expr: &Expr, activation: &Activation, ctx: &mut EvalContext) -> Result<Value, PklError> {
    match expr {
        Expr::Literal(lit, _) => Ok(literal_value(lit)),
        Expr::InterpolatedString(parts, _) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    StringPart::Const(text) => out.push_str(text),
                    StringPart::Expr(inner) => {
                        let value = eval_expr(inner, activation, ctx)?;
                        out.push_str(&value.to_string());
                    }
                }
            }
            Ok(Value::String(out.into()))
        }
        Expr::Unary { op, operand, .. } => {
            let value = eval_expr(operand, activation, ctx)?;
            match (op, value) {
                (UnOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| PklError::new(ErrorKind::Arithmetic, "integer overflow negating Int.MIN")),
                (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (UnOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                (_, other) => Err(PklError::new(ErrorKind::Type, format!("cannot apply unary operator to {}", other.type_name()))),
            }
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            let lhs_val = eval_expr(lhs, activation, ctx)?;
            if *op == BinOp::And {
                return match lhs_val {
                    Value::Boolean(false) => Ok(Value::Boolean(false)),
                    Value::Boolean(true) => eval_expr(rhs, activation, ctx),
                    other => Err(type_error("Boolean", &other)),
                };
            }
            if *op == BinOp::Or {
                return match lhs_val {
                    Value::Boolean(true) => Ok(Value::Boolean(true)),
                    Value::Boolean(false) => eval_expr(rhs, activation, ctx),
                    other => Err(type_error("Boolean", &other)),
                };
            }
            let rhs_val = eval_expr(rhs, activation, ctx)?;
            eval_binary(*op, lhs_val, rhs_val)
        }
        Expr::Ternary { cond, then_branch, else_branch, .. } => match eval_expr(cond, activation, ctx)? {
            Value::Boolean(true) => eval_expr(then_branch, activation, ctx),
            Value::Boolean(false) => eval_expr(else_branch, activation, ctx),
            other => Err(type_error("Boolean", &other)),
        },
        Expr::If { cond, then_branch, else_branch, .. } => match eval_expr(cond, activation, ctx)? {
            Value::Boolean(true) => eval_expr(then_branch, activation, ctx),
            Value::Boolean(false) => eval_expr(else_branch, activation, ctx),
            other => Err(type_error("Boolean", &other)),
        },
        Expr::NullCoalesce { lhs, rhs, .. } => match eval_expr(lhs, activation, ctx)? {
            Value::Null => eval_expr(rhs, activation, ctx),
            other => Ok(other),
        },
        Expr::PropertyRead { target, name, .. } => eval_property_read(target, *name, activation, ctx),
        Expr::MethodCall { target, name, args, .. } => eval_method_call(target, *name, args, activation, ctx),
        Expr::Let { value, body, .. } => {
            let bound = eval_expr(value, activation, ctx)?;
            let let_frame = FrameInstance::new(1, activation.frame.clone());
            let_frame.set(SlotId(0), bound);
            let let_activation = Activation {
                receiver: activation.receiver.clone(),
                owner: activation.owner.clone(),
                current_def: activation.current_def.clone(),
                frame: Some(let_frame),
            };
            eval_expr(body, &let_activation, ctx)
        }
        Expr::LocalRead { depth_up, slot, .. } => {
            let frame = activation
                .frame
                .as_ref()
                .ok_or_else(|| PklError::bug("local read with no frame bound in this activation"))?;
            frame
                .get_at_depth(*depth_up, *slot)
                .ok_or_else(|| PklError::bug("local slot read before it was bound"))
        }
        Expr::Trace(inner, _) => {
            let value = eval_expr(inner, activation, ctx)?;
            ctx.tracer.on_event(VmEvent::Log {
                message: value.to_string(),
                qualified_name: activation.current_def.member.qualified_name.clone(),
            });
            Ok(value)
        }
        Expr::ObjectBody(body) => {
            let owner_rc = activation.owner.clone();
            build_object(ObjectKind::Dynamic, None, Some(&owner_rc), body, ctx)
        }
        Expr::New(new_expr) => {
            let owner_rc = activation.owner.clone();
            build_object(ObjectKind::Dynamic, None, Some(&owner_rc), &new_expr.body, ctx)
        }
    }
}

fn eval_property_read(target: &ReadTarget, name: StringId, activation: &Activation, ctx: &mut EvalContext) -> Result<Value, PklError> {
    let key = MemberKey::Property(name);
    match target {
        ReadTarget::Super => eval_super(&key, activation, ctx),
        ReadTarget::ImplicitReceiver | ReadTarget::Unresolved => force(&activation.receiver, &key, ctx),
        ReadTarget::Module | ReadTarget::Outer => force(&activation.owner, &key, ctx),
        ReadTarget::ExplicitReceiver(expr) => {
            let target_value = eval_expr(expr, activation, ctx)?;
            match target_value {
                Value::Object(obj) => force(&obj, &key, ctx),
                other => Err(type_error("an object", &other)),
            }
        }
    }
}

/// Dispatches a method call (§4.5 "Methods"): looks up the callee without forcing it twice,
/// evaluates arguments, and invokes it through [`call_function`].
fn eval_method_call(target: &ReadTarget, name: StringId, args: &[Expr], activation: &Activation, ctx: &mut EvalContext) -> Result<Value, PklError> {
    let return_type = method_return_type(target, name, activation, ctx)?;
    let callee = eval_property_read(target, name, activation, ctx)?;
    let Value::Function(function) = callee else {
        return Err(type_error("a Function", &callee));
    };
    let mut arg_values = Vec::with_capacity(args.len());
    for arg in args {
        arg_values.push(eval_expr(arg, activation, ctx)?);
    }
    call_function(&function, arg_values, return_type.as_ref(), ctx)
}

/// Looks up the declared return type of the member a method call targets, mirroring
/// [`eval_property_read`]'s target dispatch without forcing the member.
fn method_return_type(target: &ReadTarget, name: StringId, activation: &Activation, ctx: &mut EvalContext) -> Result<Option<TypeNode>, PklError> {
    let key = MemberKey::Property(name);
    match target {
        ReadTarget::Super => Ok(activation.current_def.previous.as_ref().and_then(|previous| previous.member.type_annotation.clone())),
        ReadTarget::ImplicitReceiver | ReadTarget::Unresolved => {
            Ok(activation.receiver.members.borrow().get(&key).and_then(|slot| slot.def.member.type_annotation.clone()))
        }
        ReadTarget::Module | ReadTarget::Outer => {
            Ok(activation.owner.members.borrow().get(&key).and_then(|slot| slot.def.member.type_annotation.clone()))
        }
        ReadTarget::ExplicitReceiver(expr) => match eval_expr(expr, activation, ctx)? {
            Value::Object(obj) => Ok(obj.members.borrow().get(&key).and_then(|slot| slot.def.member.type_annotation.clone())),
            other => Err(type_error("an object", &other)),
        },
    }
}

/// Binds `args` into a fresh frame over the function's captured frame, evaluates its body, and
/// checks parameter/return types against their declared annotations; stdlib methods skip the
/// return-type check (§4.5 "Methods").
fn call_function(function: &Rc<FunctionValue>, args: Vec<Value>, return_type: Option<&TypeNode>, ctx: &mut EvalContext) -> Result<Value, PklError> {
    if args.len() != function.arity() {
        return Err(PklError::new(ErrorKind::Type, format!("expected {} argument(s), got {}", function.arity(), args.len())));
    }

    ctx.enter()?;
    let frame = FrameInstance::new(function.params.len().max(1), function.captured_frame.clone());
    for (idx, (param, value)) in function.params.iter().zip(args).enumerate() {
        if let Some(type_node) = &param.type_annotation {
            if param.name.is_some() {
                if let Err(err) = check_type(&value, type_node) {
                    ctx.exit();
                    return Err(err);
                }
            }
        }
        let slot = SlotId(u32::try_from(idx).expect("parameter count fits in a slot id"));
        frame.set(slot, value);
    }

    let owner = function
        .owner
        .as_ref()
        .and_then(Weak::upgrade)
        .ok_or_else(|| PklError::bug("function owner was dropped while still referenced"))?;
    let synthetic_def = Rc::new(MemberDef {
        member: Rc::new(crate::ast::Member {
            range: crate::error::CodeRange::default(),
            modifiers: crate::ast::Modifiers::empty(),
            name: StringId::placeholder(),
            qualified_name: String::new(),
            type_annotation: None,
            body: MemberBody::Constant(Literal::Null),
        }),
        owner: Rc::downgrade(&owner),
        previous: None,
        frame: function.captured_frame.clone(),
    });
    let call_activation = Activation {
        receiver: owner.clone(),
        owner,
        current_def: synthetic_def,
        frame: Some(frame),
    };

    let result = eval_expr(&function.body, &call_activation, ctx);
    ctx.exit();
    let value = result?;
    if function.checks_return_type() {
        if let Some(type_node) = return_type {
            check_type(&value, type_node)?;
        }
    }
    Ok(value)
}

/// A pragmatic runtime type check against a declared [`TypeNode`] (§4.5 parameter/return-type
/// checking). Declared names other than the built-in scalar/collection types are accepted
/// structurally — full class-hierarchy checking needs the type table the parser front-end would
/// build, out of scope here (§1).
fn check_type(value: &Value, type_node: &TypeNode) -> Result<(), PklError> {
    match type_node {
        TypeNode::Unknown | TypeNode::Module => Ok(()),
        TypeNode::Nothing => Err(type_error("Nothing", value)),
        TypeNode::Nullable(inner) => match value {
            Value::Null => Ok(()),
            other => check_type(other, inner),
        },
        TypeNode::Union { members, .. } => {
            if members.iter().any(|member| check_type(value, member).is_ok()) {
                Ok(())
            } else {
                Err(type_error("a member of the declared union type", value))
            }
        }
        TypeNode::StringLiteralUnion(options) => match value {
            Value::String(s) if options.iter().any(|option| option == &**s) => Ok(()),
            Value::String(_) => Err(type_error("one of the declared string literals", value)),
            other => Err(type_error("String", other)),
        },
        TypeNode::Constrained { base, .. } => check_type(value, base),
        TypeNode::Function { .. } => match value {
            Value::Function(_) => Ok(()),
            other => Err(type_error("Function", other)),
        },
        TypeNode::Declared { name, .. } => {
            let matches_declared = match name.as_str() {
                "Int" => matches!(value, Value::Int(_)),
                "Float" | "Number" => matches!(value, Value::Int(_) | Value::Float(_)),
                "Boolean" => matches!(value, Value::Boolean(_)),
                "String" => matches!(value, Value::String(_)),
                "Null" => matches!(value, Value::Null),
                "Bytes" => matches!(value, Value::Bytes(_)),
                "Duration" => matches!(value, Value::Duration(_)),
                "DataSize" => matches!(value, Value::DataSize(_)),
                "List" | "Listing" => matches!(value, Value::List(_) | Value::Object(_)),
                "Map" | "Mapping" => matches!(value, Value::Map(_) | Value::Object(_)),
                "Set" => matches!(value, Value::Set(_)),
                _ => true,
            };
            if matches_declared {
                Ok(())
            } else {
                Err(type_error(name, value))
            }
        }
    }
}

fn eval_binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, PklError> {
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => checked(a.checked_add(b)),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => checked(a.checked_sub(b)),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => checked(a.checked_mul(b)),
        (BinOp::Div, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                Err(PklError::new(ErrorKind::Arithmetic, "division by zero"))
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        (BinOp::IntDiv, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                Err(PklError::new(ErrorKind::Arithmetic, "division by zero"))
            } else {
                checked(a.checked_div(b))
            }
        }
        (BinOp::Rem, Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                Err(PklError::new(ErrorKind::Arithmetic, "division by zero"))
            } else {
                checked(a.checked_rem(b))
            }
        }
        (BinOp::Add, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (BinOp::Sub, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
        (BinOp::Mul, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
        (BinOp::Div, Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}").into())),
        (BinOp::Lt, a, b) => Ok(Value::Boolean(compare(&a, &b)? == std::cmp::Ordering::Less)),
        (BinOp::Le, a, b) => Ok(Value::Boolean(compare(&a, &b)? != std::cmp::Ordering::Greater)),
        (BinOp::Gt, a, b) => Ok(Value::Boolean(compare(&a, &b)? == std::cmp::Ordering::Greater)),
        (BinOp::Ge, a, b) => Ok(Value::Boolean(compare(&a, &b)? != std::cmp::Ordering::Less)),
        (BinOp::Eq, a, b) => Ok(Value::Boolean(a.structural_eq(&b))),
        (BinOp::Ne, a, b) => Ok(Value::Boolean(!a.structural_eq(&b))),
        (op, a, b) => Err(PklError::new(
            ErrorKind::Type,
            format!("operator {op:?} is not defined for {} and {}", a.type_name(), b.type_name()),
        )),
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, PklError> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(|| PklError::new(ErrorKind::Arithmetic, "NaN is not ordered")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(PklError::new(ErrorKind::Type, "values are not comparable")),
    }
}

fn checked(result: Option<i64>) -> Result<Value, PklError> {
    result
        .map(Value::Int)
        .ok_or_else(|| PklError::new(ErrorKind::Arithmetic, "integer overflow"))
}

fn type_error(expected: &str, got: &Value) -> PklError {
    PklError::new(ErrorKind::Type, format!("expected {expected}, got {}", got.type_name()))
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Boolean(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.as_str().into()),
    }
}

/// Builds a fresh object from a body, either as a root (`parent: None`) or amending
/// `parent` (§4.4 "Creating an object"). `owner` is the lexically-enclosing object used to
/// resolve unqualified names within the body.
pub fn build_object(
    kind: ObjectKind,
    parent: Option<&Rc<ObjectData>>,
    owner: Option<&Rc<ObjectData>>,
    body: &ObjectBodyNode,
    ctx: &mut EvalContext,
) -> Result<Value, PklError> {
    let mut members: IndexMap<MemberKey, Rc<MemberSlot>> = match parent {
        Some(p) => ObjectData::begin_amend(p, owner.map(Rc::downgrade)),
        None => IndexMap::new(),
    };

    let placeholder = Rc::new(ObjectData {
        kind,
        class_name: None,
        parent: parent.cloned(),
        owner: owner.map(Rc::downgrade),
        members: std::cell::RefCell::new(IndexMap::new()),
        next_element_index: std::cell::Cell::new(parent.map_or(0, |p| p.next_element_index.get())),
    });

    overlay_body(body, &mut members, &placeholder, ctx)?;
    *placeholder.members.borrow_mut() = members;
    Ok(Value::Object(placeholder))
}

fn overlay_body(
    body: &ObjectBodyNode,
    members: &mut IndexMap<MemberKey, Rc<MemberSlot>>,
    owner: &Rc<ObjectData>,
    ctx: &mut EvalContext,
) -> Result<(), PklError> {
    match body {
        ObjectBodyNode::PropertiesOnly { properties } => {
            for member in properties {
                overlay_property(members, member, owner, None)?;
            }
            Ok(())
        }
        ObjectBodyNode::ConstantEntries { entries } => {
            for (key_lit, value_expr) in entries {
                overlay_entry(members, literal_value(key_lit), value_expr, owner, None)?;
            }
            Ok(())
        }
        ObjectBodyNode::MixedEntries { entries } => {
            for (key_expr, value_expr) in entries {
                let activation = root_activation(owner, None);
                let key = eval_expr(key_expr, &activation, ctx)?;
                overlay_entry(members, key, value_expr, owner, None)?;
            }
            Ok(())
        }
        ObjectBodyNode::Elements { elements, entries } => {
            for element_expr in elements {
                overlay_element(members, element_expr, owner, None);
            }
            for (key_lit, value_expr) in entries {
                overlay_entry(members, literal_value(key_lit), value_expr, owner, None)?;
            }
            Ok(())
        }
        ObjectBodyNode::Generator { members: gen_members } => overlay_generator(gen_members, members, owner, None, ctx),
    }
}

fn root_activation(owner: &Rc<ObjectData>, frame: Option<Rc<FrameInstance>>) -> Activation {
    // Used only to evaluate a dynamic entry key (or generator condition/iterable) before the
    // owning object exists; receiver and owner coincide since there is no enclosing member
    // activation at this point. `frame` carries whatever locals a generator's for/when nesting
    // has bound so far.
    Activation {
        receiver: owner.clone(),
        owner: owner.clone(),
        current_def: Rc::new(MemberDef {
            member: Rc::new(crate::ast::Member {
                range: crate::error::CodeRange::default(),
                modifiers: crate::ast::Modifiers::empty(),
                name: crate::intern::StringId::placeholder(),
                qualified_name: String::new(),
                type_annotation: None,
                body: MemberBody::Constant(Literal::Null),
            }),
            owner: Rc::downgrade(owner),
            previous: None,
            frame: frame.clone(),
        }),
        frame,
    }
}

fn overlay_property(
    members: &mut IndexMap<MemberKey, Rc<MemberSlot>>,
    member: &crate::ast::Member,
    owner: &Rc<ObjectData>,
    frame: Option<Rc<FrameInstance>>,
) -> Result<(), PklError> {
    let key = MemberKey::Property(member.name);
    if member.modifiers.has(crate::ast::Modifier::Delete) {
        ObjectData::delete(members, &key);
        return Ok(());
    }
    ObjectData::overlay(members, key, Rc::new(member.clone()), Rc::downgrade(owner), frame);
    Ok(())
}

fn overlay_entry(
    members: &mut IndexMap<MemberKey, Rc<MemberSlot>>,
    key_value: Value,
    value_expr: &Expr,
    owner: &Rc<ObjectData>,
    frame: Option<Rc<FrameInstance>>,
) -> Result<(), PklError> {
    let key = MemberKey::Entry(ValueKey::from_value(&key_value));
    let member = crate::ast::Member {
        range: crate::error::CodeRange::default(),
        modifiers: crate::ast::Modifiers::empty(),
        name: crate::intern::StringId::placeholder(),
        qualified_name: String::new(),
        type_annotation: None,
        body: MemberBody::Expr(Box::new(value_expr.clone())),
    };
    ObjectData::overlay(members, key, Rc::new(member), Rc::downgrade(owner), frame);
    Ok(())
}

fn overlay_element(members: &mut IndexMap<MemberKey, Rc<MemberSlot>>, element_expr: &Expr, owner: &Rc<ObjectData>, frame: Option<Rc<FrameInstance>>) {
    let index = owner.next_element_index.get();
    owner.next_element_index.set(index + 1);
    let member = crate::ast::Member {
        range: crate::error::CodeRange::default(),
        modifiers: crate::ast::Modifiers::empty(),
        name: crate::intern::StringId::placeholder(),
        qualified_name: String::new(),
        type_annotation: None,
        body: MemberBody::Expr(Box::new(element_expr.clone())),
    };
    ObjectData::overlay(members, MemberKey::Element(index), Rc::new(member), Rc::downgrade(owner), frame);
}

/// Expands `for`/`when`/spread/member-predicate members into the flattened member map
/// (§4.5 "Generators"). Keys are resolved eagerly here to establish iteration order and
/// identity; values stay lazy via the usual member-slot memoization. `frame` carries whatever
/// `for`-loop variables are in scope from enclosing generator nesting.
fn overlay_generator(
    gen_members: &[GeneratorMember],
    members: &mut IndexMap<MemberKey, Rc<MemberSlot>>,
    owner: &Rc<ObjectData>,
    frame: Option<Rc<FrameInstance>>,
    ctx: &mut EvalContext,
) -> Result<(), PklError> {
    for gen_member in gen_members {
        match gen_member {
            GeneratorMember::Property(member) => overlay_property(members, member, owner, frame.clone())?,
            GeneratorMember::Entry { key, value } => {
                let activation = root_activation(owner, frame.clone());
                let key_value = eval_expr(key, &activation, ctx)?;
                overlay_entry(members, key_value, value, owner, frame.clone())?;
            }
            GeneratorMember::Element(expr) => overlay_element(members, expr, owner, frame.clone()),
            GeneratorMember::Spread(expr) => {
                let activation = root_activation(owner, frame.clone());
                let value = eval_expr(expr, &activation, ctx)?;
                if let Value::Object(spread_obj) = value {
                    for (key, slot) in spread_obj.members.borrow().iter() {
                        ObjectData::overlay(members, key.clone(), slot.def.member.clone(), Rc::downgrade(owner), slot.def.frame.clone());
                    }
                } else {
                    return Err(type_error("an object-like value", &value));
                }
            }
            GeneratorMember::For { key_name, value_name: _, key_slot, value_slot, iterable, body } => {
                let activation = root_activation(owner, frame.clone());
                let iterable_value = eval_expr(iterable, &activation, ctx)?;
                let pairs: Vec<(Value, Value)> = match iterable_value {
                    Value::List(items) => items
                        .iter()
                        .enumerate()
                        .map(|(idx, item)| (Value::Int(i64::try_from(idx).unwrap_or(i64::MAX)), item.clone()))
                        .collect(),
                    Value::Map(entries) | Value::Set(entries) => {
                        entries.iter().map(|(key, value)| (value_key_to_value(key), value.clone())).collect()
                    }
                    other => return Err(type_error("an iterable", &other)),
                };
                for (key_value, value_value) in pairs {
                    let loop_frame = FrameInstance::new(2, frame.clone());
                    loop_frame.set(*value_slot, value_value);
                    if let Some(key_slot) = key_slot {
                        if key_name.is_some() {
                            loop_frame.set(*key_slot, key_value);
                        }
                    }
                    overlay_generator(body, members, owner, Some(loop_frame), ctx)?;
                }
            }
            GeneratorMember::When { cond, then_body, else_body } => {
                let activation = root_activation(owner, frame.clone());
                match eval_expr(cond, &activation, ctx)? {
                    Value::Boolean(true) => overlay_generator(then_body, members, owner, frame.clone(), ctx)?,
                    Value::Boolean(false) => overlay_generator(else_body, members, owner, frame.clone(), ctx)?,
                    other => return Err(type_error("Boolean", &other)),
                }
            }
            GeneratorMember::MemberPredicate { predicate, body } => {
                overlay_member_predicate(predicate, body, members, owner, frame.clone(), ctx)?;
            }
        }
    }
    Ok(())
}

/// Applies a member-predicate generator member (`[[predicate]] { ... }`, §4.5 "Generators"):
/// `predicate` is evaluated with `this` bound to each existing candidate's current value, and
/// `body` is amended onto only the candidates it accepts.
fn overlay_member_predicate(
    predicate: &Expr,
    body: &[GeneratorMember],
    members: &mut IndexMap<MemberKey, Rc<MemberSlot>>,
    owner: &Rc<ObjectData>,
    frame: Option<Rc<FrameInstance>>,
    ctx: &mut EvalContext,
) -> Result<(), PklError> {
    let candidate_keys: Vec<MemberKey> = members.keys().cloned().collect();
    for key in candidate_keys {
        let slot = members.get(&key).expect("key was just read from this map").clone();
        let candidate_value = force_in_place(&slot, owner, ctx)?;
        let this_frame = FrameInstance::new(1, frame.clone());
        this_frame.set(SlotId(0), candidate_value.clone());
        let predicate_activation = Activation {
            receiver: owner.clone(),
            owner: owner.clone(),
            current_def: slot.def.clone(),
            frame: Some(this_frame.clone()),
        };
        let accepted = match eval_expr(predicate, &predicate_activation, ctx)? {
            Value::Boolean(b) => b,
            other => return Err(type_error("Boolean", &other)),
        };
        if !accepted {
            continue;
        }
        let Value::Object(candidate_obj) = candidate_value else {
            return Err(type_error("an object", &candidate_value));
        };
        let mut amended = ObjectData::begin_amend(&candidate_obj, Some(Rc::downgrade(owner)));
        overlay_generator(body, &mut amended, owner, Some(this_frame), ctx)?;
        let merged = Rc::new(ObjectData {
            kind: candidate_obj.kind,
            class_name: candidate_obj.class_name.clone(),
            parent: Some(candidate_obj.clone()),
            owner: Some(Rc::downgrade(owner)),
            members: std::cell::RefCell::new(amended),
            next_element_index: std::cell::Cell::new(candidate_obj.next_element_index.get()),
        });
        let merged_member = slot.def.member.clone();
        members.insert(
            key,
            Rc::new(MemberSlot {
                def: Rc::new(MemberDef {
                    member: merged_member,
                    owner: Rc::downgrade(owner),
                    previous: slot.def.previous.clone(),
                    frame: slot.def.frame.clone(),
                }),
                memo: std::cell::RefCell::new(Some(Value::Object(merged))),
            }),
        );
    }
    Ok(())
}

/// Forces `slot` against `owner` as the receiver — used by member-predicate evaluation, where
/// the candidate hasn't been inserted into any finished object's member map yet.
fn force_in_place(slot: &Rc<MemberSlot>, owner: &Rc<ObjectData>, ctx: &mut EvalContext) -> Result<Value, PklError> {
    if let Some(value) = slot.memo.borrow().as_ref() {
        return Ok(value.clone());
    }
    let activation = Activation {
        receiver: owner.clone(),
        owner: owner.clone(),
        current_def: slot.def.clone(),
        frame: slot.def.frame.clone(),
    };
    let value = eval_member_body(slot, &activation, ctx)?;
    *slot.memo.borrow_mut() = Some(value.clone());
    Ok(value)
}

/// Reverses a scalar [`ValueKey`] back into a [`Value`] for binding a `for`-loop's key variable
/// over a Map/Set. Compound (object-identity) keys have no value to reconstruct from the key
/// alone; `for (k, v) in aMapWithObjectKeys` cannot recover `k` this way, a pragmatic limitation
/// documented in DESIGN.md.
fn value_key_to_value(key: &ValueKey) -> Value {
    match key {
        ValueKey::Null => Value::Null,
        ValueKey::Bool(b) => Value::Boolean(*b),
        ValueKey::Int(i) => Value::Int(*i),
        ValueKey::FloatBits(bits) => Value::Float(f64::from_bits(*bits)),
        ValueKey::String(s) => Value::String(s.clone()),
        ValueKey::Identity(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Member;
    use crate::error::CodeRange;
    use crate::intern::StringId;
    use crate::resource::NoLimitTracker;
    use crate::tracer::NullTracer;

    fn const_property(name_id: StringId, name: &str, value: i64) -> Member {
        Member {
            range: CodeRange::default(),
            modifiers: crate::ast::Modifiers::empty(),
            name: name_id,
            qualified_name: name.to_string(),
            type_annotation: None,
            body: MemberBody::Constant(Literal::Int(value)),
        }
    }

    fn new_ctx<'a>(resources: &'a mut NoLimitTracker, tracer: &'a mut NullTracer, interner: &'a Interner) -> EvalContext<'a> {
        EvalContext { resources, tracer, interner, depth: 0 }
    }

    #[test]
    fn forcing_a_constant_member_returns_its_value() {
        let mut resources = NoLimitTracker;
        let mut tracer = NullTracer;
        let mut interner = Interner::new();
        let age_id = interner.intern("age");
        let mut ctx = new_ctx(&mut resources, &mut tracer, &interner);

        let root = ObjectData::new_root(ObjectKind::Dynamic, None);
        let body = ObjectBodyNode::PropertiesOnly { properties: vec![const_property(age_id, "age", 30)] };
        let value = build_object(ObjectKind::Dynamic, None, Some(&root), &body, &mut ctx).unwrap();
        let Value::Object(obj) = value else { panic!("expected object") };

        let forced = force(&obj, &MemberKey::Property(age_id), &mut ctx).unwrap();
        assert!(matches!(forced, Value::Int(30)));
    }

    #[test]
    fn amending_replaces_in_place_and_super_reads_the_parent_value() {
        let mut resources = NoLimitTracker;
        let mut tracer = NullTracer;
        let mut interner = Interner::new();
        let name_id = interner.intern("name");
        let age_id = interner.intern("age");
        let mut ctx = new_ctx(&mut resources, &mut tracer, &interner);

        let parent_body = ObjectBodyNode::PropertiesOnly {
            properties: vec![const_property(name_id, "name", 0), const_property(age_id, "age", 30)],
        };
        let parent_value = build_object(ObjectKind::Dynamic, None, None, &parent_body, &mut ctx).unwrap();
        let Value::Object(parent) = parent_value else { panic!() };

        let super_read = Expr::PropertyRead {
            target: crate::ast::ReadTarget::Super,
            name: name_id,
            range: CodeRange::default(),
        };
        let child_name_member = Member {
            range: CodeRange::default(),
            modifiers: crate::ast::Modifiers::empty(),
            name: name_id,
            qualified_name: "name".to_string(),
            type_annotation: None,
            body: MemberBody::Expr(Box::new(super_read)),
        };
        let child_body = ObjectBodyNode::PropertiesOnly { properties: vec![child_name_member] };
        let child_value = build_object(ObjectKind::Dynamic, Some(&parent), Some(&parent), &child_body, &mut ctx).unwrap();
        let Value::Object(child) = child_value else { panic!() };

        // "name" on the child evaluates `super.name`, which should read the parent's constant.
        let forced = force(&child, &MemberKey::Property(name_id), &mut ctx).unwrap();
        assert!(matches!(forced, Value::Int(0)));

        // "age" was never overridden, so it carries straight through from the parent.
        let forced_age = force(&child, &MemberKey::Property(age_id), &mut ctx).unwrap();
        assert!(matches!(forced_age, Value::Int(30)));
    }

    #[test]
    fn forcing_twice_returns_the_same_memoized_value() {
        let mut resources = NoLimitTracker;
        let mut tracer = NullTracer;
        let mut interner = Interner::new();
        let x_id = interner.intern("x");
        let mut ctx = new_ctx(&mut resources, &mut tracer, &interner);

        let root = ObjectData::new_root(ObjectKind::Dynamic, None);
        let body = ObjectBodyNode::PropertiesOnly { properties: vec![const_property(x_id, "x", 1)] };
        let value = build_object(ObjectKind::Dynamic, None, Some(&root), &body, &mut ctx).unwrap();
        let Value::Object(obj) = value else { panic!() };

        let first = force(&obj, &MemberKey::Property(x_id), &mut ctx).unwrap();
        let second = force(&obj, &MemberKey::Property(x_id), &mut ctx).unwrap();
        assert!(first.structural_eq(&second));
    }

    #[test]
    fn member_insertion_order_is_preserved_across_amendment() {
        let mut resources = NoLimitTracker;
        let mut tracer = NullTracer;
        let mut interner = Interner::new();
        let a_id = interner.intern("a");
        let b_id = interner.intern("b");
        let c_id = interner.intern("c");
        let mut ctx = new_ctx(&mut resources, &mut tracer, &interner);

        let parent_body = ObjectBodyNode::PropertiesOnly {
            properties: vec![const_property(a_id, "a", 1), const_property(b_id, "b", 2)],
        };
        let parent_value = build_object(ObjectKind::Dynamic, None, None, &parent_body, &mut ctx).unwrap();
        let Value::Object(parent) = parent_value else { panic!() };

        let child_body = ObjectBodyNode::PropertiesOnly { properties: vec![const_property(c_id, "c", 3)] };
        let child_value = build_object(ObjectKind::Dynamic, Some(&parent), Some(&parent), &child_body, &mut ctx).unwrap();
        let Value::Object(child) = child_value else { panic!() };

        let names: Vec<String> = child
            .members
            .borrow()
            .values()
            .map(|slot| slot.def.member.qualified_name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
