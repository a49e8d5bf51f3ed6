#![doc = include_str!("../../../README.md")]

mod ast;
mod dispatch;
pub mod error;
mod eval;
mod frame;
mod function;
mod http;
mod intern;
mod loader;
mod module;
pub mod render;
mod resource;
mod security;
pub mod session;
mod symtab;
pub mod tracer;
mod uri;
mod value;

pub use crate::ast::{
    BinOp, Expr, GeneratorMember, Literal, Member, MemberBody, Modifier, Modifiers, NewExpr, ObjectBodyNode, ParentSource, ReadTarget,
    StringPart, TypeNode, UnOp,
};
pub use crate::error::{CodeRange, ErrorKind, EvalResult, PklError, SourceSection, StackFrame};
pub use crate::eval::{build_object, force, EvalContext};
pub use crate::http::{HttpClient, RewritingHttpClient, UrlRewriteRule};
pub use crate::intern::{Interner, StringId};
pub use crate::loader::package_cache::PackageCache;
pub use crate::loader::{ModuleLoader, ModuleReader, PathElement, ResolvedKey, ResourceReader};
pub use crate::module::{Module, ModuleInfo, ModuleName, ModuleParent};
pub use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker, DEFAULT_MAX_DEPTH};
pub use crate::security::SecurityManager;
pub use crate::session::{Evaluator, EvaluatorSettings};
pub use crate::tracer::{NullTracer, VecTracer, VmEvent, VmTracer};
pub use crate::uri::{PackageUri, Uri};
pub use crate::value::{MemberDef, MemberKey, MemberSlot, ObjectData, ObjectKind, Value, ValueKey};
