//! Formula expression sub-language.
//!
//! This crate owns everything language-shaped in the pipeline:
//! - the safety grammar that classifies generator-authored formula strings
//!   (`grammar`), deliberately implemented as regex/scanner predicates rather
//!   than a parser,
//! - the reference-form checkers for table lookups, aggregation calls, damage
//!   calls and free variables (`refs`),
//! - a small hand-rolled tokenizer and recursive-descent parser for the
//!   rendered artifact notation (`lexer`, `parser`, `ast`),
//! - a capability-free evaluator with total default-valued lookup used by the
//!   sandboxed runtime checker (`eval`).
//!
//! The crate has no I/O, no async and no global mutable state; every function
//! is a pure transformation of its inputs.

pub mod ast;
pub mod error;
pub mod eval;
pub mod grammar;
pub mod idents;
pub mod lexer;
pub mod parser;
pub mod refs;

pub use ast::{Expr, Module};
pub use error::ExprError;
pub use eval::{eval_module, Interpreter, Scope, Value};
pub use grammar::{is_safe_expression, is_safe_value_expression};
pub use parser::parse_module;
pub use refs::{
    check_dmg_calls, check_total_calls, free_vars, split_top_level, table_refs, TableRef,
};
