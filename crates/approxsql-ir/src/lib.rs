//! Relational algebra tree, expression model and SQL emitter for approxsql.

mod alias;
mod emit;
mod expr;
mod relation;

pub use alias::{AliasGenerator, DEFAULT_ALIAS_PREFIX};
pub use emit::{SqlEmitter, quote_ident};
pub use expr::{
    AggregateKind, BinaryOp, Expr, Literal, OrderByItem, UnaryOp, WindowSpec, conjunction,
    split_conjuncts,
};
pub use relation::{JoinKind, Relation, SelectItem};
