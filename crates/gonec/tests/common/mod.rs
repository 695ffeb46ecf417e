//! Shared AST construction helpers for integration tests.
//!
//! The parser is external to the crate, so scenarios build the AST input
//! contract directly.
#![allow(dead_code)]

use gonec::{
    BinOp, Env, NoPrint, Value,
    ast::{Expr, ExprKind, Pos, Stmt, StmtKind},
    intern,
};

pub fn pos() -> Pos {
    Pos::new(1, 1)
}

pub fn stmt(kind: StmtKind) -> Stmt {
    Stmt { pos: pos(), kind }
}

pub fn expr(kind: ExprKind) -> Expr {
    Expr { pos: pos(), kind }
}

pub fn int(v: i64) -> Expr {
    expr(ExprKind::Literal(Value::Int(v)))
}

pub fn string(v: &str) -> Expr {
    expr(ExprKind::Literal(Value::from(v)))
}

pub fn ident(name: &str) -> Expr {
    expr(ExprKind::Ident(intern(name)))
}

pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn index(coll: Expr, idx: Expr) -> Expr {
    expr(ExprKind::Index {
        coll: Box::new(coll),
        idx: Box::new(idx),
    })
}

pub fn member(obj: Expr, name: &str) -> Expr {
    expr(ExprKind::Member {
        obj: Box::new(obj),
        name: intern(name),
    })
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        callee: Box::new(callee),
        args,
    })
}

pub fn slice_lit(items: Vec<Expr>) -> Expr {
    expr(ExprKind::SliceLit(items))
}

pub fn map_lit(entries: Vec<(&str, Expr)>) -> Expr {
    expr(ExprKind::MapLit(
        entries.into_iter().map(|(k, v)| (string(k), v)).collect(),
    ))
}

/// `имя = значение` assignment statement.
pub fn assign(lhs: Expr, rhs: Expr) -> Stmt {
    stmt(StmtKind::Lets {
        lhss: vec![lhs],
        rhss: vec![rhs],
    })
}

pub fn ret(exprs: Vec<Expr>) -> Stmt {
    stmt(StmtKind::Return(exprs))
}

/// Named function declaration statement.
pub fn func_decl(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Expr(expr(ExprKind::Func {
        name: Some(intern(name)),
        params: params.iter().map(|p| intern(p)).collect(),
        variadic: false,
        body,
    })))
}

/// `Новый Т(…)`.
pub fn new_value(type_name: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::New {
        name: intern(type_name),
        args,
    })
}

/// `канал <- значение` send expression.
pub fn chan_send(ch: Expr, val: Expr) -> Expr {
    expr(ExprKind::ChanOp {
        lhs: Some(Box::new(ch)),
        rhs: Box::new(val),
    })
}

/// `<-канал` receive expression.
pub fn chan_recv(ch: Expr) -> Expr {
    expr(ExprKind::ChanOp {
        lhs: None,
        rhs: Box::new(ch),
    })
}

/// Runs a module body in a fresh silent environment.
pub fn run_ok(stmts: Vec<Stmt>) -> Value {
    gonec::run(stmts, &Env::new_root_with_output(Box::new(NoPrint))).expect("script failed")
}

pub fn ints(values: &[i64]) -> Value {
    Value::Slice(gonec::VmSlice::from_values(values.iter().copied().map(Value::Int).collect()))
}
