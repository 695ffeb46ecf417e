//! AST input contract.
//!
//! The parser is an external collaborator; it delivers a module as an ordered
//! sequence of statements built from these types. Every statement and
//! expression carries a source position. `NoneStmt` pads optional branches.
//!
//! [`simplify`] is a constant-folding pre-pass that collapses literal-only
//! subexpressions. Across module statements it runs in parallel when more
//! than one CPU is available, with a panic guard so one bad node cannot abort
//! the whole pass.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::{
    names::NameId,
    value::{BinOp, UnOp, Value},
};

/// Source position of a statement or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

impl Pos {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A statement with its source position.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// No-op used to pad optional branches.
    None,
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        elifs: Vec<(Expr, Vec<Stmt>)>,
        els: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        catch: Vec<Stmt>,
    },
    Foreach {
        var: NameId,
        value: Expr,
        body: Vec<Stmt>,
    },
    /// `для … по …` with inclusive bounds.
    NumFor {
        var: NameId,
        from: Expr,
        to: Expr,
        body: Vec<Stmt>,
    },
    /// `пока` loop: condition before body.
    Loop {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Vec<Expr>),
    Throw(Expr),
    Module {
        name: NameId,
        body: Vec<Stmt>,
    },
    Switch {
        expr: Expr,
        cases: Vec<Stmt>,
    },
    Select {
        cases: Vec<Stmt>,
    },
    /// A switch/select arm; in `select` the expression must be a channel
    /// operation.
    Case {
        expr: Expr,
        body: Vec<Stmt>,
    },
    Default {
        body: Vec<Stmt>,
    },
    /// Multiple assignment.
    Lets {
        lhss: Vec<Expr>,
        rhss: Vec<Expr>,
    },
    /// Local declaration in the current scope.
    Var {
        names: Vec<NameId>,
        exprs: Vec<Expr>,
    },
}

/// An expression with its source position.
#[derive(Debug, Clone)]
pub struct Expr {
    pub pos: Pos,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Ident(NameId),
    Literal(Value),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Index {
        coll: Box<Expr>,
        idx: Box<Expr>,
    },
    Member {
        obj: Box<Expr>,
        name: NameId,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    SliceLit(Vec<Expr>),
    MapLit(Vec<(Expr, Expr)>),
    /// Function literal; a name makes it a declaration in the current scope.
    Func {
        name: Option<NameId>,
        params: Vec<NameId>,
        variadic: bool,
        body: Vec<Stmt>,
    },
    /// `Новый Т(args…)`.
    New {
        name: NameId,
        args: Vec<Expr>,
    },
    /// `Лхс <- Рхс` send, or `<-Рхс` receive when `lhs` is absent. Which side
    /// is the channel is decided at runtime, as in `select` arms.
    ChanOp {
        lhs: Option<Box<Expr>>,
        rhs: Box<Expr>,
    },
    /// `го вызов(…)`: spawn a task running the callee.
    Go {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// True when the expression can stand on the left of an assignment.
    #[must_use]
    pub fn is_lettable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Index { .. } | ExprKind::Member { .. }
        )
    }
}

/// Runs the constant-folding pre-pass over a module's statements.
///
/// With more than one CPU the statements are folded by a scoped worker per
/// chunk; a panicking statement is logged and left unfolded.
pub fn simplify(stmts: &mut [Stmt]) {
    let workers = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
    if workers <= 1 || stmts.len() < 2 {
        for stmt in stmts {
            simplify_guarded(stmt);
        }
        return;
    }
    let chunk = stmts.len().div_ceil(workers);
    std::thread::scope(|scope| {
        for part in stmts.chunks_mut(chunk) {
            scope.spawn(|| {
                for stmt in part {
                    simplify_guarded(stmt);
                }
            });
        }
    });
}

fn simplify_guarded(stmt: &mut Stmt) {
    if catch_unwind(AssertUnwindSafe(|| simplify_stmt(stmt))).is_err() {
        log::warn!("сбой упрощения оператора в строке {}", stmt.pos.line);
    }
}

fn simplify_block(stmts: &mut [Stmt]) {
    for stmt in stmts {
        simplify_stmt(stmt);
    }
}

fn simplify_stmt(stmt: &mut Stmt) {
    match &mut stmt.kind {
        StmtKind::None | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::Expr(e) | StmtKind::Throw(e) => simplify_expr(e),
        StmtKind::If { cond, then, elifs, els } => {
            simplify_expr(cond);
            simplify_block(then);
            for (c, body) in elifs {
                simplify_expr(c);
                simplify_block(body);
            }
            simplify_block(els);
        }
        StmtKind::Try { body, catch } => {
            simplify_block(body);
            simplify_block(catch);
        }
        StmtKind::Foreach { value, body, .. } => {
            simplify_expr(value);
            simplify_block(body);
        }
        StmtKind::NumFor { from, to, body, .. } => {
            simplify_expr(from);
            simplify_expr(to);
            simplify_block(body);
        }
        StmtKind::Loop { cond, body } => {
            simplify_expr(cond);
            simplify_block(body);
        }
        StmtKind::Return(exprs) => {
            for e in exprs {
                simplify_expr(e);
            }
        }
        StmtKind::Module { body, .. } | StmtKind::Default { body } => simplify_block(body),
        StmtKind::Switch { expr, cases } => {
            simplify_expr(expr);
            simplify_block(cases);
        }
        StmtKind::Select { cases } => simplify_block(cases),
        StmtKind::Case { expr, body } => {
            simplify_expr(expr);
            simplify_block(body);
        }
        StmtKind::Lets { lhss, rhss } => {
            for e in lhss.iter_mut().chain(rhss) {
                simplify_expr(e);
            }
        }
        StmtKind::Var { exprs, .. } => {
            for e in exprs {
                simplify_expr(e);
            }
        }
    }
}

fn simplify_expr(expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::Binary { op, lhs, rhs } => {
            simplify_expr(lhs);
            simplify_expr(rhs);
            if let (ExprKind::Literal(a), ExprKind::Literal(b)) = (&lhs.kind, &rhs.kind) {
                // comparisons and collection operators fold too; failures
                // are left for the VM so the error carries a position
                if let Ok(folded) = a.eval_binop(*op, b) {
                    expr.kind = ExprKind::Literal(folded);
                }
            }
        }
        ExprKind::Unary { op, expr: inner } => {
            simplify_expr(inner);
            if let ExprKind::Literal(a) = &inner.kind {
                if let Ok(folded) = a.eval_unop(*op) {
                    expr.kind = ExprKind::Literal(folded);
                }
            }
        }
        ExprKind::Index { coll, idx } => {
            simplify_expr(coll);
            simplify_expr(idx);
        }
        ExprKind::Member { obj, .. } => simplify_expr(obj),
        ExprKind::Call { callee, args } | ExprKind::Go { callee, args } => {
            simplify_expr(callee);
            for a in args {
                simplify_expr(a);
            }
        }
        ExprKind::SliceLit(items) => {
            for item in items {
                simplify_expr(item);
            }
        }
        ExprKind::MapLit(entries) => {
            for (k, v) in entries {
                simplify_expr(k);
                simplify_expr(v);
            }
        }
        ExprKind::Func { body, .. } => simplify_block(body),
        ExprKind::New { args, .. } => {
            for a in args {
                simplify_expr(a);
            }
        }
        ExprKind::ChanOp { lhs, rhs } => {
            if let Some(lhs) = lhs {
                simplify_expr(lhs);
            }
            simplify_expr(rhs);
        }
        ExprKind::Ident(_) | ExprKind::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: i64) -> Expr {
        Expr {
            pos: Pos::default(),
            kind: ExprKind::Literal(Value::Int(v)),
        }
    }

    fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr {
            pos: Pos::default(),
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    #[test]
    fn literal_subtrees_fold() {
        let mut stmts = vec![Stmt {
            pos: Pos::default(),
            kind: StmtKind::Expr(bin(BinOp::Add, lit(2), bin(BinOp::Mul, lit(3), lit(4)))),
        }];
        simplify(&mut stmts);
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        match &e.kind {
            ExprKind::Literal(v) => assert!(v.deep_eq(&Value::Int(14))),
            other => panic!("expected folded literal, got {other:?}"),
        }
    }

    #[test]
    fn failing_folds_are_left_for_the_vm() {
        let mut stmts = vec![Stmt {
            pos: Pos::default(),
            kind: StmtKind::Expr(bin(
                BinOp::Quo,
                lit(1),
                Expr {
                    pos: Pos::default(),
                    kind: ExprKind::Literal(Value::Int(0)),
                },
            )),
        }];
        simplify(&mut stmts);
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn identifiers_do_not_fold() {
        let mut stmts = vec![Stmt {
            pos: Pos::default(),
            kind: StmtKind::Expr(bin(
                BinOp::Add,
                Expr {
                    pos: Pos::default(),
                    kind: ExprKind::Ident(crate::names::intern("х")),
                },
                lit(1),
            )),
        }];
        simplify(&mut stmts);
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }
}
