//! AST → bytecode lowering.
//!
//! One pass per statement. Child expressions receive the parent register,
//! siblings receive incrementing neighbors, and the register high-water mark
//! propagates up so the VM can pre-size the frame window. Labels are
//! allocated from one counter for the whole run, including nested function
//! and module code blocks.

use std::sync::Arc;

use crate::{
    ast::{Expr, ExprKind, Pos, Stmt, StmtKind},
    bytecode::{
        builder::CodeBuilder,
        inst::{Code, Inst, Reg},
    },
    error::{LowerError, LowerResult},
    names,
    value::Value,
};

/// Lowers a module body into an executable code block.
pub fn lower_module(stmts: &[Stmt]) -> LowerResult<Arc<Code>> {
    let mut b = CodeBuilder::new();
    lower_block(stmts, &mut b, 0)?;
    let (code, _) = b.build()?;
    Ok(Arc::new(code))
}

fn lower_block(stmts: &[Stmt], b: &mut CodeBuilder, reg: Reg) -> LowerResult<()> {
    for stmt in stmts {
        lower_stmt(stmt, b, reg)?;
    }
    Ok(())
}

fn lower_stmt(stmt: &Stmt, b: &mut CodeBuilder, reg: Reg) -> LowerResult<()> {
    let pos = stmt.pos;
    match &stmt.kind {
        StmtKind::None => {}
        StmtKind::Expr(e) => {
            lower_expr(e, b, reg, true)?;
            b.touch_reg(reg);
        }
        StmtKind::If { cond, then, elifs, els } => {
            let lend = b.new_label();
            lower_expr(cond, b, reg, false)?;
            let lf = b.new_label();
            b.emit(Inst::JFalse { cond: reg, to: lf }, pos);
            lower_block(then, b, reg)?;
            b.emit(Inst::Jmp { to: lend }, pos);
            b.bind(lf, pos);
            for (elif_cond, elif_body) in elifs {
                lower_expr(elif_cond, b, reg, false)?;
                let li = b.new_label();
                b.emit(Inst::JFalse { cond: reg, to: li }, elif_cond.pos);
                lower_block(elif_body, b, reg)?;
                b.emit(Inst::Jmp { to: lend }, elif_cond.pos);
                b.bind(li, elif_cond.pos);
            }
            lower_block(els, b, reg)?;
            b.bind(lend, pos);
            b.touch_reg(reg);
        }
        StmtKind::Try { body, catch } => {
            let lend = b.new_label();
            let li = b.new_label();
            // the error register is tracked for the region; the body runs one
            // register up so it cannot clobber it
            b.emit(Inst::Try { err: reg, lcatch: li }, pos);
            lower_block(body, b, reg + 1)?;
            b.bind(li, pos);
            // CATCH behaves like JFALSE on the error register and scopes the
            // error-description function
            b.emit(Inst::Catch { err: reg, lend }, pos);
            lower_block(catch, b, reg)?;
            b.bind(lend, pos);
            b.emit(Inst::PopTry { lcatch: li }, pos);
            b.touch_reg(reg + 1);
        }
        StmtKind::Foreach { var, value, body } => {
            lower_expr(value, b, reg, false)?;
            let lend = b.new_label();
            let li = b.new_label();
            let regiter = reg + 1;
            let regval = reg + 2;
            let regsub = reg + 3;
            b.emit(
                Inst::Foreach {
                    coll: reg,
                    iter: regiter,
                    lend,
                    lcont: li,
                },
                pos,
            );
            // Продолжить re-enters here
            b.bind(li, pos);
            b.emit(
                Inst::Next {
                    coll: reg,
                    iter: regiter,
                    val: regval,
                    lend,
                },
                pos,
            );
            b.emit(Inst::Set { src: regval, name: *var }, pos);
            lower_block(body, b, regsub)?;
            b.emit(Inst::Jmp { to: li }, pos);
            b.bind(lend, pos);
            b.emit(Inst::PopFor { lcont: li }, pos);
            b.touch_reg(regsub);
        }
        StmtKind::NumFor { var, from, to, body } => {
            let regfrom = reg + 1;
            let regto = reg + 2;
            let regsub = reg + 3;
            lower_expr(from, b, regfrom, false)?;
            lower_expr(to, b, regto, false)?;
            let lend = b.new_label();
            let li = b.new_label();
            b.emit(
                Inst::ForNum {
                    dst: reg,
                    from: regfrom,
                    to: regto,
                    lend,
                    lcont: li,
                },
                pos,
            );
            b.bind(li, pos);
            b.emit(
                Inst::NextNum {
                    dst: reg,
                    from: regfrom,
                    to: regto,
                    lend,
                },
                pos,
            );
            b.emit(Inst::Set { src: reg, name: *var }, pos);
            lower_block(body, b, regsub)?;
            b.emit(Inst::Jmp { to: li }, pos);
            b.bind(lend, pos);
            b.emit(Inst::PopFor { lcont: li }, pos);
            b.touch_reg(regsub);
        }
        StmtKind::Loop { cond, body } => {
            let lend = b.new_label();
            let li = b.new_label();
            b.emit(Inst::While { lend, lcont: li }, pos);
            b.bind(li, pos);
            lower_expr(cond, b, reg, false)?;
            b.emit(Inst::JFalse { cond: reg, to: lend }, pos);
            lower_block(body, b, reg + 1)?;
            b.emit(Inst::Jmp { to: li }, pos);
            b.bind(lend, pos);
            b.emit(Inst::PopFor { lcont: li }, pos);
            b.touch_reg(reg + 1);
        }
        StmtKind::Break => {
            b.emit(Inst::Break, pos);
            b.touch_reg(reg);
        }
        StmtKind::Continue => {
            b.emit(Inst::Continue, pos);
            b.touch_reg(reg);
        }
        StmtKind::Return(exprs) => {
            match exprs.as_slice() {
                [] => b.emit(
                    Inst::Load {
                        dst: reg,
                        val: Value::Nil,
                    },
                    pos,
                ),
                [single] => lower_expr(single, b, reg, false)?,
                many => {
                    let n = many.len() as u32;
                    b.emit(
                        Inst::MakeSlice {
                            dst: reg,
                            len: n,
                            cap: n,
                        },
                        pos,
                    );
                    for (i, e) in many.iter().enumerate() {
                        lower_expr(e, b, reg + 1, false)?;
                        // surface indices are 1-based
                        b.emit(
                            Inst::Load {
                                dst: reg + 2,
                                val: Value::Int(i as i64 + 1),
                            },
                            e.pos,
                        );
                        b.emit(
                            Inst::SetIdx {
                                coll: reg,
                                idx: reg + 2,
                                val: reg + 1,
                            },
                            e.pos,
                        );
                    }
                    b.touch_reg(reg + 2);
                }
            }
            b.emit(Inst::Ret { src: reg }, pos);
            b.touch_reg(reg + 1);
        }
        StmtKind::Throw(e) => {
            lower_expr(e, b, reg, false)?;
            b.emit(Inst::Throw { src: reg }, pos);
            b.touch_reg(reg);
        }
        StmtKind::Module { name, body } => {
            if names::folded(*name) == "_" {
                // the underscore module inlines into the current context
                lower_block(body, b, reg)?;
            } else {
                let mut sub = CodeBuilder::with_label_counter(b.label_counter());
                lower_block(body, &mut sub, 0)?;
                let (code, counter) = sub.build()?;
                b.resume_label_counter(counter);
                b.emit(
                    Inst::Module {
                        name: *name,
                        code: Arc::new(code),
                    },
                    pos,
                );
            }
            b.touch_reg(reg);
        }
        StmtKind::Switch { expr, cases } => {
            lower_expr(expr, b, reg, false)?;
            let lend = b.new_label();
            let mut default_body: Option<&Vec<Stmt>> = None;
            for case in cases {
                match &case.kind {
                    StmtKind::Default { body } => default_body = Some(body),
                    StmtKind::Case { expr: case_expr, body } => {
                        let li = b.new_label();
                        lower_expr(case_expr, b, reg + 1, false)?;
                        b.emit(
                            Inst::Equal {
                                dst: reg + 2,
                                a: reg,
                                b: reg + 1,
                            },
                            case.pos,
                        );
                        b.emit(
                            Inst::JFalse {
                                cond: reg + 2,
                                to: li,
                            },
                            case.pos,
                        );
                        lower_block(body, b, reg)?;
                        b.emit(Inst::Jmp { to: lend }, case.pos);
                        b.bind(li, case.pos);
                    }
                    _ => {
                        return Err(LowerError::new("Ожидается ветка Выбора", case.pos));
                    }
                }
            }
            if let Some(body) = default_body {
                lower_block(body, b, reg)?;
            }
            b.bind(lend, pos);
            b.touch_reg(reg + 2);
        }
        StmtKind::Select { cases } => lower_select(cases, b, reg, pos)?,
        StmtKind::Case { .. } | StmtKind::Default { .. } => {
            // handled by the enclosing switch or select
        }
        StmtKind::Lets { lhss, rhss } => lower_lets(lhss, rhss, b, reg, pos)?,
        StmtKind::Var { names: ids, exprs } => {
            match exprs.as_slice() {
                [] => {
                    b.emit(
                        Inst::Load {
                            dst: reg,
                            val: Value::Nil,
                        },
                        pos,
                    );
                    for id in ids {
                        b.emit(Inst::SetLocal { src: reg, name: *id }, pos);
                    }
                }
                [single] => {
                    lower_expr(single, b, reg, false)?;
                    for id in ids {
                        b.emit(Inst::SetLocal { src: reg, name: *id }, pos);
                    }
                }
                many if many.len() == ids.len() => {
                    for (e, id) in many.iter().zip(ids) {
                        lower_expr(e, b, reg, false)?;
                        b.emit(Inst::SetLocal { src: reg, name: *id }, e.pos);
                    }
                }
                _ => {
                    return Err(LowerError::new(
                        "Количество переменных и значений должно совпадать или значение должно быть одно",
                        pos,
                    ));
                }
            }
            b.touch_reg(reg);
        }
    }
    Ok(())
}

/// Select over channels: arms are tried in textual order; with no default the
/// whole block restarts after a yield.
fn lower_select(cases: &[Stmt], b: &mut CodeBuilder, reg: Reg, pos: Pos) -> LowerResult<()> {
    let lstart = b.new_label();
    b.bind(lstart, pos);
    let lend = b.new_label();
    let mut default_body: Option<&Vec<Stmt>> = None;
    for case in cases {
        match &case.kind {
            StmtKind::Default { body } => default_body = Some(body),
            StmtKind::Case { expr, body } => {
                let ExprKind::ChanOp { lhs, rhs } = &expr.kind else {
                    return Err(LowerError::new(
                        "При выборе вариантов из каналов допустимы только выражения с каналами",
                        case.pos,
                    ));
                };
                let li = b.new_label();
                lower_expr(rhs, b, reg, false)?;
                match lhs {
                    None => {
                        // a read without keeping the value
                        b.emit(
                            Inst::TryRecv {
                                ch: reg,
                                val: reg + 1,
                                ok: reg + 2,
                                ready: reg + 3,
                            },
                            case.pos,
                        );
                        b.emit(
                            Inst::JFalse {
                                cond: reg + 2,
                                to: li,
                            },
                            case.pos,
                        );
                    }
                    Some(lhs) => {
                        lower_expr(lhs, b, reg + 1, false)?;
                        // which side is the channel is only known at runtime
                        b.emit(
                            Inst::IsChan {
                                src: reg + 1,
                                dst: reg + 3,
                            },
                            case.pos,
                        );
                        let li3 = b.new_label();
                        b.emit(
                            Inst::JFalse {
                                cond: reg + 3,
                                to: li3,
                            },
                            case.pos,
                        );
                        // the left side is a channel: send the right value
                        b.emit(
                            Inst::TrySend {
                                ch: reg + 1,
                                val: reg,
                                ok: reg + 2,
                            },
                            case.pos,
                        );
                        let li2 = b.new_label();
                        b.emit(
                            Inst::JTrue {
                                cond: reg + 2,
                                to: li2,
                            },
                            case.pos,
                        );
                        b.emit(Inst::Jmp { to: li }, case.pos);
                        // otherwise the right side is the channel and the
                        // left side receives
                        b.bind(li3, case.pos);
                        b.emit(
                            Inst::TryRecv {
                                ch: reg,
                                val: reg + 1,
                                ok: reg + 2,
                                ready: reg + 3,
                            },
                            case.pos,
                        );
                        b.emit(
                            Inst::JFalse {
                                cond: reg + 2,
                                to: li,
                            },
                            case.pos,
                        );
                        lower_assign(lhs, b, reg + 1)?;
                        b.bind(li2, case.pos);
                    }
                }
                lower_block(body, b, reg)?;
                b.emit(Inst::Jmp { to: lend }, case.pos);
                b.bind(li, case.pos);
            }
            _ => {
                return Err(LowerError::new("Ожидается ветка Выбора", case.pos));
            }
        }
    }
    match default_body {
        Some(body) => lower_block(body, b, reg)?,
        None => {
            // no arm ready: let other tasks run and retry
            b.emit(Inst::GoShed, pos);
            b.emit(Inst::Jmp { to: lstart }, pos);
        }
    }
    b.bind(lend, pos);
    b.touch_reg(reg + 3);
    Ok(())
}

/// Multiple assignment. One right-hand side broadcasts (element-wise when it
/// is a sequence); equal counts evaluate all sources first so swaps work.
fn lower_lets(lhss: &[Expr], rhss: &[Expr], b: &mut CodeBuilder, reg: Reg, pos: Pos) -> LowerResult<()> {
    for lhs in lhss {
        if !lhs.is_lettable() {
            return Err(LowerError::new("Выражению невозможно присвоить значение", lhs.pos));
        }
    }
    if rhss.len() == 1 && lhss.len() > 1 {
        lower_expr(&rhss[0], b, reg, false)?;
        let lend = b.new_label();
        let li = b.new_label();
        b.emit(
            Inst::IsSlice {
                src: reg,
                dst: reg + 1,
            },
            pos,
        );
        b.emit(
            Inst::JFalse {
                cond: reg + 1,
                to: li,
            },
            pos,
        );
        // element-wise from the sequence
        for (i, lhs) in lhss.iter().enumerate() {
            b.emit(
                Inst::Mv {
                    src: reg,
                    dst: reg + 1,
                },
                lhs.pos,
            );
            b.emit(
                Inst::Load {
                    dst: reg + 2,
                    val: Value::Int(i as i64 + 1),
                },
                lhs.pos,
            );
            b.emit(
                Inst::GetIdx {
                    coll: reg + 1,
                    idx: reg + 2,
                    dst: reg + 1,
                },
                lhs.pos,
            );
            lower_assign(lhs, b, reg + 1)?;
        }
        b.emit(Inst::Jmp { to: lend }, pos);
        // broadcast the same value
        b.bind(li, pos);
        for lhs in lhss {
            lower_assign(lhs, b, reg)?;
        }
        b.bind(lend, pos);
        b.touch_reg(reg + 2);
    } else if lhss.len() == rhss.len() {
        // evaluate all sources into distinct registers first
        for (i, rhs) in rhss.iter().enumerate() {
            lower_expr(rhs, b, reg + i as Reg, false)?;
            b.touch_reg(reg + i as Reg);
        }
        for (i, lhs) in lhss.iter().enumerate() {
            lower_assign(lhs, b, reg + i as Reg)?;
            b.touch_reg(reg + i as Reg);
        }
    } else {
        return Err(LowerError::new(
            "Количество переменных и значений должно совпадать или значение должно быть одно",
            pos,
        ));
    }
    Ok(())
}

/// Lowers a write of the value in `reg` into an assignable expression.
fn lower_assign(lhs: &Expr, b: &mut CodeBuilder, reg: Reg) -> LowerResult<()> {
    match &lhs.kind {
        ExprKind::Ident(name) => {
            b.emit(Inst::Set { src: reg, name: *name }, lhs.pos);
        }
        ExprKind::Index { coll, idx } => {
            lower_expr(coll, b, reg + 1, false)?;
            lower_expr(idx, b, reg + 2, false)?;
            b.emit(
                Inst::SetIdx {
                    coll: reg + 1,
                    idx: reg + 2,
                    val: reg,
                },
                lhs.pos,
            );
            b.touch_reg(reg + 2);
        }
        ExprKind::Member { obj, name } => {
            lower_expr(obj, b, reg + 1, false)?;
            b.emit(
                Inst::SetMemb {
                    obj: reg + 1,
                    name: *name,
                    val: reg,
                },
                lhs.pos,
            );
            b.touch_reg(reg + 1);
        }
        _ => {
            return Err(LowerError::new("Выражению невозможно присвоить значение", lhs.pos));
        }
    }
    Ok(())
}

/// Lowers an expression into `reg`. `as_stmt` means the caller discards the
/// result.
fn lower_expr(expr: &Expr, b: &mut CodeBuilder, reg: Reg, as_stmt: bool) -> LowerResult<()> {
    let pos = expr.pos;
    match &expr.kind {
        ExprKind::Ident(name) => {
            b.emit(Inst::Get { dst: reg, name: *name }, pos);
            b.touch_reg(reg);
        }
        ExprKind::Literal(val) => {
            b.emit(
                Inst::Load {
                    dst: reg,
                    val: val.clone(),
                },
                pos,
            );
            b.touch_reg(reg);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            lower_expr(lhs, b, reg, false)?;
            lower_expr(rhs, b, reg + 1, false)?;
            b.emit(
                Inst::Oper {
                    dst: reg,
                    lhs: reg,
                    rhs: reg + 1,
                    op: *op,
                },
                pos,
            );
            b.touch_reg(reg + 1);
        }
        ExprKind::Unary { op, expr: inner } => {
            lower_expr(inner, b, reg, false)?;
            b.emit(
                Inst::Unary {
                    dst: reg,
                    src: reg,
                    op: *op,
                },
                pos,
            );
            b.touch_reg(reg);
        }
        ExprKind::Index { coll, idx } => {
            lower_expr(coll, b, reg, false)?;
            lower_expr(idx, b, reg + 1, false)?;
            b.emit(
                Inst::GetIdx {
                    coll: reg,
                    idx: reg + 1,
                    dst: reg,
                },
                pos,
            );
            b.touch_reg(reg + 1);
        }
        ExprKind::Member { obj, name } => {
            lower_expr(obj, b, reg, false)?;
            b.emit(
                Inst::GetMemb {
                    obj: reg,
                    name: *name,
                    dst: reg,
                },
                pos,
            );
            b.touch_reg(reg);
        }
        ExprKind::Call { callee, args } => {
            lower_expr(callee, b, reg, false)?;
            for (i, arg) in args.iter().enumerate() {
                lower_expr(arg, b, reg + 1 + i as Reg, false)?;
            }
            b.emit(
                Inst::Call {
                    func: reg,
                    args: reg + 1,
                    nargs: args.len() as u32,
                    ret: reg,
                },
                pos,
            );
            b.touch_reg(reg + args.len() as Reg);
        }
        ExprKind::SliceLit(items) => {
            let n = items.len() as u32;
            b.emit(
                Inst::MakeSlice {
                    dst: reg,
                    len: n,
                    cap: n,
                },
                pos,
            );
            for (i, item) in items.iter().enumerate() {
                lower_expr(item, b, reg + 1, false)?;
                b.emit(
                    Inst::Load {
                        dst: reg + 2,
                        val: Value::Int(i as i64 + 1),
                    },
                    item.pos,
                );
                b.emit(
                    Inst::SetIdx {
                        coll: reg,
                        idx: reg + 2,
                        val: reg + 1,
                    },
                    item.pos,
                );
            }
            b.touch_reg(reg + 2);
        }
        ExprKind::MapLit(entries) => {
            b.emit(Inst::MakeMap { dst: reg }, pos);
            for (key, val) in entries {
                lower_expr(key, b, reg + 1, false)?;
                lower_expr(val, b, reg + 2, false)?;
                b.emit(
                    Inst::SetIdx {
                        coll: reg,
                        idx: reg + 1,
                        val: reg + 2,
                    },
                    key.pos,
                );
            }
            b.touch_reg(reg + 2);
        }
        ExprKind::Func {
            name,
            params,
            variadic,
            body,
        } => {
            let mut sub = CodeBuilder::with_label_counter(b.label_counter());
            lower_block(body, &mut sub, 0)?;
            let (code, counter) = sub.build()?;
            b.resume_label_counter(counter);
            b.emit(
                Inst::MakeFunc {
                    dst: reg,
                    name: *name,
                    params: params.clone().into(),
                    variadic: *variadic,
                    code: Arc::new(code),
                },
                pos,
            );
            if let Some(name) = name {
                b.emit(Inst::SetLocal { src: reg, name: *name }, pos);
            }
            b.touch_reg(reg);
        }
        ExprKind::New { name, args } => {
            for (i, arg) in args.iter().enumerate() {
                lower_expr(arg, b, reg + 1 + i as Reg, false)?;
            }
            b.emit(
                Inst::New {
                    dst: reg,
                    name: *name,
                    args: reg + 1,
                    nargs: args.len() as u32,
                },
                pos,
            );
            b.touch_reg(reg + args.len() as Reg);
        }
        ExprKind::ChanOp { lhs: None, rhs } => {
            lower_expr(rhs, b, reg, false)?;
            b.emit(Inst::ChanRecv { ch: reg, dst: reg }, pos);
            b.touch_reg(reg);
        }
        ExprKind::ChanOp { lhs: Some(lhs), rhs } => {
            lower_expr(lhs, b, reg, false)?;
            lower_expr(rhs, b, reg + 1, false)?;
            b.emit(
                Inst::ChanSend {
                    ch: reg,
                    val: reg + 1,
                },
                pos,
            );
            if !as_stmt {
                b.emit(
                    Inst::Load {
                        dst: reg,
                        val: Value::Nil,
                    },
                    pos,
                );
            }
            b.touch_reg(reg + 1);
        }
        ExprKind::Go { callee, args } => {
            lower_expr(callee, b, reg, false)?;
            for (i, arg) in args.iter().enumerate() {
                lower_expr(arg, b, reg + 1 + i as Reg, false)?;
            }
            b.emit(
                Inst::Go {
                    func: reg,
                    args: reg + 1,
                    nargs: args.len() as u32,
                },
                pos,
            );
            if !as_stmt {
                b.emit(
                    Inst::Load {
                        dst: reg,
                        val: Value::Nil,
                    },
                    pos,
                );
            }
            b.touch_reg(reg + args.len() as Reg);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::BinOp;

    fn expr(kind: ExprKind) -> Expr {
        Expr {
            pos: Pos::default(),
            kind,
        }
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt {
            pos: Pos::default(),
            kind,
        }
    }

    #[test]
    fn expression_statement_shape() {
        let stmts = vec![stmt(StmtKind::Expr(expr(ExprKind::Binary {
            op: BinOp::Add,
            lhs: Box::new(expr(ExprKind::Literal(Value::Int(1)))),
            rhs: Box::new(expr(ExprKind::Literal(Value::Int(2)))),
        })))];
        let code = lower_module(&stmts).unwrap();
        assert!(matches!(code.insts[0], Inst::Load { dst: 0, .. }));
        assert!(matches!(code.insts[1], Inst::Load { dst: 1, .. }));
        assert!(matches!(
            code.insts[2],
            Inst::Oper {
                dst: 0,
                lhs: 0,
                rhs: 1,
                op: BinOp::Add
            }
        ));
        assert_eq!(code.max_reg, 1);
    }

    #[test]
    fn if_branches_share_one_end_label() {
        let cond = expr(ExprKind::Literal(Value::Bool(true)));
        let stmts = vec![stmt(StmtKind::If {
            cond: cond.clone(),
            then: vec![stmt(StmtKind::Expr(expr(ExprKind::Literal(Value::Int(1)))))],
            elifs: vec![(cond, vec![stmt(StmtKind::None)])],
            els: vec![stmt(StmtKind::Expr(expr(ExprKind::Literal(Value::Int(3)))))],
        })];
        let code = lower_module(&stmts).unwrap();
        let jumps: Vec<_> = code
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::Jmp { to } => Some(*to),
                _ => None,
            })
            .collect();
        // then-branch and elseif-branch both jump to the same end label
        assert_eq!(jumps.len(), 2);
        assert_eq!(jumps[0], jumps[1]);
        assert!(code.labels_resolved());
    }

    #[test]
    fn try_body_runs_one_register_up() {
        let stmts = vec![stmt(StmtKind::Try {
            body: vec![stmt(StmtKind::Expr(expr(ExprKind::Literal(Value::Int(1)))))],
            catch: vec![],
        })];
        let code = lower_module(&stmts).unwrap();
        assert!(matches!(code.insts[0], Inst::Try { err: 0, .. }));
        assert!(matches!(code.insts[1], Inst::Load { dst: 1, .. }));
        assert!(matches!(code.insts[3], Inst::Catch { err: 0, .. }));
        assert!(matches!(code.insts.last(), Some(Inst::PopTry { .. })));
    }

    #[test]
    fn swap_evaluates_sources_before_assigning() {
        let a = names::intern("а");
        let bb = names::intern("б");
        let stmts = vec![stmt(StmtKind::Lets {
            lhss: vec![expr(ExprKind::Ident(a)), expr(ExprKind::Ident(bb))],
            rhss: vec![expr(ExprKind::Ident(bb)), expr(ExprKind::Ident(a))],
        })];
        let code = lower_module(&stmts).unwrap();
        assert!(matches!(code.insts[0], Inst::Get { dst: 0, .. }));
        assert!(matches!(code.insts[1], Inst::Get { dst: 1, .. }));
        assert!(matches!(code.insts[2], Inst::Set { src: 0, .. }));
        assert!(matches!(code.insts[3], Inst::Set { src: 1, .. }));
    }

    #[test]
    fn select_requires_channel_expressions() {
        let stmts = vec![stmt(StmtKind::Select {
            cases: vec![stmt(StmtKind::Case {
                expr: expr(ExprKind::Literal(Value::Int(1))),
                body: vec![],
            })],
        })];
        let err = lower_module(&stmts).unwrap_err();
        assert!(err.message.contains("каналами"));
    }

    #[test]
    fn nested_function_labels_stay_unique() {
        let inner = expr(ExprKind::Func {
            name: Some(names::intern("ф")),
            params: vec![],
            variadic: false,
            body: vec![stmt(StmtKind::Loop {
                cond: expr(ExprKind::Literal(Value::Bool(false))),
                body: vec![],
            })],
        });
        let stmts = vec![
            stmt(StmtKind::Loop {
                cond: expr(ExprKind::Literal(Value::Bool(false))),
                body: vec![],
            }),
            stmt(StmtKind::Expr(inner)),
        ];
        let code = lower_module(&stmts).unwrap();
        let Some(Inst::MakeFunc { code: inner_code, .. }) = code
            .insts
            .iter()
            .find(|i| matches!(i, Inst::MakeFunc { .. }))
        else {
            panic!("expected MakeFunc");
        };
        let outer_labels: Vec<u32> = code
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::Label { id } => Some(id.0),
                _ => None,
            })
            .collect();
        let inner_labels: Vec<u32> = inner_code
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::Label { id } => Some(id.0),
                _ => None,
            })
            .collect();
        for l in &inner_labels {
            assert!(!outer_labels.contains(l), "label {l} reused across blocks");
        }
    }
}
