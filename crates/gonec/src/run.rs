//! Host entry points: simplify, lower, execute.

use std::sync::Arc;

use crate::{
    ast::{self, Stmt},
    bytecode::inst::Code,
    env::Env,
    error::{GonecError, LowerResult},
    lower, sched,
    value::Value,
};

/// Lowers a module body to bytecode without executing it.
///
/// Runs the constant-folding pre-pass first, so the produced code matches
/// what [`run`] would execute.
pub fn compile(mut stmts: Vec<Stmt>) -> LowerResult<Arc<Code>> {
    ast::simplify(&mut stmts);
    lower::lower_module(&stmts)
}

/// Runs a module body in the given environment.
///
/// Either returns normally with the value of a top-level `Возврат` (Nil when
/// absent) or yields exactly one propagated error, never both. Spawned tasks
/// that are still pending when the root task completes are dropped.
pub fn run(stmts: Vec<Stmt>, env: &Env) -> Result<Value, GonecError> {
    let code = compile(stmts)?;
    Ok(sched::run_code(code, env)?)
}

/// Runs an already-lowered code block, e.g. one restored through
/// [`Code::decode`].
pub fn run_compiled(code: Arc<Code>, env: &Env) -> Result<Value, GonecError> {
    Ok(sched::run_code(code, env)?)
}
