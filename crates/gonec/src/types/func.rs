//! Script closures and the native call ABI.
//!
//! A native function receives an ordered argument window and fills an output
//! sequence; returning an error behaves exactly like a `THROW` at the call
//! site. Arity wrappers validate argument counts and types before the wrapped
//! function runs, producing the interpreter's standard argument errors.

use std::sync::Arc;

use crate::{
    bytecode::inst::Code,
    env::Env,
    error::{RunResult, RuntimeError},
    names::NameId,
    types::{chan::VmChan, decimal::Decimal, map::VmMap, slice::VmSlice, time::VmTime},
    value::{Value, VmStr},
};

/// A first-class function value.
#[derive(Clone)]
pub struct VmFunc(pub Arc<FuncValue>);

pub enum FuncValue {
    Script(ScriptFunc),
    Native(NativeFunc),
}

/// A closure: code plus the environment captured at creation.
pub struct ScriptFunc {
    pub name: Option<NameId>,
    pub params: Arc<[NameId]>,
    pub variadic: bool,
    pub code: Arc<Code>,
    pub env: Env,
}

type NativeFn = dyn Fn(&[Value], &mut Vec<Value>) -> RunResult<()> + Send + Sync;

/// A host-provided callable obeying the `(args, rets) -> error` contract.
#[derive(Clone)]
pub struct NativeFunc(Arc<NativeFn>);

impl NativeFunc {
    pub fn new(f: impl Fn(&[Value], &mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value], rets: &mut Vec<Value>) -> RunResult<()> {
        (self.0)(args, rets)
    }

    /// Wraps a function taking no arguments.
    pub fn zero(f: impl Fn(&mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static) -> Self {
        Self::new(move |args, rets| {
            if !args.is_empty() {
                return Err(RuntimeError::no_args_needed());
            }
            f(rets)
        })
    }

    /// Wraps a function taking exactly `n` arguments of any type.
    pub fn fixed(n: usize, f: impl Fn(&[Value], &mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static) -> Self {
        Self::with_optionals(n, 0, f)
    }

    /// Wraps a function taking at least `nreq` arguments and at most
    /// `nreq + nopt`.
    pub fn with_optionals(
        nreq: usize,
        nopt: usize,
        f: impl Fn(&[Value], &mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |args, rets| {
            if args.len() < nreq {
                Err(RuntimeError::need_args(nreq))
            } else if args.len() > nreq + nopt {
                Err(RuntimeError::max_args(nreq + nopt))
            } else {
                f(args, rets)
            }
        })
    }

    /// Wraps a function taking one typed argument.
    pub fn one<A: FromValue>(f: impl Fn(A, &mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static) -> Self {
        Self::new(move |args, rets| {
            if args.len() != 1 {
                return Err(RuntimeError::need_args(1));
            }
            let a = A::from_value(&args[0]).ok_or_else(|| arg_type_error::<A>(0, 1))?;
            f(a, rets)
        })
    }

    /// Wraps a function taking two typed arguments.
    pub fn two<A: FromValue, B: FromValue>(
        f: impl Fn(A, B, &mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |args, rets| {
            if args.len() != 2 {
                return Err(RuntimeError::need_args(2));
            }
            let a = A::from_value(&args[0]).ok_or_else(|| arg_type_error::<A>(0, 2))?;
            let b = B::from_value(&args[1]).ok_or_else(|| arg_type_error::<B>(1, 2))?;
            f(a, b, rets)
        })
    }
}

const ARG_INDEX_WORDS: [&str; 3] = ["Первым", "Вторым", "Третьим"];

fn arg_type_error<A: FromValue>(index: usize, total: usize) -> RuntimeError {
    if total == 1 {
        RuntimeError::need_type(A::TYPE_NAME)
    } else {
        RuntimeError::new(
            crate::error::ErrKind::NeedType,
            format!(
                "{} параметром требуется значение типа {}",
                ARG_INDEX_WORDS.get(index).copied().unwrap_or("Очередным"),
                A::TYPE_NAME
            ),
        )
    }
}

/// Extraction of a typed view from an argument value.
pub trait FromValue: Sized {
    const TYPE_NAME: &'static str;
    fn from_value(v: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "ЦелоеЧисло";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "Булево";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for VmStr {
    const TYPE_NAME: &'static str = "Строка";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Decimal {
    const TYPE_NAME: &'static str = "Число";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Decimal(d) => Some(d.clone()),
            Value::Int(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }
}

impl FromValue for VmTime {
    const TYPE_NAME: &'static str = "Дата";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl FromValue for VmSlice {
    const TYPE_NAME: &'static str = "Массив";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Slice(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for VmMap {
    const TYPE_NAME: &'static str = "Структура";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Map(m) => Some(m.clone()),
            _ => None,
        }
    }
}

impl FromValue for VmChan {
    const TYPE_NAME: &'static str = "Канал";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Chan(c) => Some(c.clone()),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const TYPE_NAME: &'static str = "Произвольный";
    fn from_value(v: &Value) -> Option<Self> {
        Some(v.clone())
    }
}

/// Folds a native function's output sequence into the call result.
#[must_use]
pub fn rets_to_value(mut rets: Vec<Value>) -> Value {
    match rets.len() {
        0 => Value::Nil,
        1 => rets.swap_remove(0),
        _ => Value::Slice(VmSlice::from_values(rets)),
    }
}

impl std::fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script(s) => write!(f, "ScriptFunc(params={}, variadic={})", s.params.len(), s.variadic),
            Self::Native(_) => f.write_str("NativeFunc"),
        }
    }
}
