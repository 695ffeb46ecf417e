//! Tagged dynamic values and their operator rules.
//!
//! Every value answers its type tag, truthiness, string form, deep equality,
//! binary/unary operator dispatch and conversion. Sequences, mappings, channels,
//! functions and host objects are reference-shared; scalars have value
//! semantics. Operator combinations outside the defined table fail with
//! `IncorrectOperation`, unknown pairings with `UnknownOperation` — positions
//! are attached later by the VM dispatch loop.

use std::{
    cmp::Ordering,
    hash::{BuildHasher, Hasher},
    sync::{Arc, LazyLock},
};

use num_bigint::BigInt;
use strum::{Display, FromRepr};

use crate::{
    env::Env,
    error::{ErrKind, RunResult, RuntimeError},
    names::{self, NameId},
    types::{
        chan::VmChan,
        decimal::Decimal,
        func::{FuncValue, NativeFunc, VmFunc},
        map::{self, VmMap},
        object::{HostTypeDef, VmObject},
        slice::{self, VmSlice},
        time::{VmDuration, VmTime},
        waitgroup::VmWaitGroup,
    },
};

/// Immutable shared string payload.
pub type VmStr = Arc<str>;

/// Binary operations understood by `OPER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Quo,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "=")]
    Eql,
    #[strum(serialize = "<>")]
    Neq,
    #[strum(serialize = ">")]
    Gtr,
    #[strum(serialize = ">=")]
    Geq,
    #[strum(serialize = "<")]
    Lss,
    #[strum(serialize = "<=")]
    Leq,
    #[strum(serialize = "|")]
    Or,
    #[strum(serialize = "||")]
    Lor,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "&&")]
    Land,
    #[strum(serialize = "^")]
    Pow,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "<<")]
    Shl,
}

/// Unary operations understood by `UNARY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum UnOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "^")]
    BitNot,
}

/// Type tags for the core value variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum TypeTag {
    Nil,
    Bool,
    Int,
    Decimal,
    String,
    Time,
    Duration,
    Slice,
    Map,
    Chan,
    Func,
    Object,
    Module,
    WaitGroup,
}

impl TypeTag {
    /// Human-readable type name as exposed to scripts.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "Неопределено",
            Self::Bool => "Булево",
            Self::Int => "ЦелоеЧисло",
            Self::Decimal => "Число",
            Self::String => "Строка",
            Self::Time => "Дата",
            Self::Duration => "Длительность",
            Self::Slice => "Массив",
            Self::Map => "Структура",
            Self::Chan => "Канал",
            Self::Func => "Функция",
            Self::Object => "Объект",
            Self::Module => "Модуль",
            Self::WaitGroup => "ГруппаОжидания",
        }
    }
}

/// A type descriptor bound in an environment, used by `Новый` and conversion.
#[derive(Clone)]
pub enum TypeDef {
    Core(TypeTag),
    Host(Arc<HostTypeDef>),
}

impl std::fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(tag) => write!(f, "TypeDef::Core({})", tag.name()),
            Self::Host(def) => write!(f, "TypeDef::Host({})", def.name()),
        }
    }
}

impl TypeDef {
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Core(tag) => tag.name().to_string(),
            Self::Host(def) => def.name().to_string(),
        }
    }

    /// Creates an instance of the described type from constructor arguments.
    ///
    /// Core types accept zero arguments (default value) or one argument
    /// (conversion); channels additionally accept a capacity.
    pub fn new_instance(&self, args: &[Value]) -> RunResult<Value> {
        match self {
            Self::Host(def) => crate::types::object::new_instance(def, args),
            Self::Core(TypeTag::Chan) => match args {
                [] => Ok(Value::Chan(VmChan::new(0))),
                [Value::Int(cap)] => {
                    let cap = usize::try_from(*cap).map_err(|_| RuntimeError::need_type(TypeTag::Int.name()))?;
                    Ok(Value::Chan(VmChan::new(cap)))
                }
                _ => Err(RuntimeError::need_type(TypeTag::Int.name())),
            },
            Self::Core(TypeTag::WaitGroup) => match args {
                [] => Ok(Value::WaitGroup(VmWaitGroup::new())),
                _ => Err(RuntimeError::no_args_needed()),
            },
            Self::Core(tag) => match args {
                [] => Ok(Value::default_of(*tag)),
                [arg] => arg.convert_to_tag(*tag),
                _ => Err(RuntimeError::max_args(1)),
            },
        }
    }
}

/// Primary dynamic value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    String(VmStr),
    Time(VmTime),
    Duration(VmDuration),
    Slice(VmSlice),
    Map(VmMap),
    Chan(VmChan),
    Func(VmFunc),
    Object(VmObject),
    Module(VmModule),
    WaitGroup(VmWaitGroup),
}

/// A named, sealed environment produced by executing a module body.
#[derive(Clone)]
pub struct VmModule {
    pub name: NameId,
    pub env: Env,
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nil => f.write_str("Nil"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Decimal(v) => write!(f, "Decimal({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Time(v) => write!(f, "Time({v})"),
            Self::Duration(v) => write!(f, "Duration({v})"),
            Self::Slice(v) => write!(f, "Slice(len={})", v.len()),
            Self::Map(v) => write!(f, "Map(len={})", v.len()),
            Self::Chan(v) => write!(f, "Chan(cap={})", v.capacity()),
            Self::Func(_) => f.write_str("Func"),
            Self::Object(v) => write!(f, "Object({})", v.type_name()),
            Self::Module(m) => write!(f, "Module({})", names::original(m.name)),
            Self::WaitGroup(_) => f.write_str("WaitGroup"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v.as_str()))
    }
}

impl Value {
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Nil => TypeTag::Nil,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Decimal(_) => TypeTag::Decimal,
            Self::String(_) => TypeTag::String,
            Self::Time(_) => TypeTag::Time,
            Self::Duration(_) => TypeTag::Duration,
            Self::Slice(_) => TypeTag::Slice,
            Self::Map(_) => TypeTag::Map,
            Self::Chan(_) => TypeTag::Chan,
            Self::Func(_) => TypeTag::Func,
            Self::Object(_) => TypeTag::Object,
            Self::Module(_) => TypeTag::Module,
            Self::WaitGroup(_) => TypeTag::WaitGroup,
        }
    }

    /// Script-visible type name; host objects report their registered name.
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Object(obj) => obj.type_name().to_string(),
            other => other.type_tag().name().to_string(),
        }
    }

    /// Default value for a core type tag.
    #[must_use]
    pub fn default_of(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Nil => Self::Nil,
            TypeTag::Bool => Self::Bool(false),
            TypeTag::Int => Self::Int(0),
            TypeTag::Decimal => Self::Decimal(Decimal::zero()),
            TypeTag::String => Self::from(""),
            TypeTag::Time => Self::Time(VmTime::epoch()),
            TypeTag::Duration => Self::Duration(VmDuration::new(0)),
            TypeTag::Slice => Self::Slice(VmSlice::default()),
            TypeTag::Map => Self::Map(VmMap::default()),
            TypeTag::Chan => Self::Chan(VmChan::new(0)),
            TypeTag::WaitGroup => Self::WaitGroup(VmWaitGroup::new()),
            TypeTag::Func | TypeTag::Object | TypeTag::Module => Self::Nil,
        }
    }

    /// Truthiness used by conditional jumps.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Bool(v) => *v,
            Self::Int(v) => *v != 0,
            Self::Decimal(v) => !v.is_zero(),
            Self::String(v) => !v.is_empty(),
            _ => true,
        }
    }

    /// String form: scalars print directly, sequences and mappings serialize
    /// to JSON (cycles are rejected).
    pub fn display_string(&self) -> RunResult<String> {
        match self {
            Self::Nil => Ok("Неопределено".to_string()),
            Self::Bool(v) => Ok(if *v { "Истина" } else { "Ложь" }.to_string()),
            Self::Int(v) => Ok(v.to_string()),
            Self::Decimal(v) => Ok(v.to_string()),
            Self::String(v) => Ok(v.to_string()),
            Self::Time(v) => Ok(v.to_string()),
            Self::Duration(v) => Ok(v.to_string()),
            Self::Slice(_) | Self::Map(_) => crate::json::to_json_string(self),
            Self::Chan(_) => Ok("Канал".to_string()),
            Self::Func(_) => Ok("[Функция]".to_string()),
            Self::Object(obj) => Ok(format!("[{}]", obj.type_name())),
            Self::Module(m) => Ok(format!("[Модуль {}]", names::original(m.name))),
            Self::WaitGroup(_) => Ok("Группа ожидания".to_string()),
        }
    }

    /// Deep equality: element-wise for sequences, key-wise for mappings, by
    /// value for scalars (Int and Decimal compare numerically), by identity
    /// for channels, functions, objects and modules.
    #[must_use]
    pub fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Int(a), Self::Decimal(b)) => &Decimal::from(*a) == b,
            (Self::Decimal(a), Self::Int(b)) => a == &Decimal::from(*b),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::Slice(a), Self::Slice(b)) => a.deep_eq(b),
            (Self::Map(a), Self::Map(b)) => a.deep_eq(b),
            (Self::Chan(a), Self::Chan(b)) => a.same(b),
            (Self::Func(a), Self::Func(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Self::Object(a), Self::Object(b)) => a.same(b),
            (Self::Module(a), Self::Module(b)) => a.env.same(&b.env),
            (Self::WaitGroup(a), Self::WaitGroup(b)) => a.same(b),
            _ => false,
        }
    }

    /// Total order used by sequence sorting: Nil first, then numbers,
    /// durations, dates, strings, booleans, everything else last.
    #[must_use]
    pub fn sort_less(&self, other: &Self) -> bool {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Nil => 0,
                Value::Int(_) | Value::Decimal(_) => 1,
                Value::Duration(_) => 2,
                Value::Time(_) => 3,
                Value::String(_) => 4,
                Value::Bool(_) => 5,
                _ => 6,
            }
        }
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a < b,
            (Self::Decimal(a), Self::Decimal(b)) => a < b,
            (Self::Int(a), Self::Decimal(b)) => &Decimal::from(*a) < b,
            (Self::Decimal(a), Self::Int(b)) => a < &Decimal::from(*b),
            (Self::Duration(a), Self::Duration(b)) => a < b,
            (Self::Time(a), Self::Time(b)) => a < b,
            (Self::String(a), Self::String(b)) => a < b,
            (Self::Bool(a), Self::Bool(b)) => !a & b,
            _ => rank(self) < rank(other),
        }
    }

    fn ordering(&self, op: BinOp, other: &Self) -> RunResult<Ordering> {
        let ord = match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Decimal(a), Self::Decimal(b)) => a.cmp(b),
            (Self::Int(a), Self::Decimal(b)) => Decimal::from(*a).cmp(b),
            (Self::Decimal(a), Self::Int(b)) => a.cmp(&Decimal::from(*b)),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::Duration(a), Self::Duration(b)) => a.cmp(b),
            _ => {
                return Err(RuntimeError::new(
                    ErrKind::IncorrectOperation,
                    format!(
                        "Операция {op} невозможна между {} и {}",
                        self.type_name(),
                        other.type_name()
                    ),
                ));
            }
        };
        Ok(ord)
    }

    /// Binary operator dispatch.
    pub fn eval_binop(&self, op: BinOp, other: &Self) -> RunResult<Value> {
        match op {
            BinOp::Eql => return Ok(Self::Bool(self.deep_eq(other))),
            BinOp::Neq => return Ok(Self::Bool(!self.deep_eq(other))),
            BinOp::Gtr => return Ok(Self::Bool(self.ordering(op, other)? == Ordering::Greater)),
            BinOp::Geq => return Ok(Self::Bool(self.ordering(op, other)? != Ordering::Less)),
            BinOp::Lss => return Ok(Self::Bool(self.ordering(op, other)? == Ordering::Less)),
            BinOp::Leq => return Ok(Self::Bool(self.ordering(op, other)? != Ordering::Greater)),
            _ => {}
        }
        match self {
            Self::Int(a) => int_binop(*a, op, other),
            Self::Decimal(a) => decimal_binop(a, op, other),
            Self::Bool(a) => bool_binop(*a, op, other),
            Self::String(a) => string_binop(a, op, other),
            Self::Time(a) => time_binop(*a, op, other),
            Self::Duration(a) => duration_binop(*a, op, other),
            Self::Slice(a) => slice::binop(a, op, other),
            Self::Map(a) => map::binop(a, op, other),
            _ => Err(RuntimeError::incorrect_operation()),
        }
    }

    /// Unary operator dispatch.
    pub fn eval_unop(&self, op: UnOp) -> RunResult<Value> {
        match (op, self) {
            (UnOp::Neg, Self::Int(v)) => Ok(v
                .checked_neg()
                .map_or_else(|| Self::Decimal(Decimal::from(*v).neg()), Self::Int)),
            (UnOp::Neg, Self::Decimal(v)) => Ok(Self::Decimal(v.neg())),
            (UnOp::Neg, Self::Duration(v)) => Ok(Self::Duration(v.neg())),
            (UnOp::Not, Self::Bool(v)) => Ok(Self::Bool(!v)),
            (UnOp::BitNot, Self::Int(v)) => Ok(Self::Int(!v)),
            _ => Err(RuntimeError::incorrect_operation()),
        }
    }

    /// Conversion into a core type.
    pub fn convert_to_tag(&self, tag: TypeTag) -> RunResult<Value> {
        if self.type_tag() == tag {
            return Ok(self.clone());
        }
        match tag {
            TypeTag::String => Ok(Self::from(self.display_string()?)),
            TypeTag::Int => match self {
                Self::Decimal(d) => d.to_i64().map(Self::Int).ok_or_else(RuntimeError::not_converted),
                Self::Bool(b) => Ok(Self::Int(i64::from(*b))),
                Self::String(s) => s.trim().parse::<i64>().map(Self::Int).map_err(|_| RuntimeError::not_converted()),
                Self::Duration(d) => Ok(Self::Int(d.nanos())),
                _ => Err(RuntimeError::not_converted()),
            },
            TypeTag::Decimal => match self {
                Self::Int(v) => Ok(Self::Decimal(Decimal::from(*v))),
                Self::String(s) => s.parse::<Decimal>().map(Self::Decimal),
                _ => Err(RuntimeError::not_converted()),
            },
            TypeTag::Bool => match self {
                Self::Int(v) => Ok(Self::Bool(*v != 0)),
                _ => Err(RuntimeError::not_converted()),
            },
            TypeTag::Slice => match self {
                Self::String(s) => match crate::json::from_json_str(s)? {
                    v @ Self::Slice(_) => Ok(v),
                    _ => Err(RuntimeError::not_converted()),
                },
                _ => Err(RuntimeError::not_converted()),
            },
            TypeTag::Map => match self {
                Self::String(s) => match crate::json::from_json_str(s)? {
                    v @ Self::Map(_) => Ok(v),
                    _ => Err(RuntimeError::not_converted()),
                },
                _ => Err(RuntimeError::not_converted()),
            },
            TypeTag::Time => match self {
                Self::String(s) => s.parse::<VmTime>().map(Self::Time),
                _ => Err(RuntimeError::not_converted()),
            },
            TypeTag::Duration => match self {
                Self::Int(v) => Ok(Self::Duration(VmDuration::new(*v))),
                _ => Err(RuntimeError::not_converted()),
            },
            _ => Err(RuntimeError::not_converted()),
        }
    }

    /// Indexed read. Sequence and string indices are 1-based at the language
    /// surface; mapping keys go through the string form of the index value.
    pub fn index_get(&self, idx: &Self) -> RunResult<Value> {
        match self {
            Self::Slice(s) => {
                let i = surface_index(idx)?;
                s.get(i).ok_or_else(RuntimeError::index_out_of_bounds)
            }
            Self::Map(m) => Ok(m.get(&idx.display_string()?).unwrap_or(Self::Nil)),
            Self::String(s) => {
                let i = surface_index(idx)?;
                s.chars()
                    .nth(i)
                    .map(|c| Self::from(c.to_string()))
                    .ok_or_else(RuntimeError::index_out_of_bounds)
            }
            _ => Err(RuntimeError::incorrect_operation()),
        }
    }

    /// Indexed write into sequences and mappings.
    pub fn index_set(&self, idx: &Self, val: Value) -> RunResult<()> {
        match self {
            Self::Slice(s) => {
                let i = surface_index(idx)?;
                s.set(i, val)
            }
            Self::Map(m) => {
                m.set(&idx.display_string()?, val);
                Ok(())
            }
            _ => Err(RuntimeError::incorrect_operation()),
        }
    }

    /// Member read: mapping keys, then per-type methods, then `NotDefined`.
    pub fn member_get(&self, name: NameId) -> RunResult<Value> {
        match self {
            Self::Map(m) => {
                if let Some(v) = m.get_by_name(name) {
                    return Ok(v);
                }
                // A missing key reads as Nil, like indexed access.
                Ok(map::method(m, name).map_or(Self::Nil, native_value))
            }
            Self::Slice(s) => slice::method(s, name)
                .map(native_value)
                .ok_or_else(RuntimeError::not_defined),
            Self::Chan(c) => crate::types::chan::method(c, name)
                .map(native_value)
                .ok_or_else(RuntimeError::not_defined),
            Self::WaitGroup(w) => crate::types::waitgroup::method(w, name)
                .map(native_value)
                .ok_or_else(RuntimeError::not_defined),
            Self::Object(obj) => obj.member(name),
            Self::Module(m) => m.env.get_local(name).ok_or_else(RuntimeError::not_defined),
            _ => Err(RuntimeError::not_defined()),
        }
    }

    /// Member write: mapping keys, host object fields, module bindings.
    pub fn member_set(&self, name: NameId, val: Value) -> RunResult<()> {
        match self {
            Self::Map(m) => {
                m.set_by_name(name, val);
                Ok(())
            }
            Self::Object(obj) => obj.set_member(name, val),
            Self::Module(m) => {
                m.env.define(name, val);
                Ok(())
            }
            _ => Err(RuntimeError::incorrect_operation()),
        }
    }

    /// Process-seeded hash rendered as a fixed-width hex string.
    ///
    /// Stable within a process only; the seed is process-local.
    pub fn hash_hex(&self) -> RunResult<String> {
        static SEED: LazyLock<std::hash::RandomState> = LazyLock::new(std::hash::RandomState::new);
        let bytes = crate::binary::marshal(self)?;
        let mut hasher = SEED.build_hasher();
        hasher.write(&bytes);
        Ok(format!("{:016x}", hasher.finish()))
    }

    /// Recursive copy across nested sequences and mappings; other values are
    /// shared as-is.
    #[must_use]
    pub fn copy_recursive(&self) -> Value {
        match self {
            Self::Slice(s) => Self::Slice(s.copy_recursive()),
            Self::Map(m) => Self::Map(m.copy_recursive()),
            other => other.clone(),
        }
    }

    /// Element count of indexable values: sequences, mappings and strings
    /// (counted in runes).
    #[must_use]
    pub fn length(&self) -> Option<i64> {
        match self {
            Self::Slice(s) => Some(s.len() as i64),
            Self::Map(m) => Some(m.len() as i64),
            Self::String(s) => Some(s.chars().count() as i64),
            _ => None,
        }
    }

    /// Numeric view of a string: an Int unless the text carries a fraction or
    /// exponent, in which case a Decimal. Numbers pass through unchanged.
    pub fn invoke_number(&self) -> RunResult<Value> {
        match self {
            Self::Int(_) | Self::Decimal(_) => Ok(self.clone()),
            Self::String(s) => {
                if s.contains(['.', 'e', 'E']) {
                    s.parse::<Decimal>().map(Self::Decimal)
                } else {
                    s.trim()
                        .parse::<i64>()
                        .map(Self::Int)
                        .map_err(|_| RuntimeError::not_converted())
                }
            }
            _ => Err(RuntimeError::need_type(TypeTag::Decimal.name())),
        }
    }
}

fn native_value(f: NativeFunc) -> Value {
    Value::Func(VmFunc(Arc::new(FuncValue::Native(f))))
}

/// Converts a 1-based surface index into the internal 0-based form.
fn surface_index(idx: &Value) -> RunResult<usize> {
    match idx {
        Value::Int(i) if *i >= 1 => Ok(usize::try_from(*i - 1).map_err(|_| RuntimeError::index_out_of_bounds())?),
        Value::Int(_) => Err(RuntimeError::index_out_of_bounds()),
        _ => Err(RuntimeError::need_type(TypeTag::Int.name())),
    }
}

fn int_binop(a: i64, op: BinOp, other: &Value) -> RunResult<Value> {
    match (op, other) {
        // Int stays Int except on overflow, which promotes to Decimal.
        (BinOp::Add, Value::Int(b)) => Ok(promote(a.checked_add(*b), a, *b, BinOp::Add)),
        (BinOp::Sub, Value::Int(b)) => Ok(promote(a.checked_sub(*b), a, *b, BinOp::Sub)),
        (BinOp::Mul, Value::Int(b)) => Ok(promote(a.checked_mul(*b), a, *b, BinOp::Mul)),
        (BinOp::Quo, Value::Int(0)) => Err(RuntimeError::new(ErrKind::IncorrectOperation, "Деление на ноль")),
        (BinOp::Quo, Value::Int(b)) => Ok(promote(a.checked_div(*b), a, *b, BinOp::Quo)),
        (BinOp::Rem, Value::Int(0)) => Err(RuntimeError::new(ErrKind::IncorrectOperation, "Деление на ноль")),
        (BinOp::Rem, Value::Int(b)) => Ok(Value::Int(a.wrapping_rem(*b))),
        (BinOp::Pow, Value::Int(b)) => int_pow(a, *b),
        (BinOp::Shl, Value::Int(b)) => shift(a, *b, true),
        (BinOp::Shr, Value::Int(b)) => shift(a, *b, false),
        (BinOp::And, Value::Int(b)) => Ok(Value::Int(a & b)),
        (BinOp::Or, Value::Int(b)) => Ok(Value::Int(a | b)),
        (BinOp::Add, Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(a).add(b))),
        (BinOp::Sub, Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(a).sub(b))),
        (BinOp::Mul, Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(a).mul(b))),
        (BinOp::Quo, Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(a).div(b)?)),
        (BinOp::Rem, Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(a).rem(b)?)),
        (
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Quo
            | BinOp::Rem
            | BinOp::Pow
            | BinOp::Shl
            | BinOp::Shr
            | BinOp::And
            | BinOp::Or,
            _,
        ) => Err(RuntimeError::incorrect_operation()),
        _ => Err(RuntimeError::unknown_operation()),
    }
}

/// Falls back to exact Decimal arithmetic when the i64 operation overflows.
fn promote(checked: Option<i64>, a: i64, b: i64, op: BinOp) -> Value {
    match checked {
        Some(v) => Value::Int(v),
        None => {
            let (a, b) = (Decimal::from(a), Decimal::from(b));
            let d = match op {
                BinOp::Add => a.add(&b),
                BinOp::Sub => a.sub(&b),
                BinOp::Mul => a.mul(&b),
                // checked_div only fails for i64::MIN / -1
                _ => Decimal::from(i64::MIN).neg(),
            };
            Value::Decimal(d)
        }
    }
}

fn int_pow(a: i64, b: i64) -> RunResult<Value> {
    if b < 0 {
        return Ok(Value::Decimal(Decimal::from(a).powi(b)?));
    }
    match u32::try_from(b).ok().and_then(|e| a.checked_pow(e)) {
        Some(v) => Ok(Value::Int(v)),
        None => {
            let exp = u32::try_from(b).map_err(|_| RuntimeError::incorrect_operation())?;
            Ok(Value::Decimal(Decimal::new(BigInt::from(a).pow(exp), 0)))
        }
    }
}

fn shift(a: i64, b: i64, left: bool) -> RunResult<Value> {
    let amount = u32::try_from(b).map_err(|_| RuntimeError::incorrect_operation())?;
    let shifted = if left { a.checked_shl(amount) } else { a.checked_shr(amount) };
    shifted.map(Value::Int).ok_or_else(RuntimeError::incorrect_operation)
}

fn decimal_binop(a: &Decimal, op: BinOp, other: &Value) -> RunResult<Value> {
    let b = match other {
        Value::Decimal(b) => b.clone(),
        Value::Int(b) => Decimal::from(*b),
        _ => return Err(RuntimeError::incorrect_operation()),
    };
    match op {
        BinOp::Add => Ok(Value::Decimal(a.add(&b))),
        BinOp::Sub => Ok(Value::Decimal(a.sub(&b))),
        BinOp::Mul => Ok(Value::Decimal(a.mul(&b))),
        BinOp::Quo => Ok(Value::Decimal(a.div(&b)?)),
        BinOp::Rem => Ok(Value::Decimal(a.rem(&b)?)),
        BinOp::Pow => match other {
            Value::Int(e) => Ok(Value::Decimal(a.powi(*e)?)),
            _ => Err(RuntimeError::incorrect_operation()),
        },
        BinOp::Shl | BinOp::Shr | BinOp::And | BinOp::Or | BinOp::Land | BinOp::Lor => {
            Err(RuntimeError::incorrect_operation())
        }
        _ => Err(RuntimeError::unknown_operation()),
    }
}

fn bool_binop(a: bool, op: BinOp, other: &Value) -> RunResult<Value> {
    match (op, other) {
        (BinOp::Land, Value::Bool(b)) => Ok(Value::Bool(a && *b)),
        (BinOp::Lor, Value::Bool(b)) => Ok(Value::Bool(a || *b)),
        (BinOp::Land | BinOp::Lor, _) => Err(RuntimeError::incorrect_operation()),
        _ => Err(RuntimeError::unknown_operation()),
    }
}

fn string_binop(a: &VmStr, op: BinOp, other: &Value) -> RunResult<Value> {
    match op {
        // String + anything concatenates through the string form.
        BinOp::Add => {
            let mut s = a.to_string();
            s.push_str(&other.display_string()?);
            Ok(Value::from(s))
        }
        BinOp::Sub | BinOp::Mul | BinOp::Quo | BinOp::Rem | BinOp::Pow | BinOp::Shl | BinOp::Shr | BinOp::And
        | BinOp::Or | BinOp::Land | BinOp::Lor => Err(RuntimeError::incorrect_operation()),
        _ => Err(RuntimeError::unknown_operation()),
    }
}

fn time_binop(a: VmTime, op: BinOp, other: &Value) -> RunResult<Value> {
    match (op, other) {
        (BinOp::Add, Value::Duration(d)) => Ok(Value::Time(a.add_duration(*d)?)),
        (BinOp::Sub, Value::Duration(d)) => Ok(Value::Time(a.sub_duration(*d)?)),
        (BinOp::Sub, Value::Time(b)) => Ok(Value::Duration(a.sub_time(b))),
        (BinOp::Add | BinOp::Sub, _) => Err(RuntimeError::incorrect_operation()),
        _ => Err(RuntimeError::unknown_operation()),
    }
}

fn duration_binop(a: VmDuration, op: BinOp, other: &Value) -> RunResult<Value> {
    match (op, other) {
        (BinOp::Add, Value::Duration(b)) => Ok(Value::Duration(a.add(*b)?)),
        (BinOp::Sub, Value::Duration(b)) => Ok(Value::Duration(a.sub(*b)?)),
        (BinOp::Add, Value::Time(t)) => Ok(Value::Time(t.add_duration(a)?)),
        (BinOp::Add | BinOp::Sub, _) => Err(RuntimeError::incorrect_operation()),
        _ => Err(RuntimeError::unknown_operation()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn int_overflow_promotes_to_decimal() {
        let v = Value::Int(i64::MAX).eval_binop(BinOp::Add, &Value::Int(1)).unwrap();
        match v {
            Value::Decimal(d) => assert_eq!(d.to_string(), "9223372036854775808"),
            other => panic!("expected Decimal, got {other:?}"),
        }
    }

    #[test]
    fn int_division_truncates() {
        let v = Value::Int(7).eval_binop(BinOp::Quo, &Value::Int(2)).unwrap();
        assert!(v.deep_eq(&Value::Int(3)));
        assert!(Value::Int(1).eval_binop(BinOp::Quo, &Value::Int(0)).is_err());
    }

    #[test]
    fn mixed_numeric_comparison_upcasts() {
        let v = Value::Int(1)
            .eval_binop(BinOp::Lss, &Value::Decimal("1.5".parse().unwrap()))
            .unwrap();
        assert!(v.truthy());
    }

    #[test]
    fn string_concat_converts_rhs() {
        let v = Value::from("n=").eval_binop(BinOp::Add, &Value::Int(5)).unwrap();
        assert_eq!(v.display_string().unwrap(), "n=5");
    }

    #[test]
    fn unknown_pairings_fail_with_kind() {
        let err = Value::Bool(true).eval_binop(BinOp::Add, &Value::Bool(false)).unwrap_err();
        assert_eq!(err.kind, ErrKind::UnknownOperation);
        let err = Value::Int(1).eval_binop(BinOp::Add, &Value::Bool(false)).unwrap_err();
        assert_eq!(err.kind, ErrKind::IncorrectOperation);
    }

    #[test]
    fn surface_indexing_is_one_based() {
        let s = VmSlice::from_values(vec![Value::Int(10), Value::Int(20)]);
        let v = Value::Slice(s);
        assert!(v.index_get(&Value::Int(1)).unwrap().deep_eq(&Value::Int(10)));
        assert!(v.index_get(&Value::Int(0)).is_err());
        assert!(v.index_get(&Value::Int(3)).is_err());
    }

    #[test]
    fn string_indexing_returns_single_rune() {
        let v = Value::from("мир");
        assert_eq!(v.index_get(&Value::Int(2)).unwrap().display_string().unwrap(), "и");
    }

    #[test]
    fn missing_map_key_reads_nil() {
        let v = Value::Map(VmMap::default());
        assert!(v.index_get(&Value::from("нет")).unwrap().deep_eq(&Value::Nil));
    }

    #[test]
    fn length_counts_runes_and_elements() {
        assert_eq!(Value::from("привет").length(), Some(6));
        assert_eq!(Value::Slice(VmSlice::from_values(vec![Value::Nil])).length(), Some(1));
        assert_eq!(Value::Int(5).length(), None);
    }

    #[test]
    fn invoke_number_picks_int_or_decimal() {
        assert!(Value::from("42").invoke_number().unwrap().deep_eq(&Value::Int(42)));
        let d = Value::from("4.5e1").invoke_number().unwrap();
        assert!(d.deep_eq(&Value::Decimal("45".parse().unwrap())));
        assert!(Value::from("сорок").invoke_number().is_err());
    }

    #[test]
    fn unary_ops() {
        assert!(Value::Int(5).eval_unop(UnOp::Neg).unwrap().deep_eq(&Value::Int(-5)));
        assert!(Value::Bool(true).eval_unop(UnOp::Not).unwrap().deep_eq(&Value::Bool(false)));
        assert!(Value::Int(0).eval_unop(UnOp::BitNot).unwrap().deep_eq(&Value::Int(-1)));
        assert!(Value::from("x").eval_unop(UnOp::Neg).is_err());
    }
}
