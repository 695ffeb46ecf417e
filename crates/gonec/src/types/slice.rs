//! Mutable, reference-shared sequences.
//!
//! Operators treat sequences as collections: `+` appends or extends, `-`
//! deletes by deep equality, `&` intersects, `|` unions, `%` is the symmetric
//! difference. Copying is explicit and recursive across nested sequences and
//! mappings.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::seq::SliceRandom;

use crate::{
    error::{RunResult, RuntimeError},
    names::{self, NameId},
    types::func::NativeFunc,
    value::{BinOp, Value},
};

/// A shared, ordered sequence of values.
#[derive(Clone, Debug, Default)]
pub struct VmSlice(Arc<RwLock<Vec<Value>>>);

impl VmSlice {
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(values)))
    }

    #[must_use]
    pub fn with_capacity(len: usize, cap: usize) -> Self {
        let mut v = Vec::with_capacity(cap.max(len));
        v.resize(len, Value::Nil);
        Self(Arc::new(RwLock::new(v)))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 0-based element read.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Value> {
        self.read().get(idx).cloned()
    }

    /// 0-based element write; out-of-bounds writes fail without mutating.
    pub fn set(&self, idx: usize, val: Value) -> RunResult<()> {
        let mut items = self.write();
        match items.get_mut(idx) {
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(RuntimeError::index_out_of_bounds()),
        }
    }

    pub fn push(&self, val: Value) {
        self.write().push(val);
    }

    /// Snapshot of the current elements.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.read().clone()
    }

    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity of the shared backing store, for cycle detection.
    #[must_use]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[must_use]
    pub fn deep_eq(&self, other: &Self) -> bool {
        if self.same(other) {
            return true;
        }
        let a = self.snapshot();
        let b = other.snapshot();
        a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.deep_eq(y))
    }

    /// Recursive copy: nested sequences and mappings are copied, other values
    /// shared.
    #[must_use]
    pub fn copy_recursive(&self) -> Self {
        Self::from_values(self.snapshot().iter().map(Value::copy_recursive).collect())
    }
}

/// Binary operators with a sequence on the left.
pub(crate) fn binop(lhs: &VmSlice, op: BinOp, rhs: &Value) -> RunResult<Value> {
    match op {
        BinOp::Add => {
            let mut items = lhs.snapshot();
            match rhs {
                Value::Slice(other) => items.extend(other.snapshot()),
                other => items.push(other.clone()),
            }
            Ok(Value::Slice(VmSlice::from_values(items)))
        }
        BinOp::Sub => {
            let Value::Slice(other) = rhs else {
                return Err(RuntimeError::incorrect_operation());
            };
            let b = other.snapshot();
            let items = lhs
                .snapshot()
                .into_iter()
                .filter(|x| !b.iter().any(|y| x.deep_eq(y)))
                .collect();
            Ok(Value::Slice(VmSlice::from_values(items)))
        }
        BinOp::And => {
            let Value::Slice(other) = rhs else {
                return Err(RuntimeError::incorrect_operation());
            };
            let b = other.snapshot();
            let items = lhs
                .snapshot()
                .into_iter()
                .filter(|x| b.iter().any(|y| x.deep_eq(y)))
                .collect();
            Ok(Value::Slice(VmSlice::from_values(items)))
        }
        BinOp::Or => {
            let Value::Slice(other) = rhs else {
                return Err(RuntimeError::incorrect_operation());
            };
            let a = lhs.snapshot();
            let mut items = a.clone();
            for y in other.snapshot() {
                if !a.iter().any(|x| x.deep_eq(&y)) {
                    items.push(y);
                }
            }
            Ok(Value::Slice(VmSlice::from_values(items)))
        }
        BinOp::Rem => {
            // Symmetric difference: (a - b) ++ (b - a).
            let Value::Slice(other) = rhs else {
                return Err(RuntimeError::incorrect_operation());
            };
            let a = lhs.snapshot();
            let b = other.snapshot();
            let mut items: Vec<Value> = a
                .iter()
                .filter(|x| !b.iter().any(|y| x.deep_eq(y)))
                .cloned()
                .collect();
            items.extend(b.iter().filter(|y| !a.iter().any(|x| x.deep_eq(y))).cloned());
            Ok(Value::Slice(VmSlice::from_values(items)))
        }
        BinOp::Mul | BinOp::Quo | BinOp::Pow | BinOp::Shl | BinOp::Shr | BinOp::Land | BinOp::Lor => {
            Err(RuntimeError::incorrect_operation())
        }
        _ => Err(RuntimeError::unknown_operation()),
    }
}

/// Instance methods available on sequences from script code.
pub(crate) fn method(recv: &VmSlice, name: NameId) -> Option<NativeFunc> {
    let recv = recv.clone();
    match names::folded(name).as_str() {
        "сортировать" => Some(NativeFunc::zero(move |_rets| {
            recv.write().sort_by(|a, b| {
                if a.sort_less(b) {
                    std::cmp::Ordering::Less
                } else if b.sort_less(a) {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            });
            Ok(())
        })),
        "обратныйпорядок" => Some(NativeFunc::zero(move |_rets| {
            recv.write().reverse();
            Ok(())
        })),
        "случайныйпорядок" => Some(NativeFunc::zero(move |_rets| {
            recv.write().shuffle(&mut rand::thread_rng());
            Ok(())
        })),
        "добавить" => Some(NativeFunc::fixed(1, move |args, _rets| {
            recv.push(args[0].clone());
            Ok(())
        })),
        "найти" => Some(NativeFunc::fixed(1, move |args, rets| {
            let found = recv.snapshot().iter().position(|x| x.deep_eq(&args[0]));
            // 1-based position, -1 when absent
            rets.push(Value::Int(found.map_or(-1, |i| i as i64 + 1)));
            Ok(())
        })),
        "копировать" => Some(NativeFunc::zero(move |rets| {
            rets.push(Value::Slice(recv.copy_recursive()));
            Ok(())
        })),
        "копироватьуникальные" => Some(NativeFunc::zero(move |rets| {
            let mut out: Vec<Value> = Vec::new();
            for v in recv.snapshot() {
                if !out.iter().any(|x| x.deep_eq(&v)) {
                    out.push(v.copy_recursive());
                }
            }
            rets.push(Value::Slice(VmSlice::from_values(out)));
            Ok(())
        })),
        "размер" => Some(NativeFunc::zero(move |rets| {
            rets.push(Value::Int(recv.len() as i64));
            Ok(())
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ints(values: &[i64]) -> VmSlice {
        VmSlice::from_values(values.iter().copied().map(Value::Int).collect())
    }

    fn as_ints(v: &Value) -> Vec<i64> {
        match v {
            Value::Slice(s) => s
                .snapshot()
                .iter()
                .map(|x| match x {
                    Value::Int(i) => *i,
                    other => panic!("expected Int, got {other:?}"),
                })
                .collect(),
            other => panic!("expected Slice, got {other:?}"),
        }
    }

    #[test]
    fn add_appends_and_extends() {
        let base = ints(&[1, 2]);
        let appended = binop(&base, BinOp::Add, &Value::Int(3)).unwrap();
        assert_eq!(as_ints(&appended), vec![1, 2, 3]);
        let extended = binop(&base, BinOp::Add, &Value::Slice(ints(&[4, 5]))).unwrap();
        assert_eq!(as_ints(&extended), vec![1, 2, 4, 5]);
        // the source sequence is untouched
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn set_operations() {
        let a = ints(&[1, 2, 3, 4]);
        let b = Value::Slice(ints(&[2, 4, 6]));
        assert_eq!(as_ints(&binop(&a, BinOp::Sub, &b).unwrap()), vec![1, 3]);
        assert_eq!(as_ints(&binop(&a, BinOp::And, &b).unwrap()), vec![2, 4]);
        assert_eq!(as_ints(&binop(&a, BinOp::Or, &b).unwrap()), vec![1, 2, 3, 4, 6]);
        assert_eq!(as_ints(&binop(&a, BinOp::Rem, &b).unwrap()), vec![1, 3, 6]);
    }

    #[test]
    fn deep_equality_recurses() {
        let a = VmSlice::from_values(vec![Value::Int(1), Value::Slice(ints(&[2, 3]))]);
        let b = VmSlice::from_values(vec![Value::Int(1), Value::Slice(ints(&[2, 3]))]);
        assert!(a.deep_eq(&b));
        b.set(1, Value::Slice(ints(&[2, 9]))).unwrap();
        assert!(!a.deep_eq(&b));
    }

    #[test]
    fn copy_is_recursive() {
        let inner = ints(&[1]);
        let outer = VmSlice::from_values(vec![Value::Slice(inner.clone())]);
        let copied = outer.copy_recursive();
        inner.set(0, Value::Int(99)).unwrap();
        let Value::Slice(copied_inner) = copied.get(0).unwrap() else {
            panic!("expected nested sequence");
        };
        assert_eq!(as_ints(&Value::Slice(copied_inner)), vec![1]);
    }

    #[test]
    fn failed_write_does_not_mutate() {
        let s = ints(&[1]);
        assert!(s.set(5, Value::Int(2)).is_err());
        assert_eq!(as_ints(&Value::Slice(s)), vec![1]);
    }

    #[test]
    fn find_method_is_one_based() {
        let s = ints(&[7, 8]);
        let f = method(&s, names::intern("Найти")).unwrap();
        let mut rets = Vec::new();
        f.call(&[Value::Int(8)], &mut rets).unwrap();
        assert!(rets[0].deep_eq(&Value::Int(2)));
    }
}
