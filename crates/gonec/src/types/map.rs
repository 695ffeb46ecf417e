//! Insertion-order-preserving mappings from string keys to values.
//!
//! Member access by identifier resolves through the name table: the original
//! spelling is tried first, then the case-folded form, so `.Поле` and `.поле`
//! reach the same entry. Operator semantics: `+` merges (right wins), `-`
//! deletes keys, `&` keeps shared keys, `|` unions keeping the left value,
//! `%` deletes the right side's keys.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use crate::{
    error::{RunResult, RuntimeError},
    names::{self, NameId},
    types::{func::NativeFunc, slice::VmSlice},
    value::{BinOp, Value},
};

/// A shared, ordered mapping.
#[derive(Clone, Debug, Default)]
pub struct VmMap(Arc<RwLock<IndexMap<String, Value>>>);

impl VmMap {
    #[must_use]
    pub fn from_entries(entries: IndexMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(entries)))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Value>> {
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

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, val: Value) {
        self.write().insert(key.to_string(), val);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().shift_remove(key)
    }

    /// Member read by identifier: exact spelling first, then a case-folded
    /// scan, so `.Поле` and `.поле` reach the same entry.
    #[must_use]
    pub fn get_by_name(&self, name: NameId) -> Option<Value> {
        let entries = self.read();
        if let Some(v) = entries.get(&names::original(name)) {
            return Some(v.clone());
        }
        let folded = names::folded(name);
        entries
            .iter()
            .find(|(k, _)| k.to_lowercase() == folded)
            .map(|(_, v)| v.clone())
    }

    /// Member write by identifier: updates an existing entry under any
    /// spelling, otherwise inserts under the identifier's spelling.
    pub fn set_by_name(&self, name: NameId, val: Value) {
        let mut entries = self.write();
        let original = names::original(name);
        if entries.contains_key(&original) {
            entries.insert(original, val);
            return;
        }
        let folded = names::folded(name);
        let existing = entries.keys().find(|k| k.to_lowercase() == folded).cloned();
        match existing {
            Some(key) => {
                entries.insert(key, val);
            }
            None => {
                entries.insert(original, val);
            }
        }
    }

    /// Snapshot of entries in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
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

    /// Deep equality by key set and values; insertion order is irrelevant.
    #[must_use]
    pub fn deep_eq(&self, other: &Self) -> bool {
        if self.same(other) {
            return true;
        }
        let a = self.snapshot();
        if a.len() != other.len() {
            return false;
        }
        let b = other.read();
        a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| v.deep_eq(bv)))
    }

    #[must_use]
    pub fn copy_recursive(&self) -> Self {
        let entries = self
            .snapshot()
            .into_iter()
            .map(|(k, v)| (k, v.copy_recursive()))
            .collect();
        Self::from_entries(entries)
    }
}

/// Binary operators with a mapping on the left. All produce fresh mappings.
pub(crate) fn binop(lhs: &VmMap, op: BinOp, rhs: &Value) -> RunResult<Value> {
    let Value::Map(other) = rhs else {
        return match op {
            BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Or | BinOp::Rem => Err(RuntimeError::incorrect_operation()),
            BinOp::Mul | BinOp::Quo | BinOp::Pow | BinOp::Shl | BinOp::Shr | BinOp::Land | BinOp::Lor => {
                Err(RuntimeError::incorrect_operation())
            }
            _ => Err(RuntimeError::unknown_operation()),
        };
    };
    let a = lhs.snapshot();
    let b = other.snapshot();
    let entries: IndexMap<String, Value> = match op {
        // Merge, right wins on conflicts.
        BinOp::Add => a.into_iter().chain(b).collect(),
        BinOp::Sub => {
            let keys = other.read();
            a.into_iter().filter(|(k, _)| !keys.contains_key(k)).collect()
        }
        BinOp::And => {
            let keys = other.read();
            a.into_iter().filter(|(k, _)| keys.contains_key(k)).collect()
        }
        // Union keeping the left value on conflicts.
        BinOp::Or => b.into_iter().chain(a).collect::<IndexMap<_, _>>(),
        // Same as Sub for mappings: the right side's keys are deleted.
        BinOp::Rem => {
            let keys = other.read();
            a.into_iter().filter(|(k, _)| !keys.contains_key(k)).collect()
        }
        BinOp::Mul | BinOp::Quo | BinOp::Pow | BinOp::Shl | BinOp::Shr | BinOp::Land | BinOp::Lor => {
            return Err(RuntimeError::incorrect_operation());
        }
        _ => return Err(RuntimeError::unknown_operation()),
    };
    // `Or` built right-then-left to keep left values; restore left-first order.
    let entries = if matches!(op, BinOp::Or) {
        let left = lhs.read();
        let mut ordered = IndexMap::with_capacity(entries.len());
        for (k, v) in left.iter() {
            ordered.insert(k.clone(), v.clone());
        }
        for (k, v) in entries {
            ordered.entry(k).or_insert(v);
        }
        ordered
    } else {
        entries
    };
    Ok(Value::Map(VmMap::from_entries(entries)))
}

/// Instance methods available on mappings from script code.
pub(crate) fn method(recv: &VmMap, name: NameId) -> Option<NativeFunc> {
    let recv = recv.clone();
    match names::folded(name).as_str() {
        "ключи" => Some(NativeFunc::zero(move |rets| {
            let keys = recv.snapshot().into_iter().map(|(k, _)| Value::from(k)).collect();
            rets.push(Value::Slice(VmSlice::from_values(keys)));
            Ok(())
        })),
        "значения" => Some(NativeFunc::zero(move |rets| {
            let values = recv.snapshot().into_iter().map(|(_, v)| v).collect();
            rets.push(Value::Slice(VmSlice::from_values(values)));
            Ok(())
        })),
        "удалить" => Some(NativeFunc::fixed(1, move |args, _rets| {
            recv.remove(&args[0].display_string()?);
            Ok(())
        })),
        "скопировать" => Some(NativeFunc::zero(move |rets| {
            rets.push(Value::Map(recv.copy_recursive()));
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

    fn map_of(pairs: &[(&str, i64)]) -> VmMap {
        let entries = pairs.iter().map(|(k, v)| ((*k).to_string(), Value::Int(*v))).collect();
        VmMap::from_entries(entries)
    }

    fn keys_of(v: &Value) -> Vec<String> {
        match v {
            Value::Map(m) => m.snapshot().into_iter().map(|(k, _)| k).collect(),
            other => panic!("expected Map, got {other:?}"),
        }
    }

    #[test]
    fn merge_right_wins() {
        let a = map_of(&[("x", 1), ("y", 2)]);
        let b = Value::Map(map_of(&[("y", 9), ("z", 3)]));
        let merged = binop(&a, BinOp::Add, &b).unwrap();
        let Value::Map(m) = &merged else { panic!() };
        assert!(m.get("y").unwrap().deep_eq(&Value::Int(9)));
        assert_eq!(keys_of(&merged).len(), 3);
    }

    #[test]
    fn union_left_wins() {
        let a = map_of(&[("x", 1), ("y", 2)]);
        let b = Value::Map(map_of(&[("y", 9), ("z", 3)]));
        let union = binop(&a, BinOp::Or, &b).unwrap();
        let Value::Map(m) = &union else { panic!() };
        assert!(m.get("y").unwrap().deep_eq(&Value::Int(2)));
        assert_eq!(keys_of(&union), vec!["x", "y", "z"]);
    }

    #[test]
    fn subtraction_and_intersection() {
        let a = map_of(&[("x", 1), ("y", 2)]);
        let b = Value::Map(map_of(&[("y", 0)]));
        assert_eq!(keys_of(&binop(&a, BinOp::Sub, &b).unwrap()), vec!["x"]);
        assert_eq!(keys_of(&binop(&a, BinOp::And, &b).unwrap()), vec!["y"]);
        assert_eq!(keys_of(&binop(&a, BinOp::Rem, &b).unwrap()), vec!["x"]);
    }

    #[test]
    fn member_access_is_case_insensitive() {
        let m = map_of(&[]);
        m.set("Поле", Value::Int(1));
        let id = names::intern("поле");
        assert!(m.get_by_name(id).unwrap().deep_eq(&Value::Int(1)));
        // a write through the identifier updates the existing spelling
        m.set_by_name(id, Value::Int(2));
        assert!(m.get("Поле").unwrap().deep_eq(&Value::Int(2)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn deep_equality_ignores_order() {
        let a = map_of(&[("x", 1), ("y", 2)]);
        let b = map_of(&[("y", 2), ("x", 1)]);
        assert!(a.deep_eq(&b));
        b.set("y", Value::Int(3));
        assert!(!a.deep_eq(&b));
    }
}
