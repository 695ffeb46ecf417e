//! Wait groups for task completion.
//!
//! `Ожидать` blocks its worker thread until the counter returns to zero;
//! hosts and scripts must bound the number of simultaneous waiters to the
//! pool size.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::{
    error::{RunResult, RuntimeError},
    names::{self, NameId},
    types::func::NativeFunc,
    value::Value,
};

struct WgInner {
    count: Mutex<i64>,
    cv: Condvar,
}

/// A shared wait-group value.
#[derive(Clone)]
pub struct VmWaitGroup(Arc<WgInner>);

impl Default for VmWaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl VmWaitGroup {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(WgInner {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }))
    }

    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn add(&self, delta: i64) -> RunResult<()> {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += delta;
        if *count < 0 {
            return Err(RuntimeError::custom("Счетчик группы ожидания отрицательный"));
        }
        if *count == 0 {
            self.0.cv.notify_all();
        }
        Ok(())
    }

    pub fn done(&self) -> RunResult<()> {
        self.add(-1)
    }

    pub fn wait(&self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self.0.cv.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl std::fmt::Debug for VmWaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VmWaitGroup")
    }
}

/// Instance methods available on wait groups from script code.
pub(crate) fn method(recv: &VmWaitGroup, name: NameId) -> Option<NativeFunc> {
    let recv = recv.clone();
    match names::folded(name).as_str() {
        "добавить" => Some(NativeFunc::one(move |n: i64, _rets| recv.add(n))),
        "завершить" => Some(NativeFunc::zero(move |_rets| recv.done())),
        "ожидать" => Some(NativeFunc::zero(move |_rets| {
            recv.wait();
            Ok(())
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_once_counter_drops() {
        let wg = VmWaitGroup::new();
        wg.add(2).unwrap();
        let wg2 = wg.clone();
        let handle = std::thread::spawn(move || {
            wg2.done().unwrap();
            wg2.done().unwrap();
        });
        wg.wait();
        handle.join().unwrap();
    }

    #[test]
    fn negative_counter_is_an_error() {
        let wg = VmWaitGroup::new();
        assert!(wg.done().is_err());
    }
}
