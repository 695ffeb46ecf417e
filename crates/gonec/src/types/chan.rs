//! Typed channels with fixed capacity.
//!
//! Capacity 0 is a rendezvous: the sender completes only when a receiver
//! takes the value. Blocking operations never occupy a worker thread — a task
//! that cannot proceed is parked inside the channel's waiter queue and handed
//! back to the scheduler when the counterpart arrives. The `Try*` variants
//! never suspend and are used by `select` lowering.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::{RunResult, RuntimeError},
    names::{self, NameId},
    sched::{Scheduler, Task},
    types::func::NativeFunc,
    value::Value,
};

struct SendWaiter {
    task: Task,
    val: Value,
    sched: Arc<Scheduler>,
}

struct RecvWaiter {
    task: Task,
    dst: usize,
    sched: Arc<Scheduler>,
}

#[derive(Default)]
struct ChanState {
    buf: VecDeque<Value>,
    closed: bool,
    send_waiters: VecDeque<SendWaiter>,
    recv_waiters: VecDeque<RecvWaiter>,
}

struct Channel {
    cap: usize,
    state: Mutex<ChanState>,
}

/// A shared channel value.
#[derive(Clone)]
pub struct VmChan(Arc<Channel>);

/// Result of a blocking channel operation: the task either proceeds or was
/// parked inside the channel.
pub(crate) enum Blocked {
    Ready(Task),
    Parked,
}

/// Result of a non-blocking receive.
pub enum TryRecv {
    Received(Value),
    Closed,
    NotReady,
}

impl VmChan {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self(Arc::new(Channel {
            cap,
            state: Mutex::new(ChanState::default()),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, ChanState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.cap
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Takes the next deliverable value: the buffer first, then a parked
    /// sender's value (rendezvous). Refills the buffer from parked senders.
    fn take_ready_value(st: &mut ChanState) -> Option<Value> {
        if let Some(v) = st.buf.pop_front() {
            if let Some(mut sw) = st.send_waiters.pop_front() {
                st.buf.push_back(std::mem::take(&mut sw.val));
                sw.task.complete_send();
                sw.sched.clone().unpark(sw.task);
            }
            return Some(v);
        }
        if let Some(mut sw) = st.send_waiters.pop_front() {
            let v = std::mem::take(&mut sw.val);
            sw.task.complete_send();
            sw.sched.clone().unpark(sw.task);
            return Some(v);
        }
        None
    }

    /// Blocking send; parks the task when the channel is full and no receiver
    /// waits. Send on a closed channel resumes the task with an error.
    pub(crate) fn send_blocking(&self, mut task: Task, val: Value, sched: &Arc<Scheduler>) -> Blocked {
        let mut st = self.lock();
        if st.closed {
            task.fail(RuntimeError::wrong_channel("Отправка в закрытый канал"));
            return Blocked::Ready(task);
        }
        if let Some(mut rw) = st.recv_waiters.pop_front() {
            rw.task.deliver_recv(rw.dst, val);
            rw.sched.clone().unpark(rw.task);
            task.complete_send();
            return Blocked::Ready(task);
        }
        if st.buf.len() < self.0.cap {
            st.buf.push_back(val);
            task.complete_send();
            return Blocked::Ready(task);
        }
        st.send_waiters.push_back(SendWaiter {
            task,
            val,
            sched: sched.clone(),
        });
        sched.note_parked();
        Blocked::Parked
    }

    /// Blocking receive; parks the task when no value is available. Receive
    /// on a closed drained channel delivers Nil.
    pub(crate) fn recv_blocking(&self, mut task: Task, dst: usize, sched: &Arc<Scheduler>) -> Blocked {
        let mut st = self.lock();
        if let Some(v) = Self::take_ready_value(&mut st) {
            task.deliver_recv(dst, v);
            return Blocked::Ready(task);
        }
        if st.closed {
            task.deliver_recv(dst, Value::Nil);
            return Blocked::Ready(task);
        }
        st.recv_waiters.push_back(RecvWaiter {
            task,
            dst,
            sched: sched.clone(),
        });
        sched.note_parked();
        Blocked::Parked
    }

    /// Non-blocking send. `Ok(false)` means not ready; a closed channel is an
    /// error, matching the blocking form.
    pub fn try_send(&self, val: Value) -> RunResult<bool> {
        let mut st = self.lock();
        if st.closed {
            return Err(RuntimeError::wrong_channel("Отправка в закрытый канал"));
        }
        if let Some(mut rw) = st.recv_waiters.pop_front() {
            rw.task.deliver_recv(rw.dst, val);
            rw.sched.clone().unpark(rw.task);
            return Ok(true);
        }
        if st.buf.len() < self.0.cap {
            st.buf.push_back(val);
            return Ok(true);
        }
        Ok(false)
    }

    /// Non-blocking receive.
    #[must_use]
    pub fn try_recv(&self) -> TryRecv {
        let mut st = self.lock();
        if let Some(v) = Self::take_ready_value(&mut st) {
            return TryRecv::Received(v);
        }
        if st.closed { TryRecv::Closed } else { TryRecv::NotReady }
    }

    /// Closes the channel: parked receivers get Nil, parked senders resume
    /// with an error. Closing twice is an error.
    pub fn close(&self) -> RunResult<()> {
        let mut st = self.lock();
        if st.closed {
            return Err(RuntimeError::wrong_channel("Канал уже закрыт"));
        }
        st.closed = true;
        while let Some(mut rw) = st.recv_waiters.pop_front() {
            rw.task.deliver_recv(rw.dst, Value::Nil);
            rw.sched.clone().unpark(rw.task);
        }
        while let Some(mut sw) = st.send_waiters.pop_front() {
            sw.task.fail(RuntimeError::wrong_channel("Отправка в закрытый канал"));
            sw.sched.clone().unpark(sw.task);
        }
        Ok(())
    }
}

impl std::fmt::Debug for VmChan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VmChan(cap={})", self.0.cap)
    }
}

/// Instance methods available on channels from script code.
pub(crate) fn method(recv: &VmChan, name: NameId) -> Option<NativeFunc> {
    let recv = recv.clone();
    match names::folded(name).as_str() {
        "закрыть" => Some(NativeFunc::zero(move |_rets| recv.close())),
        "размер" => Some(NativeFunc::zero(move |rets| {
            rets.push(Value::Int(recv.capacity() as i64));
            Ok(())
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_try_send_and_recv() {
        let ch = VmChan::new(2);
        assert!(ch.try_send(Value::Int(1)).unwrap());
        assert!(ch.try_send(Value::Int(2)).unwrap());
        assert!(!ch.try_send(Value::Int(3)).unwrap());
        match ch.try_recv() {
            TryRecv::Received(v) => assert!(v.deep_eq(&Value::Int(1))),
            _ => panic!("expected value"),
        }
    }

    #[test]
    fn rendezvous_try_send_needs_a_receiver() {
        let ch = VmChan::new(0);
        assert!(!ch.try_send(Value::Int(1)).unwrap());
        assert!(matches!(ch.try_recv(), TryRecv::NotReady));
    }

    #[test]
    fn closed_channel_behavior() {
        let ch = VmChan::new(1);
        ch.try_send(Value::Int(7)).unwrap();
        ch.close().unwrap();
        assert!(ch.close().is_err());
        // the buffered value drains first, then Closed
        assert!(matches!(ch.try_recv(), TryRecv::Received(_)));
        assert!(matches!(ch.try_recv(), TryRecv::Closed));
        assert!(ch.try_send(Value::Int(8)).is_err());
    }
}
