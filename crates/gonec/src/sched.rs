//! Cooperative tasks over a fixed worker pool.
//!
//! Every task owns its VM state; environments and heap values are shared.
//! A task leaves its worker only at the enumerated suspension points:
//! blocking channel operations (the task parks inside the channel without
//! occupying a worker), `GOSHED`, and task completion. Errors escaping a
//! spawned task without a surrounding `try` are logged and terminate only
//! that task. When every live task is parked on a channel the run fails with
//! a structured error instead of hanging.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, PoisonError},
};

use crate::{
    bytecode::{
        inst::Code,
        vm::{BlockOn, Outcome, Vm},
    },
    env::Env,
    error::{RunResult, RuntimeError},
    types::{
        chan::Blocked,
        func::{FuncValue, NativeFunc, VmFunc},
    },
    value::Value,
};

/// A schedulable unit of execution.
pub struct Task {
    root: bool,
    kind: TaskKind,
}

enum TaskKind {
    Script(Vm),
    /// `go` over a native callable runs it once on a worker.
    Native { func: NativeFunc, args: Vec<Value> },
}

impl Task {
    /// Completes a parked receive: the value lands in the destination
    /// register and the task steps past the instruction.
    pub(crate) fn deliver_recv(&mut self, dst: usize, val: Value) {
        if let TaskKind::Script(vm) = &mut self.kind {
            vm.write_reg_abs(dst, val);
            vm.advance_pc();
        }
    }

    /// Completes a parked send.
    pub(crate) fn complete_send(&mut self) {
        if let TaskKind::Script(vm) = &mut self.kind {
            vm.advance_pc();
        }
    }

    /// Resumes the task into a throw of the given error.
    pub(crate) fn fail(&mut self, err: RuntimeError) {
        if let TaskKind::Script(vm) = &mut self.kind {
            vm.advance_pc();
            vm.inject_err(err);
        }
    }
}

struct SchedState {
    ready: VecDeque<Task>,
    /// tasks currently executing on a worker
    active: usize,
    /// tasks owned by channel waiter queues
    parked: usize,
    root_result: Option<RunResult<Value>>,
    shutdown: bool,
}

/// Ready queue plus worker coordination for one run.
pub struct Scheduler {
    state: Mutex<SchedState>,
    cv: Condvar,
    pool: usize,
}

fn pool_size() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZero::get).max(4)
}

fn deadlock_error() -> RuntimeError {
    RuntimeError::wrong_channel("Все задачи заблокированы на операциях с каналами")
}

impl Scheduler {
    fn new(pool: usize) -> Self {
        Self {
            state: Mutex::new(SchedState {
                ready: VecDeque::new(),
                active: 0,
                parked: 0,
                root_result: None,
                shutdown: false,
            }),
            cv: Condvar::new(),
            pool,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns a task calling the given function value; used by `GO`.
    pub(crate) fn spawn_call(&self, f: VmFunc, args: Vec<Value>) -> RunResult<()> {
        let kind = match &*f.0 {
            FuncValue::Script(script) => TaskKind::Script(Vm::for_call(script, args)?),
            FuncValue::Native(native) => TaskKind::Native {
                func: native.clone(),
                args,
            },
        };
        let mut st = self.lock();
        st.ready.push_back(Task { root: false, kind });
        self.cv.notify_one();
        Ok(())
    }

    /// Accounts for a task that just parked inside a channel.
    ///
    /// Called with the channel lock held, so a wake racing with the park
    /// always observes consistent counters.
    pub(crate) fn note_parked(&self) {
        let mut st = self.lock();
        st.active -= 1;
        st.parked += 1;
        self.check_deadlock(&mut st);
    }

    /// Returns a previously parked task to the ready queue.
    pub(crate) fn unpark(&self, task: Task) {
        let mut st = self.lock();
        st.parked -= 1;
        st.ready.push_back(task);
        self.cv.notify_one();
    }

    fn requeue_active(&self, task: Task) {
        let mut st = self.lock();
        st.active -= 1;
        st.ready.push_back(task);
        self.cv.notify_one();
    }

    fn finish(&self, root: bool, result: RunResult<Value>) {
        let mut st = self.lock();
        st.active -= 1;
        if root {
            st.root_result = Some(result);
            st.shutdown = true;
            self.cv.notify_all();
        } else if let Err(err) = result {
            log::error!("задача завершилась с ошибкой: {err}");
        }
        self.check_deadlock(&mut st);
    }

    fn check_deadlock(&self, st: &mut SchedState) {
        if st.active == 0 && st.ready.is_empty() && st.parked > 0 && st.root_result.is_none() {
            st.root_result = Some(Err(deadlock_error()));
            st.shutdown = true;
            self.cv.notify_all();
        }
    }

    fn take_root_result(&self) -> RunResult<Value> {
        self.lock()
            .root_result
            .take()
            .unwrap_or_else(|| Err(RuntimeError::custom("Задача не была выполнена")))
    }
}

fn worker_loop(sched: &Arc<Scheduler>) {
    loop {
        let mut task = {
            let mut st = sched.lock();
            loop {
                if st.shutdown {
                    return;
                }
                if let Some(task) = st.ready.pop_front() {
                    st.active += 1;
                    break task;
                }
                sched.check_deadlock(&mut st);
                if st.shutdown {
                    return;
                }
                st = sched.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
            }
        };
        let outcome = match &mut task.kind {
            TaskKind::Script(vm) => vm.run(sched),
            TaskKind::Native { func, args } => {
                let mut rets = Vec::new();
                match func.call(args, &mut rets) {
                    Ok(()) => Outcome::Done(Value::Nil),
                    Err(err) => Outcome::Fail(err),
                }
            }
        };
        match outcome {
            Outcome::Done(v) => sched.finish(task.root, Ok(v)),
            Outcome::Fail(err) => sched.finish(task.root, Err(err)),
            Outcome::Yield => sched.requeue_active(task),
            Outcome::Block(on) => {
                let blocked = match on {
                    BlockOn::Send { ch, val } => ch.send_blocking(task, val, sched),
                    BlockOn::Recv { ch, dst } => ch.recv_blocking(task, dst, sched),
                };
                match blocked {
                    Blocked::Ready(task) => sched.requeue_active(task),
                    // accounting already done under the channel lock
                    Blocked::Parked => {}
                }
            }
        }
    }
}

/// Executes a lowered module on a fresh worker pool, returning the value
/// delivered by a top-level `Возврат` (or Nil).
///
/// The calling thread participates as a worker; remaining tasks are dropped
/// once the root task completes, matching process exit semantics.
pub fn run_code(code: Arc<Code>, env: &Env) -> RunResult<Value> {
    let sched = Arc::new(Scheduler::new(pool_size()));
    {
        let mut st = sched.lock();
        st.ready.push_back(Task {
            root: true,
            kind: TaskKind::Script(Vm::for_module(code, env.clone())),
        });
    }
    std::thread::scope(|scope| {
        for _ in 1..sched.pool {
            let sched = &sched;
            scope.spawn(move || worker_loop(sched));
        }
        worker_loop(&sched);
    });
    sched.take_root_result()
}
