//! The execution loop.
//!
//! Each task owns a [`Vm`]: a frame stack over one register array. Frames
//! carry their own catch and loop stacks so unwinding restores control flow
//! exactly where the `TRY` region or loop began. Blocking channel operations
//! do not execute here — the VM hands an [`Outcome::Block`] to the scheduler
//! with the program counter still pointing at the instruction, and the
//! counterpart task (or the scheduler) completes the effect and advances it.

use std::sync::Arc;

use crate::{
    bytecode::inst::{Code, Inst, Label, Reg},
    env::Env,
    error::{ErrKind, RunResult, RuntimeError},
    names,
    sched::Scheduler,
    types::{
        chan::{TryRecv, VmChan},
        func::{FuncValue, NativeFunc, ScriptFunc, VmFunc, rets_to_value},
        slice::VmSlice,
    },
    value::{Value, VmModule},
};

/// Upper bound on call depth.
const MAX_FRAMES: usize = 4096;

/// Instructions executed before a task voluntarily rotates to the back of the
/// ready queue, bounding how long a runaway loop can hold a worker.
const YIELD_BUDGET: u32 = 1 << 16;

struct CatchEntry {
    err_reg: usize,
    label: Label,
    loop_depth: usize,
}

struct LoopEntry {
    lend: Label,
    lcont: Label,
    /// iteration snapshot for `foreach` loops
    iter: Option<Vec<Value>>,
}

enum FrameKind {
    /// The task's entry frame; returning from it finishes the task.
    Entry,
    Call,
    Module { name: crate::names::NameId, bind_env: Env },
}

struct Frame {
    code: Arc<Code>,
    pc: usize,
    base: usize,
    ret_reg: Option<usize>,
    env: Env,
    catches: Vec<CatchEntry>,
    loops: Vec<LoopEntry>,
    kind: FrameKind,
}

/// Why the VM stopped running this task for now.
pub enum Outcome {
    Done(Value),
    Fail(RuntimeError),
    Block(BlockOn),
    Yield,
}

/// A blocking channel operation to be completed by the scheduler.
pub enum BlockOn {
    Send { ch: VmChan, val: Value },
    Recv { ch: VmChan, dst: usize },
}

enum Flow {
    Next,
    /// pc already adjusted
    Jumped,
    Return(Value),
    Block(BlockOn),
    Yield,
}

/// Per-task execution state.
pub struct Vm {
    regs: Vec<Value>,
    frames: Vec<Frame>,
    pending_err: Option<RuntimeError>,
}

impl Vm {
    /// Creates a VM executing a module body in the given environment.
    #[must_use]
    pub fn for_module(code: Arc<Code>, env: Env) -> Self {
        let window = code.max_reg as usize + 1;
        Self {
            regs: vec![Value::Nil; window],
            frames: vec![Frame {
                code,
                pc: 0,
                base: 0,
                ret_reg: None,
                env,
                catches: Vec::new(),
                loops: Vec::new(),
                kind: FrameKind::Entry,
            }],
            pending_err: None,
        }
    }

    /// Creates a VM whose entry frame calls a closure with the given
    /// arguments; used by task spawn.
    pub fn for_call(f: &ScriptFunc, args: Vec<Value>) -> RunResult<Self> {
        let env = f.env.child();
        bind_params(f, args, &env)?;
        let window = f.code.max_reg as usize + 1;
        Ok(Self {
            regs: vec![Value::Nil; window],
            frames: vec![Frame {
                code: f.code.clone(),
                pc: 0,
                base: 0,
                ret_reg: None,
                env,
                catches: Vec::new(),
                loops: Vec::new(),
                kind: FrameKind::Entry,
            }],
            pending_err: None,
        })
    }

    /// Writes a value into an absolute register slot; used when a parked
    /// receive completes.
    pub(crate) fn write_reg_abs(&mut self, idx: usize, val: Value) {
        if idx < self.regs.len() {
            self.regs[idx] = val;
        }
    }

    /// Steps past the instruction a parked task was suspended on.
    pub(crate) fn advance_pc(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc += 1;
        }
    }

    /// Arranges for an error to be thrown when the task resumes.
    pub(crate) fn inject_err(&mut self, err: RuntimeError) {
        self.pending_err = Some(err);
    }

    fn abs(&self, r: Reg) -> usize {
        self.frames.last().map_or(0, |f| f.base) + r as usize
    }

    fn reg(&self, r: Reg) -> &Value {
        &self.regs[self.abs(r)]
    }

    fn set_reg(&mut self, r: Reg, val: Value) {
        let idx = self.abs(r);
        self.regs[idx] = val;
    }

    /// Runs until the task completes, fails, yields, or blocks.
    pub fn run(&mut self, sched: &Arc<Scheduler>) -> Outcome {
        if let Some(err) = self.pending_err.take() {
            if let Err(fatal) = self.throw(err) {
                return Outcome::Fail(fatal);
            }
        }
        let mut budget = YIELD_BUDGET;
        loop {
            budget -= 1;
            if budget == 0 {
                return Outcome::Yield;
            }
            let Some(frame) = self.frames.last() else {
                return Outcome::Done(Value::Nil);
            };
            if frame.pc >= frame.code.insts.len() {
                // implicit return at the end of a code block
                if let Some(outcome) = self.do_return(Value::Nil) {
                    return outcome;
                }
                continue;
            }
            let inst = frame.code.insts[frame.pc].clone();
            let pos = frame.code.positions[frame.pc];
            match self.exec(inst, sched) {
                Ok(Flow::Next) => self.advance_pc(),
                Ok(Flow::Jumped) => {}
                Ok(Flow::Return(v)) => {
                    if let Some(outcome) = self.do_return(v) {
                        return outcome;
                    }
                }
                Ok(Flow::Block(on)) => return Outcome::Block(on),
                Ok(Flow::Yield) => {
                    self.advance_pc();
                    return Outcome::Yield;
                }
                Err(err) => {
                    if let Err(fatal) = self.throw(err.with_pos(pos)) {
                        return Outcome::Fail(fatal);
                    }
                }
            }
        }
    }

    /// Unwinds to the innermost catch region, or out of the task.
    ///
    /// The region's entry is popped (a handler does not catch its own
    /// errors), the loop stack is cut back to the depth recorded at `TRY`,
    /// and the error's message is materialized in the region's register.
    fn throw(&mut self, err: RuntimeError) -> Result<(), RuntimeError> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(err);
            };
            if let Some(entry) = frame.catches.pop() {
                frame.loops.truncate(entry.loop_depth);
                let addr = frame.code.label_addr(entry.label)?;
                frame.pc = addr;
                let slot = entry.err_reg;
                self.regs[slot] = Value::from(err.message.clone());
                return Ok(());
            }
            if self.frames.len() == 1 {
                self.frames.pop();
                return Err(err);
            }
            let popped = self.frames.pop().expect("frame stack checked non-empty");
            self.regs.truncate(popped.base);
        }
    }

    /// Pops the current frame, delivering the returned value. Returns the
    /// task outcome when the entry frame finished.
    fn do_return(&mut self, val: Value) -> Option<Outcome> {
        let frame = self.frames.pop()?;
        self.regs.truncate(frame.base);
        match frame.kind {
            FrameKind::Entry => Some(Outcome::Done(val)),
            FrameKind::Module { name, bind_env } => {
                bind_env.define(name, Value::Module(VmModule { name, env: frame.env }));
                None
            }
            FrameKind::Call => {
                if let Some(slot) = frame.ret_reg {
                    self.regs[slot] = val;
                }
                None
            }
        }
    }

    fn jump(&mut self, label: Label) -> RunResult<Flow> {
        let frame = self.frames.last_mut().expect("jump with no frame");
        frame.pc = frame.code.label_addr(label)?;
        Ok(Flow::Jumped)
    }

    fn push_frame(&mut self, code: Arc<Code>, env: Env, ret_reg: Option<usize>, kind: FrameKind) -> RunResult<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::custom("Превышена глубина вызовов"));
        }
        let (caller_base, caller_window) = {
            let frame = self.frames.last_mut().expect("call with no frame");
            // the caller resumes after the call instruction
            frame.pc += 1;
            (frame.base, frame.code.max_reg as usize + 1)
        };
        let base = caller_base + caller_window;
        self.regs.resize(base + code.max_reg as usize + 1, Value::Nil);
        self.frames.push(Frame {
            code,
            pc: 0,
            base,
            ret_reg,
            env,
            catches: Vec::new(),
            loops: Vec::new(),
            kind,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, ret: Reg) -> RunResult<Flow> {
        match callee {
            Value::Func(f) => match &*f.0 {
                FuncValue::Script(script) => {
                    let env = script.env.child();
                    bind_params(script, args, &env)?;
                    let ret_abs = self.abs(ret);
                    self.push_frame(script.code.clone(), env, Some(ret_abs), FrameKind::Call)?;
                    Ok(Flow::Jumped)
                }
                FuncValue::Native(native) => {
                    let mut rets = Vec::new();
                    native.call(&args, &mut rets)?;
                    self.set_reg(ret, rets_to_value(rets));
                    Ok(Flow::Next)
                }
            },
            _ => Err(RuntimeError::need_type("Функция")),
        }
    }

    fn arg_window(&self, args: Reg, nargs: u32) -> Vec<Value> {
        (0..nargs).map(|i| self.reg(args + i).clone()).collect()
    }

    fn exec(&mut self, inst: Inst, sched: &Arc<Scheduler>) -> RunResult<Flow> {
        match inst {
            Inst::Load { dst, val } => {
                self.set_reg(dst, val);
                Ok(Flow::Next)
            }
            Inst::Mv { src, dst } => {
                let v = self.reg(src).clone();
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::Get { dst, name } => {
                let v = self
                    .frames
                    .last()
                    .and_then(|f| f.env.get(name))
                    .unwrap_or(Value::Nil);
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::Set { src, name } => {
                let v = self.reg(src).clone();
                if let Some(frame) = self.frames.last() {
                    frame.env.set(name, v);
                }
                Ok(Flow::Next)
            }
            Inst::SetLocal { src, name } => {
                let v = self.reg(src).clone();
                if let Some(frame) = self.frames.last() {
                    frame.env.define(name, v);
                }
                Ok(Flow::Next)
            }
            Inst::Oper { dst, lhs, rhs, op } => {
                let v = self.reg(lhs).eval_binop(op, self.reg(rhs))?;
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::Unary { dst, src, op } => {
                let v = self.reg(src).eval_unop(op)?;
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::Equal { dst, a, b } => {
                let v = Value::Bool(self.reg(a).deep_eq(self.reg(b)));
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::IsSlice { src, dst } => {
                let v = Value::Bool(matches!(self.reg(src), Value::Slice(_)));
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::IsChan { src, dst } => {
                let v = Value::Bool(matches!(self.reg(src), Value::Chan(_)));
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::Jmp { to } => self.jump(to),
            Inst::JFalse { cond, to } => {
                if self.reg(cond).truthy() {
                    Ok(Flow::Next)
                } else {
                    self.jump(to)
                }
            }
            Inst::JTrue { cond, to } => {
                if self.reg(cond).truthy() {
                    self.jump(to)
                } else {
                    Ok(Flow::Next)
                }
            }
            Inst::Label { .. } => Ok(Flow::Next),
            Inst::Call { func, args, nargs, ret } => {
                let callee = self.reg(func).clone();
                let argv = self.arg_window(args, nargs);
                self.call_value(callee, argv, ret)
            }
            Inst::Ret { src } => Ok(Flow::Return(self.reg(src).clone())),
            Inst::MakeSlice { dst, len, cap } => {
                self.set_reg(dst, Value::Slice(VmSlice::with_capacity(len as usize, cap as usize)));
                Ok(Flow::Next)
            }
            Inst::MakeMap { dst } => {
                self.set_reg(dst, Value::Map(crate::types::map::VmMap::default()));
                Ok(Flow::Next)
            }
            Inst::GetIdx { coll, idx, dst } => {
                let v = self.reg(coll).index_get(self.reg(idx))?;
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::SetIdx { coll, idx, val } => {
                self.reg(coll).index_set(self.reg(idx), self.reg(val).clone())?;
                Ok(Flow::Next)
            }
            Inst::GetMemb { obj, name, dst } => {
                let v = self.reg(obj).member_get(name)?;
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::SetMemb { obj, name, val } => {
                self.reg(obj).member_set(name, self.reg(val).clone())?;
                Ok(Flow::Next)
            }
            Inst::Foreach { coll, iter, lend, lcont } => {
                let items = match self.reg(coll) {
                    Value::Slice(s) => s.snapshot(),
                    Value::Map(m) => m.snapshot().into_iter().map(|(_, v)| v).collect(),
                    Value::String(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
                    _ => return Err(RuntimeError::incorrect_operation()),
                };
                self.set_reg(iter, Value::Int(0));
                let frame = self.frames.last_mut().expect("foreach with no frame");
                frame.loops.push(LoopEntry {
                    lend,
                    lcont,
                    iter: Some(items),
                });
                Ok(Flow::Next)
            }
            Inst::Next { coll: _, iter, val, lend } => {
                let cursor = match self.reg(iter) {
                    Value::Int(i) => *i,
                    _ => return Err(RuntimeError::incorrect_operation()),
                };
                let frame = self.frames.last().expect("next with no frame");
                let item = frame
                    .loops
                    .last()
                    .and_then(|entry| entry.iter.as_ref())
                    .and_then(|items| items.get(usize::try_from(cursor).ok()?))
                    .cloned();
                match item {
                    Some(item) => {
                        self.set_reg(val, item);
                        self.set_reg(iter, Value::Int(cursor + 1));
                        Ok(Flow::Next)
                    }
                    None => self.jump(lend),
                }
            }
            Inst::ForNum { dst, from, to, lend, lcont } => {
                let (from_v, to_v) = (int_reg(self.reg(from))?, int_reg(self.reg(to))?);
                let step = if to_v >= from_v { 1 } else { -1 };
                self.set_reg(dst, Value::Int(from_v - step));
                let frame = self.frames.last_mut().expect("fornum with no frame");
                frame.loops.push(LoopEntry {
                    lend,
                    lcont,
                    iter: None,
                });
                Ok(Flow::Next)
            }
            Inst::NextNum { dst, from, to, lend } => {
                let (from_v, to_v) = (int_reg(self.reg(from))?, int_reg(self.reg(to))?);
                let cur = int_reg(self.reg(dst))?;
                // direction is re-derived each pass from the bounds
                let step = if to_v >= from_v { 1 } else { -1 };
                let next = cur + step;
                let finished = if step > 0 { next > to_v } else { next < to_v };
                if finished {
                    self.jump(lend)
                } else {
                    self.set_reg(dst, Value::Int(next));
                    Ok(Flow::Next)
                }
            }
            Inst::While { lend, lcont } => {
                let frame = self.frames.last_mut().expect("while with no frame");
                frame.loops.push(LoopEntry {
                    lend,
                    lcont,
                    iter: None,
                });
                Ok(Flow::Next)
            }
            Inst::PopFor { lcont } => {
                let frame = self.frames.last_mut().expect("popfor with no frame");
                if let Some(idx) = frame.loops.iter().rposition(|e| e.lcont == lcont) {
                    frame.loops.truncate(idx);
                }
                Ok(Flow::Next)
            }
            Inst::Break => {
                let frame = self.frames.last_mut().expect("break with no frame");
                let entry = frame
                    .loops
                    .pop()
                    .ok_or_else(|| RuntimeError::new(ErrKind::IncorrectOperation, "Прервать вне цикла"))?;
                self.jump(entry.lend)
            }
            Inst::Continue => {
                let frame = self.frames.last().expect("continue with no frame");
                let entry = frame
                    .loops
                    .last()
                    .ok_or_else(|| RuntimeError::new(ErrKind::IncorrectOperation, "Продолжить вне цикла"))?;
                let lcont = entry.lcont;
                self.jump(lcont)
            }
            Inst::Try { err, lcatch } => {
                self.set_reg(err, Value::Nil);
                let err_abs = self.abs(err);
                let frame = self.frames.last_mut().expect("try with no frame");
                frame.catches.push(CatchEntry {
                    err_reg: err_abs,
                    label: lcatch,
                    loop_depth: frame.loops.len(),
                });
                Ok(Flow::Next)
            }
            Inst::Catch { err, lend } => {
                if self.reg(err).truthy() {
                    let message = self.reg(err).display_string()?;
                    let f = NativeFunc::zero(move |rets| {
                        rets.push(Value::from(message.as_str()));
                        Ok(())
                    });
                    if let Some(frame) = self.frames.last() {
                        frame
                            .env
                            .define(names::intern("ОписаниеОшибки"), Value::Func(VmFunc(Arc::new(FuncValue::Native(f)))));
                    }
                    Ok(Flow::Next)
                } else {
                    self.jump(lend)
                }
            }
            Inst::PopTry { lcatch } => {
                let frame = self.frames.last_mut().expect("poptry with no frame");
                if let Some(idx) = frame.catches.iter().rposition(|e| e.label == lcatch) {
                    frame.catches.truncate(idx);
                }
                Ok(Flow::Next)
            }
            Inst::Throw { src } => {
                let payload = self.reg(src);
                let message = match payload {
                    Value::String(s) => s.to_string(),
                    other => other.display_string()?,
                };
                Err(RuntimeError::custom(message))
            }
            Inst::Module { name, code } => {
                let env = self.frames.last().expect("module with no frame").env.clone();
                let child = env.child();
                self.push_frame(code, child, None, FrameKind::Module { name, bind_env: env })?;
                Ok(Flow::Jumped)
            }
            Inst::MakeFunc {
                dst,
                name,
                params,
                variadic,
                code,
            } => {
                let env = self.frames.last().expect("makefunc with no frame").env.clone();
                let f = ScriptFunc {
                    name,
                    params,
                    variadic,
                    code,
                    env,
                };
                self.set_reg(dst, Value::Func(VmFunc(Arc::new(FuncValue::Script(f)))));
                Ok(Flow::Next)
            }
            Inst::New { dst, name, args, nargs } => {
                let def = self
                    .frames
                    .last()
                    .and_then(|f| f.env.find_type(name))
                    .ok_or_else(|| {
                        RuntimeError::new(
                            ErrKind::UnknownType,
                            format!("Неизвестный тип данных: {}", names::original(name)),
                        )
                    })?;
                let argv = self.arg_window(args, nargs);
                let v = def.new_instance(&argv)?;
                self.set_reg(dst, v);
                Ok(Flow::Next)
            }
            Inst::Go { func, args, nargs } => {
                let callee = self.reg(func).clone();
                let argv = self.arg_window(args, nargs);
                match callee {
                    Value::Func(f) => {
                        sched.spawn_call(f, argv)?;
                        Ok(Flow::Next)
                    }
                    _ => Err(RuntimeError::need_type("Функция")),
                }
            }
            Inst::ChanSend { ch, val } => {
                let chan = chan_reg(self.reg(ch))?;
                let v = self.reg(val).clone();
                Ok(Flow::Block(BlockOn::Send { ch: chan, val: v }))
            }
            Inst::ChanRecv { ch, dst } => {
                let chan = chan_reg(self.reg(ch))?;
                let dst_abs = self.abs(dst);
                Ok(Flow::Block(BlockOn::Recv { ch: chan, dst: dst_abs }))
            }
            Inst::TrySend { ch, val, ok } => {
                let chan = chan_reg(self.reg(ch))?;
                let sent = chan.try_send(self.reg(val).clone())?;
                self.set_reg(ok, Value::Bool(sent));
                Ok(Flow::Next)
            }
            Inst::TryRecv { ch, val, ok, ready } => {
                let chan = chan_reg(self.reg(ch))?;
                let (v, ok_v, ready_v) = match chan.try_recv() {
                    TryRecv::Received(v) => (v, true, true),
                    TryRecv::Closed => (Value::Nil, false, true),
                    TryRecv::NotReady => (Value::Nil, false, false),
                };
                self.set_reg(val, v);
                self.set_reg(ok, Value::Bool(ok_v));
                self.set_reg(ready, Value::Bool(ready_v));
                Ok(Flow::Next)
            }
            Inst::GoShed => Ok(Flow::Yield),
            Inst::Free { reg } => {
                self.set_reg(reg, Value::Nil);
                Ok(Flow::Next)
            }
        }
    }
}

fn int_reg(v: &Value) -> RunResult<i64> {
    match v {
        Value::Int(i) => Ok(*i),
        _ => Err(RuntimeError::need_type("ЦелоеЧисло")),
    }
}

fn chan_reg(v: &Value) -> RunResult<VmChan> {
    match v {
        Value::Chan(c) => Ok(c.clone()),
        _ => Err(RuntimeError::need_type("Канал")),
    }
}

/// Binds call arguments to parameter names in the callee scope. A variadic
/// closure collects the tail into a sequence under the last parameter.
fn bind_params(f: &ScriptFunc, args: Vec<Value>, env: &Env) -> RunResult<()> {
    if f.variadic {
        let fixed = f.params.len().saturating_sub(1);
        if args.len() < fixed {
            return Err(RuntimeError::need_args(fixed));
        }
        for (param, arg) in f.params[..fixed].iter().zip(&args) {
            env.define(*param, arg.clone());
        }
        if let Some(last) = f.params.last() {
            let rest: Vec<Value> = args[fixed..].to_vec();
            env.define(*last, Value::Slice(VmSlice::from_values(rest)));
        }
    } else {
        if args.len() != f.params.len() {
            return Err(RuntimeError::need_args(f.params.len()));
        }
        for (param, arg) in f.params.iter().zip(args) {
            env.define(*param, arg);
        }
    }
    Ok(())
}
