//! Register-addressed instruction set.
//!
//! Instructions carry register operands, symbolic labels, and (for loads,
//! functions and modules) embedded payloads. Labels stay symbolic during
//! lowering; [`Code::map_labels`] resolves every referenced label to an
//! absolute instruction index in the label table, which jumps consult at
//! runtime. The byte codec is host-visible: one opcode byte, fixed-width
//! little-endian operands, embedded literals in the value binary format.

use std::sync::Arc;

use strum::FromRepr;

use crate::{
    ast::Pos,
    error::{LowerError, LowerResult, RunResult, RuntimeError},
    names::NameId,
    value::{BinOp, UnOp, Value},
};

/// Register index inside the current frame window.
pub type Reg = u32;

/// Symbolic label id, unique across a whole lowering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// A single instruction.
#[derive(Debug, Clone)]
pub enum Inst {
    /// R ← literal K
    Load { dst: Reg, val: Value },
    /// Rdst ← Rsrc
    Mv { src: Reg, dst: Reg },
    /// R ← env.get(N), Nil when unbound
    Get { dst: Reg, name: NameId },
    /// env.set(N, R), walking outward
    Set { src: Reg, name: NameId },
    /// bind N ← R in the current scope
    SetLocal { src: Reg, name: NameId },
    Oper { dst: Reg, lhs: Reg, rhs: Reg, op: BinOp },
    Unary { dst: Reg, src: Reg, op: UnOp },
    /// deep equality probe for switch arms
    Equal { dst: Reg, a: Reg, b: Reg },
    IsSlice { src: Reg, dst: Reg },
    IsChan { src: Reg, dst: Reg },
    Jmp { to: Label },
    JFalse { cond: Reg, to: Label },
    JTrue { cond: Reg, to: Label },
    /// resolved to its own index by map_labels; no-op at runtime
    Label { id: Label },
    Call { func: Reg, args: Reg, nargs: u32, ret: Reg },
    Ret { src: Reg },
    MakeSlice { dst: Reg, len: u32, cap: u32 },
    MakeMap { dst: Reg },
    GetIdx { coll: Reg, idx: Reg, dst: Reg },
    SetIdx { coll: Reg, idx: Reg, val: Reg },
    GetMemb { obj: Reg, name: NameId, dst: Reg },
    SetMemb { obj: Reg, name: NameId, val: Reg },
    /// initializes iteration over Rcoll with the cursor in Riter
    Foreach { coll: Reg, iter: Reg, lend: Label, lcont: Label },
    /// advances iteration or jumps to Lend
    Next { coll: Reg, iter: Reg, val: Reg, lend: Label },
    ForNum { dst: Reg, from: Reg, to: Reg, lend: Label, lcont: Label },
    NextNum { dst: Reg, from: Reg, to: Reg, lend: Label },
    While { lend: Label, lcont: Label },
    PopFor { lcont: Label },
    Break,
    Continue,
    Try { err: Reg, lcatch: Label },
    Catch { err: Reg, lend: Label },
    PopTry { lcatch: Label },
    Throw { src: Reg },
    Module { name: NameId, code: Arc<Code> },
    MakeFunc {
        dst: Reg,
        name: Option<NameId>,
        params: Arc<[NameId]>,
        variadic: bool,
        code: Arc<Code>,
    },
    New { dst: Reg, name: NameId, args: Reg, nargs: u32 },
    Go { func: Reg, args: Reg, nargs: u32 },
    ChanSend { ch: Reg, val: Reg },
    ChanRecv { ch: Reg, dst: Reg },
    TrySend { ch: Reg, val: Reg, ok: Reg },
    TryRecv { ch: Reg, val: Reg, ok: Reg, ready: Reg },
    GoShed,
    Free { reg: Reg },
}

/// Opcode byte values for the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Op {
    Load = 0,
    Mv,
    Get,
    Set,
    SetLocal,
    Oper,
    Unary,
    Equal,
    IsSlice,
    IsChan,
    Jmp,
    JFalse,
    JTrue,
    Label,
    Call,
    Ret,
    MakeSlice,
    MakeMap,
    GetIdx,
    SetIdx,
    GetMemb,
    SetMemb,
    Foreach,
    Next,
    ForNum,
    NextNum,
    While,
    PopFor,
    Break,
    Continue,
    Try,
    Catch,
    PopTry,
    Throw,
    Module,
    MakeFunc,
    New,
    Go,
    ChanSend,
    ChanRecv,
    TrySend,
    TryRecv,
    GoShed,
    Free,
}

impl Inst {
    #[must_use]
    pub fn op(&self) -> Op {
        match self {
            Self::Load { .. } => Op::Load,
            Self::Mv { .. } => Op::Mv,
            Self::Get { .. } => Op::Get,
            Self::Set { .. } => Op::Set,
            Self::SetLocal { .. } => Op::SetLocal,
            Self::Oper { .. } => Op::Oper,
            Self::Unary { .. } => Op::Unary,
            Self::Equal { .. } => Op::Equal,
            Self::IsSlice { .. } => Op::IsSlice,
            Self::IsChan { .. } => Op::IsChan,
            Self::Jmp { .. } => Op::Jmp,
            Self::JFalse { .. } => Op::JFalse,
            Self::JTrue { .. } => Op::JTrue,
            Self::Label { .. } => Op::Label,
            Self::Call { .. } => Op::Call,
            Self::Ret { .. } => Op::Ret,
            Self::MakeSlice { .. } => Op::MakeSlice,
            Self::MakeMap { .. } => Op::MakeMap,
            Self::GetIdx { .. } => Op::GetIdx,
            Self::SetIdx { .. } => Op::SetIdx,
            Self::GetMemb { .. } => Op::GetMemb,
            Self::SetMemb { .. } => Op::SetMemb,
            Self::Foreach { .. } => Op::Foreach,
            Self::Next { .. } => Op::Next,
            Self::ForNum { .. } => Op::ForNum,
            Self::NextNum { .. } => Op::NextNum,
            Self::While { .. } => Op::While,
            Self::PopFor { .. } => Op::PopFor,
            Self::Break => Op::Break,
            Self::Continue => Op::Continue,
            Self::Try { .. } => Op::Try,
            Self::Catch { .. } => Op::Catch,
            Self::PopTry { .. } => Op::PopTry,
            Self::Throw { .. } => Op::Throw,
            Self::Module { .. } => Op::Module,
            Self::MakeFunc { .. } => Op::MakeFunc,
            Self::New { .. } => Op::New,
            Self::Go { .. } => Op::Go,
            Self::ChanSend { .. } => Op::ChanSend,
            Self::ChanRecv { .. } => Op::ChanRecv,
            Self::TrySend { .. } => Op::TrySend,
            Self::TryRecv { .. } => Op::TryRecv,
            Self::GoShed => Op::GoShed,
            Self::Free { .. } => Op::Free,
        }
    }

    /// Labels referenced by this instruction, for resolution checks.
    fn referenced_labels(&self) -> Vec<Label> {
        match self {
            Self::Jmp { to } | Self::JFalse { to, .. } | Self::JTrue { to, .. } => vec![*to],
            Self::Foreach { lend, lcont, .. } | Self::ForNum { lend, lcont, .. } | Self::While { lend, lcont } => {
                vec![*lend, *lcont]
            }
            Self::Next { lend, .. } | Self::NextNum { lend, .. } => vec![*lend],
            Self::Try { lcatch, .. } | Self::PopTry { lcatch } => vec![*lcatch],
            Self::Catch { lend, .. } => vec![*lend],
            Self::PopFor { lcont } => vec![*lcont],
            _ => Vec::new(),
        }
    }
}

/// Unresolved slot in the label table.
const UNRESOLVED: u32 = u32::MAX;

/// A lowered code block.
#[derive(Debug, Default)]
pub struct Code {
    pub insts: Vec<Inst>,
    pub positions: Vec<Pos>,
    /// label id → absolute instruction index
    pub(crate) labels: Vec<u32>,
    pub max_reg: Reg,
}

impl Code {
    /// Resolves every bound label to its instruction index and verifies that
    /// each referenced label is bound in this block.
    ///
    /// `label_count` is the lowering run's global label counter, so nested
    /// code blocks share one id space.
    pub fn map_labels(&mut self, label_count: u32) -> LowerResult<()> {
        self.labels = vec![UNRESOLVED; label_count as usize];
        for (idx, inst) in self.insts.iter().enumerate() {
            if let Inst::Label { id } = inst {
                self.labels[id.0 as usize] = u32::try_from(idx).map_err(|_| {
                    LowerError::new("слишком длинный блок кода", Pos::default())
                })?;
            }
        }
        for (idx, inst) in self.insts.iter().enumerate() {
            for label in inst.referenced_labels() {
                if self.labels.get(label.0 as usize).copied().unwrap_or(UNRESOLVED) == UNRESOLVED {
                    return Err(LowerError::new(
                        format!("метка {} не определена", label.0),
                        self.positions.get(idx).copied().unwrap_or_default(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Absolute index of a resolved label.
    pub fn label_addr(&self, label: Label) -> RunResult<usize> {
        match self.labels.get(label.0 as usize) {
            Some(&addr) if addr != UNRESOLVED => Ok(addr as usize),
            _ => Err(RuntimeError::new(
                crate::error::ErrKind::IncorrectMessage,
                format!("Неразрешенная метка {}", label.0),
            )),
        }
    }

    /// True when every referenced label resolves; exposed for tests.
    #[must_use]
    pub fn labels_resolved(&self) -> bool {
        self.insts
            .iter()
            .flat_map(Inst::referenced_labels)
            .all(|l| self.label_addr(l).is_ok())
    }

    /// Encodes the block in the host-visible byte format.
    pub fn encode(&self) -> RunResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> RunResult<()> {
        out.extend_from_slice(&(self.insts.len() as u32).to_le_bytes());
        for (inst, pos) in self.insts.iter().zip(&self.positions) {
            encode_inst(inst, *pos, out)?;
        }
        out.extend_from_slice(&(self.labels.len() as u32).to_le_bytes());
        for &addr in &self.labels {
            out.extend_from_slice(&addr.to_le_bytes());
        }
        out.extend_from_slice(&self.max_reg.to_le_bytes());
        Ok(())
    }

    /// Decodes a block produced by [`Code::encode`].
    pub fn decode(data: &[u8]) -> RunResult<Code> {
        let mut r = ByteReader { data, at: 0 };
        let code = decode_code(&mut r)?;
        if r.at != data.len() {
            return Err(RuntimeError::new(
                crate::error::ErrKind::IncorrectMessage,
                "Неверный формат сообщения",
            ));
        }
        Ok(code)
    }
}

fn u32le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn encode_inst(inst: &Inst, pos: Pos, out: &mut Vec<u8>) -> RunResult<()> {
    out.push(inst.op() as u8);
    out.extend_from_slice(&pos.line.to_le_bytes());
    out.extend_from_slice(&pos.column.to_le_bytes());
    match inst {
        Inst::Load { dst, val } => {
            u32le(out, *dst);
            let payload = crate::binary::marshal(val)?;
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&payload);
        }
        Inst::Mv { src, dst } => {
            u32le(out, *src);
            u32le(out, *dst);
        }
        Inst::Get { dst, name } => {
            u32le(out, *dst);
            u32le(out, name.raw());
        }
        Inst::Set { src, name } | Inst::SetLocal { src, name } => {
            u32le(out, *src);
            u32le(out, name.raw());
        }
        Inst::Oper { dst, lhs, rhs, op } => {
            u32le(out, *dst);
            u32le(out, *lhs);
            u32le(out, *rhs);
            u32le(out, u32::from(*op as u8));
        }
        Inst::Unary { dst, src, op } => {
            u32le(out, *dst);
            u32le(out, *src);
            u32le(out, u32::from(*op as u8));
        }
        Inst::Equal { dst, a, b } => {
            u32le(out, *dst);
            u32le(out, *a);
            u32le(out, *b);
        }
        Inst::IsSlice { src, dst } | Inst::IsChan { src, dst } => {
            u32le(out, *src);
            u32le(out, *dst);
        }
        Inst::Jmp { to } => u32le(out, to.0),
        Inst::JFalse { cond, to } | Inst::JTrue { cond, to } => {
            u32le(out, *cond);
            u32le(out, to.0);
        }
        Inst::Label { id } => u32le(out, id.0),
        Inst::Call { func, args, nargs, ret } => {
            u32le(out, *func);
            u32le(out, *args);
            u32le(out, *nargs);
            u32le(out, *ret);
        }
        Inst::Ret { src } | Inst::Throw { src } | Inst::Free { reg: src } => u32le(out, *src),
        Inst::MakeSlice { dst, len, cap } => {
            u32le(out, *dst);
            u32le(out, *len);
            u32le(out, *cap);
        }
        Inst::MakeMap { dst } => u32le(out, *dst),
        Inst::GetIdx { coll, idx, dst } => {
            u32le(out, *coll);
            u32le(out, *idx);
            u32le(out, *dst);
        }
        Inst::SetIdx { coll, idx, val } => {
            u32le(out, *coll);
            u32le(out, *idx);
            u32le(out, *val);
        }
        Inst::GetMemb { obj, name, dst } => {
            u32le(out, *obj);
            u32le(out, name.raw());
            u32le(out, *dst);
        }
        Inst::SetMemb { obj, name, val } => {
            u32le(out, *obj);
            u32le(out, name.raw());
            u32le(out, *val);
        }
        Inst::Foreach { coll, iter, lend, lcont } => {
            u32le(out, *coll);
            u32le(out, *iter);
            u32le(out, lend.0);
            u32le(out, lcont.0);
        }
        Inst::Next { coll, iter, val, lend } => {
            u32le(out, *coll);
            u32le(out, *iter);
            u32le(out, *val);
            u32le(out, lend.0);
        }
        Inst::ForNum { dst, from, to, lend, lcont } => {
            u32le(out, *dst);
            u32le(out, *from);
            u32le(out, *to);
            u32le(out, lend.0);
            u32le(out, lcont.0);
        }
        Inst::NextNum { dst, from, to, lend } => {
            u32le(out, *dst);
            u32le(out, *from);
            u32le(out, *to);
            u32le(out, lend.0);
        }
        Inst::While { lend, lcont } => {
            u32le(out, lend.0);
            u32le(out, lcont.0);
        }
        Inst::PopFor { lcont } => u32le(out, lcont.0),
        Inst::Break | Inst::Continue | Inst::GoShed => {}
        Inst::Try { err, lcatch } => {
            u32le(out, *err);
            u32le(out, lcatch.0);
        }
        Inst::Catch { err, lend } => {
            u32le(out, *err);
            u32le(out, lend.0);
        }
        Inst::PopTry { lcatch } => u32le(out, lcatch.0),
        Inst::Module { name, code } => {
            u32le(out, name.raw());
            code.encode_into(out)?;
        }
        Inst::MakeFunc {
            dst,
            name,
            params,
            variadic,
            code,
        } => {
            u32le(out, *dst);
            u32le(out, name.map_or(u32::MAX, NameId::raw));
            u32le(out, params.len() as u32);
            for p in params.iter() {
                u32le(out, p.raw());
            }
            u32le(out, u32::from(*variadic));
            code.encode_into(out)?;
        }
        Inst::New { dst, name, args, nargs } => {
            u32le(out, *dst);
            u32le(out, name.raw());
            u32le(out, *args);
            u32le(out, *nargs);
        }
        Inst::Go { func, args, nargs } => {
            u32le(out, *func);
            u32le(out, *args);
            u32le(out, *nargs);
        }
        Inst::ChanSend { ch, val } => {
            u32le(out, *ch);
            u32le(out, *val);
        }
        Inst::ChanRecv { ch, dst } => {
            u32le(out, *ch);
            u32le(out, *dst);
        }
        Inst::TrySend { ch, val, ok } => {
            u32le(out, *ch);
            u32le(out, *val);
            u32le(out, *ok);
        }
        Inst::TryRecv { ch, val, ok, ready } => {
            u32le(out, *ch);
            u32le(out, *val);
            u32le(out, *ok);
            u32le(out, *ready);
        }
    }
    Ok(())
}

struct ByteReader<'a> {
    data: &'a [u8],
    at: usize,
}

impl ByteReader<'_> {
    fn take(&mut self, n: usize) -> RunResult<&[u8]> {
        let end = self.at.checked_add(n).ok_or_else(RuntimeError::decode_eof)?;
        if end > self.data.len() {
            return Err(RuntimeError::decode_eof());
        }
        let chunk = &self.data[self.at..end];
        self.at = end;
        Ok(chunk)
    }

    fn byte(&mut self) -> RunResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> RunResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }
}

fn decode_code(r: &mut ByteReader<'_>) -> RunResult<Code> {
    let count = r.u32()? as usize;
    let mut insts = Vec::with_capacity(count.min(1 << 16));
    let mut positions = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let (inst, pos) = decode_inst(r)?;
        insts.push(inst);
        positions.push(pos);
    }
    let label_count = r.u32()? as usize;
    let mut labels = Vec::with_capacity(label_count.min(1 << 16));
    for _ in 0..label_count {
        labels.push(r.u32()?);
    }
    let max_reg = r.u32()?;
    Ok(Code {
        insts,
        positions,
        labels,
        max_reg,
    })
}

fn decode_inst(r: &mut ByteReader<'_>) -> RunResult<(Inst, Pos)> {
    let op = Op::from_repr(r.byte()?).ok_or_else(RuntimeError::unknown_type)?;
    let pos = Pos {
        line: r.u32()?,
        column: r.u32()?,
    };
    let binop = |raw: u32| {
        BinOp::from_repr(raw as u8).ok_or_else(RuntimeError::unknown_operation)
    };
    let unop = |raw: u32| {
        UnOp::from_repr(raw as u8).ok_or_else(RuntimeError::unknown_operation)
    };
    let inst = match op {
        Op::Load => {
            let dst = r.u32()?;
            let len = r.u32()? as usize;
            let payload = r.take(len)?;
            Inst::Load {
                dst,
                val: crate::binary::unmarshal(payload)?,
            }
        }
        Op::Mv => Inst::Mv {
            src: r.u32()?,
            dst: r.u32()?,
        },
        Op::Get => Inst::Get {
            dst: r.u32()?,
            name: NameId::from_raw(r.u32()?),
        },
        Op::Set => Inst::Set {
            src: r.u32()?,
            name: NameId::from_raw(r.u32()?),
        },
        Op::SetLocal => Inst::SetLocal {
            src: r.u32()?,
            name: NameId::from_raw(r.u32()?),
        },
        Op::Oper => Inst::Oper {
            dst: r.u32()?,
            lhs: r.u32()?,
            rhs: r.u32()?,
            op: binop(r.u32()?)?,
        },
        Op::Unary => Inst::Unary {
            dst: r.u32()?,
            src: r.u32()?,
            op: unop(r.u32()?)?,
        },
        Op::Equal => Inst::Equal {
            dst: r.u32()?,
            a: r.u32()?,
            b: r.u32()?,
        },
        Op::IsSlice => Inst::IsSlice {
            src: r.u32()?,
            dst: r.u32()?,
        },
        Op::IsChan => Inst::IsChan {
            src: r.u32()?,
            dst: r.u32()?,
        },
        Op::Jmp => Inst::Jmp { to: Label(r.u32()?) },
        Op::JFalse => Inst::JFalse {
            cond: r.u32()?,
            to: Label(r.u32()?),
        },
        Op::JTrue => Inst::JTrue {
            cond: r.u32()?,
            to: Label(r.u32()?),
        },
        Op::Label => Inst::Label { id: Label(r.u32()?) },
        Op::Call => Inst::Call {
            func: r.u32()?,
            args: r.u32()?,
            nargs: r.u32()?,
            ret: r.u32()?,
        },
        Op::Ret => Inst::Ret { src: r.u32()? },
        Op::MakeSlice => Inst::MakeSlice {
            dst: r.u32()?,
            len: r.u32()?,
            cap: r.u32()?,
        },
        Op::MakeMap => Inst::MakeMap { dst: r.u32()? },
        Op::GetIdx => Inst::GetIdx {
            coll: r.u32()?,
            idx: r.u32()?,
            dst: r.u32()?,
        },
        Op::SetIdx => Inst::SetIdx {
            coll: r.u32()?,
            idx: r.u32()?,
            val: r.u32()?,
        },
        Op::GetMemb => Inst::GetMemb {
            obj: r.u32()?,
            name: NameId::from_raw(r.u32()?),
            dst: r.u32()?,
        },
        Op::SetMemb => Inst::SetMemb {
            obj: r.u32()?,
            name: NameId::from_raw(r.u32()?),
            val: r.u32()?,
        },
        Op::Foreach => Inst::Foreach {
            coll: r.u32()?,
            iter: r.u32()?,
            lend: Label(r.u32()?),
            lcont: Label(r.u32()?),
        },
        Op::Next => Inst::Next {
            coll: r.u32()?,
            iter: r.u32()?,
            val: r.u32()?,
            lend: Label(r.u32()?),
        },
        Op::ForNum => Inst::ForNum {
            dst: r.u32()?,
            from: r.u32()?,
            to: r.u32()?,
            lend: Label(r.u32()?),
            lcont: Label(r.u32()?),
        },
        Op::NextNum => Inst::NextNum {
            dst: r.u32()?,
            from: r.u32()?,
            to: r.u32()?,
            lend: Label(r.u32()?),
        },
        Op::While => Inst::While {
            lend: Label(r.u32()?),
            lcont: Label(r.u32()?),
        },
        Op::PopFor => Inst::PopFor { lcont: Label(r.u32()?) },
        Op::Break => Inst::Break,
        Op::Continue => Inst::Continue,
        Op::Try => Inst::Try {
            err: r.u32()?,
            lcatch: Label(r.u32()?),
        },
        Op::Catch => Inst::Catch {
            err: r.u32()?,
            lend: Label(r.u32()?),
        },
        Op::PopTry => Inst::PopTry { lcatch: Label(r.u32()?) },
        Op::Throw => Inst::Throw { src: r.u32()? },
        Op::Module => Inst::Module {
            name: NameId::from_raw(r.u32()?),
            code: Arc::new(decode_code(r)?),
        },
        Op::MakeFunc => {
            let dst = r.u32()?;
            let raw_name = r.u32()?;
            let name = (raw_name != u32::MAX).then(|| NameId::from_raw(raw_name));
            let param_count = r.u32()? as usize;
            let mut params = Vec::with_capacity(param_count.min(1 << 12));
            for _ in 0..param_count {
                params.push(NameId::from_raw(r.u32()?));
            }
            let variadic = r.u32()? != 0;
            Inst::MakeFunc {
                dst,
                name,
                params: params.into(),
                variadic,
                code: Arc::new(decode_code(r)?),
            }
        }
        Op::New => Inst::New {
            dst: r.u32()?,
            name: NameId::from_raw(r.u32()?),
            args: r.u32()?,
            nargs: r.u32()?,
        },
        Op::Go => Inst::Go {
            func: r.u32()?,
            args: r.u32()?,
            nargs: r.u32()?,
        },
        Op::ChanSend => Inst::ChanSend {
            ch: r.u32()?,
            val: r.u32()?,
        },
        Op::ChanRecv => Inst::ChanRecv {
            ch: r.u32()?,
            dst: r.u32()?,
        },
        Op::TrySend => Inst::TrySend {
            ch: r.u32()?,
            val: r.u32()?,
            ok: r.u32()?,
        },
        Op::TryRecv => Inst::TryRecv {
            ch: r.u32()?,
            val: r.u32()?,
            ok: r.u32()?,
            ready: r.u32()?,
        },
        Op::GoShed => Inst::GoShed,
        Op::Free => Inst::Free { reg: r.u32()? },
    };
    Ok((inst, pos))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn map_labels_resolves_bound_labels() {
        let mut code = Code {
            insts: vec![
                Inst::Jmp { to: Label(0) },
                Inst::Label { id: Label(0) },
                Inst::Ret { src: 0 },
            ],
            positions: vec![Pos::default(); 3],
            labels: Vec::new(),
            max_reg: 0,
        };
        code.map_labels(1).unwrap();
        assert_eq!(code.label_addr(Label(0)).unwrap(), 1);
        assert!(code.labels_resolved());
    }

    #[test]
    fn map_labels_rejects_unbound_references() {
        let mut code = Code {
            insts: vec![Inst::Jmp { to: Label(3) }],
            positions: vec![Pos { line: 2, column: 4 }],
            labels: Vec::new(),
            max_reg: 0,
        };
        let err = code.map_labels(4).unwrap_err();
        assert!(err.message.contains("метка"));
        assert_eq!(err.pos, Pos { line: 2, column: 4 });
    }

    #[test]
    fn codec_round_trip() {
        let nested = {
            let mut c = Code {
                insts: vec![Inst::Ret { src: 0 }],
                positions: vec![Pos { line: 5, column: 1 }],
                labels: Vec::new(),
                max_reg: 2,
            };
            c.map_labels(0).unwrap();
            c
        };
        let mut code = Code {
            insts: vec![
                Inst::Load {
                    dst: 0,
                    val: Value::Int(42),
                },
                Inst::MakeFunc {
                    dst: 1,
                    name: Some(crate::names::intern("тест")),
                    params: vec![crate::names::intern("а")].into(),
                    variadic: false,
                    code: Arc::new(nested),
                },
                Inst::Label { id: Label(0) },
                Inst::JFalse {
                    cond: 1,
                    to: Label(0),
                },
            ],
            positions: vec![Pos { line: 1, column: 1 }; 4],
            labels: Vec::new(),
            max_reg: 3,
        };
        code.map_labels(1).unwrap();

        let bytes = code.encode().unwrap();
        let decoded = Code::decode(&bytes).unwrap();
        assert_eq!(decoded.insts.len(), 4);
        assert_eq!(decoded.max_reg, 3);
        assert_eq!(decoded.label_addr(Label(0)).unwrap(), 2);
        match &decoded.insts[1] {
            Inst::MakeFunc { params, code, .. } => {
                assert_eq!(params.len(), 1);
                assert_eq!(code.max_reg, 2);
            }
            other => panic!("expected MakeFunc, got {other:?}"),
        }
        assert_eq!(decoded.positions[0], Pos { line: 1, column: 1 });
    }

    #[test]
    fn truncated_code_reports_eof() {
        let mut code = Code {
            insts: vec![Inst::GoShed],
            positions: vec![Pos::default()],
            labels: Vec::new(),
            max_reg: 0,
        };
        code.map_labels(0).unwrap();
        let bytes = code.encode().unwrap();
        assert!(Code::decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
