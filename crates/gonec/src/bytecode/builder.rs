//! Builder for emitting instructions during lowering.
//!
//! Tracks the label counter (monotone across nested code blocks so label ids
//! stay globally unique) and the register high-water mark that sizes the
//! frame window. `build` runs label resolution and returns the finished
//! [`Code`] block.

use crate::{
    ast::Pos,
    bytecode::inst::{Code, Inst, Label, Reg},
    error::LowerResult,
};

#[derive(Debug, Default)]
pub struct CodeBuilder {
    insts: Vec<Inst>,
    positions: Vec<Pos>,
    max_reg: Reg,
    next_label: u32,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a nested builder continuing an outer label counter.
    #[must_use]
    pub fn with_label_counter(next_label: u32) -> Self {
        Self {
            next_label,
            ..Self::default()
        }
    }

    pub fn emit(&mut self, inst: Inst, pos: Pos) {
        self.insts.push(inst);
        self.positions.push(pos);
    }

    /// Allocates a fresh label id.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Binds a label at the current position by emitting its marker.
    pub fn bind(&mut self, label: Label, pos: Pos) {
        self.emit(Inst::Label { id: label }, pos);
    }

    /// Raises the register high-water mark.
    pub fn touch_reg(&mut self, reg: Reg) {
        self.max_reg = self.max_reg.max(reg);
    }

    #[must_use]
    pub fn label_counter(&self) -> u32 {
        self.next_label
    }

    /// Imports a nested builder's label counter after it finished.
    pub fn resume_label_counter(&mut self, next_label: u32) {
        self.next_label = next_label;
    }

    /// Finishes the block: resolves labels and returns the code plus the
    /// final label counter for the caller to resume.
    pub fn build(self) -> LowerResult<(Code, u32)> {
        let mut code = Code {
            insts: self.insts,
            positions: self.positions,
            max_reg: self.max_reg,
            ..Code::default()
        };
        code.map_labels(self.next_label)?;
        Ok((code, self.next_label))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::Value;

    #[test]
    fn labels_are_globally_unique() {
        let mut outer = CodeBuilder::new();
        let l0 = outer.new_label();
        let mut inner = CodeBuilder::with_label_counter(outer.label_counter());
        let l1 = inner.new_label();
        assert_ne!(l0, l1);
        outer.resume_label_counter(inner.label_counter());
        assert_eq!(outer.new_label(), Label(2));
    }

    #[test]
    fn build_resolves_labels() {
        let mut b = CodeBuilder::new();
        let end = b.new_label();
        b.emit(Inst::Jmp { to: end }, Pos::default());
        b.emit(
            Inst::Load {
                dst: 0,
                val: Value::Nil,
            },
            Pos::default(),
        );
        b.bind(end, Pos::default());
        b.touch_reg(4);
        let (code, counter) = b.build().unwrap();
        assert_eq!(counter, 1);
        assert_eq!(code.max_reg, 4);
        assert_eq!(code.label_addr(end).unwrap(), 2);
    }

    #[test]
    fn unbound_label_fails_build() {
        let mut b = CodeBuilder::new();
        let end = b.new_label();
        b.emit(Inst::Jmp { to: end }, Pos { line: 1, column: 9 });
        assert!(b.build().is_err());
    }
}
