//! Structured runtime and lowering errors.
//!
//! Every runtime failure carries a stable [`ErrKind`], a human-readable
//! Russian message, and (once it has crossed the VM dispatch loop) the source
//! position of the failing instruction. A failing native call is
//! indistinguishable from a `THROW` at the call site.

use strum::IntoStaticStr;
use thiserror::Error;

use crate::ast::Pos;

/// Result alias for operations that can fail at script runtime.
pub type RunResult<T> = Result<T, RuntimeError>;

/// Result alias for the lowering pass.
pub type LowerResult<T> = Result<T, LowerError>;

/// Stable classification of a runtime error.
///
/// The set mirrors the interpreter's error taxonomy; `Custom` is produced by
/// the script-level `THROW` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum ErrKind {
    NeedArgs,
    NeedType,
    IndexOutOfBoundary,
    NotConverted,
    NotBinaryConverted,
    UnknownType,
    IncorrectFieldType,
    IncorrectStructType,
    NotDefined,
    IncorrectOperation,
    UnknownOperation,
    WrongChannel,
    Eof,
    IncorrectMessage,
    TransactionState,
    WrongDbValue,
    Custom,
}

/// A runtime error with its classification and source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: ErrKind,
    pub message: String,
    pub pos: Option<Pos>,
}

impl std::error::Error for RuntimeError {}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pos {
            Some(pos) => write!(f, "{} (строка {}, колонка {})", self.message, pos.line, pos.column),
            None => f.write_str(&self.message),
        }
    }
}

impl RuntimeError {
    pub fn new(kind: ErrKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pos: None,
        }
    }

    /// Attaches a source position unless one is already recorded.
    ///
    /// The innermost position wins: an error raised inside a callee keeps the
    /// callee's position while it unwinds through caller frames.
    #[must_use]
    pub fn with_pos(mut self, pos: Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos);
        }
        self
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::new(ErrKind::Custom, message)
    }

    #[must_use]
    pub fn need_args(n: usize) -> Self {
        Self::new(ErrKind::NeedArgs, format!("Неверное количество параметров (требуется {n})"))
    }

    #[must_use]
    pub fn max_args(n: usize) -> Self {
        Self::new(ErrKind::NeedArgs, format!("Неверное количество параметров (максимум {n})"))
    }

    #[must_use]
    pub fn no_args_needed() -> Self {
        Self::new(ErrKind::NeedArgs, "Параметры не требуются")
    }

    pub fn need_type(type_name: impl std::fmt::Display) -> Self {
        Self::new(ErrKind::NeedType, format!("Требуется значение типа {type_name}"))
    }

    #[must_use]
    pub fn not_defined() -> Self {
        Self::new(ErrKind::NotDefined, "Не определено")
    }

    #[must_use]
    pub fn index_out_of_bounds() -> Self {
        Self::new(ErrKind::IndexOutOfBoundary, "Индекс находится за пределами массива")
    }

    #[must_use]
    pub fn incorrect_operation() -> Self {
        Self::new(ErrKind::IncorrectOperation, "Операция между значениями невозможна")
    }

    #[must_use]
    pub fn unknown_operation() -> Self {
        Self::new(ErrKind::UnknownOperation, "Неизвестная операция")
    }

    #[must_use]
    pub fn not_converted() -> Self {
        Self::new(ErrKind::NotConverted, "Приведение к типу невозможно")
    }

    #[must_use]
    pub fn unknown_type() -> Self {
        Self::new(ErrKind::UnknownType, "Неизвестный тип данных")
    }

    #[must_use]
    pub fn not_binary_converted() -> Self {
        Self::new(
            ErrKind::NotBinaryConverted,
            "Значение не может быть преобразовано в бинарный формат",
        )
    }

    #[must_use]
    pub fn incorrect_field_type() -> Self {
        Self::new(ErrKind::IncorrectFieldType, "Поле структуры имеет другой тип")
    }

    pub fn wrong_channel(message: impl Into<String>) -> Self {
        Self::new(ErrKind::WrongChannel, message)
    }

    #[must_use]
    pub fn decode_eof() -> Self {
        Self::new(ErrKind::Eof, "Мало данных для декодирования")
    }
}

/// An error produced while lowering the AST to bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (строка {}, колонка {})", pos.line, pos.column)]
pub struct LowerError {
    pub message: String,
    pub pos: Pos,
}

impl LowerError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Top-level error for the full compile-and-run pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GonecError {
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_sticky() {
        let err = RuntimeError::incorrect_operation()
            .with_pos(Pos { line: 3, column: 7 })
            .with_pos(Pos { line: 9, column: 1 });
        assert_eq!(err.pos, Some(Pos { line: 3, column: 7 }));
        assert_eq!(
            err.to_string(),
            "Операция между значениями невозможна (строка 3, колонка 7)"
        );
    }

    #[test]
    fn kind_names_are_stable() {
        let name: &'static str = ErrKind::IndexOutOfBoundary.into();
        assert_eq!(name, "IndexOutOfBoundary");
    }
}
