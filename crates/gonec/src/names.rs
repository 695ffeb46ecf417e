//! Process-wide identifier interning.
//!
//! Script identifiers are compared case-insensitively, so the table stores the
//! first-seen spelling alongside the case-folded form and resolves lookups
//! through the folded key. Every identifier reference in bytecode is a dense
//! [`NameId`]; ids are stable for the lifetime of the process.

use std::sync::{LazyLock, RwLock};

use ahash::AHashMap;

/// Index into the process-wide name table.
///
/// Uses `u32` to save space in instruction operands. Member lookups on host
/// objects and environment bindings are keyed by this id, never by the raw
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NameId(u32);

impl NameId {
    /// Reconstructs a NameId from a raw operand stored in encoded bytecode.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

struct NameEntry {
    original: String,
    folded: String,
}

#[derive(Default)]
struct NameTable {
    by_folded: AHashMap<String, NameId>,
    entries: Vec<NameEntry>,
}

static NAMES: LazyLock<RwLock<NameTable>> = LazyLock::new(|| RwLock::new(NameTable::default()));

fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Interns an identifier, returning its stable id.
///
/// The first-seen spelling is preserved; later interns of a differently-cased
/// spelling resolve to the same id.
pub fn intern(name: &str) -> NameId {
    let folded = fold(name);
    {
        let table = NAMES.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(&id) = table.by_folded.get(&folded) {
            return id;
        }
    }
    let mut table = NAMES.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(&id) = table.by_folded.get(&folded) {
        return id;
    }
    let id = NameId(u32::try_from(table.entries.len()).expect("name table exceeds u32 range"));
    table.entries.push(NameEntry {
        original: name.to_string(),
        folded: folded.clone(),
    });
    table.by_folded.insert(folded, id);
    id
}

/// Returns the canonical (first-seen) spelling of an interned identifier.
#[must_use]
pub fn original(id: NameId) -> String {
    let table = NAMES.read().unwrap_or_else(std::sync::PoisonError::into_inner);
    table.entries[id.0 as usize].original.clone()
}

/// Returns the case-folded spelling of an interned identifier.
#[must_use]
pub fn folded(id: NameId) -> String {
    let table = NAMES.read().unwrap_or_else(std::sync::PoisonError::into_inner);
    table.entries[id.0 as usize].folded.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_resolution() {
        let a = intern("Поле");
        let b = intern("поле");
        let c = intern("ПОЛЕ");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn first_spelling_is_preserved() {
        let id = intern("ОписаниеОшибкиТест");
        assert_eq!(original(id), "ОписаниеОшибкиТест");
        assert_eq!(folded(id), "описаниеошибкитест");
        let id2 = intern("описаниеошибкитест");
        assert_eq!(id, id2);
        assert_eq!(original(id2), "ОписаниеОшибкиТест");
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        assert_ne!(intern("первый"), intern("второй"));
    }
}
