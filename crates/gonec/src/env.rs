//! Nested lexical environments.
//!
//! A scope node maps name ids to values and to type descriptors, and points
//! at its enclosing scope. Lookup walks outward; `set` walks outward and
//! creates the binding in the current scope when the name is unbound
//! anywhere; `define` always binds in the current scope (the `Перем`
//! statement).
//! Closures capture the environment reference, so mutations are visible both
//! ways. Environments are shared across tasks and internally synchronized.

use std::sync::{
    Arc, Mutex, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use ahash::AHashMap;

use crate::{
    error::RunResult,
    io::{PrintWriter, StdPrint},
    names::{self, NameId},
    value::{TypeDef, TypeTag, Value},
};

struct RootState {
    builtins_loaded: AtomicBool,
    out: Mutex<Box<dyn PrintWriter>>,
}

struct EnvInner {
    vars: RwLock<AHashMap<NameId, Value>>,
    types: RwLock<AHashMap<NameId, TypeDef>>,
    parent: Option<Env>,
    root: Option<RootState>,
}

/// A shared scope node.
#[derive(Clone)]
pub struct Env {
    inner: Arc<EnvInner>,
}

const CORE_TYPES: [TypeTag; 10] = [
    TypeTag::Int,
    TypeTag::Decimal,
    TypeTag::String,
    TypeTag::Bool,
    TypeTag::Time,
    TypeTag::Duration,
    TypeTag::Slice,
    TypeTag::Map,
    TypeTag::Chan,
    TypeTag::WaitGroup,
];

impl Env {
    /// Creates a process root scope with stdout printing and the core type
    /// descriptors registered.
    #[must_use]
    pub fn new_root() -> Self {
        Self::new_root_with_output(Box::new(StdPrint))
    }

    /// Creates a root scope routing print output to the given writer.
    #[must_use]
    pub fn new_root_with_output(out: Box<dyn PrintWriter>) -> Self {
        let env = Self {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(AHashMap::new()),
                types: RwLock::new(AHashMap::new()),
                parent: None,
                root: Some(RootState {
                    builtins_loaded: AtomicBool::new(false),
                    out: Mutex::new(out),
                }),
            }),
        };
        for tag in CORE_TYPES {
            env.define_type(names::intern(tag.name()), TypeDef::Core(tag));
        }
        env
    }

    /// Creates a child scope.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(AHashMap::new()),
                types: RwLock::new(AHashMap::new()),
                parent: Some(self.clone()),
                root: None,
            }),
        }
    }

    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.inner.root.is_some()
    }

    /// Walks to the process root scope.
    #[must_use]
    pub fn root(&self) -> Self {
        let mut env = self.clone();
        loop {
            let Some(parent) = env.inner.parent.clone() else {
                return env;
            };
            env = parent;
        }
    }

    /// Binds a value in the current scope.
    pub fn define(&self, id: NameId, val: Value) {
        self.inner
            .vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, val);
    }

    /// Binds a value in the current scope under a name string.
    pub fn define_str(&self, name: &str, val: Value) {
        self.define(names::intern(name), val);
    }

    /// Reads a binding, walking outward. Absent names read as None; the VM
    /// maps that to Nil at expression level.
    #[must_use]
    pub fn get(&self, id: NameId) -> Option<Value> {
        let mut env = self.clone();
        loop {
            if let Some(v) = env.get_local(id) {
                return Some(v);
            }
            let Some(parent) = env.inner.parent.clone() else {
                return None;
            };
            env = parent;
        }
    }

    /// Reads a binding in this scope only.
    #[must_use]
    pub fn get_local(&self, id: NameId) -> Option<Value> {
        self.inner
            .vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Assigns a binding, walking outward; an unbound name is created in the
    /// current scope, so module bodies populate their own environment.
    pub fn set(&self, id: NameId, val: Value) {
        let mut env = self.clone();
        loop {
            {
                let mut vars = env.inner.vars.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(slot) = vars.get_mut(&id) {
                    *slot = val;
                    return;
                }
            }
            match env.inner.parent.clone() {
                Some(parent) => env = parent,
                None => {
                    self.define(id, val);
                    return;
                }
            }
        }
    }

    /// Registers a type descriptor in the current scope.
    pub fn define_type(&self, id: NameId, def: TypeDef) {
        self.inner
            .types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, def);
    }

    pub fn define_type_str(&self, name: &str, def: TypeDef) {
        self.define_type(names::intern(name), def);
    }

    /// Resolves a type descriptor, walking outward.
    #[must_use]
    pub fn find_type(&self, id: NameId) -> Option<TypeDef> {
        let mut env = self.clone();
        loop {
            if let Some(def) = env
                .inner
                .types
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .cloned()
            {
                return Some(def);
            }
            let Some(parent) = env.inner.parent.clone() else {
                return None;
            };
            env = parent;
        }
    }

    pub fn set_builtins_loaded(&self) {
        if let Some(root) = &self.root().inner.root {
            root.builtins_loaded.store(true, Ordering::Release);
        }
    }

    #[must_use]
    pub fn builtins_loaded(&self) -> bool {
        self.root()
            .inner
            .root
            .as_ref()
            .is_some_and(|r| r.builtins_loaded.load(Ordering::Acquire))
    }

    /// Writes raw text to the host output.
    pub fn print(&self, text: &str) {
        if let Some(root) = &self.root().inner.root {
            root.out.lock().unwrap_or_else(PoisonError::into_inner).print(text);
        }
    }

    /// Prints values separated by spaces with a trailing newline.
    pub fn println(&self, args: &[Value]) -> RunResult<()> {
        let mut line = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&arg.display_string()?);
        }
        line.push('\n');
        self.print(&line);
        Ok(())
    }

    /// Formats `%v` placeholders with the string form of each argument.
    pub fn sprintf(&self, format: &str, args: &[Value]) -> RunResult<String> {
        let mut out = String::with_capacity(format.len());
        let mut rest = args.iter();
        let mut chunks = format.split("%v");
        if let Some(first) = chunks.next() {
            out.push_str(first);
        }
        for chunk in chunks {
            match rest.next() {
                Some(v) => out.push_str(&v.display_string()?),
                None => out.push_str("%v"),
            }
            out.push_str(chunk);
        }
        Ok(out)
    }

    pub fn printf(&self, format: &str, args: &[Value]) -> RunResult<()> {
        let text = self.sprintf(format, args)?;
        self.print(&text);
        Ok(())
    }

    /// Diagnostic dump of this scope's bindings.
    #[must_use]
    pub fn dump(&self) -> String {
        let vars = self.inner.vars.read().unwrap_or_else(PoisonError::into_inner);
        let mut names_sorted: Vec<_> = vars
            .iter()
            .map(|(id, v)| format!("{} = {:?}", names::original(*id), v))
            .collect();
        names_sorted.sort();
        names_sorted.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outward() {
        let root = Env::new_root();
        let id = names::intern("переменная");
        root.define(id, Value::Int(1));
        let child = root.child().child();
        assert!(child.get(id).unwrap().deep_eq(&Value::Int(1)));
    }

    #[test]
    fn set_updates_outer_binding() {
        let root = Env::new_root();
        let id = names::intern("внешняя");
        root.define(id, Value::Int(1));
        let child = root.child();
        child.set(id, Value::Int(2));
        assert!(root.get_local(id).unwrap().deep_eq(&Value::Int(2)));
        assert!(child.get_local(id).is_none());
    }

    #[test]
    fn set_of_unbound_name_creates_in_current_scope() {
        let root = Env::new_root();
        let child = root.child();
        let id = names::intern("новая");
        child.set(id, Value::Int(5));
        assert!(child.get_local(id).unwrap().deep_eq(&Value::Int(5)));
        assert!(root.get_local(id).is_none());
    }

    #[test]
    fn define_shadows_outer_scope() {
        let root = Env::new_root();
        let id = names::intern("тень");
        root.define(id, Value::Int(1));
        let child = root.child();
        child.define(id, Value::Int(2));
        assert!(child.get(id).unwrap().deep_eq(&Value::Int(2)));
        assert!(root.get(id).unwrap().deep_eq(&Value::Int(1)));
    }

    #[test]
    fn core_types_are_registered() {
        let root = Env::new_root();
        let def = root.child().find_type(names::intern("массив")).unwrap();
        assert!(matches!(def, TypeDef::Core(TypeTag::Slice)));
    }

    #[test]
    fn sprintf_fills_placeholders() {
        let root = Env::new_root();
        let s = root.sprintf("х=%v, у=%v", &[Value::Int(1), Value::from("два")]).unwrap();
        assert_eq!(s, "х=1, у=два");
    }

    #[test]
    fn print_routes_to_the_root_writer() {
        let collector = crate::io::CollectStringPrint::new();
        let root = Env::new_root_with_output(Box::new(collector.clone()));
        let child = root.child();
        child.println(&[Value::from("привет"), Value::Int(5)]).unwrap();
        child.printf("итого %v\n", &[Value::Int(7)]).unwrap();
        assert_eq!(collector.take(), "привет 5\nитого 7\n");
    }
}
