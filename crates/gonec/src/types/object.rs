//! Host object protocol.
//!
//! Native types are exposed to scripts through explicit registration: a
//! [`HostTypeDef`] records the constructor, method thunks and field accessors
//! keyed by name id. The VM never introspects host types — member dispatch
//! consults the descriptor tables, fields before methods.

use std::{
    any::Any,
    sync::Arc,
};

use ahash::AHashMap;

use crate::{
    error::{RunResult, RuntimeError},
    names::{self, NameId},
    types::func::{FuncValue, NativeFunc, VmFunc},
    value::Value,
};

/// Payload of a host object instance.
pub type HostData = Arc<dyn Any + Send + Sync>;

type Ctor = dyn Fn(&VmObject, &[Value]) -> RunResult<()> + Send + Sync;
type Method = dyn Fn(&VmObject, &[Value], &mut Vec<Value>) -> RunResult<()> + Send + Sync;
type FieldGet = dyn Fn(&VmObject) -> Value + Send + Sync;
type FieldSet = dyn Fn(&VmObject, Value) -> RunResult<()> + Send + Sync;

struct FieldDef {
    get: Arc<FieldGet>,
    set: Arc<FieldSet>,
}

/// Per-type descriptor populated through [`TypeBuilder`].
pub struct HostTypeDef {
    name: String,
    make: Box<dyn Fn() -> HostData + Send + Sync>,
    ctor: Option<Arc<Ctor>>,
    methods: AHashMap<NameId, Arc<Method>>,
    fields: AHashMap<NameId, FieldDef>,
}

impl HostTypeDef {
    /// Starts registration of a host type. `make` produces the type's default
    /// instance payload.
    pub fn builder(name: impl Into<String>, make: impl Fn() -> HostData + Send + Sync + 'static) -> TypeBuilder {
        TypeBuilder {
            def: Self {
                name: name.into(),
                make: Box::new(make),
                ctor: None,
                methods: AHashMap::new(),
                fields: AHashMap::new(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registration handle for a host type.
pub struct TypeBuilder {
    def: HostTypeDef,
}

impl TypeBuilder {
    /// Registers the constructor invoked by `Новый` when arguments are given.
    #[must_use]
    pub fn constructor(mut self, f: impl Fn(&VmObject, &[Value]) -> RunResult<()> + Send + Sync + 'static) -> Self {
        self.def.ctor = Some(Arc::new(f));
        self
    }

    /// Registers a method thunk under an identifier.
    #[must_use]
    pub fn method(
        mut self,
        name: &str,
        f: impl Fn(&VmObject, &[Value], &mut Vec<Value>) -> RunResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.def.methods.insert(names::intern(name), Arc::new(f));
        self
    }

    /// Registers a readable and assignable field under an identifier.
    #[must_use]
    pub fn field(
        mut self,
        name: &str,
        get: impl Fn(&VmObject) -> Value + Send + Sync + 'static,
        set: impl Fn(&VmObject, Value) -> RunResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.def.fields.insert(
            names::intern(name),
            FieldDef {
                get: Arc::new(get),
                set: Arc::new(set),
            },
        );
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<HostTypeDef> {
        Arc::new(self.def)
    }
}

/// An instance of a registered host type.
#[derive(Clone)]
pub struct VmObject {
    def: Arc<HostTypeDef>,
    data: HostData,
}

impl VmObject {
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.def.name
    }

    /// Downcasts the payload to the concrete host type.
    #[must_use]
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Member read: fields first, then methods as bound callables.
    pub fn member(&self, name: NameId) -> RunResult<Value> {
        if let Some(field) = self.def.fields.get(&name) {
            return Ok((field.get)(self));
        }
        if let Some(method) = self.def.methods.get(&name) {
            let recv = self.clone();
            let method = method.clone();
            let bound = NativeFunc::new(move |args, rets| method(&recv, args, rets));
            return Ok(Value::Func(VmFunc(Arc::new(FuncValue::Native(bound)))));
        }
        Err(RuntimeError::not_defined())
    }

    /// Member write through the field accessor table.
    pub fn set_member(&self, name: NameId, val: Value) -> RunResult<()> {
        match self.def.fields.get(&name) {
            Some(field) => (field.set)(self, val),
            None => Err(RuntimeError::not_defined()),
        }
    }
}

/// The `Новый T(args…)` path: default instance, then the constructor when
/// present. Without a constructor, a single mapping argument fills fields by
/// key.
pub(crate) fn new_instance(def: &Arc<HostTypeDef>, args: &[Value]) -> RunResult<Value> {
    let obj = VmObject {
        def: def.clone(),
        data: (def.make)(),
    };
    if let Some(ctor) = &def.ctor {
        ctor(&obj, args)?;
    } else {
        match args {
            [] => {}
            [Value::Map(m)] => {
                for (key, val) in m.snapshot() {
                    let id = names::intern(&key);
                    if def.fields.contains_key(&id) {
                        obj.set_member(id, val)?;
                    }
                }
            }
            _ => return Err(RuntimeError::max_args(1)),
        }
    }
    Ok(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrKind;

    struct Counter {
        count: Mutex<i64>,
    }

    fn counter_type() -> Arc<HostTypeDef> {
        HostTypeDef::builder("Счетчик", || Arc::new(Counter { count: Mutex::new(0) }))
            .field(
                "Значение",
                |obj| Value::Int(*obj.data::<Counter>().unwrap().count.lock().unwrap()),
                |obj, val| match val {
                    Value::Int(i) => {
                        *obj.data::<Counter>().unwrap().count.lock().unwrap() = i;
                        Ok(())
                    }
                    _ => Err(RuntimeError::incorrect_field_type()),
                },
            )
            .method("Увеличить", |obj, _args, rets| {
                let mut c = obj.data::<Counter>().unwrap().count.lock().unwrap();
                *c += 1;
                rets.push(Value::Int(*c));
                Ok(())
            })
            .build()
    }

    #[test]
    fn fields_dispatch_before_methods() {
        let def = counter_type();
        let Value::Object(obj) = new_instance(&def, &[]).unwrap() else {
            panic!("expected object");
        };
        obj.set_member(names::intern("значение"), Value::Int(41)).unwrap();
        let Value::Func(f) = obj.member(names::intern("УВЕЛИЧИТЬ")).unwrap() else {
            panic!("expected bound method");
        };
        let FuncValue::Native(native) = &*f.0 else { panic!() };
        let mut rets = Vec::new();
        native.call(&[], &mut rets).unwrap();
        assert!(rets[0].deep_eq(&Value::Int(42)));
        assert!(obj.member(names::intern("Значение")).unwrap().deep_eq(&Value::Int(42)));
    }

    #[test]
    fn unknown_member_is_not_defined() {
        let def = counter_type();
        let Value::Object(obj) = new_instance(&def, &[]).unwrap() else {
            panic!("expected object");
        };
        let err = obj.member(names::intern("НетТакого")).unwrap_err();
        assert_eq!(err.kind, ErrKind::NotDefined);
    }

    #[test]
    fn map_argument_fills_fields() {
        let def = counter_type();
        let m = crate::types::map::VmMap::default();
        m.set("Значение", Value::Int(7));
        let Value::Object(obj) = new_instance(&def, &[Value::Map(m)]).unwrap() else {
            panic!("expected object");
        };
        assert!(obj.member(names::intern("Значение")).unwrap().deep_eq(&Value::Int(7)));
    }

    #[test]
    fn typed_field_assignment_is_checked() {
        let def = counter_type();
        let Value::Object(obj) = new_instance(&def, &[]).unwrap() else {
            panic!("expected object");
        };
        let err = obj.set_member(names::intern("Значение"), Value::from("нет")).unwrap_err();
        assert_eq!(err.kind, ErrKind::IncorrectFieldType);
    }
}
