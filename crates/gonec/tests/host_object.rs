//! Host object registration exercised end to end: a native type with typed
//! fields, a method, and construction from a mapping of field values.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use gonec::{
    Env, ErrKind, GonecError, HostTypeDef, NoPrint, RuntimeError, TypeDef, Value,
    ast::StmtKind,
};
use pretty_assertions::assert_eq;

#[derive(Default)]
struct TestRecord {
    text: Mutex<String>,
    number: Mutex<i64>,
}

fn record(obj: &gonec::VmObject) -> &TestRecord {
    obj.data::<TestRecord>().expect("payload type")
}

fn register_test_type(env: &Env) {
    let def = HostTypeDef::builder("ФункциональнаяСтруктураТест", || {
        Arc::new(TestRecord::default())
    })
    .field(
        "ПолеСтрока",
        |obj| Value::from(record(obj).text.lock().unwrap().as_str()),
        |obj, val| match val {
            Value::String(s) => {
                *record(obj).text.lock().unwrap() = s.to_string();
                Ok(())
            }
            _ => Err(RuntimeError::incorrect_field_type()),
        },
    )
    .field(
        "ПолеЦелоеЧисло",
        |obj| Value::Int(*record(obj).number.lock().unwrap()),
        |obj, val| match val {
            Value::Int(i) => {
                *record(obj).number.lock().unwrap() = i;
                Ok(())
            }
            _ => Err(RuntimeError::incorrect_field_type()),
        },
    )
    .method("ВСтроку", |obj, _args, rets| {
        let text = record(obj).text.lock().unwrap().clone();
        let number = *record(obj).number.lock().unwrap();
        rets.push(Value::from(format!("{text}:{number}")));
        Ok(())
    })
    .build();
    env.define_type_str("ФункциональнаяСтруктураТест", TypeDef::Host(def));
}

fn test_env() -> Env {
    let env = Env::new_root_with_output(Box::new(NoPrint));
    register_test_type(&env);
    env
}

#[test]
fn construction_from_a_mapping_fills_fields() {
    let env = test_env();
    // а = Новый ФункциональнаяСтруктураТест({"ПолеСтрока": "привет", "ПолеЦелоеЧисло": 3456})
    let result = gonec::run(
        vec![
            assign(
                ident("а"),
                new_value(
                    "функциональнаяструктуратест",
                    vec![map_lit(vec![
                        ("ПолеСтрока", string("привет")),
                        ("ПолеЦелоеЧисло", int(3456)),
                    ])],
                ),
            ),
            ret(vec![call(member(ident("а"), "ВСтроку"), vec![])]),
        ],
        &env,
    )
    .unwrap();
    assert_eq!(result.display_string().unwrap(), "привет:3456");
}

#[test]
fn field_access_is_case_insensitive() {
    let env = test_env();
    // а.Полецелоечисло = 2243; возврат а.ПОЛЕЦЕЛОЕЧИСЛО
    let result = gonec::run(
        vec![
            assign(ident("а"), new_value("ФункциональнаяСтруктураТест", vec![])),
            assign(member(ident("а"), "Полецелоечисло"), int(2243)),
            ret(vec![member(ident("а"), "ПОЛЕЦЕЛОЕЧИСЛО")]),
        ],
        &env,
    )
    .unwrap();
    assert!(result.deep_eq(&Value::Int(2243)));
}

#[test]
fn typed_field_assignment_throws_at_the_site() {
    let env = test_env();
    let err = gonec::run(
        vec![
            assign(ident("а"), new_value("ФункциональнаяСтруктураТест", vec![])),
            assign(member(ident("а"), "ПолеЦелоеЧисло"), string("не число")),
        ],
        &env,
    )
    .unwrap_err();
    match err {
        GonecError::Runtime(e) => assert_eq!(e.kind, ErrKind::IncorrectFieldType),
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn native_method_error_behaves_like_throw() {
    let env = test_env();
    let def = HostTypeDef::builder("Ломается", || Arc::new(()))
        .method("Сбой", |_obj, _args, _rets| {
            Err(RuntimeError::custom("сбой из натива"))
        })
        .build();
    env.define_type_str("Ломается", TypeDef::Host(def));
    let result = gonec::run(
        vec![
            assign(ident("о"), new_value("Ломается", vec![])),
            stmt(StmtKind::Try {
                body: vec![stmt(StmtKind::Expr(call(member(ident("о"), "Сбой"), vec![])))],
                catch: vec![ret(vec![call(ident("ОписаниеОшибки"), vec![])])],
            }),
        ],
        &env,
    )
    .unwrap();
    assert_eq!(result.display_string().unwrap(), "сбой из натива");
}

#[test]
fn unknown_type_reports_its_name() {
    let env = test_env();
    let err = gonec::run(
        vec![assign(ident("а"), new_value("НетТакогоТипа", vec![]))],
        &env,
    )
    .unwrap_err();
    match err {
        GonecError::Runtime(e) => {
            assert_eq!(e.kind, ErrKind::UnknownType);
            assert!(e.message.contains("НетТакогоТипа"));
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn objects_share_reference_identity() {
    let env = test_env();
    let result = gonec::run(
        vec![
            assign(ident("а"), new_value("ФункциональнаяСтруктураТест", vec![])),
            assign(ident("б"), ident("а")),
            assign(member(ident("б"), "ПолеЦелоеЧисло"), int(9)),
            ret(vec![member(ident("а"), "ПолеЦелоеЧисло")]),
        ],
        &env,
    )
    .unwrap();
    assert!(result.deep_eq(&Value::Int(9)));
}
