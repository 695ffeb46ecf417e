//! Task, channel, select and wait-group scenarios.

mod common;

use common::*;
use gonec::{
    Env, ErrKind, GonecError, NoPrint, Value,
    ast::{ExprKind, StmtKind},
};
use pretty_assertions::assert_eq;

fn go_call(callee: gonec::ast::Expr, args: Vec<gonec::ast::Expr>) -> gonec::ast::Stmt {
    stmt(StmtKind::Expr(expr(ExprKind::Go {
        callee: Box::new(callee),
        args,
    })))
}

#[test]
fn rendezvous_channel_hands_off_a_value() {
    // к = Новый Канал(); го отправитель(к, готово); х = <-к
    let result = run_ok(vec![
        assign(ident("к"), new_value("Канал", vec![])),
        assign(ident("готово"), new_value("Канал", vec![int(1)])),
        func_decl(
            "отправитель",
            &["кн", "гт"],
            vec![
                stmt(StmtKind::Expr(chan_send(ident("кн"), int(42)))),
                stmt(StmtKind::Expr(chan_send(ident("гт"), expr(ExprKind::Literal(Value::Bool(true)))))),
            ],
        ),
        go_call(ident("отправитель"), vec![ident("к"), ident("готово")]),
        assign(ident("х"), chan_recv(ident("к"))),
        assign(ident("ок"), chan_recv(ident("готово"))),
        ret(vec![slice_lit(vec![ident("х"), ident("ок")])]),
    ]);
    let expected = Value::Slice(gonec::VmSlice::from_values(vec![Value::Int(42), Value::Bool(true)]));
    assert!(result.deep_eq(&expected));
}

fn select_two_channels(loaded: &str) -> Value {
    // а, б емкостью 1; один из них предзагружен; select выбирает готовую ветку
    run_ok(vec![
        assign(ident("а"), new_value("Канал", vec![int(1)])),
        assign(ident("б"), new_value("Канал", vec![int(1)])),
        stmt(StmtKind::Expr(chan_send(ident(loaded), int(1)))),
        stmt(StmtKind::Select {
            cases: vec![
                stmt(StmtKind::Case {
                    expr: chan_send(ident("х"), ident("а")),
                    body: vec![assign(ident("рез"), int(1))],
                }),
                stmt(StmtKind::Case {
                    expr: chan_send(ident("х"), ident("б")),
                    body: vec![assign(ident("рез"), int(2))],
                }),
            ],
        }),
        ret(vec![ident("рез")]),
    ])
}

#[test]
fn select_takes_the_ready_receive_arm() {
    assert!(select_two_channels("а").deep_eq(&Value::Int(1)));
    assert!(select_two_channels("б").deep_eq(&Value::Int(2)));
}

#[test]
fn select_send_arm_fires_when_capacity_is_free() {
    let result = run_ok(vec![
        assign(ident("а"), new_value("Канал", vec![int(1)])),
        stmt(StmtKind::Select {
            cases: vec![stmt(StmtKind::Case {
                // слева канал: отправка значения
                expr: chan_send(ident("а"), int(7)),
                body: vec![assign(ident("рез"), int(1))],
            })],
        }),
        assign(ident("х"), chan_recv(ident("а"))),
        ret(vec![slice_lit(vec![ident("рез"), ident("х")])]),
    ]);
    assert!(result.deep_eq(&ints(&[1, 7])));
}

#[test]
fn select_default_runs_once_when_nothing_is_ready() {
    let result = run_ok(vec![
        assign(ident("а"), new_value("Канал", vec![int(1)])),
        stmt(StmtKind::Select {
            cases: vec![
                stmt(StmtKind::Case {
                    expr: chan_send(ident("х"), ident("а")),
                    body: vec![assign(ident("рез"), int(1))],
                }),
                stmt(StmtKind::Default {
                    body: vec![assign(ident("рез"), int(99))],
                }),
            ],
        }),
        ret(vec![ident("рез")]),
    ]);
    assert!(result.deep_eq(&Value::Int(99)));
}

#[test]
fn buffered_channel_keeps_fifo_order() {
    let result = run_ok(vec![
        assign(ident("к"), new_value("Канал", vec![int(2)])),
        stmt(StmtKind::Expr(chan_send(ident("к"), int(1)))),
        stmt(StmtKind::Expr(chan_send(ident("к"), int(2)))),
        assign(ident("п"), chan_recv(ident("к"))),
        assign(ident("в"), chan_recv(ident("к"))),
        ret(vec![slice_lit(vec![ident("п"), ident("в")])]),
    ]);
    assert!(result.deep_eq(&ints(&[1, 2])));
}

#[test]
fn receive_on_closed_channel_yields_nil() {
    let result = run_ok(vec![
        assign(ident("к"), new_value("Канал", vec![int(1)])),
        stmt(StmtKind::Expr(call(member(ident("к"), "Закрыть"), vec![]))),
        ret(vec![chan_recv(ident("к"))]),
    ]);
    assert!(result.deep_eq(&Value::Nil));
}

#[test]
fn send_on_closed_channel_fails() {
    let err = gonec::run(
        vec![
            assign(ident("к"), new_value("Канал", vec![int(1)])),
            stmt(StmtKind::Expr(call(member(ident("к"), "Закрыть"), vec![]))),
            stmt(StmtKind::Expr(chan_send(ident("к"), int(1)))),
        ],
        &Env::new_root_with_output(Box::new(NoPrint)),
    )
    .unwrap_err();
    match err {
        GonecError::Runtime(e) => assert_eq!(e.kind, ErrKind::WrongChannel),
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn wait_group_joins_spawned_tasks() {
    // гр = Новый ГруппаОжидания; гр.Добавить(2); задачи пишут в общий массив
    let result = run_ok(vec![
        assign(ident("гр"), new_value("ГруппаОжидания", vec![])),
        assign(ident("счет"), slice_lit(vec![int(0), int(0)])),
        stmt(StmtKind::Expr(call(member(ident("гр"), "Добавить"), vec![int(2)]))),
        func_decl(
            "работник",
            &["номер"],
            vec![
                assign(index(ident("счет"), ident("номер")), ident("номер")),
                stmt(StmtKind::Expr(call(member(ident("гр"), "Завершить"), vec![]))),
            ],
        ),
        go_call(ident("работник"), vec![int(1)]),
        go_call(ident("работник"), vec![int(2)]),
        stmt(StmtKind::Expr(call(member(ident("гр"), "Ожидать"), vec![]))),
        ret(vec![ident("счет")]),
    ]);
    assert!(result.deep_eq(&ints(&[1, 2])));
}

#[test]
fn deadlock_on_channels_is_reported() {
    // приемник без отправителя
    let err = gonec::run(
        vec![
            assign(ident("к"), new_value("Канал", vec![])),
            assign(ident("х"), chan_recv(ident("к"))),
        ],
        &Env::new_root_with_output(Box::new(NoPrint)),
    )
    .unwrap_err();
    match err {
        GonecError::Runtime(e) => {
            assert_eq!(e.kind, ErrKind::WrongChannel);
            assert!(e.message.contains("заблокированы"));
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn task_error_terminates_only_the_task() {
    // задача падает без попытки; основная задача завершается нормально
    let result = run_ok(vec![
        assign(ident("к"), new_value("Канал", vec![int(1)])),
        func_decl(
            "падает",
            &["кн"],
            vec![
                stmt(StmtKind::Expr(chan_send(ident("кн"), int(5)))),
                stmt(StmtKind::Throw(string("авария в задаче"))),
            ],
        ),
        go_call(ident("падает"), vec![ident("к")]),
        ret(vec![chan_recv(ident("к"))]),
    ]);
    assert!(result.deep_eq(&Value::Int(5)));
}

#[test]
fn goshed_lets_other_tasks_run() {
    // основная задача крутит select без default, пока задача не отправит
    let result = run_ok(vec![
        assign(ident("к"), new_value("Канал", vec![int(1)])),
        func_decl(
            "позже",
            &["кн"],
            vec![stmt(StmtKind::Expr(chan_send(ident("кн"), int(9))))],
        ),
        go_call(ident("позже"), vec![ident("к")]),
        stmt(StmtKind::Select {
            cases: vec![stmt(StmtKind::Case {
                expr: chan_send(ident("х"), ident("к")),
                body: vec![assign(ident("рез"), ident("х"))],
            })],
        }),
        ret(vec![ident("рез")]),
    ]);
    assert!(result.deep_eq(&Value::Int(9)));
}
