//! End-to-end scenarios: programs assembled through the embedding API and
//! run against the full engine.

use meng::{
    CallTarget, ClassExtent, ClassId, CollectConsole, DispatchKind, EnumDef, FixedBaseResolver, Imm, InvokeOutcome,
    MacroEngine, MengClass, MethodExtent, MethodId, MethodInfo, OpCode, OpMethodBuilder, Payload, Value, Visibility,
};
use pretty_assertions::assert_eq;

fn engine() -> MacroEngine {
    MacroEngine::new().expect("engine construction")
}

/// Registers a one-method program class and returns nothing; the test
/// invokes it by path.
fn register_start_class(engine: &mut MacroEngine, path: &str, ret_class: ClassId, body: OpMethodBuilder) {
    let core = engine.core();
    let mut cls = MengClass::new(
        path.rsplit('.').next().unwrap().to_owned(),
        path.to_owned(),
        Some(core.object),
        ClassExtent::NonFinal,
    );
    cls.add_method(MethodInfo::new("Start", ret_class, MethodExtent::Final, Visibility::Public).with_opcodes(body.finish()))
        .unwrap();
    let id = engine.registry_mut().register_class(cls).unwrap();
    engine.registry_mut().seal(id);
}

fn ret_card4(outcome: InvokeOutcome) -> u32 {
    match outcome {
        InvokeOutcome::Return(value) => value.as_card4().unwrap(),
        InvokeOutcome::UnhandledException(ev) => panic!("unexpected exception: {ev}"),
    }
}

fn method_id(engine: &MacroEngine, class: ClassId, name: &str) -> MethodId {
    engine
        .registry()
        .find_method(class, name)
        .map(|(_, info)| info.id())
        .unwrap_or_else(|| panic!("no method '{name}'"))
}

#[test]
fn hello_world_writes_to_console() {
    let mut engine = engine();
    let console_out = CollectConsole::new();
    engine.set_console_writer(Box::new(console_out.clone()));
    let core = engine.core();
    let console = engine
        .registry_mut()
        .find_or_load("MEng.System.Runtime.ConsoleOutStream")
        .unwrap();
    let write_line = method_id(&engine, console, "WriteLine");
    let flush = method_id(&engine, console, "Flush");

    let mut b = OpMethodBuilder::new();
    let out = b.local("Output", console);
    b.op(OpCode::CurLine(1));
    b.op(OpCode::PushRet(core.void));
    b.push_str("Hello");
    b.op(OpCode::Call {
        class_id: console,
        method: write_line,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(out),
        parm_count: 1,
    });
    b.op(OpCode::Pop);
    b.op(OpCode::PushRet(core.void));
    b.op(OpCode::Call {
        class_id: console,
        method: flush,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(out),
        parm_count: 0,
    });
    b.op(OpCode::Pop);
    b.op(OpCode::PushImm(Imm::Card4(0)));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Hello", core.card4, b);

    let outcome = engine.invoke("MEng.User.Hello", "Start", Vec::new()).unwrap();
    assert_eq!(ret_card4(outcome), 0);
    assert_eq!(console_out.output(), "Hello\n");
}

#[test]
fn exception_round_trip_reads_error_text() {
    let mut engine = engine();
    let core = engine.core();
    let mut errs = EnumDef::default();
    errs.add_item("BadThing", "Bad thing happened", None);
    let my_errs = engine.registry_mut().register_enum("MEng.User.MyErrs", errs).unwrap();
    let get_error_text = method_id(&engine, core.exception, "GetErrorText");
    let get_length = method_id(&engine, core.string, "GetLength");

    let mut b = OpMethodBuilder::new();
    let exc_local = b.local("CaughtExc", core.exception);
    b.op(OpCode::CurLine(10));
    let try_site = b.forward_jump();
    b.op(OpCode::CurLine(12));
    b.op(OpCode::PushEnum {
        class_id: my_errs,
        ordinal: 0,
    });
    b.op(OpCode::Throw);
    // catch block
    b.patch_jump(try_site, OpCode::Try);
    b.op(OpCode::PushLocal(exc_local));
    b.op(OpCode::StoreExcept);
    b.op(OpCode::PushRet(core.string));
    b.op(OpCode::Call {
        class_id: core.exception,
        method: get_error_text,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(exc_local),
        parm_count: 0,
    });
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::Call {
        class_id: core.string,
        method: get_length,
        kind: DispatchKind::Direct,
        target: CallTarget::Stack,
        parm_count: 0,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Pop);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Catcher", core.card4, b);

    let outcome = engine.invoke("MEng.User.Catcher", "Start", Vec::new()).unwrap();
    assert_eq!(ret_card4(outcome), "Bad thing happened".len() as u32);
    // The catch consumed the exception.
    assert!(engine.exception().is_none());
}

#[test]
fn uncaught_exception_reaches_the_host_with_line_info() {
    let mut engine = engine();
    let core = engine.core();
    let mut errs = EnumDef::default();
    errs.add_item("BadThing", "Bad thing happened", None);
    let my_errs = engine.registry_mut().register_enum("MEng.User.MyErrs2", errs).unwrap();

    let mut b = OpMethodBuilder::new();
    b.op(OpCode::CurLine(7));
    b.op(OpCode::PushEnum {
        class_id: my_errs,
        ordinal: 0,
    });
    b.op(OpCode::Throw);
    register_start_class(&mut engine, "MEng.User.Thrower", core.card4, b);

    let outcome = engine.invoke("MEng.User.Thrower", "Start", Vec::new()).unwrap();
    let InvokeOutcome::UnhandledException(ev) = outcome else {
        panic!("expected an unhandled exception");
    };
    assert_eq!(ev.err_name, "BadThing");
    assert_eq!(ev.err_text, "Bad thing happened");
    assert_eq!(ev.line, 7);
    assert_eq!(ev.src_class_path, "MEng.User.Thrower");
}

#[test]
fn token_replacement_formats_values() {
    let mut engine = engine();
    let core = engine.core();
    let replace_token = method_id(&engine, core.string, "ReplaceToken");
    let find_res = engine.registry().find_by_path("MEng.String.FindRes").unwrap();

    // Fmt: replace both tokens and return the resulting string.
    let mut b = OpMethodBuilder::new();
    let text = b.local("Text", core.string);
    b.op(OpCode::PushLocal(text));
    b.push_str("x=%(1), y=%(2)");
    b.op(OpCode::Assign);
    for (token, value) in [('1', 7_u32), ('2', 42)] {
        b.op(OpCode::PushRet(find_res));
        b.op(OpCode::PushImm(Imm::Char(token)));
        b.op(OpCode::PushImm(Imm::Card4(value)));
        b.op(OpCode::Call {
            class_id: core.string,
            method: replace_token,
            kind: DispatchKind::Direct,
            target: CallTarget::Local(text),
            parm_count: 2,
        });
        b.op(OpCode::Pop);
    }
    b.op(OpCode::PushLocal(text));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Fmt", core.string, b);

    let outcome = engine.invoke("MEng.User.Fmt", "Start", Vec::new()).unwrap();
    let InvokeOutcome::Return(value) = outcome else {
        panic!("expected a return");
    };
    assert_eq!(value.as_str().unwrap().as_str(), "x=7, y=42");
}

#[test]
fn second_token_replacement_reports_found() {
    let mut engine = engine();
    let core = engine.core();
    let replace_token = method_id(&engine, core.string, "ReplaceToken");
    let find_res = engine.registry().find_by_path("MEng.String.FindRes").unwrap();

    let mut b = OpMethodBuilder::new();
    let text = b.local("Text", core.string);
    b.op(OpCode::PushLocal(text));
    b.push_str("x=%(1), y=%(2)");
    b.op(OpCode::Assign);
    // First replacement: discard the result.
    b.op(OpCode::PushRet(find_res));
    b.op(OpCode::PushImm(Imm::Char('1')));
    b.op(OpCode::PushImm(Imm::Card4(7)));
    b.op(OpCode::Call {
        class_id: core.string,
        method: replace_token,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(text),
        parm_count: 2,
    });
    b.op(OpCode::Pop);
    // Second replacement: return its find-result ordinal.
    b.op(OpCode::PushRet(find_res));
    b.op(OpCode::PushImm(Imm::Char('2')));
    b.op(OpCode::PushImm(Imm::Card4(42)));
    b.op(OpCode::Call {
        class_id: core.string,
        method: replace_token,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(text),
        parm_count: 2,
    });
    b.op(OpCode::CastTo(core.card4));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.FmtRes", core.card4, b);

    let outcome = engine.invoke("MEng.User.FmtRes", "Start", Vec::new()).unwrap();
    // FindRes ordinal 0 is Found.
    assert_eq!(ret_card4(outcome), 0);
}

#[test]
fn sandbox_expand_and_contract() {
    let mut engine = engine();
    engine.set_resolver(Box::new(FixedBaseResolver::new("/app/data")));

    assert_eq!(engine.expand_file_path("/cfg/a.txt").unwrap(), "/app/data/cfg/a.txt");

    engine.expand_file_path("/../../etc/passwd").unwrap_err();
    assert_eq!(engine.exception().unwrap().err_name, "BadExpPath");
    engine.clear_exception();

    engine.contract_file_path("/other/x").unwrap_err();
    assert_eq!(engine.exception().unwrap().err_name, "CantConvertPath");
    engine.clear_exception();

    for p in ["/a.txt", "/cfg/deep/file.bin"] {
        let host = engine.expand_file_path(p).unwrap();
        assert_eq!(engine.contract_file_path(&host).unwrap(), p);
    }
}

#[test]
fn casts_truncate_per_width() {
    let mut engine = engine();
    let core = engine.core();

    let mut b = OpMethodBuilder::new();
    b.op(OpCode::PushImm(Imm::Int4(-1)));
    b.op(OpCode::CastTo(core.card1));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.CastA", core.card1, b);
    let outcome = engine.invoke("MEng.User.CastA", "Start", Vec::new()).unwrap();
    let InvokeOutcome::Return(value) = outcome else {
        panic!("expected a return");
    };
    assert_eq!(value.as_card1().unwrap(), 0xFF);

    let mut b = OpMethodBuilder::new();
    b.op(OpCode::PushImm(Imm::Float8(3.9)));
    b.op(OpCode::CastTo(core.int2));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.CastB", core.int2, b);
    let outcome = engine.invoke("MEng.User.CastB", "Start", Vec::new()).unwrap();
    let InvokeOutcome::Return(value) = outcome else {
        panic!("expected a return");
    };
    assert_eq!(value.as_int2().unwrap(), 3);
}

#[test]
fn inc_saturates_at_the_numeric_limits() {
    let mut engine = engine();
    let core = engine.core();
    let inc = method_id(&engine, core.card1, "Inc");
    let dec = method_id(&engine, core.int1, "Dec");

    let mut b = OpMethodBuilder::new();
    let v = b.local("V", core.card1);
    b.op(OpCode::PushLocal(v));
    b.op(OpCode::PushImm(Imm::Card1(u8::MAX)));
    b.op(OpCode::Assign);
    b.op(OpCode::PushRet(core.card1));
    b.op(OpCode::Call {
        class_id: core.card1,
        method: inc,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(v),
        parm_count: 0,
    });
    b.op(OpCode::CastTo(core.card4));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Sat1", core.card4, b);
    assert_eq!(
        ret_card4(engine.invoke("MEng.User.Sat1", "Start", Vec::new()).unwrap()),
        u32::from(u8::MAX)
    );

    let mut b = OpMethodBuilder::new();
    let v = b.local("V", core.int1);
    b.op(OpCode::PushLocal(v));
    b.op(OpCode::PushImm(Imm::Int1(i8::MIN)));
    b.op(OpCode::Assign);
    b.op(OpCode::PushRet(core.int1));
    b.op(OpCode::Call {
        class_id: core.int1,
        method: dec,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(v),
        parm_count: 0,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Sat2", core.int1, b);
    let InvokeOutcome::Return(value) = engine.invoke("MEng.User.Sat2", "Start", Vec::new()).unwrap() else {
        panic!("expected a return");
    };
    assert_eq!(value.as_int1().unwrap(), i8::MIN);
}

#[test]
fn integer_division_by_zero_raises() {
    let mut engine = engine();
    let core = engine.core();
    let div = method_id(&engine, core.card4, "Div");

    let mut b = OpMethodBuilder::new();
    let v = b.local("V", core.card4);
    b.op(OpCode::CurLine(3));
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushImm(Imm::Card4(0)));
    b.op(OpCode::Call {
        class_id: core.card4,
        method: div,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(v),
        parm_count: 1,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.DivZero", core.card4, b);

    let outcome = engine.invoke("MEng.User.DivZero", "Start", Vec::new()).unwrap();
    let InvokeOutcome::UnhandledException(ev) = outcome else {
        panic!("expected an unhandled exception");
    };
    assert_eq!(ev.err_name, "DivByZero");
    assert_eq!(ev.line, 3);
}

#[test]
fn entry_parameters_bind_in_order() {
    let mut engine = engine();
    let core = engine.core();
    let add = method_id(&engine, core.card4, "Add");

    let mut cls = MengClass::new("Adder", "MEng.User.Adder", Some(core.object), ClassExtent::NonFinal);
    let mut b = OpMethodBuilder::new();
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushImm(Imm::Card4(1)));
    b.op(OpCode::Call {
        class_id: core.card4,
        method: add,
        kind: DispatchKind::Direct,
        target: CallTarget::Parm(0),
        parm_count: 1,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    let mut start = MethodInfo::new("Start", core.card4, MethodExtent::Final, Visibility::Public);
    start.add_in_parm("ToBump", core.card4);
    cls.add_method(start.with_opcodes(b.finish())).unwrap();
    let id = engine.registry_mut().register_class(cls).unwrap();
    engine.registry_mut().seal(id);

    let parm = Value::new(core.card4, Payload::Card4(41));
    assert_eq!(ret_card4(engine.invoke("MEng.User.Adder", "Start", vec![parm]).unwrap()), 42);
}

#[test]
fn split_fills_an_out_parameter_list() {
    let mut engine = engine();
    let core = engine.core();
    let split = method_id(&engine, core.string, "Split");

    let mut b = OpMethodBuilder::new();
    let text = b.local("Text", core.string);
    let parts = b.local("Parts", core.string_list);
    b.op(OpCode::PushLocal(text));
    b.push_str("a,b,c");
    b.op(OpCode::Assign);
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushImm(Imm::Char(',')));
    b.op(OpCode::PushLocal(parts));
    b.op(OpCode::Call {
        class_id: core.string,
        method: split,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(text),
        parm_count: 2,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Splitter", core.card4, b);

    assert_eq!(ret_card4(engine.invoke("MEng.User.Splitter", "Start", Vec::new()).unwrap()), 3);
}

#[test]
fn polymorphic_dispatch_finds_the_override() {
    let mut engine = engine();
    let core = engine.core();

    // Base class with a virtual method returning 1.
    let mut base = MengClass::new("Animal", "MEng.User.Animal", Some(core.object), ClassExtent::NonFinal);
    let mut b = OpMethodBuilder::new();
    b.op(OpCode::PushImm(Imm::Card4(1)));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    let who = base
        .add_method(MethodInfo::new("Who", core.card4, MethodExtent::NonFinal, Visibility::Public).with_opcodes(b.finish()))
        .unwrap();
    let base_id = engine.registry_mut().register_class(base).unwrap();
    engine.registry_mut().seal(base_id);

    // Derived class overriding it to return 2.
    let mut derived = MengClass::new("Dog", "MEng.User.Dog", Some(base_id), ClassExtent::NonFinal);
    let mut b = OpMethodBuilder::new();
    b.op(OpCode::PushImm(Imm::Card4(2)));
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    derived
        .add_override(
            who,
            MethodInfo::new("Who", core.card4, MethodExtent::Override, Visibility::Public).with_opcodes(b.finish()),
        )
        .unwrap();
    let derived_id = engine.registry_mut().register_class(derived).unwrap();
    engine.registry_mut().seal(derived_id);

    // A caller holding a Dog local calls through the base class statically.
    let mut b = OpMethodBuilder::new();
    let pet = b.local("Pet", derived_id);
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::Call {
        class_id: base_id,
        method: who,
        kind: DispatchKind::Poly,
        target: CallTarget::Local(pet),
        parm_count: 0,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Kennel", core.card4, b);

    assert_eq!(ret_card4(engine.invoke("MEng.User.Kennel", "Start", Vec::new()).unwrap()), 2);
}

#[test]
fn async_http_cancel_reports_a_cancelled_result() {
    let mut engine = engine();
    let core = engine.core();
    let async_http = engine
        .registry_mut()
        .find_or_load("MEng.System.Runtime.AsyncHTTP")
        .unwrap();
    let states = engine
        .registry()
        .find_by_path("MEng.System.Runtime.AsyncHTTP.States")
        .unwrap();
    let start_get = method_id(&engine, async_http, "StartGETRedir");
    let cancel_op = method_id(&engine, async_http, "CancelOp");
    let get_status = method_id(&engine, async_http, "GetStatus");
    let get_output = method_id(&engine, async_http, "GetOutput");
    let mul = method_id(&engine, core.card4, "Mul");
    let add = method_id(&engine, core.card4, "Add");

    let mut b = OpMethodBuilder::new();
    let op = b.local("Op", async_http);
    let status_after = b.local("StatusAfter", core.card4);
    let out_status = b.local("OutStatus", core.card4);
    let out_type = b.local("OutType", core.string);
    let out_body = b.local("OutBody", core.mem_buf);
    let out_ok = b.local("OutOk", core.card4);

    // Start a request that will never complete quickly, then cancel before
    // ever polling. Cancellation must win regardless of worker progress.
    b.op(OpCode::PushRet(core.void));
    b.push_str("http://192.0.2.1:81/never");
    b.op(OpCode::Call {
        class_id: async_http,
        method: start_get,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(op),
        parm_count: 1,
    });
    b.op(OpCode::Pop);
    b.op(OpCode::PushRet(core.void));
    b.op(OpCode::Call {
        class_id: async_http,
        method: cancel_op,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(op),
        parm_count: 0,
    });
    b.op(OpCode::Pop);
    // StatusAfter = ordinal of GetStatus (expect Complete = 2).
    b.op(OpCode::PushLocal(status_after));
    b.op(OpCode::PushRet(states));
    b.op(OpCode::Call {
        class_id: async_http,
        method: get_status,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(op),
        parm_count: 0,
    });
    b.op(OpCode::CastTo(core.card4));
    b.op(OpCode::Assign);
    // OutOk = GetOutput succeeded flag (expect 0 for a cancelled op).
    b.op(OpCode::PushLocal(out_ok));
    b.op(OpCode::PushRet(core.boolean));
    b.op(OpCode::PushLocal(out_status));
    b.op(OpCode::PushLocal(out_type));
    b.op(OpCode::PushLocal(out_body));
    b.op(OpCode::Call {
        class_id: async_http,
        method: get_output,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(op),
        parm_count: 3,
    });
    b.op(OpCode::CastTo(core.card4));
    b.op(OpCode::Assign);
    // Return StatusAfter * 10 + OutOk.
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushImm(Imm::Card4(10)));
    b.op(OpCode::Call {
        class_id: core.card4,
        method: mul,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(status_after),
        parm_count: 1,
    });
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushLocal(out_ok));
    b.op(OpCode::Call {
        class_id: core.card4,
        method: add,
        kind: DispatchKind::Direct,
        target: CallTarget::Stack,
        parm_count: 1,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Pop);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Fetcher", core.card4, b);

    // Complete (2) * 10 + not-ok (0).
    assert_eq!(ret_card4(engine.invoke("MEng.User.Fetcher", "Start", Vec::new()).unwrap()), 20);
}

#[test]
fn vector_instantiations_are_per_element_type() {
    let mut engine = engine();
    let core = engine.core();
    let vec_card4 = meng::register_vector_of(engine.registry_mut(), core.card4).unwrap();
    let again = meng::register_vector_of(engine.registry_mut(), core.card4).unwrap();
    assert_eq!(vec_card4, again);
    let vec_string = meng::register_vector_of(engine.registry_mut(), core.string).unwrap();
    assert_ne!(vec_card4, vec_string);

    let add_new = method_id(&engine, vec_card4, "AddNew");
    let get_at = method_id(&engine, vec_card4, "GetAt");

    let mut b = OpMethodBuilder::new();
    let v = b.local("Values", vec_card4);
    for value in [5_u32, 7] {
        b.op(OpCode::PushRet(core.void));
        b.op(OpCode::PushImm(Imm::Card4(value)));
        b.op(OpCode::Call {
            class_id: vec_card4,
            method: add_new,
            kind: DispatchKind::Direct,
            target: CallTarget::Local(v),
            parm_count: 1,
        });
        b.op(OpCode::Pop);
    }
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushImm(Imm::Card4(1)));
    b.op(OpCode::Call {
        class_id: vec_card4,
        method: get_at,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(v),
        parm_count: 1,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Vectors", core.card4, b);

    assert_eq!(ret_card4(engine.invoke("MEng.User.Vectors", "Start", Vec::new()).unwrap()), 7);
}

#[test]
fn vector_bad_index_raises() {
    let mut engine = engine();
    let core = engine.core();
    let vec_card4 = meng::register_vector_of(engine.registry_mut(), core.card4).unwrap();
    let get_at = method_id(&engine, vec_card4, "GetAt");

    let mut b = OpMethodBuilder::new();
    let v = b.local("Values", vec_card4);
    b.op(OpCode::PushRet(core.card4));
    b.op(OpCode::PushImm(Imm::Card4(0)));
    b.op(OpCode::Call {
        class_id: vec_card4,
        method: get_at,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(v),
        parm_count: 1,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.Empty", core.card4, b);

    let outcome = engine.invoke("MEng.User.Empty", "Start", Vec::new()).unwrap();
    let InvokeOutcome::UnhandledException(ev) = outcome else {
        panic!("expected an unhandled exception");
    };
    assert_eq!(ev.err_name, "BadIndex");
}

#[test]
fn string_formatting_round_trips_through_a_string_stream() {
    let mut engine = engine();
    let core = engine.core();
    let string_out = engine
        .registry_mut()
        .find_or_load("MEng.System.Runtime.StringOutStream")
        .unwrap();
    let write = method_id(&engine, string_out, "Write");
    let get_text = method_id(&engine, string_out, "GetText");

    // Write a Card4 through the formatted-write path and return the text.
    let mut b = OpMethodBuilder::new();
    let out = b.local("Out", string_out);
    b.op(OpCode::PushRet(core.void));
    b.op(OpCode::PushImm(Imm::Card4(42)));
    b.op(OpCode::Call {
        class_id: string_out,
        method: write,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(out),
        parm_count: 1,
    });
    b.op(OpCode::Pop);
    b.op(OpCode::PushRet(core.string));
    b.op(OpCode::Call {
        class_id: string_out,
        method: get_text,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(out),
        parm_count: 0,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.StreamFmt", core.string, b);

    let InvokeOutcome::Return(value) = engine.invoke("MEng.User.StreamFmt", "Start", Vec::new()).unwrap() else {
        panic!("expected a return");
    };
    assert_eq!(value.as_str().unwrap().as_str(), "42");
}

#[test]
fn card8_multiplication_wraps_at_width() {
    let mut engine = engine();
    let core = engine.core();
    let mul = method_id(&engine, core.card8, "Mul");

    // The widened product exceeds even the engine's internal arithmetic
    // range; the result must still wrap at the Card8 width.
    let mut b = OpMethodBuilder::new();
    let v = b.local("V", core.card8);
    b.op(OpCode::PushLocal(v));
    b.op(OpCode::PushImm(Imm::Card8(u64::MAX)));
    b.op(OpCode::Assign);
    b.op(OpCode::PushRet(core.card8));
    b.op(OpCode::PushImm(Imm::Card8(10)));
    b.op(OpCode::Call {
        class_id: core.card8,
        method: mul,
        kind: DispatchKind::Direct,
        target: CallTarget::Local(v),
        parm_count: 1,
    });
    b.op(OpCode::SetRet);
    b.op(OpCode::Return);
    register_start_class(&mut engine, "MEng.User.WideMul", core.card8, b);

    let InvokeOutcome::Return(value) = engine.invoke("MEng.User.WideMul", "Start", Vec::new()).unwrap() else {
        panic!("expected a return");
    };
    assert_eq!(value.as_card8().unwrap(), u64::MAX.wrapping_mul(10));
}
