//! Demo driver for the macro engine.
//!
//! The external compiler is a separate tool, so this binary assembles a few
//! small programs directly through the embedding API and runs them. It
//! exists to exercise the host-embedding surface end to end: engine setup,
//! handler installation, class registration, invocation, and the unhandled
//! exception path.

use std::process::ExitCode;

use meng::{
    CallTarget, ClassExtent, DispatchKind, EnumDef, FixedBaseResolver, Imm, InvokeOutcome, MacroEngine, MengClass,
    MethodExtent, MethodInfo, OpCode, OpMethodBuilder, StreamErrHandler, Visibility,
};

fn main() -> ExitCode {
    let demo = std::env::args().nth(1).unwrap_or_else(|| "hello".to_owned());
    match run_demo(&demo) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("meng: {err}");
            ExitCode::from(2)
        }
    }
}

fn run_demo(demo: &str) -> Result<u8, Box<dyn std::error::Error>> {
    let mut engine = MacroEngine::new()?;
    engine.set_err_handler(Box::new(StreamErrHandler::new(std::io::stderr())));
    engine.set_resolver(Box::new(FixedBaseResolver::new(
        std::env::current_dir()?.to_string_lossy().into_owned(),
    )));

    match demo {
        "hello" => hello(&mut engine),
        "throw" => throw(&mut engine),
        other => {
            eprintln!("meng: unknown demo '{other}' (try: hello, throw)");
            Ok(2)
        }
    }
}

/// Writes a greeting through the console stream class and returns 0.
fn hello(engine: &mut MacroEngine) -> Result<u8, Box<dyn std::error::Error>> {
    let core = engine.core();
    let console = engine.registry_mut().find_or_load("MEng.System.Runtime.ConsoleOutStream")?;
    let write_line = method_of(engine, console, "WriteLine");
    let flush = method_of(engine, console, "Flush");

    let mut b = OpMethodBuilder::new();
    let out = b.local("Output", console);
    b.op(OpCode::CurLine(1));
    b.op(OpCode::PushRet(core.void));
    b.push_str("Hello from the macro engine");
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

    let mut cls = MengClass::new("Hello", "MEng.User.Hello", Some(core.object), ClassExtent::NonFinal);
    cls.add_method(MethodInfo::new("Start", core.card4, MethodExtent::Final, Visibility::Public).with_opcodes(b.finish()))?;
    let id = engine.registry_mut().register_class(cls)?;
    engine.registry_mut().seal(id);

    match engine.invoke("MEng.User.Hello", "Start", Vec::new())? {
        InvokeOutcome::Return(value) => Ok(value.as_card4().map(|v| v as u8).unwrap_or(0)),
        InvokeOutcome::UnhandledException(_) => Ok(1),
    }
}

/// Throws an uncaught user exception so the stream error handler renders a
/// report with a stack dump.
fn throw(engine: &mut MacroEngine) -> Result<u8, Box<dyn std::error::Error>> {
    let core = engine.core();
    let mut errs = EnumDef::default();
    errs.add_item("Deliberate", "a deliberately unhandled failure", None);
    let my_errs = engine.registry_mut().register_enum("MEng.User.DemoErrs", errs)?;

    let mut b = OpMethodBuilder::new();
    b.op(OpCode::CurLine(4));
    b.op(OpCode::PushEnum {
        class_id: my_errs,
        ordinal: 0,
    });
    b.op(OpCode::Throw);

    let mut cls = MengClass::new("Demo", "MEng.User.Demo", Some(core.object), ClassExtent::NonFinal);
    cls.add_method(MethodInfo::new("Start", core.card4, MethodExtent::Final, Visibility::Public).with_opcodes(b.finish()))?;
    let id = engine.registry_mut().register_class(cls)?;
    engine.registry_mut().seal(id);

    match engine.invoke("MEng.User.Demo", "Start", Vec::new())? {
        InvokeOutcome::Return(_) => Ok(0),
        InvokeOutcome::UnhandledException(_) => Ok(1),
    }
}

fn method_of(engine: &MacroEngine, class: meng::ClassId, name: &str) -> meng::MethodId {
    engine
        .registry()
        .find_method(class, name)
        .map(|(_, info)| info.id())
        .expect("built-in method present")
}
