//! The root classes: `MEng.Object`, `MEng.Formattable`, `MEng.Void`, and
//! `MEng.Exception`.

use crate::{
    class::{ClassExtent, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{ExceptVal, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell, streams},
    value::{Payload, Value},
};

/// `MEng.Object`: the root of every class tree. Carries no methods; program
/// classes that derive from it directly get member-list storage.
#[derive(Debug, Default)]
pub struct ObjectClass;

impl RuntimeClass for ObjectClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = crate::class::MengClass::new("Object", "MEng.Object", None, ClassExtent::NonFinal);
        reg.register_class(cls)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Members(Vec::new()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, _engine: &mut MacroEngine, _call: &NativeCall) -> RunResult<NativeResult> {
        Ok(NativeResult::Unhandled)
    }
}

/// `MEng.Formattable`: the abstract contract behind every "to text" use.
///
/// `FormatTo` is required; its id is cached in the registry's core table at
/// registration because it is the most frequent polymorphic call target.
/// `DbgFormat` gets a default body here that renders the value the same way
/// `FormatTo` would; numeric classes override it to honor the radix.
#[derive(Debug, Default)]
pub struct FormattableClass {
    format_to: MethodId,
    dbg_format: MethodId,
}

impl RuntimeClass for FormattableClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.Formattable", reg.core.object, ClassExtent::Abstract);
        let id = reg.register_class(cls)?;
        // Parameter classes on these two are deliberately loose (`Object`):
        // the stream classes register later, and every binding resolves
        // against a concrete override's signature anyway.
        let mut fmt = MethodInfo::new("FormatTo", reg.core.void, MethodExtent::Required, Visibility::Public);
        fmt.add_inout_parm("TarStream", reg.core.object);
        self.format_to = reg.class_mut(id).add_method(fmt.const_method())?;
        reg.core.format_to = self.format_to;

        let mut dbg = MethodInfo::new("DbgFormat", reg.core.void, MethodExtent::NonFinal, Visibility::Public);
        dbg.add_inout_parm("TarStream", reg.core.object);
        dbg.add_in_parm("Radix", reg.core.object);
        dbg.add_in_parm("Verbose", reg.core.object);
        self.dbg_format = reg.class_mut(id).add_method(dbg.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Members(Vec::new()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        if call.method_id == self.dbg_format {
            let receiver = engine.current_receiver_target()?;
            let text = engine.format_value_text(&receiver)?;
            streams::write_to_stream_parm(engine, 0, &text)?;
            return Ok(NativeResult::Handled);
        }
        Ok(NativeResult::Unhandled)
    }
}

/// `MEng.Void`: the return type of methods that return nothing.
#[derive(Debug, Default)]
pub struct VoidClass;

impl RuntimeClass for VoidClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.Void", reg.core.object, ClassExtent::Final);
        reg.register_class(cls)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Void);
        value.set_const(is_const);
        value
    }

    fn invoke(&self, _engine: &mut MacroEngine, _call: &NativeCall) -> RunResult<NativeResult> {
        Ok(NativeResult::Unhandled)
    }
}

/// `MEng.Exception`: the value a catch block receives.
#[derive(Debug, Default)]
pub struct ExceptionClass {
    get_error_text: MethodId,
    get_error_name: MethodId,
    get_class: MethodId,
    get_line: MethodId,
    check: MethodId,
    check_greater: MethodId,
}

impl RuntimeClass for ExceptionClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.Exception", reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let boolean = reg.core.boolean;

        let m = MethodInfo::new("GetErrorText", string, MethodExtent::Final, Visibility::Public);
        self.get_error_text = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetErrorName", string, MethodExtent::Final, Visibility::Public);
        self.get_error_name = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetClass", string, MethodExtent::Final, Visibility::Public);
        self.get_class = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetLine", reg.core.card4, MethodExtent::Final, Visibility::Public);
        self.get_line = reg.class_mut(id).add_method(m.const_method())?;

        let mut m = MethodInfo::new("Check", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToCheck", reg.core.enum_base);
        self.check = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("CheckGreater", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToCheck", reg.core.enum_base);
        self.check_greater = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Except(Box::new(ExceptVal::default())));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.check || mid == self.check_greater {
            let (parm_class, parm_ord) = {
                let parm = engine.parm(0)?;
                (parm.class_id(), parm.as_enum()?)
            };
            let ev = recv_except(engine)?;
            let result = if mid == self.check {
                ev.matches(parm_class, parm_ord)
            } else {
                ev.matches_greater(parm_class, parm_ord)
            };
            engine.set_ret(Payload::Bool(result))?;
            return Ok(NativeResult::Handled);
        }
        let payload = {
            let ev = recv_except(engine)?;
            if mid == self.get_error_text {
                Payload::Str(ev.err_text.as_str().into())
            } else if mid == self.get_error_name {
                Payload::Str(ev.err_name.as_str().into())
            } else if mid == self.get_class {
                Payload::Str(ev.src_class_path.as_str().into())
            } else if mid == self.get_line {
                Payload::Card4(ev.line)
            } else {
                return Ok(NativeResult::Unhandled);
            }
        };
        engine.set_ret(payload)?;
        Ok(NativeResult::Handled)
    }
}

fn recv_except(engine: &MacroEngine) -> RunResult<ExceptVal> {
    match &engine.receiver()?.payload {
        Payload::Except(ev) => Ok((**ev).clone()),
        other => Err(crate::except::RunError::internal(format!(
            "Exception method on {} payload",
            other.kind_name()
        ))),
    }
}
