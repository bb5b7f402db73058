//! `MEng.Boolean`.

use crate::{
    class::{ClassExtent, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::RunResult,
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell, streams},
    value::{Payload, Value},
};

#[derive(Debug, Default)]
pub struct BooleanClass {
    set: MethodId,
    negate: MethodId,
    and: MethodId,
    or: MethodId,
    xor: MethodId,
    equal: MethodId,
    format_to: MethodId,
}

impl RuntimeClass for BooleanClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.Boolean", reg.core.formattable, ClassExtent::Final);
        let id = reg.register_class(cls)?;

        let mut m = MethodInfo::new("Set", id, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", id);
        self.set = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("Negate", id, MethodExtent::Final, Visibility::Public);
        self.negate = reg.class_mut(id).add_method(m)?;
        for (name, slot) in [("And", 0_usize), ("Or", 1), ("Xor", 2), ("Equal", 3)] {
            let mut m = MethodInfo::new(name, id, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToComp", id);
            let mid = reg.class_mut(id).add_method(m.const_method())?;
            match slot {
                0 => self.and = mid,
                1 => self.or = mid,
                2 => self.xor = mid,
                _ => self.equal = mid,
            }
        }
        let mut m = MethodInfo::new("FormatTo", reg.core.void, MethodExtent::Override, Visibility::Public);
        m.add_inout_parm("TarStream", reg.core.object);
        self.format_to = reg.core.format_to;
        reg.class_mut(id).add_override(self.format_to, m.const_method())?;

        reg.class_mut(id).add_literal("kTrue", id, Payload::Bool(true))?;
        reg.class_mut(id).add_literal("kFalse", id, Payload::Bool(false))?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Bool(false));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.set {
            let to_set = engine.parm(0)?.as_bool()?;
            engine.receiver_mut()?.payload = Payload::Bool(to_set);
        } else if mid == self.negate {
            let cur = engine.receiver()?.as_bool()?;
            engine.receiver_mut()?.payload = Payload::Bool(!cur);
            engine.set_ret(Payload::Bool(!cur))?;
        } else if mid == self.and || mid == self.or || mid == self.xor || mid == self.equal {
            let rhs = engine.parm(0)?.as_bool()?;
            let lhs = engine.receiver()?.as_bool()?;
            let result = if mid == self.and {
                lhs && rhs
            } else if mid == self.or {
                lhs || rhs
            } else if mid == self.xor {
                lhs ^ rhs
            } else {
                lhs == rhs
            };
            engine.set_ret(Payload::Bool(result))?;
        } else if mid == self.format_to {
            let lhs = engine.receiver()?.as_bool()?;
            streams::write_to_stream_parm(engine, 0, if lhs { "True" } else { "False" })?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}
