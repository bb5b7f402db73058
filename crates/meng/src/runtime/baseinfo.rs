//! `MEng.BaseInfo`: engine and environment information surfaced to
//! programs.
//!
//! Programs gate diagnostics on `IsInDebugMode`, which reflects the host's
//! debug flag on the engine instance. The version literals and the macro
//! file-type accessors give host tooling a consistent surface.

use crate::{
    class::{ClassExtent, MethodExtent, MethodInfo, Visibility},
    engine::{ENGINE_VERSION, MACRO_FILE_DESCR, MACRO_FILE_EXT, MacroEngine},
    error::RegResult,
    except::RunResult,
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

#[derive(Debug, Default)]
pub struct BaseInfoClass {
    is_in_debug_mode: MethodId,
    get_version: MethodId,
    get_file_ext: MethodId,
    get_file_descr: MethodId,
}

impl RuntimeClass for BaseInfoClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.BaseInfo", reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let card4 = reg.core.card4;

        let m = MethodInfo::new("IsInDebugMode", reg.core.boolean, MethodExtent::Final, Visibility::Public);
        self.is_in_debug_mode = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetVersion", reg.core.void, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("MajVer", card4);
        m.add_out_parm("MinVer", card4);
        m.add_out_parm("Revision", card4);
        self.get_version = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetFileExt", reg.core.string, MethodExtent::Final, Visibility::Public);
        self.get_file_ext = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetFileDescr", reg.core.string, MethodExtent::Final, Visibility::Public);
        self.get_file_descr = reg.class_mut(id).add_method(m.const_method())?;

        reg.class_mut(id).add_literal("kMajVersion", card4, Payload::Card4(ENGINE_VERSION.0))?;
        reg.class_mut(id).add_literal("kMinVersion", card4, Payload::Card4(ENGINE_VERSION.1))?;
        reg.class_mut(id).add_literal("kRevision", card4, Payload::Card4(ENGINE_VERSION.2))?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::BaseInfo);
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.is_in_debug_mode {
            let debug = engine.in_debug_mode();
            engine.set_ret(Payload::Bool(debug))?;
        } else if mid == self.get_version {
            engine.parm_mut(0)?.payload = Payload::Card4(ENGINE_VERSION.0);
            engine.parm_mut(1)?.payload = Payload::Card4(ENGINE_VERSION.1);
            engine.parm_mut(2)?.payload = Payload::Card4(ENGINE_VERSION.2);
        } else if mid == self.get_file_ext {
            engine.set_ret(Payload::Str(MACRO_FILE_EXT.into()))?;
        } else if mid == self.get_file_descr {
            engine.set_ret(Payload::Str(MACRO_FILE_DESCR.into()))?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}
