//! `MEng.System.Runtime.Time`: timestamps and formatting.
//!
//! The payload is a millisecond UNIX timestamp. `Sleep` blocks the engine
//! thread, which is within the execution model's contract: the engine never
//! suspends, but runtime methods may block.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

use crate::{
    class::{ClassExtent, EnumDef, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

pub(crate) const CLASS_PATH: &str = "MEng.System.Runtime.Time";

/// Error ordinals of `Time.TimeErrs`.
const ERR_BAD_STAMP: u32 = 0;

/// The payload of a `Time` value: milliseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeVal {
    pub millis: i64,
}

#[derive(Debug, Default)]
pub struct TimeClass {
    errs: ClassId,
    set_to_now: MethodId,
    get_stamp: MethodId,
    set_stamp: MethodId,
    get_cur_millis: MethodId,
    format: MethodId,
    format_as: MethodId,
    get_time_parts: MethodId,
    sleep: MethodId,
}

impl RuntimeClass for TimeClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let card4 = reg.core.card4;
        let card8 = reg.core.card8;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.System.Runtime.Time.TimeErrs",
            EnumDef::from_pairs(&[("BadStamp", "the time stamp is not representable")]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);

        let m = MethodInfo::new("SetToNow", void, MethodExtent::Final, Visibility::Public);
        self.set_to_now = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetStamp", card8, MethodExtent::Final, Visibility::Public);
        self.get_stamp = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetStamp", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", card8);
        self.set_stamp = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetCurMillis", card8, MethodExtent::Final, Visibility::Public);
        self.get_cur_millis = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("Format", reg.core.string, MethodExtent::Final, Visibility::Public);
        self.format = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FormatAs", reg.core.string, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Pattern", reg.core.string);
        self.format_as = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetTimeParts", void, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("Hour", card4);
        m.add_out_parm("Minute", card4);
        m.add_out_parm("Second", card4);
        self.get_time_parts = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("Sleep", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Millis", card4);
        self.sleep = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Time(TimeVal::default()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.set_to_now {
            let millis = now_millis();
            recv_time_mut(engine)?.millis = millis;
        } else if mid == self.get_stamp {
            let millis = recv_time(engine)?.millis;
            engine.set_ret(Payload::Card8(millis.max(0) as u64))?;
        } else if mid == self.set_stamp {
            let to_set = engine.parm(0)?.as_card8()?;
            let Ok(millis) = i64::try_from(to_set) else {
                return Err(engine.throw(self.errs, ERR_BAD_STAMP, ""));
            };
            recv_time_mut(engine)?.millis = millis;
        } else if mid == self.get_cur_millis {
            engine.set_ret(Payload::Card8(now_millis().max(0) as u64))?;
        } else if mid == self.format {
            let millis = recv_time(engine)?.millis;
            let Some(formatted) = Local
                .timestamp_millis_opt(millis)
                .single()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            else {
                return Err(engine.throw(self.errs, ERR_BAD_STAMP, ""));
            };
            engine.set_ret(Payload::Str(formatted.as_str().into()))?;
        } else if mid == self.format_as {
            let pattern = engine.parm(0)?.as_str()?.as_str().to_owned();
            let millis = recv_time(engine)?.millis;
            let Some(formatted) = Local
                .timestamp_millis_opt(millis)
                .single()
                .map(|dt| dt.format(&pattern).to_string())
            else {
                return Err(engine.throw(self.errs, ERR_BAD_STAMP, ""));
            };
            engine.set_ret(Payload::Str(formatted.as_str().into()))?;
        } else if mid == self.get_time_parts {
            let millis = recv_time(engine)?.millis;
            let Some(dt) = Local.timestamp_millis_opt(millis).single() else {
                return Err(engine.throw(self.errs, ERR_BAD_STAMP, ""));
            };
            use chrono::Timelike as _;
            engine.parm_mut(0)?.payload = Payload::Card4(dt.hour());
            engine.parm_mut(1)?.payload = Payload::Card4(dt.minute());
            engine.parm_mut(2)?.payload = Payload::Card4(dt.second());
        } else if mid == self.sleep {
            let millis = engine.parm(0)?.as_card4()?;
            std::thread::sleep(Duration::from_millis(u64::from(millis)));
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn recv_time(engine: &MacroEngine) -> RunResult<&TimeVal> {
    match &engine.receiver()?.payload {
        Payload::Time(t) => Ok(t),
        other => Err(RunError::internal(format!("Time method on {}", other.kind_name()))),
    }
}

fn recv_time_mut(engine: &mut MacroEngine) -> RunResult<&mut TimeVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::Time(t) => Ok(t),
        other => Err(RunError::internal(format!("Time method on {}", other.kind_name()))),
    }
}
