//! `MEng.System.Runtime.RandomNum`: pseudo-random number generation.

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};

use crate::{
    class::{ClassExtent, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

pub(crate) const CLASS_PATH: &str = "MEng.System.Runtime.RandomNum";

/// The payload of a `RandomNum` value.
#[derive(Debug)]
pub struct RandomVal {
    rng: StdRng,
}

#[derive(Debug, Default)]
pub struct RandomNumClass {
    seed: MethodId,
    get_next_val: MethodId,
    get_next_percent: MethodId,
}

impl RuntimeClass for RandomNumClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let card4 = reg.core.card4;

        let mut m = MethodInfo::new("Seed", reg.core.void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", card4);
        self.seed = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("GetNextVal", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Modulus", card4);
        self.get_next_val = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetNextPercent", card4, MethodExtent::Final, Visibility::Public);
        self.get_next_percent = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(
            class_id,
            Payload::Random(Box::new(RandomVal {
                rng: StdRng::from_entropy(),
            })),
        );
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.seed {
            let seed = engine.parm(0)?.as_card4()?;
            recv_random_mut(engine)?.rng = StdRng::seed_from_u64(u64::from(seed));
        } else if mid == self.get_next_val {
            let modulus = engine.parm(0)?.as_card4()?;
            let raw: u32 = recv_random_mut(engine)?.rng.r#gen();
            // A zero modulus means the full Card4 range.
            let value = if modulus == 0 { raw } else { raw % modulus };
            engine.set_ret(Payload::Card4(value))?;
        } else if mid == self.get_next_percent {
            let value = recv_random_mut(engine)?.rng.gen_range(0..=100_u32);
            engine.set_ret(Payload::Card4(value))?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_random_mut(engine: &mut MacroEngine) -> RunResult<&mut RandomVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::Random(r) => Ok(r),
        other => Err(RunError::internal(format!("RandomNum method on {}", other.kind_name()))),
    }
}
