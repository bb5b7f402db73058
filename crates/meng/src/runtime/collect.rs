//! The generic collections: `MEng.System.Runtime.KVPair` and the
//! vector-of-T family.
//!
//! Vector instantiations are created per element type: each gets a distinct
//! class id, a generated path, and its own handler carrying the element
//! class. The abstract `Vector` base exists so instantiations share a
//! parent and the shared `VectorErrs` enum.

use crate::{
    class::{ClassExtent, EnumDef, MengClass, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

const VECTOR_BASE_PATH: &str = "MEng.System.Runtime.Vector";
const VECTOR_ERRS_PATH: &str = "MEng.System.Runtime.Vector.VecErrs";

/// Error ordinals of `VecErrs`.
const ERR_BAD_INDEX: u32 = 0;

/// The payload of a `MEng.System.Runtime.KVPair` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KVPairVal {
    pub key: String,
    pub value: String,
}

/// The payload of a vector instantiation value.
#[derive(Debug)]
pub struct VectorVal {
    elem_class: ClassId,
    items: Vec<Value>,
}

impl VectorVal {
    #[must_use]
    pub fn new(elem_class: ClassId) -> Self {
        Self {
            elem_class,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn elem_class(&self) -> ClassId {
        self.elem_class
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element-wise duplication; fails when any element is not copyable.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            items.push(item.try_clone()?);
        }
        Some(Self {
            elem_class: self.elem_class,
            items,
        })
    }
}

#[derive(Debug, Default)]
pub struct KVPairClass {
    get_key: MethodId,
    set_key: MethodId,
    get_value: MethodId,
    set_value: MethodId,
    set: MethodId,
    matches_key: MethodId,
}

impl RuntimeClass for KVPairClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.System.Runtime.KVPair", reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let void = reg.core.void;

        let m = MethodInfo::new("GetKey", string, MethodExtent::Final, Visibility::Public);
        self.get_key = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetKey", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", string);
        self.set_key = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetValue", string, MethodExtent::Final, Visibility::Public);
        self.get_value = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetValue", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", string);
        self.set_value = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("Set", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("KeyToSet", string);
        m.add_in_parm("ValToSet", string);
        self.set = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("MatchesKey", reg.core.boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToCheck", string);
        self.matches_key = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::KVPair(KVPairVal::default()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.get_key || mid == self.get_value {
            let pair = recv_pair(engine)?;
            let text = if mid == self.get_key { pair.key.clone() } else { pair.value.clone() };
            engine.set_ret(Payload::Str(text.as_str().into()))?;
        } else if mid == self.set_key || mid == self.set_value {
            let to_set = engine.parm(0)?.as_str()?.as_str().to_owned();
            let pair = recv_pair_mut(engine)?;
            if mid == self.set_key {
                pair.key = to_set;
            } else {
                pair.value = to_set;
            }
        } else if mid == self.set {
            let key = engine.parm(0)?.as_str()?.as_str().to_owned();
            let value = engine.parm(1)?.as_str()?.as_str().to_owned();
            let pair = recv_pair_mut(engine)?;
            pair.key = key;
            pair.value = value;
        } else if mid == self.matches_key {
            let to_check = engine.parm(0)?.as_str()?.as_str().to_owned();
            let matches = recv_pair(engine)?.key == to_check;
            engine.set_ret(Payload::Bool(matches))?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_pair(engine: &MacroEngine) -> RunResult<&KVPairVal> {
    match &engine.receiver()?.payload {
        Payload::KVPair(pair) => Ok(pair),
        other => Err(RunError::internal(format!("KVPair method on {}", other.kind_name()))),
    }
}

fn recv_pair_mut(engine: &mut MacroEngine) -> RunResult<&mut KVPairVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::KVPair(pair) => Ok(pair),
        other => Err(RunError::internal(format!("KVPair method on {}", other.kind_name()))),
    }
}

/// Registers the abstract vector base and its shared error enum.
pub(crate) fn register_vector_base(reg: &mut ClassRegistry) -> RegResult<ClassId> {
    let cls = class_shell(VECTOR_BASE_PATH, reg.core.object, ClassExtent::Abstract);
    let id = reg.register_class(cls)?;
    let errs = reg.register_enum(
        VECTOR_ERRS_PATH,
        EnumDef::from_pairs(&[("BadIndex", "the index is beyond the vector's element count")]),
    )?;
    reg.class_mut(id).add_nested_type(errs);
    reg.seal(id);
    Ok(id)
}

/// Creates (or finds) the vector instantiation for an element class and
/// returns its class id. Each element type yields a distinct class.
pub fn register_vector_of(reg: &mut ClassRegistry, elem_class: ClassId) -> RegResult<ClassId> {
    let elem_path = reg.class(elem_class).path().to_owned();
    let path = format!("MEng.System.Runtime.VectorOf_{}", elem_path.replace('.', "_"));
    if let Some(existing) = reg.find_by_path(&path) {
        return Ok(existing);
    }
    reg.install(Box::new(VectorOfClass::new(path, elem_class)))
}

/// Handler for one vector instantiation.
#[derive(Debug)]
struct VectorOfClass {
    path: String,
    elem_class: ClassId,
    errs: ClassId,
    add_new: MethodId,
    insert_at: MethodId,
    get_at: MethodId,
    set_at: MethodId,
    remove_at: MethodId,
    remove_all: MethodId,
    get_elem_count: MethodId,
    is_empty: MethodId,
}

impl VectorOfClass {
    fn new(path: String, elem_class: ClassId) -> Self {
        Self {
            path,
            elem_class,
            errs: ClassId::BAD,
            add_new: MethodId::BAD,
            insert_at: MethodId::BAD,
            get_at: MethodId::BAD,
            set_at: MethodId::BAD,
            remove_at: MethodId::BAD,
            remove_all: MethodId::BAD,
            get_elem_count: MethodId::BAD,
            is_empty: MethodId::BAD,
        }
    }
}

impl RuntimeClass for VectorOfClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let parent = reg.find_or_load(VECTOR_BASE_PATH)?;
        let mut cls = MengClass::new(
            crate::error::short_name_of(&self.path).to_owned(),
            self.path.clone(),
            Some(parent),
            ClassExtent::Final,
        );
        cls.elem_class = Some(self.elem_class);
        let id = reg.register_class(cls)?;
        self.errs = reg
            .find_by_path(VECTOR_ERRS_PATH)
            .ok_or_else(|| crate::error::RegError::ClassNotFound(VECTOR_ERRS_PATH.to_owned()))?;
        let elem = self.elem_class;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        let mut m = MethodInfo::new("AddNew", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAdd", elem);
        self.add_new = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("InsertAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAdd", elem);
        m.add_in_parm("Index", card4);
        self.insert_at = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("GetAt", elem, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.get_at = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", elem);
        m.add_in_parm("Index", card4);
        self.set_at = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("RemoveAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.remove_at = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("RemoveAll", void, MethodExtent::Final, Visibility::Public);
        self.remove_all = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetElemCount", card4, MethodExtent::Final, Visibility::Public);
        self.get_elem_count = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("IsEmpty", reg.core.boolean, MethodExtent::Final, Visibility::Public);
        self.is_empty = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Vector(VectorVal::new(self.elem_class)));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.add_new || mid == self.insert_at || mid == self.set_at {
            let elem = engine
                .parm(0)?
                .try_clone()
                .ok_or_else(|| RunError::internal("vector element is not copyable"))?;
            let index = if mid == self.add_new {
                None
            } else {
                Some(engine.parm(1)?.as_card4()? as usize)
            };
            let len = recv_vec(engine)?.items.len();
            match (mid == self.set_at, index) {
                (_, None) => recv_vec_mut(engine)?.items.push(elem),
                (false, Some(index)) => {
                    if index > len {
                        return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
                    }
                    recv_vec_mut(engine)?.items.insert(index, elem);
                }
                (true, Some(index)) => {
                    if index >= len {
                        return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
                    }
                    recv_vec_mut(engine)?.items[index] = elem;
                }
            }
        } else if mid == self.get_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let elem = recv_vec(engine)?.items.get(index).map(Value::try_clone);
            match elem {
                None => return Err(engine.throw(self.errs, ERR_BAD_INDEX, "")),
                Some(None) => return Err(RunError::internal("vector element is not copyable")),
                Some(Some(elem)) => engine.set_ret(elem.payload)?,
            }
        } else if mid == self.remove_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            if index >= recv_vec(engine)?.items.len() {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            }
            recv_vec_mut(engine)?.items.remove(index);
        } else if mid == self.remove_all {
            recv_vec_mut(engine)?.items.clear();
        } else if mid == self.get_elem_count {
            let len = recv_vec(engine)?.items.len() as u32;
            engine.set_ret(Payload::Card4(len))?;
        } else if mid == self.is_empty {
            let empty = recv_vec(engine)?.items.is_empty();
            engine.set_ret(Payload::Bool(empty))?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_vec(engine: &MacroEngine) -> RunResult<&VectorVal> {
    match &engine.receiver()?.payload {
        Payload::Vector(vec) => Ok(vec),
        other => Err(RunError::internal(format!("Vector method on {}", other.kind_name()))),
    }
}

fn recv_vec_mut(engine: &mut MacroEngine) -> RunResult<&mut VectorVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::Vector(vec) => Ok(vec),
        other => Err(RunError::internal(format!("Vector method on {}", other.kind_name()))),
    }
}
