//! `MEng.StringList`: an ordered list of strings with an optional
//! uniqueness constraint.

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

/// Error ordinals of `MEng.StringList.StrListErrs`.
const ERR_BAD_INDEX: u32 = 0;
const ERR_ALREADY_USED: u32 = 1;
const ERR_SRC_TAR_SAME: u32 = 2;

/// The payload of a `MEng.StringList` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrListVal {
    items: Vec<String>,
    unique: bool,
}

impl StrListVal {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Replaces the whole contents, dropping the uniqueness check; used by
    /// `String.Split` which produces whatever the split yields.
    pub fn replace_all(&mut self, items: Vec<String>) {
        self.items = items;
    }
}

#[derive(Debug, Default)]
pub struct StringListClass {
    errs: ClassId,
    append: MethodId,
    insert_at: MethodId,
    remove_at: MethodId,
    remove_all: MethodId,
    get_at: MethodId,
    get_elem_count: MethodId,
    is_empty: MethodId,
    find: MethodId,
    append_from: MethodId,
    copy_from: MethodId,
    steal_from: MethodId,
    get_unique: MethodId,
    set_unique: MethodId,
}

impl RuntimeClass for StringListClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.StringList", reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let boolean = reg.core.boolean;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.StringList.StrListErrs",
            EnumDef::from_pairs(&[
                ("BadIndex", "the index is beyond the list's element count"),
                ("AlreadyUsed", "the string is already in this unique list"),
                ("SrcTarSame", "the source and target are the same list"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("Append", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAdd", string);
        self.append = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("InsertAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAdd", string);
        m.add_in_parm("Index", card4);
        self.insert_at = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("RemoveAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.remove_at = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("RemoveAll", void, MethodExtent::Final, Visibility::Public);
        self.remove_all = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("GetAt", string, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.get_at = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetElemCount", card4, MethodExtent::Final, Visibility::Public);
        self.get_elem_count = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("IsEmpty", boolean, MethodExtent::Final, Visibility::Public);
        self.is_empty = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("Find", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", string);
        m.add_out_parm("Index", card4);
        self.find = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("AppendFrom", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Source", id);
        self.append_from = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("CopyFrom", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Source", id);
        self.copy_from = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("StealFrom", void, MethodExtent::Final, Visibility::Public);
        m.add_inout_parm("Source", id);
        self.steal_from = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetUnique", boolean, MethodExtent::Final, Visibility::Public);
        self.get_unique = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetUnique", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", boolean);
        self.set_unique = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::StrList(StrListVal::default()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;

        if mid == self.append || mid == self.insert_at {
            let to_add = engine.parm(0)?.as_str()?.as_str().to_owned();
            let index = if mid == self.insert_at {
                Some(engine.parm(1)?.as_card4()? as usize)
            } else {
                None
            };
            let (unique, len, duplicate) = {
                let list = recv_list(engine)?;
                (list.unique, list.items.len(), list.items.contains(&to_add))
            };
            if unique && duplicate {
                return Err(engine.throw(self.errs, ERR_ALREADY_USED, format!("'{to_add}' is already present")));
            }
            match index {
                None => recv_list_mut(engine)?.items.push(to_add),
                Some(index) => {
                    if index > len {
                        return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
                    }
                    recv_list_mut(engine)?.items.insert(index, to_add);
                }
            }
        } else if mid == self.remove_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            if index >= recv_list(engine)?.items.len() {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            }
            recv_list_mut(engine)?.items.remove(index);
        } else if mid == self.remove_all {
            recv_list_mut(engine)?.items.clear();
        } else if mid == self.get_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let item = recv_list(engine)?.items.get(index).cloned();
            let Some(item) = item else {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            };
            engine.set_ret(Payload::Str(item.as_str().into()))?;
        } else if mid == self.get_elem_count {
            let count = recv_list(engine)?.items.len() as u32;
            engine.set_ret(Payload::Card4(count))?;
        } else if mid == self.is_empty {
            let empty = recv_list(engine)?.items.is_empty();
            engine.set_ret(Payload::Bool(empty))?;
        } else if mid == self.find {
            let to_find = engine.parm(0)?.as_str()?.as_str().to_owned();
            let found = recv_list(engine)?.items.iter().position(|item| *item == to_find);
            if let Some(index) = found {
                engine.parm_mut(1)?.payload = Payload::Card4(index as u32);
            }
            engine.set_ret(Payload::Bool(found.is_some()))?;
        } else if mid == self.append_from || mid == self.copy_from || mid == self.steal_from {
            if engine.current_parm_target(0)? == engine.current_receiver_target()? {
                return Err(engine.throw(self.errs, ERR_SRC_TAR_SAME, ""));
            }
            let src = match &engine.parm(0)?.payload {
                Payload::StrList(list) => list.items.clone(),
                other => return Err(RunError::internal(format!("list source is {}", other.kind_name()))),
            };
            if mid == self.copy_from || mid == self.steal_from {
                recv_list_mut(engine)?.items = src;
            } else {
                let duplicate = {
                    let tar = recv_list(engine)?;
                    if tar.unique {
                        src.iter().find(|item| tar.items.contains(*item)).cloned()
                    } else {
                        None
                    }
                };
                if let Some(dup) = duplicate {
                    return Err(engine.throw(self.errs, ERR_ALREADY_USED, format!("'{dup}' is already present")));
                }
                recv_list_mut(engine)?.items.extend(src);
            }
            if mid == self.steal_from {
                match &mut engine.parm_mut(0)?.payload {
                    Payload::StrList(list) => list.items.clear(),
                    _ => return Err(RunError::internal("steal source changed type")),
                }
            }
        } else if mid == self.get_unique {
            let unique = recv_list(engine)?.unique;
            engine.set_ret(Payload::Bool(unique))?;
        } else if mid == self.set_unique {
            let to_set = engine.parm(0)?.as_bool()?;
            recv_list_mut(engine)?.unique = to_set;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_list(engine: &MacroEngine) -> RunResult<&StrListVal> {
    match &engine.receiver()?.payload {
        Payload::StrList(list) => Ok(list),
        other => Err(RunError::internal(format!("StringList method on {}", other.kind_name()))),
    }
}

fn recv_list_mut(engine: &mut MacroEngine) -> RunResult<&mut StrListVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::StrList(list) => Ok(list),
        other => Err(RunError::internal(format!("StringList method on {}", other.kind_name()))),
    }
}
