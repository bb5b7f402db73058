//! `MEng.Enum`: the abstract base every enum class derives from.
//!
//! User and nested enum classes are plain descriptors carrying an
//! [`crate::class::EnumDef`]; they have no handler of their own, so every
//! enum method dispatches here through the parent-chain walk. Each item has
//! a name, a display text, and optionally a mapping value used to carry a
//! host-side integer code.

use crate::{
    class::{ClassExtent, EnumDef, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::RunResult,
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

/// Error ordinals of `MEng.Enum.EnumErrs`.
const ERR_BAD_ORDINAL: u32 = 0;
const ERR_NAME_NOT_FOUND: u32 = 1;
const ERR_NO_MAP_VALUE: u32 = 2;

#[derive(Debug, Default)]
pub struct EnumBaseClass {
    errs: ClassId,
    get_ordinal: MethodId,
    set_ordinal: MethodId,
    get_name: MethodId,
    get_text: MethodId,
    get_item_count: MethodId,
    from_name: MethodId,
    map_value: MethodId,
    from_map_value: MethodId,
    format_to: MethodId,
}

impl RuntimeClass for EnumBaseClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.Enum", reg.core.formattable, ClassExtent::Abstract);
        let id = reg.register_class(cls)?;
        // Nested enums (including our own error enum) parent off this class,
        // so publish the id before registering them.
        reg.core.enum_base = id;

        // Primitive classes register after this one, so the signatures here
        // use loose Object-typed slots the way the formattable stubs do; the
        // native bodies enforce the real payload kinds.
        let object = reg.core.object;
        let m = MethodInfo::new("GetOrdinal", object, MethodExtent::Final, Visibility::Public);
        self.get_ordinal = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetOrdinal", object, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", object);
        self.set_ordinal = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetName", object, MethodExtent::Final, Visibility::Public);
        self.get_name = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetText", object, MethodExtent::Final, Visibility::Public);
        self.get_text = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetItemCount", object, MethodExtent::Final, Visibility::Public);
        self.get_item_count = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FromName", object, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", object);
        self.from_name = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("MapValue", object, MethodExtent::Final, Visibility::Public);
        self.map_value = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FromMapValue", object, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToMap", object);
        self.from_map_value = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("FormatTo", object, MethodExtent::Override, Visibility::Public);
        m.add_inout_parm("TarStream", object);
        self.format_to = reg.core.format_to;
        reg.class_mut(id).add_override(self.format_to, m.const_method())?;

        let errs = EnumDef::from_pairs(&[
            ("BadOrdinal", "the ordinal is beyond the enum's item count"),
            ("NameNotFound", "no item of the enum has that name"),
            ("NoMapValue", "no item of the enum has that map value"),
        ]);
        self.errs = reg.register_enum("MEng.Enum.EnumErrs", errs)?;
        reg.class_mut(id).add_nested_type(self.errs);
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Enum(0));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        let (recv_class, ordinal) = {
            let recv = engine.receiver()?;
            (recv.class_id(), recv.as_enum()?)
        };
        let def = |engine: &MacroEngine| -> RunResult<EnumDef> {
            engine
                .registry()
                .class(recv_class)
                .enum_def
                .clone()
                .ok_or_else(|| crate::except::RunError::internal("enum value of a class with no enum definition"))
        };

        if mid == self.get_ordinal {
            engine.set_ret(Payload::Card4(ordinal))?;
        } else if mid == self.set_ordinal {
            let to_set = engine.parm(0)?.as_card4()?;
            let def = def(engine)?;
            if to_set >= def.item_count() {
                return Err(engine.throw(self.errs, ERR_BAD_ORDINAL, ""));
            }
            engine.receiver_mut()?.set_enum(to_set)?;
        } else if mid == self.get_name {
            let def = def(engine)?;
            let name = def
                .item(ordinal)
                .map(|item| item.name.clone())
                .unwrap_or_default();
            engine.set_ret(Payload::Str(name.as_str().into()))?;
        } else if mid == self.get_text {
            let def = def(engine)?;
            let text = def
                .item(ordinal)
                .map(|item| item.text.clone())
                .unwrap_or_default();
            engine.set_ret(Payload::Str(text.as_str().into()))?;
        } else if mid == self.get_item_count {
            engine.set_ret(Payload::Card4(def(engine)?.item_count()))?;
        } else if mid == self.from_name {
            let name = engine.parm(0)?.as_str()?.as_str().to_owned();
            let def = def(engine)?;
            let Some(found) = def.find_by_name(&name) else {
                return Err(engine.throw(self.errs, ERR_NAME_NOT_FOUND, format!("'{name}' is not an item name")));
            };
            engine.receiver_mut()?.set_enum(found)?;
        } else if mid == self.map_value {
            let def = def(engine)?;
            let map_val = def.item(ordinal).and_then(|item| item.map_val).unwrap_or_default();
            engine.set_ret(Payload::Int4(map_val))?;
        } else if mid == self.from_map_value {
            let to_map = engine.parm(0)?.as_int4()?;
            let def = def(engine)?;
            let Some(found) = def.find_by_map(to_map) else {
                return Err(engine.throw(self.errs, ERR_NO_MAP_VALUE, format!("no item maps to {to_map}")));
            };
            engine.receiver_mut()?.set_enum(found)?;
        } else if mid == self.format_to {
            let target = engine.current_receiver_target()?;
            let text = engine.format_value_text(&target)?;
            super::streams::write_to_stream_parm(engine, 0, &text)?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}
