//! `MEng.Char`: character classification, case conversion, and ordinal
//! arithmetic.

use crate::{
    class::{ClassExtent, EnumDef, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::RunResult,
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell, streams},
    value::{Payload, Value},
};

const ERR_BAD_ORDINAL: u32 = 0;

/// Classification checks exposed through `IsOfType`.
/// Ordinals match `MEng.Char.CharTypes`.
const TYPE_ASCII_ALPHA: u32 = 0;
const TYPE_ALPHA: u32 = 1;
const TYPE_ALPHANUM: u32 = 2;
const TYPE_DIGIT: u32 = 3;
const TYPE_HEX_DIGIT: u32 = 4;
const TYPE_WHITESPACE: u32 = 5;
const TYPE_PUNCT: u32 = 6;

#[derive(Debug, Default)]
pub struct CharClass {
    errs: ClassId,
    char_types: ClassId,
    set: MethodId,
    equal: MethodId,
    is_of_type: MethodId,
    to_upper: MethodId,
    to_lower: MethodId,
    get_ordinal: MethodId,
    set_ordinal: MethodId,
    ofs_ordinal: MethodId,
    format_to: MethodId,
}

impl RuntimeClass for CharClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.Char", reg.core.formattable, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let boolean = reg.core.boolean;
        let card4 = reg.core.card4;

        self.char_types = reg.register_enum(
            "MEng.Char.CharTypes",
            EnumDef::from_pairs(&[
                ("ASCIIAlpha", "ASCII alphabetic"),
                ("Alpha", "alphabetic"),
                ("AlphaNum", "alphanumeric"),
                ("Digit", "decimal digit"),
                ("HexDigit", "hexadecimal digit"),
                ("Whitespace", "whitespace"),
                ("Punct", "punctuation"),
            ]),
        )?;
        self.errs = reg.register_enum(
            "MEng.Char.CharErrs",
            EnumDef::from_pairs(&[("BadOrdinal", "the ordinal is not a valid character")]),
        )?;
        reg.class_mut(id).add_nested_type(self.char_types);
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("Set", id, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", id);
        self.set = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("Equal", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToComp", id);
        self.equal = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("IsOfType", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("TypeToCheck", self.char_types);
        self.is_of_type = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("ToUpper", id, MethodExtent::Final, Visibility::Public);
        self.to_upper = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("ToLower", id, MethodExtent::Final, Visibility::Public);
        self.to_lower = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetOrdinal", card4, MethodExtent::Final, Visibility::Public);
        self.get_ordinal = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetOrdinal", reg.core.void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", card4);
        self.set_ordinal = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("OfsOrdinal", id, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("OfsBy", reg.core.int4);
        self.ofs_ordinal = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FormatTo", reg.core.void, MethodExtent::Override, Visibility::Public);
        m.add_inout_parm("TarStream", reg.core.object);
        self.format_to = reg.core.format_to;
        reg.class_mut(id).add_override(self.format_to, m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Char('\0'));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.set {
            let ch = engine.parm(0)?.as_char()?;
            engine.receiver_mut()?.payload = Payload::Char(ch);
        } else if mid == self.equal {
            let rhs = engine.parm(0)?.as_char()?;
            let lhs = engine.receiver()?.as_char()?;
            engine.set_ret(Payload::Bool(lhs == rhs))?;
        } else if mid == self.is_of_type {
            let which = engine.parm(0)?.as_enum()?;
            let ch = engine.receiver()?.as_char()?;
            let result = match which {
                TYPE_ASCII_ALPHA => ch.is_ascii_alphabetic(),
                TYPE_ALPHA => ch.is_alphabetic(),
                TYPE_ALPHANUM => ch.is_alphanumeric(),
                TYPE_DIGIT => ch.is_ascii_digit(),
                TYPE_HEX_DIGIT => ch.is_ascii_hexdigit(),
                TYPE_WHITESPACE => ch.is_whitespace(),
                TYPE_PUNCT => ch.is_ascii_punctuation(),
                _ => false,
            };
            engine.set_ret(Payload::Bool(result))?;
        } else if mid == self.to_upper {
            let ch = engine.receiver()?.as_char()?;
            let up = ch.to_uppercase().next().unwrap_or(ch);
            engine.receiver_mut()?.payload = Payload::Char(up);
            engine.set_ret(Payload::Char(up))?;
        } else if mid == self.to_lower {
            let ch = engine.receiver()?.as_char()?;
            let low = ch.to_lowercase().next().unwrap_or(ch);
            engine.receiver_mut()?.payload = Payload::Char(low);
            engine.set_ret(Payload::Char(low))?;
        } else if mid == self.get_ordinal {
            let ch = engine.receiver()?.as_char()?;
            engine.set_ret(Payload::Card4(u32::from(ch)))?;
        } else if mid == self.set_ordinal {
            let ord = engine.parm(0)?.as_card4()?;
            let Some(ch) = char::from_u32(ord) else {
                return Err(engine.throw(self.errs, ERR_BAD_ORDINAL, format!("{ord} is not a valid code point")));
            };
            engine.receiver_mut()?.payload = Payload::Char(ch);
        } else if mid == self.ofs_ordinal {
            let ofs = engine.parm(0)?.as_int4()?;
            let ch = engine.receiver()?.as_char()?;
            let shifted = i64::from(u32::from(ch)) + i64::from(ofs);
            let ch = u32::try_from(shifted).ok().and_then(char::from_u32);
            let Some(ch) = ch else {
                return Err(engine.throw(self.errs, ERR_BAD_ORDINAL, "offset leaves the character range"));
            };
            engine.set_ret(Payload::Char(ch))?;
        } else if mid == self.format_to {
            let ch = engine.receiver()?.as_char()?;
            streams::write_to_stream_parm(engine, 0, &ch.to_string())?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}
