//! `MEng.String`: the mutable character sequence at the center of the value
//! vocabulary.
//!
//! Operations are character-indexed. A hard cap of 2^28 characters bounds
//! every growth path, so a runaway program cannot drive allocations
//! unboundedly through string appends.

use crate::{
    class::{ClassExtent, EnumDef, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell, numerics, streams},
    value::{Payload, Value},
};


/// Hard maximum character count for any string value.
pub const MAX_CHARS: usize = 1 << 28;

/// The payload of a `MEng.String` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MengStr {
    text: String,
}

impl MengStr {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Character (not byte) length.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Replaces the contents. Faults on cap overflow — literal and pool
    /// strings come from the compiler, which enforces the cap itself.
    pub fn set_text(&mut self, text: &str) -> RunResult<()> {
        if text.chars().count() > MAX_CHARS {
            return Err(RunError::internal("string literal exceeds the length cap"));
        }
        self.text.clear();
        self.text.push_str(text);
        Ok(())
    }

    /// Appends, reporting whether the cap would be exceeded.
    pub fn try_append(&mut self, text: &str) -> bool {
        if self.char_len() + text.chars().count() > MAX_CHARS {
            return false;
        }
        self.text.push_str(text);
        true
    }

    fn chars(&self) -> Vec<char> {
        self.text.chars().collect()
    }

    fn from_chars(chars: &[char]) -> String {
        chars.iter().collect()
    }
}

impl From<&str> for MengStr {
    fn from(text: &str) -> Self {
        Self { text: text.to_owned() }
    }
}

impl From<String> for MengStr {
    fn from(text: String) -> Self {
        Self { text }
    }
}

/// Error ordinals of `MEng.String.StrErrs`.
const ERR_BAD_INDEX: u32 = 0;
const ERR_BAD_RANGE: u32 = 1;
const ERR_CANT_CONVERT: u32 = 2;
const ERR_TOO_LARGE: u32 = 3;

/// Ordinals of `MEng.String.FindRes`.
const FIND_FOUND: u32 = 0;
const FIND_NOT_FOUND: u32 = 1;

/// Ordinals of `MEng.String.StripModes`.
const STRIP_LEADING: u32 = 0;
const STRIP_TRAILING: u32 = 1;
const STRIP_LEAD_TRAIL: u32 = 2;
const STRIP_MIDDLE: u32 = 3;
const STRIP_TOTAL: u32 = 4;

#[derive(Debug, Default)]
pub struct StringClass {
    errs: ClassId,
    find_res: ClassId,
    strip_modes: ClassId,
    justify_modes: ClassId,
    clear: MethodId,
    is_empty: MethodId,
    get_length: MethodId,
    append: MethodId,
    append_char: MethodId,
    append_bool: MethodId,
    append_card: [MethodId; 4],
    append_int: [MethodId; 3],
    append_float: [MethodId; 2],
    append_enum: MethodId,
    append_fmt: MethodId,
    prepend: MethodId,
    prepend_char: MethodId,
    insert_str_at: MethodId,
    insert_char_at: MethodId,
    cut: MethodId,
    cap_at: MethodId,
    del_last: MethodId,
    get_at: MethodId,
    put_at: MethodId,
    get_last: MethodId,
    to_upper: MethodId,
    to_lower: MethodId,
    comp_nc: MethodId,
    starts_with: MethodId,
    find_first_char: MethodId,
    find_last_char: MethodId,
    find_next_char: MethodId,
    find_sub_str: MethodId,
    find_next_sub_str: MethodId,
    extract_sub_str: MethodId,
    replace_char: MethodId,
    replace_sub_str: MethodId,
    replace_token: MethodId,
    strip_chars: MethodId,
    strip_whitespace: MethodId,
    fmt_to_field: MethodId,
    split: MethodId,
    to_card4: MethodId,
    to_card4r: MethodId,
    to_card4_ex: MethodId,
    to_card8: MethodId,
    to_card8r: MethodId,
    to_int4: MethodId,
    to_int4_ex: MethodId,
    to_float4: MethodId,
    to_float8: MethodId,
    to_float8_ex: MethodId,
    parse_version: MethodId,
    has_ext: MethodId,
    extract_ext: MethodId,
    extract_name_ext: MethodId,
    extract_path: MethodId,
    add_level: MethodId,
    del_trailing_sep: MethodId,
    format_to: MethodId,
}

impl RuntimeClass for StringClass {
    #[expect(clippy::too_many_lines, reason = "one registration per method keeps ids explicit")]
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.String", reg.core.formattable, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let boolean = reg.core.boolean;
        let card4 = reg.core.card4;
        let card8 = reg.core.card8;
        let chr = reg.core.char;
        let void = reg.core.void;
        let object = reg.core.object;
        let radices = reg.core.radices;

        self.errs = reg.register_enum(
            "MEng.String.StrErrs",
            EnumDef::from_pairs(&[
                ("BadIndex", "the index is beyond the string's length"),
                ("BadRange", "the range is beyond the string's length"),
                ("CantConvert", "the text cannot be converted to the target type"),
                ("TooLarge", "the operation would exceed the string length cap"),
            ]),
        )?;
        self.find_res = reg.register_enum(
            "MEng.String.FindRes",
            EnumDef::from_pairs(&[("Found", "found"), ("NotFound", "not found"), ("NoMore", "no more")]),
        )?;
        self.strip_modes = reg.register_enum(
            "MEng.String.StripModes",
            EnumDef::from_pairs(&[
                ("Leading", "leading"),
                ("Trailing", "trailing"),
                ("LeadTrail", "leading and trailing"),
                ("Middle", "middle"),
                ("Total", "total"),
            ]),
        )?;
        self.justify_modes = reg.register_enum(
            "MEng.String.JustifyModes",
            EnumDef::from_pairs(&[("Left", "left"), ("Right", "right"), ("Center", "center")]),
        )?;
        for nested in [self.errs, self.find_res, self.strip_modes, self.justify_modes] {
            reg.class_mut(id).add_nested_type(nested);
        }

        let m = MethodInfo::new("Clear", void, MethodExtent::Final, Visibility::Public);
        self.clear = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("IsEmpty", boolean, MethodExtent::Final, Visibility::Public);
        self.is_empty = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetLength", card4, MethodExtent::Final, Visibility::Public);
        self.get_length = reg.class_mut(id).add_method(m.const_method())?;

        let mut m = MethodInfo::new("Append", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAppend", id);
        self.append = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("AppendChar", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAppend", chr);
        self.append_char = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("AppendBool", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAppend", boolean);
        self.append_bool = reg.class_mut(id).add_method(m)?;
        for (slot, (name, parm_class)) in [
            ("AppendCard1", reg.core.card1),
            ("AppendCard2", reg.core.card2),
            ("AppendCard4", card4),
            ("AppendCard8", card8),
        ]
        .into_iter()
        .enumerate()
        {
            let mut m = MethodInfo::new(name, void, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToAppend", parm_class);
            m.add_in_parm("Radix", radices);
            self.append_card[slot] = reg.class_mut(id).add_method(m)?;
        }
        for (slot, (name, parm_class)) in [
            ("AppendInt1", reg.core.int1),
            ("AppendInt2", reg.core.int2),
            ("AppendInt4", reg.core.int4),
        ]
        .into_iter()
        .enumerate()
        {
            let mut m = MethodInfo::new(name, void, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToAppend", parm_class);
            m.add_in_parm("Radix", radices);
            self.append_int[slot] = reg.class_mut(id).add_method(m)?;
        }
        for (slot, (name, parm_class)) in [("AppendFloat4", reg.core.float4), ("AppendFloat8", reg.core.float8)]
            .into_iter()
            .enumerate()
        {
            let mut m = MethodInfo::new(name, void, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToAppend", parm_class);
            m.add_in_parm("DecDigits", card4);
            self.append_float[slot] = reg.class_mut(id).add_method(m)?;
        }
        let mut m = MethodInfo::new("AppendEnum", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAppend", reg.core.enum_base);
        self.append_enum = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("AppendFmt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAppend", object);
        self.append_fmt = reg.class_mut(id).add_method(m)?;

        let mut m = MethodInfo::new("Prepend", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToPrepend", id);
        self.prepend = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("PrependChar", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToPrepend", chr);
        self.prepend_char = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("InsertStrAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToInsert", id);
        m.add_in_parm("Index", card4);
        self.insert_str_at = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("InsertCharAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToInsert", chr);
        m.add_in_parm("Index", card4);
        self.insert_char_at = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("Cut", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("StartAt", card4);
        m.add_in_parm("Count", card4);
        self.cut = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("CapAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.cap_at = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("DelLast", void, MethodExtent::Final, Visibility::Public);
        self.del_last = reg.class_mut(id).add_method(m)?;

        let mut m = MethodInfo::new("GetAt", chr, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.get_at = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("PutAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        m.add_in_parm("ToPut", chr);
        self.put_at = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetLast", chr, MethodExtent::Final, Visibility::Public);
        self.get_last = reg.class_mut(id).add_method(m.const_method())?;

        let m = MethodInfo::new("ToUpper", void, MethodExtent::Final, Visibility::Public);
        self.to_upper = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("ToLower", void, MethodExtent::Final, Visibility::Public);
        self.to_lower = reg.class_mut(id).add_method(m)?;

        let mut m = MethodInfo::new("CompNC", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToComp", id);
        self.comp_nc = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("StartsWith", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToCheck", id);
        m.add_in_parm("CaseSensitive", boolean);
        self.starts_with = reg.class_mut(id).add_method(m.const_method())?;

        let mut m = MethodInfo::new("FindFirstChar", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", chr);
        m.add_out_parm("Index", card4);
        m.add_in_parm("CaseSensitive", boolean);
        self.find_first_char = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FindLastChar", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", chr);
        m.add_out_parm("Index", card4);
        m.add_in_parm("CaseSensitive", boolean);
        self.find_last_char = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FindNextChar", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", chr);
        m.add_in_parm("StartAt", card4);
        m.add_out_parm("Index", card4);
        m.add_in_parm("CaseSensitive", boolean);
        self.find_next_char = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FindSubStr", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", id);
        m.add_out_parm("Index", card4);
        m.add_in_parm("CaseSensitive", boolean);
        self.find_sub_str = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("FindNextSubStr", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", id);
        m.add_in_parm("StartAt", card4);
        m.add_out_parm("Index", card4);
        m.add_in_parm("CaseSensitive", boolean);
        self.find_next_sub_str = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ExtractSubStr", id, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("StartAt", card4);
        m.add_in_parm("Count", card4);
        self.extract_sub_str = reg.class_mut(id).add_method(m.const_method())?;

        let mut m = MethodInfo::new("ReplaceChar", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", chr);
        m.add_in_parm("ToReplace", chr);
        self.replace_char = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ReplaceSubStr", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFind", id);
        m.add_in_parm("ToReplace", id);
        m.add_in_parm("CaseSensitive", boolean);
        self.replace_sub_str = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ReplaceToken", self.find_res, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Token", chr);
        m.add_in_parm("ToReplace", object);
        self.replace_token = reg.class_mut(id).add_method(m)?;

        let mut m = MethodInfo::new("StripChars", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToStrip", id);
        m.add_in_parm("Mode", self.strip_modes);
        self.strip_chars = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("StripWhitespace", void, MethodExtent::Final, Visibility::Public);
        self.strip_whitespace = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("FmtToField", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToFmt", id);
        m.add_in_parm("Width", card4);
        m.add_in_parm("Justify", self.justify_modes);
        self.fmt_to_field = reg.class_mut(id).add_method(m)?;

        let mut m = MethodInfo::new("Split", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Divider", chr);
        m.add_out_parm("Parts", object);
        self.split = reg.class_mut(id).add_method(m.const_method())?;

        let m = MethodInfo::new("ToCard4", card4, MethodExtent::Final, Visibility::Public);
        self.to_card4 = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ToCard4R", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Radix", radices);
        self.to_card4r = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ToCard4Ex", boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", card4);
        self.to_card4_ex = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("ToCard8", card8, MethodExtent::Final, Visibility::Public);
        self.to_card8 = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ToCard8R", card8, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Radix", radices);
        self.to_card8r = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("ToInt4", reg.core.int4, MethodExtent::Final, Visibility::Public);
        self.to_int4 = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ToInt4Ex", boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", reg.core.int4);
        self.to_int4_ex = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("ToFloat4", reg.core.float4, MethodExtent::Final, Visibility::Public);
        self.to_float4 = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("ToFloat8", reg.core.float8, MethodExtent::Final, Visibility::Public);
        self.to_float8 = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ToFloat8Ex", boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", reg.core.float8);
        self.to_float8_ex = reg.class_mut(id).add_method(m.const_method())?;

        let mut m = MethodInfo::new("ParseVersion", card8, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ThreeVals", boolean);
        self.parse_version = reg.class_mut(id).add_method(m.const_method())?;

        let m = MethodInfo::new("HasExt", boolean, MethodExtent::Final, Visibility::Public);
        self.has_ext = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ExtractExt", boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", id);
        self.extract_ext = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ExtractNameExt", boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", id);
        self.extract_name_ext = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ExtractPath", boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", id);
        self.extract_path = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("AddLevel", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToAdd", id);
        self.add_level = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("DelTrailingSep", void, MethodExtent::Final, Visibility::Public);
        self.del_trailing_sep = reg.class_mut(id).add_method(m)?;

        let mut m = MethodInfo::new("FormatTo", void, MethodExtent::Override, Visibility::Public);
        m.add_inout_parm("TarStream", object);
        self.format_to = reg.core.format_to;
        reg.class_mut(id).add_override(self.format_to, m.const_method())?;

        reg.class_mut(id).add_literal("kMaxChars", card4, Payload::Card4(MAX_CHARS as u32))?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Str(MengStr::default()));
        value.set_const(is_const);
        value
    }

    #[expect(clippy::too_many_lines, reason = "one arm per registered method")]
    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;

        if mid == self.clear {
            recv_str_mut(engine)?.clear();
        } else if mid == self.is_empty {
            let empty = recv_str(engine)?.is_empty();
            engine.set_ret(Payload::Bool(empty))?;
        } else if mid == self.get_length {
            let len = recv_str(engine)?.char_len();
            engine.set_ret(Payload::Card4(len as u32))?;
        } else if mid == self.append {
            let to_append = engine.parm(0)?.as_str()?.as_str().to_owned();
            self.append_text(engine, &to_append)?;
        } else if mid == self.append_char {
            let ch = engine.parm(0)?.as_char()?;
            self.append_text(engine, &ch.to_string())?;
        } else if mid == self.append_bool {
            let v = engine.parm(0)?.as_bool()?;
            self.append_text(engine, if v { "True" } else { "False" })?;
        } else if let Some(slot) = self.append_card.iter().position(|&m| m == mid) {
            let radix = engine.parm(1)?.as_enum()?;
            let wide = match (slot, &engine.parm(0)?.payload) {
                (0, Payload::Card1(v)) => i128::from(*v),
                (1, Payload::Card2(v)) => i128::from(*v),
                (2, Payload::Card4(v)) => i128::from(*v),
                (3, Payload::Card8(v)) => i128::from(*v),
                (_, other) => {
                    return Err(RunError::internal(format!("AppendCard got {}", other.kind_name())));
                }
            };
            self.append_text(engine, &numerics::render_int_radix(wide, radix))?;
        } else if let Some(slot) = self.append_int.iter().position(|&m| m == mid) {
            let radix = engine.parm(1)?.as_enum()?;
            let wide = match (slot, &engine.parm(0)?.payload) {
                (0, Payload::Int1(v)) => i128::from(*v),
                (1, Payload::Int2(v)) => i128::from(*v),
                (2, Payload::Int4(v)) => i128::from(*v),
                (_, other) => {
                    return Err(RunError::internal(format!("AppendInt got {}", other.kind_name())));
                }
            };
            self.append_text(engine, &numerics::render_int_radix(wide, radix))?;
        } else if let Some(slot) = self.append_float.iter().position(|&m| m == mid) {
            let digits = engine.parm(1)?.as_card4()? as usize;
            let v = match (slot, &engine.parm(0)?.payload) {
                (0, Payload::Float4(v)) => f64::from(*v),
                (1, Payload::Float8(v)) => *v,
                (_, other) => {
                    return Err(RunError::internal(format!("AppendFloat got {}", other.kind_name())));
                }
            };
            self.append_text(engine, &format!("{v:.digits$}"))?;
        } else if mid == self.append_enum || mid == self.append_fmt {
            // Intrinsic values format directly; user-defined formattables go
            // through their FormatTo on a string stream.
            let frame = engine.current_parm_target(0)?;
            let text = engine.format_value_text(&frame)?;
            self.append_text(engine, &text)?;
        } else if mid == self.prepend {
            let to_prepend = engine.parm(0)?.as_str()?.as_str().to_owned();
            self.insert_text(engine, &to_prepend, 0)?;
        } else if mid == self.prepend_char {
            let ch = engine.parm(0)?.as_char()?;
            self.insert_text(engine, &ch.to_string(), 0)?;
        } else if mid == self.insert_str_at {
            let to_insert = engine.parm(0)?.as_str()?.as_str().to_owned();
            let index = engine.parm(1)?.as_card4()? as usize;
            self.insert_text(engine, &to_insert, index)?;
        } else if mid == self.insert_char_at {
            let ch = engine.parm(0)?.as_char()?;
            let index = engine.parm(1)?.as_card4()? as usize;
            self.insert_text(engine, &ch.to_string(), index)?;
        } else if mid == self.cut {
            let start = engine.parm(0)?.as_card4()? as usize;
            let count = engine.parm(1)?.as_card4()? as usize;
            let chars = recv_str(engine)?.chars();
            if start > chars.len() || start + count > chars.len() {
                return Err(engine.throw(self.errs, ERR_BAD_RANGE, ""));
            }
            let mut chars = chars;
            chars.drain(start..start + count);
            recv_str_mut(engine)?.text = MengStr::from_chars(&chars);
        } else if mid == self.cap_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let chars = recv_str(engine)?.chars();
            // Capping at the current length is an allowed no-op boundary.
            if index > chars.len() {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            }
            recv_str_mut(engine)?.text = MengStr::from_chars(&chars[..index]);
        } else if mid == self.del_last {
            let mut chars = recv_str(engine)?.chars();
            chars.pop();
            recv_str_mut(engine)?.text = MengStr::from_chars(&chars);
        } else if mid == self.get_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let chars = recv_str(engine)?.chars();
            let Some(&ch) = chars.get(index) else {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            };
            engine.set_ret(Payload::Char(ch))?;
        } else if mid == self.put_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let ch = engine.parm(1)?.as_char()?;
            let mut chars = recv_str(engine)?.chars();
            if index >= chars.len() {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            }
            chars[index] = ch;
            recv_str_mut(engine)?.text = MengStr::from_chars(&chars);
        } else if mid == self.get_last {
            let chars = recv_str(engine)?.chars();
            let Some(&ch) = chars.last() else {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, "the string is empty"));
            };
            engine.set_ret(Payload::Char(ch))?;
        } else if mid == self.to_upper {
            let upper = recv_str(engine)?.as_str().to_uppercase();
            recv_str_mut(engine)?.text = upper;
        } else if mid == self.to_lower {
            let lower = recv_str(engine)?.as_str().to_lowercase();
            recv_str_mut(engine)?.text = lower;
        } else if mid == self.comp_nc {
            let rhs = engine.parm(0)?.as_str()?.as_str().to_owned();
            let lhs = recv_str(engine)?;
            engine.set_ret(Payload::Bool(eq_no_case(lhs.as_str(), &rhs)))?;
        } else if mid == self.starts_with {
            let prefix = engine.parm(0)?.as_str()?.as_str().to_owned();
            let case_sensitive = engine.parm(1)?.as_bool()?;
            let lhs = recv_str(engine)?;
            let result = if case_sensitive {
                lhs.as_str().starts_with(&prefix)
            } else {
                let head: String = lhs.as_str().chars().take(prefix.chars().count()).collect();
                eq_no_case(&head, &prefix)
            };
            engine.set_ret(Payload::Bool(result))?;
        } else if mid == self.find_first_char || mid == self.find_last_char || mid == self.find_next_char {
            self.do_find_char(engine, mid)?;
        } else if mid == self.find_sub_str || mid == self.find_next_sub_str {
            self.do_find_sub_str(engine, mid)?;
        } else if mid == self.extract_sub_str {
            let start = engine.parm(0)?.as_card4()? as usize;
            let count = engine.parm(1)?.as_card4()? as usize;
            let chars = recv_str(engine)?.chars();
            if start > chars.len() || start + count > chars.len() {
                return Err(engine.throw(self.errs, ERR_BAD_RANGE, ""));
            }
            let out = MengStr::from_chars(&chars[start..start + count]);
            engine.set_ret(Payload::Str(out.as_str().into()))?;
        } else if mid == self.replace_char {
            let from = engine.parm(0)?.as_char()?;
            let to = engine.parm(1)?.as_char()?;
            let replaced = recv_str(engine)?.as_str().replace(from, &to.to_string());
            recv_str_mut(engine)?.text = replaced;
        } else if mid == self.replace_sub_str {
            let find = engine.parm(0)?.as_str()?.as_str().to_owned();
            let with = engine.parm(1)?.as_str()?.as_str().to_owned();
            let case_sensitive = engine.parm(2)?.as_bool()?;
            if find.is_empty() {
                return Err(engine.throw(self.errs, ERR_BAD_RANGE, "the search string is empty"));
            }
            let text = recv_str(engine)?.as_str().to_owned();
            let (replaced, any) = replace_all(&text, &find, &with, case_sensitive);
            recv_str_mut(engine)?.text = replaced;
            engine.set_ret(Payload::Bool(any))?;
        } else if mid == self.replace_token {
            let token = engine.parm(0)?.as_char()?;
            let parm = engine.current_parm_target(1)?;
            let with = engine.format_value_text(&parm)?;
            let text = recv_str(engine)?.as_str().to_owned();
            let pattern = format!("%({token})");
            let result = if text.contains(&pattern) {
                recv_str_mut(engine)?.text = text.replacen(&pattern, &with, 1);
                FIND_FOUND
            } else {
                FIND_NOT_FOUND
            };
            engine.set_ret(Payload::Enum(result))?;
        } else if mid == self.strip_chars {
            let to_strip: Vec<char> = engine.parm(0)?.as_str()?.as_str().chars().collect();
            let mode = engine.parm(1)?.as_enum()?;
            let text = recv_str(engine)?.as_str().to_owned();
            recv_str_mut(engine)?.text = strip(&text, &to_strip, mode);
        } else if mid == self.strip_whitespace {
            let text = recv_str(engine)?.as_str().to_owned();
            recv_str_mut(engine)?.text = strip(&text, &[' ', '\t', '\r', '\n'], STRIP_LEAD_TRAIL);
        } else if mid == self.fmt_to_field {
            let to_fmt = engine.parm(0)?.as_str()?.as_str().to_owned();
            let width = engine.parm(1)?.as_card4()? as usize;
            let justify = engine.parm(2)?.as_enum()?;
            self.append_text(engine, &justify_field(&to_fmt, width, justify))?;
        } else if mid == self.split {
            let divider = engine.parm(0)?.as_char()?;
            let text = recv_str(engine)?.as_str().to_owned();
            let parts: Vec<String> = text.split(divider).map(str::to_owned).collect();
            let count = parts.len() as u32;
            {
                let out = engine.parm_mut(1)?;
                match &mut out.payload {
                    Payload::StrList(list) => list.replace_all(parts),
                    other => {
                        return Err(RunError::internal(format!("Split target is {}", other.kind_name())));
                    }
                }
            }
            engine.set_ret(Payload::Card4(count))?;
        } else if mid == self.to_card4 || mid == self.to_card4r || mid == self.to_card4_ex {
            let radix = if mid == self.to_card4r {
                engine.parm(0)?.as_enum()?
            } else {
                numerics::RADIX_DEC
            };
            let parsed = parse_int(recv_str(engine)?.as_str(), radix);
            let in_range = parsed.filter(|v| (0..=i128::from(u32::MAX)).contains(v));
            if mid == self.to_card4_ex {
                if let Some(v) = in_range {
                    engine.parm_mut(0)?.payload = Payload::Card4(v as u32);
                }
                engine.set_ret(Payload::Bool(in_range.is_some()))?;
            } else {
                let Some(v) = in_range else {
                    return Err(self.conv_err(engine, parsed.is_some()));
                };
                engine.set_ret(Payload::Card4(v as u32))?;
            }
        } else if mid == self.to_card8 || mid == self.to_card8r {
            let radix = if mid == self.to_card8r {
                engine.parm(0)?.as_enum()?
            } else {
                numerics::RADIX_DEC
            };
            let parsed = parse_int(recv_str(engine)?.as_str(), radix);
            let in_range = parsed.filter(|v| (0..=i128::from(u64::MAX)).contains(v));
            let Some(v) = in_range else {
                return Err(self.conv_err(engine, parsed.is_some()));
            };
            engine.set_ret(Payload::Card8(v as u64))?;
        } else if mid == self.to_int4 || mid == self.to_int4_ex {
            let parsed = parse_int(recv_str(engine)?.as_str(), numerics::RADIX_DEC);
            let in_range = parsed.filter(|v| (i128::from(i32::MIN)..=i128::from(i32::MAX)).contains(v));
            if mid == self.to_int4_ex {
                if let Some(v) = in_range {
                    engine.parm_mut(0)?.payload = Payload::Int4(v as i32);
                }
                engine.set_ret(Payload::Bool(in_range.is_some()))?;
            } else {
                let Some(v) = in_range else {
                    return Err(self.conv_err(engine, parsed.is_some()));
                };
                engine.set_ret(Payload::Int4(v as i32))?;
            }
        } else if mid == self.to_float4 || mid == self.to_float8 || mid == self.to_float8_ex {
            let parsed: Option<f64> = recv_str(engine)?.as_str().trim().parse().ok();
            if mid == self.to_float8_ex {
                if let Some(v) = parsed {
                    engine.parm_mut(0)?.payload = Payload::Float8(v);
                }
                engine.set_ret(Payload::Bool(parsed.is_some()))?;
            } else {
                let Some(v) = parsed else {
                    return Err(engine.throw(self.errs, ERR_CANT_CONVERT, ""));
                };
                if mid == self.to_float4 {
                    engine.set_ret(Payload::Float4(v as f32))?;
                } else {
                    engine.set_ret(Payload::Float8(v))?;
                }
            }
        } else if mid == self.parse_version {
            let three_vals = engine.parm(0)?.as_bool()?;
            let text = recv_str(engine)?.as_str().to_owned();
            let Some(packed) = parse_version(&text, three_vals) else {
                return Err(engine.throw(self.errs, ERR_CANT_CONVERT, format!("'{text}' is not a version")));
            };
            engine.set_ret(Payload::Card8(packed))?;
        } else if mid == self.has_ext {
            let has = path_ext(recv_str(engine)?.as_str()).is_some();
            engine.set_ret(Payload::Bool(has))?;
        } else if mid == self.extract_ext || mid == self.extract_name_ext || mid == self.extract_path {
            let text = recv_str(engine)?.as_str().to_owned();
            let part = if mid == self.extract_ext {
                path_ext(&text).map(str::to_owned)
            } else if mid == self.extract_name_ext {
                path_name_ext(&text).map(str::to_owned)
            } else {
                path_dir(&text).map(str::to_owned)
            };
            if let Some(part) = &part {
                engine.parm_mut(0)?.payload = Payload::Str(part.as_str().into());
            }
            engine.set_ret(Payload::Bool(part.is_some()))?;
        } else if mid == self.add_level {
            let level = engine.parm(0)?.as_str()?.as_str().to_owned();
            let s = recv_str_mut(engine)?;
            if !s.text.ends_with('/') && !level.starts_with('/') {
                s.text.push('/');
            }
            s.text.push_str(level.strip_prefix('/').unwrap_or(&level));
        } else if mid == self.del_trailing_sep {
            let s = recv_str_mut(engine)?;
            while s.text.len() > 1 && s.text.ends_with('/') {
                s.text.pop();
            }
        } else if mid == self.format_to {
            let text = recv_str(engine)?.as_str().to_owned();
            streams::write_to_stream_parm(engine, 0, &text)?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

impl StringClass {
    fn append_text(&self, engine: &mut MacroEngine, text: &str) -> RunResult<()> {
        if recv_str_mut(engine)?.try_append(text) {
            Ok(())
        } else {
            Err(engine.throw(self.errs, ERR_TOO_LARGE, ""))
        }
    }

    fn insert_text(&self, engine: &mut MacroEngine, text: &str, index: usize) -> RunResult<()> {
        let chars = recv_str(engine)?.chars();
        if index > chars.len() {
            return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
        }
        if chars.len() + text.chars().count() > MAX_CHARS {
            return Err(engine.throw(self.errs, ERR_TOO_LARGE, ""));
        }
        let mut out = String::new();
        out.extend(chars[..index].iter());
        out.push_str(text);
        out.extend(chars[index..].iter());
        recv_str_mut(engine)?.text = out;
        Ok(())
    }

    fn conv_err(&self, engine: &mut MacroEngine, parsed: bool) -> RunError {
        if parsed {
            engine.throw(self.errs, ERR_TOO_LARGE, "the value is out of range for the target type")
        } else {
            engine.throw(self.errs, ERR_CANT_CONVERT, "")
        }
    }

    fn do_find_char(&self, engine: &mut MacroEngine, mid: MethodId) -> RunResult<()> {
        let to_find = engine.parm(0)?.as_char()?;
        let (start, out_parm, case_parm) = if mid == self.find_next_char {
            (engine.parm(1)?.as_card4()? as usize, 2, 3)
        } else {
            (0, 1, 2)
        };
        let case_sensitive = engine.parm(case_parm)?.as_bool()?;
        let chars = recv_str(engine)?.chars();
        let matches = |ch: char| {
            if case_sensitive {
                ch == to_find
            } else {
                ch.to_lowercase().eq(to_find.to_lowercase())
            }
        };
        let found = if mid == self.find_last_char {
            chars.iter().rposition(|&ch| matches(ch))
        } else {
            chars.iter().skip(start).position(|&ch| matches(ch)).map(|p| p + start)
        };
        if let Some(index) = found {
            engine.parm_mut(out_parm)?.payload = Payload::Card4(index as u32);
        }
        engine.set_ret(Payload::Bool(found.is_some()))?;
        Ok(())
    }

    fn do_find_sub_str(&self, engine: &mut MacroEngine, mid: MethodId) -> RunResult<()> {
        let to_find = engine.parm(0)?.as_str()?.as_str().to_owned();
        let (start, out_parm, case_parm) = if mid == self.find_next_sub_str {
            (engine.parm(1)?.as_card4()? as usize, 2, 3)
        } else {
            (0, 1, 2)
        };
        let case_sensitive = engine.parm(case_parm)?.as_bool()?;
        let text = recv_str(engine)?.as_str().to_owned();
        let found = find_sub(&text, &to_find, start, case_sensitive);
        if let Some(index) = found {
            engine.parm_mut(out_parm)?.payload = Payload::Card4(index as u32);
        }
        engine.set_ret(Payload::Bool(found.is_some()))?;
        Ok(())
    }
}

fn recv_str(engine: &MacroEngine) -> RunResult<&MengStr> {
    engine.receiver()?.as_str()
}

fn recv_str_mut(engine: &mut MacroEngine) -> RunResult<&mut MengStr> {
    engine.receiver_mut()?.as_str_mut()
}

/// Case-insensitive equality by simple per-scalar case folding. No Unicode
/// normalization happens first; differently normalized strings compare
/// unequal.
fn eq_no_case(a: &str, b: &str) -> bool {
    let mut ia = a.chars().flat_map(char::to_lowercase);
    let mut ib = b.chars().flat_map(char::to_lowercase);
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
}

/// Finds `needle` in `haystack` starting at a character index, returning the
/// character index of the match.
fn find_sub(haystack: &str, needle: &str, start: usize, case_sensitive: bool) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let hay: Vec<char> = haystack.chars().collect();
    let ndl: Vec<char> = needle.chars().collect();
    if start + ndl.len() > hay.len() {
        return None;
    }
    'outer: for at in start..=hay.len() - ndl.len() {
        for (offset, &want) in ndl.iter().enumerate() {
            let got = hay[at + offset];
            let hit = if case_sensitive {
                got == want
            } else {
                got.to_lowercase().eq(want.to_lowercase())
            };
            if !hit {
                continue 'outer;
            }
        }
        return Some(at);
    }
    None
}

fn replace_all(text: &str, find: &str, with: &str, case_sensitive: bool) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut any = false;
    let mut at = 0;
    let chars: Vec<char> = text.chars().collect();
    let find_len = find.chars().count();
    while at < chars.len() {
        if let Some(hit) = find_sub(&chars[at..].iter().collect::<String>(), find, 0, case_sensitive) {
            out.extend(chars[at..at + hit].iter());
            out.push_str(with);
            at += hit + find_len;
            any = true;
        } else {
            out.extend(chars[at..].iter());
            break;
        }
    }
    (out, any)
}

/// Strips characters from a string per the given mode ordinal.
fn strip(text: &str, set: &[char], mode: u32) -> String {
    let in_set = |ch: char| set.contains(&ch);
    match mode {
        STRIP_LEADING => text.trim_start_matches(in_set).to_owned(),
        STRIP_TRAILING => text.trim_end_matches(in_set).to_owned(),
        STRIP_LEAD_TRAIL => text.trim_start_matches(in_set).trim_end_matches(in_set).to_owned(),
        STRIP_MIDDLE => {
            // Collapse interior runs of set characters to a single one;
            // leading and trailing runs are untouched.
            let trimmed_start = text.len() - text.trim_start_matches(in_set).len();
            let trimmed_end = text.trim_end_matches(in_set).len();
            let mut out: String = text[..trimmed_start].to_owned();
            let mut last_was_set = false;
            for ch in text[trimmed_start..trimmed_end].chars() {
                if in_set(ch) {
                    if !last_was_set {
                        out.push(ch);
                    }
                    last_was_set = true;
                } else {
                    out.push(ch);
                    last_was_set = false;
                }
            }
            out.push_str(&text[trimmed_end..]);
            out
        }
        STRIP_TOTAL => text.chars().filter(|&ch| !in_set(ch)).collect(),
        _ => text.to_owned(),
    }
}

/// Ordinals of `MEng.String.JustifyModes`. Left is ordinal zero and the
/// fallback.
const JUSTIFY_RIGHT: u32 = 1;
const JUSTIFY_CENTER: u32 = 2;

/// Pads text into a field of the given character width. Text wider than the
/// field is used as-is.
fn justify_field(text: &str, width: usize, justify: u32) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_owned();
    }
    let pad = width - len;
    match justify {
        JUSTIFY_RIGHT => format!("{}{text}", " ".repeat(pad)),
        JUSTIFY_CENTER => {
            let left = pad / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(pad - left))
        }
        _ => format!("{text}{}", " ".repeat(pad)),
    }
}

/// Parses an integer in a `MEng.Radices` radix, allowing a sign in decimal.
fn parse_int(text: &str, radix: u32) -> Option<i128> {
    let text = text.trim();
    let base = match radix {
        numerics::RADIX_BIN => 2,
        numerics::RADIX_OCT => 8,
        numerics::RADIX_HEX => 16,
        _ => 10,
    };
    let text = if base == 16 {
        text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text)
    } else {
        text
    };
    i128::from_str_radix(text, base).ok()
}

/// Parses `maj.min.rev` (or `maj.min` when `three_vals` is false) into
/// packed 16-bit fields of a Card8. A component count mismatch fails the
/// parse rather than yielding zero.
fn parse_version(text: &str, three_vals: bool) -> Option<u64> {
    let parts: Vec<&str> = text.trim().split('.').collect();
    let wanted = if three_vals { 3 } else { 2 };
    if parts.len() != wanted {
        return None;
    }
    let mut fields = [0_u64; 3];
    for (slot, part) in parts.iter().enumerate() {
        fields[slot] = part.parse::<u16>().ok()?.into();
    }
    Some((fields[0] << 32) | (fields[1] << 16) | fields[2])
}

fn path_ext(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(&name[dot + 1..])
}

fn path_name_ext(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    if name.is_empty() { None } else { Some(name) }
}

fn path_dir(path: &str) -> Option<&str> {
    let cut = path.rfind('/')?;
    if cut == 0 { Some("/") } else { Some(&path[..cut]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_patterns_replace_once() {
        let (out, any) = replace_all("x=%(1), y=%(2)", "%(1)", "7", true);
        assert!(any);
        assert_eq!(out, "x=7, y=%(2)");
    }

    #[test]
    fn case_insensitive_find() {
        assert_eq!(find_sub("Hello World", "world", 0, false), Some(6));
        assert_eq!(find_sub("Hello World", "world", 0, true), None);
        assert_eq!(find_sub("aaa", "a", 1, true), Some(1));
    }

    #[test]
    fn strip_modes() {
        assert_eq!(strip("..a.b..", &['.'], STRIP_LEADING), "a.b..");
        assert_eq!(strip("..a.b..", &['.'], STRIP_TRAILING), "..a.b");
        assert_eq!(strip("..a.b..", &['.'], STRIP_LEAD_TRAIL), "a.b");
        assert_eq!(strip("..a..b..", &['.'], STRIP_MIDDLE), "..a.b..");
        assert_eq!(strip("..a.b..", &['.'], STRIP_TOTAL), "ab");
    }

    #[test]
    fn version_parsing_packs_fields() {
        assert_eq!(parse_version("2.1.7", true), Some((2 << 32) | (1 << 16) | 7));
        assert_eq!(parse_version("2.1", false), Some((2_u64 << 32) | (1 << 16)));
        // A fourth component fails under the three-value flag.
        assert_eq!(parse_version("2.1.7.9", true), None);
        assert_eq!(parse_version("2.x.7", true), None);
    }

    #[test]
    fn path_helpers() {
        assert_eq!(path_ext("/a/b/file.txt"), Some("txt"));
        assert_eq!(path_ext("/a/b/file."), None);
        assert_eq!(path_ext("/a/b/.hidden"), None);
        assert_eq!(path_name_ext("/a/b/file.txt"), Some("file.txt"));
        assert_eq!(path_dir("/a/b/file.txt"), Some("/a/b"));
        assert_eq!(path_dir("/file"), Some("/"));
    }

    #[test]
    fn radix_parsing() {
        assert_eq!(parse_int("0xFF", numerics::RADIX_HEX), Some(255));
        assert_eq!(parse_int("FF", numerics::RADIX_HEX), Some(255));
        assert_eq!(parse_int("101", numerics::RADIX_BIN), Some(5));
        assert_eq!(parse_int("-42", numerics::RADIX_DEC), Some(-42));
        assert_eq!(parse_int("4 2", numerics::RADIX_DEC), None);
    }

    #[test]
    fn cap_is_enforced_on_append() {
        let mut s = MengStr::from("abc");
        assert!(s.try_append("def"));
        assert_eq!(s.as_str(), "abcdef");
    }

    #[test]
    fn field_justification() {
        assert_eq!(justify_field("ab", 5, 0), "ab   ");
        assert_eq!(justify_field("ab", 5, JUSTIFY_RIGHT), "   ab");
        assert_eq!(justify_field("ab", 5, JUSTIFY_CENTER), " ab  ");
        assert_eq!(justify_field("toolong", 3, 0), "toolong");
    }
}
