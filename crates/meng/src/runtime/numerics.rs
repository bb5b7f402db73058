//! The numeric intrinsics: `MEng.Card1/2/4/8`, `MEng.Int1/2/4`, and
//! `MEng.Float4/8`.
//!
//! One handler serves all nine classes, parameterized by [`NumKind`].
//! Integer arithmetic wraps two's-complement style at the type's width;
//! `Inc`/`Dec` saturate at the limits instead of wrapping; integer division
//! by zero raises the engine's `DivByZero` error and leaves the destination
//! unchanged. Floats follow IEEE-754 throughout.

use strum::Display;

use crate::{
    class::{ClassExtent, MethodExtent, MethodInfo, Visibility},
    engine::{MacroEngine, format_float},
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell, streams},
    value::{Payload, Value},
};

/// Which numeric class a handler instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NumKind {
    Card1,
    Card2,
    Card4,
    Card8,
    Int1,
    Int2,
    Int4,
    Float4,
    Float8,
}

impl NumKind {
    fn class_path(self) -> &'static str {
        match self {
            Self::Card1 => "MEng.Card1",
            Self::Card2 => "MEng.Card2",
            Self::Card4 => "MEng.Card4",
            Self::Card8 => "MEng.Card8",
            Self::Int1 => "MEng.Int1",
            Self::Int2 => "MEng.Int2",
            Self::Int4 => "MEng.Int4",
            Self::Float4 => "MEng.Float4",
            Self::Float8 => "MEng.Float8",
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Self::Float4 | Self::Float8)
    }

    fn is_signed(self) -> bool {
        matches!(self, Self::Int1 | Self::Int2 | Self::Int4) || self.is_float()
    }

    fn min_int(self) -> i128 {
        match self {
            Self::Card1 | Self::Card2 | Self::Card4 | Self::Card8 => 0,
            Self::Int1 => i128::from(i8::MIN),
            Self::Int2 => i128::from(i16::MIN),
            Self::Int4 => i128::from(i32::MIN),
            Self::Float4 | Self::Float8 => 0,
        }
    }

    fn max_int(self) -> i128 {
        match self {
            Self::Card1 => i128::from(u8::MAX),
            Self::Card2 => i128::from(u16::MAX),
            Self::Card4 => i128::from(u32::MAX),
            Self::Card8 => i128::from(u64::MAX),
            Self::Int1 => i128::from(i8::MAX),
            Self::Int2 => i128::from(i16::MAX),
            Self::Int4 => i128::from(i32::MAX),
            Self::Float4 | Self::Float8 => 0,
        }
    }

    fn zero(self) -> Payload {
        self.wrap(0)
    }

    fn min_payload(self) -> Payload {
        match self {
            Self::Float4 => Payload::Float4(f32::MIN),
            Self::Float8 => Payload::Float8(f64::MIN),
            _ => self.wrap(self.min_int()),
        }
    }

    fn max_payload(self) -> Payload {
        match self {
            Self::Float4 => Payload::Float4(f32::MAX),
            Self::Float8 => Payload::Float8(f64::MAX),
            _ => self.wrap(self.max_int()),
        }
    }

    /// Narrows a wide integer into this kind's payload, two's-complement
    /// truncating.
    fn wrap(self, wide: i128) -> Payload {
        match self {
            Self::Card1 => Payload::Card1(wide as u8),
            Self::Card2 => Payload::Card2(wide as u16),
            Self::Card4 => Payload::Card4(wide as u32),
            Self::Card8 => Payload::Card8(wide as u64),
            Self::Int1 => Payload::Int1(wide as i8),
            Self::Int2 => Payload::Int2(wide as i16),
            Self::Int4 => Payload::Int4(wide as i32),
            Self::Float4 => Payload::Float4(wide as f32),
            Self::Float8 => Payload::Float8(wide as f64),
        }
    }

    fn float_payload(self, v: f64) -> Payload {
        match self {
            Self::Float4 => Payload::Float4(v as f32),
            _ => Payload::Float8(v),
        }
    }
}

/// The widened form arithmetic runs in.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
}

fn read_num(value: &Value) -> RunResult<Num> {
    match &value.payload {
        Payload::Card1(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Card2(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Card4(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Card8(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Int1(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Int2(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Int4(v) => Ok(Num::Int(i128::from(*v))),
        Payload::Float4(v) => Ok(Num::Float(f64::from(*v))),
        Payload::Float8(v) => Ok(Num::Float(*v)),
        other => Err(RunError::internal(format!("numeric method on {}", other.kind_name()))),
    }
}

/// The arithmetic operations that share a dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    ModDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Equal,
    LsThan,
    LsThanEq,
    GtThan,
    GtThanEq,
}

#[derive(Debug)]
struct MethodIds {
    set: MethodId,
    arith: [MethodId; 5],
    arith_eq: [MethodId; 5],
    compare: [MethodId; 5],
    inc: MethodId,
    dec: MethodId,
    abs_value: MethodId,
    negate: MethodId,
    min_val: MethodId,
    max_val: MethodId,
    format_to: MethodId,
    dbg_format: MethodId,
}

impl Default for MethodIds {
    fn default() -> Self {
        Self {
            set: MethodId::BAD,
            arith: [MethodId::BAD; 5],
            arith_eq: [MethodId::BAD; 5],
            compare: [MethodId::BAD; 5],
            inc: MethodId::BAD,
            dec: MethodId::BAD,
            abs_value: MethodId::BAD,
            negate: MethodId::BAD,
            min_val: MethodId::BAD,
            max_val: MethodId::BAD,
            format_to: MethodId::BAD,
            dbg_format: MethodId::BAD,
        }
    }
}

pub struct NumericClass {
    kind: NumKind,
    ids: MethodIds,
}

impl NumericClass {
    #[must_use]
    pub fn new(kind: NumKind) -> Self {
        Self {
            kind,
            ids: MethodIds::default(),
        }
    }
}

const ARITH_NAMES: [&str; 5] = ["Add", "Sub", "Mul", "Div", "ModDiv"];
const ARITH_EQ_NAMES: [&str; 5] = ["PlusEq", "MinusEq", "TimesEq", "DivEq", "ModDivEq"];
const COMPARE_NAMES: [&str; 5] = ["Equal", "LsThan", "LsThanEq", "GtThan", "GtThanEq"];

impl RuntimeClass for NumericClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let kind = self.kind;
        let cls = class_shell(kind.class_path(), reg.core.formattable, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let boolean = reg.core.boolean;
        let void = reg.core.void;

        let mut m = MethodInfo::new("Set", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", id);
        self.ids.set = reg.class_mut(id).add_method(m)?;

        for (slot, name) in ARITH_NAMES.iter().enumerate() {
            let mut m = MethodInfo::new(*name, id, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToUse", id);
            self.ids.arith[slot] = reg.class_mut(id).add_method(m.const_method())?;
        }
        for (slot, name) in ARITH_EQ_NAMES.iter().enumerate() {
            let mut m = MethodInfo::new(*name, void, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToUse", id);
            self.ids.arith_eq[slot] = reg.class_mut(id).add_method(m)?;
        }
        for (slot, name) in COMPARE_NAMES.iter().enumerate() {
            let mut m = MethodInfo::new(*name, boolean, MethodExtent::Final, Visibility::Public);
            m.add_in_parm("ToComp", id);
            self.ids.compare[slot] = reg.class_mut(id).add_method(m.const_method())?;
        }

        let m = MethodInfo::new("Inc", id, MethodExtent::Final, Visibility::Public);
        self.ids.inc = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("Dec", id, MethodExtent::Final, Visibility::Public);
        self.ids.dec = reg.class_mut(id).add_method(m)?;

        // AbsValue returns the matching unsigned width for signed integers.
        let abs_ret = match kind {
            NumKind::Int1 => reg.core.card1,
            NumKind::Int2 => reg.core.card2,
            NumKind::Int4 => reg.core.card4,
            _ => id,
        };
        let m = MethodInfo::new("AbsValue", abs_ret, MethodExtent::Final, Visibility::Public);
        self.ids.abs_value = reg.class_mut(id).add_method(m.const_method())?;

        if kind.is_signed() {
            let m = MethodInfo::new("Negate", id, MethodExtent::Final, Visibility::Public);
            self.ids.negate = reg.class_mut(id).add_method(m)?;
        }

        let mut m = MethodInfo::new("MinVal", id, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToComp", id);
        self.ids.min_val = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("MaxVal", id, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToComp", id);
        self.ids.max_val = reg.class_mut(id).add_method(m.const_method())?;

        let mut m = MethodInfo::new("FormatTo", void, MethodExtent::Override, Visibility::Public);
        m.add_inout_parm("TarStream", reg.core.object);
        self.ids.format_to = reg.core.format_to;
        reg.class_mut(id).add_override(self.ids.format_to, m.const_method())?;

        let dbg_id = reg
            .class(reg.core.formattable)
            .method_by_name("DbgFormat")
            .map(crate::class::MethodInfo::id)
            .unwrap_or(MethodId::BAD);
        let mut m = MethodInfo::new("DbgFormat", void, MethodExtent::Override, Visibility::Public);
        m.add_inout_parm("TarStream", reg.core.object);
        m.add_in_parm("Radix", reg.core.radices);
        m.add_in_parm("Verbose", boolean);
        self.ids.dbg_format = dbg_id;
        reg.class_mut(id).add_override(dbg_id, m.const_method())?;

        reg.class_mut(id).add_literal("kMinValue", id, kind.min_payload())?;
        reg.class_mut(id).add_literal("kMaxValue", id, kind.max_payload())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, self.kind.zero());
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let kind = self.kind;
        let ids = &self.ids;
        let mid = call.method_id;

        if mid == ids.set {
            let src = read_num(engine.parm(0)?)?;
            engine.receiver_mut()?.payload = num_payload(kind, src);
            return Ok(NativeResult::Handled);
        }

        for (slot, op) in [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div, ArithOp::ModDiv]
            .into_iter()
            .enumerate()
        {
            if mid == ids.arith[slot] || mid == ids.arith_eq[slot] {
                let rhs = read_num(engine.parm(0)?)?;
                let lhs = read_num(engine.receiver()?)?;
                let result = apply_arith(engine, kind, op, lhs, rhs)?;
                if mid == ids.arith[slot] {
                    engine.set_ret(result)?;
                } else {
                    engine.receiver_mut()?.payload = result;
                }
                return Ok(NativeResult::Handled);
            }
        }

        for (slot, op) in [
            CompareOp::Equal,
            CompareOp::LsThan,
            CompareOp::LsThanEq,
            CompareOp::GtThan,
            CompareOp::GtThanEq,
        ]
        .into_iter()
        .enumerate()
        {
            if mid == ids.compare[slot] {
                let rhs = read_num(engine.parm(0)?)?;
                let lhs = read_num(engine.receiver()?)?;
                engine.set_ret(Payload::Bool(apply_compare(op, lhs, rhs)))?;
                return Ok(NativeResult::Handled);
            }
        }

        if mid == ids.inc || mid == ids.dec {
            let lhs = read_num(engine.receiver()?)?;
            let result = match lhs {
                // Saturate at the limits rather than wrapping.
                Num::Int(v) => {
                    let next = if mid == ids.inc {
                        (v + 1).min(kind.max_int())
                    } else {
                        (v - 1).max(kind.min_int())
                    };
                    kind.wrap(next)
                }
                Num::Float(v) => kind.float_payload(if mid == ids.inc { v + 1.0 } else { v - 1.0 }),
            };
            let ret = result.try_clone().expect("numeric payloads are copyable");
            engine.receiver_mut()?.payload = result;
            engine.set_ret(ret)?;
            return Ok(NativeResult::Handled);
        }

        if mid == ids.abs_value {
            let lhs = read_num(engine.receiver()?)?;
            let result = match (kind, lhs) {
                (NumKind::Int1, Num::Int(v)) => Payload::Card1(v.unsigned_abs() as u8),
                (NumKind::Int2, Num::Int(v)) => Payload::Card2(v.unsigned_abs() as u16),
                (NumKind::Int4, Num::Int(v)) => Payload::Card4(v.unsigned_abs() as u32),
                (_, Num::Int(v)) => kind.wrap(v),
                (_, Num::Float(v)) => kind.float_payload(v.abs()),
            };
            engine.set_ret(result)?;
            return Ok(NativeResult::Handled);
        }

        if kind.is_signed() && mid == ids.negate {
            let lhs = read_num(engine.receiver()?)?;
            let result = match lhs {
                Num::Int(v) => kind.wrap(-v),
                Num::Float(v) => kind.float_payload(-v),
            };
            let ret = result.try_clone().expect("numeric payloads are copyable");
            engine.receiver_mut()?.payload = result;
            engine.set_ret(ret)?;
            return Ok(NativeResult::Handled);
        }

        if mid == ids.min_val || mid == ids.max_val {
            let rhs = read_num(engine.parm(0)?)?;
            let lhs = read_num(engine.receiver()?)?;
            let take_lhs = if mid == ids.min_val {
                apply_compare(CompareOp::LsThanEq, lhs, rhs)
            } else {
                apply_compare(CompareOp::GtThanEq, lhs, rhs)
            };
            engine.set_ret(num_payload(kind, if take_lhs { lhs } else { rhs }))?;
            return Ok(NativeResult::Handled);
        }

        if mid == ids.format_to {
            let text = render(read_num(engine.receiver()?)?, RADIX_DEC);
            streams::write_to_stream_parm(engine, 0, &text)?;
            return Ok(NativeResult::Handled);
        }

        if mid == ids.dbg_format {
            let radix = engine.parm(1)?.as_enum()?;
            let text = render(read_num(engine.receiver()?)?, radix);
            streams::write_to_stream_parm(engine, 0, &text)?;
            return Ok(NativeResult::Handled);
        }

        Ok(NativeResult::Unhandled)
    }
}

/// Ordinals of `MEng.Radices`.
pub(crate) const RADIX_BIN: u32 = 0;
pub(crate) const RADIX_OCT: u32 = 1;
pub(crate) const RADIX_DEC: u32 = 2;
pub(crate) const RADIX_HEX: u32 = 3;

/// Renders an integer in a `MEng.Radices` radix. Shared with the string
/// class's numeric append methods.
pub(crate) fn render_int_radix(v: i128, radix: u32) -> String {
    let negative = v < 0;
    let magnitude = v.unsigned_abs();
    let digits = match radix {
        RADIX_BIN => format!("{magnitude:b}"),
        RADIX_OCT => format!("{magnitude:o}"),
        RADIX_HEX => format!("0x{magnitude:X}"),
        _ => format!("{magnitude}"),
    };
    if negative { format!("-{digits}") } else { digits }
}

fn num_payload(kind: NumKind, num: Num) -> Payload {
    match num {
        Num::Int(v) => kind.wrap(v),
        Num::Float(v) => kind.float_payload(v),
    }
}

fn apply_arith(engine: &mut MacroEngine, kind: NumKind, op: ArithOp, lhs: Num, rhs: Num) -> RunResult<Payload> {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => {
            // Wrapping ops: Card8 products can exceed even the widened
            // range, and the mod-2^128 result still truncates to the
            // correct value at the type's width.
            let wide = match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div | ArithOp::ModDiv => {
                    if b == 0 {
                        return Err(engine.throw_eng(|e| e.div_by_zero, ""));
                    }
                    if op == ArithOp::Div { a / b } else { a % b }
                }
            };
            Ok(kind.wrap(wide))
        }
        (Num::Float(a), Num::Float(b)) => {
            let v = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::ModDiv => a % b,
            };
            Ok(kind.float_payload(v))
        }
        _ => Err(RunError::internal("mixed numeric kinds in one operation")),
    }
}

fn apply_compare(op: CompareOp, lhs: Num, rhs: Num) -> bool {
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => match op {
            CompareOp::Equal => a == b,
            CompareOp::LsThan => a < b,
            CompareOp::LsThanEq => a <= b,
            CompareOp::GtThan => a > b,
            CompareOp::GtThanEq => a >= b,
        },
        (Num::Float(a), Num::Float(b)) => match op {
            CompareOp::Equal => a == b,
            CompareOp::LsThan => a < b,
            CompareOp::LsThanEq => a <= b,
            CompareOp::GtThan => a > b,
            CompareOp::GtThanEq => a >= b,
        },
        _ => false,
    }
}

/// Renders a numeric value in the given radix. Floats ignore the radix.
fn render(num: Num, radix: u32) -> String {
    match num {
        Num::Float(v) => format_float(v),
        Num::Int(v) => render_int_radix(v, radix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_truncates_two_complement() {
        assert!(matches!(NumKind::Card1.wrap(-1), Payload::Card1(0xFF)));
        assert!(matches!(NumKind::Int1.wrap(200), Payload::Int1(-56)));
        assert!(matches!(NumKind::Card2.wrap(0x1_0005), Payload::Card2(5)));
    }

    #[test]
    fn limits_are_pairwise() {
        assert!(matches!(NumKind::Card1.max_payload(), Payload::Card1(0xFF)));
        assert!(matches!(NumKind::Int2.min_payload(), Payload::Int2(i16::MIN)));
    }

    #[test]
    fn radix_rendering() {
        assert_eq!(render(Num::Int(255), RADIX_HEX), "0xFF");
        assert_eq!(render(Num::Int(5), RADIX_BIN), "101");
        assert_eq!(render(Num::Int(-8), RADIX_OCT), "-10");
        assert_eq!(render(Num::Int(42), RADIX_DEC), "42");
    }
}
