//! Value objects: the live instances of registered classes.
//!
//! A value is a class id, a const flag, and a payload. Intrinsic classes
//! carry their state directly in the payload variant; program-defined classes
//! carry an ordered list of owned member values; runtime classes carry their
//! native state (a socket, a parser, a hash context). Member values are
//! exclusively owned by their parent value, so the object graph is acyclic by
//! construction.

use crate::{
    except::{ExceptVal, RunError, RunResult},
    id::{ClassId, EnumOrdinal},
    registry::CoreIds,
    runtime::{
        collect::{KVPairVal, VectorVal},
        crypto::DigestVal,
        http::{AsyncHttpVal, HttpVal},
        membuf::MemBufVal,
        randomcls::RandomVal,
        sock::SockVal,
        streams::{InStreamVal, OutStreamVal},
        string::MengStr,
        strlist::StrListVal,
        textconv::TextConvVal,
        timecls::TimeVal,
        xml::{XmlAnchorVal, XmlParserVal},
    },
};

/// Why an assignment between two values was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    /// The target is marked const.
    ConstTarget,
    /// Source and target class ids differ.
    ClassMismatch,
    /// The payload holds native state that cannot be duplicated.
    NotCopyable,
}

/// The per-class state of a value object.
///
/// Variants for native runtime-class state are boxed where the state is
/// large or holds OS resources.
#[derive(Debug)]
pub enum Payload {
    /// `MEng.Void`: the return payload of methods that return nothing.
    Void,
    Bool(bool),
    Card1(u8),
    Card2(u16),
    Card4(u32),
    Card8(u64),
    Int1(i8),
    Int2(i16),
    Int4(i32),
    Float4(f32),
    Float8(f64),
    Char(char),
    Str(MengStr),
    StrList(StrListVal),
    /// Ordinal within the value's enum class.
    Enum(EnumOrdinal),
    MemBuf(MemBufVal),
    KVPair(KVPairVal),
    Vector(VectorVal),
    /// Member values of a program-defined class, flattened root-to-leaf in
    /// declaration order.
    Members(Vec<Value>),
    Except(Box<ExceptVal>),
    OutStream(Box<OutStreamVal>),
    InStream(Box<InStreamVal>),
    TextConv(Box<TextConvVal>),
    /// `FileSys` values have no state; every operation routes through the
    /// engine's file resolver.
    FileSys,
    Time(TimeVal),
    Digest(Box<DigestVal>),
    Random(Box<RandomVal>),
    Socket(Box<SockVal>),
    Http(Box<HttpVal>),
    AsyncHttp(Box<AsyncHttpVal>),
    XmlParser(Box<XmlParserVal>),
    XmlAnchor(XmlAnchorVal),
    /// `MEng.BaseInfo` is stateless; accessors read the engine.
    BaseInfo,
}

impl Payload {
    /// Duplicates the payload where the class is copyable. Native resource
    /// state (sockets, streams, parsers, digests in progress) is not.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            Self::Void => Some(Self::Void),
            Self::Bool(v) => Some(Self::Bool(*v)),
            Self::Card1(v) => Some(Self::Card1(*v)),
            Self::Card2(v) => Some(Self::Card2(*v)),
            Self::Card4(v) => Some(Self::Card4(*v)),
            Self::Card8(v) => Some(Self::Card8(*v)),
            Self::Int1(v) => Some(Self::Int1(*v)),
            Self::Int2(v) => Some(Self::Int2(*v)),
            Self::Int4(v) => Some(Self::Int4(*v)),
            Self::Float4(v) => Some(Self::Float4(*v)),
            Self::Float8(v) => Some(Self::Float8(*v)),
            Self::Char(v) => Some(Self::Char(*v)),
            Self::Str(v) => Some(Self::Str(v.clone())),
            Self::StrList(v) => Some(Self::StrList(v.clone())),
            Self::Enum(v) => Some(Self::Enum(*v)),
            Self::MemBuf(v) => Some(Self::MemBuf(v.clone())),
            Self::KVPair(v) => Some(Self::KVPair(v.clone())),
            Self::Vector(v) => v.try_clone().map(Self::Vector),
            Self::Members(v) => {
                let mut out = Vec::with_capacity(v.len());
                for member in v {
                    out.push(member.try_clone()?);
                }
                Some(Self::Members(out))
            }
            Self::Except(v) => Some(Self::Except(v.clone())),
            Self::Time(v) => Some(Self::Time(*v)),
            Self::TextConv(v) => Some(Self::TextConv(v.clone())),
            Self::XmlAnchor(v) => Some(Self::XmlAnchor(*v)),
            Self::FileSys => Some(Self::FileSys),
            Self::BaseInfo => Some(Self::BaseInfo),
            Self::OutStream(_)
            | Self::InStream(_)
            | Self::Digest(_)
            | Self::Random(_)
            | Self::Socket(_)
            | Self::Http(_)
            | Self::AsyncHttp(_)
            | Self::XmlParser(_) => None,
        }
    }

    /// Short kind tag used in internal fault messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "Void",
            Self::Bool(_) => "Boolean",
            Self::Card1(_) => "Card1",
            Self::Card2(_) => "Card2",
            Self::Card4(_) => "Card4",
            Self::Card8(_) => "Card8",
            Self::Int1(_) => "Int1",
            Self::Int2(_) => "Int2",
            Self::Int4(_) => "Int4",
            Self::Float4(_) => "Float4",
            Self::Float8(_) => "Float8",
            Self::Char(_) => "Char",
            Self::Str(_) => "String",
            Self::StrList(_) => "StringList",
            Self::Enum(_) => "Enum",
            Self::MemBuf(_) => "MemBuf",
            Self::KVPair(_) => "KVPair",
            Self::Vector(_) => "Vector",
            Self::Members(_) => "Members",
            Self::Except(_) => "Exception",
            Self::OutStream(_) => "TextOutStream",
            Self::InStream(_) => "TextInStream",
            Self::TextConv(_) => "TextXCoder",
            Self::FileSys => "FileSys",
            Self::Time(_) => "Time",
            Self::Digest(_) => "Digest",
            Self::Random(_) => "RandomNum",
            Self::Socket(_) => "Socket",
            Self::Http(_) => "HTTPClient",
            Self::AsyncHttp(_) => "AsyncHTTP",
            Self::XmlParser(_) => "XMLTreeParser",
            Self::XmlAnchor(_) => "XMLTreeAnchor",
            Self::BaseInfo => "BaseInfo",
        }
    }

    /// The widened integral form of a numeric-like payload, if it has one.
    /// Bool maps to 0/1, Char to its code point, Enum to its ordinal.
    #[must_use]
    fn as_wide_int(&self) -> Option<i128> {
        match self {
            Self::Bool(v) => Some(i128::from(*v)),
            Self::Card1(v) => Some(i128::from(*v)),
            Self::Card2(v) => Some(i128::from(*v)),
            Self::Card4(v) => Some(i128::from(*v)),
            Self::Card8(v) => Some(i128::from(*v)),
            Self::Int1(v) => Some(i128::from(*v)),
            Self::Int2(v) => Some(i128::from(*v)),
            Self::Int4(v) => Some(i128::from(*v)),
            Self::Char(v) => Some(i128::from(u32::from(*v))),
            Self::Enum(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    /// The float form of a numeric payload, if it has one.
    #[must_use]
    fn as_wide_float(&self) -> Option<f64> {
        match self {
            Self::Float4(v) => Some(f64::from(*v)),
            Self::Float8(v) => Some(*v),
            other => other.as_wide_int().map(|v| v as f64),
        }
    }
}

/// A live value object.
#[derive(Debug)]
pub struct Value {
    class_id: ClassId,
    is_const: bool,
    pub payload: Payload,
}

impl Value {
    #[must_use]
    pub fn new(class_id: ClassId, payload: Payload) -> Self {
        Self {
            class_id,
            is_const: false,
            payload,
        }
    }

    #[must_use]
    pub fn new_const(class_id: ClassId, payload: Payload) -> Self {
        Self {
            class_id,
            is_const: true,
            payload,
        }
    }

    #[inline]
    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[inline]
    #[must_use]
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn set_const(&mut self, is_const: bool) {
        self.is_const = is_const;
    }

    /// Duplicates the value where its payload is copyable.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        self.payload.try_clone().map(|payload| Self {
            class_id: self.class_id,
            is_const: self.is_const,
            payload,
        })
    }

    /// Assigns `src` into this value.
    ///
    /// Class ids must match exactly; values whose classes merely share an
    /// ancestor are never assignment-compatible. The target's const flag is
    /// enforced here, and the payload must be copyable.
    pub fn assign_from(&mut self, src: &Self) -> Result<(), AssignError> {
        if self.is_const {
            return Err(AssignError::ConstTarget);
        }
        if self.class_id != src.class_id {
            return Err(AssignError::ClassMismatch);
        }
        let Some(payload) = src.payload.try_clone() else {
            return Err(AssignError::NotCopyable);
        };
        self.payload = payload;
        Ok(())
    }

    /// Computes the payload this value would have after a cast to the target
    /// class. Returns `None` when no legal cast path exists.
    ///
    /// Integral narrowing truncates two's-complement style; float-to-integer
    /// truncates toward zero first; integer-to-float rounds per IEEE-754.
    #[must_use]
    pub fn cast_payload(&self, target: ClassId, core: &CoreIds) -> Option<Payload> {
        if target == self.class_id {
            return self.payload.try_clone();
        }
        if target == core.float4 {
            return self.payload.as_wide_float().map(|v| Payload::Float4(v as f32));
        }
        if target == core.float8 {
            return self.payload.as_wide_float().map(Payload::Float8);
        }
        if target == core.boolean {
            return self.payload.as_wide_int().map(|v| Payload::Bool(v != 0));
        }
        if target == core.char {
            let code = u32::try_from(self.payload.as_wide_int()?).ok()?;
            return char::from_u32(code).map(Payload::Char);
        }
        // Integral targets: floats truncate toward zero, everything else
        // narrows two's-complement style.
        let wide = match &self.payload {
            Payload::Float4(v) => float_to_wide(f64::from(*v))?,
            Payload::Float8(v) => float_to_wide(*v)?,
            other => other.as_wide_int()?,
        };
        let cast = if target == core.card1 {
            Payload::Card1(wide as u8)
        } else if target == core.card2 {
            Payload::Card2(wide as u16)
        } else if target == core.card4 {
            Payload::Card4(wide as u32)
        } else if target == core.card8 {
            Payload::Card8(wide as u64)
        } else if target == core.int1 {
            Payload::Int1(wide as i8)
        } else if target == core.int2 {
            Payload::Int2(wide as i16)
        } else if target == core.int4 {
            Payload::Int4(wide as i32)
        } else {
            return None;
        };
        Some(cast)
    }

    // ----- typed payload access -----
    //
    // These back the engine's stack-value-at-by-type ABI. A kind mismatch is
    // an internal fault: run-time types were checked when the program
    // compiled, so a miss means the opcode stream or a native method is wrong.

    pub fn as_bool(&self) -> RunResult<bool> {
        match &self.payload {
            Payload::Bool(v) => Ok(*v),
            other => Err(type_fault("Boolean", other)),
        }
    }

    pub fn as_card1(&self) -> RunResult<u8> {
        match &self.payload {
            Payload::Card1(v) => Ok(*v),
            other => Err(type_fault("Card1", other)),
        }
    }

    pub fn as_card2(&self) -> RunResult<u16> {
        match &self.payload {
            Payload::Card2(v) => Ok(*v),
            other => Err(type_fault("Card2", other)),
        }
    }

    pub fn as_card4(&self) -> RunResult<u32> {
        match &self.payload {
            Payload::Card4(v) => Ok(*v),
            other => Err(type_fault("Card4", other)),
        }
    }

    pub fn as_card8(&self) -> RunResult<u64> {
        match &self.payload {
            Payload::Card8(v) => Ok(*v),
            other => Err(type_fault("Card8", other)),
        }
    }

    pub fn as_int1(&self) -> RunResult<i8> {
        match &self.payload {
            Payload::Int1(v) => Ok(*v),
            other => Err(type_fault("Int1", other)),
        }
    }

    pub fn as_int2(&self) -> RunResult<i16> {
        match &self.payload {
            Payload::Int2(v) => Ok(*v),
            other => Err(type_fault("Int2", other)),
        }
    }

    pub fn as_int4(&self) -> RunResult<i32> {
        match &self.payload {
            Payload::Int4(v) => Ok(*v),
            other => Err(type_fault("Int4", other)),
        }
    }

    pub fn as_float4(&self) -> RunResult<f32> {
        match &self.payload {
            Payload::Float4(v) => Ok(*v),
            other => Err(type_fault("Float4", other)),
        }
    }

    pub fn as_float8(&self) -> RunResult<f64> {
        match &self.payload {
            Payload::Float8(v) => Ok(*v),
            other => Err(type_fault("Float8", other)),
        }
    }

    pub fn as_char(&self) -> RunResult<char> {
        match &self.payload {
            Payload::Char(v) => Ok(*v),
            other => Err(type_fault("Char", other)),
        }
    }

    pub fn as_str(&self) -> RunResult<&MengStr> {
        match &self.payload {
            Payload::Str(v) => Ok(v),
            other => Err(type_fault("String", other)),
        }
    }

    pub fn as_str_mut(&mut self) -> RunResult<&mut MengStr> {
        match &mut self.payload {
            Payload::Str(v) => Ok(v),
            other => Err(type_fault("String", other)),
        }
    }

    pub fn as_enum(&self) -> RunResult<EnumOrdinal> {
        match &self.payload {
            Payload::Enum(v) => Ok(*v),
            other => Err(type_fault("Enum", other)),
        }
    }

    pub fn set_enum(&mut self, ordinal: EnumOrdinal) -> RunResult<()> {
        match &mut self.payload {
            Payload::Enum(v) => {
                *v = ordinal;
                Ok(())
            }
            other => Err(type_fault("Enum", other)),
        }
    }
}

fn type_fault(wanted: &str, got: &Payload) -> RunError {
    RunError::internal(format!("stack value is {}, expected {wanted}", got.kind_name()))
}

/// Truncates a float toward zero into the widest integral form; NaN has
/// none.
fn float_to_wide(v: f64) -> Option<i128> {
    if v.is_nan() {
        return None;
    }
    Some(v.trunc() as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_for_test() -> CoreIds {
        // Lay primitives out at fixed slots for cast checks.
        let mut core = CoreIds::default();
        core.boolean = ClassId::from_index(1);
        core.card1 = ClassId::from_index(2);
        core.card2 = ClassId::from_index(3);
        core.card4 = ClassId::from_index(4);
        core.card8 = ClassId::from_index(5);
        core.int1 = ClassId::from_index(6);
        core.int2 = ClassId::from_index(7);
        core.int4 = ClassId::from_index(8);
        core.float4 = ClassId::from_index(9);
        core.float8 = ClassId::from_index(10);
        core.char = ClassId::from_index(11);
        core
    }

    #[test]
    fn negative_int_truncates_into_card1() {
        let core = core_for_test();
        let v = Value::new(core.int4, Payload::Int4(-1));
        let cast = v.cast_payload(core.card1, &core).unwrap();
        assert!(matches!(cast, Payload::Card1(0xFF)));
    }

    #[test]
    fn float_to_int_truncates_toward_zero() {
        let core = core_for_test();
        let v = Value::new(core.float8, Payload::Float8(3.9));
        let cast = v.cast_payload(core.int2, &core).unwrap();
        assert!(matches!(cast, Payload::Int2(3)));
        let v = Value::new(core.float8, Payload::Float8(-3.9));
        let cast = v.cast_payload(core.int2, &core).unwrap();
        assert!(matches!(cast, Payload::Int2(-3)));
    }

    #[test]
    fn char_cast_rejects_bad_code_points() {
        let core = core_for_test();
        let v = Value::new(core.card4, Payload::Card4(0xD800));
        assert!(v.cast_payload(core.char, &core).is_none());
        let v = Value::new(core.card4, Payload::Card4(0x41));
        let cast = v.cast_payload(core.char, &core).unwrap();
        assert!(matches!(cast, Payload::Char('A')));
    }

    #[test]
    fn assign_requires_exact_class() {
        let core = core_for_test();
        let mut tar = Value::new(core.card4, Payload::Card4(0));
        let src = Value::new(core.card2, Payload::Card2(5));
        assert_eq!(tar.assign_from(&src), Err(AssignError::ClassMismatch));
        let src = Value::new(core.card4, Payload::Card4(5));
        tar.assign_from(&src).unwrap();
        assert_eq!(tar.as_card4().unwrap(), 5);
    }

    #[test]
    fn const_target_refuses_assignment() {
        let core = core_for_test();
        let mut tar = Value::new_const(core.card4, Payload::Card4(1));
        let src = Value::new(core.card4, Payload::Card4(2));
        assert_eq!(tar.assign_from(&src), Err(AssignError::ConstTarget));
    }

    #[test]
    fn nan_has_no_integral_cast() {
        let core = core_for_test();
        let v = Value::new(core.float8, Payload::Float8(f64::NAN));
        assert!(v.cast_payload(core.int4, &core).is_none());
    }
}
