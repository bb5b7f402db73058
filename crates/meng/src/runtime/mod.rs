//! Runtime classes: host services exposed as classes indistinguishable from
//! program-defined ones.
//!
//! A runtime class is a pair: a registration half that builds the class
//! descriptor (methods, literals, nested enums) and an invoke half that
//! dispatches on method id against the native state in the receiver's
//! payload. Inheritance of default methods works by returning
//! [`NativeResult::Unhandled`], which makes the engine try the parent
//! class's handler.
//!
//! The intrinsics registered by [`register_intrinsics`] are the classes the
//! opcode set references directly; everything else is produced on demand by
//! the [`DefaultLoader`] when a program imports it.

use crate::{
    class::{ClassExtent, EnumDef, MengClass},
    engine::MacroEngine,
    error::RegResult,
    except::RunResult,
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    value::Value,
};

pub(crate) mod baseinfo;
pub(crate) mod boolean;
pub(crate) mod charcls;
pub(crate) mod collect;
pub(crate) mod crypto;
pub(crate) mod enumcls;
pub(crate) mod filesys;
pub(crate) mod http;
pub(crate) mod membuf;
pub(crate) mod numerics;
pub(crate) mod object;
pub(crate) mod randomcls;
pub(crate) mod sock;
pub(crate) mod streams;
pub(crate) mod string;
pub(crate) mod strlist;
pub(crate) mod textconv;
pub(crate) mod timecls;
pub(crate) mod xml;

/// Identifies the method being dispatched to a native handler.
#[derive(Debug, Clone, Copy)]
pub struct NativeCall {
    /// The class whose handler is being tried. Walks up the parent chain as
    /// handlers return [`NativeResult::Unhandled`].
    pub class_id: ClassId,
    pub method_id: MethodId,
}

/// Outcome of a native method dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeResult {
    /// The handler executed the method.
    Handled,
    /// The method id belongs to an ancestor; the engine should try the
    /// parent class's handler.
    Unhandled,
}

/// The contract a class written in the host language implements to plug in.
pub trait RuntimeClass {
    /// Registers the class descriptor (and any nested enum classes) with the
    /// registry, returning the class id. Called exactly once, before any
    /// instance exists; method ids are captured here for dispatch.
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId>;

    /// Allocates storage for a new instance. `class_id` is the instance's
    /// dynamic class, which for base-class handlers may be a derived class.
    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value;

    /// Executes a method against the receiver on top of the current frame.
    /// Returns `Unhandled` to let the parent class's handler try.
    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult>;
}

/// Produces runtime classes for paths the registry has not seen.
pub trait ClassLoader {
    /// Returns the runtime class for a path this loader knows, or `None` to
    /// let the next loader in the chain try.
    fn load_class(&self, class_path: &str) -> Option<Box<dyn RuntimeClass>>;
}

/// The always-installed loader that knows the built-in runtime classes.
#[derive(Debug, Default)]
pub struct DefaultLoader;

impl ClassLoader for DefaultLoader {
    fn load_class(&self, class_path: &str) -> Option<Box<dyn RuntimeClass>> {
        match class_path {
            filesys::CLASS_PATH => Some(Box::new(filesys::FileSysClass::default())),
            textconv::CLASS_PATH => Some(Box::new(textconv::TextXCoderClass::default())),
            timecls::CLASS_PATH => Some(Box::new(timecls::TimeClass::default())),
            randomcls::CLASS_PATH => Some(Box::new(randomcls::RandomNumClass::default())),
            sock::CLASS_PATH => Some(Box::new(sock::StreamSocketClass::default())),
            http::HTTP_CLASS_PATH => Some(Box::new(http::HttpClientClass::default())),
            http::ASYNC_CLASS_PATH => Some(Box::new(http::AsyncHttpClass::default())),
            xml::PARSER_CLASS_PATH => Some(Box::new(xml::XmlTreeParserClass::default())),
            xml::ANCHOR_CLASS_PATH => Some(Box::new(xml::XmlTreeAnchorClass::default())),
            streams::FILE_OUT_PATH => Some(Box::new(streams::OutStreamClass::file())),
            streams::FILE_IN_PATH => Some(Box::new(streams::InStreamClass::file())),
            crypto::MD5_PATH => Some(Box::new(crypto::DigestClass::md5())),
            crypto::SHA1_PATH => Some(Box::new(crypto::DigestClass::sha1())),
            crypto::SHA256_PATH => Some(Box::new(crypto::DigestClass::sha256())),
            _ => None,
        }
    }
}

/// Language-exception ordinals of the engine's own error enum,
/// `MEng.System.Runtime.EngErrors`. Registered with the intrinsics so the
/// engine can raise type, cast, and sandbox errors as catchable exceptions.
#[derive(Debug, Clone, Copy)]
pub struct EngErrIds {
    pub class_id: ClassId,
    pub const_violation: u32,
    pub bad_cast: u32,
    pub not_copyable: u32,
    pub div_by_zero: u32,
    pub bad_exp_path: u32,
    pub cant_convert_path: u32,
}

impl Default for EngErrIds {
    fn default() -> Self {
        Self {
            class_id: ClassId::BAD,
            const_violation: 0,
            bad_cast: 1,
            not_copyable: 2,
            div_by_zero: 3,
            bad_exp_path: 4,
            cant_convert_path: 5,
        }
    }
}

/// Registers every intrinsic class, filling the registry's core-id table,
/// and installs the default loader. Called once at engine construction.
pub fn register_intrinsics(reg: &mut ClassRegistry) -> RegResult<EngErrIds> {
    reg.core.object = reg.install(Box::new(object::ObjectClass::default()))?;
    reg.core.formattable = reg.install(Box::new(object::FormattableClass::default()))?;
    reg.core.enum_base = reg.install(Box::new(enumcls::EnumBaseClass::default()))?;
    reg.core.radices = reg.register_enum(
        "MEng.Radices",
        EnumDef::from_pairs(&[("Bin", "binary"), ("Oct", "octal"), ("Dec", "decimal"), ("Hex", "hexadecimal")]),
    )?;
    reg.core.void = reg.install(Box::new(object::VoidClass::default()))?;
    reg.core.boolean = reg.install(Box::new(boolean::BooleanClass::default()))?;
    reg.core.card1 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Card1)))?;
    reg.core.card2 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Card2)))?;
    reg.core.card4 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Card4)))?;
    reg.core.card8 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Card8)))?;
    reg.core.int1 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Int1)))?;
    reg.core.int2 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Int2)))?;
    reg.core.int4 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Int4)))?;
    reg.core.float4 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Float4)))?;
    reg.core.float8 = reg.install(Box::new(numerics::NumericClass::new(numerics::NumKind::Float8)))?;
    reg.core.char = reg.install(Box::new(charcls::CharClass::default()))?;
    reg.core.string = reg.install(Box::new(string::StringClass::default()))?;
    reg.core.string_list = reg.install(Box::new(strlist::StringListClass::default()))?;
    reg.core.exception = reg.install(Box::new(object::ExceptionClass::default()))?;
    reg.core.mem_buf = reg.install(Box::new(membuf::MemBufClass::default()))?;
    reg.core.kv_pair = reg.install(Box::new(collect::KVPairClass::default()))?;
    collect::register_vector_base(reg)?;
    reg.core.text_out_stream = reg.install(Box::new(streams::OutStreamClass::base()))?;
    reg.core.text_in_stream = reg.install(Box::new(streams::InStreamClass::base()))?;
    reg.install(Box::new(streams::OutStreamClass::console()))?;
    reg.install(Box::new(streams::InStreamClass::console()))?;
    reg.install(Box::new(streams::OutStreamClass::string()))?;
    reg.install(Box::new(streams::InStreamClass::string()))?;
    reg.core.base_info = reg.install(Box::new(baseinfo::BaseInfoClass::default()))?;

    let mut eng_errs = EngErrIds::default();
    let mut def = EnumDef::default();
    eng_errs.const_violation = def.add_item("ConstViolation", "a const value cannot be modified", None);
    eng_errs.bad_cast = def.add_item("BadCast", "the value cannot be cast to the target type", None);
    eng_errs.not_copyable = def.add_item("NotCopyable", "values of this type cannot be copied", None);
    eng_errs.div_by_zero = def.add_item("DivByZero", "integer division by zero", None);
    eng_errs.bad_exp_path = def.add_item("BadExpPath", "the path expands outside the file sandbox", None);
    eng_errs.cant_convert_path = def.add_item("CantConvertPath", "the path has no program-visible form", None);
    eng_errs.class_id = reg.register_enum("MEng.System.Runtime.EngErrors", def)?;

    reg.add_loader(std::sync::Arc::new(DefaultLoader));
    Ok(eng_errs)
}

/// Shorthand for building an unsealed descriptor with a parent.
pub(crate) fn class_shell(path: &str, parent: ClassId, extent: ClassExtent) -> MengClass {
    MengClass::new(crate::error::short_name_of(path).to_owned(), path.to_owned(), Some(parent), extent)
}
