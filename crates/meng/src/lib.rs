#![doc = include_str!("../../../README.md")]

mod class;
mod console;
mod engine;
mod error;
mod except;
mod handler;
mod id;
mod opcode;
mod registry;
mod resolver;
mod runtime;
mod stack;
mod trace;
mod value;

pub use crate::{
    class::{
        ClassExtent, EnumDef, EnumItem, LiteralInfo, MemberInfo, MengClass, MethodBody, MethodExtent, MethodInfo,
        ParmDir, ParmInfo, Visibility,
    },
    console::{CollectConsole, ConsoleReader, ConsoleWriter, EmptyConsoleIn, LinesConsoleIn, StdConsole},
    engine::{ENGINE_VERSION, InvokeOutcome, MACRO_FILE_DESCR, MACRO_FILE_EXT, MacroEngine},
    error::{InvokeError, RegError, RegResult, is_valid_class_path},
    except::{ExceptVal, RunError, RunResult},
    handler::{ErrHandler, ParseErrHandler, ParseEvent, ParseEventSev, StreamErrHandler, StreamParseErrHandler},
    id::{ClassId, EnumOrdinal, MemberId, MethodId},
    opcode::{CallTarget, DispatchKind, Imm, LocalInfo, OpCode, OpMethod, OpMethodBuilder},
    registry::{ClassRegistry, CoreIds},
    resolver::{FileResolver, FixedBaseResolver, ResolveError},
    runtime::{
        ClassLoader, DefaultLoader, EngErrIds, NativeCall, NativeResult, RuntimeClass,
        collect::{KVPairVal, VectorVal, register_vector_of},
        crypto::DigestVal,
        http::{AsyncHttpVal, HttpVal},
        membuf::MemBufVal,
        randomcls::RandomVal,
        sock::SockVal,
        streams::{InStreamVal, OutStreamVal},
        string::{MAX_CHARS, MengStr},
        strlist::StrListVal,
        textconv::TextConvVal,
        timecls::TimeVal,
        xml::{XmlAnchorVal, XmlParserVal},
    },
    stack::{StackKind, Target, ValueStack},
    trace::{EngineTracer, NoopTracer, StderrTracer},
    value::{AssignError, Payload, Value},
};
