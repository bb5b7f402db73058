//! The text stream classes.
//!
//! `TextOutStream` and `TextInStream` are abstract; derivatives bind them to
//! the host console, to files (through the sandbox resolver), and to
//! in-memory strings. A string-in stream can synchronize with a string-out
//! stream, reading whatever has been written so far — the two sibling
//! values share one buffer, which keeps the object graph acyclic.

use std::{
    cell::RefCell,
    fs::File,
    io::{BufRead, BufReader, Write as _},
    rc::Rc,
};

use crate::{
    class::{ClassExtent, EnumDef, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    stack::Target,
    value::{Payload, Value},
};

pub(crate) const OUT_BASE_PATH: &str = "MEng.System.Runtime.TextOutStream";
pub(crate) const IN_BASE_PATH: &str = "MEng.System.Runtime.TextInStream";
pub(crate) const CONSOLE_OUT_PATH: &str = "MEng.System.Runtime.ConsoleOutStream";
pub(crate) const CONSOLE_IN_PATH: &str = "MEng.System.Runtime.ConsoleInStream";
pub(crate) const STRING_OUT_PATH: &str = "MEng.System.Runtime.StringOutStream";
pub(crate) const STRING_IN_PATH: &str = "MEng.System.Runtime.StringInStream";
pub(crate) const FILE_OUT_PATH: &str = "MEng.System.Runtime.FileOutStream";
pub(crate) const FILE_IN_PATH: &str = "MEng.System.Runtime.FileInStream";

const CVT_ERR_ACTS_PATH: &str = "MEng.System.Runtime.CvtErrActs";

/// Error ordinals of the stream error enums.
const ERR_NOT_OPEN: u32 = 0;
const ERR_OPEN_FAILED: u32 = 1;
const ERR_WRITE_ERR: u32 = 2;
const ERR_READ_ERR: u32 = 3;

/// Which binding a stream class serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamBind {
    Base,
    Console,
    Text,
    File,
}

/// Where an out-stream's text goes.
#[derive(Debug)]
pub enum OutSink {
    /// Base-class storage; never written through.
    Null,
    /// The engine's console writer.
    Console,
    /// A shared in-memory buffer.
    Text(Rc<RefCell<String>>),
    /// A sandboxed file; `None` until opened.
    File(Option<File>),
}

/// The payload of a text out-stream value.
#[derive(Debug)]
pub struct OutStreamVal {
    sink: OutSink,
    encoding: String,
    err_action: u32,
    repl_char: char,
    /// Error enum of the concrete class, for write-path throws.
    errs: ClassId,
}

impl OutStreamVal {
    fn new(sink: OutSink, errs: ClassId) -> Self {
        Self {
            sink,
            encoding: "UTF-8".to_owned(),
            err_action: 0,
            repl_char: '\u{FFFD}',
            errs,
        }
    }

    /// The accumulated text of a string-backed stream.
    #[must_use]
    pub fn captured_text(&self) -> String {
        match &self.sink {
            OutSink::Text(buf) => buf.borrow().clone(),
            _ => String::new(),
        }
    }

    fn share_buffer(&self) -> Option<Rc<RefCell<String>>> {
        match &self.sink {
            OutSink::Text(buf) => Some(Rc::clone(buf)),
            _ => None,
        }
    }
}

/// Where an in-stream's text comes from.
#[derive(Debug)]
pub enum InSource {
    Null,
    Console,
    /// A shared buffer and the read position within it.
    Text { buf: Rc<RefCell<String>>, pos: usize },
    File(Option<BufReader<File>>),
}

/// The payload of a text in-stream value.
#[derive(Debug)]
pub struct InStreamVal {
    source: InSource,
    encoding: String,
    errs: ClassId,
}

impl InStreamVal {
    fn new(source: InSource, errs: ClassId) -> Self {
        Self {
            source,
            encoding: "UTF-8".to_owned(),
            errs,
        }
    }
}

/// Writes formatted text through the out-stream in the given parameter
/// slot. This is the shared back end of every `FormatTo` implementation.
pub(crate) fn write_to_stream_parm(engine: &mut MacroEngine, parm: usize, text: &str) -> RunResult<()> {
    let target = engine.current_parm_target(parm)?;
    write_to_stream_target(engine, &target, text)
}

/// Writes text through the out-stream value at a stack target.
pub(crate) fn write_to_stream_target(engine: &mut MacroEngine, target: &Target, text: &str) -> RunResult<()> {
    // Decide the sink kind first so console writes don't hold a stack
    // borrow while they reach the engine's console binding.
    let (is_console, errs) = match &engine.stack_value(target)?.payload {
        Payload::OutStream(s) => (matches!(s.sink, OutSink::Console), s.errs),
        other => {
            return Err(RunError::internal(format!(
                "stream write against {}",
                other.kind_name()
            )));
        }
    };
    if is_console {
        engine.console_write(text);
        return Ok(());
    }
    let write_err = {
        let Payload::OutStream(s) = &mut engine.stack_value_mut(target)?.payload else {
            return Err(RunError::internal("stream payload changed type"));
        };
        match &mut s.sink {
            OutSink::Text(buf) => {
                buf.borrow_mut().push_str(text);
                None
            }
            OutSink::File(Some(file)) => file.write_all(text.as_bytes()).err(),
            OutSink::File(None) => return Err(engine.throw(errs, ERR_NOT_OPEN, "the stream is not open")),
            OutSink::Null | OutSink::Console => None,
        }
    };
    if let Some(err) = write_err {
        let text = err.to_string();
        engine.trace_host_error(FILE_OUT_PATH, &text);
        return Err(engine.throw(errs, ERR_WRITE_ERR, text));
    }
    Ok(())
}

/// The out-stream class family: one handler type covers the abstract base
/// and each derivative.
#[derive(Debug)]
pub struct OutStreamClass {
    bind: StreamBind,
    errs: ClassId,
    write: MethodId,
    write_line: MethodId,
    new_ln: MethodId,
    flush: MethodId,
    get_encoding: MethodId,
    set_err_action: MethodId,
    set_repl_char: MethodId,
    // Derivative-specific ids; BAD where not registered.
    get_text: MethodId,
    reset: MethodId,
    open: MethodId,
    close: MethodId,
}

impl OutStreamClass {
    fn with_bind(bind: StreamBind) -> Self {
        Self {
            bind,
            errs: ClassId::BAD,
            write: MethodId::BAD,
            write_line: MethodId::BAD,
            new_ln: MethodId::BAD,
            flush: MethodId::BAD,
            get_encoding: MethodId::BAD,
            set_err_action: MethodId::BAD,
            set_repl_char: MethodId::BAD,
            get_text: MethodId::BAD,
            reset: MethodId::BAD,
            open: MethodId::BAD,
            close: MethodId::BAD,
        }
    }

    #[must_use]
    pub fn base() -> Self {
        Self::with_bind(StreamBind::Base)
    }

    #[must_use]
    pub fn console() -> Self {
        Self::with_bind(StreamBind::Console)
    }

    #[must_use]
    pub fn string() -> Self {
        Self::with_bind(StreamBind::Text)
    }

    #[must_use]
    pub fn file() -> Self {
        Self::with_bind(StreamBind::File)
    }
}

impl RuntimeClass for OutStreamClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        match self.bind {
            StreamBind::Base => {
                // The error-action enum is shared with the in-streams and
                // the text converter; first one here registers it.
                if reg.find_by_path(CVT_ERR_ACTS_PATH).is_none() {
                    reg.register_enum(
                        CVT_ERR_ACTS_PATH,
                        EnumDef::from_pairs(&[
                            ("Throw", "throw on any bad input"),
                            ("StopThenThrow", "stop at bad input, then throw"),
                            ("Replace", "replace bad input with the replacement character"),
                        ]),
                    )?;
                }
                let cls = class_shell(OUT_BASE_PATH, reg.core.object, ClassExtent::Abstract);
                let id = reg.register_class(cls)?;
                self.errs = reg.register_enum(
                    "MEng.System.Runtime.TextOutStream.OutStrmErrs",
                    EnumDef::from_pairs(&[
                        ("NotOpen", "the stream is not open"),
                        ("OpenFailed", "the stream target could not be opened"),
                        ("WriteErr", "the write failed"),
                        ("ReadErr", "the read failed"),
                    ]),
                )?;
                reg.class_mut(id).add_nested_type(self.errs);
                let string = reg.core.string;
                let void = reg.core.void;
                let object = reg.core.object;
                let err_acts = reg
                    .find_by_path(CVT_ERR_ACTS_PATH)
                    .ok_or_else(|| crate::error::RegError::ClassNotFound(CVT_ERR_ACTS_PATH.to_owned()))?;

                let mut m = MethodInfo::new("Write", void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("ToWrite", object);
                self.write = reg.class_mut(id).add_method(m)?;
                let mut m = MethodInfo::new("WriteLine", void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("ToWrite", object);
                self.write_line = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("NewLn", void, MethodExtent::Final, Visibility::Public);
                self.new_ln = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("Flush", void, MethodExtent::Final, Visibility::Public);
                self.flush = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("GetEncoding", string, MethodExtent::Final, Visibility::Public);
                self.get_encoding = reg.class_mut(id).add_method(m.const_method())?;
                let mut m = MethodInfo::new("SetErrAction", void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("ActToSet", err_acts);
                self.set_err_action = reg.class_mut(id).add_method(m)?;
                let mut m = MethodInfo::new("SetReplChar", void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("ToSet", reg.core.char);
                self.set_repl_char = reg.class_mut(id).add_method(m)?;
                Ok(id)
            }
            StreamBind::Console => {
                let parent = base_out_id(reg)?;
                self.inherit_base_ids(reg, parent);
                let cls = class_shell(CONSOLE_OUT_PATH, parent, ClassExtent::Final);
                reg.register_class(cls)
            }
            StreamBind::Text => {
                let parent = base_out_id(reg)?;
                self.inherit_base_ids(reg, parent);
                let cls = class_shell(STRING_OUT_PATH, parent, ClassExtent::Final);
                let id = reg.register_class(cls)?;
                let m = MethodInfo::new("GetText", reg.core.string, MethodExtent::Final, Visibility::Public);
                self.get_text = reg.class_mut(id).add_method(m.const_method())?;
                let m = MethodInfo::new("Reset", reg.core.void, MethodExtent::Final, Visibility::Public);
                self.reset = reg.class_mut(id).add_method(m)?;
                Ok(id)
            }
            StreamBind::File => {
                let parent = base_out_id(reg)?;
                self.inherit_base_ids(reg, parent);
                let cls = class_shell(FILE_OUT_PATH, parent, ClassExtent::Final);
                let id = reg.register_class(cls)?;
                let mut m = MethodInfo::new("Open", reg.core.void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("Path", reg.core.string);
                self.open = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("Close", reg.core.void, MethodExtent::Final, Visibility::Public);
                self.close = reg.class_mut(id).add_method(m)?;
                Ok(id)
            }
        }
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let sink = match self.bind {
            StreamBind::Base => OutSink::Null,
            StreamBind::Console => OutSink::Console,
            StreamBind::Text => OutSink::Text(Rc::new(RefCell::new(String::new()))),
            StreamBind::File => OutSink::File(None),
        };
        let mut value = Value::new(class_id, Payload::OutStream(Box::new(OutStreamVal::new(sink, self.errs))));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.write || mid == self.write_line {
            let parm = engine.current_parm_target(0)?;
            let mut text = engine.format_value_text(&parm)?;
            if mid == self.write_line {
                text.push('\n');
            }
            let receiver = engine.current_receiver_target()?;
            write_to_stream_target(engine, &receiver, &text)?;
        } else if mid == self.new_ln {
            let receiver = engine.current_receiver_target()?;
            write_to_stream_target(engine, &receiver, "\n")?;
        } else if mid == self.flush {
            let (is_console, flush_err) = {
                let val = recv_out_mut(engine)?;
                match &mut val.sink {
                    OutSink::Console => (true, None),
                    OutSink::File(Some(file)) => (false, file.flush().err()),
                    _ => (false, None),
                }
            };
            if is_console {
                engine.console_flush();
            } else if let Some(err) = flush_err {
                let errs = recv_out(engine)?.errs;
                return Err(engine.throw(errs, ERR_WRITE_ERR, err.to_string()));
            }
        } else if mid == self.get_encoding {
            let encoding = recv_out(engine)?.encoding.clone();
            engine.set_ret(Payload::Str(encoding.as_str().into()))?;
        } else if mid == self.set_err_action {
            let action = engine.parm(0)?.as_enum()?;
            recv_out_mut(engine)?.err_action = action;
        } else if mid == self.set_repl_char {
            let ch = engine.parm(0)?.as_char()?;
            recv_out_mut(engine)?.repl_char = ch;
        } else if self.bind == StreamBind::Text && mid == self.get_text {
            let text = recv_out(engine)?.captured_text();
            engine.set_ret(Payload::Str(text.as_str().into()))?;
        } else if self.bind == StreamBind::Text && mid == self.reset {
            if let OutSink::Text(buf) = &recv_out(engine)?.sink {
                buf.borrow_mut().clear();
            }
        } else if self.bind == StreamBind::File && mid == self.open {
            let program_path = engine.parm(0)?.as_str()?.as_str().to_owned();
            let host_path = engine.expand_file_path(&program_path)?;
            match File::create(&host_path) {
                Ok(file) => recv_out_mut(engine)?.sink = OutSink::File(Some(file)),
                Err(err) => {
                    let text = err.to_string();
                    engine.trace_host_error(FILE_OUT_PATH, &text);
                    let errs = recv_out(engine)?.errs;
                    return Err(engine.throw(errs, ERR_OPEN_FAILED, text));
                }
            }
        } else if self.bind == StreamBind::File && mid == self.close {
            recv_out_mut(engine)?.sink = OutSink::File(None);
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

/// The in-stream class family.
#[derive(Debug)]
pub struct InStreamClass {
    bind: StreamBind,
    errs: ClassId,
    get_line: MethodId,
    end_of_stream: MethodId,
    reset: MethodId,
    get_encoding: MethodId,
    set_text: MethodId,
    sync_with: MethodId,
    open: MethodId,
    close: MethodId,
}

impl InStreamClass {
    fn with_bind(bind: StreamBind) -> Self {
        Self {
            bind,
            errs: ClassId::BAD,
            get_line: MethodId::BAD,
            end_of_stream: MethodId::BAD,
            reset: MethodId::BAD,
            get_encoding: MethodId::BAD,
            set_text: MethodId::BAD,
            sync_with: MethodId::BAD,
            open: MethodId::BAD,
            close: MethodId::BAD,
        }
    }

    #[must_use]
    pub fn base() -> Self {
        Self::with_bind(StreamBind::Base)
    }

    #[must_use]
    pub fn console() -> Self {
        Self::with_bind(StreamBind::Console)
    }

    #[must_use]
    pub fn string() -> Self {
        Self::with_bind(StreamBind::Text)
    }

    #[must_use]
    pub fn file() -> Self {
        Self::with_bind(StreamBind::File)
    }
}

impl RuntimeClass for InStreamClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        match self.bind {
            StreamBind::Base => {
                let cls = class_shell(IN_BASE_PATH, reg.core.object, ClassExtent::Abstract);
                let id = reg.register_class(cls)?;
                self.errs = reg.register_enum(
                    "MEng.System.Runtime.TextInStream.InStrmErrs",
                    EnumDef::from_pairs(&[
                        ("NotOpen", "the stream is not open"),
                        ("OpenFailed", "the stream source could not be opened"),
                        ("WriteErr", "the write failed"),
                        ("ReadErr", "the read failed"),
                    ]),
                )?;
                reg.class_mut(id).add_nested_type(self.errs);
                let m = MethodInfo::new("GetLine", reg.core.string, MethodExtent::Final, Visibility::Public);
                self.get_line = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("EndOfStream", reg.core.boolean, MethodExtent::Final, Visibility::Public);
                self.end_of_stream = reg.class_mut(id).add_method(m.const_method())?;
                let m = MethodInfo::new("Reset", reg.core.void, MethodExtent::Final, Visibility::Public);
                self.reset = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("GetEncoding", reg.core.string, MethodExtent::Final, Visibility::Public);
                self.get_encoding = reg.class_mut(id).add_method(m.const_method())?;
                Ok(id)
            }
            StreamBind::Console => {
                let parent = base_in_id(reg)?;
                self.inherit_base_ids(reg, parent);
                let cls = class_shell(CONSOLE_IN_PATH, parent, ClassExtent::Final);
                reg.register_class(cls)
            }
            StreamBind::Text => {
                let parent = base_in_id(reg)?;
                self.inherit_base_ids(reg, parent);
                let cls = class_shell(STRING_IN_PATH, parent, ClassExtent::Final);
                let id = reg.register_class(cls)?;
                let mut m = MethodInfo::new("SetText", reg.core.void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("ToSet", reg.core.string);
                self.set_text = reg.class_mut(id).add_method(m)?;
                let string_out = reg.find_or_load(STRING_OUT_PATH)?;
                let mut m = MethodInfo::new("SyncWith", reg.core.void, MethodExtent::Final, Visibility::Public);
                m.add_inout_parm("Source", string_out);
                self.sync_with = reg.class_mut(id).add_method(m)?;
                Ok(id)
            }
            StreamBind::File => {
                let parent = base_in_id(reg)?;
                self.inherit_base_ids(reg, parent);
                let cls = class_shell(FILE_IN_PATH, parent, ClassExtent::Final);
                let id = reg.register_class(cls)?;
                let mut m = MethodInfo::new("Open", reg.core.void, MethodExtent::Final, Visibility::Public);
                m.add_in_parm("Path", reg.core.string);
                self.open = reg.class_mut(id).add_method(m)?;
                let m = MethodInfo::new("Close", reg.core.void, MethodExtent::Final, Visibility::Public);
                self.close = reg.class_mut(id).add_method(m)?;
                Ok(id)
            }
        }
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let source = match self.bind {
            StreamBind::Base => InSource::Null,
            StreamBind::Console => InSource::Console,
            StreamBind::Text => InSource::Text {
                buf: Rc::new(RefCell::new(String::new())),
                pos: 0,
            },
            StreamBind::File => InSource::File(None),
        };
        let mut value = Value::new(class_id, Payload::InStream(Box::new(InStreamVal::new(source, self.errs))));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.get_line {
            let is_console = matches!(recv_in(engine)?.source, InSource::Console);
            let line = if is_console {
                engine.console_read_line().unwrap_or_default()
            } else {
                let read = {
                    let val = recv_in_mut(engine)?;
                    match &mut val.source {
                        InSource::Text { buf, pos } => Ok(read_buffer_line(&buf.borrow(), pos)),
                        InSource::File(Some(reader)) => {
                            let mut line = String::new();
                            match reader.read_line(&mut line) {
                                Ok(_) => {
                                    while line.ends_with('\n') || line.ends_with('\r') {
                                        line.pop();
                                    }
                                    Ok(line)
                                }
                                Err(err) => Err((val.errs, ERR_READ_ERR, err.to_string())),
                            }
                        }
                        InSource::File(None) => Err((val.errs, ERR_NOT_OPEN, "the stream is not open".to_owned())),
                        InSource::Null | InSource::Console => Ok(String::new()),
                    }
                };
                match read {
                    Ok(line) => line,
                    Err((errs, ordinal, text)) => return Err(engine.throw(errs, ordinal, text)),
                }
            };
            engine.set_ret(Payload::Str(line.as_str().into()))?;
        } else if mid == self.end_of_stream {
            let at_end = match &mut recv_in_mut(engine)?.source {
                InSource::Text { buf, pos } => *pos >= buf.borrow().len(),
                InSource::File(Some(reader)) => reader.fill_buf().map_or(true, <[u8]>::is_empty),
                InSource::File(None) => true,
                InSource::Console => false,
                InSource::Null => true,
            };
            engine.set_ret(Payload::Bool(at_end))?;
        } else if mid == self.reset {
            match &mut recv_in_mut(engine)?.source {
                InSource::Text { pos, .. } => *pos = 0,
                InSource::File(reader) => {
                    if let Some(reader) = reader {
                        use std::io::Seek;
                        let _ = reader.get_mut().rewind();
                    }
                }
                InSource::Console | InSource::Null => {}
            }
        } else if mid == self.get_encoding {
            let encoding = recv_in(engine)?.encoding.clone();
            engine.set_ret(Payload::Str(encoding.as_str().into()))?;
        } else if self.bind == StreamBind::Text && mid == self.set_text {
            let text = engine.parm(0)?.as_str()?.as_str().to_owned();
            if let InSource::Text { buf, pos } = &mut recv_in_mut(engine)?.source {
                *buf.borrow_mut() = text;
                *pos = 0;
            }
        } else if self.bind == StreamBind::Text && mid == self.sync_with {
            let shared = match &engine.parm(0)?.payload {
                Payload::OutStream(out) => out.share_buffer(),
                other => {
                    return Err(RunError::internal(format!("SyncWith source is {}", other.kind_name())));
                }
            };
            let Some(shared) = shared else {
                return Err(RunError::internal("SyncWith source is not string-backed"));
            };
            recv_in_mut(engine)?.source = InSource::Text { buf: shared, pos: 0 };
        } else if self.bind == StreamBind::File && mid == self.open {
            let program_path = engine.parm(0)?.as_str()?.as_str().to_owned();
            let host_path = engine.expand_file_path(&program_path)?;
            match File::open(&host_path) {
                Ok(file) => recv_in_mut(engine)?.source = InSource::File(Some(BufReader::new(file))),
                Err(err) => {
                    let text = err.to_string();
                    engine.trace_host_error(FILE_IN_PATH, &text);
                    let errs = recv_in(engine)?.errs;
                    return Err(engine.throw(errs, ERR_OPEN_FAILED, text));
                }
            }
        } else if self.bind == StreamBind::File && mid == self.close {
            recv_in_mut(engine)?.source = InSource::File(None);
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

/// Reads the next line from a shared buffer, advancing the byte position.
fn read_buffer_line(buf: &str, pos: &mut usize) -> String {
    if *pos >= buf.len() {
        return String::new();
    }
    let rest = &buf[*pos..];
    match rest.find('\n') {
        Some(nl) => {
            let line = rest[..nl].trim_end_matches('\r').to_owned();
            *pos += nl + 1;
            line
        }
        None => {
            let line = rest.to_owned();
            *pos = buf.len();
            line
        }
    }
}

fn base_out_id(reg: &mut ClassRegistry) -> RegResult<ClassId> {
    reg.find_or_load(OUT_BASE_PATH)
}

fn base_in_id(reg: &mut ClassRegistry) -> RegResult<ClassId> {
    reg.find_or_load(IN_BASE_PATH)
}

impl OutStreamClass {
    /// Copies the base class's method ids into a derivative handler so the
    /// shared methods dispatch here when the parent handler is bypassed.
    fn inherit_base_ids(&mut self, reg: &ClassRegistry, parent: ClassId) {
        let base = reg.class(parent);
        let grab = |name: &str| base.method_by_name(name).map_or(MethodId::BAD, MethodInfo::id);
        self.write = grab("Write");
        self.write_line = grab("WriteLine");
        self.new_ln = grab("NewLn");
        self.flush = grab("Flush");
        self.get_encoding = grab("GetEncoding");
        self.set_err_action = grab("SetErrAction");
        self.set_repl_char = grab("SetReplChar");
        if let Some(errs) = base.nested_types().first() {
            self.errs = *errs;
        }
    }
}

impl InStreamClass {
    fn inherit_base_ids(&mut self, reg: &ClassRegistry, parent: ClassId) {
        let base = reg.class(parent);
        let grab = |name: &str| base.method_by_name(name).map_or(MethodId::BAD, MethodInfo::id);
        self.get_line = grab("GetLine");
        self.end_of_stream = grab("EndOfStream");
        self.reset = grab("Reset");
        self.get_encoding = grab("GetEncoding");
        if let Some(errs) = base.nested_types().first() {
            self.errs = *errs;
        }
    }
}

fn recv_out(engine: &MacroEngine) -> RunResult<&OutStreamVal> {
    match &engine.receiver()?.payload {
        Payload::OutStream(s) => Ok(s),
        other => Err(RunError::internal(format!("out-stream method on {}", other.kind_name()))),
    }
}

fn recv_out_mut(engine: &mut MacroEngine) -> RunResult<&mut OutStreamVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::OutStream(s) => Ok(s),
        other => Err(RunError::internal(format!("out-stream method on {}", other.kind_name()))),
    }
}

fn recv_in(engine: &MacroEngine) -> RunResult<&InStreamVal> {
    match &engine.receiver()?.payload {
        Payload::InStream(s) => Ok(s),
        other => Err(RunError::internal(format!("in-stream method on {}", other.kind_name()))),
    }
}

fn recv_in_mut(engine: &mut MacroEngine) -> RunResult<&mut InStreamVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::InStream(s) => Ok(s),
        other => Err(RunError::internal(format!("in-stream method on {}", other.kind_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_lines_advance() {
        let mut pos = 0;
        let buf = "one\r\ntwo\nthree";
        assert_eq!(read_buffer_line(buf, &mut pos), "one");
        assert_eq!(read_buffer_line(buf, &mut pos), "two");
        assert_eq!(read_buffer_line(buf, &mut pos), "three");
        assert_eq!(read_buffer_line(buf, &mut pos), "");
    }
}
