//! The execution engine.
//!
//! Owns the value stack, the call-frame stack, the exception slot, and the
//! validation-mode flag; drives opcode dispatch, parameter binding, and
//! dispatch-kind resolution; hosts the sandbox hooks (file resolver, console
//! binding) and the current-line tracker used by diagnostics.
//!
//! Control flow uses the result channel throughout: every opcode returns a
//! [`RunResult`], with [`RunError::Thrown`] meaning "language exception in
//! flight" — the core loop is branchless on the happy path and unwinds only
//! on the error arm.

use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    class::{MethodBody, MethodExtent, ParmDir},
    console::{ConsoleReader, ConsoleWriter, EmptyConsoleIn, StdConsole},
    error::{InvokeError, RegResult},
    except::{ExceptVal, RunError, RunResult},
    handler::ErrHandler,
    id::{ClassId, EnumOrdinal, MethodId},
    opcode::{CallTarget, DispatchKind, Imm, OpCode, OpMethod},
    registry::{ClassRegistry, CoreIds},
    resolver::{FileResolver, ResolveError},
    runtime::{self, EngErrIds, NativeCall, NativeResult},
    stack::{StackKind, Target, ValueStack},
    trace::{EngineTracer, NoopTracer},
    value::{AssignError, Payload, Value},
};

/// Canonical extension for macro class files, exposed so host tooling can
/// present consistent file dialogs.
pub const MACRO_FILE_EXT: &str = "mengc";

/// Description string that pairs with [`MACRO_FILE_EXT`].
pub const MACRO_FILE_DESCR: &str = "Macro Language Classes";

/// Engine version triplet surfaced through `MEng.BaseInfo`.
pub const ENGINE_VERSION: (u32, u32, u32) = (2, 0, 0);

/// Call frames deeper than this abort the invocation; a runaway recursion in
/// the program would otherwise exhaust the host stack through nested native
/// calls.
const MAX_FRAMES: usize = 1024;

/// Per-class cap on pooled temp values.
const POOL_CAP: usize = 16;

/// What the host gets back from [`MacroEngine::invoke`].
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The entry method returned; the value is the return slot's.
    Return(Value),
    /// An exception reached the top uncaught. It was already delivered to
    /// the installed error handler before `invoke` returned.
    UnhandledException(ExceptVal),
}

/// One call frame.
#[derive(Debug)]
pub(crate) struct StackFrame {
    /// Dynamic class of the receiver.
    pub class_id: ClassId,
    /// Class defining the executing body; names the throw site.
    pub def_class: ClassId,
    pub method_id: MethodId,
    /// Opcode body, or `None` while a native method runs.
    pub body: Option<Arc<OpMethod>>,
    pub ip: usize,
    /// Absolute stack index of the caller-pushed return slot.
    pub ret_slot: usize,
    /// Absolute stack index of the first parameter.
    pub parm_base: usize,
    pub parm_dirs: SmallVec<[ParmDir; 4]>,
    /// Absolute stack index of the first local.
    pub local_base: usize,
    pub receiver: Target,
    /// The caller's current line, restored on return.
    pub caller_line: u32,
    /// Try-frame depth at entry; everything above unwinds with the frame.
    pub try_base: usize,
}

/// An open try scope.
#[derive(Debug, Clone)]
struct TryFrame {
    /// `frames.len()` when the Try opcode ran; the handler lives in
    /// `frames[frame_depth - 1]`.
    frame_depth: usize,
    stack_depth: usize,
    catch_ip: u32,
}

/// The macro engine: one independently executing interpreter instance.
///
/// Engines share no mutable state; a host may run several on separate
/// threads. Everything — registry, stack, exception slot, sandbox hooks —
/// lives inside the instance.
pub struct MacroEngine {
    registry: ClassRegistry,
    stack: ValueStack,
    frames: Vec<StackFrame>,
    tries: Vec<TryFrame>,
    except: Option<Box<ExceptVal>>,
    /// True from a throw until the exception is caught or delivered. The
    /// slot itself may keep the caught value until the catch copies it out.
    except_flight: bool,
    validation: bool,
    debug_mode: bool,
    cur_line: u32,
    pools: AHashMap<ClassId, Vec<Value>>,
    resolver: Option<Box<dyn FileResolver>>,
    err_handler: Option<Box<dyn ErrHandler>>,
    tracer: Box<dyn EngineTracer>,
    console_out: Box<dyn ConsoleWriter>,
    console_in: Box<dyn ConsoleReader>,
    /// Inline cache for polymorphic call sites, keyed on (body identity,
    /// opcode index, receiver class); the value is the defining class the
    /// parent-chain walk resolved to.
    poly_cache: AHashMap<(usize, usize, ClassId), ClassId>,
    eng_errs: EngErrIds,
}

impl MacroEngine {
    /// Builds an engine with all intrinsics registered and the default
    /// class loader installed.
    pub fn new() -> RegResult<Self> {
        let mut registry = ClassRegistry::new();
        let eng_errs = runtime::register_intrinsics(&mut registry)?;
        Ok(Self {
            registry,
            stack: ValueStack::new(),
            frames: Vec::new(),
            tries: Vec::new(),
            except: None,
            except_flight: false,
            validation: false,
            debug_mode: false,
            cur_line: 0,
            pools: AHashMap::new(),
            resolver: None,
            err_handler: None,
            tracer: Box::new(NoopTracer),
            console_out: Box::new(StdConsole::default()),
            console_in: Box::new(EmptyConsoleIn),
            poly_cache: AHashMap::new(),
            eng_errs,
        })
    }

    // ----- configuration -----

    #[must_use]
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClassRegistry {
        &mut self.registry
    }

    /// The well-known class ids cached at construction.
    #[inline]
    #[must_use]
    pub fn core(&self) -> CoreIds {
        self.registry.core
    }

    /// The engine's own error-enum ids.
    #[inline]
    #[must_use]
    pub fn eng_errs(&self) -> EngErrIds {
        self.eng_errs
    }

    /// Validation mode: when true, every copy and call binding checks class
    /// ids strictly. The parser-level validator turns it on; release runs
    /// leave it off.
    #[must_use]
    pub fn validation(&self) -> bool {
        self.validation
    }

    pub fn set_validation(&mut self, on: bool) {
        self.validation = on;
    }

    /// Debug-mode flag observable from programs via `MEng.BaseInfo`.
    #[must_use]
    pub fn in_debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn set_debug_mode(&mut self, on: bool) {
        self.debug_mode = on;
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn FileResolver>) {
        self.resolver = Some(resolver);
    }

    pub fn set_err_handler(&mut self, handler: Box<dyn ErrHandler>) {
        self.err_handler = Some(handler);
    }

    /// Removes and returns the installed error handler, if any.
    pub fn take_err_handler(&mut self) -> Option<Box<dyn ErrHandler>> {
        self.err_handler.take()
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn EngineTracer>) {
        self.tracer = tracer;
    }

    pub fn set_console_writer(&mut self, writer: Box<dyn ConsoleWriter>) {
        self.console_out = writer;
    }

    /// Removes the console writer, leaving a fresh stdout writer installed.
    pub fn take_console_writer(&mut self) -> Box<dyn ConsoleWriter> {
        std::mem::replace(&mut self.console_out, Box::new(StdConsole::default()))
    }

    pub fn set_console_reader(&mut self, reader: Box<dyn ConsoleReader>) {
        self.console_in = reader;
    }

    pub(crate) fn console_write(&mut self, text: &str) {
        self.console_out.write_text(text);
    }

    pub(crate) fn console_flush(&mut self) {
        self.console_out.flush();
    }

    pub(crate) fn console_read_line(&mut self) -> Option<String> {
        self.console_in.read_line()
    }

    pub(crate) fn trace_host_error(&mut self, class_path: &str, text: &str) {
        self.tracer.host_error(class_path, text);
    }

    /// Current source line, as maintained by `CurLine` opcodes.
    #[inline]
    #[must_use]
    pub fn cur_line(&self) -> u32 {
        self.cur_line
    }

    /// The in-flight exception, if one exists.
    #[must_use]
    pub fn exception(&self) -> Option<&ExceptVal> {
        self.except.as_deref()
    }

    /// Clears the exception slot. Hosts that call sandbox or value services
    /// directly (outside `invoke`) use this after consuming a failure.
    pub fn clear_exception(&mut self) {
        self.except = None;
        self.except_flight = false;
    }

    // ----- sandbox -----

    /// Expands a program path to a host path through the installed resolver.
    /// Raises `BadExpPath` on escape or when no resolver is installed.
    pub fn expand_file_path(&mut self, program_path: &str) -> RunResult<String> {
        let Some(resolver) = &self.resolver else {
            return Err(self.throw_eng(|e| e.bad_exp_path, "no file resolver is installed"));
        };
        match resolver.expand_path(program_path) {
            Ok(path) => Ok(path),
            Err(ResolveError::BadExpPath | ResolveError::CantConvertPath) => {
                Err(self.throw_eng(|e| e.bad_exp_path, format!("'{program_path}' escapes the file sandbox")))
            }
        }
    }

    /// Contracts a host path to its program-visible form. Raises
    /// `CantConvertPath` for paths outside the sandbox base.
    pub fn contract_file_path(&mut self, host_path: &str) -> RunResult<String> {
        let Some(resolver) = &self.resolver else {
            return Err(self.throw_eng(|e| e.cant_convert_path, "no file resolver is installed"));
        };
        match resolver.contract_path(host_path) {
            Ok(path) => Ok(path),
            Err(_) => Err(self.throw_eng(
                |e| e.cant_convert_path,
                format!("'{host_path}' is outside the file sandbox"),
            )),
        }
    }

    // ----- exceptions -----

    /// Raises a language exception keyed by an enum class and ordinal. The
    /// returned error is always `RunError::Thrown`.
    pub fn throw(&mut self, err_class: ClassId, ordinal: EnumOrdinal, text: impl Into<String>) -> RunError {
        // Single-slot invariant: re-entering before the previous exception
        // was caught or delivered is an engine bug.
        debug_assert!(!self.except_flight, "exception already in flight");
        self.except_flight = true;
        let mut text = text.into();
        let mut name = String::new();
        if let Some(cls) = self.registry.try_class(err_class) {
            if let Some(def) = &cls.enum_def {
                if let Some(item) = def.item(ordinal) {
                    name.clone_from(&item.name);
                    if text.is_empty() {
                        text.clone_from(&item.text);
                    }
                }
            }
        }
        let src_class_path = self
            .frames
            .last()
            .map_or_else(String::new, |f| self.registry.class(f.def_class).path().to_owned());
        self.except = Some(Box::new(ExceptVal {
            src_class_path,
            err_class: Some(err_class),
            ordinal,
            err_name: name,
            err_text: text,
            line: self.cur_line,
        }));
        RunError::Thrown
    }

    /// Raises one of the engine's own errors.
    pub fn throw_eng(&mut self, pick: impl FnOnce(&EngErrIds) -> EnumOrdinal, text: impl Into<String>) -> RunError {
        let class_id = self.eng_errs.class_id;
        let ordinal = pick(&self.eng_errs);
        self.throw(class_id, ordinal, text)
    }

    // ----- value services -----

    /// Builds a default-constructed value of the given class: native classes
    /// get their storage from the nearest handler up the chain, program
    /// classes get their flattened member list, each member default-built
    /// recursively.
    pub fn make_new_value(&mut self, class_id: ClassId, is_const: bool) -> RunResult<Value> {
        let object = self.registry.core.object;
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            if id == object {
                break;
            }
            if let Some(handler) = self.registry.handler(id) {
                return Ok(handler.make_storage(class_id, is_const));
            }
            cursor = self.registry.class(id).parent();
        }
        // Program-defined class: flatten member descriptors root-to-leaf.
        let mut chain = Vec::new();
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.registry.class(id).parent();
        }
        let mut members = Vec::new();
        for id in chain.into_iter().rev() {
            let descrs: Vec<(ClassId, bool)> = self
                .registry
                .class(id)
                .members()
                .iter()
                .map(|m| (m.class_id, m.is_const))
                .collect();
            for (member_class, member_const) in descrs {
                members.push(self.make_new_value(member_class, member_const)?);
            }
        }
        let mut value = Value::new(class_id, Payload::Members(members));
        value.set_const(is_const);
        Ok(value)
    }

    /// Takes a pooled temp of the given class, or builds one. Pool values
    /// back the transient targets of arithmetic and formatting opcodes.
    fn pooled(&mut self, class_id: ClassId) -> RunResult<Value> {
        if let Some(pool) = self.pools.get_mut(&class_id) {
            if let Some(value) = pool.pop() {
                return Ok(value);
            }
        }
        self.make_new_value(class_id, false)
    }

    /// Recycles an owned value back into its class's pool when its payload
    /// supports cheap reuse.
    fn recycle(&mut self, mut value: Value) {
        let reusable = match &mut value.payload {
            Payload::Bool(v) => {
                *v = false;
                true
            }
            Payload::Card1(v) => {
                *v = 0;
                true
            }
            Payload::Card2(v) => {
                *v = 0;
                true
            }
            Payload::Card4(v) => {
                *v = 0;
                true
            }
            Payload::Card8(v) => {
                *v = 0;
                true
            }
            Payload::Int1(v) => {
                *v = 0;
                true
            }
            Payload::Int2(v) => {
                *v = 0;
                true
            }
            Payload::Int4(v) => {
                *v = 0;
                true
            }
            Payload::Float4(v) => {
                *v = 0.0;
                true
            }
            Payload::Float8(v) => {
                *v = 0.0;
                true
            }
            Payload::Char(v) => {
                *v = '\0';
                true
            }
            Payload::Str(s) => {
                s.clear();
                true
            }
            Payload::Enum(v) => {
                *v = 0;
                true
            }
            Payload::Void => true,
            _ => false,
        };
        if reusable {
            value.set_const(false);
            let pool = self.pools.entry(value.class_id()).or_default();
            if pool.len() < POOL_CAP {
                pool.push(value);
            }
        }
    }

    // ----- native-method ABI -----

    fn frame(&self) -> RunResult<&StackFrame> {
        self.frames.last().ok_or_else(|| RunError::internal("no active frame"))
    }

    /// The stack target of the current call's receiver, for services that
    /// need to re-address it (formatting, nested calls).
    pub fn current_receiver_target(&self) -> RunResult<Target> {
        Ok(self.frame()?.receiver.clone())
    }

    /// The receiver of the current native call.
    pub fn receiver(&self) -> RunResult<&Value> {
        let target = self.frame()?.receiver.clone();
        self.stack.value(&target)
    }

    /// Mutable receiver access. Const enforcement happened at call binding.
    pub fn receiver_mut(&mut self) -> RunResult<&mut Value> {
        let target = self.frame()?.receiver.clone();
        self.stack.value_mut(&target)
    }

    /// The normalized stack target of the i-th parameter, for services that
    /// need to re-address it (formatting, nested calls).
    pub fn current_parm_target(&self, index: usize) -> RunResult<Target> {
        let frame = self.frame()?;
        if index >= frame.parm_dirs.len() {
            return Err(RunError::internal(format!("bad parm index {index}")));
        }
        self.stack.resolve(frame.parm_base + index)
    }

    /// Reads the i-th parameter of the current call.
    pub fn parm(&self, index: usize) -> RunResult<&Value> {
        let frame = self.frame()?;
        if index >= frame.parm_dirs.len() {
            return Err(RunError::internal(format!("bad parm index {index}")));
        }
        let target = self.stack.resolve(frame.parm_base + index)?;
        self.stack.value(&target)
    }

    /// Writes through the i-th parameter, which must be out or inout.
    pub fn parm_mut(&mut self, index: usize) -> RunResult<&mut Value> {
        let frame = self.frame()?;
        if index >= frame.parm_dirs.len() {
            return Err(RunError::internal(format!("bad parm index {index}")));
        }
        if frame.parm_dirs[index] == ParmDir::In {
            return Err(RunError::internal(format!("parm {index} is an in-parameter")));
        }
        let target = self.stack.resolve(frame.parm_base + index)?;
        self.stack.value_mut(&target)
    }

    /// Replaces the return slot's payload.
    pub fn set_ret(&mut self, payload: Payload) -> RunResult<()> {
        let slot = self.frame()?.ret_slot;
        let target = self.stack.resolve(slot)?;
        self.stack.value_mut(&target)?.payload = payload;
        Ok(())
    }

    /// Reads the value a normalized target names.
    pub(crate) fn stack_value(&self, target: &Target) -> RunResult<&Value> {
        self.stack.value(target)
    }

    /// Mutable access to the value a normalized target names.
    pub(crate) fn stack_value_mut(&mut self, target: &Target) -> RunResult<&mut Value> {
        self.stack.value_mut(target)
    }

    // ----- diagnostics -----

    /// Starts a stack-dump walk at the most recent frame.
    #[must_use]
    pub fn top_frame_cursor(&self) -> usize {
        self.frames.len()
    }

    /// Formats the next call frame, walking downward. Returns `None` when
    /// the walk is exhausted.
    #[must_use]
    pub fn format_next_call_frame(&self, cursor: &mut usize) -> Option<String> {
        while *cursor > 0 {
            *cursor -= 1;
            let frame = &self.frames[*cursor];
            let line = if *cursor + 1 == self.frames.len() {
                self.cur_line
            } else {
                self.frames[*cursor + 1].caller_line
            };
            let cls = self.registry.class(frame.def_class);
            let method = cls
                .method_by_id(frame.method_id)
                .or_else(|| self.registry.resolve_method(frame.class_id, frame.method_id).map(|(_, m)| m))
                .map_or("?", |m| m.name());
            return Some(format!("  {}.{} (line {})", cls.path(), method, line));
        }
        None
    }

    // ----- invocation -----

    /// Host entry point: constructs a value of the target class and invokes
    /// the named method on it with the given in-parameters.
    ///
    /// An unhandled exception is delivered to the installed error handler
    /// before this returns; the host then sees the
    /// [`InvokeOutcome::UnhandledException`] flag rather than an error.
    pub fn invoke(
        &mut self,
        class_path: &str,
        method_name: &str,
        parms: Vec<Value>,
    ) -> Result<InvokeOutcome, InvokeError> {
        let class_id = self.registry.find_or_load(class_path)?;
        let Some((_, info)) = self.registry.find_method(class_id, method_name) else {
            return Err(InvokeError::NoSuchMethod {
                class: class_path.to_owned(),
                method: method_name.to_owned(),
            });
        };
        if info.parm_count() != parms.len() {
            return Err(InvokeError::BadParmCount {
                expected: info.parm_count(),
                got: parms.len(),
            });
        }
        let method_id = info.id();
        let ret_class = info.ret_class;
        let base_frames = self.frames.len();
        let base_stack = self.stack.depth();
        self.cur_line = 0;

        let result = self.invoke_inner(class_id, method_id, ret_class, parms, base_frames);
        match result {
            Ok(ret) => Ok(InvokeOutcome::Return(ret)),
            Err(RunError::Thrown) => {
                let except = self.except.take().map(|b| *b).unwrap_or_default();
                self.except_flight = false;
                self.tracer.unhandled(&except);
                if let Some(mut handler) = self.err_handler.take() {
                    handler.macro_exception(&except, self);
                    self.err_handler = Some(handler);
                }
                self.frames.truncate(base_frames);
                self.tries.clear();
                self.stack.truncate(base_stack);
                Ok(InvokeOutcome::UnhandledException(except))
            }
            Err(RunError::Internal(msg)) => {
                if let Some(mut handler) = self.err_handler.take() {
                    handler.engine_fault(&msg, self);
                    self.err_handler = Some(handler);
                }
                self.frames.truncate(base_frames);
                self.tries.clear();
                self.stack.truncate(base_stack);
                Err(InvokeError::Internal(msg))
            }
        }
    }

    fn invoke_inner(
        &mut self,
        class_id: ClassId,
        method_id: MethodId,
        ret_class: ClassId,
        parms: Vec<Value>,
        base_frames: usize,
    ) -> RunResult<Value> {
        // Call region: [receiver][return][parms...]
        let receiver = self.make_new_value(class_id, false)?;
        let recv_slot = self.stack.push_owned(StackKind::Temp, receiver);
        let ret = self.pooled(ret_class)?;
        self.stack.push_owned(StackKind::Return, ret);
        let parm_count = parms.len();
        for parm in parms {
            self.stack.push_owned(StackKind::Parm(ParmDir::In), parm);
        }
        self.begin_call(Target::slot(recv_slot), class_id, method_id, DispatchKind::Poly, parm_count)?;
        self.run_to_depth(base_frames)?;
        // Stack now: [receiver][return]
        let ret_item = self.stack.pop()?;
        let ret = match ret_item.cell {
            crate::stack::Cell::Owned(value) => value,
            crate::stack::Cell::Repush(_) => return Err(RunError::internal("return slot was not owned")),
        };
        let recv_item = self.stack.pop()?;
        if let crate::stack::Cell::Owned(value) = recv_item.cell {
            self.recycle(value);
        }
        Ok(ret)
    }

    /// Runs frames until the stack returns to the given depth.
    pub(crate) fn run_to_depth(&mut self, base_frames: usize) -> RunResult<()> {
        while self.frames.len() > base_frames {
            if let Err(err) = self.step() {
                match err {
                    RunError::Thrown => self.unwind_throw(base_frames)?,
                    fault @ RunError::Internal(_) => return Err(fault),
                }
            }
        }
        Ok(())
    }

    /// Unwinds the in-flight exception to the innermost enclosing try scope,
    /// or propagates `Thrown` when none encloses it within this invocation.
    fn unwind_throw(&mut self, base_frames: usize) -> RunResult<()> {
        let Some(tf) = self.tries.last().cloned() else {
            return Err(RunError::Thrown);
        };
        if tf.frame_depth <= base_frames {
            // The try belongs to an outer invocation.
            return Err(RunError::Thrown);
        }
        self.tries.pop();
        while self.frames.len() > tf.frame_depth {
            let frame = self.frames.pop().expect("frame count checked");
            self.cur_line = frame.caller_line;
            self.tries.truncate(frame.try_base.min(self.tries.len()));
        }
        self.pop_to_depth(tf.stack_depth);
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| RunError::internal("try frame without a call frame"))?;
        frame.ip = tf.catch_ip as usize;
        // Caught: the value stays in the slot for the catch block to copy
        // out, but it is no longer in flight.
        self.except_flight = false;
        Ok(())
    }

    /// Pops stack items down to a depth, recycling owned values.
    fn pop_to_depth(&mut self, depth: usize) {
        while self.stack.depth() > depth {
            if let Ok(item) = self.stack.pop() {
                if let crate::stack::Cell::Owned(value) = item.cell {
                    self.recycle(value);
                }
            }
        }
    }

    /// Executes one opcode of the top frame.
    fn step(&mut self) -> RunResult<()> {
        let frame = self.frames.last_mut().ok_or_else(|| RunError::internal("no frame"))?;
        let Some(body) = frame.body.clone() else {
            return Err(RunError::internal("step on a native frame"));
        };
        let Some(&op) = body.ops().get(frame.ip) else {
            return Err(RunError::internal("ran off the end of the opcode stream"));
        };
        frame.ip += 1;
        match op {
            OpCode::NoOp => Ok(()),
            OpCode::CurLine(line) => {
                self.cur_line = line;
                Ok(())
            }
            OpCode::PushImm(imm) => self.push_imm(imm),
            OpCode::PushStrPool(index) => {
                let text = body
                    .pool_str(index)
                    .ok_or_else(|| RunError::internal(format!("bad string pool index {index}")))?
                    .to_owned();
                let mut value = self.pooled(self.registry.core.string)?;
                value.as_str_mut()?.set_text(&text)?;
                self.stack.push_owned(StackKind::Temp, value);
                Ok(())
            }
            OpCode::PushEnum { class_id, ordinal } => {
                self.stack
                    .push_owned(StackKind::Temp, Value::new(class_id, Payload::Enum(ordinal)));
                Ok(())
            }
            OpCode::PushLocal(index) => {
                let frame = self.frame()?;
                let slot = frame.local_base + usize::from(index);
                self.stack.push_repush(StackKind::Local, Target::slot(slot));
                Ok(())
            }
            OpCode::PushParm(index) => {
                let frame = self.frame()?;
                let dir = *frame
                    .parm_dirs
                    .get(usize::from(index))
                    .ok_or_else(|| RunError::internal(format!("bad parm index {index}")))?;
                let slot = frame.parm_base + usize::from(index);
                self.stack.push_repush(StackKind::Parm(dir), Target::slot(slot));
                Ok(())
            }
            OpCode::PushMember(index) => {
                let target = self.frame()?.receiver.member(index);
                self.stack.push_repush(StackKind::Member, target);
                Ok(())
            }
            OpCode::PushPool(class_id) => {
                let value = self.pooled(class_id)?;
                self.stack.push_owned(StackKind::Temp, value);
                Ok(())
            }
            OpCode::PushRet(class_id) => {
                let value = self.pooled(class_id)?;
                self.stack.push_owned(StackKind::Return, value);
                Ok(())
            }
            OpCode::Pop => {
                let item = self.stack.pop()?;
                if let crate::stack::Cell::Owned(value) = item.cell {
                    self.recycle(value);
                }
                Ok(())
            }
            OpCode::MultiPop(count) => {
                for _ in 0..count {
                    let item = self.stack.pop()?;
                    if let crate::stack::Cell::Owned(value) = item.cell {
                        self.recycle(value);
                    }
                }
                Ok(())
            }
            OpCode::Assign => self.op_assign(),
            OpCode::CastTo(target_class) => self.op_cast(target_class),
            OpCode::Call {
                class_id,
                method,
                kind,
                target,
                parm_count,
            } => {
                let call_ip = self.frame()?.ip - 1;
                let body_key = Arc::as_ptr(&body) as usize;
                self.op_call(class_id, method, kind, target, usize::from(parm_count), body_key, call_ip)
            }
            OpCode::SetRet => self.op_set_ret(),
            OpCode::Return => self.op_return(),
            OpCode::Jump(ip) => {
                self.frames.last_mut().expect("frame exists").ip = ip as usize;
                Ok(())
            }
            OpCode::JumpIfFalse(ip) => {
                if !self.pop_bool()? {
                    self.frames.last_mut().expect("frame exists").ip = ip as usize;
                }
                Ok(())
            }
            OpCode::JumpIfTrue(ip) => {
                if self.pop_bool()? {
                    self.frames.last_mut().expect("frame exists").ip = ip as usize;
                }
                Ok(())
            }
            OpCode::Try(catch_ip) => {
                // Entering a try clears any stale exception value.
                self.except = None;
                self.except_flight = false;
                self.tries.push(TryFrame {
                    frame_depth: self.frames.len(),
                    stack_depth: self.stack.depth(),
                    catch_ip,
                });
                Ok(())
            }
            OpCode::EndTry => {
                let Some(tf) = self.tries.last() else {
                    return Err(RunError::internal("EndTry with no open try scope"));
                };
                if tf.frame_depth != self.frames.len() {
                    return Err(RunError::internal("EndTry crosses a frame boundary"));
                }
                self.tries.pop();
                Ok(())
            }
            OpCode::Throw => self.op_throw(),
            OpCode::StoreExcept => self.op_store_except(),
        }
    }

    fn push_imm(&mut self, imm: Imm) -> RunResult<()> {
        let core = self.registry.core;
        let (class_id, payload) = match imm {
            Imm::Bool(v) => (core.boolean, Payload::Bool(v)),
            Imm::Card1(v) => (core.card1, Payload::Card1(v)),
            Imm::Card2(v) => (core.card2, Payload::Card2(v)),
            Imm::Card4(v) => (core.card4, Payload::Card4(v)),
            Imm::Card8(v) => (core.card8, Payload::Card8(v)),
            Imm::Int1(v) => (core.int1, Payload::Int1(v)),
            Imm::Int2(v) => (core.int2, Payload::Int2(v)),
            Imm::Int4(v) => (core.int4, Payload::Int4(v)),
            Imm::Float4(v) => (core.float4, Payload::Float4(v)),
            Imm::Float8(v) => (core.float8, Payload::Float8(v)),
            Imm::Char(v) => (core.char, Payload::Char(v)),
        };
        self.stack.push_owned(StackKind::Temp, Value::new(class_id, payload));
        Ok(())
    }

    fn pop_bool(&mut self) -> RunResult<bool> {
        let item = self.stack.pop()?;
        match item.cell {
            crate::stack::Cell::Owned(value) => {
                let result = value.as_bool();
                self.recycle(value);
                result
            }
            crate::stack::Cell::Repush(target) => {
                let resolved = self.resolve_full(&target)?;
                self.stack.value(&resolved)?.as_bool()
            }
        }
    }

    /// Normalizes a target whose base slot may itself be a repush.
    fn resolve_full(&self, target: &Target) -> RunResult<Target> {
        let base = self.stack.resolve(target.slot)?;
        if target.path.is_empty() {
            return Ok(base);
        }
        let mut path = base.path.clone();
        path.extend(target.path.iter().copied());
        Ok(Target { slot: base.slot, path })
    }

    fn op_assign(&mut self) -> RunResult<()> {
        let src_item = self.stack.pop()?;
        let tar_item = self.stack.pop()?;
        let tar_kind = tar_item.kind;
        let tar_target = match tar_item.cell {
            crate::stack::Cell::Repush(t) => self.resolve_full(&t)?,
            crate::stack::Cell::Owned(_) => {
                return Err(RunError::internal("assignment target is not an lvalue"));
            }
        };
        if tar_kind == StackKind::Parm(ParmDir::In) {
            return Err(self.throw_eng(|e| e.const_violation, "in-parameters cannot be assigned to"));
        }
        let src = match src_item.cell {
            crate::stack::Cell::Owned(value) => value,
            crate::stack::Cell::Repush(t) => {
                let resolved = self.resolve_full(&t)?;
                let src_ref = self.stack.value(&resolved)?;
                match src_ref.try_clone() {
                    Some(value) => value,
                    None => {
                        return Err(self.throw_eng(|e| e.not_copyable, "this value cannot be copied"));
                    }
                }
            }
        };
        let result = self.stack.value_mut(&tar_target)?.assign_from(&src);
        self.recycle(src);
        match result {
            Ok(()) => Ok(()),
            Err(AssignError::ConstTarget) => {
                Err(self.throw_eng(|e| e.const_violation, "the assignment target is const"))
            }
            Err(AssignError::ClassMismatch) => {
                Err(self.throw_eng(|e| e.not_copyable, "assignment between unrelated classes"))
            }
            Err(AssignError::NotCopyable) => Err(self.throw_eng(|e| e.not_copyable, "this value cannot be copied")),
        }
    }

    fn op_cast(&mut self, target_class: ClassId) -> RunResult<()> {
        let item = self.stack.pop()?;
        let payload = {
            let value = match &item.cell {
                crate::stack::Cell::Owned(value) => value,
                crate::stack::Cell::Repush(t) => {
                    let resolved = self.resolve_full(t)?;
                    self.stack.value(&resolved)?
                }
            };
            value.cast_payload(target_class, &self.registry.core)
        };
        if let crate::stack::Cell::Owned(value) = item.cell {
            self.recycle(value);
        }
        match payload {
            Some(payload) => {
                self.stack.push_owned(StackKind::Temp, Value::new(target_class, payload));
                Ok(())
            }
            None => {
                let path = self.registry.class(target_class).path().to_owned();
                Err(self.throw_eng(|e| e.bad_cast, format!("the value cannot be cast to {path}")))
            }
        }
    }

    fn op_set_ret(&mut self) -> RunResult<()> {
        let src_item = self.stack.pop()?;
        let ret_slot = self.frame()?.ret_slot;
        let ret_target = self.stack.resolve(ret_slot)?;
        let payload = match src_item.cell {
            crate::stack::Cell::Owned(value) => {
                let payload = value.payload.try_clone();
                self.recycle(value);
                payload
            }
            crate::stack::Cell::Repush(t) => {
                let resolved = self.resolve_full(&t)?;
                self.stack.value(&resolved)?.payload.try_clone()
            }
        };
        let Some(payload) = payload else {
            return Err(self.throw_eng(|e| e.not_copyable, "this value cannot be returned by value"));
        };
        self.stack.value_mut(&ret_target)?.payload = payload;
        Ok(())
    }

    fn op_return(&mut self) -> RunResult<()> {
        let frame = self.frames.pop().ok_or_else(|| RunError::internal("return with no frame"))?;
        self.tries.truncate(frame.try_base.min(self.tries.len()));
        self.pop_to_depth(frame.ret_slot + 1);
        self.cur_line = frame.caller_line;
        Ok(())
    }

    fn op_throw(&mut self) -> RunResult<()> {
        let item = self.stack.pop()?;
        let (class_id, ordinal) = {
            let value = match &item.cell {
                crate::stack::Cell::Owned(value) => value,
                crate::stack::Cell::Repush(t) => {
                    let resolved = self.resolve_full(t)?;
                    self.stack.value(&resolved)?
                }
            };
            (value.class_id(), value.as_enum()?)
        };
        if let crate::stack::Cell::Owned(value) = item.cell {
            self.recycle(value);
        }
        Err(self.throw(class_id, ordinal, ""))
    }

    fn op_store_except(&mut self) -> RunResult<()> {
        let item = self.stack.pop()?;
        let target = match item.cell {
            crate::stack::Cell::Repush(t) => self.resolve_full(&t)?,
            crate::stack::Cell::Owned(_) => {
                return Err(RunError::internal("StoreExcept target is not an lvalue"));
            }
        };
        let except = self
            .except
            .take()
            .ok_or_else(|| RunError::internal("StoreExcept with no exception in flight"))?;
        self.stack.value_mut(&target)?.payload = Payload::Except(except);
        Ok(())
    }

    #[expect(clippy::too_many_arguments, reason = "call decoding hands everything through")]
    fn op_call(
        &mut self,
        class_id: ClassId,
        method: MethodId,
        kind: DispatchKind,
        target: CallTarget,
        parm_count: usize,
        body_key: usize,
        call_ip: usize,
    ) -> RunResult<()> {
        let frame = self.frame()?;
        let recv_target = match target {
            CallTarget::This => frame.receiver.clone(),
            CallTarget::Local(i) => Target::slot(frame.local_base + usize::from(i)),
            CallTarget::Parm(i) => Target::slot(frame.parm_base + usize::from(i)),
            CallTarget::Member(i) => frame.receiver.member(i),
            CallTarget::Stack => {
                let below = self
                    .stack
                    .depth()
                    .checked_sub(parm_count + 2)
                    .ok_or_else(|| RunError::internal("no receiver below the call region"))?;
                Target::slot(below)
            }
        };
        let recv_target = self.resolve_full(&recv_target)?;
        self.begin_call_cached(recv_target, class_id, method, kind, parm_count, Some((body_key, call_ip)))
    }

    /// Binds and enters a call whose region (return slot + parameters) is on
    /// the stack.
    pub(crate) fn begin_call(
        &mut self,
        recv_target: Target,
        class_id: ClassId,
        method: MethodId,
        kind: DispatchKind,
        parm_count: usize,
    ) -> RunResult<()> {
        self.begin_call_cached(recv_target, class_id, method, kind, parm_count, None)
    }

    fn begin_call_cached(
        &mut self,
        recv_target: Target,
        class_id: ClassId,
        method: MethodId,
        kind: DispatchKind,
        parm_count: usize,
        call_site: Option<(usize, usize)>,
    ) -> RunResult<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RunError::internal("call stack overflow"));
        }
        let recv = self.stack.value(&recv_target)?;
        let recv_class = recv.class_id();
        let recv_const = recv.is_const();

        // Resolve the body per dispatch kind, consulting the inline cache
        // for polymorphic sites.
        let lookup_class = match kind {
            DispatchKind::Direct => class_id,
            DispatchKind::Poly | DispatchKind::Required => recv_class,
        };
        let def_class = if let Some((body_key, ip)) = call_site {
            if kind == DispatchKind::Direct {
                self.resolve_def_class(lookup_class, method)?
            } else if let Some(&cached) = self.poly_cache.get(&(body_key, ip, recv_class)) {
                cached
            } else {
                let resolved = self.resolve_def_class(lookup_class, method)?;
                self.poly_cache.insert((body_key, ip, recv_class), resolved);
                resolved
            }
        } else {
            self.resolve_def_class(lookup_class, method)?
        };
        let info = self
            .registry
            .class(def_class)
            .method_by_id(method)
            .ok_or_else(|| RunError::internal("resolved method vanished"))?;

        if kind == DispatchKind::Required && info.extent == MethodExtent::Required {
            return Err(RunError::internal(format!(
                "required method '{}' has no override on {}",
                info.name(),
                self.registry.class(recv_class).path()
            )));
        }
        if recv_const && !info.is_const {
            let name = info.name().to_owned();
            return Err(self.throw_eng(
                |e| e.const_violation,
                format!("cannot call non-const method '{name}' on a const value"),
            ));
        }
        if info.parm_count() != parm_count {
            return Err(RunError::internal(format!(
                "call pushed {parm_count} parms, method '{}' takes {}",
                info.name(),
                info.parm_count()
            )));
        }
        let parm_base = self.stack.depth() - parm_count;
        let ret_slot = parm_base - 1;
        if self.stack.kind_at(ret_slot)? != StackKind::Return {
            return Err(RunError::internal("no return slot below the parameters"));
        }
        let parm_dirs: SmallVec<[ParmDir; 4]> = info.parms().iter().map(|p| p.dir).collect();

        if self.validation {
            self.validate_binding(def_class, method, parm_base)?;
        }

        let body = info.body.clone();
        let is_native = matches!(body, MethodBody::Native);
        let frame = StackFrame {
            class_id: recv_class,
            def_class,
            method_id: method,
            body: match &body {
                MethodBody::Opcodes(ops) => Some(ops.clone()),
                MethodBody::Native => None,
            },
            ip: 0,
            ret_slot,
            parm_base,
            parm_dirs,
            local_base: self.stack.depth(),
            receiver: recv_target,
            caller_line: self.cur_line,
            try_base: self.tries.len(),
        };
        self.frames.push(frame);

        if is_native {
            let result = self.dispatch_native(def_class, method);
            match result {
                Ok(()) => {
                    let frame = self.frames.pop().expect("native frame");
                    self.pop_to_depth(frame.ret_slot + 1);
                    self.cur_line = frame.caller_line;
                    Ok(())
                }
                // Leave the frame in place: the unwinder pops it and the
                // stack dump can still see it.
                Err(err) => Err(err),
            }
        } else {
            // Push default-constructed locals above the frame base.
            let local_classes: Vec<(ClassId, bool)> = match &body {
                MethodBody::Opcodes(ops) => ops.locals().iter().map(|l| (l.class_id, l.is_const)).collect(),
                MethodBody::Native => Vec::new(),
            };
            for (local_class, is_const) in local_classes {
                let mut value = self.pooled(local_class)?;
                value.set_const(is_const);
                self.stack.push_owned(StackKind::Local, value);
            }
            Ok(())
        }
    }

    fn resolve_def_class(&self, class_id: ClassId, method: MethodId) -> RunResult<ClassId> {
        self.registry
            .resolve_method(class_id, method)
            .map(|(def_class, _)| def_class)
            .ok_or_else(|| {
                RunError::internal(format!(
                    "method {method} not found on {}",
                    self.registry.class(class_id).path()
                ))
            })
    }

    /// Strict binding checks used in validation mode: every parameter's
    /// class must match the signature (exactly for final classes, by
    /// derivation otherwise), and out-parameters must be lvalues.
    fn validate_binding(&self, def_class: ClassId, method: MethodId, parm_base: usize) -> RunResult<()> {
        let info = self
            .registry
            .class(def_class)
            .method_by_id(method)
            .ok_or_else(|| RunError::internal("validate on unresolved method"))?;
        for (index, parm) in info.parms().iter().enumerate() {
            let slot = parm_base + index;
            let resolved = self.stack.resolve(slot)?;
            let value = self.stack.value(&resolved)?;
            if value.class_id() != parm.class_id && !self.registry.is_derived_from(value.class_id(), parm.class_id) {
                return Err(RunError::internal(format!(
                    "parm {index} of '{}' wants {}, got {}",
                    info.name(),
                    self.registry.class(parm.class_id).path(),
                    self.registry.class(value.class_id()).path()
                )));
            }
            if parm.dir != ParmDir::In && matches!(self.stack.kind_at(slot)?, StackKind::Temp) {
                return Err(RunError::internal(format!(
                    "out parm {index} of '{}' bound to a temporary",
                    info.name()
                )));
            }
        }
        Ok(())
    }

    /// Runs a native method by walking the handler chain from the defining
    /// class upward until one handles the id.
    fn dispatch_native(&mut self, def_class: ClassId, method: MethodId) -> RunResult<()> {
        let mut cursor = Some(def_class);
        while let Some(id) = cursor {
            if let Some(handler) = self.registry.handler(id) {
                let call = NativeCall {
                    class_id: id,
                    method_id: method,
                };
                match handler.invoke(self, &call)? {
                    NativeResult::Handled => return Ok(()),
                    NativeResult::Unhandled => {}
                }
            }
            cursor = self.registry.class(id).parent();
        }
        Err(RunError::internal(format!(
            "no native handler for method {method} of {}",
            self.registry.class(def_class).path()
        )))
    }

    // ----- formatting services -----

    /// Renders the value at a target as text: directly for intrinsic
    /// payloads, through a `FormatTo` call on a string stream for
    /// program-defined formattables. This is the fast path behind
    /// `String.AppendFmt` and stream formatting.
    pub fn format_value_text(&mut self, target: &Target) -> RunResult<String> {
        let target = self.resolve_full(target)?;
        let value = self.stack.value(&target)?;
        let class_id = value.class_id();
        match &value.payload {
            Payload::Bool(v) => Ok(if *v { "True".to_owned() } else { "False".to_owned() }),
            Payload::Card1(v) => Ok(v.to_string()),
            Payload::Card2(v) => Ok(v.to_string()),
            Payload::Card4(v) => Ok(v.to_string()),
            Payload::Card8(v) => Ok(v.to_string()),
            Payload::Int1(v) => Ok(v.to_string()),
            Payload::Int2(v) => Ok(v.to_string()),
            Payload::Int4(v) => Ok(v.to_string()),
            Payload::Float4(v) => Ok(format_float(f64::from(*v))),
            Payload::Float8(v) => Ok(format_float(*v)),
            Payload::Char(v) => Ok(v.to_string()),
            Payload::Str(s) => Ok(s.as_str().to_owned()),
            Payload::Enum(ord) => {
                let ord = *ord;
                let cls = self.registry.class(class_id);
                let text = cls
                    .enum_def
                    .as_ref()
                    .and_then(|def| def.item(ord))
                    .map(|item| item.text.clone())
                    .ok_or_else(|| RunError::internal("enum value with no definition"))?;
                Ok(text)
            }
            _ => {
                if self.registry.is_derived_from(class_id, self.registry.core.formattable) {
                    self.format_via_stream(&target, class_id)
                } else {
                    Err(RunError::internal(format!(
                        "{} is not formattable",
                        self.registry.class(class_id).path()
                    )))
                }
            }
        }
    }

    /// Invokes `FormatTo` against an in-memory string stream and returns
    /// whatever the method wrote.
    fn format_via_stream(&mut self, target: &Target, class_id: ClassId) -> RunResult<String> {
        let stream_class = self
            .registry
            .find_or_load(crate::runtime::streams::STRING_OUT_PATH)
            .map_err(|err| RunError::internal(err.to_string()))?;
        let base_frames = self.frames.len();
        let stream = self.make_new_value(stream_class, false)?;
        let stream_slot = self.stack.push_owned(StackKind::Temp, stream);
        let ret = self.pooled(self.registry.core.void)?;
        self.stack.push_owned(StackKind::Return, ret);
        self.stack
            .push_repush(StackKind::Parm(ParmDir::InOut), Target::slot(stream_slot));
        let format_to = self.registry.core.format_to;
        self.begin_call(target.clone(), class_id, format_to, DispatchKind::Poly, 1)?;
        self.run_to_depth(base_frames)?;
        // [stream][ret]
        let ret_item = self.stack.pop()?;
        if let crate::stack::Cell::Owned(value) = ret_item.cell {
            self.recycle(value);
        }
        let text = {
            let stream_val = self.stack.value(&Target::slot(stream_slot))?;
            match &stream_val.payload {
                Payload::OutStream(s) => s.captured_text(),
                _ => return Err(RunError::internal("string stream lost its payload")),
            }
        };
        let stream_item = self.stack.pop()?;
        drop(stream_item);
        Ok(text)
    }
}

/// Shortest round-trip float formatting.
pub(crate) fn format_float(v: f64) -> String {
    let mut buf = ryu::Buffer::new();
    buf.format(v).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{ClassExtent, MengClass, MethodInfo, Visibility},
        opcode::OpMethodBuilder,
    };

    fn engine() -> MacroEngine {
        MacroEngine::new().expect("engine construction")
    }

    fn register_with_start(engine: &mut MacroEngine, path: &str, ret: ClassId, body: OpMethodBuilder) -> ClassId {
        let core = engine.core();
        let mut cls = MengClass::new(
            crate::error::short_name_of(path).to_owned(),
            path.to_owned(),
            Some(core.object),
            ClassExtent::NonFinal,
        );
        cls.add_method(
            MethodInfo::new("Start", ret, crate::class::MethodExtent::Final, Visibility::Public)
                .with_opcodes(body.finish()),
        )
        .unwrap();
        let id = engine.registry_mut().register_class(cls).unwrap();
        engine.registry_mut().seal(id);
        id
    }

    #[test]
    fn intrinsics_register_with_stable_core_ids() {
        let engine = engine();
        let core = engine.core();
        assert!(!core.object.is_bad());
        assert!(!core.string.is_bad());
        assert!(!core.format_to.is_bad());
        assert_eq!(engine.registry().class(core.string).path(), "MEng.String");
        // Two lookups of the same path yield the same id.
        assert_eq!(
            engine.registry().find_by_path("MEng.Card4"),
            engine.registry().find_by_path("MEng.Card4")
        );
    }

    #[test]
    fn stack_balances_across_a_completed_invoke() {
        let mut engine = engine();
        let core = engine.core();
        let mut b = OpMethodBuilder::new();
        b.local("Scratch", core.card4);
        b.op(OpCode::PushImm(Imm::Card4(9)));
        b.op(OpCode::SetRet);
        b.op(OpCode::Return);
        register_with_start(&mut engine, "MEng.User.Balanced", core.card4, b);
        engine.invoke("MEng.User.Balanced", "Start", Vec::new()).unwrap();
        assert_eq!(engine.stack.depth(), 0);
        assert!(engine.frames.is_empty());
        assert!(engine.tries.is_empty());
    }

    #[test]
    fn stack_balances_after_an_unhandled_exception() {
        let mut engine = engine();
        let core = engine.core();
        let eng_errs = engine.eng_errs();
        let mut b = OpMethodBuilder::new();
        b.local("Scratch", core.card4);
        b.op(OpCode::PushEnum {
            class_id: eng_errs.class_id,
            ordinal: eng_errs.div_by_zero,
        });
        b.op(OpCode::Throw);
        register_with_start(&mut engine, "MEng.User.Unbalanced", core.card4, b);
        let outcome = engine.invoke("MEng.User.Unbalanced", "Start", Vec::new()).unwrap();
        assert!(matches!(outcome, InvokeOutcome::UnhandledException(_)));
        assert_eq!(engine.stack.depth(), 0);
        assert!(engine.frames.is_empty());
    }

    #[test]
    fn assigning_to_a_const_local_raises_const_violation() {
        let mut engine = engine();
        let core = engine.core();
        let mut cls = MengClass::new("ConstHolder", "MEng.User.ConstHolder", Some(core.object), ClassExtent::NonFinal);
        let mut b = OpMethodBuilder::new();
        let fixed = b.const_local("Fixed", core.card4);
        b.op(OpCode::PushLocal(fixed));
        b.op(OpCode::PushImm(Imm::Card4(3)));
        b.op(OpCode::Assign);
        b.op(OpCode::Return);
        cls.add_method(
            MethodInfo::new("Start", core.void, crate::class::MethodExtent::Final, Visibility::Public)
                .with_opcodes(b.finish()),
        )
        .unwrap();
        let id = engine.registry_mut().register_class(cls).unwrap();
        engine.registry_mut().seal(id);

        let outcome = engine.invoke("MEng.User.ConstHolder", "Start", Vec::new()).unwrap();
        let InvokeOutcome::UnhandledException(ev) = outcome else {
            panic!("expected an unhandled exception");
        };
        assert_eq!(ev.err_name, "ConstViolation");
    }

    #[test]
    fn validation_mode_rejects_mismatched_bindings() {
        let mut engine = engine();
        engine.set_validation(true);
        let core = engine.core();
        let add = engine
            .registry()
            .find_method(core.card4, "Add")
            .map(|(_, info)| info.id())
            .unwrap();
        // Push a String where Card4.Add wants a Card4.
        let mut b = OpMethodBuilder::new();
        let v = b.local("V", core.card4);
        b.op(OpCode::PushRet(core.card4));
        b.push_str("not a number");
        b.op(OpCode::Call {
            class_id: core.card4,
            method: add,
            kind: DispatchKind::Direct,
            target: CallTarget::Local(v),
            parm_count: 1,
        });
        b.op(OpCode::SetRet);
        b.op(OpCode::Return);
        register_with_start(&mut engine, "MEng.User.BadBind", core.card4, b);
        let err = engine.invoke("MEng.User.BadBind", "Start", Vec::new()).unwrap_err();
        assert!(matches!(err, InvokeError::Internal(_)));
    }

    #[test]
    fn pooled_temps_are_reused_after_recycling() {
        let mut engine = engine();
        let core = engine.core();
        let value = engine.pooled(core.string).unwrap();
        engine.recycle(value);
        let pooled = engine.pools.get(&core.string).map(Vec::len).unwrap_or(0);
        assert_eq!(pooled, 1);
        let _again = engine.pooled(core.string).unwrap();
        let pooled = engine.pools.get(&core.string).map(Vec::len).unwrap_or(0);
        assert_eq!(pooled, 0);
    }

    #[test]
    fn program_class_values_get_flattened_members() {
        let mut engine = engine();
        let core = engine.core();
        let mut base = MengClass::new("Pair", "MEng.User.Pair", Some(core.object), ClassExtent::NonFinal);
        base.add_member("First", core.card4, false).unwrap();
        let base_id = engine.registry_mut().register_class(base).unwrap();
        engine.registry_mut().seal(base_id);
        let mut derived = MengClass::new("Triple", "MEng.User.Triple", Some(base_id), ClassExtent::NonFinal);
        derived.add_member("Second", core.string, false).unwrap();
        let derived_id = engine.registry_mut().register_class(derived).unwrap();
        engine.registry_mut().seal(derived_id);

        let value = engine.make_new_value(derived_id, false).unwrap();
        let Payload::Members(members) = &value.payload else {
            panic!("expected member storage");
        };
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].class_id(), core.card4);
        assert_eq!(members[1].class_id(), core.string);
    }
}
