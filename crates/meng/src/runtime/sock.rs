//! `MEng.System.Runtime.StreamSocket`: a blocking TCP socket with
//! per-call timeouts.
//!
//! The engine's execution model is blocking-with-timeout: every read takes
//! an explicit wait in milliseconds and raises `Timeout` when it elapses
//! with no data. `std::net` maps onto that contract directly.

use std::{
    io::{Read as _, Write as _},
    net::{TcpStream, ToSocketAddrs as _},
    time::Duration,
};

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

pub(crate) const CLASS_PATH: &str = "MEng.System.Runtime.StreamSocket";

/// Error ordinals of `StreamSocket.SockErrs`.
const ERR_CONNECT_FAILED: u32 = 0;
const ERR_ALREADY_CONNECTED: u32 = 1;
const ERR_NOT_CONNECTED: u32 = 2;
const ERR_TIMEOUT: u32 = 3;
const ERR_READ_ERR: u32 = 4;
const ERR_WRITE_ERR: u32 = 5;
const ERR_NAME_TOO_LONG: u32 = 6;

/// Host names longer than this are refused before any resolution happens.
const MAX_HOST_NAME: usize = 255;

/// The payload of a `StreamSocket` value.
#[derive(Debug, Default)]
pub struct SockVal {
    stream: Option<TcpStream>,
}

#[derive(Debug, Default)]
pub struct StreamSocketClass {
    errs: ClassId,
    connect: MethodId,
    close: MethodId,
    is_connected: MethodId,
    read_bytes: MethodId,
    write_bytes: MethodId,
    read_line: MethodId,
}

impl RuntimeClass for StreamSocketClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.System.Runtime.StreamSocket.SockErrs",
            EnumDef::from_pairs(&[
                ("ConnectFailed", "the connection could not be established"),
                ("AlreadyConnected", "the socket is already connected"),
                ("NotConnected", "the socket is not connected"),
                ("Timeout", "the operation timed out"),
                ("ReadErr", "the read failed"),
                ("WriteErr", "the write failed"),
                ("NameTooLong", "the host name is too long"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("Connect", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Host", string);
        m.add_in_parm("Port", card4);
        m.add_in_parm("WaitMillis", card4);
        self.connect = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("Close", void, MethodExtent::Final, Visibility::Public);
        self.close = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("IsConnected", reg.core.boolean, MethodExtent::Final, Visibility::Public);
        self.is_connected = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ReadBytes", card4, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", reg.core.mem_buf);
        m.add_in_parm("MaxCount", card4);
        m.add_in_parm("WaitMillis", card4);
        self.read_bytes = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("WriteBytes", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToWrite", reg.core.mem_buf);
        m.add_in_parm("Count", card4);
        self.write_bytes = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ReadLine", string, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("WaitMillis", card4);
        self.read_line = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Socket(Box::new(SockVal::default())));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.connect {
            let host = engine.parm(0)?.as_str()?.as_str().to_owned();
            let port = engine.parm(1)?.as_card4()?;
            let wait = engine.parm(2)?.as_card4()?;
            if host.len() > MAX_HOST_NAME {
                return Err(engine.throw(self.errs, ERR_NAME_TOO_LONG, ""));
            }
            if recv_sock(engine)?.stream.is_some() {
                return Err(engine.throw(self.errs, ERR_ALREADY_CONNECTED, ""));
            }
            let addr = match format!("{host}:{port}").to_socket_addrs().ok().and_then(|mut it| it.next()) {
                Some(addr) => addr,
                None => {
                    return Err(engine.throw(self.errs, ERR_CONNECT_FAILED, format!("'{host}' did not resolve")));
                }
            };
            match TcpStream::connect_timeout(&addr, Duration::from_millis(u64::from(wait.max(1)))) {
                Ok(stream) => recv_sock_mut(engine)?.stream = Some(stream),
                Err(err) => {
                    let text = err.to_string();
                    engine.trace_host_error(CLASS_PATH, &text);
                    let ordinal = if err.kind() == std::io::ErrorKind::TimedOut {
                        ERR_TIMEOUT
                    } else {
                        ERR_CONNECT_FAILED
                    };
                    return Err(engine.throw(self.errs, ordinal, text));
                }
            }
        } else if mid == self.close {
            recv_sock_mut(engine)?.stream = None;
        } else if mid == self.is_connected {
            let connected = recv_sock(engine)?.stream.is_some();
            engine.set_ret(Payload::Bool(connected))?;
        } else if mid == self.read_bytes {
            let max_count = engine.parm(1)?.as_card4()? as usize;
            let wait = engine.parm(2)?.as_card4()?;
            if recv_sock(engine)?.stream.is_none() {
                return Err(engine.throw(self.errs, ERR_NOT_CONNECTED, ""));
            }
            let read = {
                let sock = recv_sock_mut(engine)?;
                let Some(stream) = &mut sock.stream else {
                    return Err(RunError::internal("socket state changed"));
                };
                let _ = stream.set_read_timeout(Some(Duration::from_millis(u64::from(wait.max(1)))));
                let mut buf = vec![0_u8; max_count];
                match stream.read(&mut buf) {
                    Ok(count) => {
                        buf.truncate(count);
                        Ok(buf)
                    }
                    Err(err) => Err(err),
                }
            };
            match read {
                Ok(bytes) => {
                    let count = bytes.len() as u32;
                    match &mut engine.parm_mut(0)?.payload {
                        Payload::MemBuf(buf) => buf.fill_from(&bytes),
                        other => {
                            return Err(RunError::internal(format!("ReadBytes target is {}", other.kind_name())));
                        }
                    }
                    engine.set_ret(Payload::Card4(count))?;
                }
                Err(err) => {
                    let timed_out = matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    );
                    let text = err.to_string();
                    engine.trace_host_error(CLASS_PATH, &text);
                    let ordinal = if timed_out { ERR_TIMEOUT } else { ERR_READ_ERR };
                    return Err(engine.throw(self.errs, ordinal, text));
                }
            }
        } else if mid == self.write_bytes {
            let count = engine.parm(1)?.as_card4()? as usize;
            let bytes = match &engine.parm(0)?.payload {
                Payload::MemBuf(buf) => buf.bytes().get(..count.min(buf.len())).unwrap_or_default().to_vec(),
                other => return Err(RunError::internal(format!("WriteBytes source is {}", other.kind_name()))),
            };
            if recv_sock(engine)?.stream.is_none() {
                return Err(engine.throw(self.errs, ERR_NOT_CONNECTED, ""));
            }
            let written = {
                let sock = recv_sock_mut(engine)?;
                let Some(stream) = &mut sock.stream else {
                    return Err(RunError::internal("socket state changed"));
                };
                stream.write_all(&bytes).map(|()| bytes.len())
            };
            match written {
                Ok(count) => engine.set_ret(Payload::Card4(count as u32))?,
                Err(err) => {
                    let text = err.to_string();
                    engine.trace_host_error(CLASS_PATH, &text);
                    return Err(engine.throw(self.errs, ERR_WRITE_ERR, text));
                }
            }
        } else if mid == self.read_line {
            let wait = engine.parm(0)?.as_card4()?;
            if recv_sock(engine)?.stream.is_none() {
                return Err(engine.throw(self.errs, ERR_NOT_CONNECTED, ""));
            }
            let read = {
                let sock = recv_sock_mut(engine)?;
                let Some(stream) = &mut sock.stream else {
                    return Err(RunError::internal("socket state changed"));
                };
                let _ = stream.set_read_timeout(Some(Duration::from_millis(u64::from(wait.max(1)))));
                read_until_newline(stream)
            };
            match read {
                Ok(line) => engine.set_ret(Payload::Str(line.as_str().into()))?,
                Err(err) => {
                    let timed_out = matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    );
                    let text = err.to_string();
                    engine.trace_host_error(CLASS_PATH, &text);
                    let ordinal = if timed_out { ERR_TIMEOUT } else { ERR_READ_ERR };
                    return Err(engine.throw(self.errs, ordinal, text));
                }
            }
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

/// Reads single bytes up to a newline. CR before the newline is dropped;
/// end of stream before any byte yields an empty line.
fn read_until_newline(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        let count = stream.read(&mut byte)?;
        if count == 0 || byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn recv_sock(engine: &MacroEngine) -> RunResult<&SockVal> {
    match &engine.receiver()?.payload {
        Payload::Socket(s) => Ok(s),
        other => Err(RunError::internal(format!("socket method on {}", other.kind_name()))),
    }
}

fn recv_sock_mut(engine: &mut MacroEngine) -> RunResult<&mut SockVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::Socket(s) => Ok(s),
        other => Err(RunError::internal(format!("socket method on {}", other.kind_name()))),
    }
}
