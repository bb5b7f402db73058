//! The HTTP client classes: synchronous `HTTPClient` and the worker-backed
//! `AsyncHTTP`.
//!
//! `AsyncHTTP` runs each request on an internal worker thread and exposes
//! the state machine Idle → Waiting → Complete/Error → Idle. The worker
//! communicates only through a channel; `CancelOp` signals from the engine
//! side and never mutates language-visible state from another thread.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, TryRecvError, channel},
    },
    thread,
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

pub(crate) const HTTP_CLASS_PATH: &str = "MEng.System.Runtime.HTTPClient";
pub(crate) const ASYNC_CLASS_PATH: &str = "MEng.System.Runtime.AsyncHTTP";

/// Error ordinals of `HTTPClient.HTTPErrs`.
const ERR_SEND_FAILED: u32 = 0;
const ERR_BAD_URL: u32 = 1;
const ERR_TIMEOUT: u32 = 2;

/// Error ordinals of `AsyncHTTP.AsyncErrs`.
const ERR_BUSY: u32 = 0;
const ERR_STATUS: u32 = 1;

/// Ordinals of `AsyncHTTP.States`.
const STATE_IDLE: u32 = 0;
const STATE_WAITING: u32 = 1;
const STATE_COMPLETE: u32 = 2;
const STATE_ERROR: u32 = 3;

/// Default per-request timeout.
const DEFAULT_TIMEOUT_MS: u32 = 30_000;

/// What a finished request produced.
#[derive(Debug)]
struct FetchResult {
    status: u32,
    content_type: String,
    body: Vec<u8>,
}

type FetchOutcome = Result<FetchResult, String>;

/// The payload of an `HTTPClient` value.
#[derive(Debug)]
pub struct HttpVal {
    timeout_ms: u32,
}

impl Default for HttpVal {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// The payload of an `AsyncHTTP` value.
#[derive(Debug)]
pub struct AsyncHttpVal {
    state: u32,
    rx: Option<Receiver<FetchOutcome>>,
    result: Option<FetchOutcome>,
    /// Signals the worker that its result will be discarded.
    cancel: Option<Arc<AtomicBool>>,
    cancelled: bool,
}

impl Default for AsyncHttpVal {
    fn default() -> Self {
        Self {
            state: STATE_IDLE,
            rx: None,
            result: None,
            cancel: None,
            cancelled: false,
        }
    }
}

impl AsyncHttpVal {
    /// Folds any worker completion into the state machine. Cheap when
    /// nothing changed.
    fn poll(&mut self) {
        if self.state != STATE_WAITING {
            return;
        }
        let Some(rx) = &self.rx else { return };
        match rx.try_recv() {
            Ok(outcome) => {
                self.state = if outcome.is_ok() { STATE_COMPLETE } else { STATE_ERROR };
                self.result = Some(outcome);
                self.rx = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.state = STATE_ERROR;
                self.result = Some(Err("the request worker exited without a result".to_owned()));
                self.rx = None;
            }
        }
    }
}

fn do_request(client: &reqwest::blocking::Client, request: RequestKind) -> FetchOutcome {
    let response = match request {
        RequestKind::Get(url) => client.get(url).send(),
        RequestKind::Post { url, body, content_type } => client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send(),
    };
    let response = response.map_err(|err| err.to_string())?;
    let status = u32::from(response.status().as_u16());
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let body = response.bytes().map_err(|err| err.to_string())?.to_vec();
    Ok(FetchResult {
        status,
        content_type,
        body,
    })
}

enum RequestKind {
    Get(String),
    Post {
        url: String,
        body: String,
        content_type: String,
    },
}

fn build_client(timeout_ms: u32) -> Result<reqwest::blocking::Client, String> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(u64::from(timeout_ms.max(1))))
        .build()
        .map_err(|err| err.to_string())
}

/// `MEng.System.Runtime.HTTPClient`.
#[derive(Debug, Default)]
pub struct HttpClientClass {
    errs: ClassId,
    set_timeout: MethodId,
    send_get: MethodId,
    send_post: MethodId,
}

impl RuntimeClass for HttpClientClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(HTTP_CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let card4 = reg.core.card4;

        self.errs = reg.register_enum(
            "MEng.System.Runtime.HTTPClient.HTTPErrs",
            EnumDef::from_pairs(&[
                ("SendFailed", "the request could not be sent"),
                ("BadUrl", "the URL is malformed"),
                ("Timeout", "the request timed out"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("SetTimeout", reg.core.void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Millis", card4);
        self.set_timeout = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("SendGET", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("URL", string);
        m.add_out_parm("ContType", string);
        m.add_out_parm("Content", reg.core.mem_buf);
        self.send_get = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("SendPOST", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("URL", string);
        m.add_in_parm("Body", string);
        m.add_in_parm("ContType", string);
        m.add_out_parm("Content", reg.core.mem_buf);
        self.send_post = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::Http(Box::new(HttpVal::default())));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.set_timeout {
            let millis = engine.parm(0)?.as_card4()?;
            recv_http_mut(engine)?.timeout_ms = millis;
        } else if mid == self.send_get || mid == self.send_post {
            let url = engine.parm(0)?.as_str()?.as_str().to_owned();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(engine.throw(self.errs, ERR_BAD_URL, format!("'{url}' is not an http URL")));
            }
            let request = if mid == self.send_get {
                RequestKind::Get(url)
            } else {
                RequestKind::Post {
                    url,
                    body: engine.parm(1)?.as_str()?.as_str().to_owned(),
                    content_type: engine.parm(2)?.as_str()?.as_str().to_owned(),
                }
            };
            let timeout_ms = recv_http(engine)?.timeout_ms;
            let outcome = build_client(timeout_ms).and_then(|client| do_request(&client, request));
            match outcome {
                Ok(result) => {
                    let (ct_parm, body_parm) = if mid == self.send_get { (1, 2) } else { (3, 3) };
                    if mid == self.send_get {
                        engine.parm_mut(ct_parm)?.payload = Payload::Str(result.content_type.as_str().into());
                    }
                    match &mut engine.parm_mut(body_parm)?.payload {
                        Payload::MemBuf(buf) => buf.fill_from(&result.body),
                        other => {
                            return Err(RunError::internal(format!("content target is {}", other.kind_name())));
                        }
                    }
                    engine.set_ret(Payload::Card4(result.status))?;
                }
                Err(text) => {
                    engine.trace_host_error(HTTP_CLASS_PATH, &text);
                    let ordinal = if text.contains("timed out") { ERR_TIMEOUT } else { ERR_SEND_FAILED };
                    return Err(engine.throw(self.errs, ordinal, text));
                }
            }
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

/// `MEng.System.Runtime.AsyncHTTP`.
#[derive(Debug, Default)]
pub struct AsyncHttpClass {
    errs: ClassId,
    states: ClassId,
    start_get_redir: MethodId,
    start_post: MethodId,
    get_status: MethodId,
    get_output: MethodId,
    cancel_op: MethodId,
}

impl RuntimeClass for AsyncHttpClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(ASYNC_CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        self.states = reg.register_enum(
            "MEng.System.Runtime.AsyncHTTP.States",
            EnumDef::from_pairs(&[
                ("Idle", "no operation is in progress"),
                ("Waiting", "an operation is in progress"),
                ("Complete", "the operation completed"),
                ("Error", "the operation failed"),
            ]),
        )?;
        self.errs = reg.register_enum(
            "MEng.System.Runtime.AsyncHTTP.AsyncErrs",
            EnumDef::from_pairs(&[
                ("Busy", "an operation is already in progress"),
                ("Status", "the operation failed"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.states);
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("StartGETRedir", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("URL", string);
        self.start_get_redir = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("StartPOST", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("URL", string);
        m.add_in_parm("Body", string);
        m.add_in_parm("ContType", string);
        self.start_post = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetStatus", self.states, MethodExtent::Final, Visibility::Public);
        self.get_status = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("GetOutput", reg.core.boolean, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("StatusCode", card4);
        m.add_out_parm("ContType", string);
        m.add_out_parm("Content", reg.core.mem_buf);
        self.get_output = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("CancelOp", void, MethodExtent::Final, Visibility::Public);
        self.cancel_op = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::AsyncHttp(Box::new(AsyncHttpVal::default())));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.start_get_redir || mid == self.start_post {
            let url = engine.parm(0)?.as_str()?.as_str().to_owned();
            let request = if mid == self.start_get_redir {
                RequestKind::Get(url)
            } else {
                RequestKind::Post {
                    url,
                    body: engine.parm(1)?.as_str()?.as_str().to_owned(),
                    content_type: engine.parm(2)?.as_str()?.as_str().to_owned(),
                }
            };
            {
                let val = recv_async(engine)?;
                if val.state == STATE_WAITING {
                    return Err(engine.throw(self.errs, ERR_BUSY, ""));
                }
            }
            let (tx, rx) = channel();
            let cancel = Arc::new(AtomicBool::new(false));
            let worker_cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                let outcome = build_client(DEFAULT_TIMEOUT_MS).and_then(|client| do_request(&client, request));
                // A cancelled operation's result is discarded; the engine
                // side already transitioned to Complete.
                if !worker_cancel.load(Ordering::Acquire) {
                    let _ = tx.send(outcome);
                }
            });
            let val = recv_async_mut(engine)?;
            val.state = STATE_WAITING;
            val.rx = Some(rx);
            val.result = None;
            val.cancel = Some(cancel);
            val.cancelled = false;
        } else if mid == self.get_status {
            let state = {
                let val = recv_async_mut(engine)?;
                val.poll();
                val.state
            };
            engine.set_ret(Payload::Enum(state))?;
        } else if mid == self.get_output {
            let state = {
                let val = recv_async_mut(engine)?;
                val.poll();
                val.state
            };
            match state {
                STATE_WAITING => return Err(engine.throw(self.errs, ERR_BUSY, "")),
                STATE_ERROR => {
                    let text = {
                        let val = recv_async_mut(engine)?;
                        val.state = STATE_IDLE;
                        match val.result.take() {
                            Some(Err(text)) => text,
                            _ => String::new(),
                        }
                    };
                    return Err(engine.throw(self.errs, ERR_STATUS, text));
                }
                STATE_COMPLETE => {
                    let (cancelled, result) = {
                        let val = recv_async_mut(engine)?;
                        val.state = STATE_IDLE;
                        (val.cancelled, val.result.take())
                    };
                    let (status, content_type, body) = match result {
                        Some(Ok(result)) => (result.status, result.content_type, result.body),
                        // A cancelled operation reports a zero status code.
                        _ => (0, String::new(), Vec::new()),
                    };
                    engine.parm_mut(0)?.payload = Payload::Card4(status);
                    engine.parm_mut(1)?.payload = Payload::Str(content_type.as_str().into());
                    match &mut engine.parm_mut(2)?.payload {
                        Payload::MemBuf(buf) => buf.fill_from(&body),
                        other => {
                            return Err(RunError::internal(format!("content target is {}", other.kind_name())));
                        }
                    }
                    engine.set_ret(Payload::Bool(!cancelled && status != 0))?;
                }
                _ => {
                    // Idle: nothing to report.
                    engine.parm_mut(0)?.payload = Payload::Card4(0);
                    engine.set_ret(Payload::Bool(false))?;
                }
            }
        } else if mid == self.cancel_op {
            let val = recv_async_mut(engine)?;
            if val.state == STATE_WAITING {
                if let Some(cancel) = &val.cancel {
                    cancel.store(true, Ordering::Release);
                }
                val.rx = None;
                val.result = None;
                val.cancelled = true;
                val.state = STATE_COMPLETE;
            }
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_http(engine: &MacroEngine) -> RunResult<&HttpVal> {
    match &engine.receiver()?.payload {
        Payload::Http(h) => Ok(h),
        other => Err(RunError::internal(format!("HTTPClient method on {}", other.kind_name()))),
    }
}

fn recv_http_mut(engine: &mut MacroEngine) -> RunResult<&mut HttpVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::Http(h) => Ok(h),
        other => Err(RunError::internal(format!("HTTPClient method on {}", other.kind_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting_val(rx: Receiver<FetchOutcome>) -> AsyncHttpVal {
        AsyncHttpVal {
            state: STATE_WAITING,
            rx: Some(rx),
            result: None,
            cancel: None,
            cancelled: false,
        }
    }

    #[test]
    fn poll_stays_waiting_until_the_worker_reports() {
        let (tx, rx) = channel();
        let mut val = waiting_val(rx);
        val.poll();
        assert_eq!(val.state, STATE_WAITING);
        tx.send(Ok(FetchResult {
            status: 200,
            content_type: "text/plain".to_owned(),
            body: b"ok".to_vec(),
        }))
        .unwrap();
        val.poll();
        assert_eq!(val.state, STATE_COMPLETE);
        assert!(matches!(val.result, Some(Ok(_))));
    }

    #[test]
    fn poll_maps_failures_to_error() {
        let (tx, rx) = channel();
        let mut val = waiting_val(rx);
        tx.send(Err("connect refused".to_owned())).unwrap();
        val.poll();
        assert_eq!(val.state, STATE_ERROR);
    }

    #[test]
    fn worker_death_becomes_error() {
        let (tx, rx) = channel();
        let mut val = waiting_val(rx);
        drop(tx);
        val.poll();
        assert_eq!(val.state, STATE_ERROR);
        assert!(matches!(val.result, Some(Err(_))));
    }
}

fn recv_async(engine: &MacroEngine) -> RunResult<&AsyncHttpVal> {
    match &engine.receiver()?.payload {
        Payload::AsyncHttp(a) => Ok(a),
        other => Err(RunError::internal(format!("AsyncHTTP method on {}", other.kind_name()))),
    }
}

fn recv_async_mut(engine: &mut MacroEngine) -> RunResult<&mut AsyncHttpVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::AsyncHttp(a) => Ok(a),
        other => Err(RunError::internal(format!("AsyncHTTP method on {}", other.kind_name()))),
    }
}
