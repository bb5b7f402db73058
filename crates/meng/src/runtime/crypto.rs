//! The message-digest classes: `MD5Digest`, `SHA1Digest`, and
//! `SHA256Digest` under `MEng.System.Runtime`.
//!
//! One handler serves all three, parameterized by algorithm. A digest value
//! accumulates input across `DigestStr`/`DigestBuf` calls; `Complete`
//! finalizes, writes the raw bytes, and resets the context for reuse.

use md5::{Digest as _, Md5};
use sha1::Sha1;
use sha2::Sha256;

use crate::{
    class::{ClassExtent, MethodExtent, MethodInfo, Visibility},
    engine::MacroEngine,
    error::RegResult,
    except::{RunError, RunResult},
    id::{ClassId, MethodId},
    registry::ClassRegistry,
    runtime::{NativeCall, NativeResult, RuntimeClass, class_shell},
    value::{Payload, Value},
};

pub(crate) const MD5_PATH: &str = "MEng.System.Runtime.MD5Digest";
pub(crate) const SHA1_PATH: &str = "MEng.System.Runtime.SHA1Digest";
pub(crate) const SHA256_PATH: &str = "MEng.System.Runtime.SHA256Digest";

/// Which algorithm a handler instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestAlgo {
    Md5,
    Sha1,
    Sha256,
}

impl DigestAlgo {
    fn class_path(self) -> &'static str {
        match self {
            Self::Md5 => MD5_PATH,
            Self::Sha1 => SHA1_PATH,
            Self::Sha256 => SHA256_PATH,
        }
    }
}

/// A live digest context.
#[derive(Debug)]
enum DigestCtx {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl DigestCtx {
    fn new(algo: DigestAlgo) -> Self {
        match algo {
            DigestAlgo::Md5 => Self::Md5(Md5::new()),
            DigestAlgo::Sha1 => Self::Sha1(Sha1::new()),
            DigestAlgo::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.update(data),
            Self::Sha1(ctx) => ctx.update(data),
            Self::Sha256(ctx) => ctx.update(data),
        }
    }

    /// Finalizes and resets the context in one step.
    fn finalize_reset(&mut self) -> Vec<u8> {
        match self {
            Self::Md5(ctx) => ctx.finalize_reset().to_vec(),
            Self::Sha1(ctx) => ctx.finalize_reset().to_vec(),
            Self::Sha256(ctx) => ctx.finalize_reset().to_vec(),
        }
    }
}

/// The payload of a digest value.
#[derive(Debug)]
pub struct DigestVal {
    ctx: DigestCtx,
}

#[derive(Debug)]
pub struct DigestClass {
    algo: DigestAlgo,
    start_new: MethodId,
    digest_str: MethodId,
    digest_buf: MethodId,
    complete: MethodId,
    complete_hex: MethodId,
}

impl DigestClass {
    fn new(algo: DigestAlgo) -> Self {
        Self {
            algo,
            start_new: MethodId::BAD,
            digest_str: MethodId::BAD,
            digest_buf: MethodId::BAD,
            complete: MethodId::BAD,
            complete_hex: MethodId::BAD,
        }
    }

    #[must_use]
    pub fn md5() -> Self {
        Self::new(DigestAlgo::Md5)
    }

    #[must_use]
    pub fn sha1() -> Self {
        Self::new(DigestAlgo::Sha1)
    }

    #[must_use]
    pub fn sha256() -> Self {
        Self::new(DigestAlgo::Sha256)
    }
}

impl RuntimeClass for DigestClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(self.algo.class_path(), reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let void = reg.core.void;

        let m = MethodInfo::new("StartNew", void, MethodExtent::Final, Visibility::Public);
        self.start_new = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("DigestStr", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToDigest", reg.core.string);
        self.digest_str = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("DigestBuf", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToDigest", reg.core.mem_buf);
        m.add_in_parm("Count", reg.core.card4);
        self.digest_buf = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("Complete", void, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", reg.core.mem_buf);
        self.complete = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("CompleteHex", void, MethodExtent::Final, Visibility::Public);
        m.add_out_parm("ToFill", reg.core.string);
        self.complete_hex = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(
            class_id,
            Payload::Digest(Box::new(DigestVal {
                ctx: DigestCtx::new(self.algo),
            })),
        );
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.start_new {
            recv_digest_mut(engine)?.ctx = DigestCtx::new(self.algo);
        } else if mid == self.digest_str {
            let text = engine.parm(0)?.as_str()?.as_str().to_owned();
            recv_digest_mut(engine)?.ctx.update(text.as_bytes());
        } else if mid == self.digest_buf {
            let count = engine.parm(1)?.as_card4()? as usize;
            let bytes = match &engine.parm(0)?.payload {
                Payload::MemBuf(buf) => buf.bytes().get(..count.min(buf.len())).unwrap_or_default().to_vec(),
                other => return Err(RunError::internal(format!("DigestBuf source is {}", other.kind_name()))),
            };
            recv_digest_mut(engine)?.ctx.update(&bytes);
        } else if mid == self.complete || mid == self.complete_hex {
            let raw = recv_digest_mut(engine)?.ctx.finalize_reset();
            if mid == self.complete {
                match &mut engine.parm_mut(0)?.payload {
                    Payload::MemBuf(buf) => buf.fill_from(&raw),
                    other => return Err(RunError::internal(format!("Complete target is {}", other.kind_name()))),
                }
            } else {
                let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
                engine.parm_mut(0)?.payload = Payload::Str(hex.as_str().into());
            }
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_digest_mut(engine: &mut MacroEngine) -> RunResult<&mut DigestVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::Digest(d) => Ok(d),
        other => Err(RunError::internal(format!("digest method on {}", other.kind_name()))),
    }
}
