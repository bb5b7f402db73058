//! `MEng.MemBuf`: a resizable byte buffer with a max-size bound.

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

/// Error ordinals of `MEng.MemBuf.MemBufErrs`.
const ERR_BAD_INDEX: u32 = 0;
const ERR_TOO_BIG: u32 = 1;

/// Default max size a fresh buffer accepts: 16MB.
const DEFAULT_MAX: usize = 0x0100_0000;

/// The payload of a `MEng.MemBuf` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemBufVal {
    bytes: Vec<u8>,
    max_size: usize,
}

impl Default for MemBufVal {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            max_size: DEFAULT_MAX,
        }
    }
}

impl MemBufVal {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Replaces the contents, truncating to the max size.
    pub fn fill_from(&mut self, data: &[u8]) {
        let take = data.len().min(self.max_size);
        self.bytes.clear();
        self.bytes.extend_from_slice(&data[..take]);
    }
}

#[derive(Debug, Default)]
pub struct MemBufClass {
    errs: ClassId,
    get_byte_at: MethodId,
    put_byte_at: MethodId,
    set_size: MethodId,
    get_cur_size: MethodId,
    get_max_size: MethodId,
    set_max_size: MethodId,
    clear: MethodId,
    import_string: MethodId,
    export_string: MethodId,
}

impl RuntimeClass for MemBufClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell("MEng.MemBuf", reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let card1 = reg.core.card1;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.MemBuf.MemBufErrs",
            EnumDef::from_pairs(&[
                ("BadIndex", "the index is beyond the buffer's current size"),
                ("TooBig", "the requested size exceeds the buffer's max size"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("GetByteAt", card1, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        self.get_byte_at = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("PutByteAt", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Index", card4);
        m.add_in_parm("ToPut", card1);
        self.put_byte_at = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("SetSize", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("NewSize", card4);
        self.set_size = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetCurSize", card4, MethodExtent::Final, Visibility::Public);
        self.get_cur_size = reg.class_mut(id).add_method(m.const_method())?;
        let m = MethodInfo::new("GetMaxSize", card4, MethodExtent::Final, Visibility::Public);
        self.get_max_size = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("SetMaxSize", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("NewSize", card4);
        self.set_max_size = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("Clear", void, MethodExtent::Final, Visibility::Public);
        self.clear = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ImportString", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToImport", reg.core.string);
        self.import_string = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ExportString", reg.core.string, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Count", card4);
        self.export_string = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::MemBuf(MemBufVal::default()));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.get_byte_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let byte = recv_buf(engine)?.bytes.get(index).copied();
            let Some(byte) = byte else {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            };
            engine.set_ret(Payload::Card1(byte))?;
        } else if mid == self.put_byte_at {
            let index = engine.parm(0)?.as_card4()? as usize;
            let byte = engine.parm(1)?.as_card1()?;
            if index >= recv_buf(engine)?.bytes.len() {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            }
            recv_buf_mut(engine)?.bytes[index] = byte;
        } else if mid == self.set_size {
            let new_size = engine.parm(0)?.as_card4()? as usize;
            if new_size > recv_buf(engine)?.max_size {
                return Err(engine.throw(self.errs, ERR_TOO_BIG, ""));
            }
            recv_buf_mut(engine)?.bytes.resize(new_size, 0);
        } else if mid == self.get_cur_size {
            let len = recv_buf(engine)?.bytes.len() as u32;
            engine.set_ret(Payload::Card4(len))?;
        } else if mid == self.get_max_size {
            let max = recv_buf(engine)?.max_size as u32;
            engine.set_ret(Payload::Card4(max))?;
        } else if mid == self.set_max_size {
            let new_max = engine.parm(0)?.as_card4()? as usize;
            let buf = recv_buf_mut(engine)?;
            buf.max_size = new_max;
            buf.bytes.truncate(new_max);
        } else if mid == self.clear {
            recv_buf_mut(engine)?.bytes.clear();
        } else if mid == self.import_string {
            let text = engine.parm(0)?.as_str()?.as_str().to_owned();
            if text.len() > recv_buf(engine)?.max_size {
                return Err(engine.throw(self.errs, ERR_TOO_BIG, ""));
            }
            let buf = recv_buf_mut(engine)?;
            buf.bytes.clear();
            buf.bytes.extend_from_slice(text.as_bytes());
            engine.set_ret(Payload::Card4(text.len() as u32))?;
        } else if mid == self.export_string {
            let count = engine.parm(0)?.as_card4()? as usize;
            if count > recv_buf(engine)?.bytes.len() {
                return Err(engine.throw(self.errs, ERR_BAD_INDEX, ""));
            }
            let text = String::from_utf8_lossy(&recv_buf(engine)?.bytes[..count]).into_owned();
            engine.set_ret(Payload::Str(text.as_str().into()))?;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

pub(crate) fn recv_buf(engine: &MacroEngine) -> RunResult<&MemBufVal> {
    match &engine.receiver()?.payload {
        Payload::MemBuf(buf) => Ok(buf),
        other => Err(RunError::internal(format!("MemBuf method on {}", other.kind_name()))),
    }
}

pub(crate) fn recv_buf_mut(engine: &mut MacroEngine) -> RunResult<&mut MemBufVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::MemBuf(buf) => Ok(buf),
        other => Err(RunError::internal(format!("MemBuf method on {}", other.kind_name()))),
    }
}
