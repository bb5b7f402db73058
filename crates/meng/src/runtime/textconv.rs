//! `MEng.System.Runtime.TextXCoder`: text/byte conversion through a named
//! encoding.
//!
//! Supported encodings: US-ASCII, UTF-8, UTF-16LE/BE, and Latin1. The error
//! action governs what bad input does: throw immediately, convert up to the
//! error and throw on the next call site, or substitute the replacement
//! character.

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

pub(crate) const CLASS_PATH: &str = "MEng.System.Runtime.TextXCoder";

/// Error ordinals of `TextXCoder.XCoderErrs`.
const ERR_BAD_ENCODING: u32 = 0;
const ERR_BAD_SRC_DATA: u32 = 1;
const ERR_UNREP: u32 = 2;

/// Ordinals of the shared `CvtErrActs` enum.
const ACT_THROW: u32 = 0;
const ACT_STOP_THEN_THROW: u32 = 1;
const ACT_REPLACE: u32 = 2;

/// The encodings the converter binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    UsAscii,
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl Encoding {
    fn from_name(name: &str) -> Option<Self> {
        // Encoding names compare case-blind with or without hyphens.
        let folded: String = name
            .chars()
            .filter(|ch| *ch != '-' && *ch != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "usascii" | "ascii" => Some(Self::UsAscii),
            "utf8" => Some(Self::Utf8),
            "utf16le" | "utf16l" => Some(Self::Utf16Le),
            "utf16be" | "utf16b" => Some(Self::Utf16Be),
            "latin1" | "iso88591" => Some(Self::Latin1),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::UsAscii => "US-ASCII",
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::Latin1 => "Latin1",
        }
    }
}

/// The payload of a `TextXCoder` value.
#[derive(Debug, Clone, Copy)]
pub struct TextConvVal {
    encoding: Encoding,
    err_action: u32,
    repl_char: char,
}

impl Default for TextConvVal {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf8,
            err_action: ACT_THROW,
            repl_char: '\u{FFFD}',
        }
    }
}

/// Outcome of a conversion attempt before error-action policy is applied.
enum CvtOutcome<T> {
    Ok(T),
    /// Error at the given unit offset; carries the partial result.
    Bad { at: usize, partial: T },
}

#[derive(Debug, Default)]
pub struct TextXCoderClass {
    errs: ClassId,
    set_encoding: MethodId,
    get_encoding: MethodId,
    convert_from: MethodId,
    convert_to: MethodId,
    set_err_action: MethodId,
    set_repl_char: MethodId,
}

impl RuntimeClass for TextXCoderClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let card4 = reg.core.card4;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.System.Runtime.TextXCoder.XCoderErrs",
            EnumDef::from_pairs(&[
                ("BadEncoding", "the encoding name is not supported"),
                ("BadSrcData", "the source bytes are not valid for the encoding"),
                ("Unrep", "a source character is unrepresentable in the encoding"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);
        let err_acts = reg.find_or_load("MEng.System.Runtime.TextOutStream").and_then(|_| {
            reg.find_by_path("MEng.System.Runtime.CvtErrActs")
                .ok_or_else(|| crate::error::RegError::ClassNotFound("MEng.System.Runtime.CvtErrActs".to_owned()))
        })?;

        let mut m = MethodInfo::new("SetEncoding", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", string);
        self.set_encoding = reg.class_mut(id).add_method(m)?;
        let m = MethodInfo::new("GetEncoding", string, MethodExtent::Final, Visibility::Public);
        self.get_encoding = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("ConvertFrom", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Buffer", reg.core.mem_buf);
        m.add_in_parm("BytesToUse", card4);
        m.add_out_parm("ToFill", string);
        self.convert_from = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ConvertTo", card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToConvert", string);
        m.add_out_parm("Buffer", reg.core.mem_buf);
        self.convert_to = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("SetErrAction", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ActToSet", err_acts);
        self.set_err_action = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("SetRepChar", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("ToSet", reg.core.char);
        self.set_repl_char = reg.class_mut(id).add_method(m)?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::TextConv(Box::new(TextConvVal::default())));
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.set_encoding {
            let name = engine.parm(0)?.as_str()?.as_str().to_owned();
            let Some(encoding) = Encoding::from_name(&name) else {
                return Err(engine.throw(self.errs, ERR_BAD_ENCODING, format!("'{name}' is not a known encoding")));
            };
            recv_conv_mut(engine)?.encoding = encoding;
        } else if mid == self.get_encoding {
            let name = recv_conv(engine)?.encoding.name();
            engine.set_ret(Payload::Str(name.into()))?;
        } else if mid == self.convert_from {
            let count = engine.parm(1)?.as_card4()? as usize;
            let bytes = match &engine.parm(0)?.payload {
                Payload::MemBuf(buf) => buf.bytes().get(..count.min(buf.len())).unwrap_or_default().to_vec(),
                other => return Err(RunError::internal(format!("ConvertFrom source is {}", other.kind_name()))),
            };
            let conv = *recv_conv(engine)?;
            let outcome = decode(&bytes, conv.encoding);
            let (text, eaten) = match outcome {
                CvtOutcome::Ok(text) => {
                    let eaten = bytes.len();
                    (text, eaten)
                }
                CvtOutcome::Bad { at, partial } => match conv.err_action {
                    ACT_REPLACE => {
                        // Re-decode substituting every bad unit.
                        (decode_replacing(&bytes, conv.encoding, conv.repl_char), bytes.len())
                    }
                    ACT_STOP_THEN_THROW if at > 0 => (partial, at),
                    _ => {
                        return Err(engine.throw(
                            self.errs,
                            ERR_BAD_SRC_DATA,
                            format!("bad source data at byte {at}"),
                        ));
                    }
                },
            };
            engine.parm_mut(2)?.payload = Payload::Str(text.as_str().into());
            engine.set_ret(Payload::Card4(eaten as u32))?;
        } else if mid == self.convert_to {
            let text = engine.parm(0)?.as_str()?.as_str().to_owned();
            let conv = *recv_conv(engine)?;
            let outcome = encode(&text, conv.encoding);
            let bytes = match outcome {
                CvtOutcome::Ok(bytes) => bytes,
                CvtOutcome::Bad { at, partial } => match conv.err_action {
                    ACT_REPLACE => encode_replacing(&text, conv.encoding, conv.repl_char),
                    ACT_STOP_THEN_THROW if at > 0 => partial,
                    _ => {
                        return Err(engine.throw(
                            self.errs,
                            ERR_UNREP,
                            format!("unrepresentable character at index {at}"),
                        ));
                    }
                },
            };
            let written = bytes.len() as u32;
            match &mut engine.parm_mut(1)?.payload {
                Payload::MemBuf(buf) => buf.fill_from(&bytes),
                other => return Err(RunError::internal(format!("ConvertTo target is {}", other.kind_name()))),
            }
            engine.set_ret(Payload::Card4(written))?;
        } else if mid == self.set_err_action {
            let action = engine.parm(0)?.as_enum()?;
            recv_conv_mut(engine)?.err_action = action;
        } else if mid == self.set_repl_char {
            let ch = engine.parm(0)?.as_char()?;
            recv_conv_mut(engine)?.repl_char = ch;
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

fn recv_conv(engine: &MacroEngine) -> RunResult<&TextConvVal> {
    match &engine.receiver()?.payload {
        Payload::TextConv(conv) => Ok(conv),
        other => Err(RunError::internal(format!("TextXCoder method on {}", other.kind_name()))),
    }
}

fn recv_conv_mut(engine: &mut MacroEngine) -> RunResult<&mut TextConvVal> {
    match &mut engine.receiver_mut()?.payload {
        Payload::TextConv(conv) => Ok(conv),
        other => Err(RunError::internal(format!("TextXCoder method on {}", other.kind_name()))),
    }
}

fn decode(bytes: &[u8], encoding: Encoding) -> CvtOutcome<String> {
    match encoding {
        Encoding::UsAscii => {
            let mut out = String::with_capacity(bytes.len());
            for (at, &byte) in bytes.iter().enumerate() {
                if byte > 0x7F {
                    return CvtOutcome::Bad { at, partial: out };
                }
                out.push(char::from(byte));
            }
            CvtOutcome::Ok(out)
        }
        Encoding::Latin1 => CvtOutcome::Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        Encoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => CvtOutcome::Ok(text.to_owned()),
            Err(err) => {
                let at = err.valid_up_to();
                let partial = std::str::from_utf8(&bytes[..at]).unwrap_or_default().to_owned();
                CvtOutcome::Bad { at, partial }
            }
        },
        Encoding::Utf16Le | Encoding::Utf16Be => {
            let mut units = Vec::with_capacity(bytes.len() / 2);
            for pair in bytes.chunks_exact(2) {
                let unit = if encoding == Encoding::Utf16Le {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                };
                units.push(unit);
            }
            let mut out = String::new();
            let mut eaten = 0;
            for result in char::decode_utf16(units.iter().copied()) {
                match result {
                    Ok(ch) => {
                        eaten += ch.len_utf16() * 2;
                        out.push(ch);
                    }
                    Err(_) => {
                        return CvtOutcome::Bad { at: eaten, partial: out };
                    }
                }
            }
            if bytes.len() % 2 != 0 {
                return CvtOutcome::Bad {
                    at: bytes.len() - 1,
                    partial: out,
                };
            }
            CvtOutcome::Ok(out)
        }
    }
}

fn decode_replacing(bytes: &[u8], encoding: Encoding, repl: char) -> String {
    match encoding {
        Encoding::UsAscii => bytes
            .iter()
            .map(|&b| if b > 0x7F { repl } else { char::from(b) })
            .collect(),
        Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        Encoding::Utf8 => String::from_utf8_lossy(bytes).replace('\u{FFFD}', &repl.to_string()),
        Encoding::Utf16Le | Encoding::Utf16Be => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| {
                    if encoding == Encoding::Utf16Le {
                        u16::from_le_bytes([pair[0], pair[1]])
                    } else {
                        u16::from_be_bytes([pair[0], pair[1]])
                    }
                })
                .collect();
            char::decode_utf16(units).map(|r| r.unwrap_or(repl)).collect()
        }
    }
}

fn encode(text: &str, encoding: Encoding) -> CvtOutcome<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => CvtOutcome::Ok(text.as_bytes().to_vec()),
        Encoding::UsAscii => {
            let mut out = Vec::with_capacity(text.len());
            for (at, ch) in text.chars().enumerate() {
                if !ch.is_ascii() {
                    return CvtOutcome::Bad { at, partial: out };
                }
                out.push(ch as u8);
            }
            CvtOutcome::Ok(out)
        }
        Encoding::Latin1 => {
            let mut out = Vec::with_capacity(text.len());
            for (at, ch) in text.chars().enumerate() {
                let code = u32::from(ch);
                if code > 0xFF {
                    return CvtOutcome::Bad { at, partial: out };
                }
                out.push(code as u8);
            }
            CvtOutcome::Ok(out)
        }
        Encoding::Utf16Le | Encoding::Utf16Be => {
            let mut out = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                let pair = if encoding == Encoding::Utf16Le {
                    unit.to_le_bytes()
                } else {
                    unit.to_be_bytes()
                };
                out.extend_from_slice(&pair);
            }
            CvtOutcome::Ok(out)
        }
    }
}

fn encode_replacing(text: &str, encoding: Encoding, repl: char) -> Vec<u8> {
    let repl_byte = if repl.is_ascii() { repl as u8 } else { b'?' };
    match encoding {
        Encoding::Utf8 | Encoding::Utf16Le | Encoding::Utf16Be => match encode(text, encoding) {
            CvtOutcome::Ok(bytes) | CvtOutcome::Bad { partial: bytes, .. } => bytes,
        },
        Encoding::UsAscii => text
            .chars()
            .map(|ch| if ch.is_ascii() { ch as u8 } else { repl_byte })
            .collect(),
        Encoding::Latin1 => text
            .chars()
            .map(|ch| {
                let code = u32::from(ch);
                if code <= 0xFF { code as u8 } else { repl_byte }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trip() {
        let CvtOutcome::Ok(bytes) = encode("hello", Encoding::UsAscii) else {
            panic!("ascii encode failed");
        };
        let CvtOutcome::Ok(text) = decode(&bytes, Encoding::UsAscii) else {
            panic!("ascii decode failed");
        };
        assert_eq!(text, "hello");
    }

    #[test]
    fn utf16_round_trip_both_orders() {
        for encoding in [Encoding::Utf16Le, Encoding::Utf16Be] {
            let CvtOutcome::Ok(bytes) = encode("héllo \u{1F600}", encoding) else {
                panic!("utf16 encode failed");
            };
            let CvtOutcome::Ok(text) = decode(&bytes, encoding) else {
                panic!("utf16 decode failed");
            };
            assert_eq!(text, "héllo \u{1F600}");
        }
    }

    #[test]
    fn unrepresentable_ascii_reports_position() {
        match encode("ab\u{00E9}", Encoding::UsAscii) {
            CvtOutcome::Bad { at, partial } => {
                assert_eq!(at, 2);
                assert_eq!(partial, b"ab");
            }
            CvtOutcome::Ok(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn bad_utf8_reports_offset() {
        match decode(&[0x61, 0xFF, 0x62], Encoding::Utf8) {
            CvtOutcome::Bad { at, partial } => {
                assert_eq!(at, 1);
                assert_eq!(partial, "a");
            }
            CvtOutcome::Ok(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn encoding_names_fold() {
        assert_eq!(Encoding::from_name("us-ascii"), Some(Encoding::UsAscii));
        assert_eq!(Encoding::from_name("UTF_8"), Some(Encoding::Utf8));
        assert_eq!(Encoding::from_name("utf-16le"), Some(Encoding::Utf16Le));
        assert_eq!(Encoding::from_name("klingon"), None);
    }
}
