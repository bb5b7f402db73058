//! `MEng.System.Runtime.FileSys`: sandboxed filesystem operations.
//!
//! Every path a program supplies goes through the engine's file resolver;
//! a path that escapes the sandbox never reaches the host filesystem. Host
//! errors are logged through the tracer and re-raised as this class's
//! error enum.

use std::fs;

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

pub(crate) const CLASS_PATH: &str = "MEng.System.Runtime.FileSys";

/// Error ordinals of `FileSys.FileSysErrs`.
const ERR_OPEN_FAILED: u32 = 0;
const ERR_PATH_NOT_FQ: u32 = 1;
const ERR_COPY_FAILED: u32 = 2;
const ERR_DEL_FAILED: u32 = 3;
const ERR_MAKE_FAILED: u32 = 4;
const ERR_LIST_FAILED: u32 = 5;

#[derive(Debug, Default)]
pub struct FileSysClass {
    errs: ClassId,
    file_exists: MethodId,
    dir_exists: MethodId,
    copy_file: MethodId,
    del_file: MethodId,
    make_path: MethodId,
    list_files: MethodId,
    get_file_size: MethodId,
}

impl RuntimeClass for FileSysClass {
    fn register(&mut self, reg: &mut ClassRegistry) -> RegResult<ClassId> {
        let cls = class_shell(CLASS_PATH, reg.core.object, ClassExtent::Final);
        let id = reg.register_class(cls)?;
        let string = reg.core.string;
        let boolean = reg.core.boolean;
        let void = reg.core.void;

        self.errs = reg.register_enum(
            "MEng.System.Runtime.FileSys.FileSysErrs",
            EnumDef::from_pairs(&[
                ("OpenFailed", "the file could not be opened"),
                ("PathNotFQ", "the path is not fully qualified"),
                ("CopyFailed", "the file could not be copied"),
                ("DelFailed", "the file could not be deleted"),
                ("MakeFailed", "the path could not be created"),
                ("ListFailed", "the directory could not be listed"),
            ]),
        )?;
        reg.class_mut(id).add_nested_type(self.errs);

        let mut m = MethodInfo::new("FileExists", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        self.file_exists = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("DirExists", boolean, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        self.dir_exists = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("CopyFile", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("SrcPath", string);
        m.add_in_parm("TarPath", string);
        self.copy_file = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("DelFile", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        self.del_file = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("MakePath", void, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        self.make_path = reg.class_mut(id).add_method(m)?;
        let mut m = MethodInfo::new("ListFiles", reg.core.card4, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        m.add_out_parm("ToFill", reg.core.string_list);
        self.list_files = reg.class_mut(id).add_method(m.const_method())?;
        let mut m = MethodInfo::new("GetFileSize", reg.core.card8, MethodExtent::Final, Visibility::Public);
        m.add_in_parm("Path", string);
        self.get_file_size = reg.class_mut(id).add_method(m.const_method())?;
        Ok(id)
    }

    fn make_storage(&self, class_id: ClassId, is_const: bool) -> Value {
        let mut value = Value::new(class_id, Payload::FileSys);
        value.set_const(is_const);
        value
    }

    fn invoke(&self, engine: &mut MacroEngine, call: &NativeCall) -> RunResult<NativeResult> {
        let mid = call.method_id;
        if mid == self.file_exists || mid == self.dir_exists {
            let host = self.expand_parm(engine, 0)?;
            let meta = fs::metadata(&host);
            let result = match meta {
                Ok(meta) => {
                    if mid == self.file_exists {
                        meta.is_file()
                    } else {
                        meta.is_dir()
                    }
                }
                Err(_) => false,
            };
            engine.set_ret(Payload::Bool(result))?;
        } else if mid == self.copy_file {
            let src = self.expand_parm(engine, 0)?;
            let tar = self.expand_parm(engine, 1)?;
            if let Err(err) = fs::copy(&src, &tar) {
                return Err(self.host_err(engine, ERR_COPY_FAILED, &err));
            }
        } else if mid == self.del_file {
            let host = self.expand_parm(engine, 0)?;
            if let Err(err) = fs::remove_file(&host) {
                return Err(self.host_err(engine, ERR_DEL_FAILED, &err));
            }
        } else if mid == self.make_path {
            let host = self.expand_parm(engine, 0)?;
            if let Err(err) = fs::create_dir_all(&host) {
                return Err(self.host_err(engine, ERR_MAKE_FAILED, &err));
            }
        } else if mid == self.list_files {
            let host = self.expand_parm(engine, 0)?;
            let entries = match fs::read_dir(&host) {
                Ok(entries) => entries,
                Err(err) => return Err(self.host_err(engine, ERR_LIST_FAILED, &err)),
            };
            let mut names: Vec<String> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort_unstable();
            let count = names.len() as u32;
            match &mut engine.parm_mut(1)?.payload {
                Payload::StrList(list) => list.replace_all(names),
                other => return Err(RunError::internal(format!("ListFiles target is {}", other.kind_name()))),
            }
            engine.set_ret(Payload::Card4(count))?;
        } else if mid == self.get_file_size {
            let host = self.expand_parm(engine, 0)?;
            match fs::metadata(&host) {
                Ok(meta) => engine.set_ret(Payload::Card8(meta.len()))?,
                Err(err) => return Err(self.host_err(engine, ERR_OPEN_FAILED, &err)),
            }
        } else {
            return Ok(NativeResult::Unhandled);
        }
        Ok(NativeResult::Handled)
    }
}

impl FileSysClass {
    /// Expands a program path parameter through the sandbox resolver.
    /// A relative path never reaches the resolver; it is refused here.
    fn expand_parm(&self, engine: &mut MacroEngine, parm: usize) -> RunResult<String> {
        let program_path = engine.parm(parm)?.as_str()?.as_str().to_owned();
        if !program_path.starts_with('/') {
            return Err(engine.throw(
                self.errs,
                ERR_PATH_NOT_FQ,
                format!("'{program_path}' is not fully qualified"),
            ));
        }
        engine.expand_file_path(&program_path)
    }

    fn host_err(&self, engine: &mut MacroEngine, ordinal: u32, err: &std::io::Error) -> RunError {
        let text = err.to_string();
        engine.trace_host_error(CLASS_PATH, &text);
        engine.throw(self.errs, ordinal, text)
    }
}
