//! CPython backend through `pyo3-ffi`
//!
//! Design: `pyo3-ffi` supplies the object, memory and lifecycle API and the
//! start-token constants. The run/compile/main entry points are declared
//! here against their exported symbols: several of the documented names
//! (`PyRun_AnyFile`, `PyRun_SimpleString`, `Py_CompileString`) are macros
//! over these `*Flags` / `*ExFlags` forms.
//!
//! One `CPython` value may exist per process. It is neither `Send` nor
//! `Sync`: the runtime is driven from the thread that initialized it.

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use libc::{c_char, c_int, c_void, wchar_t, FILE};
use pyo3_ffi as ffi;
use std::ffi::CStr;

use super::{ModeTable, Runtime};
use crate::error::{BindingError, Result};
use crate::logging::{debug, trace};

extern "C" {
    fn Py_Main(argc: c_int, argv: *mut *mut wchar_t) -> c_int;
    fn Py_BytesMain(argc: c_int, argv: *mut *mut c_char) -> c_int;
    fn PyRun_AnyFileExFlags(
        fp: *mut FILE,
        filename: *const c_char,
        closeit: c_int,
        flags: *mut c_void,
    ) -> c_int;
    fn PyRun_SimpleStringFlags(command: *const c_char, flags: *mut c_void) -> c_int;
    fn PyRun_StringFlags(
        source: *const c_char,
        start: c_int,
        globals: *mut ffi::PyObject,
        locals: *mut ffi::PyObject,
        flags: *mut c_void,
    ) -> *mut ffi::PyObject;
    fn Py_CompileStringExFlags(
        source: *const c_char,
        filename: *const c_char,
        start: c_int,
        flags: *mut c_void,
        optimize: c_int,
    ) -> *mut ffi::PyObject;
}

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// The process's CPython runtime
pub struct CPython {
    _thread_bound: PhantomData<*mut ()>,
}

impl CPython {
    /// Claim the process-wide runtime slot
    pub fn acquire() -> Result<Self> {
        ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BindingError::AlreadyInitialized)?;
        Ok(Self {
            _thread_bound: PhantomData,
        })
    }
}

impl Drop for CPython {
    fn drop(&mut self) {
        ACTIVE.store(false, Ordering::Release);
    }
}

unsafe impl Runtime for CPython {
    type Object = ffi::PyObject;

    fn name(&self) -> &'static str {
        "cpython"
    }

    fn mode_table(&self) -> ModeTable {
        ModeTable {
            single: ffi::Py_single_input,
            file: ffi::Py_file_input,
            eval: ffi::Py_eval_input,
        }
    }

    unsafe fn initialize(&self) -> Result<()> {
        if ffi::Py_IsInitialized() == 0 {
            ffi::Py_Initialize();
            debug!("Py_Initialize complete");
        }
        Ok(())
    }

    unsafe fn finalize(&self) -> i32 {
        ffi::Py_FinalizeEx()
    }

    fn is_initialized(&self) -> bool {
        unsafe { ffi::Py_IsInitialized() != 0 }
    }

    unsafe fn decode_locale(&self, arg: *const c_char) -> *mut wchar_t {
        ffi::Py_DecodeLocale(arg, ptr::null_mut())
    }

    unsafe fn raw_free(ptr: *mut c_void) {
        ffi::PyMem_RawFree(ptr)
    }

    unsafe fn encode_locale(&self, text: *const wchar_t) -> *mut c_char {
        ffi::Py_EncodeLocale(text, ptr::null_mut())
    }

    unsafe fn mem_free(ptr: *mut c_void) {
        ffi::PyMem_Free(ptr)
    }

    unsafe fn main(&self, argc: c_int, argv: *mut *mut wchar_t) -> c_int {
        Py_Main(argc, argv)
    }

    unsafe fn bytes_main(&self, argc: c_int, argv: *mut *mut c_char) -> c_int {
        Py_BytesMain(argc, argv)
    }

    unsafe fn run_any_file(&self, fp: *mut FILE, filename: *const c_char) -> c_int {
        // closeit = 0: the guard owns the FILE
        PyRun_AnyFileExFlags(fp, filename, 0, ptr::null_mut())
    }

    unsafe fn run_simple_string(&self, command: *const c_char) -> c_int {
        PyRun_SimpleStringFlags(command, ptr::null_mut())
    }

    unsafe fn run_string(
        &self,
        source: *const c_char,
        start: c_int,
        globals: *mut ffi::PyObject,
        locals: *mut ffi::PyObject,
    ) -> *mut ffi::PyObject {
        PyRun_StringFlags(source, start, globals, locals, ptr::null_mut())
    }

    unsafe fn compile_string(
        &self,
        source: *const c_char,
        filename: *const c_char,
        start: c_int,
    ) -> *mut ffi::PyObject {
        Py_CompileStringExFlags(source, filename, start, ptr::null_mut(), -1)
    }

    unsafe fn eval_code(
        &self,
        code: *mut ffi::PyObject,
        globals: *mut ffi::PyObject,
        locals: *mut ffi::PyObject,
    ) -> *mut ffi::PyObject {
        ffi::PyEval_EvalCode(code, globals, locals)
    }

    unsafe fn inc_ref(&self, obj: *mut ffi::PyObject) {
        ffi::Py_IncRef(obj)
    }

    unsafe fn dec_ref(&self, obj: *mut ffi::PyObject) {
        ffi::Py_DecRef(obj)
    }

    unsafe fn call_method(
        &self,
        obj: *mut ffi::PyObject,
        name: *const c_char,
        args: &[*mut ffi::PyObject],
    ) -> *mut ffi::PyObject {
        let method = ffi::PyObject_GetAttrString(obj, name);
        if method.is_null() {
            return ptr::null_mut();
        }

        let tuple = ffi::PyTuple_New(args.len() as ffi::Py_ssize_t);
        if tuple.is_null() {
            ffi::Py_DecRef(method);
            return ptr::null_mut();
        }
        for (i, &arg) in args.iter().enumerate() {
            // PyTuple_SetItem steals the reference
            ffi::Py_IncRef(arg);
            ffi::PyTuple_SetItem(tuple, i as ffi::Py_ssize_t, arg);
        }

        trace!(args = args.len(), "PyObject_CallObject");
        let result = ffi::PyObject_CallObject(method, tuple);
        ffi::Py_DecRef(tuple);
        ffi::Py_DecRef(method);
        result
    }

    unsafe fn get_attr(&self, obj: *mut ffi::PyObject, name: *const c_char) -> *mut ffi::PyObject {
        ffi::PyObject_GetAttrString(obj, name)
    }

    unsafe fn is_text(&self, obj: *mut ffi::PyObject) -> bool {
        ffi::PyUnicode_Check(obj) != 0
    }

    unsafe fn as_utf8(&self, obj: *mut ffi::PyObject) -> *const c_char {
        if !self.is_text(obj) {
            return ptr::null();
        }
        let text = ffi::PyUnicode_AsUTF8(obj);
        if text.is_null() {
            // lone surrogates cannot be encoded
            ffi::PyErr_Clear();
        }
        text
    }

    unsafe fn as_i64(&self, obj: *mut ffi::PyObject) -> Option<i64> {
        if ffi::PyLong_Check(obj) == 0 {
            return None;
        }
        let value = ffi::PyLong_AsLongLong(obj);
        if value == -1 && !ffi::PyErr_Occurred().is_null() {
            // overflow
            ffi::PyErr_Clear();
            return None;
        }
        Some(value)
    }

    unsafe fn type_name(&self, obj: *mut ffi::PyObject) -> String {
        let ty = ffi::Py_TYPE(obj);
        if ty.is_null() || (*ty).tp_name.is_null() {
            return "<unknown>".to_string();
        }
        CStr::from_ptr((*ty).tp_name).to_string_lossy().into_owned()
    }

    unsafe fn add_module(&self, name: *const c_char) -> *mut ffi::PyObject {
        ffi::PyImport_AddModule(name)
    }

    unsafe fn module_dict(&self, module: *mut ffi::PyObject) -> *mut ffi::PyObject {
        ffi::PyModule_GetDict(module)
    }

    unsafe fn sys_object(&self, name: *const c_char) -> *mut ffi::PyObject {
        ffi::PySys_GetObject(name)
    }

    unsafe fn print_error(&self) {
        if !ffi::PyErr_Occurred().is_null() {
            ffi::PyErr_Print();
        }
    }
}
