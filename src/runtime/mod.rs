//! Runtime seam - the foreign C surface the binding core drives
//!
//! Design: every call the core makes into the embedded interpreter goes
//! through [`Runtime`]. The core never touches ambient globals; backends
//! decide how the calls are linked.
//!
//! Backends:
//! - `cpython` - CPython through `pyo3-ffi` (feature `cpython`)
//! - `fake` - instrumented in-process stand-in used by the unit tests

use libc::{c_char, c_int, c_void, wchar_t, FILE};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[cfg(feature = "cpython")]
pub mod cpython;

#[cfg(test)]
pub(crate) mod fake;

/// How source text is parsed and compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One interactive statement
    Single,
    /// A sequence of statements (module / file)
    File,
    /// A single expression
    Eval,
}

/// Numeric start tokens for each [`ExecutionMode`]
///
/// The values belong to the target runtime's headers. Backends report their
/// own table; configuration may override individual entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTable {
    pub single: c_int,
    pub file: c_int,
    pub eval: c_int,
}

impl ModeTable {
    /// Values observed in CPython 3.x headers
    pub const OBSERVED: ModeTable = ModeTable {
        single: 256,
        file: 257,
        eval: 258,
    };

    /// Start token for a mode
    #[inline]
    pub const fn tag(&self, mode: ExecutionMode) -> c_int {
        match mode {
            ExecutionMode::Single => self.single,
            ExecutionMode::File => self.file,
            ExecutionMode::Eval => self.eval,
        }
    }

    /// Reverse lookup, used when a backend receives a raw start token
    pub fn mode_of(&self, tag: c_int) -> Option<ExecutionMode> {
        [ExecutionMode::Single, ExecutionMode::File, ExecutionMode::Eval]
            .into_iter()
            .find(|&mode| self.tag(mode) == tag)
    }

    /// Apply per-mode overrides from configuration
    pub fn with_overrides(mut self, overrides: &ModeOverrides) -> Self {
        if let Some(single) = overrides.single {
            self.single = single;
        }
        if let Some(file) = overrides.file {
            self.file = file;
        }
        if let Some(eval) = overrides.eval {
            self.eval = eval;
        }
        self
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::OBSERVED
    }
}

/// Optional replacement start tokens, read from the `[modes]` config table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOverrides {
    #[serde(default)]
    pub single: Option<c_int>,
    #[serde(default)]
    pub file: Option<c_int>,
    #[serde(default)]
    pub eval: Option<c_int>,
}

impl ModeOverrides {
    pub fn is_empty(&self) -> bool {
        self.single.is_none() && self.file.is_none() && self.eval.is_none()
    }
}

/// The foreign interpreter's C surface
///
/// Object-returning calls follow the runtime's reference conventions: the
/// `run_string`, `compile_string`, `eval_code`, `call_method` and `get_attr`
/// calls return a new reference (or null on failure); `add_module`,
/// `module_dict` and `sys_object` return borrowed references.
///
/// # Safety
/// Implementors must:
/// - return buffers from `decode_locale` that `raw_free` releases, and
///   buffers from `encode_locale` that `mem_free` releases
/// - keep the reference conventions above
/// - only be driven from the thread that initialized them
pub unsafe trait Runtime {
    /// Opaque foreign object type
    type Object;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Start tokens compiled into this runtime
    fn mode_table(&self) -> ModeTable;

    /// Bring the runtime up
    ///
    /// # Safety
    /// Must be called from the thread that drives the runtime.
    unsafe fn initialize(&self) -> Result<()>;

    /// Tear the runtime down, returning the runtime's status (0 = clean)
    ///
    /// Every object the runtime handed out is invalid afterwards, so this is
    /// only reachable through `Interpreter::finalize(self)` and `Drop`:
    ///
    /// ```compile_fail
    /// fn finalize_through_shared_ref<R: embedpy::Runtime>(runtime: &R) -> i32 {
    ///     runtime.finalize()
    /// }
    /// ```
    ///
    /// # Safety
    /// No handle produced by this runtime may be alive.
    unsafe fn finalize(&self) -> i32;

    fn is_initialized(&self) -> bool;

    /// Locale-decode a C string into a wide string (null on failure)
    unsafe fn decode_locale(&self, arg: *const c_char) -> *mut wchar_t;

    /// Deallocator for `decode_locale` buffers
    unsafe fn raw_free(ptr: *mut c_void);

    /// Locale-encode a wide string into a C string (null on failure)
    unsafe fn encode_locale(&self, text: *const wchar_t) -> *mut c_char;

    /// Deallocator for `encode_locale` buffers
    unsafe fn mem_free(ptr: *mut c_void);

    unsafe fn main(&self, argc: c_int, argv: *mut *mut wchar_t) -> c_int;

    unsafe fn bytes_main(&self, argc: c_int, argv: *mut *mut c_char) -> c_int;

    unsafe fn run_any_file(&self, fp: *mut FILE, filename: *const c_char) -> c_int;

    unsafe fn run_simple_string(&self, command: *const c_char) -> c_int;

    unsafe fn run_string(
        &self,
        source: *const c_char,
        start: c_int,
        globals: *mut Self::Object,
        locals: *mut Self::Object,
    ) -> *mut Self::Object;

    unsafe fn compile_string(
        &self,
        source: *const c_char,
        filename: *const c_char,
        start: c_int,
    ) -> *mut Self::Object;

    unsafe fn eval_code(
        &self,
        code: *mut Self::Object,
        globals: *mut Self::Object,
        locals: *mut Self::Object,
    ) -> *mut Self::Object;

    unsafe fn inc_ref(&self, obj: *mut Self::Object);

    unsafe fn dec_ref(&self, obj: *mut Self::Object);

    unsafe fn call_method(
        &self,
        obj: *mut Self::Object,
        name: *const c_char,
        args: &[*mut Self::Object],
    ) -> *mut Self::Object;

    unsafe fn get_attr(&self, obj: *mut Self::Object, name: *const c_char) -> *mut Self::Object;

    /// Whether `obj` is a text object
    unsafe fn is_text(&self, obj: *mut Self::Object) -> bool;

    /// UTF-8 view of a text object, null when `obj` is not text or has no
    /// UTF-8 form (lone surrogates)
    unsafe fn as_utf8(&self, obj: *mut Self::Object) -> *const c_char;

    /// Integer value of `obj`, `None` when it is not an integer that fits
    unsafe fn as_i64(&self, obj: *mut Self::Object) -> Option<i64>;

    unsafe fn type_name(&self, obj: *mut Self::Object) -> String;

    unsafe fn add_module(&self, name: *const c_char) -> *mut Self::Object;

    unsafe fn module_dict(&self, module: *mut Self::Object) -> *mut Self::Object;

    unsafe fn sys_object(&self, name: *const c_char) -> *mut Self::Object;

    /// Hand the pending foreign error (if any) to the runtime's own reporter
    unsafe fn print_error(&self);
}

