//! Resource guard - scoped ownership of every foreign allocation
//!
//! Design: one owner type per allocation source, each with exactly one
//! release path baked into its `Drop`:
//! 1. `CText` - C string buffers handed to the runtime
//! 2. `DecodedArgument` - locale-decoded wide strings, freed by the
//!    runtime's raw allocator
//! 3. `EncodedText` - locale-encoded byte strings, freed by the runtime's
//!    object allocator
//! 4. `OpenFile` - `FILE*` handles, closed with `fclose`
//!
//! Owners only exist for successful acquisitions; there is no way to build
//! one around a null pointer or to release one twice. Locals drop in reverse
//! declaration order, which gives stack-disciplined release per operation.
//!
//! Every acquire/release is counted in a per-thread ledger so callers can
//! check that an operation returned to baseline.

mod ledger;


pub use ledger::{ledger, ledger_for, LedgerSnapshot, ResourceKind};

use core::marker::PhantomData;
use core::ptr::NonNull;
use libc::{c_char, c_void, wchar_t, FILE};
use std::ffi::{CStr, CString};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BindingError, Result};
use crate::logging::trace;
use crate::runtime::Runtime;

/// NUL-terminated string owned by the binding layer
///
/// Not `Send`: its release is counted in the acquiring thread's ledger.
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<embedpy::guard::CText>();
/// ```
pub struct CText {
    inner: CString,
    _thread_bound: PhantomData<*const ()>,
}

impl CText {
    /// Convert host text, naming it as `what` in errors
    pub fn new(what: &'static str, text: &str) -> Result<Self> {
        Self::from_bytes(what, text.as_bytes().to_vec())
    }

    pub fn from_bytes(what: &'static str, bytes: Vec<u8>) -> Result<Self> {
        let inner = CString::new(bytes).map_err(|e| BindingError::interior_nul(what, &e))?;
        ledger::acquire(ResourceKind::CText, inner.as_ptr() as *const c_void);
        Ok(Self {
            inner,
            _thread_bound: PhantomData,
        })
    }

    /// Convert a filesystem path using its native byte form
    #[cfg(unix)]
    pub fn from_path(path: &Path) -> Result<Self> {
        use std::os::unix::ffi::OsStrExt;
        Self::from_bytes("path", path.as_os_str().as_bytes().to_vec())
    }

    #[cfg(not(unix))]
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::new("path", &path.to_string_lossy())
    }

    #[inline]
    pub fn as_ptr(&self) -> *const c_char {
        self.inner.as_ptr()
    }

    /// Mutable view for C signatures that take `char **` but never write
    #[inline]
    pub(crate) fn as_mut_ptr(&self) -> *mut c_char {
        self.inner.as_ptr() as *mut c_char
    }

    #[inline]
    pub fn as_c_str(&self) -> &CStr {
        &self.inner
    }
}

impl Drop for CText {
    fn drop(&mut self) {
        ledger::release(ResourceKind::CText, self.inner.as_ptr() as *const c_void);
    }
}

impl core::fmt::Debug for CText {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("CText").field(&self.inner).finish()
    }
}

/// Wide string produced by the runtime's locale decoder
///
/// Carries the deallocator that matches the allocator which produced it.
pub struct DecodedArgument {
    ptr: NonNull<wchar_t>,
    free: unsafe fn(*mut c_void),
}

impl DecodedArgument {
    /// Decode `text` with the runtime's locale, `None` when the runtime
    /// rejects it
    pub fn decode<R: Runtime>(runtime: &R, text: &CText) -> Option<Self> {
        let raw = unsafe { runtime.decode_locale(text.as_ptr()) };
        let ptr = NonNull::new(raw)?;
        ledger::acquire(ResourceKind::DecodedArgument, raw as *const c_void);
        Some(Self {
            ptr,
            free: R::raw_free,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut wchar_t {
        self.ptr.as_ptr()
    }

    /// Number of wide characters before the terminator
    pub fn len(&self) -> usize {
        let mut n = 0;
        unsafe {
            while *self.ptr.as_ptr().add(n) != 0 {
                n += 1;
            }
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DecodedArgument {
    fn drop(&mut self) {
        let raw = self.ptr.as_ptr() as *mut c_void;
        ledger::release(ResourceKind::DecodedArgument, raw);
        unsafe { (self.free)(raw) };
    }
}

impl core::fmt::Debug for DecodedArgument {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodedArgument")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .finish()
    }
}

/// Byte string produced by the runtime's locale encoder
pub struct EncodedText {
    ptr: NonNull<c_char>,
    free: unsafe fn(*mut c_void),
}

impl EncodedText {
    /// Encode a wide string back to bytes, `None` when the runtime rejects it
    pub fn encode<R: Runtime>(runtime: &R, wide: &DecodedArgument) -> Option<Self> {
        let raw = unsafe { runtime.encode_locale(wide.as_ptr()) };
        let ptr = NonNull::new(raw)?;
        ledger::acquire(ResourceKind::EncodedText, raw as *const c_void);
        Some(Self {
            ptr,
            free: R::mem_free,
        })
    }

    #[inline]
    pub fn as_c_str(&self) -> &CStr {
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }
}

impl Drop for EncodedText {
    fn drop(&mut self) {
        let raw = self.ptr.as_ptr() as *mut c_void;
        ledger::release(ResourceKind::EncodedText, raw);
        unsafe { (self.free)(raw) };
    }
}

/// C `FILE*` opened for the runtime, closed on drop
pub struct OpenFile {
    fp: NonNull<FILE>,
    path: PathBuf,
}

impl OpenFile {
    /// Open `path` with a C `fopen` mode string such as `"r"`
    pub fn open(path: &Path, c_path: &CText, mode: &CText) -> Result<Self> {
        let raw = unsafe { libc::fopen(c_path.as_ptr(), mode.as_ptr()) };
        match NonNull::new(raw) {
            Some(fp) => {
                ledger::acquire(ResourceKind::OpenFile, raw as *const c_void);
                Ok(Self {
                    fp,
                    path: path.to_path_buf(),
                })
            }
            None => Err(BindingError::Io {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            }),
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut FILE {
        self.fp.as_ptr()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenFile")
            .field("fp", &self.fp)
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        let raw = self.fp.as_ptr();
        ledger::release(ResourceKind::OpenFile, raw as *const c_void);
        if unsafe { libc::fclose(raw) } != 0 {
            trace!(path = %self.path.display(), "fclose reported an error");
        }
    }
}
