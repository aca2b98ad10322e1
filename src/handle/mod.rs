//! Handle translator - foreign object pointers as host-managed handles
//!
//! A `ForeignHandle` is either a *new* reference (the handle owns one unit of
//! the foreign refcount) or a *borrowed* one (the runtime keeps ownership).
//! Owned handles release their unit exactly once: through `dec_ref`, or on
//! drop. Borrowed handles never touch the refcount.
//!
//! Handles borrow the runtime, so none can outlive finalization.


use core::fmt;
use core::ptr::NonNull;
use smallvec::SmallVec;
use std::ffi::CStr;

use crate::error::{BindingError, Result};
use crate::guard::CText;
use crate::logging::trace;
use crate::runtime::Runtime;

/// Whether a handle owns a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    New,
    Borrowed,
}

pub struct ForeignHandle<'rt, R: Runtime> {
    ptr: NonNull<R::Object>,
    runtime: &'rt R,
    ownership: Ownership,
}

impl<'rt, R: Runtime> ForeignHandle<'rt, R> {
    /// Take ownership of a new reference; `None` if the foreign call failed
    ///
    /// # Safety
    /// `raw` must be null or a new reference produced by `runtime`.
    pub unsafe fn new_reference(runtime: &'rt R, raw: *mut R::Object) -> Option<Self> {
        Self::wrap(runtime, raw, Ownership::New)
    }

    /// Wrap a borrowed reference; `None` if the foreign call failed
    ///
    /// # Safety
    /// `raw` must be null or an object that stays alive while the handle does.
    pub unsafe fn borrowed(runtime: &'rt R, raw: *mut R::Object) -> Option<Self> {
        Self::wrap(runtime, raw, Ownership::Borrowed)
    }

    #[inline]
    fn wrap(runtime: &'rt R, raw: *mut R::Object, ownership: Ownership) -> Option<Self> {
        NonNull::new(raw).map(|ptr| Self {
            ptr,
            runtime,
            ownership,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut R::Object {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        self.ownership == Ownership::New
    }

    /// Release this handle's reference (no-op for borrowed handles)
    #[inline]
    pub fn dec_ref(self) {
        drop(self)
    }

    /// New owned reference to the same object
    pub fn clone_ref(&self) -> Self {
        unsafe { self.runtime.inc_ref(self.ptr.as_ptr()) };
        Self {
            ptr: self.ptr,
            runtime: self.runtime,
            ownership: Ownership::New,
        }
    }

    /// Give up the handle without releasing; the caller now owns whatever
    /// reference it held
    pub fn into_raw(self) -> *mut R::Object {
        let ptr = self.ptr.as_ptr();
        core::mem::forget(self);
        ptr
    }

    /// Call `self.name(*args)`, returning the new reference it produces
    pub fn call_method(&self, name: &str, args: &[&ForeignHandle<'rt, R>]) -> Result<Self> {
        let c_name = CText::new("method name", name)?;
        let raw_args: SmallVec<[*mut R::Object; 4]> = args.iter().map(|a| a.as_ptr()).collect();

        trace!(method = name, args = raw_args.len(), "foreign method call");
        let raw = unsafe {
            self.runtime
                .call_method(self.ptr.as_ptr(), c_name.as_ptr(), &raw_args)
        };

        let handle = unsafe { Self::new_reference(self.runtime, raw) };
        handle.ok_or_else(|| BindingError::ForeignCall {
            operation: format!("method '{}'", name),
        })
    }

    /// Look up attribute `name`
    pub fn get_attr(&self, name: &str) -> Result<Self> {
        let c_name = CText::new("attribute name", name)?;
        let raw = unsafe { self.runtime.get_attr(self.ptr.as_ptr(), c_name.as_ptr()) };

        let handle = unsafe { Self::new_reference(self.runtime, raw) };
        handle.ok_or_else(|| BindingError::ForeignCall {
            operation: format!("attribute '{}'", name),
        })
    }

    /// Extract the object as UTF-8 text
    pub fn to_text(&self) -> Result<String> {
        if !unsafe { self.runtime.is_text(self.ptr.as_ptr()) } {
            return Err(self.mismatch("str"));
        }
        let raw = unsafe { self.runtime.as_utf8(self.ptr.as_ptr()) };
        let unencodable = || BindingError::ForeignCall {
            operation: "UTF-8 encoding of str".to_string(),
        };
        if raw.is_null() {
            return Err(unencodable());
        }
        let text = unsafe { CStr::from_ptr(raw) };
        text.to_str().map(str::to_owned).map_err(|_| unencodable())
    }

    /// Extract the object as a signed 64-bit integer
    pub fn to_i64(&self) -> Result<i64> {
        let value = unsafe { self.runtime.as_i64(self.ptr.as_ptr()) };
        value.ok_or_else(|| self.mismatch("int"))
    }

    /// Foreign type name, for diagnostics
    pub fn type_name(&self) -> String {
        unsafe { self.runtime.type_name(self.ptr.as_ptr()) }
    }

    fn mismatch(&self, expected: &'static str) -> BindingError {
        BindingError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

impl<R: Runtime> Drop for ForeignHandle<'_, R> {
    fn drop(&mut self) {
        if self.ownership == Ownership::New {
            unsafe { self.runtime.dec_ref(self.ptr.as_ptr()) };
        }
    }
}

impl<R: Runtime> fmt::Debug for ForeignHandle<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("ptr", &self.ptr)
            .field("ownership", &self.ownership)
            .finish()
    }
}
