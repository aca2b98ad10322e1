//! String bridge - host text to and from the runtime's argv encodings
//!
//! Two forms:
//! - wide: every argument goes through the runtime's locale decoder, the
//!   form `main` entry points expect
//! - bytes: arguments are passed as plain C strings, no decode step
//!
//! Vectors are all-or-nothing: if element `i` fails, elements `0..i` are
//! released before the error is returned.


use core::fmt;
use libc::{c_char, c_int, wchar_t};
use smallvec::SmallVec;

use crate::error::{BindingError, Result};
use crate::guard::{CText, DecodedArgument, EncodedText};
use crate::logging::{debug, warn};
use crate::runtime::Runtime;

/// Decoded wide-character argument vector
pub struct WideArgv {
    args: Vec<DecodedArgument>,
    ptrs: SmallVec<[*mut wchar_t; 8]>,
}

impl WideArgv {
    #[inline]
    pub fn argc(&self) -> c_int {
        self.args.len() as c_int
    }

    /// `wchar_t **` view for the foreign call; valid while `self` lives
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut *mut wchar_t {
        self.ptrs.as_mut_ptr()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedArgument> {
        self.args.iter()
    }

    /// Encode every element back to host text with the runtime's locale
    pub fn to_strings<R: Runtime>(&self, runtime: &R) -> Result<Vec<String>> {
        self.args
            .iter()
            .enumerate()
            .map(|(index, arg)| decode_wide(runtime, arg).map_err(|e| reindex(e, index)))
            .collect()
    }
}

impl fmt::Debug for WideArgv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WideArgv").field("args", &self.args).finish()
    }
}

impl Drop for WideArgv {
    fn drop(&mut self) {
        self.ptrs.clear();
        // Release in reverse acquisition order
        while let Some(arg) = self.args.pop() {
            drop(arg);
        }
    }
}

/// Plain C-string argument vector
pub struct ByteArgv {
    args: Vec<CText>,
    ptrs: SmallVec<[*mut c_char; 8]>,
}

impl ByteArgv {
    #[inline]
    pub fn argc(&self) -> c_int {
        self.args.len() as c_int
    }

    /// `char **` view for the foreign call; valid while `self` lives
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        self.ptrs.as_mut_ptr()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Debug for ByteArgv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArgv").field("args", &self.args).finish()
    }
}

impl Drop for ByteArgv {
    fn drop(&mut self) {
        self.ptrs.clear();
        while let Some(arg) = self.args.pop() {
            drop(arg);
        }
    }
}

/// Locale-decode every argument into the runtime's wide form
///
/// Fails with `BindingError::Encoding` naming the first argument the
/// runtime (or C string conversion) rejects.
pub fn encode_for_interpreter_args<R, S>(runtime: &R, args: &[S]) -> Result<WideArgv>
where
    R: Runtime,
    S: AsRef<str>,
{
    let mut argv = WideArgv {
        args: Vec::with_capacity(args.len()),
        ptrs: SmallVec::with_capacity(args.len()),
    };

    for (index, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        let encoding_error = || BindingError::Encoding {
            index,
            argument: arg.to_string(),
        };

        let text = CText::new("argument", arg).map_err(|_| encoding_error())?;
        let Some(wide) = DecodedArgument::decode(runtime, &text) else {
            warn!(index, argument = arg, runtime = runtime.name(), "locale decode failed");
            // `argv` drops here, releasing elements 0..index
            return Err(encoding_error());
        };

        argv.ptrs.push(wide.as_ptr());
        argv.args.push(wide);
    }

    debug!(argc = argv.len(), "decoded interpreter arguments");
    Ok(argv)
}

/// Convert every argument to a plain C string, no locale step
pub fn encode_byte_args<S: AsRef<str>>(args: &[S]) -> Result<ByteArgv> {
    let mut argv = ByteArgv {
        args: Vec::with_capacity(args.len()),
        ptrs: SmallVec::with_capacity(args.len()),
    };

    for arg in args {
        let text = CText::new("argument", arg.as_ref())?;
        argv.ptrs.push(text.as_mut_ptr());
        argv.args.push(text);
    }

    Ok(argv)
}

/// Locale-encode one decoded argument back to host text
pub fn decode_wide<R: Runtime>(runtime: &R, wide: &DecodedArgument) -> Result<String> {
    let failed = || BindingError::Encoding {
        index: 0,
        argument: format!("<{} wide chars>", wide.len()),
    };

    let encoded = EncodedText::encode(runtime, wide).ok_or_else(failed)?;
    let text = encoded.as_c_str().to_str().map_err(|_| failed())?.to_owned();
    Ok(text)
}

fn reindex(err: BindingError, index: usize) -> BindingError {
    match err {
        BindingError::Encoding { argument, .. } => BindingError::Encoding { index, argument },
        other => other,
    }
}
