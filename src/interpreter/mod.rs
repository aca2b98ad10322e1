//! Entry point facade - the very high level execution API
//!
//! `Interpreter` is the explicit handle on the process-wide runtime. Every
//! operation sequences the same steps:
//! 1. check the runtime is initialized
//! 2. convert host inputs (string bridge) into scoped buffers (guard)
//! 3. make the foreign call
//! 4. wrap returned objects (handle translator)
//! 5. release intermediates in reverse order on every exit path
//!
//! Foreign failures are passed through untouched: a nonzero status is an
//! `Ok` value, a null object is `Ok(None)`. Only binding failures are `Err`.


use std::path::Path;

use crate::bridge::{encode_byte_args, encode_for_interpreter_args};
use crate::config::EmbedConfig;
use crate::error::{BindingError, Result};
use crate::guard::{CText, OpenFile};
use crate::handle::ForeignHandle;
use crate::logging::{debug, debug_span, info, warn};
use crate::runtime::{ExecutionMode, ModeTable, Runtime};

/// Handle type produced by an `Interpreter` over runtime `R`
pub type Handle<'rt, R> = ForeignHandle<'rt, R>;

pub struct Interpreter<R: Runtime> {
    runtime: R,
    modes: ModeTable,
    file_mode: String,
    finalize_on_drop: bool,
}

impl<R: Runtime> std::fmt::Debug for Interpreter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("modes", &self.modes)
            .field("file_mode", &self.file_mode)
            .field("finalize_on_drop", &self.finalize_on_drop)
            .finish_non_exhaustive()
    }
}

impl<R: Runtime> Interpreter<R> {
    /// Initialize `runtime` with the default configuration
    pub fn new(runtime: R) -> Result<Self> {
        Self::with_config(runtime, &EmbedConfig::default())
    }

    /// Validate `config`, then initialize `runtime`
    pub fn with_config(runtime: R, config: &EmbedConfig) -> Result<Self> {
        config.validate()?;
        // The runtime is owned here: no handle can exist yet
        unsafe { runtime.initialize()? };

        let modes = runtime.mode_table().with_overrides(&config.modes);
        if !config.modes.is_empty() {
            debug!(?modes, "start tokens overridden by configuration");
        }
        info!(runtime = runtime.name(), "interpreter runtime initialized");

        Ok(Self {
            runtime,
            modes,
            file_mode: config.interpreter.file_mode.clone(),
            finalize_on_drop: config.interpreter.finalize_on_drop,
        })
    }

    /// The backend, for inspection; lifecycle calls on it are `unsafe`
    #[inline]
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    #[inline]
    pub fn modes(&self) -> ModeTable {
        self.modes
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.is_initialized()
    }

    /// Bring the runtime back up after a `run_main` finalized it
    pub fn ensure_initialized(&mut self) -> Result<()> {
        if !self.runtime.is_initialized() {
            debug!(runtime = self.runtime.name(), "re-initializing runtime");
            // `&mut self`: no handle borrows the runtime
            unsafe { self.runtime.initialize()? };
        }
        Ok(())
    }

    /// Finalize the runtime, returning its teardown status
    pub fn finalize(self) -> i32 {
        let status = if self.runtime.is_initialized() {
            // Consuming `self` ends every handle borrow
            unsafe { self.runtime.finalize() }
        } else {
            0
        };
        info!(runtime = self.runtime.name(), status, "interpreter runtime finalized");
        status
    }

    fn check(&self) -> Result<()> {
        if self.runtime.is_initialized() {
            Ok(())
        } else {
            Err(BindingError::NotInitialized)
        }
    }

    /// Run the runtime's `main` with locale-decoded wide arguments
    ///
    /// `args[0]` is the program name. A nonzero exit status is a normal
    /// result. The foreign main finalizes the runtime before returning, hence
    /// `&mut self`: no handle can be alive across the call.
    pub fn run_main<S: AsRef<str>>(&mut self, args: &[S]) -> Result<i32> {
        self.check()?;
        if args.is_empty() {
            return Err(BindingError::EmptyArguments);
        }
        let _span = debug_span!("run_main", argc = args.len()).entered();

        let mut argv = encode_for_interpreter_args(&self.runtime, args)?;
        let status = unsafe { self.runtime.main(argv.argc(), argv.as_mut_ptr()) };
        drop(argv);

        self.after_main(status);
        Ok(status)
    }

    /// Run the runtime's `main` with plain byte-string arguments
    pub fn run_bytes_main<S: AsRef<str>>(&mut self, args: &[S]) -> Result<i32> {
        self.check()?;
        if args.is_empty() {
            return Err(BindingError::EmptyArguments);
        }
        let _span = debug_span!("run_bytes_main", argc = args.len()).entered();

        let mut argv = encode_byte_args(args)?;
        let status = unsafe { self.runtime.bytes_main(argv.argc(), argv.as_mut_ptr()) };
        drop(argv);

        self.after_main(status);
        Ok(status)
    }

    fn after_main(&self, status: i32) {
        debug!(status, finalized = !self.runtime.is_initialized(), "main returned");
    }

    /// Open `path` and run it with the runtime's run-any-file entry point
    ///
    /// An open failure is `BindingError::Io` and the runtime is never called.
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<i32> {
        self.check()?;
        let path = path.as_ref();
        let _span = debug_span!("run_file", path = %path.display()).entered();

        let c_path = CText::from_path(path)?;
        let mode = CText::new("file mode", &self.file_mode)?;
        let file = OpenFile::open(path, &c_path, &mode).map_err(|err| {
            warn!(path = %path.display(), error = %err, "cannot open script");
            err
        })?;

        let status = unsafe { self.runtime.run_any_file(file.as_ptr(), c_path.as_ptr()) };
        debug!(status, "run_file returned");
        Ok(status)
    }

    /// Run `source` in the `__main__` namespace, returning the status verbatim
    pub fn run_simple_string(&self, source: &str) -> Result<i32> {
        self.check()?;
        let command = CText::new("source", source)?;
        let status = unsafe { self.runtime.run_simple_string(command.as_ptr()) };
        debug!(status, bytes = source.len(), "run_simple_string returned");
        Ok(status)
    }

    /// Compile and run `source` against explicit namespaces
    ///
    /// `locals` defaults to `globals`. `Ok(None)` means the runtime raised.
    pub fn run_string<'rt>(
        &'rt self,
        source: &str,
        mode: ExecutionMode,
        globals: &Handle<'rt, R>,
        locals: Option<&Handle<'rt, R>>,
    ) -> Result<Option<Handle<'rt, R>>> {
        self.check()?;
        let c_source = CText::new("source", source)?;
        let locals = locals.unwrap_or(globals);

        let raw = unsafe {
            self.runtime.run_string(
                c_source.as_ptr(),
                self.modes.tag(mode),
                globals.as_ptr(),
                locals.as_ptr(),
            )
        };
        Ok(unsafe { ForeignHandle::new_reference(&self.runtime, raw) })
    }

    /// Compile `source` into a code object; `Ok(None)` on a compile error
    ///
    /// Diagnostics stay in the runtime's error state (see `print_error`).
    pub fn compile_string(
        &self,
        source: &str,
        filename: &str,
        mode: ExecutionMode,
    ) -> Result<Option<Handle<'_, R>>> {
        self.check()?;
        let c_source = CText::new("source", source)?;
        let c_filename = CText::new("filename", filename)?;

        let raw = unsafe {
            self.runtime
                .compile_string(c_source.as_ptr(), c_filename.as_ptr(), self.modes.tag(mode))
        };
        let code = unsafe { ForeignHandle::new_reference(&self.runtime, raw) };
        if code.is_none() {
            debug!(filename, ?mode, "compile failed");
        }
        Ok(code)
    }

    /// Evaluate a code object; `locals` defaults to `globals`
    pub fn eval_code<'rt>(
        &'rt self,
        code: &Handle<'rt, R>,
        globals: &Handle<'rt, R>,
        locals: Option<&Handle<'rt, R>>,
    ) -> Result<Option<Handle<'rt, R>>> {
        self.check()?;
        let locals = locals.unwrap_or(globals);

        let raw = unsafe {
            self.runtime
                .eval_code(code.as_ptr(), globals.as_ptr(), locals.as_ptr())
        };
        Ok(unsafe { ForeignHandle::new_reference(&self.runtime, raw) })
    }

    /// Borrowed handle on the `__main__` module, created if needed
    pub fn main_module(&self) -> Result<Handle<'_, R>> {
        self.module("__main__")
    }

    pub fn module(&self, name: &str) -> Result<Handle<'_, R>> {
        self.check()?;
        let c_name = CText::new("module name", name)?;
        let raw = unsafe { self.runtime.add_module(c_name.as_ptr()) };
        let module = unsafe { ForeignHandle::borrowed(&self.runtime, raw) };
        module.ok_or_else(|| BindingError::ForeignCall {
            operation: format!("add module '{}'", name),
        })
    }

    /// Borrowed handle on `__main__.__dict__`
    pub fn main_globals(&self) -> Result<Handle<'_, R>> {
        let module = self.main_module()?;
        let raw = unsafe { self.runtime.module_dict(module.as_ptr()) };
        let dict = unsafe { ForeignHandle::borrowed(&self.runtime, raw) };
        dict.ok_or_else(|| BindingError::ForeignCall {
            operation: "module dict of '__main__'".to_string(),
        })
    }

    /// Borrowed handle on `sys.<name>`; `Ok(None)` when it does not exist
    pub fn sys_object(&self, name: &str) -> Result<Option<Handle<'_, R>>> {
        self.check()?;
        let c_name = CText::new("sys attribute", name)?;
        let raw = unsafe { self.runtime.sys_object(c_name.as_ptr()) };
        Ok(unsafe { ForeignHandle::borrowed(&self.runtime, raw) })
    }

    /// Report and clear the runtime's pending error, if any
    pub fn print_error(&self) {
        if self.runtime.is_initialized() {
            unsafe { self.runtime.print_error() };
        }
    }
}

impl<R: Runtime> Drop for Interpreter<R> {
    fn drop(&mut self) {
        if self.finalize_on_drop && self.runtime.is_initialized() {
            let status = unsafe { self.runtime.finalize() };
            debug!(runtime = self.runtime.name(), status, "runtime finalized on drop");
        }
    }
}
