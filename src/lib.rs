//! embedpy - scoped bindings to an embedded interpreter's very high level API
//!
//! The crate drives an embedded interpreter (CPython with the `cpython`
//! feature) through its "very high level" C entry points: run-as-main,
//! run-file, run-string, compile-string and eval-code. The work is in the
//! boundary, not the calls:
//!
//! - `bridge` - host text to the runtime's wide/byte argv encodings and back
//! - `guard` - one owner type per foreign allocation, released exactly once
//! - `handle` - foreign objects as new/borrowed reference handles
//! - `interpreter` - the entry points, sequencing the three above
//! - `runtime` - the `Runtime` trait every foreign call goes through
//!
//! ```ignore
//! use embedpy::{ExecutionMode, Interpreter};
//! use embedpy::runtime::cpython::CPython;
//!
//! let interp = Interpreter::new(CPython::acquire()?)?;
//! let code = interp.compile_string("1+1", "<string>", ExecutionMode::Eval)?.unwrap();
//! let globals = interp.main_globals()?;
//! let two = interp.eval_code(&code, &globals, None)?.unwrap();
//! assert_eq!(two.to_i64()?, 2);
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod guard;
pub mod handle;
pub mod interpreter;
pub mod logging;
pub mod runtime;

pub use bridge::{decode_wide, encode_byte_args, encode_for_interpreter_args, ByteArgv, WideArgv};
pub use config::EmbedConfig;
pub use error::{BindingError, Result};
pub use guard::{ledger, LedgerSnapshot};
pub use handle::{ForeignHandle, Ownership};
pub use interpreter::Interpreter;
pub use runtime::{ExecutionMode, ModeTable, Runtime};
