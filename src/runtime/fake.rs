//! In-process stand-in for an interpreter runtime
//!
//! Instrumented for leak and ownership checks:
//! - every object allocation/free is counted per thread
//! - every decode/encode buffer is tracked per allocator, and freeing one
//!   with the wrong deallocator panics
//! - releasing an object that is not alive panics
//!
//! It understands a tiny language: integer sums, quoted strings,
//! `print(expr)`, `raise Name`, `pass`, `import x` and `#` comments.

use core::cell::{Cell, RefCell};
use libc::{c_char, c_int, c_void, wchar_t, FILE};
use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::ptr;
use std::rc::Rc;

use super::{ExecutionMode, ModeTable, Runtime};
use crate::error::Result;

thread_local! {
    static LIVE_OBJECTS: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
    static RAW_BLOCKS: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
    static MEM_BLOCKS: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Objects alive on this thread
pub(crate) fn live_objects() -> usize {
    LIVE_OBJECTS.with(|live| live.borrow().len())
}

/// `decode_locale` buffers not yet released
pub(crate) fn raw_blocks() -> usize {
    RAW_BLOCKS.with(|blocks| blocks.borrow().len())
}

/// `encode_locale` buffers not yet released
pub(crate) fn mem_blocks() -> usize {
    MEM_BLOCKS.with(|blocks| blocks.borrow().len())
}

pub(crate) struct FakeObject {
    refcount: Cell<isize>,
    value: Value,
}

pub(crate) enum Value {
    None,
    Int(i64),
    Text(CString),
    /// A str holding a lone surrogate, with no UTF-8 form
    Unencodable,
    Code { source: String, mode: ExecutionMode },
    Dict,
    Module { dict: *mut FakeObject },
    Stdout,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Int(_) => "int",
            Value::Text(_) | Value::Unencodable => "str",
            Value::Code { .. } => "code",
            Value::Dict => "dict",
            Value::Module { .. } => "module",
            Value::Stdout => "_io.StringIO",
        }
    }

    fn display(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Text(s) => s.to_string_lossy().into_owned(),
            other => format!("<{} object>", other.type_name()),
        }
    }
}

fn alloc(value: Value) -> *mut FakeObject {
    let obj = Box::into_raw(Box::new(FakeObject {
        refcount: Cell::new(1),
        value,
    }));
    LIVE_OBJECTS.with(|live| live.borrow_mut().insert(obj as usize));
    obj
}

fn assert_live(obj: *mut FakeObject) {
    let alive = LIVE_OBJECTS.with(|live| live.borrow().contains(&(obj as usize)));
    assert!(alive, "object {:p} is not alive", obj);
}

unsafe fn incref(obj: *mut FakeObject) {
    assert_live(obj);
    let rc = &(*obj).refcount;
    rc.set(rc.get() + 1);
}

unsafe fn decref(obj: *mut FakeObject) {
    assert_live(obj);
    let rc = &(*obj).refcount;
    rc.set(rc.get() - 1);
    if rc.get() == 0 {
        LIVE_OBJECTS.with(|live| live.borrow_mut().remove(&(obj as usize)));
        let boxed = Box::from_raw(obj);
        if let Value::Module { dict } = boxed.value {
            decref(dict);
        }
    }
}

/// Current refcount of a live fake object
pub(crate) unsafe fn refcount(obj: *mut FakeObject) -> isize {
    assert_live(obj);
    (*obj).refcount.get()
}

enum Stmt {
    Print(Value),
    Raise(String),
    Nothing,
}

fn parse_expr(source: &str) -> std::result::Result<Value, String> {
    let src = source.trim();
    if src.len() >= 2 {
        let quoted = |q: char| src.starts_with(q) && src.ends_with(q);
        if quoted('"') || quoted('\'') {
            let inner = &src[1..src.len() - 1];
            if inner.contains("\\ud") {
                return Ok(Value::Unencodable);
            }
            return CString::new(inner)
                .map(Value::Text)
                .map_err(|_| "ValueError: embedded null".to_string());
        }
    }
    if src == "None" {
        return Ok(Value::None);
    }

    let mut total: i64 = 0;
    let mut sign = 1;
    let mut digits = String::new();
    let mut expect_operand = true;
    for ch in src.chars().filter(|c| !c.is_whitespace()).chain(Some(';')) {
        match ch {
            '0'..='9' => {
                digits.push(ch);
                expect_operand = false;
            }
            '+' | '-' | ';' if !expect_operand => {
                let n: i64 = digits.parse().map_err(|_| syntax_error(src))?;
                total = total
                    .checked_add(sign * n)
                    .ok_or_else(|| "OverflowError".to_string())?;
                digits.clear();
                sign = if ch == '-' { -1 } else { 1 };
                expect_operand = true;
            }
            _ => return Err(syntax_error(src)),
        }
    }
    Ok(Value::Int(total))
}

fn syntax_error(src: &str) -> String {
    format!("SyntaxError: invalid syntax: {:?}", src)
}

fn parse_program(source: &str) -> std::result::Result<Vec<Stmt>, String> {
    let mut program = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line == "pass" || line.starts_with("import ") {
            program.push(Stmt::Nothing);
        } else if let Some(inner) = line.strip_prefix("print(").and_then(|r| r.strip_suffix(')')) {
            program.push(Stmt::Print(parse_expr(inner)?));
        } else if let Some(name) = line.strip_prefix("raise ") {
            program.push(Stmt::Raise(name.trim().to_string()));
        } else {
            parse_expr(line)?;
            program.push(Stmt::Nothing);
        }
    }
    Ok(program)
}

unsafe fn wide_to_string(mut p: *const wchar_t) -> Option<String> {
    let mut out = String::new();
    while *p != 0 {
        out.push(char::from_u32(*p as u32)?);
        p = p.add(1);
    }
    Some(out)
}

struct State {
    initialized: bool,
    stdout_obj: *mut FakeObject,
    modules: HashMap<String, *mut FakeObject>,
    stdout: String,
    stderr: String,
    pending_error: Option<String>,
    calls: Rc<RefCell<Vec<&'static str>>>,
    main_args: Vec<String>,
}

pub(crate) struct FakeRuntime {
    strict_ascii: bool,
    reported: ModeTable,
    accepted: ModeTable,
    state: RefCell<State>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self {
            strict_ascii: false,
            reported: ModeTable::OBSERVED,
            accepted: ModeTable::OBSERVED,
            state: RefCell::new(State {
                initialized: false,
                stdout_obj: ptr::null_mut(),
                modules: HashMap::new(),
                stdout: String::new(),
                stderr: String::new(),
                pending_error: None,
                calls: Rc::default(),
                main_args: Vec::new(),
            }),
        }
    }

    /// Reject any non-ASCII byte in locale conversions, like a strict C locale
    pub(crate) fn strict_ascii(mut self) -> Self {
        self.strict_ascii = true;
        self
    }

    /// Accept start tokens that differ from the ones `mode_table` reports
    pub(crate) fn accepting(mut self, accepted: ModeTable) -> Self {
        self.accepted = accepted;
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.borrow().clone()
    }

    /// Shared call log that outlives the runtime
    pub(crate) fn call_log(&self) -> Rc<RefCell<Vec<&'static str>>> {
        Rc::clone(&self.state.borrow().calls)
    }

    pub(crate) fn called(&self, name: &str) -> bool {
        self.state.borrow().calls.borrow().iter().any(|&c| c == name)
    }

    pub(crate) fn stdout(&self) -> String {
        self.state.borrow().stdout.clone()
    }

    pub(crate) fn stderr(&self) -> String {
        self.state.borrow().stderr.clone()
    }

    pub(crate) fn main_args(&self) -> Vec<String> {
        self.state.borrow().main_args.clone()
    }

    pub(crate) fn pending_error(&self) -> Option<String> {
        self.state.borrow().pending_error.clone()
    }

    fn record(&self, call: &'static str) {
        self.state.borrow().calls.borrow_mut().push(call);
    }

    fn raise(&self, message: String) {
        self.state.borrow_mut().pending_error = Some(message);
    }

    fn report(&self, message: &str) {
        let mut state = self.state.borrow_mut();
        state.stderr.push_str("Traceback (most recent call last):\n");
        state.stderr.push_str(message);
        state.stderr.push('\n');
    }

    fn run_program(&self, program: &[Stmt]) -> std::result::Result<(), String> {
        for stmt in program {
            match stmt {
                Stmt::Print(value) => {
                    let mut state = self.state.borrow_mut();
                    state.stdout.push_str(&value.display());
                    state.stdout.push('\n');
                }
                Stmt::Raise(name) => return Err(name.clone()),
                Stmt::Nothing => {}
            }
        }
        Ok(())
    }

    /// Simple-string semantics: report errors, return 0 or -1
    fn exec_reporting(&self, source: &str) -> c_int {
        match parse_program(source).and_then(|program| self.run_program(&program)) {
            Ok(()) => 0,
            Err(message) => {
                self.report(&message);
                -1
            }
        }
    }

    fn run_main_args(&self, args: Vec<String>) -> c_int {
        let script = args.get(1).cloned();
        self.state.borrow_mut().main_args = args;

        let status = match script {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(source) => {
                    if self.exec_reporting(&source) == 0 {
                        0
                    } else {
                        1
                    }
                }
                Err(_) => {
                    self.report(&format!("can't open file '{}'", path));
                    2
                }
            },
            None => 0,
        };

        // main tears the runtime down before returning
        self.teardown();
        status
    }

    fn teardown(&self) {
        let (stdout_obj, modules) = {
            let mut state = self.state.borrow_mut();
            state.initialized = false;
            state.pending_error = None;
            let modules: Vec<_> = state.modules.drain().map(|(_, m)| m).collect();
            (std::mem::replace(&mut state.stdout_obj, ptr::null_mut()), modules)
        };
        unsafe {
            for module in modules {
                decref(module);
            }
            if !stdout_obj.is_null() {
                decref(stdout_obj);
            }
        }
    }

    unsafe fn value<'a>(&self, obj: *mut FakeObject) -> &'a Value {
        assert_live(obj);
        &(*obj).value
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        if self.state.borrow().initialized {
            self.teardown();
        }
    }
}

unsafe impl Runtime for FakeRuntime {
    type Object = FakeObject;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn mode_table(&self) -> ModeTable {
        self.reported
    }

    unsafe fn initialize(&self) -> Result<()> {
        self.record("initialize");
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            state.initialized = true;
            state.stdout_obj = alloc(Value::Stdout);
        }
        Ok(())
    }

    unsafe fn finalize(&self) -> i32 {
        self.record("finalize");
        self.teardown();
        0
    }

    fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    unsafe fn decode_locale(&self, arg: *const c_char) -> *mut wchar_t {
        let bytes = CStr::from_ptr(arg).to_bytes();
        if self.strict_ascii && !bytes.is_ascii() {
            return ptr::null_mut();
        }
        let Ok(text) = std::str::from_utf8(bytes) else {
            return ptr::null_mut();
        };

        let wide: Vec<wchar_t> = text
            .chars()
            .map(|c| c as u32 as wchar_t)
            .chain(Some(0))
            .collect();
        let buf = libc::malloc(wide.len() * core::mem::size_of::<wchar_t>()) as *mut wchar_t;
        if buf.is_null() {
            return buf;
        }
        ptr::copy_nonoverlapping(wide.as_ptr(), buf, wide.len());
        RAW_BLOCKS.with(|blocks| blocks.borrow_mut().insert(buf as usize));
        buf
    }

    unsafe fn raw_free(ptr: *mut c_void) {
        let known = RAW_BLOCKS.with(|blocks| blocks.borrow_mut().remove(&(ptr as usize)));
        assert!(known, "raw_free on a block not from decode_locale: {:p}", ptr);
        libc::free(ptr);
    }

    unsafe fn encode_locale(&self, text: *const wchar_t) -> *mut c_char {
        let Some(decoded) = wide_to_string(text) else {
            return ptr::null_mut();
        };
        if self.strict_ascii && !decoded.is_ascii() {
            return ptr::null_mut();
        }

        let bytes = decoded.as_bytes();
        let buf = libc::malloc(bytes.len() + 1) as *mut c_char;
        if buf.is_null() {
            return buf;
        }
        ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buf, bytes.len());
        *buf.add(bytes.len()) = 0;
        MEM_BLOCKS.with(|blocks| blocks.borrow_mut().insert(buf as usize));
        buf
    }

    unsafe fn mem_free(ptr: *mut c_void) {
        let known = MEM_BLOCKS.with(|blocks| blocks.borrow_mut().remove(&(ptr as usize)));
        assert!(known, "mem_free on a block not from encode_locale: {:p}", ptr);
        libc::free(ptr);
    }

    unsafe fn main(&self, argc: c_int, argv: *mut *mut wchar_t) -> c_int {
        self.record("main");
        let mut args = Vec::with_capacity(argc as usize);
        for i in 0..argc as usize {
            match wide_to_string(*argv.add(i)) {
                Some(arg) => args.push(arg),
                None => return 2,
            }
        }
        self.run_main_args(args)
    }

    unsafe fn bytes_main(&self, argc: c_int, argv: *mut *mut c_char) -> c_int {
        self.record("bytes_main");
        let args = (0..argc as usize)
            .map(|i| CStr::from_ptr(*argv.add(i)).to_string_lossy().into_owned())
            .collect();
        self.run_main_args(args)
    }

    unsafe fn run_any_file(&self, fp: *mut FILE, _filename: *const c_char) -> c_int {
        self.record("run_any_file");
        let mut source = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = libc::fread(chunk.as_mut_ptr() as *mut c_void, 1, chunk.len(), fp);
            source.extend_from_slice(&chunk[..n]);
            if n < chunk.len() {
                break;
            }
        }
        self.exec_reporting(&String::from_utf8_lossy(&source))
    }

    unsafe fn run_simple_string(&self, command: *const c_char) -> c_int {
        self.record("run_simple_string");
        let source = CStr::from_ptr(command).to_string_lossy().into_owned();
        self.exec_reporting(&source)
    }

    unsafe fn run_string(
        &self,
        source: *const c_char,
        start: c_int,
        globals: *mut FakeObject,
        locals: *mut FakeObject,
    ) -> *mut FakeObject {
        self.record("run_string");
        let code = self.compile_string(source, b"<string>\0".as_ptr() as *const c_char, start);
        if code.is_null() {
            return code;
        }
        let result = self.eval_code(code, globals, locals);
        decref(code);
        result
    }

    unsafe fn compile_string(
        &self,
        source: *const c_char,
        filename: *const c_char,
        start: c_int,
    ) -> *mut FakeObject {
        self.record("compile_string");
        let source = CStr::from_ptr(source).to_string_lossy().into_owned();
        let filename = CStr::from_ptr(filename).to_string_lossy();

        let Some(mode) = self.accepted.mode_of(start) else {
            self.raise(format!("SystemError: bad start token {}", start));
            return ptr::null_mut();
        };
        let checked = match mode {
            ExecutionMode::Eval => parse_expr(&source).map(drop),
            ExecutionMode::File | ExecutionMode::Single => parse_program(&source).map(drop),
        };
        match checked {
            Ok(()) => alloc(Value::Code { source, mode }),
            Err(message) => {
                self.raise(format!("{} (file {})", message, filename));
                ptr::null_mut()
            }
        }
    }

    unsafe fn eval_code(
        &self,
        code: *mut FakeObject,
        globals: *mut FakeObject,
        locals: *mut FakeObject,
    ) -> *mut FakeObject {
        self.record("eval_code");
        if !matches!(self.value(globals), Value::Dict) || !matches!(self.value(locals), Value::Dict) {
            self.raise("TypeError: namespaces must be dicts".to_string());
            return ptr::null_mut();
        }
        let Value::Code { source, mode } = self.value(code) else {
            self.raise("TypeError: expected a code object".to_string());
            return ptr::null_mut();
        };

        let outcome = match mode {
            ExecutionMode::Eval => parse_expr(source),
            ExecutionMode::File | ExecutionMode::Single => parse_program(source)
                .and_then(|program| self.run_program(&program))
                .map(|()| Value::None),
        };
        match outcome {
            Ok(value) => alloc(value),
            Err(message) => {
                self.raise(message);
                ptr::null_mut()
            }
        }
    }

    unsafe fn inc_ref(&self, obj: *mut FakeObject) {
        incref(obj)
    }

    unsafe fn dec_ref(&self, obj: *mut FakeObject) {
        decref(obj)
    }

    unsafe fn call_method(
        &self,
        obj: *mut FakeObject,
        name: *const c_char,
        args: &[*mut FakeObject],
    ) -> *mut FakeObject {
        self.record("call_method");
        let name = CStr::from_ptr(name).to_string_lossy();
        match (self.value(obj), &*name, args) {
            (Value::Stdout, "getvalue", []) => {
                let text = self.state.borrow().stdout.clone();
                CString::new(text).map_or(ptr::null_mut(), |s| alloc(Value::Text(s)))
            }
            (Value::Stdout, "write", [arg]) => match self.value(*arg) {
                Value::Text(s) => {
                    let text = s.to_string_lossy();
                    self.state.borrow_mut().stdout.push_str(&text);
                    alloc(Value::Int(text.chars().count() as i64))
                }
                other => {
                    self.raise(format!("TypeError: write() argument must be str, not {}", other.type_name()));
                    ptr::null_mut()
                }
            },
            (Value::Text(s), "upper", []) => {
                let upper = s.to_string_lossy().to_uppercase();
                CString::new(upper).map_or(ptr::null_mut(), |s| alloc(Value::Text(s)))
            }
            (value, name, _) => {
                self.raise(format!(
                    "AttributeError: '{}' object has no attribute '{}'",
                    value.type_name(),
                    name
                ));
                ptr::null_mut()
            }
        }
    }

    unsafe fn get_attr(&self, obj: *mut FakeObject, name: *const c_char) -> *mut FakeObject {
        let name = CStr::from_ptr(name).to_string_lossy();
        match (self.value(obj), &*name) {
            (Value::Module { dict }, "__dict__") => {
                incref(*dict);
                *dict
            }
            (value, name) => {
                self.raise(format!(
                    "AttributeError: '{}' object has no attribute '{}'",
                    value.type_name(),
                    name
                ));
                ptr::null_mut()
            }
        }
    }

    unsafe fn is_text(&self, obj: *mut FakeObject) -> bool {
        matches!(self.value(obj), Value::Text(_) | Value::Unencodable)
    }

    unsafe fn as_utf8(&self, obj: *mut FakeObject) -> *const c_char {
        match self.value(obj) {
            Value::Text(s) => s.as_ptr(),
            _ => ptr::null(),
        }
    }

    unsafe fn as_i64(&self, obj: *mut FakeObject) -> Option<i64> {
        match self.value(obj) {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    unsafe fn type_name(&self, obj: *mut FakeObject) -> String {
        self.value(obj).type_name().to_string()
    }

    unsafe fn add_module(&self, name: *const c_char) -> *mut FakeObject {
        self.record("add_module");
        let name = CStr::from_ptr(name).to_string_lossy().into_owned();
        let mut state = self.state.borrow_mut();
        *state.modules.entry(name).or_insert_with(|| {
            let dict = alloc(Value::Dict);
            alloc(Value::Module { dict })
        })
    }

    unsafe fn module_dict(&self, module: *mut FakeObject) -> *mut FakeObject {
        match self.value(module) {
            Value::Module { dict } => *dict,
            _ => ptr::null_mut(),
        }
    }

    unsafe fn sys_object(&self, name: *const c_char) -> *mut FakeObject {
        match CStr::from_ptr(name).to_bytes() {
            b"stdout" => self.state.borrow().stdout_obj,
            _ => ptr::null_mut(),
        }
    }

    unsafe fn print_error(&self) {
        let pending = self.state.borrow_mut().pending_error.take();
        if let Some(message) = pending {
            self.report(&message);
        }
    }
}
