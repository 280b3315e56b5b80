// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic script engine and world builders shared by unit and spec
//! tests.
//!
//! [`FakeEngine`] plays the role of the embedded interpreter: "scripts"
//! are Rust closures registered against callback refs, hooks are plain
//! assignments, and the debug target is a small scripted mock that speaks
//! the real dvalue protocol through the core's debug pipes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bus::loopback::{LoopbackNet, LoopbackTransport};
use crate::bus::Transport;
use crate::console::debugger;
use crate::console::dvalue::{Dvalue, Frame, Scanner};
use crate::core::Core;
use crate::engine::{CallbackRef, ScriptEngine, ScriptError};
use crate::error::CoreResult;
use crate::nvram::MemNvram;
use crate::value::Value;

/// A scripted host function: receives the engine handle (to register more
/// callbacks), the core, and the call arguments.
pub type HostFn =
    Arc<dyn Fn(&FakeEngine, &mut Core, &[Value]) -> Result<Value, ScriptError> + Send + Sync>;

#[derive(Default)]
struct DebugTarget {
    attached: bool,
    paused: bool,
    breakpoints: Vec<(String, u16)>,
    vars: HashMap<String, Dvalue>,
    scanner: Scanner,
    line: u16,
}

#[derive(Default)]
struct Inner {
    callbacks: HashMap<CallbackRef, HostFn>,
    hooks: HashMap<String, CallbackRef>,
    next_ref: CallbackRef,
    install_program: Option<HostFn>,
    dropped: Vec<CallbackRef>,
    events: Vec<String>,
    debug: DebugTarget,
}

/// Clonable handle to the fake engine (the clone shares state).
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<Mutex<Inner>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a host function, returning its callback ref.
    pub fn register<F>(&self, f: F) -> CallbackRef
    where
        F: Fn(&FakeEngine, &mut Core, &[Value]) -> Result<Value, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        let mut inner = self.lock();
        inner.next_ref += 1;
        let id = inner.next_ref;
        inner.callbacks.insert(id, Arc::new(f));
        id
    }

    /// Register a callback that records its invocations.
    pub fn recorder(&self) -> (CallbackRef, Arc<Mutex<Vec<Vec<Value>>>>) {
        let record: Arc<Mutex<Vec<Vec<Value>>>> = Arc::default();
        let sink = Arc::clone(&record);
        let id = self.register(move |_, _, args| {
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(args.to_vec());
            Ok(Value::Undefined)
        });
        (id, record)
    }

    /// Assign a hook (e.g. `onMethodCall`) to a host function.
    pub fn set_hook<F>(&self, name: &str, f: F) -> CallbackRef
    where
        F: Fn(&FakeEngine, &mut Core, &[Value]) -> Result<Value, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        let id = self.register(f);
        self.lock().hooks.insert(name.to_owned(), id);
        id
    }

    pub fn clear_hook(&self, name: &str) {
        self.lock().hooks.remove(name);
    }

    /// Bind an already-registered callback as a hook.
    pub fn bind_hook(&self, name: &str, callback: CallbackRef) {
        self.lock().hooks.insert(name.to_owned(), callback);
    }

    /// The "program" run by `install` (registers definitions and hooks).
    pub fn on_install<F>(&self, f: F)
    where
        F: Fn(&FakeEngine, &mut Core, &[Value]) -> Result<Value, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        self.lock().install_program = Some(Arc::new(f));
    }

    /// Callback refs the runtime released.
    pub fn dropped_refs(&self) -> Vec<CallbackRef> {
        self.lock().dropped.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Seed a variable served by the debug target's `getVar`.
    pub fn set_debug_var(&self, name: &str, value: Dvalue) {
        self.lock().debug.vars.insert(name.to_owned(), value);
    }

    pub fn debug_paused(&self) -> bool {
        self.lock().debug.paused
    }

    pub fn breakpoints(&self) -> Vec<(String, u16)> {
        self.lock().debug.breakpoints.clone()
    }

    /// Write protocol bytes through the core in small chunks so the
    /// byte-at-a-time scanner is really exercised.
    fn target_write(core: &mut Core, bytes: &[u8]) {
        for chunk in bytes.chunks(3) {
            let _ = core.debug_pipe_write(chunk);
        }
    }

    fn send_status(&self, core: &mut Core, paused: bool, file: &str, line: u16) {
        let frame = Frame::nfy(debugger::NFY_STATUS)
            .push(Dvalue::Int(if paused { 1 } else { 0 }))
            .push(Dvalue::str(file))
            .push(Dvalue::str("main"))
            .push(Dvalue::Int(line as u32))
            .push(Dvalue::Int(7));
        Self::target_write(core, &frame.encode());
    }

    /// Serve one framed request the way the real debug target would.
    fn serve_request(&self, core: &mut Core, frame: &Frame) {
        let opcode = frame.opcode().unwrap_or(0);
        let reply = match opcode {
            debugger::REQ_BASIC_INFO => Frame::rep()
                .push(Dvalue::Int(10499))
                .push(Dvalue::str("fake-target"))
                .push(Dvalue::str("hutch-sim"))
                .push(Dvalue::Int(0)),
            debugger::REQ_ADD_BREAK => {
                let file = frame.values.get(1).and_then(Dvalue::as_str).unwrap_or("?");
                let line = frame.values.get(2).and_then(Dvalue::as_int).unwrap_or(0) as u16;
                self.lock().debug.breakpoints.push((file.to_owned(), line));
                Frame::rep()
            }
            debugger::REQ_DEL_BREAK => {
                let index = frame.values.get(1).and_then(Dvalue::as_int).unwrap_or(0) as usize;
                let mut inner = self.lock();
                if index < inner.debug.breakpoints.len() {
                    inner.debug.breakpoints.remove(index);
                }
                Frame::rep()
            }
            debugger::REQ_LIST_BREAK => {
                let mut reply = Frame::rep();
                for (file, line) in self.breakpoints() {
                    reply = reply.push(Dvalue::Str(file)).push(Dvalue::Int(line as u32));
                }
                reply
            }
            debugger::REQ_GET_VAR => {
                let name = frame.values.get(1).and_then(Dvalue::as_str).unwrap_or("");
                match self.lock().debug.vars.get(name) {
                    Some(value) => Frame::rep().push(Dvalue::Int(1)).push(value.clone()),
                    None => Frame::rep().push(Dvalue::Int(0)).push(Dvalue::Undefined),
                }
            }
            debugger::REQ_PUT_VAR => {
                let name = frame.values.get(1).and_then(Dvalue::as_str).unwrap_or("");
                if let Some(value) = frame.values.get(2) {
                    self.lock().debug.vars.insert(name.to_owned(), value.clone());
                }
                Frame::rep()
            }
            debugger::REQ_EVAL => {
                let expr = frame.values.get(1).and_then(Dvalue::as_str).unwrap_or("");
                match tiny_eval(expr) {
                    Ok(n) => Frame::rep().push(Dvalue::Int(0)).push(Dvalue::Num(n as f64)),
                    Err(_) => Frame::rep().push(Dvalue::Int(1)).push(Dvalue::Undefined),
                }
            }
            debugger::REQ_GET_CALL_STACK => {
                let line = self.lock().debug.line;
                Frame::rep()
                    .push(Dvalue::str("app.js"))
                    .push(Dvalue::str("main"))
                    .push(Dvalue::Int(line as u32))
                    .push(Dvalue::Int(7))
            }
            debugger::REQ_GET_LOCALS => {
                let mut reply = Frame::rep();
                for (name, value) in &self.lock().debug.vars {
                    reply = reply.push(Dvalue::str(name)).push(value.clone());
                }
                reply
            }
            debugger::REQ_DUMP_HEAP => Frame::rep()
                .push(Dvalue::str("heap"))
                .push(Dvalue::Int(1024)),
            _ => Frame::rep(), // pause/resume/step/trigger/detach
        };
        Self::target_write(core, &reply.encode());

        // State transitions follow the acknowledgement.
        match opcode {
            debugger::REQ_PAUSE => {
                let line = {
                    let mut inner = self.lock();
                    inner.debug.paused = true;
                    inner.debug.line
                };
                self.send_status(core, true, "app.js", line);
            }
            debugger::REQ_RESUME | debugger::REQ_STEP_INTO | debugger::REQ_STEP_OVER
            | debugger::REQ_STEP_OUT => {
                // Resume runs until the next breakpoint, a step stops on
                // the next line.
                let (stop_line, hits_breakpoint) = {
                    let inner = self.lock();
                    match (opcode, inner.debug.breakpoints.first()) {
                        (debugger::REQ_RESUME, Some((_, line))) => (*line, true),
                        (debugger::REQ_RESUME, None) => (0, false),
                        _ => (inner.debug.line + 1, true),
                    }
                };
                if hits_breakpoint {
                    let mut_line = {
                        let mut inner = self.lock();
                        inner.debug.paused = true;
                        inner.debug.line = stop_line;
                        stop_line
                    };
                    self.send_status(core, true, "app.js", mut_line);
                } else {
                    self.lock().debug.paused = false;
                    self.send_status(core, false, "app.js", 0);
                }
            }
            debugger::REQ_TRIGGER_STATUS => {
                let (paused, line) = {
                    let inner = self.lock();
                    (inner.debug.paused, inner.debug.line)
                };
                self.send_status(core, paused, "app.js", line);
            }
            debugger::REQ_DETACH => {
                self.lock().debug.attached = false;
            }
            _ => {}
        }
    }
}

/// Minimal "interpreter": sums `+`-separated integer literals.
fn tiny_eval(expr: &str) -> Result<i64, ScriptError> {
    expr.split('+')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map_err(|_| ScriptError::Eval(format!("not a number: {part}")))
        })
        .sum()
}

impl ScriptEngine for FakeEngine {
    fn install(&mut self, core: &mut Core, name: &str, source: &[u8]) -> Result<(), ScriptError> {
        self.lock().events.push(format!("install:{name}:{}", source.len()));
        let program = self.lock().install_program.clone();
        match program {
            Some(program) => program(&self.clone(), core, &[]).map(|_| ()),
            None => Ok(()),
        }
    }

    fn eval(
        &mut self,
        core: &mut Core,
        _name: &str,
        source: &[u8],
    ) -> Result<Value, ScriptError> {
        if core.watchdog.expired() {
            return Err(ScriptError::Watchdog);
        }
        let text = std::str::from_utf8(source)
            .map_err(|_| ScriptError::Syntax("not utf-8".to_owned()))?;
        tiny_eval(text).map(Value::Int)
    }

    fn invoke(
        &mut self,
        core: &mut Core,
        callback: CallbackRef,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        if core.watchdog.expired() {
            return Err(ScriptError::Watchdog);
        }
        let f = self.lock().callbacks.get(&callback).cloned();
        match f {
            Some(f) => f(&self.clone(), core, args),
            None => Err(ScriptError::Internal(format!("no callback {callback}"))),
        }
    }

    fn hook(&self, name: &str) -> Option<CallbackRef> {
        self.lock().hooks.get(name).copied()
    }

    fn drop_ref(&mut self, callback: CallbackRef) {
        let mut inner = self.lock();
        inner.callbacks.remove(&callback);
        inner.dropped.push(callback);
    }

    fn debug_attach(&mut self, core: &mut Core) {
        {
            let mut inner = self.lock();
            inner.debug.attached = true;
            inner.debug.paused = false;
            inner.debug.line = 1;
        }
        // Version banner, then an initial running status.
        let _ = core.debug_pipe_write(b"1 10499 fake-target hutch\n");
        self.send_status(core, false, "app.js", 1);
    }

    fn debug_detach(&mut self, _core: &mut Core) {
        self.lock().debug = DebugTarget::default();
    }

    fn debug_cooperate(&mut self, core: &mut Core) {
        if !self.lock().debug.attached {
            return;
        }
        while core.debug_pipe_peek() > 0 {
            let bytes = core.debug_pipe_read(64);
            if bytes.is_empty() {
                return;
            }
            let frames = {
                let mut inner = self.lock();
                inner.debug.scanner.push(&bytes)
            };
            for frame in frames {
                self.serve_request(core, &frame);
            }
        }
    }

    fn description(&self) -> &'static str {
        "FakeScript"
    }

    fn reset(&mut self) {
        // The install program is the "script source" and survives the
        // engine restart the way the NVRAM blob does; the script world
        // (callbacks, hooks, debug target) does not.
        let mut inner = self.lock();
        inner.callbacks.clear();
        inner.hooks.clear();
        inner.debug = DebugTarget::default();
        inner.events.push("reset".to_owned());
    }
}

/// A core wired to a fresh loopback endpoint with in-memory NVRAM.
pub fn test_core(net: &LoopbackNet) -> Core {
    let bus = net.endpoint();
    let triggers = bus.triggers();
    Core::new(Box::new(bus), Box::new(MemNvram::default()), triggers)
}

/// A remote peer endpoint used to talk to the runtime under test.
pub struct Peer {
    pub bus: LoopbackTransport,
}

impl Peer {
    pub fn new(net: &LoopbackNet) -> Self {
        Self { bus: net.endpoint() }
    }

    pub fn name(&self) -> String {
        self.bus.unique_name()
    }

    /// Drain all deliverable messages, waiting briefly for the first.
    pub fn drain(&mut self) -> Vec<crate::bus::Msg> {
        use crate::bus::Transport;
        let mut out = Vec::new();
        while let Ok(msg) = self.bus.unmarshal_msg(std::time::Duration::from_millis(200)) {
            out.push(msg);
        }
        out
    }

    /// Wait for one message matching `pred`.
    pub fn expect<F>(&mut self, pred: F) -> CoreResult<crate::bus::Msg>
    where
        F: Fn(&crate::bus::Msg) -> bool,
    {
        use crate::bus::Transport;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            let msg = self.bus.unmarshal_msg(std::time::Duration::from_millis(100));
            match msg {
                Ok(msg) if pred(&msg) => return Ok(msg),
                Ok(_) | Err(crate::error::CoreError::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(crate::error::CoreError::Timeout)
    }
}
