// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote script console: eval, install, reset, reboot, lockdown, and the
//! print/alert/throw signal stream, served over its own session port.
//!
//! At most one console peer is attached at a time. Install streams the
//! script into NVRAM and restarts the engine; eval runs under the watchdog
//! and reports its outcome through the `evalResult` signal.

pub mod debugger;
pub mod dvalue;
pub mod iobuf;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::bus::{
    AnnouncedObject, Msg, MsgClass, MsgType, SessionId, WireArg, CONSOLE_PORT, PROPERTIES_IFACE,
};
use crate::core::Core;
use crate::engine::{ScriptEngine, ScriptError};
use crate::error::{CoreError, CoreResult};
use crate::storage;
use crate::tables::SLOT_CONSOLE;
use debugger::DebuggerState;

pub const CONSOLE_IFACE: &str = "org.allseen.scriptConsole";
pub const DEBUGGER_IFACE: &str = "org.allseen.scriptDebugger";
pub const CONSOLE_PATH: &str = "/ScriptConsole";

/// Longest expression `eval` accepts.
pub const MAX_EVAL_LEN: usize = 1024;

/// Reply codes for eval/install and the debugger begin/end methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    Ok = 0,
    SyntaxError = 1,
    EvalError = 2,
    ResourceError = 3,
    NeedReset = 4,
    Internal = 5,
    DebugStarted = 6,
    DebugStopped = 7,
}

impl ScriptStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    fn from_script_error(err: &ScriptError) -> Self {
        match err {
            ScriptError::Syntax(_) => Self::SyntaxError,
            ScriptError::Eval(_) | ScriptError::Watchdog => Self::EvalError,
            ScriptError::Alloc => Self::ResourceError,
            ScriptError::Internal(_) => Self::Internal,
        }
    }
}

/// Lifecycle of the engine as the console sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// A script is installed and running.
    #[default]
    Running,
    /// The engine was reset; no script is running.
    Clean,
    /// Unknown state (after eval or a lost console session).
    Dirty,
}

#[derive(Debug, Default)]
pub struct ConsoleState {
    /// Session id of the attached console; zero when detached.
    pub session: SessionId,
    /// Unique bus name of the attached console peer.
    pub peer: String,
    /// Suppress print/alert/throw signals (routed to the local log).
    pub quiet: bool,
    pub engine_state: EngineState,
    pub dbg: Option<DebuggerState>,
    /// Set when the debug target must be detached once control returns to
    /// the loop (the request arrived inside the engine's read callback).
    pub detach_requested: bool,
}

impl ConsoleState {
    pub fn attached(&self) -> bool {
        self.session != 0
    }
}

/// The console's announced object, registered at the console slot.
pub fn console_objects() -> Vec<AnnouncedObject> {
    vec![AnnouncedObject {
        path: CONSOLE_PATH.to_owned(),
        interfaces: vec![
            PROPERTIES_IFACE.to_owned(),
            CONSOLE_IFACE.to_owned(),
            DEBUGGER_IFACE.to_owned(),
        ],
    }]
}

/// Register the console service and bind its port.
pub fn init(core: &mut Core) -> CoreResult<()> {
    core.bus.register_objects(SLOT_CONSOLE, console_objects());
    core.bus.bind_session_port(CONSOLE_PORT)
}

/// Tear the console down (lockdown or bus detach).
pub fn terminate(core: &mut Core) {
    core.console.session = 0;
    core.console.peer.clear();
    core.console.engine_state = EngineState::Dirty;
    core.bus.register_objects(SLOT_CONSOLE, Vec::new());
}

/// Try to claim an inbound `AcceptSession` for the console port.
/// Returns `None` when the port is not ours.
pub fn handle_accept(
    core: &mut Core,
    port: u16,
    session: SessionId,
    joiner: &str,
) -> Option<CoreResult<()>> {
    if port != CONSOLE_PORT {
        return None;
    }
    if core.console.attached() {
        // Only one controller at a time.
        warn!(joiner, "console already attached, rejecting");
        return Some(core.bus.accept_session_reply(session, false));
    }
    info!(session, joiner, "console attached");
    core.console.session = session;
    core.console.peer = joiner.to_owned();
    Some(core.bus.accept_session_reply(session, true))
}

/// Kinds of strings streamed to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    Print,
    Alert,
    Throw,
}

impl ConsoleStream {
    fn member(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Alert => "alert",
            Self::Throw => "throw",
        }
    }
}

/// Send a console stream signal, or log locally when no console is
/// attached or quiet mode is on.
pub fn stream(core: &mut Core, kind: ConsoleStream, text: &str) {
    if core.console.attached() && !core.console.quiet {
        let serial = core.bus.next_serial();
        let msg = Msg::signal(
            serial,
            &core.console.peer.clone(),
            CONSOLE_PATH,
            CONSOLE_IFACE,
            kind.member(),
            core.console.session,
        )
        .arg(WireArg::Str(text.to_owned()));
        if let Err(e) = core.bus.deliver(msg) {
            error!(error = %e, "failed to deliver console signal");
        }
    } else {
        match kind {
            ConsoleStream::Print => info!(target: "script", "{text}"),
            ConsoleStream::Alert => warn!(target: "script", "{text}"),
            ConsoleStream::Throw => error!(target: "script", "{text}"),
        }
    }
}

/// Report a script error through the console (or the log under quiet
/// mode or lockdown).
pub fn report_script_error(core: &mut Core, err: &ScriptError) {
    if core.lockdown() {
        error!(error = %err.message(), "script error");
        return;
    }
    stream(core, ConsoleStream::Alert, &err.message());
}

fn eval_result_signal(core: &mut Core, status: ScriptStatus, text: &str) {
    if !core.console.attached() {
        return;
    }
    let serial = core.bus.next_serial();
    let msg = Msg::signal(
        serial,
        &core.console.peer.clone(),
        CONSOLE_PATH,
        CONSOLE_IFACE,
        "evalResult",
        core.console.session,
    )
    .arg(WireArg::Byte(status.code()))
    .arg(WireArg::Str(text.to_owned()));
    let _ = core.bus.deliver(msg);
}

/// Read the `u32` length prefix off a raw streamed payload.
fn raw_payload(raw: &Bytes) -> CoreResult<Bytes> {
    let len_raw: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(CoreError::Invalid)?;
    let len = u32::from_le_bytes(len_raw) as usize;
    if raw.len() < 4 + len {
        return Err(CoreError::Invalid);
    }
    Ok(raw.slice(4..4 + len))
}

/// Evaluate an expression received from the console. The method reply
/// carries the status byte; the result text follows as an `evalResult`
/// signal once evaluation finishes.
pub fn eval(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    let expr = match raw_payload(&msg.raw) {
        Ok(expr) => expr,
        Err(e) => {
            return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, e.as_str());
        }
    };
    if expr.len() > MAX_EVAL_LEN {
        let status = ScriptStatus::ResourceError;
        reply_status(core, &msg.hdr, status.code())?;
        eval_result_signal(core, status, "Eval expression too long");
        return Ok(());
    }
    // Strip trailing NULs from the streamed payload.
    let end = expr.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
    let expr = expr.slice(..end);

    // Stage the expression in the pool heap; an exhausted heap fails the
    // eval the same way any other allocation would.
    let Some(block) = core.heap.alloc(expr.len().max(1)) else {
        return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, "RESOURCES");
    };
    core.heap.bytes_mut(block)[..expr.len()].copy_from_slice(&expr);

    reply_status(core, &msg.hdr, ScriptStatus::Ok.code())?;
    core.watchdog.arm(std::time::Duration::from_millis(crate::core::WATCHDOG_TIMEOUT_MS));
    let staged = core.heap.bytes(block)[..expr.len()].to_vec();
    let outcome = engine.eval(core, "ConsoleInput", &staged);
    core.heap.free(block);
    core.watchdog.clear();
    // Eval leaves the engine in an unknown state.
    core.console.engine_state = EngineState::Dirty;
    match outcome {
        Ok(value) => {
            eval_result_signal(core, ScriptStatus::Ok, &value.display_string());
        }
        Err(err) => {
            eval_result_signal(core, ScriptStatus::from_script_error(&err), &err.message());
        }
    }
    Ok(())
}

fn reply_status(core: &mut Core, hdr: &crate::bus::MsgHeader, code: u8) -> CoreResult<()> {
    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(hdr, serial).arg(WireArg::Byte(code));
    core.bus.deliver(reply)
}

/// Install a new script from a streamed `(name, length, bytes…)` message.
///
/// On success the loop restarts the engine with the new script; any
/// mid-stream failure deletes both the script and the name entry.
pub fn install(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    core.end_sessions();

    let name = msg
        .body
        .first()
        .and_then(|a| a.as_str())
        .unwrap_or("installed-script")
        .to_owned();
    info!(name = %name, "installing script");

    let body = match raw_payload(&msg.raw) {
        Ok(body) => body,
        Err(_) => {
            storage::abort_install(core.nvram.as_mut());
            return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, "truncated script");
        }
    };
    let mut writer = match storage::begin_install(core.nvram.as_mut(), &name, body.len() as u32) {
        Ok(writer) => writer,
        Err(CoreError::Resources) => {
            error!("script too large");
            let serial = core.bus.next_serial();
            let reply = Msg::reply_to(&msg.hdr, serial)
                .arg(WireArg::Byte(ScriptStatus::ResourceError.code()))
                .arg(WireArg::Str("Script too long".to_owned()));
            return core.bus.deliver(reply);
        }
        Err(e) => {
            storage::abort_install(core.nvram.as_mut());
            return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, e.as_str());
        }
    };
    // Commit in chunks, mirroring the streamed arrival.
    for chunk in body.chunks(512) {
        if let Err(e) = writer.write(core.nvram.as_mut(), chunk) {
            storage::abort_install(core.nvram.as_mut());
            return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, e.as_str());
        }
    }
    if let Err(e) = writer.finish(core.nvram.as_mut()) {
        storage::abort_install(core.nvram.as_mut());
        return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, e.as_str());
    }

    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(&msg.hdr, serial)
        .arg(WireArg::Byte(ScriptStatus::Ok.code()))
        .arg(WireArg::Str("Script installed".to_owned()));
    core.bus.deliver(reply)?;
    // Restart the loop with the freshly-installed script.
    Err(CoreError::RestartApp)
}

fn reset(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    let serial = core.bus.next_serial();
    core.bus.deliver(Msg::reply_to(&msg.hdr, serial))?;
    core.console.engine_state = EngineState::Clean;
    Err(CoreError::RestartApp)
}

fn reboot(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    let serial = core.bus.next_serial();
    core.bus.deliver(Msg::reply_to(&msg.hdr, serial))?;
    Err(CoreError::Restart)
}

/// Permanently lock the console out and restart.
fn lockdown(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    if let Err(e) = core.set_lockdown() {
        return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, e.as_str());
    }
    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(&msg.hdr, serial).arg(WireArg::Byte(1));
    core.bus.deliver(reply)?;
    let session = core.console.session;
    if session != 0 {
        let _ = core.bus.leave_session(session);
    }
    debugger::stop(core, engine, None)?;
    terminate(core);
    Err(CoreError::RestartApp)
}

/// Console session loss: detach the debugger and mark the engine dirty.
pub fn handle_session_lost(
    core: &mut Core,
    engine: &mut dyn ScriptEngine,
    session: SessionId,
) -> CoreResult<()> {
    if !core.console.attached() || core.console.session != session {
        return Err(CoreError::NoMatch);
    }
    info!(session, "console session lost");
    core.console.session = 0;
    core.console.peer.clear();
    core.console.engine_state = EngineState::Dirty;
    debugger::stop(core, engine, None)
}

/// Serve `Get` on the console object's own properties.
fn prop_get(core: &mut Core, engine: &dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    let prop = msg.body.get(1).and_then(|a| a.as_str()).unwrap_or_default();
    let value = match prop {
        "engine" => WireArg::Str(engine.description().to_owned()),
        "maxEvalLen" => WireArg::Uint32(MAX_EVAL_LEN as u32),
        "maxScriptLen" => {
            WireArg::Uint32(storage::max_script_len(core.nvram.as_ref()) as u32)
        }
        _ => return core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, "unknown property"),
    };
    let sig = value.signature();
    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(&msg.hdr, serial).arg(WireArg::Variant(sig, Box::new(value)));
    core.bus.deliver(reply)
}

/// Route a message to the console or debugger service.
///
/// Returns `NoMatch` when the message is not for this layer; `RestartApp`
/// and `Restart` propagate to the loop.
pub fn handle_msg(
    core: &mut Core,
    engine: &mut dyn ScriptEngine,
    msg: &Msg,
) -> CoreResult<()> {
    if crate::bus::classify(&msg.hdr) == MsgClass::SessionLost {
        let session = msg.body.first().and_then(|a| a.as_u32()).unwrap_or(0);
        return handle_session_lost(core, engine, session);
    }
    if !core.console.attached() {
        return Err(CoreError::NoMatch);
    }
    if msg.hdr.iface == PROPERTIES_IFACE && msg.hdr.path == CONSOLE_PATH {
        return match msg.hdr.member.as_str() {
            "Get" => prop_get(core, engine, msg),
            _ => core.error_reply(&msg.hdr, crate::core::ERROR_REJECTED, "read-only"),
        };
    }
    if msg.hdr.iface == CONSOLE_IFACE && msg.hdr.msg_type == MsgType::MethodCall {
        return match msg.hdr.member.as_str() {
            "eval" => eval(core, engine, msg),
            "install" => install(core, msg),
            "reset" => reset(core, msg),
            "reboot" => reboot(core, msg),
            "lockdown" => lockdown(core, engine, msg),
            _ => Err(CoreError::NoMatch),
        };
    }
    if msg.hdr.iface == DEBUGGER_IFACE {
        return debugger::handle_msg(core, engine, msg);
    }
    Err(CoreError::NoMatch)
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
