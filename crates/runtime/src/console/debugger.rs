// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote debugger service.
//!
//! Bus-side commands are framed into the engine's debug read pipe; the
//! engine's debug output is scanned byte-by-byte into frames, each paired
//! with the request that produced it so the matching method reply can be
//! marshalled. While the engine is paused it keeps calling
//! [`crate::core::Core::debug_pipe_read`], which re-enters the transport
//! to service further debugger traffic.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use super::dvalue::{self, Dvalue, Frame, Scanner, NFY, REP, REQ};
use super::iobuf::IoBuf;
use super::{ConsoleStream, ScriptStatus, CONSOLE_IFACE, CONSOLE_PATH, DEBUGGER_IFACE};
use crate::bus::{classify, Msg, MsgClass, MsgHeader, MsgType, WireArg};
use crate::core::{Core, ERROR_REJECTED};
use crate::engine::ScriptEngine;
use crate::error::{CoreError, CoreResult};
use crate::storage;

const DEBUG_BUFFER_SIZE: usize = 512;

// Request opcodes (carried as small ints after the REQ marker).
pub const REQ_BASIC_INFO: u32 = 0x10;
pub const REQ_TRIGGER_STATUS: u32 = 0x11;
pub const REQ_PAUSE: u32 = 0x12;
pub const REQ_RESUME: u32 = 0x13;
pub const REQ_STEP_INTO: u32 = 0x14;
pub const REQ_STEP_OVER: u32 = 0x15;
pub const REQ_STEP_OUT: u32 = 0x16;
pub const REQ_LIST_BREAK: u32 = 0x17;
pub const REQ_ADD_BREAK: u32 = 0x18;
pub const REQ_DEL_BREAK: u32 = 0x19;
pub const REQ_GET_VAR: u32 = 0x1A;
pub const REQ_PUT_VAR: u32 = 0x1B;
pub const REQ_GET_CALL_STACK: u32 = 0x1C;
pub const REQ_GET_LOCALS: u32 = 0x1D;
pub const REQ_EVAL: u32 = 0x1E;
pub const REQ_DETACH: u32 = 0x1F;
pub const REQ_DUMP_HEAP: u32 = 0x20;

// Notification ids.
pub const NFY_STATUS: u32 = 0x01;
pub const NFY_PRINT: u32 = 0x02;
pub const NFY_ALERT: u32 = 0x03;
pub const NFY_LOG: u32 = 0x04;

/// Debugger attach state (also the `getStatus` wire value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbgStatus {
    Paused = 0,
    Running = 1,
    Detached = 2,
}

#[derive(Debug)]
pub struct DebuggerState {
    pub status: DbgStatus,
    /// Framed commands waiting for the engine's read callback.
    pub read: IoBuf,
    /// Incremental scanner over the engine's write callback bytes.
    pub scanner: Scanner,
    /// Opcode of the request whose REP we are waiting for.
    pub last_request: Option<u32>,
    /// Header used to marshal the eventual method reply.
    pub saved_reply: Option<MsgHeader>,
    /// The version banner arrives before any framed traffic.
    pub initial_notify: bool,
    /// Command currently being funneled through the read pipe.
    pub current_msg: Option<Msg>,
}

impl DebuggerState {
    fn new() -> Self {
        Self {
            status: DbgStatus::Running,
            read: IoBuf::new(DEBUG_BUFFER_SIZE),
            scanner: Scanner::default(),
            last_request: None,
            saved_reply: None,
            initial_notify: false,
            current_msg: None,
        }
    }
}

/// Whether the debugger is currently attached. Inbound messages about to
/// be dispatched into script must be detached from the transport first
/// when this holds (dispatch may re-enter the transport for debug I/O).
pub fn attached(core: &Core) -> bool {
    core.console
        .dbg
        .as_ref()
        .is_some_and(|d| d.status != DbgStatus::Detached)
}

fn opcode_of(member: &str) -> Option<u32> {
    Some(match member {
        "basicInfo" => REQ_BASIC_INFO,
        "triggerStatus" => REQ_TRIGGER_STATUS,
        "pause" => REQ_PAUSE,
        "resume" => REQ_RESUME,
        "stepInto" => REQ_STEP_INTO,
        "stepOver" => REQ_STEP_OVER,
        "stepOut" => REQ_STEP_OUT,
        "listBreak" => REQ_LIST_BREAK,
        "addBreak" => REQ_ADD_BREAK,
        "delBreak" => REQ_DEL_BREAK,
        "getVar" => REQ_GET_VAR,
        "putVar" => REQ_PUT_VAR,
        "getCallStack" => REQ_GET_CALL_STACK,
        "getLocals" => REQ_GET_LOCALS,
        "dumpHeap" => REQ_DUMP_HEAP,
        "eval" => REQ_EVAL,
        "detach" => REQ_DETACH,
        _ => return None,
    })
}

/// Commands legal while the target is running (not paused). Everything is
/// legal while paused; while running only resume and a heap dump are
/// refused (resume needs a paused target, a heap walk needs a quiescent
/// one).
fn allowed_while_running(opcode: u32) -> bool {
    !matches!(opcode, REQ_RESUME | REQ_DUMP_HEAP)
}

/// `begin(quiet)`: attach the debug target.
pub fn start(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    let quiet = msg.body.first().and_then(|a| a.as_u8()).unwrap_or(0);
    if quiet != 0 {
        core.console.quiet = true;
    }
    if core.console.dbg.is_some() {
        return Err(CoreError::Invalid);
    }
    info!(quiet, "debugger attach");
    let serial = core.bus.next_serial();
    let reply =
        Msg::reply_to(&msg.hdr, serial).arg(WireArg::Byte(ScriptStatus::DebugStarted.code()));
    core.bus.deliver(reply)?;
    core.watchdog.disable();
    core.console.dbg = Some(DebuggerState::new());
    engine.debug_attach(core);
    Ok(())
}

/// `end` (or console loss / lockdown): detach and clean up. `msg` is
/// `None` when no reply should be sent.
pub fn stop(
    core: &mut Core,
    engine: &mut dyn ScriptEngine,
    msg: Option<&Msg>,
) -> CoreResult<()> {
    if let Some(msg) = msg {
        let serial = core.bus.next_serial();
        let reply =
            Msg::reply_to(&msg.hdr, serial).arg(WireArg::Byte(ScriptStatus::DebugStopped.code()));
        core.bus.deliver(reply)?;
    }
    if core.console.dbg.take().is_some() {
        info!("debugger detach");
        engine.debug_detach(core);
        core.watchdog.enable();
    }
    core.console.detach_requested = false;
    Ok(())
}

fn get_status(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    let status = core
        .console
        .dbg
        .as_ref()
        .map(|d| d.status)
        .unwrap_or(DbgStatus::Detached);
    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(&msg.hdr, serial).arg(WireArg::Byte(status as u8));
    core.bus.deliver(reply)
}

fn get_script_name(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    match storage::script_name(core.nvram.as_ref()) {
        Some(name) => {
            let serial = core.bus.next_serial();
            let reply = Msg::reply_to(&msg.hdr, serial).arg(WireArg::Str(name));
            core.bus.deliver(reply)
        }
        None => core.error_reply(&msg.hdr, ERROR_REJECTED, "no script installed"),
    }
}

fn get_script(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    match storage::load(core.nvram.as_ref()) {
        Some((_, body)) => {
            let mut raw = Vec::with_capacity(4 + body.len());
            raw.extend_from_slice(&(body.len() as u32).to_le_bytes());
            raw.extend_from_slice(&body);
            let serial = core.bus.next_serial();
            let reply = Msg::reply_to(&msg.hdr, serial).with_raw(Bytes::from(raw));
            core.bus.deliver(reply)
        }
        None => core.error_reply(&msg.hdr, ERROR_REJECTED, "no script installed"),
    }
}

/// Entry point for all `org.allseen.scriptDebugger` members.
pub fn handle_msg(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    match msg.hdr.member.as_str() {
        "begin" => start(core, engine, msg),
        "end" => stop(core, engine, Some(msg)),
        "getStatus" => get_status(core, msg),
        "getScriptName" => get_script_name(core, msg),
        "getScript" => get_script(core, msg),
        _ => command(core, engine, msg),
    }
}

/// Hand a debug command to the engine's read pipe and let the target
/// process it cooperatively.
fn command(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    if !attached(core) {
        warn!(member = %msg.hdr.member, "debug command with no debugger attached");
        return core.error_reply(&msg.hdr, ERROR_REJECTED, "debugger not attached");
    }
    if let Some(dbg) = core.console.dbg.as_mut() {
        dbg.current_msg = Some(msg.clone());
    }
    engine.debug_cooperate(core);
    if core.console.detach_requested {
        stop(core, engine, None)?;
    }
    Ok(())
}

/// Translate one bus command into a framed request on the read pipe.
/// Called with the current message from inside the read path.
fn unmarshal_command(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    let Some(opcode) = opcode_of(msg.hdr.member.as_str()) else {
        return Err(CoreError::NoMatch);
    };
    let status = core
        .console
        .dbg
        .as_ref()
        .map(|d| d.status)
        .unwrap_or(DbgStatus::Detached);
    if status == DbgStatus::Running && !allowed_while_running(opcode) {
        warn!(member = %msg.hdr.member, "command not allowed while running");
        let serial = core.bus.next_serial();
        let reply = Msg::error_to(&msg.hdr, serial, "org.alljoyn.Bus.Busy")
            .arg(WireArg::Str("busy".to_owned()));
        return core.bus.deliver(reply);
    }

    let mut frame = Frame::req(opcode);
    match opcode {
        REQ_ADD_BREAK => {
            let file = msg.body.first().and_then(|a| a.as_str()).ok_or(CoreError::Invalid)?;
            let line = msg.body.get(1).and_then(|a| a.as_u16()).ok_or(CoreError::Invalid)?;
            frame = frame.push(Dvalue::str(file)).push(Dvalue::Int(line as u32));
        }
        REQ_DEL_BREAK => {
            let index = msg.body.first().and_then(|a| a.as_u8()).ok_or(CoreError::Invalid)?;
            frame = frame.push(Dvalue::Int(index as u32));
        }
        REQ_GET_VAR | REQ_EVAL => {
            let text = msg.body.first().and_then(|a| a.as_str()).ok_or(CoreError::Invalid)?;
            frame = frame.push(Dvalue::str(text));
        }
        REQ_PUT_VAR => {
            let name = msg.body.first().and_then(|a| a.as_str()).ok_or(CoreError::Invalid)?;
            let tag = msg.body.get(1).and_then(|a| a.as_u8()).ok_or(CoreError::Invalid)?;
            let data = match msg.body.get(2) {
                Some(WireArg::Bytes(raw)) => raw.clone(),
                _ => Bytes::new(),
            };
            // The new value arrives as a tag byte plus payload; re-decode
            // it into a proper tagged value for the target.
            let mut raw = Vec::with_capacity(1 + data.len());
            raw.push(tag);
            raw.extend_from_slice(&data);
            let value = match dvalue::decode(&raw) {
                dvalue::Decoded::Value(v, _) => v,
                _ => return Err(CoreError::Invalid),
            };
            frame = frame.push(Dvalue::str(name)).push(value);
        }
        _ => {}
    }

    let encoded = frame.encode();
    let dbg = core.console.dbg.as_mut().ok_or(CoreError::Busy)?;
    if !dbg.read.push(&encoded) {
        error!("no space to queue debug command");
        return Err(CoreError::Resources);
    }
    dbg.last_request = Some(opcode);
    dbg.saved_reply = Some(msg.hdr.clone());
    debug!(member = %msg.hdr.member, opcode, "queued debug command");
    Ok(())
}

impl Core {
    /// The engine's debug read callback: blocks until framed command bytes
    /// are available, servicing bus traffic in the meantime. Returning an
    /// empty buffer tells the target to detach.
    pub fn debug_pipe_read(&mut self, max: usize) -> Vec<u8> {
        loop {
            {
                let Some(dbg) = self.console.dbg.as_mut() else {
                    return Vec::new();
                };
                if self.console.detach_requested {
                    return Vec::new();
                }
                if dbg.read.available() > 0 {
                    let out = dbg.read.pull(max);
                    dbg.read.rebase();
                    return out;
                }
            }
            if let Some(msg) = self.console.dbg.as_mut().and_then(|d| d.current_msg.take()) {
                self.consume_debug_msg(&msg);
                continue;
            }
            // Nothing queued: service the bus until a command shows up.
            let msg = match self.bus.unmarshal_msg(Duration::from_secs(60)) {
                Ok(msg) => msg,
                Err(CoreError::Timeout) => continue,
                Err(e) => {
                    error!(error = %e, "transport failed during debug read");
                    self.console.detach_requested = true;
                    return Vec::new();
                }
            };
            self.consume_debug_msg(&msg);
            if self.console.detach_requested {
                return Vec::new();
            }
        }
    }

    /// The engine's debug peek callback: bytes ready without blocking.
    pub fn debug_pipe_peek(&mut self) -> usize {
        if let Some(msg) = self.console.dbg.as_mut().and_then(|d| d.current_msg.take()) {
            self.consume_debug_msg(&msg);
        }
        self.console.dbg.as_ref().map(|d| d.read.available()).unwrap_or(0)
    }

    /// Process one bus message while inside the debug read path.
    fn consume_debug_msg(&mut self, msg: &Msg) {
        match classify(&msg.hdr) {
            MsgClass::SessionLost => {
                let session = msg.body.first().and_then(|a| a.as_u32()).unwrap_or(0);
                if self.console.attached() && session == self.console.session {
                    warn!("console session lost while debugging");
                    self.console.session = 0;
                    self.console.peer.clear();
                    self.console.engine_state = super::EngineState::Dirty;
                    if let Some(dbg) = self.console.dbg.as_mut() {
                        dbg.status = DbgStatus::Detached;
                    }
                    self.console.detach_requested = true;
                } else if let Some(peer) = self.handle_session_lost(msg) {
                    debug!(peer = %peer, "peer session lost during debug");
                }
            }
            MsgClass::BusInfra => {
                let _ = self.bus.handle_bus_message(msg);
            }
            _ if msg.hdr.iface == DEBUGGER_IFACE => match msg.hdr.member.as_str() {
                "end" => {
                    let serial = self.bus.next_serial();
                    let reply = Msg::reply_to(&msg.hdr, serial)
                        .arg(WireArg::Byte(ScriptStatus::DebugStopped.code()));
                    let _ = self.bus.deliver(reply);
                    if let Some(dbg) = self.console.dbg.as_mut() {
                        dbg.status = DbgStatus::Detached;
                    }
                    self.console.detach_requested = true;
                }
                "getStatus" => {
                    let _ = get_status(self, msg);
                }
                "getScriptName" => {
                    let _ = get_script_name(self, msg);
                }
                "getScript" => {
                    let _ = get_script(self, msg);
                }
                _ => {
                    if let Err(e) = unmarshal_command(self, msg) {
                        if e != CoreError::NoMatch {
                            let _ = self.error_reply(&msg.hdr, ERROR_REJECTED, e.as_str());
                        }
                    }
                }
            },
            _ if msg.hdr.iface == CONSOLE_IFACE && msg.hdr.msg_type == MsgType::MethodCall => {
                // The loop is parked inside the engine; console commands
                // cannot run until the target resumes.
                let _ = self.error_reply(&msg.hdr, "org.alljoyn.Bus.Busy", "debugger active");
            }
            _ => {
                debug!(iface = %msg.hdr.iface, member = %msg.hdr.member,
                    "message dropped while debugging");
            }
        }
    }

    /// The engine's debug write callback: scan protocol bytes, emit
    /// completed frames, and answer the console. The first write is the
    /// bare version banner.
    pub fn debug_pipe_write(&mut self, bytes: &[u8]) -> usize {
        let Some(dbg) = self.console.dbg.as_mut() else {
            return 0;
        };
        if !dbg.initial_notify {
            dbg.initial_notify = true;
            let version = String::from_utf8_lossy(bytes).trim_end().to_owned();
            info!(version = %version, "debug target version");
            let serial = self.bus.next_serial();
            let msg = Msg::signal(
                serial,
                &self.console.peer.clone(),
                CONSOLE_PATH,
                DEBUGGER_IFACE,
                "version",
                self.console.session,
            )
            .arg(WireArg::Str(version));
            let _ = self.bus.deliver(msg);
            return bytes.len();
        }
        let frames = dbg.scanner.push(bytes);
        for frame in frames {
            self.handle_frame(&frame);
        }
        bytes.len()
    }

    fn handle_frame(&mut self, frame: &Frame) {
        match frame.kind {
            NFY => self.handle_notification(frame),
            REP => self.handle_reply(frame),
            dvalue::ERR => {
                if let Some(hdr) = self.console.dbg.as_mut().and_then(|d| d.saved_reply.take()) {
                    self.console.dbg.as_mut().and_then(|d| d.last_request.take());
                    let _ = self.error_reply(&hdr, ERROR_REJECTED, "debug request failed");
                }
            }
            REQ => warn!("unexpected REQ from debug target"),
            kind => warn!(kind, "unknown debug frame kind"),
        }
    }

    fn handle_notification(&mut self, frame: &Frame) {
        match frame.opcode() {
            Some(NFY_STATUS) => {
                // <NFY><1><state><file><func><line><pc><EOM>; file/func are
                // undefined when no bytecode is executing.
                let state = frame.values.get(1).and_then(Dvalue::as_int).unwrap_or(0);
                let file = frame.values.get(2).and_then(Dvalue::as_str);
                let running = state == 0 || file.is_none();
                let file = file.unwrap_or("N/A").to_owned();
                let func =
                    frame.values.get(3).and_then(Dvalue::as_str).unwrap_or("N/A").to_owned();
                let line = frame.values.get(4).and_then(Dvalue::as_int).unwrap_or(0);
                let pc = frame.values.get(5).and_then(Dvalue::as_int).unwrap_or(0);
                if let Some(dbg) = self.console.dbg.as_mut() {
                    dbg.status = if running { DbgStatus::Running } else { DbgStatus::Paused };
                }
                debug!(state, file = %file, func = %func, line, pc, "status notification");
                let serial = self.bus.next_serial();
                let msg = Msg::signal(
                    serial,
                    &self.console.peer.clone(),
                    CONSOLE_PATH,
                    DEBUGGER_IFACE,
                    "notification",
                    self.console.session,
                )
                .arg(WireArg::Byte(NFY_STATUS as u8))
                .arg(WireArg::Byte(state as u8))
                .arg(WireArg::Str(file))
                .arg(WireArg::Str(func))
                .arg(WireArg::Uint16(line as u16))
                .arg(WireArg::Byte(pc as u8));
                let _ = self.bus.deliver(msg);
            }
            Some(NFY_PRINT) | Some(NFY_ALERT) => {
                let text = frame.values.get(1).and_then(Dvalue::as_str).unwrap_or_default();
                let kind = if frame.opcode() == Some(NFY_PRINT) {
                    ConsoleStream::Print
                } else {
                    ConsoleStream::Alert
                };
                super::stream(self, kind, &text.to_owned());
            }
            Some(NFY_LOG) => {
                let text = frame.values.get(1).and_then(Dvalue::as_str).unwrap_or_default();
                info!(target: "script", "{text}");
            }
            other => debug!(?other, "unhandled debug notification"),
        }
    }

    fn handle_reply(&mut self, frame: &Frame) {
        let (request, hdr) = {
            let Some(dbg) = self.console.dbg.as_mut() else { return };
            (dbg.last_request.take(), dbg.saved_reply.take())
        };
        let Some(hdr) = hdr else {
            warn!("debug reply with no pending request");
            return;
        };
        let serial = self.bus.next_serial();
        let reply = match request {
            Some(REQ_GET_VAR) | Some(REQ_EVAL) => {
                // <REP><valid><tval><EOM>
                let valid = frame.values.first().and_then(Dvalue::as_int).unwrap_or(0);
                let tval = frame.values.get(1);
                let found = (request == Some(REQ_GET_VAR) && valid != 0)
                    || (request == Some(REQ_EVAL) && valid == 0);
                let mut reply = Msg::reply_to(&hdr, serial)
                    .arg(WireArg::Byte(valid as u8))
                    .arg(WireArg::Byte(tval.map(tag_of).unwrap_or(0)));
                reply = match tval {
                    Some(tval) if found => reply.arg(tval_variant(tval)),
                    _ => reply.arg(WireArg::Variant("y".into(), Box::new(WireArg::Byte(0)))),
                };
                reply
            }
            Some(REQ_BASIC_INFO) => {
                // <REP><version><description><target><endianness><EOM>
                let version = frame.values.first().and_then(Dvalue::as_int).unwrap_or(0);
                let describe =
                    frame.values.get(1).and_then(Dvalue::as_str).unwrap_or_default();
                let target = frame.values.get(2).and_then(Dvalue::as_str).unwrap_or_default();
                let endian = frame.values.get(3).and_then(Dvalue::as_int).unwrap_or(0);
                Msg::reply_to(&hdr, serial)
                    .arg(WireArg::Byte(version as u8))
                    .arg(WireArg::Str(describe.to_owned()))
                    .arg(WireArg::Str(target.to_owned()))
                    .arg(WireArg::Byte(endian as u8))
            }
            Some(REQ_GET_CALL_STACK) => {
                // <REP>[<file><func><line><pc>]*<EOM>
                let mut entries = Vec::new();
                for chunk in frame.values.chunks(4) {
                    if chunk.len() < 4 {
                        break;
                    }
                    entries.push(WireArg::Struct(vec![
                        WireArg::Str(chunk[0].as_str().unwrap_or("N/A").to_owned()),
                        WireArg::Str(chunk[1].as_str().unwrap_or("N/A").to_owned()),
                        WireArg::Uint16(chunk[2].as_int().unwrap_or(0) as u16),
                        WireArg::Byte(chunk[3].as_int().unwrap_or(0) as u8),
                    ]));
                }
                Msg::reply_to(&hdr, serial).arg(WireArg::Array("(ssqy)".into(), entries))
            }
            Some(REQ_LIST_BREAK) => {
                // <REP>[<file><line>]*<EOM>
                let mut entries = Vec::new();
                for chunk in frame.values.chunks(2) {
                    if chunk.len() < 2 {
                        break;
                    }
                    entries.push(WireArg::Struct(vec![
                        WireArg::Str(chunk[0].as_str().unwrap_or("N/A").to_owned()),
                        WireArg::Uint16(chunk[1].as_int().unwrap_or(0) as u16),
                    ]));
                }
                if entries.is_empty() {
                    entries.push(WireArg::Struct(vec![
                        WireArg::Str("N/A".to_owned()),
                        WireArg::Uint16(0),
                    ]));
                }
                Msg::reply_to(&hdr, serial).arg(WireArg::Array("(sq)".into(), entries))
            }
            Some(REQ_GET_LOCALS) => {
                // <REP>[<name><tval>]*<EOM>
                let mut entries = Vec::new();
                for chunk in frame.values.chunks(2) {
                    if chunk.len() < 2 {
                        break;
                    }
                    entries.push(WireArg::Struct(vec![
                        WireArg::Byte(tag_of(&chunk[1])),
                        WireArg::Str(chunk[0].as_str().unwrap_or("N/A").to_owned()),
                        tval_variant(&chunk[1]),
                    ]));
                }
                if entries.is_empty() {
                    entries.push(WireArg::Struct(vec![
                        WireArg::Byte(0),
                        WireArg::Str("N/A".to_owned()),
                        WireArg::Variant("s".into(), Box::new(WireArg::Str("N/A".to_owned()))),
                    ]));
                }
                Msg::reply_to(&hdr, serial).arg(WireArg::Array("(ysv)".into(), entries))
            }
            Some(REQ_DUMP_HEAP) => {
                let entries = frame.values.iter().map(tval_variant).collect();
                Msg::reply_to(&hdr, serial).arg(WireArg::Array("v".into(), entries))
            }
            Some(_) => {
                // Simple command acknowledgement.
                Msg::reply_to(&hdr, serial).arg(WireArg::Byte(1))
            }
            None => {
                warn!("reply frame with unknown request kind");
                return;
            }
        };
        let _ = self.bus.deliver(reply);
    }
}

/// Wire tag byte reported for a tagged value in `getVar`/`getLocals`
/// replies.
fn tag_of(value: &Dvalue) -> u8 {
    match value {
        Dvalue::Int(_) => 0x10,
        Dvalue::Str(_) => 0x12,
        Dvalue::Buf(_) => 0x14,
        Dvalue::Unused => 0x15,
        Dvalue::Undefined => 0x16,
        Dvalue::Null => 0x17,
        Dvalue::Bool(true) => 0x18,
        Dvalue::Bool(false) => 0x19,
        Dvalue::Num(_) => 0x1A,
        Dvalue::Obj { .. } => 0x1B,
        Dvalue::Ptr(_) => 0x1C,
        Dvalue::LightFunc { .. } => 0x1D,
        Dvalue::HeapPtr(_) => 0x1E,
    }
}

/// Marshal a tagged value as the variant leg of a reply.
fn tval_variant(value: &Dvalue) -> WireArg {
    match value {
        Dvalue::Num(n) => WireArg::Variant("d".into(), Box::new(WireArg::Double(*n))),
        Dvalue::Int(v) => WireArg::Variant("u".into(), Box::new(WireArg::Uint32(*v))),
        Dvalue::Str(s) => WireArg::Variant("s".into(), Box::new(WireArg::Str(s.clone()))),
        Dvalue::Bool(_) | Dvalue::Undefined | Dvalue::Null | Dvalue::Unused => {
            WireArg::Variant("y".into(), Box::new(WireArg::Byte(tag_of(value))))
        }
        Dvalue::Buf(raw) => WireArg::Variant(
            "(qay)".into(),
            Box::new(WireArg::Struct(vec![
                WireArg::Uint16(raw.len() as u16),
                WireArg::Bytes(raw.clone()),
            ])),
        ),
        Dvalue::LightFunc { flags, ptr } => WireArg::Variant(
            "(qay)".into(),
            Box::new(WireArg::Struct(vec![
                WireArg::Uint16(*flags),
                WireArg::Bytes(ptr.clone()),
            ])),
        ),
        Dvalue::Obj { class, ptr } => WireArg::Variant(
            "(yyay)".into(),
            Box::new(WireArg::Struct(vec![
                WireArg::Byte(0x1B),
                WireArg::Byte(*class),
                WireArg::Bytes(ptr.clone()),
            ])),
        ),
        Dvalue::Ptr(ptr) | Dvalue::HeapPtr(ptr) => WireArg::Variant(
            "(yyay)".into(),
            Box::new(WireArg::Struct(vec![
                WireArg::Byte(tag_of(value)),
                WireArg::Byte(0),
                WireArg::Bytes(ptr.clone()),
            ])),
        ),
    }
}

#[cfg(test)]
#[path = "debugger_tests.rs"]
mod tests;
