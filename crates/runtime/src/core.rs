// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runtime's shared state and the host API exposed to script.
//!
//! Everything the original kept in file-scope globals lives here, owned by
//! the loop. [`Core`] is one half of the runtime; the script engine is the
//! other, so an engine invocation can borrow the whole core mutably while
//! running host functions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::bus::loopback::TriggerSet;
use crate::bus::{Msg, MsgHeader, Serial, SessionId, Transport, WireArg, PROPERTIES_IFACE};
use crate::console::ConsoleState;
use crate::ctrlpanel::ControlPanel;
use crate::engine::CallbackRef;
use crate::error::{CoreError, CoreResult};
use crate::heap::{default_pool_config, Heap};
use crate::io::{IoTarget, PinId, SimIo, TriggerMode};
use crate::marshal;
use crate::nvram::Nvram;
use crate::propstore::PropStore;
use crate::sessions::SessionManager;
use crate::storage;
use crate::tables::{Definitions, InterfaceDef, MemberKind, ObjectDef, ObjectTables};
use crate::timer::{TimerId, TimerWheel};
use crate::translations::Translations;
use crate::value::{Handle, Value};

/// Error name used when a method call has no registered handler.
pub const ERROR_REJECTED: &str = "org.alljoyn.Bus.Rejected";
/// Error name used when a script handler threw.
pub const ERROR_SCRIPT: &str = "org.alljoyn.Bus.ScriptError";

/// Default watchdog budget for one script call, in milliseconds.
pub const WATCHDOG_TIMEOUT_MS: u64 = 5_000;

/// Operations that cannot run from inside a script callback and are
/// executed at the bottom of the loop instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeferredOp {
    #[default]
    None,
    FactoryReset,
    Offboard,
}

/// Deadline guard armed around every script call. Enforcement is
/// cooperative: the engine polls [`Watchdog::expired`] from its own
/// instruction/cooperate hooks.
#[derive(Debug, Default)]
pub struct Watchdog {
    deadline: Option<Instant>,
    disabled: bool,
}

impl Watchdog {
    pub fn arm(&mut self, budget: Duration) {
        if !self.disabled {
            self.deadline = Some(Instant::now() + budget);
        }
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Debugging suspends the watchdog entirely.
    pub fn disable(&mut self) {
        self.disabled = true;
        self.deadline = None;
    }

    pub fn enable(&mut self) {
        self.disabled = false;
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }
}

/// Reply callbacks registered for an outbound method call.
#[derive(Debug, Clone)]
pub struct ReplyHandlers {
    pub peer: String,
    pub on_reply: Option<CallbackRef>,
    pub on_error: Option<CallbackRef>,
}

/// Host side of a script-visible service object. Script holds only an
/// opaque handle; these records are the side table behind it.
#[derive(Debug, Clone)]
pub struct ServiceObject {
    pub peer: String,
    pub path: String,
    pub session: SessionId,
    pub interfaces: Vec<String>,
    pub secure: bool,
}

/// Saved header of an inbound method call the script may still reply to.
#[derive(Debug, Clone)]
pub struct ReplyCtx {
    pub hdr: MsgHeader,
    pub out_signature: String,
    pub replied: bool,
}

/// A script invocation queued by a state-machine step; the loop invokes it
/// as soon as the step returns (there is no cross-iteration queue).
#[derive(Debug)]
pub struct PendingCall {
    pub callback: CallbackRef,
    pub args: Vec<Value>,
}

pub struct Core {
    pub bus: Box<dyn Transport>,
    pub nvram: Box<dyn Nvram>,
    /// Pool heap backing script-visible staging allocations.
    pub heap: Heap,
    /// Target peripheral driver (simulated on the host).
    pub io: Box<dyn IoTarget>,
    pub defs: Definitions,
    pub tables: ObjectTables,
    pub translations: Translations,
    pub propstore: PropStore,
    pub timers: TimerWheel,
    pub sessions: SessionManager,
    pub console: ConsoleState,
    pub panel: ControlPanel,
    pub watchdog: Watchdog,
    pub deferred: DeferredOp,
    /// serial → reply callbacks for outstanding method calls.
    pub replies: HashMap<Serial, ReplyHandlers>,
    service_objects: HashMap<Handle, ServiceObject>,
    reply_ctx: HashMap<Handle, ReplyCtx>,
    next_handle: Handle,
    /// Queued policy-changed notifications.
    pub policy_changes: u32,
    /// Trigger-bit → script handler for external interrupts.
    pub io_handlers: HashMap<u32, CallbackRef>,
    /// Pin → script handler for armed GPIO triggers.
    pub pin_callbacks: HashMap<PinId, CallbackRef>,
    pub triggers: Arc<TriggerSet>,
    pub link_timeout_ms: u32,
    /// Whether an About announcement should be (re)emitted.
    pub announce_pending: bool,
    pub attached: bool,
    /// True while the message loop is running script-visible traffic.
    pub running: bool,
    lockdown: Option<bool>,
}

impl Core {
    pub fn new(bus: Box<dyn Transport>, nvram: Box<dyn Nvram>, triggers: Arc<TriggerSet>) -> Self {
        let guid = bus.local_guid();
        let heap = match Heap::init(&default_pool_config()) {
            Ok(heap) => heap,
            // The default configuration is valid by construction.
            Err(_) => unreachable!("default pool config"),
        };
        Self {
            bus,
            nvram,
            heap,
            io: Box::new(SimIo::new(32)),
            defs: Definitions::default(),
            tables: ObjectTables::default(),
            translations: Translations::default(),
            propstore: PropStore::new(guid),
            timers: TimerWheel::new(),
            sessions: SessionManager::default(),
            console: ConsoleState::default(),
            panel: ControlPanel::default(),
            watchdog: Watchdog::default(),
            deferred: DeferredOp::default(),
            replies: HashMap::new(),
            service_objects: HashMap::new(),
            reply_ctx: HashMap::new(),
            next_handle: 1,
            policy_changes: 0,
            io_handlers: HashMap::new(),
            pin_callbacks: HashMap::new(),
            triggers,
            link_timeout_ms: 10_000,
            announce_pending: false,
            attached: false,
            running: false,
            lockdown: None,
        }
    }

    // -- Script registration surface -------------------------------------

    pub fn define_interface(&mut self, name: &str, def: InterfaceDef) {
        self.defs.interfaces.insert(name.to_owned(), def);
    }

    pub fn define_object(&mut self, path: &str, def: ObjectDef) {
        self.defs.objects.insert(path.to_owned(), def);
    }

    pub fn register_languages(&mut self, languages: Vec<String>) {
        self.translations.register_languages(languages);
    }

    pub fn add_translation(&mut self, lang: &str, from: &str, to: &str) {
        self.translations.add_translation(lang, from, to);
    }

    pub fn override_about_field(&mut self, key: &str, value: Option<String>, flags: Option<u8>) {
        self.propstore.override_field(key, value, flags);
    }

    pub fn set_link_timeout(&mut self, ms: u32) {
        self.link_timeout_ms = ms;
    }

    /// Register a handler for an external trigger bit (§5 interrupt
    /// contract). The driver side sets the bit and wakes the loop.
    pub fn on_trigger(&mut self, bit: u32, callback: CallbackRef) {
        self.io_handlers.insert(bit, callback);
    }

    pub fn queue_policy_changed(&mut self) {
        self.policy_changes += 1;
    }

    pub fn request_deferred(&mut self, op: DeferredOp) {
        self.deferred = op;
    }

    // -- Timers -----------------------------------------------------------

    pub fn set_timeout(&mut self, callback: CallbackRef, ms: u32) -> CoreResult<TimerId> {
        self.timers.set_timeout(callback, ms)
    }

    pub fn set_interval(&mut self, callback: CallbackRef, ms: u32) -> CoreResult<TimerId> {
        self.timers.set_interval(callback, ms)
    }

    /// Cancel a timer; the returned callback ref (if any) must be released
    /// by the engine.
    pub fn clear_timer(&mut self, id: TimerId, periodic: bool) -> CoreResult<Option<CallbackRef>> {
        self.timers.clear(id, periodic)
    }

    pub fn reset_timer(&mut self, id: TimerId, periodic: bool, ms: u32) -> CoreResult<TimerId> {
        self.timers.reset(id, periodic, ms)
    }

    // -- Peripherals ------------------------------------------------------

    /// Arm a GPIO edge trigger and bind its script handler. The driver
    /// side queues the pin and wakes the loop; the handler runs from the
    /// loop's I/O service step with the pin id as its argument.
    pub fn io_on_trigger(
        &mut self,
        pin: PinId,
        mode: TriggerMode,
        debounce_ms: u8,
        callback: CallbackRef,
    ) -> CoreResult<u32> {
        let id = self.io.enable_trigger(pin, mode, debounce_ms)?;
        self.pin_callbacks.insert(pin, callback);
        Ok(id)
    }

    // -- Lockdown ---------------------------------------------------------

    /// Cached read of the NVRAM lockdown bit.
    pub fn lockdown(&mut self) -> bool {
        match self.lockdown {
            Some(locked) => locked,
            None => {
                let locked = storage::lockdown_state(self.nvram.as_ref());
                self.lockdown = Some(locked);
                locked
            }
        }
    }

    pub fn set_lockdown(&mut self) -> CoreResult<()> {
        storage::set_lockdown(self.nvram.as_mut())?;
        self.lockdown = Some(true);
        Ok(())
    }

    // -- Handles and service objects --------------------------------------

    pub fn alloc_handle(&mut self) -> Handle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Create a service object for `peer` and take a reference on its
    /// session record.
    pub fn create_service_object(
        &mut self,
        peer: &str,
        path: &str,
        interfaces: Vec<String>,
    ) -> Handle {
        let session = self.sessions.session_id(peer);
        let handle = self.alloc_handle();
        self.service_objects.insert(
            handle,
            ServiceObject {
                peer: peer.to_owned(),
                path: path.to_owned(),
                session,
                interfaces,
            secure: false,
            },
        );
        self.sessions.add_ref(peer);
        handle
    }

    pub fn service_object(&self, handle: Handle) -> CoreResult<&ServiceObject> {
        self.service_objects.get(&handle).ok_or(CoreError::Invalid)
    }

    /// The value handed to script for a service object.
    pub fn service_value(&self, handle: Handle) -> Value {
        match self.service_objects.get(&handle) {
            Some(svc) => Value::obj([
                ("dest", Value::str(&svc.peer)),
                ("path", Value::str(&svc.path)),
                ("session", Value::UInt(svc.session as u64)),
                (
                    "interfaces",
                    Value::Arr(svc.interfaces.iter().map(Value::str).collect()),
                ),
                ("id", Value::Ref(handle)),
            ]),
            None => Value::Undefined,
        }
    }

    /// Refresh the session id recorded on a peer's service objects.
    pub fn refresh_service_sessions(&mut self, peer: &str) {
        let session = self.sessions.session_id(peer);
        for svc in self.service_objects.values_mut() {
            if svc.peer == peer {
                svc.session = session;
            }
        }
    }

    /// Release a service object (the script-side finalizer). When the last
    /// reference to a peer drops and a session exists, the session is left
    /// and the record removed.
    pub fn release_service(&mut self, handle: Handle) {
        let Some(svc) = self.service_objects.remove(&handle) else {
            return;
        };
        if let Some(session) = self.sessions.release_ref(&svc.peer) {
            if self.running {
                let _ = self.bus.leave_session(session);
            }
        }
    }

    /// Drop every service object bound to `peer` without touching the
    /// session (used when the session is already gone).
    pub fn drop_peer_services(&mut self, peer: &str) {
        self.service_objects.retain(|_, svc| svc.peer != peer);
        self.replies.retain(|_, r| r.peer != peer);
    }

    pub fn live_service_objects(&self, peer: &str) -> usize {
        self.service_objects.values().filter(|s| s.peer == peer).count()
    }

    // -- Outbound calls ----------------------------------------------------

    /// Resolve the interface defining `member` for a service object,
    /// honoring an explicit `{ member: iface }` style hint.
    fn resolve_member(
        &self,
        interfaces: &[String],
        member: &str,
        iface_hint: Option<&str>,
    ) -> CoreResult<(String, String, String)> {
        match iface_hint {
            Some(iface) => {
                let def = self.defs.member(iface, member).ok_or(CoreError::Invalid)?;
                Ok((iface.to_owned(), def.in_signature(), def.out_signature()))
            }
            None => {
                let (iface, def) = self
                    .defs
                    .find_member(interfaces, member)
                    .ok_or(CoreError::Invalid)?;
                Ok((iface.to_owned(), def.in_signature(), def.out_signature()))
            }
        }
    }

    /// Outbound method call on a service object. Returns the serial used
    /// for reply correlation.
    pub fn svc_method_call(
        &mut self,
        handle: Handle,
        member: &str,
        iface_hint: Option<&str>,
        args: &[Value],
    ) -> CoreResult<Serial> {
        let svc = self.service_object(handle)?.clone();
        self.check_peer_alive(&svc.peer)?;
        let (iface, in_sig, _) = self.resolve_member(&svc.interfaces, member, iface_hint)?;
        let body = marshal::marshal_args(&in_sig, args)?;
        // One wire-layer slot serves every dynamic target path.
        self.tables.set_object_path(Some(&svc.path));
        let serial = self.bus.next_serial();
        let msg = Msg::method_call(serial, &svc.peer, &svc.path, &iface, member, svc.session)
            .args(body);
        self.bus.deliver(msg)?;
        Ok(serial)
    }

    /// Attach reply callbacks to an outstanding call.
    pub fn on_reply(
        &mut self,
        serial: Serial,
        peer: &str,
        on_reply: Option<CallbackRef>,
        on_error: Option<CallbackRef>,
    ) {
        self.replies
            .insert(serial, ReplyHandlers { peer: peer.to_owned(), on_reply, on_error });
    }

    /// Session-directed signal from a service object.
    pub fn svc_signal(
        &mut self,
        handle: Handle,
        member: &str,
        iface_hint: Option<&str>,
        args: &[Value],
    ) -> CoreResult<()> {
        let svc = self.service_object(handle)?.clone();
        self.check_peer_alive(&svc.peer)?;
        let (iface, sig, _) = self.resolve_member(&svc.interfaces, member, iface_hint)?;
        let body = marshal::marshal_args(&sig, args)?;
        self.tables.set_object_path(Some(&svc.path));
        let serial = self.bus.next_serial();
        let msg =
            Msg::signal(serial, &svc.peer, &svc.path, &iface, member, svc.session).args(body);
        self.bus.deliver(msg)
    }

    /// Broadcast signal from one of our own registered objects.
    pub fn broadcast_signal(
        &mut self,
        path: &str,
        member: &str,
        iface_hint: Option<&str>,
        args: &[Value],
    ) -> CoreResult<()> {
        let object = self.defs.objects.get(path).ok_or(CoreError::Invalid)?;
        let interfaces = object.interfaces.clone();
        let (iface, sig, _) = self.resolve_member(&interfaces, member, iface_hint)?;
        let body = marshal::marshal_args(&sig, args)?;
        self.tables.set_object_path(Some(path));
        let serial = self.bus.next_serial();
        let msg = Msg::signal(serial, "", path, &iface, member, 0).args(body);
        self.bus.deliver(msg)
    }

    /// Remote property read; replies arrive like any method reply.
    pub fn svc_get_prop(&mut self, handle: Handle, prop: &str) -> CoreResult<Serial> {
        let svc = self.service_object(handle)?.clone();
        self.check_peer_alive(&svc.peer)?;
        let (iface, _, _) = self.resolve_member(&svc.interfaces, prop, None)?;
        self.tables.set_object_path(Some(&svc.path));
        let serial = self.bus.next_serial();
        let msg = Msg::method_call(
            serial,
            &svc.peer,
            &svc.path,
            PROPERTIES_IFACE,
            "Get",
            svc.session,
        )
        .arg(WireArg::Str(iface))
        .arg(WireArg::Str(prop.to_owned()));
        self.bus.deliver(msg)?;
        Ok(serial)
    }

    pub fn svc_set_prop(
        &mut self,
        handle: Handle,
        prop: &str,
        value: &Value,
    ) -> CoreResult<Serial> {
        let svc = self.service_object(handle)?.clone();
        self.check_peer_alive(&svc.peer)?;
        let (iface, sig, _) = self.resolve_member(&svc.interfaces, prop, None)?;
        let wire = marshal::value_to_wire(value, &sig)?;
        self.tables.set_object_path(Some(&svc.path));
        let serial = self.bus.next_serial();
        let msg = Msg::method_call(
            serial,
            &svc.peer,
            &svc.path,
            PROPERTIES_IFACE,
            "Set",
            svc.session,
        )
        .arg(WireArg::Str(iface))
        .arg(WireArg::Str(prop.to_owned()))
        .arg(WireArg::Variant(sig, Box::new(wire)));
        self.bus.deliver(msg)?;
        Ok(serial)
    }

    pub fn svc_get_all_props(&mut self, handle: Handle, iface: &str) -> CoreResult<Serial> {
        let svc = self.service_object(handle)?.clone();
        self.check_peer_alive(&svc.peer)?;
        self.tables.set_object_path(Some(&svc.path));
        let serial = self.bus.next_serial();
        let msg = Msg::method_call(
            serial,
            &svc.peer,
            &svc.path,
            PROPERTIES_IFACE,
            "GetAll",
            svc.session,
        )
        .arg(WireArg::Str(iface.to_owned()));
        self.bus.deliver(msg)?;
        Ok(serial)
    }

    /// Begin authenticating the peer behind a service object; the
    /// completion callback fires from the loop's session-service step.
    pub fn svc_enable_security(
        &mut self,
        handle: Handle,
        callback: CallbackRef,
    ) -> CoreResult<()> {
        let svc = self.service_object(handle)?.clone();
        self.check_peer_alive(&svc.peer)?;
        if let Some(obj) = self.service_objects.get_mut(&handle) {
            obj.secure = true;
        }
        self.sessions.begin_auth(&svc.peer, callback, handle);
        self.bus.authenticate_peer(&svc.peer)
    }

    fn check_peer_alive(&self, peer: &str) -> CoreResult<()> {
        if !peer.is_empty() && !self.sessions.contains(peer) {
            warn!(peer, "peer has disconnected");
            return Err(CoreError::Invalid);
        }
        if self.sessions.auth_status(peer) == crate::sessions::AuthStatus::AuthError {
            warn!(peer, "peer failed authentication");
            return Err(CoreError::Invalid);
        }
        Ok(())
    }

    // -- Inbound method-call replies --------------------------------------

    /// Save the context needed to answer an inbound method call and hand
    /// the script an opaque reply handle.
    pub fn save_reply_ctx(&mut self, hdr: &MsgHeader, out_signature: &str) -> Handle {
        let handle = self.alloc_handle();
        self.reply_ctx.insert(
            handle,
            ReplyCtx {
                hdr: hdr.clone(),
                out_signature: out_signature.to_owned(),
                replied: false,
            },
        );
        handle
    }

    /// `reply(args…)` on a message view. The context stays open if
    /// marshalling fails so the script can still send an error reply.
    pub fn msg_reply(&mut self, handle: Handle, args: &[Value]) -> CoreResult<()> {
        let ctx = self.reply_ctx.get(&handle).ok_or(CoreError::Invalid)?;
        if ctx.replied {
            return Err(CoreError::Invalid);
        }
        let ctx = ctx.clone();
        let body = marshal::marshal_args(&ctx.out_signature, args)?;
        let serial = self.bus.next_serial();
        let msg = Msg::reply_to(&ctx.hdr, serial).args(body);
        self.bus.deliver(msg)?;
        self.reply_ctx.remove(&handle);
        Ok(())
    }

    /// `errorReply(code, msg)` on a message view.
    pub fn msg_error_reply(&mut self, handle: Handle, error: &str, text: &str) -> CoreResult<()> {
        if !self.reply_ctx_open(handle) {
            return Err(CoreError::Invalid);
        }
        let ctx = self.reply_ctx.remove(&handle).ok_or(CoreError::Invalid)?;
        let serial = self.bus.next_serial();
        let name = if error.is_empty() { ERROR_SCRIPT } else { error };
        let msg = Msg::error_to(&ctx.hdr, serial, name).arg(WireArg::Str(text.to_owned()));
        self.bus.deliver(msg)
    }

    /// Whether the script already replied through this context; used by
    /// the dispatcher to avoid double error replies.
    pub fn reply_ctx_open(&self, handle: Handle) -> bool {
        self.reply_ctx.get(&handle).is_some_and(|c| !c.replied)
    }

    pub fn take_reply_ctx(&mut self, handle: Handle) -> Option<ReplyCtx> {
        self.reply_ctx.remove(&handle)
    }

    /// Send an error reply for an unhandled or failed method call.
    pub fn error_reply(&mut self, hdr: &MsgHeader, error: &str, text: &str) -> CoreResult<()> {
        let serial = self.bus.next_serial();
        let msg = Msg::error_to(hdr, serial, error).arg(WireArg::Str(text.to_owned()));
        self.bus.deliver(msg)
    }

    // -- Member metadata used by the dispatcher ---------------------------

    /// Access mode of a property member on one of our interfaces.
    pub fn prop_access(
        &self,
        iface: &str,
        member: &str,
    ) -> Option<(crate::tables::Access, String)> {
        let def = self.defs.member(iface, member)?;
        if def.kind != Some(MemberKind::Property) {
            return None;
        }
        Some((def.access, def.signature.clone().unwrap_or_default()))
    }

    // -- Notifications ----------------------------------------------------

    /// Minimal notification-service bridge: a sessionless broadcast signal
    /// carrying severity and per-language text.
    pub fn send_notification(&mut self, severity: u8, text: &str) -> CoreResult<()> {
        let lang = self
            .propstore
            .get(self.nvram.as_ref(), &self.translations, crate::propstore::Field::DefaultLanguage)
            .unwrap_or_else(|| "en".to_owned());
        let serial = self.bus.next_serial();
        let msg = Msg::signal(
            serial,
            "",
            "/notification",
            "org.alljoyn.Notification",
            "notify",
            0,
        )
        .arg(WireArg::Byte(severity))
        .arg(WireArg::Array(
            "{ss}".into(),
            vec![WireArg::DictEntry(
                Box::new(WireArg::Str(lang)),
                Box::new(WireArg::Str(text.to_owned())),
            )],
        ));
        self.bus.deliver(msg)
    }

    // -- About ------------------------------------------------------------

    /// Emit the queued About announcement, if any.
    pub fn announce_if_needed(&mut self) -> CoreResult<()> {
        if !self.announce_pending {
            return Ok(());
        }
        self.announce_pending = false;
        let lang = self.propstore.current_language(self.nvram.as_ref(), &self.translations);
        let props = self.propstore.read_all(
            self.nvram.as_ref(),
            &self.translations,
            crate::propstore::ReadFilter::Announce,
            lang,
        );
        let mut objects = self.tables.announced_objects(&self.defs);
        objects.extend(self.panel.announced_objects());
        debug!(objects = objects.len(), "about announce");
        self.bus.about_announce(crate::bus::APP_PORT, props, objects)
    }
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
