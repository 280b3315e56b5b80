// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The central event loop.
//!
//! Each iteration services timers, external triggers and pending session
//! work, emits any queued announcement, then blocks in the transport for
//! up to the nearest timer deadline. Inbound messages are classified and
//! routed to the session manager, the console/debugger, the widget
//! service, or the user script. Only transport failures and restart
//! requests break the loop; every other error is logged and suppressed.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::bus::{
    classify, Msg, MsgClass, MsgType, WireArg, ABOUT_IFACE, APP_PORT, PROPERTIES_IFACE,
};
use crate::console;
use crate::core::{Core, DeferredOp, PendingCall, ERROR_REJECTED, ERROR_SCRIPT, WATCHDOG_TIMEOUT_MS};
use crate::ctrlpanel;
use crate::engine::{hooks, CallbackRef, ScriptEngine};
use crate::error::{CoreError, CoreResult};
use crate::marshal;
use crate::tables::{Access, MemberKind};
use crate::value::Value;

/// Invoke one script callback under the watchdog, reporting any throw
/// through the console.
fn invoke_guarded(
    core: &mut Core,
    engine: &mut dyn ScriptEngine,
    callback: CallbackRef,
    args: &[Value],
) -> Option<Value> {
    core.watchdog.arm(Duration::from_millis(WATCHDOG_TIMEOUT_MS));
    let outcome = engine.invoke(core, callback, args);
    core.watchdog.clear();
    match outcome {
        Ok(value) => Some(value),
        Err(err) => {
            console::report_script_error(core, &err);
            None
        }
    }
}

fn run_calls(core: &mut Core, engine: &mut dyn ScriptEngine, calls: Vec<PendingCall>) {
    for call in calls {
        invoke_guarded(core, engine, call.callback, &call.args);
    }
}

/// Fire due timers and update the loop's wait budget.
fn run_timers(
    core: &mut Core,
    engine: &mut dyn ScriptEngine,
    elapsed: u32,
    timeout: &mut u32,
) {
    let fired = core.timers.run(elapsed, timeout);
    for timer in fired {
        debug!(slot = timer.slot, periodic = timer.periodic, "timer fired");
        invoke_guarded(core, engine, timer.callback, &[]);
        if !timer.periodic {
            engine.drop_ref(timer.callback);
        }
    }
}

/// Dispatch handlers for external trigger bits and pending pin triggers
/// (§5 interrupt contract).
fn service_io(core: &mut Core, engine: &mut dyn ScriptEngine) {
    let bits = core.triggers.take_all();
    for bit in 0u32..32 {
        if bits & (1u32 << bit) == 0 {
            continue;
        }
        match core.io_handlers.get(&bit).copied() {
            Some(callback) => {
                invoke_guarded(core, engine, callback, &[Value::UInt(bit as u64)]);
            }
            None => debug!(bit, "trigger with no handler"),
        }
    }
    // GPIO triggers the driver queued since the last tick.
    while let Some(pin) = core.io.next_triggered() {
        match core.pin_callbacks.get(&pin).copied() {
            Some(callback) => {
                invoke_guarded(core, engine, callback, &[Value::UInt(pin as u64)]);
            }
            None => debug!(pin, "pin trigger with no handler"),
        }
    }
}

fn process_policy_notifications(core: &mut Core, engine: &mut dyn ScriptEngine) {
    if core.policy_changes == 0 {
        return;
    }
    core.policy_changes -= 1;
    match engine.hook(hooks::ON_POLICY_CHANGED) {
        Some(callback) => {
            invoke_guarded(core, engine, callback, &[]);
        }
        None => warn!("onPolicyChanged not registered, ignoring"),
    }
}

/// Scripts accept a session by returning `true`, exactly.
fn truthy_accept(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

fn accept_session(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    let port = msg.body.first().and_then(|a| a.as_u16()).ok_or(CoreError::Invalid)?;
    let session = msg.body.get(1).and_then(|a| a.as_u32()).ok_or(CoreError::Invalid)?;
    let joiner = msg
        .body
        .get(2)
        .and_then(|a| a.as_str())
        .ok_or(CoreError::Invalid)?
        .to_owned();

    if port == APP_PORT {
        // Sessions to the application port are auto-accepted unless the
        // script's onPeerConnected declines.
        core.sessions.ensure_peer(&joiner);
        let mut accept = true;
        if let Some(callback) = engine.hook(hooks::ON_PEER_CONNECTED) {
            let handle = core.create_service_object(&joiner, "/", Vec::new());
            let svc = core.service_value(handle);
            accept = invoke_guarded(core, engine, callback, &[svc])
                .as_ref()
                .map(truthy_accept)
                .unwrap_or(false);
        }
        if accept {
            let info = core.sessions.ensure_peer(&joiner);
            info.refcount += 1;
            info.port = port;
            info.session = session;
            core.refresh_service_sessions(&joiner);
            info!(session, joiner = %joiner, "peer session accepted");
        } else if core.sessions.refcount(&joiner) == 0 {
            core.sessions.remove_peer(&joiner);
        }
        return core.bus.accept_session_reply(session, accept);
    }
    // Some other port: console first, then the widget service.
    if !core.lockdown() {
        if let Some(result) = console::handle_accept(core, port, session, &joiner) {
            return result;
        }
    }
    if let Some(result) = ctrlpanel::handle_accept(core, port, session, &joiner) {
        return result;
    }
    warn!(port, "rejecting join on unbound port");
    core.bus.accept_session_reply(session, false)
}

/// Deliver a reply/error to the callback registered for its serial.
fn deliver_reply(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    let Some(handlers) = core.replies.remove(&msg.hdr.reply_serial) else {
        debug!(serial = msg.hdr.reply_serial, "reply with no registered callback");
        return Ok(());
    };
    match msg.hdr.msg_type {
        MsgType::MethodReply => {
            if let Some(callback) = handlers.on_reply {
                let view = Value::obj([
                    ("sender", Value::str(&msg.hdr.sender)),
                    ("session", Value::UInt(msg.hdr.session as u64)),
                ]);
                let mut args = vec![view];
                args.extend(marshal::unmarshal_args(&msg.body));
                invoke_guarded(core, engine, callback, &args);
            }
        }
        MsgType::ErrorReply => {
            if let Some(callback) = handlers.on_error {
                let name = msg.hdr.error.clone().unwrap_or_default();
                let text = msg
                    .body
                    .first()
                    .and_then(|a| a.as_str())
                    .unwrap_or_default()
                    .to_owned();
                invoke_guarded(core, engine, callback, &[Value::Str(name), Value::Str(text)]);
            }
        }
        _ => {}
    }
    for callback in [handlers.on_reply, handlers.on_error].into_iter().flatten() {
        engine.drop_ref(callback);
    }
    Ok(())
}

/// Inbound property access routed by member id.
fn dispatch_prop_access(
    core: &mut Core,
    engine: &mut dyn ScriptEngine,
    msg: &Msg,
) -> CoreResult<()> {
    let member = msg.hdr.member.as_str();
    let view = Value::obj([
        ("sender", Value::str(&msg.hdr.sender)),
        ("iface", Value::str(&msg.hdr.iface)),
        ("member", Value::str(member)),
        ("path", Value::str(&msg.hdr.path)),
        ("session", Value::UInt(msg.hdr.session as u64)),
    ]);
    match member {
        "Get" => {
            let iface = msg.body.first().and_then(|a| a.as_str()).unwrap_or_default().to_owned();
            let prop = msg.body.get(1).and_then(|a| a.as_str()).unwrap_or_default().to_owned();
            let Some((access, sig)) = core.prop_access(&iface, &prop) else {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "unknown property");
            };
            if access == Access::Write {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "property is write-only");
            }
            let Some(callback) = engine.hook(hooks::ON_PROP_GET) else {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "onPropGet not registered");
            };
            let args = [view, Value::Str(iface), Value::Str(prop)];
            match invoke_guarded(core, engine, callback, &args) {
                Some(value) => {
                    let wire = marshal::value_to_wire(&value, &sig)?;
                    let serial = core.bus.next_serial();
                    let reply = Msg::reply_to(&msg.hdr, serial)
                        .arg(WireArg::Variant(sig, Box::new(wire)));
                    core.bus.deliver(reply)
                }
                None => core.error_reply(&msg.hdr, ERROR_SCRIPT, "onPropGet failed"),
            }
        }
        "Set" => {
            let iface = msg.body.first().and_then(|a| a.as_str()).unwrap_or_default().to_owned();
            let prop = msg.body.get(1).and_then(|a| a.as_str()).unwrap_or_default().to_owned();
            let Some((access, _)) = core.prop_access(&iface, &prop) else {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "unknown property");
            };
            if access == Access::Read {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "property is read-only");
            }
            let Some(callback) = engine.hook(hooks::ON_PROP_SET) else {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "onPropSet not registered");
            };
            let value = msg.body.get(2).map(marshal::wire_to_value).unwrap_or_default();
            let args = [view, Value::Str(iface), Value::Str(prop), value];
            match invoke_guarded(core, engine, callback, &args) {
                Some(_) => {
                    let serial = core.bus.next_serial();
                    core.bus.deliver(Msg::reply_to(&msg.hdr, serial))
                }
                None => core.error_reply(&msg.hdr, ERROR_SCRIPT, "onPropSet failed"),
            }
        }
        "GetAll" => {
            let iface = msg.body.first().and_then(|a| a.as_str()).unwrap_or_default().to_owned();
            let Some(callback) = engine.hook(hooks::ON_PROP_GET_ALL) else {
                return core.error_reply(&msg.hdr, ERROR_REJECTED, "onPropGetAll not registered");
            };
            let args = [view, Value::str(&iface)];
            let Some(value) = invoke_guarded(core, engine, callback, &args) else {
                return core.error_reply(&msg.hdr, ERROR_SCRIPT, "onPropGetAll failed");
            };
            let Value::Obj(map) = value else {
                return core.error_reply(&msg.hdr, ERROR_SCRIPT, "expected a property map");
            };
            let mut entries = Vec::with_capacity(map.len());
            for (prop, v) in &map {
                // Use the declared signature where the member is known.
                let sig = core
                    .prop_access(&iface, prop)
                    .map(|(_, sig)| sig)
                    .or_else(|| marshal::infer_signature(v).ok())
                    .ok_or(CoreError::Invalid)?;
                let wire = marshal::value_to_wire(v, &sig)?;
                entries.push(WireArg::DictEntry(
                    Box::new(WireArg::Str(prop.clone())),
                    Box::new(WireArg::Variant(sig, Box::new(wire))),
                ));
            }
            let serial = core.bus.next_serial();
            let reply =
                Msg::reply_to(&msg.hdr, serial).arg(WireArg::Array("{sv}".into(), entries));
            core.bus.deliver(reply)
        }
        _ => Err(CoreError::Invalid),
    }
}

/// Hand an inbound message to the user script.
fn dispatch_script(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    if msg.hdr.msg_type == MsgType::MethodCall && msg.hdr.iface == PROPERTIES_IFACE {
        return dispatch_prop_access(core, engine, msg);
    }
    let hook_name = match msg.hdr.msg_type {
        MsgType::Signal => hooks::ON_SIGNAL,
        MsgType::MethodCall => hooks::ON_METHOD_CALL,
        _ => return Ok(()),
    };
    let Some(callback) = engine.hook(hook_name) else {
        return match msg.hdr.msg_type {
            MsgType::MethodCall => {
                warn!(hook = hook_name, "not registered - rejecting message");
                core.error_reply(&msg.hdr, ERROR_REJECTED, "no handler")
            }
            _ => {
                warn!(hook = hook_name, "not registered - ignoring message");
                Ok(())
            }
        };
    };

    let mut view = indexmap::IndexMap::new();
    view.insert("sender".to_owned(), Value::str(&msg.hdr.sender));
    view.insert("iface".to_owned(), Value::str(&msg.hdr.iface));
    view.insert("member".to_owned(), Value::str(&msg.hdr.member));
    view.insert("path".to_owned(), Value::str(&msg.hdr.path));
    view.insert("session".to_owned(), Value::UInt(msg.hdr.session as u64));
    let mut reply_handle = None;
    if msg.hdr.msg_type == MsgType::MethodCall {
        let out_sig = core
            .defs
            .member(&msg.hdr.iface, &msg.hdr.member)
            .filter(|m| m.kind == Some(MemberKind::Method))
            .map(|m| m.out_signature())
            .unwrap_or_default();
        let handle = core.save_reply_ctx(&msg.hdr, &out_sig);
        view.insert("reply".to_owned(), Value::Ref(handle));
        reply_handle = Some(handle);
    }
    let mut args = vec![Value::Obj(view)];
    args.extend(marshal::unmarshal_args(&msg.body));

    core.watchdog.arm(Duration::from_millis(WATCHDOG_TIMEOUT_MS));
    let outcome = engine.invoke(core, callback, &args);
    core.watchdog.clear();
    match outcome {
        Ok(_) => Ok(()),
        Err(err) => {
            error!(hook = hook_name, error = %err.message(), "script handler failed");
            console::report_script_error(core, &err);
            // Turn the throw into an error reply when one is still owed.
            if let Some(handle) = reply_handle {
                if core.reply_ctx_open(handle) {
                    core.take_reply_ctx(handle);
                    core.error_reply(&msg.hdr, ERROR_SCRIPT, &err.message())?;
                }
            }
            Ok(())
        }
    }
}

/// `About.GetAboutData`: the property store is the About data source.
fn about_get_data(core: &mut Core, msg: &Msg) -> CoreResult<()> {
    let lang = msg.body.first().and_then(|a| a.as_str()).unwrap_or_default();
    let lang = core.translations.language_index(lang);
    let fields = core.propstore.read_all(
        core.nvram.as_ref(),
        &core.translations,
        crate::propstore::ReadFilter::About,
        lang,
    );
    let entries = fields
        .into_iter()
        .map(|(key, value)| {
            let sig = value.signature();
            WireArg::DictEntry(
                Box::new(WireArg::Str(key)),
                Box::new(WireArg::Variant(sig, Box::new(value))),
            )
        })
        .collect();
    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(&msg.hdr, serial).arg(WireArg::Array("{sv}".into(), entries));
    core.bus.deliver(reply)
}

/// Classify and route one inbound message.
fn dispatch(core: &mut Core, engine: &mut dyn ScriptEngine, msg: &Msg) -> CoreResult<()> {
    match classify(&msg.hdr) {
        MsgClass::BusInfra => {
            if msg.hdr.iface == ABOUT_IFACE
                && msg.hdr.member == "GetAboutData"
                && msg.hdr.msg_type == MsgType::MethodCall
            {
                return about_get_data(core, msg);
            }
            core.bus.handle_bus_message(msg)
        }
        MsgClass::AcceptSession => accept_session(core, engine, msg),
        MsgClass::SessionLost => {
            // The console owns its own session; everything else belongs to
            // the peer manager.
            match console::handle_msg(core, engine, msg) {
                Err(CoreError::NoMatch) => {
                    if core.handle_session_lost(msg).is_some() {
                        if let Some(callback) = engine.hook(hooks::ON_PEER_DISCONNECTED) {
                            invoke_guarded(core, engine, callback, &[]);
                        }
                    }
                    Ok(())
                }
                other => other,
            }
        }
        MsgClass::FoundAdvertisedName => core.handle_found_name(msg),
        MsgClass::AboutAnnouncement => {
            let calls = core.handle_announcement(msg)?;
            run_calls(core, engine, calls);
            Ok(())
        }
        MsgClass::Reply => {
            if core.sessions.join_reply_peer(msg.hdr.reply_serial).is_some() {
                let calls = core.handle_join_reply(msg);
                run_calls(core, engine, calls);
                Ok(())
            } else {
                deliver_reply(core, engine, msg)
            }
        }
        MsgClass::App => {
            if core.lockdown() {
                // Once locked, console and debug traffic is refused at the
                // dispatcher.
                if msg.hdr.iface == console::CONSOLE_IFACE
                    || msg.hdr.iface == console::DEBUGGER_IFACE
                {
                    if msg.hdr.msg_type == MsgType::MethodCall {
                        return core.error_reply(&msg.hdr, ERROR_REJECTED, "console locked");
                    }
                    return Ok(());
                }
            } else {
                match console::handle_msg(core, engine, msg) {
                    Err(CoreError::NoMatch) => {}
                    other => return other,
                }
            }
            match ctrlpanel::handle_msg(core, msg) {
                Err(CoreError::NoMatch) => {}
                Ok(calls) => {
                    run_calls(core, engine, calls);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            dispatch_script(core, engine, msg)
        }
    }
}

/// Execute a deferred operation requested by a script handler. Returns
/// the loop-terminating status, if any.
fn do_deferred(core: &mut Core) -> Option<CoreError> {
    match std::mem::take(&mut core.deferred) {
        DeferredOp::None => None,
        DeferredOp::FactoryReset => {
            info!("factory reset");
            core.propstore.reset_all(core.nvram.as_mut());
            Some(CoreError::Restart)
        }
        DeferredOp::Offboard => {
            info!("offboard");
            Some(CoreError::Restart)
        }
    }
}

/// Run the loop until a fatal status. The returned error is one of
/// `RestartApp`, `Restart`, `Read` or `Write`.
pub fn run(core: &mut Core, engine: &mut dyn ScriptEngine) -> CoreError {
    core.deferred = DeferredOp::None;
    let link_timeout = core.link_timeout_ms;
    if let Err(e) = core.bus.set_link_timeout(link_timeout) {
        warn!(error = %e, "failed to set link timeout");
    }
    core.announce_pending = true;
    core.running = true;

    let mut clock = Instant::now();
    let mut timeout: u32 = crate::timer::FOREVER;

    let status = loop {
        // 1. Timers; the nearest deadline becomes the wait budget.
        let elapsed = clock.elapsed().as_millis().min(u32::MAX as u128) as u32;
        clock = Instant::now();
        run_timers(core, engine, elapsed, &mut timeout);

        // 2. External triggers.
        service_io(core, engine);

        // 3. Pending session work (deferred auth callbacks).
        let calls = core.service_sessions();
        run_calls(core, engine, calls);

        // 4. Announce, unless locked down.
        if !core.lockdown() {
            if let Err(e) = core.announce_if_needed() {
                warn!(error = %e, "announce failed");
            }
        }

        // 5. Block for the next message.
        core.tables.set_object_path(Some("!"));
        let msg = match core.bus.unmarshal_msg(Duration::from_millis(timeout as u64)) {
            Ok(msg) => msg,
            Err(CoreError::Timeout) => continue,
            Err(CoreError::NoMatch) => continue,
            Err(e) => break e,
        };

        process_policy_notifications(core, engine);

        // 6. Dispatch, 7. close (drop), 8. error policy.
        let status = dispatch(core, engine, &msg);
        match status {
            Ok(()) => {}
            Err(e) if e.is_fatal() => break e,
            Err(e) => warn!(error = %e, "dispatch error - continuing"),
        }
        core.bus.notify_link_active();

        // A detach requested from inside the debug read path is finished
        // here, where the engine half is available.
        if core.console.detach_requested {
            let _ = console::debugger::stop(core, engine, None);
        }

        // 9. Deferred operations.
        if let Some(status) = do_deferred(core) {
            break status;
        }
    };
    core.running = false;
    core.watchdog.clear();
    status
}

#[cfg(test)]
#[path = "msgloop_tests.rs"]
mod tests;
