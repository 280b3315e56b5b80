// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::loopback::LoopbackNet;
use crate::bus::BUS_IFACE;
use crate::tables::{InterfaceDef, MemberDef, ObjectDef};
use crate::test_support::{test_core, FakeEngine, Peer};

fn light_core(net: &LoopbackNet) -> Core {
    let mut core = test_core(net);
    let mut iface = InterfaceDef::default();
    iface
        .members
        .insert("flash".to_owned(), MemberDef::method().arg("msec", "u").ret("ok", "b"));
    iface
        .members
        .insert("brightness".to_owned(), MemberDef::property("u", Access::ReadWrite));
    iface
        .members
        .insert("model".to_owned(), MemberDef::property("s", Access::Read));
    core.define_interface("org.example.Light", iface);
    core.define_object(
        "/light",
        ObjectDef { interfaces: vec!["org.example.Light".to_owned()], description: None },
    );
    core
}

fn accept_session_msg(peer: &Peer, port: u16, session: u32) -> Msg {
    let mut msg = Msg::method_call(0, "", "/", BUS_IFACE, "AcceptSession", 0)
        .arg(WireArg::Uint16(port))
        .arg(WireArg::Uint32(session))
        .arg(WireArg::Str(peer.name()));
    msg.hdr.sender = ":0.1".to_owned();
    msg
}

fn method_call(core: &Core, peer: &Peer, member: &str, args: Vec<WireArg>) -> Msg {
    let mut msg = Msg::method_call(
        300,
        &core.bus.unique_name(),
        "/light",
        "org.example.Light",
        member,
        7,
    )
    .args(args);
    msg.hdr.sender = peer.name();
    msg
}

#[test]
fn app_port_session_auto_accepts_without_hook() {
    let net = LoopbackNet::new();
    let peer = Peer::new(&net);
    let mut core = light_core(&net);
    let mut engine = FakeEngine::new();
    let inbound = accept_session_msg(&peer, APP_PORT, 500);
    // The loopback router rejects the accept-reply (it never saw a join),
    // but the peer-record bookkeeping is what matters here.
    let _ = dispatch(&mut core, &mut engine, &inbound);
    assert!(core.sessions.contains(&peer.name()));
    assert_eq!(core.sessions.refcount(&peer.name()), 1);
    assert_eq!(core.sessions.session_id(&peer.name()), 500);
}

#[test]
fn peer_connected_hook_can_reject() {
    let net = LoopbackNet::new();
    let peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    engine.set_hook(crate::engine::hooks::ON_PEER_CONNECTED, |_, _, args| {
        // The hook receives the joining peer as a service object.
        assert!(args[0].get("dest").is_some());
        Ok(Value::Bool(false))
    });
    let mut boxed = engine.clone();
    let inbound = accept_session_msg(&peer, APP_PORT, 500);
    let _ = dispatch(&mut core, &mut boxed, &inbound);
    assert!(!core.sessions.contains(&peer.name()));
    assert_eq!(core.live_service_objects(&peer.name()), 0);
}

#[test]
fn reply_callback_fires_once_and_entry_is_removed() {
    let net = LoopbackNet::new();
    let peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    let (cb, record) = engine.recorder();
    core.on_reply(42, &peer.name(), Some(cb), None);

    let call = Msg::method_call(42, &peer.name(), "/light", "org.example.Light", "flash", 7);
    let mut reply = Msg::reply_to(&call.hdr, 1).arg(WireArg::Bool(true));
    reply.hdr.sender = peer.name();
    reply.hdr.dest = core.bus.unique_name();

    let mut boxed = engine.clone();
    dispatch(&mut core, &mut boxed, &reply).unwrap();
    assert_eq!(record.lock().unwrap().len(), 1);
    assert_eq!(record.lock().unwrap()[0][1], Value::Bool(true));
    assert!(core.replies.is_empty());
    // A duplicate reply with the same serial goes nowhere.
    dispatch(&mut core, &mut boxed, &reply).unwrap();
    assert_eq!(record.lock().unwrap().len(), 1);
}

#[test]
fn error_reply_routes_to_error_callback() {
    let net = LoopbackNet::new();
    let peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    let (cb, record) = engine.recorder();
    core.on_reply(43, &peer.name(), None, Some(cb));

    let call = Msg::method_call(43, &peer.name(), "/light", "org.example.Light", "flash", 7);
    let mut reply = Msg::error_to(&call.hdr, 1, "org.alljoyn.Bus.Timeout")
        .arg(WireArg::Str("timed out".to_owned()));
    reply.hdr.sender = peer.name();

    let mut boxed = engine.clone();
    dispatch(&mut core, &mut boxed, &reply).unwrap();
    let calls = record.lock().unwrap();
    assert_eq!(calls[0][0], Value::str("org.alljoyn.Bus.Timeout"));
    assert_eq!(calls[0][1], Value::str("timed out"));
}

#[test]
fn unhandled_method_call_is_rejected() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    let mut engine = FakeEngine::new();
    let msg = method_call(&core, &peer, "flash", vec![WireArg::Uint32(5)]);
    dispatch(&mut core, &mut engine, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::ErrorReply).unwrap();
    assert_eq!(reply.hdr.error.as_deref(), Some(ERROR_REJECTED));
}

#[test]
fn method_call_reaches_hook_with_view_and_args() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    engine.set_hook(hooks::ON_METHOD_CALL, |_, core, args| {
        let view = &args[0];
        assert_eq!(view.get("member").and_then(Value::as_str), Some("flash"));
        assert_eq!(args[1], Value::UInt(5));
        let handle = view.get("reply").and_then(Value::as_ref_handle).unwrap();
        core.msg_reply(handle, &[Value::Bool(true)]).unwrap();
        Ok(Value::Undefined)
    });
    let mut boxed = engine.clone();
    let msg = method_call(&core, &peer, "flash", vec![WireArg::Uint32(5)]);
    dispatch(&mut core, &mut boxed, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::MethodReply).unwrap();
    assert_eq!(reply.body, vec![WireArg::Bool(true)]);
}

#[test]
fn prop_get_uses_declared_signature() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    engine.set_hook(hooks::ON_PROP_GET, |_, _, args| {
        assert_eq!(args[1], Value::str("org.example.Light"));
        assert_eq!(args[2], Value::str("brightness"));
        Ok(Value::Int(200))
    });
    let mut boxed = engine.clone();
    let mut msg = Msg::method_call(301, &core.bus.unique_name(), "/light", PROPERTIES_IFACE, "Get", 7)
        .arg(WireArg::Str("org.example.Light".into()))
        .arg(WireArg::Str("brightness".into()));
    msg.hdr.sender = peer.name();
    dispatch(&mut core, &mut boxed, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::MethodReply).unwrap();
    assert_eq!(
        reply.body[0],
        WireArg::Variant("u".into(), Box::new(WireArg::Uint32(200)))
    );
}

#[test]
fn prop_set_on_read_only_member_is_refused() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    let (cb, record) = engine.recorder();
    engine.bind_hook(hooks::ON_PROP_SET, cb);
    let mut boxed = engine.clone();
    let mut msg = Msg::method_call(302, &core.bus.unique_name(), "/light", PROPERTIES_IFACE, "Set", 7)
        .arg(WireArg::Str("org.example.Light".into()))
        .arg(WireArg::Str("model".into()))
        .arg(WireArg::Variant("s".into(), Box::new(WireArg::Str("X".into()))));
    msg.hdr.sender = peer.name();
    dispatch(&mut core, &mut boxed, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::ErrorReply).unwrap();
    assert_eq!(reply.hdr.error.as_deref(), Some(ERROR_REJECTED));
    assert!(record.lock().unwrap().is_empty());
}

#[test]
fn prop_get_all_marshals_a_property_map() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    engine.set_hook(hooks::ON_PROP_GET_ALL, |_, _, _| {
        Ok(Value::obj([
            ("brightness", Value::Int(128)),
            ("model", Value::str("hutch-1")),
        ]))
    });
    let mut boxed = engine.clone();
    let mut msg =
        Msg::method_call(303, &core.bus.unique_name(), "/light", PROPERTIES_IFACE, "GetAll", 7)
            .arg(WireArg::Str("org.example.Light".into()));
    msg.hdr.sender = peer.name();
    dispatch(&mut core, &mut boxed, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::MethodReply).unwrap();
    let WireArg::Array(sig, entries) = &reply.body[0] else { panic!("array") };
    assert_eq!(sig, "{sv}");
    assert_eq!(entries.len(), 2);
}

#[test]
fn script_throw_yields_error_reply_and_console_report() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    engine.set_hook(hooks::ON_METHOD_CALL, |_, _, _| {
        Err(crate::engine::ScriptError::Eval("boom".to_owned()))
    });
    let mut boxed = engine.clone();
    let msg = method_call(&core, &peer, "flash", vec![WireArg::Uint32(1)]);
    dispatch(&mut core, &mut boxed, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::ErrorReply).unwrap();
    assert_eq!(reply.hdr.error.as_deref(), Some(ERROR_SCRIPT));
    assert_eq!(reply.body[0].as_str(), Some("boom"));
}

#[test]
fn signals_without_handler_are_ignored() {
    let net = LoopbackNet::new();
    let peer = Peer::new(&net);
    let mut core = light_core(&net);
    let mut engine = FakeEngine::new();
    let mut msg = Msg::signal(0, &core.bus.unique_name(), "/light", "org.example.Light", "x", 7);
    msg.hdr.sender = peer.name();
    assert!(dispatch(&mut core, &mut engine, &msg).is_ok());
}

#[test]
fn policy_notifications_drain_one_per_message() {
    let net = LoopbackNet::new();
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    let (cb, record) = engine.recorder();
    engine.bind_hook(hooks::ON_POLICY_CHANGED, cb);
    core.queue_policy_changed();
    core.queue_policy_changed();
    let mut boxed = engine.clone();
    process_policy_notifications(&mut core, &mut boxed);
    assert_eq!(record.lock().unwrap().len(), 1);
    process_policy_notifications(&mut core, &mut boxed);
    assert_eq!(record.lock().unwrap().len(), 2);
    process_policy_notifications(&mut core, &mut boxed);
    assert_eq!(record.lock().unwrap().len(), 2);
}

#[test]
fn about_data_request_is_served_from_the_store() {
    let net = LoopbackNet::new();
    let mut peer = Peer::new(&net);
    let mut core = light_core(&net);
    core.propstore.init(core.nvram.as_mut(), None, false);
    let mut engine = FakeEngine::new();
    let mut msg = Msg::method_call(
        304,
        &core.bus.unique_name(),
        "/About",
        crate::bus::ABOUT_IFACE,
        "GetAboutData",
        0,
    )
    .arg(WireArg::Str("en".into()));
    msg.hdr.sender = peer.name();
    dispatch(&mut core, &mut engine, &msg).unwrap();
    let reply = peer.expect(|m| m.hdr.msg_type == MsgType::MethodReply).unwrap();
    let WireArg::Array(_, entries) = &reply.body[0] else { panic!("array") };
    assert!(!entries.is_empty());
}

#[test]
fn gpio_trigger_reaches_its_handler() {
    let net = LoopbackNet::new();
    let mut core = light_core(&net);
    let engine = FakeEngine::new();
    let (cb, record) = engine.recorder();
    core.io.pin_open(3, crate::io::PIN_INPUT).unwrap();
    core.io_on_trigger(3, crate::io::TriggerMode::OnRise, 0, cb).unwrap();
    // The "driver" queues the trigger; the loop's I/O step picks it up.
    core.io.simulated().unwrap().drive_input(3, 1).unwrap();
    let mut boxed = engine.clone();
    service_io(&mut core, &mut boxed);
    let calls = record.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], Value::UInt(3));
}
