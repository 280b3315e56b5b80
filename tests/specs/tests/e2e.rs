// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driving a whole runtime over the loopback bus:
//! console attach/eval/install, announcements and service objects, the
//! script-to-wire bridge in both directions, timers, and the debugger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hutch::bus::{
    classify, AnnouncedObject, Msg, MsgClass, MsgType, Transport, WireArg, APP_PORT,
    PROPERTIES_IFACE,
};
use hutch::console::{ScriptStatus, CONSOLE_IFACE};
use hutch::engine::hooks;
use hutch::error::CoreError;
use hutch::tables::{Access, InterfaceDef, MemberDef, ObjectDef};
use hutch::test_support::Peer;
use hutch::value::Value;
use hutch_specs::{Console, World};

const LIGHT_IFACE: &str = "org.example.Light";

/// Register the light interface and object on the device under test.
fn define_light(core: &mut hutch::core::Core) {
    let mut iface = InterfaceDef::default();
    iface
        .members
        .insert("flash".to_owned(), MemberDef::method().arg("msec", "u").ret("ok", "b"));
    iface.members.insert("stateChanged".to_owned(), MemberDef::signal().arg("on", "b"));
    iface
        .members
        .insert("brightness".to_owned(), MemberDef::property("u", Access::ReadWrite));
    core.define_interface(LIGHT_IFACE, iface);
    core.define_object(
        "/light",
        ObjectDef { interfaces: vec![LIGHT_IFACE.to_owned()], description: None },
    );
}

#[test]
fn console_serves_engine_properties() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let mut console = Console::connect(&world.net, &world.device)?;
    let reply = console.call(
        PROPERTIES_IFACE,
        "Get",
        vec![
            WireArg::Str(CONSOLE_IFACE.to_owned()),
            WireArg::Str("maxEvalLen".to_owned()),
        ],
        None,
    )?;
    match &reply.body[0] {
        WireArg::Variant(_, inner) => assert_eq!(inner.as_u32(), Some(1024)),
        other => panic!("expected variant, got {other:?}"),
    }
    Ok(())
}

#[test]
fn eval_returns_result_signal() -> anyhow::Result<()> {
    // Scenario: eval "1 + 1" while running returns evalResult(0, "2").
    let world = World::start(|_, _| {})?;
    let mut console = Console::connect(&world.net, &world.device)?;
    let (status, text) = console.eval("1 + 1")?;
    assert_eq!(status, ScriptStatus::Ok.code());
    assert_eq!(text, "2");

    let (status, _) = console.eval("this is not a sum")?;
    assert_eq!(status, ScriptStatus::EvalError.code());
    Ok(())
}

#[test]
fn oversized_eval_is_a_resource_error() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let mut console = Console::connect(&world.net, &world.device)?;
    let long = "1 + ".repeat(600) + "1";
    let (status, _) = console.eval(&long)?;
    assert_eq!(status, ScriptStatus::ResourceError.code());
    Ok(())
}

#[test]
fn second_console_is_rejected() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let _first = Console::connect(&world.net, &world.device)?;
    assert!(Console::connect(&world.net, &world.device).is_err());
    Ok(())
}

#[test]
fn install_restarts_with_new_script() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let mut console = Console::connect(&world.net, &world.device)?;

    let reply = console.call(
        CONSOLE_IFACE,
        "install",
        vec![WireArg::Str("new.js".to_owned())],
        Some(Console::streamed(b"print('v2');")),
    )?;
    assert_eq!(reply.body[0].as_u8(), Some(ScriptStatus::Ok.code()));

    // The engine restarted and re-ran install with the new script.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let events = world.engine.events();
        if events.iter().any(|e| e.starts_with("install:new.js")) {
            assert!(events.iter().any(|e| e == "reset"));
            break;
        }
        assert!(std::time::Instant::now() < deadline, "engine never restarted: {events:?}");
        std::thread::sleep(Duration::from_millis(20));
    }

    // The console survived the restart.
    let (status, text) = console.eval("20 + 22")?;
    assert_eq!(status, ScriptStatus::Ok.code());
    assert_eq!(text, "42");
    Ok(())
}

#[test]
fn inbound_method_call_reaches_script_and_replies() -> anyhow::Result<()> {
    let world = World::start(|engine, core| {
        define_light(core);
        engine.set_hook(hooks::ON_METHOD_CALL, |_, core, args| {
            let view = &args[0];
            assert_eq!(view.get("member").and_then(Value::as_str), Some("flash"));
            let reply = view.get("reply").and_then(Value::as_ref_handle).ok_or_else(|| {
                hutch::engine::ScriptError::Internal("no reply handle".to_owned())
            })?;
            core.msg_reply(reply, &[Value::Bool(true)])
                .map_err(|e| hutch::engine::ScriptError::Internal(e.to_string()))?;
            Ok(Value::Undefined)
        });
    })?;

    let mut peer = Peer::new(&world.net);
    let serial = peer.bus.join_session(&world.device, APP_PORT)?;
    let joined = peer.expect(|m| m.hdr.reply_serial == serial)?;
    let session = joined.body[1].as_u32().unwrap_or(0);

    let call = Msg::method_call(901, &world.device, "/light", LIGHT_IFACE, "flash", session)
        .arg(WireArg::Uint32(250));
    peer.bus.deliver(call)?;
    let reply = peer.expect(|m| m.hdr.reply_serial == 901)?;
    assert_eq!(reply.hdr.msg_type, MsgType::MethodReply);
    assert_eq!(reply.body, vec![WireArg::Bool(true)]);
    Ok(())
}

#[test]
fn script_throw_becomes_error_reply() -> anyhow::Result<()> {
    let world = World::start(|engine, core| {
        define_light(core);
        engine.set_hook(hooks::ON_METHOD_CALL, |_, _, _| {
            Err(hutch::engine::ScriptError::Eval("flash exploded".to_owned()))
        });
    })?;
    let mut peer = Peer::new(&world.net);
    let serial = peer.bus.join_session(&world.device, APP_PORT)?;
    let joined = peer.expect(|m| m.hdr.reply_serial == serial)?;
    let session = joined.body[1].as_u32().unwrap_or(0);

    let call = Msg::method_call(902, &world.device, "/light", LIGHT_IFACE, "flash", session)
        .arg(WireArg::Uint32(1));
    peer.bus.deliver(call)?;
    let reply = peer.expect(|m| m.hdr.reply_serial == 902)?;
    assert_eq!(reply.hdr.msg_type, MsgType::ErrorReply);
    assert_eq!(reply.body[0].as_str(), Some("flash exploded"));
    Ok(())
}

#[test]
fn announcement_yields_service_object_and_outbound_call() -> anyhow::Result<()> {
    // The device under test consumes an announcement, joins the announcer
    // and calls a method on the resulting service object.
    let world = World::start(|engine, core| {
        define_light(core);
        let on_reply = engine.register(|_, core, args| {
            // args: (view, ok)
            let ok = args[1].as_bool().unwrap_or(false);
            core.send_notification(0, if ok { "flash ok" } else { "flash failed" })
                .map_err(|e| hutch::engine::ScriptError::Internal(e.to_string()))?;
            Ok(Value::Undefined)
        });
        let service_cb = engine.register(move |_, core, args| {
            let svc = args[0].get("id").and_then(Value::as_ref_handle).ok_or_else(|| {
                hutch::engine::ScriptError::Internal("no service handle".to_owned())
            })?;
            let serial = core
                .svc_method_call(svc, "flash", None, &[Value::Int(100)])
                .map_err(|e| hutch::engine::ScriptError::Internal(e.to_string()))?;
            let peer = args[0].get("dest").and_then(Value::as_str).unwrap_or_default().to_owned();
            core.on_reply(serial, &peer, Some(on_reply), None);
            Ok(Value::Undefined)
        });
        core.sessions.on_service(LIGHT_IFACE, service_cb);
    })?;

    let mut remote = Peer::new(&world.net);
    remote.bus.bind_session_port(APP_PORT)?;
    remote.bus.about_announce(
        APP_PORT,
        Vec::new(),
        vec![AnnouncedObject {
            path: "/remote/light".to_owned(),
            interfaces: vec![LIGHT_IFACE.to_owned()],
        }],
    )?;

    // The runtime joins us; accept.
    let accept = remote.expect(|m| m.hdr.member == "AcceptSession")?;
    let session = accept.body[1].as_u32().unwrap_or(0);
    remote.bus.accept_session_reply(session, true)?;

    // The service callback calls flash on our object.
    let call = remote.expect(|m| m.hdr.member == "flash")?;
    assert_eq!(call.hdr.path, "/remote/light");
    assert_eq!(call.body, vec![WireArg::Uint32(100)]);
    let ok = Msg::reply_to(&call.hdr, 1).arg(WireArg::Bool(true));
    remote.bus.deliver(ok)?;

    // The script's reply handler observed success and notified.
    let notification = remote.expect(|m| m.hdr.member == "notify")?;
    let WireArg::Array(_, entries) = &notification.body[1] else {
        panic!("expected text map");
    };
    let WireArg::DictEntry(_, text) = &entries[0] else { panic!("expected entry") };
    assert_eq!(text.as_str(), Some("flash ok"));
    Ok(())
}

#[test]
fn interval_fires_twice_before_clear() -> anyhow::Result<()> {
    // Scenario: setInterval(cb, 50) followed 130 ms later by
    // clearInterval(id) results in exactly two invocations.
    let count = Arc::new(Mutex::new(0u32));
    let observed = Arc::clone(&count);
    let world = World::start(move |engine, core| {
        let count = Arc::clone(&observed);
        let tick = engine.register(move |_, _, _| {
            *count.lock().unwrap() += 1;
            Ok(Value::Undefined)
        });
        let id = Arc::new(Mutex::new(None));
        let id_slot = Arc::clone(&id);
        *id_slot.lock().unwrap() = core.set_interval(tick, 50).ok();
        let stopper = engine.register(move |_, core, _| {
            if let Some(id) = *id.lock().unwrap() {
                let _ = core.clear_timer(id, true);
            }
            Ok(Value::Undefined)
        });
        let _ = core.set_timeout(stopper, 130);
    })?;

    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(*count.lock().unwrap(), 2);
    drop(world);
    Ok(())
}

#[test]
fn debugger_breakpoint_resume_notifies_at_line() -> anyhow::Result<()> {
    // Scenario: addBreak("app.js", 42) while paused, then resume; the
    // target stops at line 42 and notifies.
    let world = World::start(|_, _| {})?;
    let mut console = Console::connect(&world.net, &world.device)?;

    let reply = console.dbg("begin", vec![WireArg::Byte(0)])?;
    assert_eq!(reply.body[0].as_u8(), Some(ScriptStatus::DebugStarted.code()));
    console.expect_signal("version")?;

    let reply = console.dbg("pause", Vec::new())?;
    assert_eq!(reply.body[0].as_u8(), Some(1));
    let note = console.expect_signal("notification")?;
    assert_eq!(note.body[1].as_u8(), Some(1));

    console.dbg(
        "addBreak",
        vec![WireArg::Str("app.js".to_owned()), WireArg::Uint16(42)],
    )?;
    console.dbg("resume", Vec::new())?;
    let note = console.expect_signal("notification")?;
    assert_eq!(note.body[1].as_u8(), Some(1)); // paused again
    assert_eq!(note.body[2].as_str(), Some("app.js"));
    assert_eq!(note.body[4].as_u16(), Some(42));

    let reply = console.dbg("end", Vec::new())?;
    assert_eq!(reply.body[0].as_u8(), Some(ScriptStatus::DebugStopped.code()));
    Ok(())
}

#[test]
fn lockdown_survives_restart_and_blocks_console() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let mut console = Console::connect(&world.net, &world.device)?;
    let reply = console.call(CONSOLE_IFACE, "lockdown", Vec::new(), None)?;
    assert_eq!(reply.body[0].as_u8(), Some(1));

    // After the restart the console service is gone: joins are refused.
    std::thread::sleep(Duration::from_millis(100));
    assert!(Console::connect(&world.net, &world.device).is_err());
    Ok(())
}

#[test]
fn about_data_query_reads_the_property_store() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let mut peer = Peer::new(&world.net);
    let call = Msg::method_call(
        950,
        &world.device,
        "/About",
        hutch::bus::ABOUT_IFACE,
        "GetAboutData",
        0,
    )
    .arg(WireArg::Str("en".to_owned()));
    peer.bus.deliver(call)?;
    let reply = peer.expect(|m| m.hdr.reply_serial == 950)?;
    let WireArg::Array(_, entries) = &reply.body[0] else { panic!("expected a{{sv}}") };
    let keys: Vec<&str> = entries
        .iter()
        .filter_map(|e| match e {
            WireArg::DictEntry(k, _) => k.as_str(),
            _ => None,
        })
        .collect();
    assert!(keys.contains(&"AppName"));
    assert!(keys.contains(&"SupportedLanguages"));
    assert!(!keys.contains(&"Passcode"));
    Ok(())
}

#[test]
fn reboot_exits_the_runtime() -> anyhow::Result<()> {
    let world = World::start(|_, _| {})?;
    let status = world.shutdown()?;
    assert_eq!(status, CoreError::Restart);
    Ok(())
}

#[test]
fn about_announcement_covers_script_objects() -> anyhow::Result<()> {
    let world = World::start(|_, core| {
        define_light(core);
    })?;
    // Join as an observer, then force a fresh announcement via reset.
    let mut observer = Peer::new(&world.net);
    let mut console = Console::connect(&world.net, &world.device)?;
    console.call(CONSOLE_IFACE, "reset", Vec::new(), None)?;

    let announce = observer.expect(|m| classify(&m.hdr) == MsgClass::AboutAnnouncement)?;
    let WireArg::Array(_, objects) = &announce.body[2] else { panic!("objects") };
    let paths: Vec<_> = objects
        .iter()
        .filter_map(|o| match o {
            WireArg::Struct(fields) => fields.first().and_then(|f| f.as_str()),
            _ => None,
        })
        .collect();
    assert!(paths.contains(&"/light"), "announced paths: {paths:?}");

    let dict = &announce.body[3];
    let WireArg::Array(_, props) = dict else { panic!("props") };
    let device_name = props.iter().find_map(|p| match p {
        WireArg::DictEntry(k, v) if k.as_str() == Some("DeviceName") => match v.as_ref() {
            WireArg::Variant(_, inner) => inner.as_str(),
            other => other.as_str(),
        },
        _ => None,
    });
    assert_eq!(device_name, Some("spec-device"));
    Ok(())
}
