// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end runtime tests.
//!
//! Boots a full runtime (loopback transport, in-memory NVRAM, fake
//! engine) on its own thread and exercises it from remote peers: a
//! console controller, announced devices, and application-session
//! joiners.

use std::thread::JoinHandle;
use std::time::Duration;

use hutch::bus::loopback::LoopbackNet;
use hutch::bus::{
    classify, Msg, MsgClass, MsgType, SessionId, Transport, WireArg, CONSOLE_PORT,
    JOIN_REPLY_SUCCESS,
};
use hutch::console::{CONSOLE_IFACE, CONSOLE_PATH, DEBUGGER_IFACE};
use hutch::error::CoreError;
use hutch::nvram::MemNvram;
use hutch::runtime::Runtime;
use hutch::storage;
use hutch::test_support::{FakeEngine, Peer};

pub const WAIT: Duration = Duration::from_secs(2);

/// A runtime running on its own thread, plus handles to observe it.
pub struct World {
    pub net: LoopbackNet,
    pub engine: FakeEngine,
    /// Unique bus name of the device under test.
    pub device: String,
    handle: Option<JoinHandle<CoreError>>,
}

impl World {
    /// Boot a runtime whose "installed script" is the given setup closure
    /// (it runs at engine install time and registers definitions/hooks).
    pub fn start<F>(setup: F) -> anyhow::Result<Self>
    where
        F: Fn(&FakeEngine, &mut hutch::core::Core) + Send + Sync + 'static,
    {
        let net = LoopbackNet::new();
        let engine = FakeEngine::new();
        engine.on_install(move |eng, core, _| {
            setup(eng, core);
            Ok(hutch::value::Value::Undefined)
        });

        let bus = net.endpoint();
        let device = bus.unique_name();
        let triggers = bus.triggers();
        let mut nvram = MemNvram::default();
        storage::install(&mut nvram, "app.js", b"// host-scripted program")
            .map_err(|e| anyhow::anyhow!("install: {e}"))?;

        let mut runtime = Runtime::new(
            Box::new(bus),
            Box::new(nvram),
            Box::new(engine.clone()),
            triggers,
            Some("spec-device".to_owned()),
        );
        let handle = std::thread::spawn(move || runtime.run());
        Ok(Self { net, engine, device, handle: Some(handle) })
    }

    /// Ask the runtime to reboot through the console and join its thread.
    pub fn shutdown(mut self) -> anyhow::Result<CoreError> {
        let mut console = Console::connect(&self.net, &self.device)?;
        console.call(CONSOLE_IFACE, "reboot", Vec::new(), None)?;
        let handle = self.handle.take().ok_or_else(|| anyhow::anyhow!("already joined"))?;
        handle.join().map_err(|_| anyhow::anyhow!("runtime thread panicked"))
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // A still-running runtime thread dies with the test process.
        let _ = self.handle.take();
    }
}

/// A console controller attached to the device's console port.
pub struct Console {
    pub peer: Peer,
    pub device: String,
    pub session: SessionId,
    serial: u32,
}

impl Console {
    pub fn connect(net: &LoopbackNet, device: &str) -> anyhow::Result<Self> {
        let mut peer = Peer::new(net);
        // The runtime may still be binding its ports; retry briefly so a
        // fresh world is joinable, but report a genuine rejection fast.
        let deadline = std::time::Instant::now() + WAIT;
        loop {
            let serial = peer.bus.join_session(device, CONSOLE_PORT)?;
            let reply = peer
                .expect(|m| classify(&m.hdr) == MsgClass::Reply && m.hdr.reply_serial == serial)?;
            let status = reply.body[0].as_u32().unwrap_or(0);
            if status == JOIN_REPLY_SUCCESS {
                let session = reply.body[1].as_u32().unwrap_or(0);
                return Ok(Self { peer, device: device.to_owned(), session, serial: 100 });
            }
            if std::time::Instant::now() > deadline {
                anyhow::bail!("console join rejected: {status}");
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    /// Issue a console/debugger method call and wait for its reply.
    pub fn call(
        &mut self,
        iface: &str,
        member: &str,
        args: Vec<WireArg>,
        raw: Option<bytes::Bytes>,
    ) -> anyhow::Result<Msg> {
        self.serial += 1;
        let serial = self.serial;
        let mut msg =
            Msg::method_call(serial, &self.device, CONSOLE_PATH, iface, member, self.session)
                .args(args);
        if let Some(raw) = raw {
            msg = msg.with_raw(raw);
        }
        self.peer.bus.deliver(msg)?;
        Ok(self.peer.expect(|m| {
            matches!(m.hdr.msg_type, MsgType::MethodReply | MsgType::ErrorReply)
                && m.hdr.reply_serial == serial
        })?)
    }

    /// Length-prefix a streamed payload the way install/eval expect it.
    pub fn streamed(payload: &[u8]) -> bytes::Bytes {
        let mut raw = Vec::with_capacity(4 + payload.len());
        raw.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        raw.extend_from_slice(payload);
        bytes::Bytes::from(raw)
    }

    /// Evaluate an expression, returning `(status, text)` from the
    /// `evalResult` signal.
    pub fn eval(&mut self, expr: &str) -> anyhow::Result<(u8, String)> {
        let reply =
            self.call(CONSOLE_IFACE, "eval", Vec::new(), Some(Self::streamed(expr.as_bytes())))?;
        anyhow::ensure!(reply.hdr.msg_type == MsgType::MethodReply, "eval rejected");
        let result = self.peer.expect(|m| m.hdr.member == "evalResult")?;
        let status = result.body[0].as_u8().unwrap_or(0xFF);
        let text = result.body[1].as_str().unwrap_or_default().to_owned();
        Ok((status, text))
    }

    /// Shorthand for debugger members.
    pub fn dbg(&mut self, member: &str, args: Vec<WireArg>) -> anyhow::Result<Msg> {
        self.call(DEBUGGER_IFACE, member, args, None)
    }

    pub fn expect_signal(&mut self, member: &'static str) -> anyhow::Result<Msg> {
        Ok(self.peer.expect(|m| m.hdr.member == member)?)
    }
}
