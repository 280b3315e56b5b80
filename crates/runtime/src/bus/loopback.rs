// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bus: a router connecting any number of endpoints over
//! `std::sync::mpsc` channels.
//!
//! This is the transport used by the host simulator and the integration tests.
//! Delivery between two endpoints is FIFO; sessions, advertisement and
//! About announcements follow the same shapes a routing node would
//! produce, which is all the core ever observes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    AnnouncedObject, AuthOutcome, Msg, MsgType, SessionId, Serial, Transport, WireArg,
    ABOUT_IFACE, BUS_IFACE, JOIN_REPLY_REJECTED, JOIN_REPLY_SUCCESS,
};
use crate::error::{CoreError, CoreResult};

/// Bus name of the in-process routing node.
const ROUTER_NAME: &str = ":0.1";
/// Sentinel interface used to wake a blocked `unmarshal_msg`.
const WAKE_IFACE: &str = "hutch.internal.Wake";

/// Lock-free word external triggers (IRQ shims, driver threads) set before
/// calling the waker; the loop drains it on its next tick.
#[derive(Debug, Default)]
pub struct TriggerSet {
    bits: AtomicU32,
}

impl TriggerSet {
    pub fn set(&self, bit: u32) {
        self.bits.fetch_or(1 << bit, Ordering::AcqRel);
    }

    pub fn clear(&self, bit: u32) {
        self.bits.fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    /// Atomically fetch and clear every pending bit.
    pub fn take_all(&self) -> u32 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    pub fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }
}

#[derive(Debug)]
struct PendingJoin {
    joiner: String,
    serial: Serial,
}

#[derive(Debug, Default)]
struct Router {
    next_endpoint: u32,
    next_session: SessionId,
    endpoints: HashMap<String, Sender<Msg>>,
    /// (endpoint, port) pairs with a bound session port.
    ports: Vec<(String, u16)>,
    pending_joins: HashMap<SessionId, PendingJoin>,
    sessions: HashMap<SessionId, (String, String)>,
    /// (endpoint, prefix) discovery subscriptions.
    finders: Vec<(String, String)>,
    /// (endpoint, name) advertisements.
    advertised: Vec<(String, String)>,
}

impl Router {
    fn send_to(&self, dest: &str, msg: Msg) {
        match self.endpoints.get(dest) {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => warn!(dest, "loopback: no such endpoint"),
        }
    }

    fn broadcast(&self, except: &str, msg: &Msg) {
        for (name, tx) in &self.endpoints {
            if name != except {
                let _ = tx.send(msg.clone());
            }
        }
    }

    fn found_name_signal(name: &str, prefix: &str) -> Msg {
        Msg::signal(0, "", "/", BUS_IFACE, "FoundAdvertisedName", 0)
            .arg(WireArg::Str(name.to_owned()))
            .arg(WireArg::Uint16(0x0004))
            .arg(WireArg::Str(prefix.to_owned()))
    }
}

/// The shared in-process bus. Clone-cheap; hand one to every endpoint.
#[derive(Clone, Default)]
pub struct LoopbackNet {
    inner: Arc<Mutex<Router>>,
}

impl LoopbackNet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Router> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new endpoint on this bus.
    pub fn endpoint(&self) -> LoopbackTransport {
        let (tx, rx) = channel();
        let mut router = self.lock();
        router.next_endpoint += 1;
        let name = format!(":1.{}", router.next_endpoint);
        router.endpoints.insert(name.clone(), tx.clone());
        drop(router);
        LoopbackTransport {
            net: self.clone(),
            name,
            guid: Uuid::new_v4(),
            rx,
            self_tx: tx,
            serial: 0,
            attached: false,
            auth_results: Vec::new(),
            next_auth: AuthOutcome::Ok,
            triggers: Arc::new(TriggerSet::default()),
        }
    }
}

/// Wakes a blocked [`LoopbackTransport::unmarshal_msg`] from another thread.
#[derive(Clone)]
pub struct Waker {
    tx: Sender<Msg>,
}

impl Waker {
    pub fn wake(&self) {
        let _ = self.tx.send(Msg::signal(0, "", "/", WAKE_IFACE, "Wake", 0));
    }
}

pub struct LoopbackTransport {
    net: LoopbackNet,
    name: String,
    guid: Uuid,
    rx: Receiver<Msg>,
    self_tx: Sender<Msg>,
    serial: Serial,
    attached: bool,
    auth_results: Vec<(String, AuthOutcome)>,
    next_auth: AuthOutcome,
    triggers: Arc<TriggerSet>,
}

impl LoopbackTransport {
    /// Handle for external triggers (§5 interrupt contract): set bits, then
    /// wake the loop.
    pub fn waker(&self) -> Waker {
        Waker { tx: self.self_tx.clone() }
    }

    pub fn triggers(&self) -> Arc<TriggerSet> {
        Arc::clone(&self.triggers)
    }

    /// Test hook: outcome reported for the next `authenticate_peer`.
    pub fn set_next_auth_outcome(&mut self, outcome: AuthOutcome) {
        self.next_auth = outcome;
    }
}

impl Transport for LoopbackTransport {
    fn attach(&mut self) -> CoreResult<()> {
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self, restarting: bool) {
        if !restarting {
            self.attached = false;
        }
    }

    fn unique_name(&self) -> String {
        self.name.clone()
    }

    fn local_guid(&self) -> Uuid {
        self.guid
    }

    fn next_serial(&mut self) -> Serial {
        self.serial += 1;
        self.serial
    }

    fn bind_session_port(&mut self, port: u16) -> CoreResult<()> {
        let mut router = self.net.lock();
        let entry = (self.name.clone(), port);
        if !router.ports.contains(&entry) {
            router.ports.push(entry);
        }
        Ok(())
    }

    fn join_session(&mut self, peer: &str, port: u16) -> CoreResult<Serial> {
        let serial = self.next_serial();
        let mut router = self.net.lock();
        if !router.ports.iter().any(|(ep, p)| ep == peer && *p == port) {
            // Unbound port: fail the join with an asynchronous reply, the
            // way a routing node would.
            let mut reply = Msg::new_join_reply(JOIN_REPLY_REJECTED, 0);
            reply.hdr.sender = ROUTER_NAME.to_owned();
            reply.hdr.dest = self.name.clone();
            reply.hdr.reply_serial = serial;
            router.send_to(&self.name, reply);
            return Ok(serial);
        }
        router.next_session += 1;
        let session = 100 + router.next_session;
        router
            .pending_joins
            .insert(session, PendingJoin { joiner: self.name.clone(), serial });
        let accept = Msg::method_call(0, peer, "/", BUS_IFACE, "AcceptSession", 0)
            .arg(WireArg::Uint16(port))
            .arg(WireArg::Uint32(session))
            .arg(WireArg::Str(self.name.clone()));
        let mut accept = accept;
        accept.hdr.sender = ROUTER_NAME.to_owned();
        router.send_to(peer, accept);
        Ok(serial)
    }

    fn leave_session(&mut self, session: SessionId) -> CoreResult<()> {
        let mut router = self.net.lock();
        if let Some((a, b)) = router.sessions.remove(&session) {
            let other = if a == self.name { b } else { a };
            let mut lost = Msg::signal(0, "", "/", BUS_IFACE, "SessionLostWithReason", 0)
                .arg(WireArg::Uint32(session))
                .arg(WireArg::Uint32(1));
            lost.hdr.sender = ROUTER_NAME.to_owned();
            lost.hdr.dest = other.clone();
            router.send_to(&other, lost);
        }
        Ok(())
    }

    fn accept_session_reply(&mut self, session: SessionId, accept: bool) -> CoreResult<()> {
        let mut router = self.net.lock();
        let Some(pending) = router.pending_joins.remove(&session) else {
            return Err(CoreError::Invalid);
        };
        let (status, id) = if accept {
            router
                .sessions
                .insert(session, (pending.joiner.clone(), self.name.clone()));
            (JOIN_REPLY_SUCCESS, session)
        } else {
            (JOIN_REPLY_REJECTED, 0)
        };
        let mut reply = Msg::new_join_reply(status, id);
        reply.hdr.sender = ROUTER_NAME.to_owned();
        reply.hdr.dest = pending.joiner.clone();
        reply.hdr.reply_serial = pending.serial;
        router.send_to(&pending.joiner, reply);
        Ok(())
    }

    fn advertise_name(&mut self, name: &str) -> CoreResult<()> {
        let mut router = self.net.lock();
        router.advertised.push((self.name.clone(), name.to_owned()));
        let matches: Vec<(String, String)> = router
            .finders
            .iter()
            .filter(|(ep, prefix)| ep != &self.name && name.starts_with(prefix.as_str()))
            .cloned()
            .collect();
        for (ep, prefix) in matches {
            let mut sig = Router::found_name_signal(name, &prefix);
            sig.hdr.sender = ROUTER_NAME.to_owned();
            sig.hdr.dest = ep.clone();
            router.send_to(&ep, sig);
        }
        Ok(())
    }

    fn find_advertised_name(&mut self, prefix: &str) -> CoreResult<()> {
        let mut router = self.net.lock();
        router.finders.push((self.name.clone(), prefix.to_owned()));
        let matches: Vec<String> = router
            .advertised
            .iter()
            .filter(|(ep, name)| ep != &self.name && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .collect();
        for name in matches {
            let mut sig = Router::found_name_signal(&name, prefix);
            sig.hdr.sender = ROUTER_NAME.to_owned();
            sig.hdr.dest = self.name.clone();
            router.send_to(&self.name, sig);
        }
        Ok(())
    }

    fn set_signal_rule(&mut self, rule: &str, add: bool) -> CoreResult<()> {
        debug!(rule, add, "signal rule (loopback delivers everything)");
        Ok(())
    }

    fn register_objects(&mut self, slot: u8, objects: Vec<AnnouncedObject>) {
        debug!(slot, count = objects.len(), "registered object table");
    }

    fn about_announce(
        &mut self,
        port: u16,
        props: Vec<(String, WireArg)>,
        objects: Vec<AnnouncedObject>,
    ) -> CoreResult<()> {
        let descs = objects
            .into_iter()
            .map(|o| {
                WireArg::Struct(vec![
                    WireArg::ObjPath(o.path),
                    WireArg::Array(
                        "s".into(),
                        o.interfaces.into_iter().map(WireArg::Str).collect(),
                    ),
                ])
            })
            .collect();
        let dict = props
            .into_iter()
            .map(|(k, v)| {
                let sig = v.signature();
                WireArg::DictEntry(Box::new(WireArg::Str(k)), Box::new(WireArg::Variant(sig, Box::new(v))))
            })
            .collect();
        let serial = self.next_serial();
        let mut announce = Msg::signal(serial, "", "/About", ABOUT_IFACE, "Announce", 0)
            .arg(WireArg::Uint16(1))
            .arg(WireArg::Uint16(port))
            .arg(WireArg::Array("(oas)".into(), descs))
            .arg(WireArg::Array("{sv}".into(), dict));
        announce.hdr.sender = self.name.clone();
        let router = self.net.lock();
        router.broadcast(&self.name, &announce);
        Ok(())
    }

    fn about_set_icon(&mut self, mime: &str, data: Bytes) -> CoreResult<()> {
        debug!(mime, len = data.len(), "about icon set");
        Ok(())
    }

    fn set_link_timeout(&mut self, ms: u32) -> CoreResult<()> {
        debug!(ms, "link timeout");
        Ok(())
    }

    fn notify_link_active(&mut self) {}

    fn authenticate_peer(&mut self, peer: &str) -> CoreResult<()> {
        self.auth_results.push((peer.to_owned(), self.next_auth));
        self.next_auth = AuthOutcome::Ok;
        Ok(())
    }

    fn unmarshal_msg(&mut self, timeout: Duration) -> CoreResult<Msg> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) if msg.hdr.iface == WAKE_IFACE => Err(CoreError::Timeout),
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => Err(CoreError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CoreError::Read),
        }
    }

    fn deliver(&mut self, mut msg: Msg) -> CoreResult<()> {
        if msg.hdr.sender.is_empty() {
            msg.hdr.sender = self.name.clone();
        }
        if msg.hdr.serial == 0 {
            msg.hdr.serial = self.next_serial();
        }
        let router = self.net.lock();
        if msg.hdr.dest.is_empty() {
            router.broadcast(&self.name, &msg);
        } else {
            router.send_to(&msg.hdr.dest.clone(), msg);
        }
        Ok(())
    }

    fn handle_bus_message(&mut self, msg: &Msg) -> CoreResult<()> {
        if msg.hdr.msg_type == MsgType::MethodCall && msg.hdr.member == "Ping" {
            let serial = self.next_serial();
            let reply = Msg::reply_to(&msg.hdr, serial);
            return self.deliver(reply);
        }
        debug!(iface = %msg.hdr.iface, member = %msg.hdr.member, "bus message ignored");
        Ok(())
    }

    fn drain_auth_results(&mut self) -> Vec<(String, AuthOutcome)> {
        std::mem::take(&mut self.auth_results)
    }
}

impl Msg {
    fn new_join_reply(status: u32, session: SessionId) -> Msg {
        let call = Msg::method_call(0, ROUTER_NAME, "/", BUS_IFACE, "JoinSession", 0);
        Msg::reply_to(&call.hdr, 0)
            .arg(WireArg::Uint32(status))
            .arg(WireArg::Uint32(session))
    }
}
