// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer and session tracking.
//!
//! Sessions are keyed by the peer's unique bus name. An About announcement
//! accumulates pending service objects on the peer record; when the
//! outstanding `JoinSession` reply lands, the pending entries are drained
//! into script callbacks. Service objects reference-count the record, and
//! the last release leaves the session.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::bus::{
    AuthOutcome, Msg, Serial, SessionId, JOIN_REPLY_SUCCESS,
};
use crate::core::{Core, PendingCall};
use crate::engine::CallbackRef;
use crate::error::{CoreError, CoreResult};
use crate::value::{Handle, Value};

/// Authentication progress for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStatus {
    /// Auth finished but the callback has not run yet.
    Authenticated,
    /// No auth requested for this connection.
    #[default]
    NoAuth,
    Authenticating,
    /// Auth finished and the callback has run.
    AuthDone,
    AuthError,
}

/// Per-peer session record.
#[derive(Debug, Default)]
pub struct SessionInfo {
    pub port: u16,
    pub refcount: u16,
    /// Serial of an outstanding `JoinSession` call; zero when none.
    pub reply_serial: Serial,
    /// Active session id; zero means no session.
    pub session: SessionId,
    pub auth: AuthStatus,
    pub auth_callback: Option<CallbackRef>,
    pub auth_service: Option<Handle>,
    /// Service objects waiting for the session to come up.
    pub announcements: Vec<Handle>,
}

/// Descriptor registered by `findServiceByName`.
#[derive(Debug, Clone)]
pub struct FindByName {
    pub interfaces: Vec<String>,
    pub path: String,
    pub port: u16,
    pub callback: CallbackRef,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    peers: IndexMap<String, SessionInfo>,
    /// interface → script callback for announced services.
    service_callbacks: IndexMap<String, CallbackRef>,
    /// advertised-name prefix → join descriptor.
    find_by_name: IndexMap<String, FindByName>,
}

impl SessionManager {
    pub fn contains(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn session_id(&self, peer: &str) -> SessionId {
        self.peers.get(peer).map(|p| p.session).unwrap_or(0)
    }

    pub fn auth_status(&self, peer: &str) -> AuthStatus {
        self.peers.get(peer).map(|p| p.auth).unwrap_or_default()
    }

    pub fn peer(&self, peer: &str) -> Option<&SessionInfo> {
        self.peers.get(peer)
    }

    pub fn ensure_peer(&mut self, peer: &str) -> &mut SessionInfo {
        self.peers.entry(peer.to_owned()).or_default()
    }

    pub fn remove_peer(&mut self, peer: &str) {
        self.peers.shift_remove(peer);
    }

    /// Peer whose outstanding join matches `serial`.
    pub fn join_reply_peer(&self, serial: Serial) -> Option<String> {
        self.peers
            .iter()
            .find(|(_, info)| info.reply_serial != 0 && info.reply_serial == serial)
            .map(|(name, _)| name.clone())
    }

    /// Peer owning the given live session.
    pub fn peer_of_session(&self, session: SessionId) -> Option<String> {
        self.peers
            .iter()
            .find(|(_, info)| info.session != 0 && info.session == session)
            .map(|(name, _)| name.clone())
    }

    pub fn add_ref(&mut self, peer: &str) {
        self.ensure_peer(peer).refcount += 1;
    }

    /// Drop one reference. Returns the session to leave when this was the
    /// last one and a session exists; the record is removed either way
    /// once the count reaches zero.
    pub fn release_ref(&mut self, peer: &str) -> Option<SessionId> {
        let info = self.peers.get_mut(peer)?;
        info.refcount = info.refcount.saturating_sub(1);
        if info.refcount > 0 {
            return None;
        }
        let session = info.session;
        self.peers.shift_remove(peer);
        (session != 0).then_some(session)
    }

    pub fn refcount(&self, peer: &str) -> u16 {
        self.peers.get(peer).map(|p| p.refcount).unwrap_or(0)
    }

    /// Register the announced-service callback for an interface.
    pub fn on_service(&mut self, iface: &str, callback: CallbackRef) {
        self.service_callbacks.insert(iface.to_owned(), callback);
    }

    pub fn service_callback(&self, iface: &str) -> Option<CallbackRef> {
        self.service_callbacks.get(iface).copied()
    }

    fn has_any_service_callback(&self, interfaces: &[String]) -> bool {
        interfaces.iter().any(|i| self.service_callbacks.contains_key(i))
    }

    /// Register a find-by-name descriptor keyed by name prefix.
    pub fn on_found_name(&mut self, prefix: &str, descriptor: FindByName) {
        self.find_by_name.insert(prefix.to_owned(), descriptor);
    }

    pub fn begin_auth(&mut self, peer: &str, callback: CallbackRef, service: Handle) {
        let info = self.ensure_peer(peer);
        info.auth = AuthStatus::Authenticating;
        info.auth_callback = Some(callback);
        info.auth_service = Some(service);
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }
}

impl Core {
    /// Process an inbound About announcement (§4.H).
    ///
    /// Returns the service callbacks to invoke now (only when a session
    /// with the announcer already exists); otherwise a `JoinSession` is
    /// issued and the callbacks fire when its reply lands.
    pub fn handle_announcement(&mut self, msg: &Msg) -> CoreResult<Vec<PendingCall>> {
        let sender = msg.hdr.sender.clone();
        if sender == self.bus.unique_name() {
            return Ok(Vec::new());
        }
        let port = msg.body.get(1).and_then(|a| a.as_u16()).ok_or(CoreError::Invalid)?;
        let objects = match msg.body.get(2) {
            Some(crate::bus::WireArg::Array(_, items)) => items,
            _ => return Err(CoreError::Invalid),
        };
        // Unpack `a(oas)` into (path, interfaces) pairs.
        let mut services = Vec::new();
        for item in objects {
            if let crate::bus::WireArg::Struct(fields) = item {
                let path = fields.first().and_then(|f| f.as_str()).unwrap_or_default();
                let interfaces: Vec<String> = match fields.get(1) {
                    Some(crate::bus::WireArg::Array(_, names)) => names
                        .iter()
                        .filter_map(|n| n.as_str().map(str::to_owned))
                        .collect(),
                    _ => Vec::new(),
                };
                services.push((path.to_owned(), interfaces));
            }
        }

        self.sessions.ensure_peer(&sender).port = port;
        for (path, interfaces) in services {
            if self.sessions.has_any_service_callback(&interfaces) {
                let handle = self.create_service_object(&sender, &path, interfaces);
                self.sessions.ensure_peer(&sender).announcements.push(handle);
            }
        }

        let info = self.sessions.ensure_peer(&sender);
        if info.session != 0 {
            return Ok(self.drain_announcements(&sender));
        }
        if info.reply_serial != 0 {
            // Join already in flight; callbacks fire on its reply.
            return Ok(Vec::new());
        }
        if info.refcount > 0 {
            let serial = self.bus.join_session(&sender, port)?;
            self.sessions.ensure_peer(&sender).reply_serial = serial;
            debug!(peer = %sender, serial, "joining announced session");
        } else {
            // Nothing to call back: forget the peer.
            self.sessions.remove_peer(&sender);
        }
        Ok(Vec::new())
    }

    /// Turn the accumulated announcements into service-object callbacks.
    fn drain_announcements(&mut self, peer: &str) -> Vec<PendingCall> {
        self.refresh_service_sessions(peer);
        let handles = match self.sessions.peers.get_mut(peer) {
            Some(info) => std::mem::take(&mut info.announcements),
            None => return Vec::new(),
        };
        let mut calls = Vec::new();
        for handle in handles {
            let Ok(svc) = self.service_object(handle) else { continue };
            let interfaces = svc.interfaces.clone();
            for iface in interfaces {
                if let Some(callback) = self.sessions.service_callback(&iface) {
                    calls.push(PendingCall {
                        callback,
                        args: vec![self.service_value(handle)],
                    });
                }
            }
        }
        if !calls.is_empty() {
            self.sessions.ensure_peer(peer).auth = AuthStatus::NoAuth;
        }
        calls
    }

    /// Route a `JoinSession` reply to the peer that issued it.
    pub fn handle_join_reply(&mut self, msg: &Msg) -> Vec<PendingCall> {
        let Some(peer) = self.sessions.join_reply_peer(msg.hdr.reply_serial) else {
            return Vec::new();
        };
        let status = msg.body.first().and_then(|a| a.as_u32()).unwrap_or(0);
        let session = msg.body.get(1).and_then(|a| a.as_u32()).unwrap_or(0);
        {
            let info = self.sessions.ensure_peer(&peer);
            info.reply_serial = 0;
            if status == JOIN_REPLY_SUCCESS {
                info.session = session;
            }
        }
        if status == JOIN_REPLY_SUCCESS {
            info!(peer = %peer, session, "session joined");
            self.drain_announcements(&peer)
        } else {
            warn!(peer = %peer, status, "join failed");
            self.sessions.remove_peer(&peer);
            self.drop_peer_services(&peer);
            Vec::new()
        }
    }

    /// `FoundAdvertisedName`: synthesize an announcement from the
    /// registered find-by-name descriptor and start the join.
    pub fn handle_found_name(&mut self, msg: &Msg) -> CoreResult<()> {
        let name = msg.body.first().and_then(|a| a.as_str()).ok_or(CoreError::Invalid)?;
        let prefix = msg.body.get(2).and_then(|a| a.as_str()).ok_or(CoreError::Invalid)?;
        if self.sessions.contains(name) {
            return Ok(());
        }
        let Some(descriptor) = self.sessions.find_by_name.get(prefix).cloned() else {
            return Ok(());
        };
        let name = name.to_owned();
        let serial = self.bus.join_session(&name, descriptor.port)?;
        // The first interface keys the service callback, as an
        // announcement handler would have registered it.
        if let Some(first) = descriptor.interfaces.first() {
            self.sessions.on_service(first, descriptor.callback);
        }
        let handle =
            self.create_service_object(&name, &descriptor.path, descriptor.interfaces.clone());
        let info = self.sessions.ensure_peer(&name);
        info.port = descriptor.port;
        info.reply_serial = serial;
        info.announcements.push(handle);
        debug!(peer = %name, serial, "joining advertised name");
        Ok(())
    }

    /// Session loss: remove the record, drop its service objects and reply
    /// correlations. Returns the peer name if a record was removed (the
    /// loop then fires `onPeerDisconnected`).
    pub fn handle_session_lost(&mut self, msg: &Msg) -> Option<String> {
        let session = msg.body.first().and_then(|a| a.as_u32())?;
        let peer = self.sessions.peer_of_session(session)?;
        info!(peer = %peer, session, "session lost");
        self.sessions.remove_peer(&peer);
        self.drop_peer_services(&peer);
        Some(peer)
    }

    /// Loop step: drain transport auth completions and fire the security
    /// callbacks of peers that just finished authenticating.
    pub fn service_sessions(&mut self) -> Vec<PendingCall> {
        for (peer, outcome) in self.bus.drain_auth_results() {
            let info = self.sessions.ensure_peer(&peer);
            match outcome {
                AuthOutcome::Ok => info.auth = AuthStatus::Authenticated,
                AuthOutcome::Failed => {
                    warn!(peer = %peer, "authentication failed");
                    info.auth = AuthStatus::AuthError;
                }
            }
        }
        let mut calls = Vec::new();
        for peer in self.sessions.peer_names() {
            if self.sessions.auth_status(&peer) != AuthStatus::Authenticated {
                continue;
            }
            let (callback, service) = {
                let info = self.sessions.ensure_peer(&peer);
                info.auth = AuthStatus::AuthDone;
                (info.auth_callback, info.auth_service)
            };
            if let (Some(callback), Some(service)) = (callback, service) {
                calls.push(PendingCall {
                    callback,
                    args: vec![self.service_value(service), Value::Bool(true)],
                });
            }
        }
        calls
    }

    /// Leave every session (engine restart / install).
    pub fn end_sessions(&mut self) {
        for peer in self.sessions.peer_names() {
            let session = self.sessions.session_id(&peer);
            if session != 0 {
                let _ = self.bus.leave_session(session);
            }
            self.sessions.remove_peer(&peer);
            self.drop_peer_services(&peer);
        }
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
