// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-layer data model and the transport seam.
//!
//! The distributed-object transport itself (discovery, routing, security)
//! is an embedder concern behind the [`Transport`] trait; the runtime only
//! sees typed messages. [`loopback`] provides an in-process router used by
//! the host simulator and the integration tests.

pub mod loopback;

use std::time::Duration;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::CoreResult;

/// Session port the application service binds.
pub const APP_PORT: u16 = 2;
/// Session port of the script console service.
pub const CONSOLE_PORT: u16 = 7714;

pub type SessionId = u32;
pub type Serial = u32;

/// `JoinSession` reply status codes.
pub const JOIN_REPLY_SUCCESS: u32 = 1;
pub const JOIN_REPLY_REJECTED: u32 = 3;

pub const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";
pub const ABOUT_IFACE: &str = "org.alljoyn.About";
pub const BUS_IFACE: &str = "org.alljoyn.Bus";
pub const INTROSPECT_IFACE: &str = "org.freedesktop.DBus.Introspectable";
pub const PEER_AUTH_IFACE: &str = "org.alljoyn.Bus.Peer.Authentication";

/// A single marshalled argument. The tag mirrors the wire-type signature
/// character set; containers carry their element signature so a message can
/// be re-marshalled without consulting the interface table.
#[derive(Debug, Clone, PartialEq)]
pub enum WireArg {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Str(String),
    ObjPath(String),
    Sig(String),
    /// `ay` fast path.
    Bytes(Bytes),
    /// `a<elem>`; the element signature is kept alongside the items.
    Array(String, Vec<WireArg>),
    /// `(...)` in declaration order.
    Struct(Vec<WireArg>),
    /// `{kv}` dictionary entry.
    DictEntry(Box<WireArg>, Box<WireArg>),
    /// `v` with the inner signature.
    Variant(String, Box<WireArg>),
}

impl WireArg {
    /// Wire signature of this argument.
    pub fn signature(&self) -> String {
        match self {
            Self::Bool(_) => "b".into(),
            Self::Byte(_) => "y".into(),
            Self::Int16(_) => "n".into(),
            Self::Uint16(_) => "q".into(),
            Self::Int32(_) => "i".into(),
            Self::Uint32(_) => "u".into(),
            Self::Int64(_) => "x".into(),
            Self::Uint64(_) => "t".into(),
            Self::Double(_) => "d".into(),
            Self::Str(_) => "s".into(),
            Self::ObjPath(_) => "o".into(),
            Self::Sig(_) => "g".into(),
            Self::Bytes(_) => "ay".into(),
            Self::Array(elem, _) => format!("a{elem}"),
            Self::Struct(fields) => {
                let inner: String = fields.iter().map(|f| f.signature()).collect();
                format!("({inner})")
            }
            Self::DictEntry(k, v) => format!("{{{}{}}}", k.signature(), v.signature()),
            Self::Variant(_, _) => "v".into(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::ObjPath(s) | Self::Sig(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Uint32(v) => Some(*v),
            Self::Uint16(v) => Some(*v as u32),
            Self::Byte(v) => Some(*v as u32),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::Uint16(v) => Some(*v),
            Self::Byte(v) => Some(*v as u16),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::Byte(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    MethodCall,
    MethodReply,
    ErrorReply,
    Signal,
}

/// Header of a marshalled message.
#[derive(Debug, Clone, PartialEq)]
pub struct MsgHeader {
    pub msg_type: MsgType,
    /// Unique bus name of the sender.
    pub sender: String,
    /// Destination unique name; empty for broadcast.
    pub dest: String,
    pub path: String,
    pub iface: String,
    pub member: String,
    pub session: SessionId,
    pub serial: Serial,
    /// Serial of the call a reply answers; zero otherwise.
    pub reply_serial: Serial,
    /// Error name for [`MsgType::ErrorReply`].
    pub error: Option<String>,
}

/// A message plus its body. `raw` carries length-delimited streamed bytes
/// appended after the typed arguments (script install/eval payloads).
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    pub hdr: MsgHeader,
    pub body: Vec<WireArg>,
    pub raw: Bytes,
}

impl Msg {
    fn new(msg_type: MsgType, serial: Serial) -> Self {
        Self {
            hdr: MsgHeader {
                msg_type,
                sender: String::new(),
                dest: String::new(),
                path: String::new(),
                iface: String::new(),
                member: String::new(),
                session: 0,
                serial,
                reply_serial: 0,
                error: None,
            },
            body: Vec::new(),
            raw: Bytes::new(),
        }
    }

    pub fn method_call(
        serial: Serial,
        dest: &str,
        path: &str,
        iface: &str,
        member: &str,
        session: SessionId,
    ) -> Self {
        let mut msg = Self::new(MsgType::MethodCall, serial);
        msg.hdr.dest = dest.to_owned();
        msg.hdr.path = path.to_owned();
        msg.hdr.iface = iface.to_owned();
        msg.hdr.member = member.to_owned();
        msg.hdr.session = session;
        msg
    }

    pub fn signal(
        serial: Serial,
        dest: &str,
        path: &str,
        iface: &str,
        member: &str,
        session: SessionId,
    ) -> Self {
        let mut msg = Self::new(MsgType::Signal, serial);
        msg.hdr.dest = dest.to_owned();
        msg.hdr.path = path.to_owned();
        msg.hdr.iface = iface.to_owned();
        msg.hdr.member = member.to_owned();
        msg.hdr.session = session;
        msg
    }

    /// A success reply to `call`.
    pub fn reply_to(call: &MsgHeader, serial: Serial) -> Self {
        let mut msg = Self::new(MsgType::MethodReply, serial);
        msg.hdr.dest = call.sender.clone();
        msg.hdr.session = call.session;
        msg.hdr.reply_serial = call.serial;
        msg.hdr.iface = call.iface.clone();
        msg.hdr.member = call.member.clone();
        msg
    }

    /// An error reply to `call`.
    pub fn error_to(call: &MsgHeader, serial: Serial, error: &str) -> Self {
        let mut msg = Self::reply_to(call, serial);
        msg.hdr.msg_type = MsgType::ErrorReply;
        msg.hdr.error = Some(error.to_owned());
        msg
    }

    pub fn arg(mut self, arg: WireArg) -> Self {
        self.body.push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = WireArg>) -> Self {
        self.body.extend(args);
        self
    }

    pub fn with_raw(mut self, raw: Bytes) -> Self {
        self.raw = raw;
        self
    }
}

/// Coarse routing decision for an inbound message, replacing the original
/// two-level switch on numeric message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgClass {
    /// Infrastructure traffic (ping, introspection, authentication, About
    /// data) answered by the transport passthrough handler.
    BusInfra,
    /// Inbound `AcceptSession` request on some bound port.
    AcceptSession,
    /// Signal that a session was lost (with or without reason).
    SessionLost,
    FoundAdvertisedName,
    AboutAnnouncement,
    /// Reply or error correlated to one of our outbound calls.
    Reply,
    /// Anything else: console, debugger, widgets or user script traffic.
    App,
}

/// Classify a message header. Reply routing beyond this point (join reply
/// vs user reply) is resolved against the pending-serial tables.
pub fn classify(hdr: &MsgHeader) -> MsgClass {
    match hdr.msg_type {
        MsgType::MethodReply | MsgType::ErrorReply => MsgClass::Reply,
        MsgType::Signal => match (hdr.iface.as_str(), hdr.member.as_str()) {
            (BUS_IFACE, "SessionLost") | (BUS_IFACE, "SessionLostWithReason") => {
                MsgClass::SessionLost
            }
            (BUS_IFACE, "FoundAdvertisedName") => MsgClass::FoundAdvertisedName,
            (ABOUT_IFACE, "Announce") => MsgClass::AboutAnnouncement,
            _ => MsgClass::App,
        },
        MsgType::MethodCall => match (hdr.iface.as_str(), hdr.member.as_str()) {
            (BUS_IFACE, "AcceptSession") => MsgClass::AcceptSession,
            (BUS_IFACE, _) | (INTROSPECT_IFACE, _) | (PEER_AUTH_IFACE, _) => MsgClass::BusInfra,
            (ABOUT_IFACE, _) => MsgClass::BusInfra,
            _ => MsgClass::App,
        },
    }
}

/// One object as it appears in an announcement or an object table handed to
/// the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnouncedObject {
    pub path: String,
    pub interfaces: Vec<String>,
}

/// Result of authenticating a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    Failed,
}

/// The transport seam (§6 bus-layer dependencies).
///
/// All methods take `&mut self`: the runtime is single-threaded and the
/// transport is only ever driven from the message loop or from the
/// debugger's re-entrant read path. `Send` so the whole runtime can be
/// moved onto its own thread.
pub trait Transport: Send {
    /// Connect to a routing node. Idempotent.
    fn attach(&mut self) -> CoreResult<()>;

    /// Disconnect; `restarting` is true when the engine will be restarted
    /// and the attachment should be kept cheap to re-establish.
    fn detach(&mut self, restarting: bool);

    /// Our unique bus name (valid after attach).
    fn unique_name(&self) -> String;

    /// Stable local GUID backing the default `AppId`/`DeviceId`.
    fn local_guid(&self) -> Uuid;

    /// Allocate the serial for an outbound message.
    fn next_serial(&mut self) -> Serial;

    fn bind_session_port(&mut self, port: u16) -> CoreResult<()>;

    /// Begin joining `peer` on `port`; returns the serial of the
    /// outstanding `JoinSession` call.
    fn join_session(&mut self, peer: &str, port: u16) -> CoreResult<Serial>;

    fn leave_session(&mut self, session: SessionId) -> CoreResult<()>;

    /// Answer an inbound `AcceptSession` for the given candidate session.
    fn accept_session_reply(&mut self, session: SessionId, accept: bool) -> CoreResult<()>;

    fn advertise_name(&mut self, name: &str) -> CoreResult<()>;

    fn find_advertised_name(&mut self, prefix: &str) -> CoreResult<()>;

    /// Add or remove a signal match rule.
    fn set_signal_rule(&mut self, rule: &str, add: bool) -> CoreResult<()>;

    /// Register an object table under a slot (application, console, proxy).
    fn register_objects(&mut self, slot: u8, objects: Vec<AnnouncedObject>);

    /// Emit an About announcement for the registered announced objects.
    fn about_announce(
        &mut self,
        port: u16,
        props: Vec<(String, WireArg)>,
        objects: Vec<AnnouncedObject>,
    ) -> CoreResult<()>;

    fn about_set_icon(&mut self, mime: &str, data: Bytes) -> CoreResult<()>;

    /// Configure the bus link liveness timeout.
    fn set_link_timeout(&mut self, ms: u32) -> CoreResult<()>;

    /// Tell the link monitor traffic is flowing.
    fn notify_link_active(&mut self);

    /// Authenticate a peer; completion is reported through a later call to
    /// the session manager, mirroring the transport's async callback.
    fn authenticate_peer(&mut self, peer: &str) -> CoreResult<()>;

    /// Block for up to `timeout` waiting for the next inbound message.
    /// Returns `Err(Timeout)` on expiry or wake-up interrupt.
    fn unmarshal_msg(&mut self, timeout: Duration) -> CoreResult<Msg>;

    /// Deliver an outbound message.
    fn deliver(&mut self, msg: Msg) -> CoreResult<()>;

    /// Passthrough for [`MsgClass::BusInfra`] traffic.
    fn handle_bus_message(&mut self, msg: &Msg) -> CoreResult<()>;

    /// Drain completed peer authentications started with
    /// [`Transport::authenticate_peer`].
    fn drain_auth_results(&mut self) -> Vec<(String, AuthOutcome)>;
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
