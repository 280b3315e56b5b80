// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The script-engine seam.
//!
//! The runtime never embeds a concrete interpreter; it drives anything that
//! can evaluate a script, hold references to script functions, and expose
//! the debug pipe surface. Script functions call back into the runtime
//! through [`crate::core::Core`], which is passed into every invocation —
//! the engine and the core are disjoint halves of the runtime so both can
//! be borrowed at once.

use crate::core::Core;
use crate::value::Value;

/// Reference to a script function held alive inside the engine.
pub type CallbackRef = u32;

/// Well-known hook names a script may assign on the bus object.
pub mod hooks {
    pub const ON_ATTACH: &str = "onAttach";
    pub const ON_DETACH: &str = "onDetach";
    pub const ON_METHOD_CALL: &str = "onMethodCall";
    pub const ON_SIGNAL: &str = "onSignal";
    pub const ON_PROP_GET: &str = "onPropGet";
    pub const ON_PROP_SET: &str = "onPropSet";
    pub const ON_PROP_GET_ALL: &str = "onPropGetAll";
    pub const ON_PEER_CONNECTED: &str = "onPeerConnected";
    pub const ON_PEER_DISCONNECTED: &str = "onPeerDisconnected";
    pub const ON_POLICY_CHANGED: &str = "onPolicyChanged";
}

/// How a script call failed. The console maps these onto its reply codes.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// The source did not parse.
    Syntax(String),
    /// The code ran and threw.
    Eval(String),
    /// The engine ran out of memory.
    Alloc,
    /// The watchdog aborted the call.
    Watchdog,
    /// Anything else.
    Internal(String),
}

impl ScriptError {
    pub fn message(&self) -> String {
        match self {
            Self::Syntax(m) | Self::Eval(m) | Self::Internal(m) => m.clone(),
            Self::Alloc => "out of memory".to_owned(),
            Self::Watchdog => "watchdog timeout".to_owned(),
        }
    }
}

/// A script engine as the runtime sees it.
///
/// Every entry point that may run script takes `&mut Core` so host
/// functions invoked by the script can reach the runtime. Errors are
/// returned, never thrown; the callers decide whether to surface them to
/// the console.
pub trait ScriptEngine: Send {
    /// Compile and run a whole program (the installed script). The program
    /// registers its interface/object definitions and hooks through `core`.
    fn install(&mut self, core: &mut Core, name: &str, source: &[u8])
        -> Result<(), ScriptError>;

    /// Compile and run one expression, returning its value.
    fn eval(&mut self, core: &mut Core, name: &str, source: &[u8])
        -> Result<Value, ScriptError>;

    /// Invoke a held function reference.
    fn invoke(
        &mut self,
        core: &mut Core,
        callback: CallbackRef,
        args: &[Value],
    ) -> Result<Value, ScriptError>;

    /// Look up a hook the script assigned (see [`hooks`]).
    fn hook(&self, name: &str) -> Option<CallbackRef>;

    /// Release a held function reference.
    fn drop_ref(&mut self, callback: CallbackRef);

    /// Attach the debug target. While attached the engine pumps protocol
    /// bytes through `core`'s debug pipe methods (`debug_pipe_read`,
    /// `debug_pipe_write`, `debug_pipe_peek`).
    fn debug_attach(&mut self, core: &mut Core);

    fn debug_detach(&mut self, core: &mut Core);

    /// Give the attached debug target a chance to exchange protocol bytes.
    /// Called by the debugger whenever a command is waiting.
    fn debug_cooperate(&mut self, core: &mut Core);

    /// Name of the engine, reported by the console `engine` property.
    fn description(&self) -> &'static str;

    /// Drop every held reference and hook ahead of an engine restart (the
    /// install/reset cycle tears the whole script world down).
    fn reset(&mut self);
}

/// Engine used when no interpreter is embedded: scripts are stored and
/// managed but never executed. The host launcher runs with this until an
/// embedder supplies a real engine; everything that does not require
/// evaluating script (console install/reset/lockdown, About, sessions)
/// still works.
#[derive(Debug, Default)]
pub struct InertEngine;

impl ScriptEngine for InertEngine {
    fn install(&mut self, _core: &mut Core, name: &str, _source: &[u8]) -> Result<(), ScriptError> {
        tracing::info!(name, "no engine embedded; script stored but not evaluated");
        Ok(())
    }

    fn eval(
        &mut self,
        _core: &mut Core,
        _name: &str,
        _source: &[u8],
    ) -> Result<Value, ScriptError> {
        Err(ScriptError::Internal("no script engine embedded".to_owned()))
    }

    fn invoke(
        &mut self,
        _core: &mut Core,
        _callback: CallbackRef,
        _args: &[Value],
    ) -> Result<Value, ScriptError> {
        Ok(Value::Undefined)
    }

    fn hook(&self, _name: &str) -> Option<CallbackRef> {
        None
    }

    fn drop_ref(&mut self, _callback: CallbackRef) {}

    fn debug_attach(&mut self, core: &mut Core) {
        // Announce ourselves so the client sees something sane, then hand
        // the version banner through the normal write path.
        let _ = core.debug_pipe_write(b"1 10499 none inert\n");
    }

    fn debug_detach(&mut self, _core: &mut Core) {}

    fn debug_cooperate(&mut self, core: &mut Core) {
        // Drain any queued command; with no interpreter there is nothing
        // to answer it with.
        if core.debug_pipe_peek() > 0 {
            let _ = core.debug_pipe_read(64);
        }
    }

    fn description(&self) -> &'static str {
        "none"
    }

    fn reset(&mut self) {}
}
