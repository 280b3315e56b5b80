// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime lifecycle: boot the engine, load the installed script, attach
//! to the bus, run the message loop, tear down, repeat.
//!
//! A `RestartApp` status restarts the script engine while keeping the bus
//! attachment; anything else detaches and propagates to the launcher.

use tracing::{error, info, warn};

use crate::bus::{Transport, APP_PORT};
use crate::console;
use crate::core::Core;
use crate::ctrlpanel;
use crate::engine::{hooks, ScriptEngine};
use crate::error::CoreError;
use crate::msgloop;
use crate::nvram::Nvram;
use crate::storage;
use crate::tables::{ObjectTables, SLOT_APP, SLOT_PROXY};

pub struct Runtime {
    pub core: Core,
    pub engine: Box<dyn ScriptEngine>,
    device_name: Option<String>,
}

impl Runtime {
    pub fn new(
        bus: Box<dyn Transport>,
        nvram: Box<dyn Nvram>,
        engine: Box<dyn ScriptEngine>,
        triggers: std::sync::Arc<crate::bus::loopback::TriggerSet>,
        device_name: Option<String>,
    ) -> Self {
        Self {
            core: Core::new(bus, nvram, triggers),
            engine,
            device_name,
        }
    }

    /// Run engine lifecycles until a terminal status.
    pub fn run(&mut self) -> CoreError {
        loop {
            let status = self.run_cycle();
            if status == CoreError::RestartApp {
                info!("restarting script engine");
                self.engine.reset();
                self.reset_script_state();
                continue;
            }
            return status;
        }
    }

    /// One engine lifecycle (§ boot → loop → teardown).
    pub fn run_cycle(&mut self) -> CoreError {
        let Self { core, engine, device_name } = self;

        core.propstore.init(core.nvram.as_mut(), device_name.as_deref(), false);

        // Evaluate the installed script, if any. A script that fails to
        // compile or run is deleted so a broken install cannot wedge the
        // device in a crash loop.
        if let Some((name, body)) = storage::load(core.nvram.as_ref()) {
            info!(name = %name, len = body.len(), "running installed script");
            core.watchdog.arm(std::time::Duration::from_millis(
                crate::core::WATCHDOG_TIMEOUT_MS,
            ));
            let outcome = engine.install(core, &name, &body);
            core.watchdog.clear();
            if let Err(err) = outcome {
                error!(error = %err.message(), "installed script failed, deleting");
                console::report_script_error(core, &err);
                if storage::delete_script(core.nvram.as_mut()).is_err() {
                    warn!("failed to delete bad script");
                }
                return CoreError::RestartApp;
            }
            core.console.engine_state = console::EngineState::Running;
        } else {
            core.console.engine_state = console::EngineState::Clean;
        }

        // Expand the script's definitions into registered tables.
        match ObjectTables::build(&core.defs) {
            Ok(tables) => {
                core.tables = tables;
                let announced = core.tables.announced_objects(&core.defs);
                core.bus.register_objects(SLOT_APP, announced);
                core.bus.register_objects(SLOT_PROXY, Vec::new());
            }
            Err(e) => {
                error!(error = %e, "bad object/interface definitions");
                return CoreError::RestartApp;
            }
        }

        // Attach to the bus once; RestartApp cycles keep the attachment.
        if !core.attached {
            if let Err(e) = core.bus.attach() {
                error!(error = %e, "bus attach failed");
                return e;
            }
            if !core.lockdown() {
                if let Err(e) = console::init(core) {
                    warn!(error = %e, "console init failed");
                }
            }
            if let Err(e) = core.bus.bind_session_port(APP_PORT) {
                error!(error = %e, "failed to bind application port");
                return e;
            }
            let _ = core
                .bus
                .set_signal_rule("type='signal',sessionless='t'", true);
            core.attached = true;
        }
        core.announce_pending = true;

        // Tell the script we are up.
        core.running = true;
        if let Some(callback) = engine.hook(hooks::ON_ATTACH) {
            core.watchdog.arm(std::time::Duration::from_millis(
                crate::core::WATCHDOG_TIMEOUT_MS,
            ));
            let outcome = engine.invoke(core, callback, &[]);
            core.watchdog.clear();
            if let Err(err) = outcome {
                console::report_script_error(core, &err);
            }
        }

        let status = msgloop::run(core, engine.as_mut());
        warn!(status = %status, "message loop exited");

        // Script table entries are no longer valid.
        core.tables = ObjectTables::default();
        core.panel.terminate();
        core.bus.register_objects(ctrlpanel::SLOT_PANEL, Vec::new());
        if status != CoreError::RestartApp {
            console::terminate(core);
            core.bus.detach(false);
            core.attached = false;
        }
        if let Some(callback) = engine.hook(hooks::ON_DETACH) {
            let outcome = engine.invoke(core, callback, &[]);
            if let Err(err) = outcome {
                console::report_script_error(core, &err);
            }
        }
        core.running = false;
        status
    }

    /// Drop everything owned by the previous script world.
    fn reset_script_state(&mut self) {
        let core = &mut self.core;
        core.end_sessions();
        for callback in core.timers.clear_all() {
            self.engine.drop_ref(callback);
        }
        core.replies.clear();
        core.defs = Default::default();
        core.io_handlers.clear();
        core.pin_callbacks.clear();
        core.policy_changes = 0;
    }
}
