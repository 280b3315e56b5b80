// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-panel widget bridge.
//!
//! Script describes a tree of containers with property/action/dialog/label
//! leaves; `load` synthesizes an object path per widget, registers the
//! table and starts announcing. An inbound value write is clamped to the
//! widget's declared range, stored, reported to the script handler, and
//! signalled back to the joined controller.

use tracing::{debug, warn};

use crate::bus::{AnnouncedObject, Msg, SessionId, WireArg, PROPERTIES_IFACE};
use crate::core::{Core, PendingCall, ERROR_REJECTED};
use crate::engine::CallbackRef;
use crate::error::{CoreError, CoreResult};
use crate::marshal;
use crate::value::Value;

/// Session port of the control-panel service.
pub const CONTROL_PORT: u16 = 1000;
/// Wire-layer registration slot for the widget table.
pub const SLOT_PANEL: u8 = 3;

const PANEL_ROOT: &str = "/ControlPanel/rootContainer";

pub const CONTAINER_IFACE: &str = "org.alljoyn.ControlPanel.Container";
pub const PROPERTY_IFACE: &str = "org.alljoyn.ControlPanel.Property";
pub const ACTION_IFACE: &str = "org.alljoyn.ControlPanel.Action";
pub const DIALOG_IFACE: &str = "org.alljoyn.ControlPanel.Dialog";
pub const LABEL_IFACE: &str = "org.alljoyn.ControlPanel.LabelProperty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Container,
    Label,
    Property,
    Action,
    Dialog,
}

impl WidgetKind {
    pub fn interface(self) -> &'static str {
        match self {
            Self::Container => CONTAINER_IFACE,
            Self::Label => LABEL_IFACE,
            Self::Property => PROPERTY_IFACE,
            Self::Action => ACTION_IFACE,
            Self::Dialog => DIALOG_IFACE,
        }
    }
}

/// Dynamic value of a property widget.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetValue {
    Bool(bool),
    Int(i32),
    Uint16(u16),
    Num(f64),
    Str(String),
    Time { hour: u8, minute: u8, second: u8 },
    Date { day: u8, month: u8, year: u16 },
}

impl WidgetValue {
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Bool(_) => "b",
            Self::Int(_) => "i",
            Self::Uint16(_) => "q",
            Self::Num(_) => "d",
            Self::Str(_) => "s",
            Self::Time { .. } => "(yyy)",
            Self::Date { .. } => "(yyq)",
        }
    }

    pub fn to_wire(&self) -> WireArg {
        match self {
            Self::Bool(b) => WireArg::Bool(*b),
            Self::Int(i) => WireArg::Int32(*i),
            Self::Uint16(q) => WireArg::Uint16(*q),
            Self::Num(d) => WireArg::Double(*d),
            Self::Str(s) => WireArg::Str(s.clone()),
            Self::Time { hour, minute, second } => WireArg::Struct(vec![
                WireArg::Byte(*hour),
                WireArg::Byte(*minute),
                WireArg::Byte(*second),
            ]),
            Self::Date { day, month, year } => WireArg::Struct(vec![
                WireArg::Byte(*day),
                WireArg::Byte(*month),
                WireArg::Uint16(*year),
            ]),
        }
    }

    /// Script-side view of the value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i as i64),
            Self::Uint16(q) => Value::UInt(*q as u64),
            Self::Num(d) => Value::Num(*d),
            Self::Str(s) => Value::str(s),
            Self::Time { hour, minute, second } => Value::obj([
                ("hour", Value::UInt(*hour as u64)),
                ("minute", Value::UInt(*minute as u64)),
                ("second", Value::UInt(*second as u64)),
            ]),
            Self::Date { day, month, year } => Value::obj([
                ("day", Value::UInt(*day as u64)),
                ("month", Value::UInt(*month as u64)),
                ("year", Value::UInt(*year as u64)),
            ]),
        }
    }
}

/// Range constraint for numeric property widgets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub increment: f64,
}

#[derive(Debug)]
pub struct Widget {
    pub kind: WidgetKind,
    pub label: String,
    /// Object path, synthesized by `load`.
    pub path: String,
    /// Layout hints forwarded verbatim to controllers.
    pub hints: Vec<u32>,
    pub color: Option<u32>,
    pub bg_color: Option<u32>,
    pub enabled: bool,
    pub writeable: bool,
    pub parent: Option<usize>,
    pub value: Option<WidgetValue>,
    pub range: Option<Range>,
    pub on_value_changed: Option<CallbackRef>,
    pub on_action: Option<CallbackRef>,
}

impl Widget {
    pub fn new(kind: WidgetKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_owned(),
            path: String::new(),
            hints: Vec::new(),
            color: None,
            bg_color: None,
            enabled: true,
            writeable: kind == WidgetKind::Property,
            parent: None,
            value: None,
            range: None,
            on_value_changed: None,
            on_action: None,
        }
    }

    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_value(mut self, value: WidgetValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64, increment: f64) -> Self {
        self.range = Some(Range { min, max, increment });
        self
    }

    pub fn with_hints(mut self, hints: Vec<u32>) -> Self {
        self.hints = hints;
        self
    }

    pub fn on_value_changed(mut self, callback: CallbackRef) -> Self {
        self.on_value_changed = Some(callback);
        self
    }

    pub fn on_action(mut self, callback: CallbackRef) -> Self {
        self.on_action = Some(callback);
        self
    }
}

#[derive(Debug, Default)]
pub struct ControlPanel {
    widgets: Vec<Widget>,
    loaded: bool,
    /// Session of the joined controller; zero means announce-only.
    pub session: SessionId,
}

impl ControlPanel {
    /// Add a widget to the tree being described. Returns its index, used
    /// as the parent reference for children.
    pub fn add_widget(&mut self, widget: Widget) -> usize {
        self.widgets.push(widget);
        self.widgets.len() - 1
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn widget(&self, index: usize) -> Option<&Widget> {
        self.widgets.get(index)
    }

    pub fn widget_by_path(&self, path: &str) -> Option<usize> {
        self.widgets.iter().position(|w| w.path == path)
    }

    /// The widget object list fed to About once loaded.
    pub fn announced_objects(&self) -> Vec<AnnouncedObject> {
        if !self.loaded {
            return Vec::new();
        }
        self.widgets
            .iter()
            .map(|w| AnnouncedObject {
                path: w.path.clone(),
                interfaces: vec![w.kind.interface().to_owned()],
            })
            .collect()
    }

    /// Synthesize object paths for the whole tree: the root container at a
    /// fixed path, every child under its parent keyed by index.
    fn assign_paths(&mut self) {
        let mut child_counts = vec![0usize; self.widgets.len()];
        for i in 0..self.widgets.len() {
            match self.widgets[i].parent {
                None => {
                    self.widgets[i].path = if i == 0 {
                        PANEL_ROOT.to_owned()
                    } else {
                        format!("{PANEL_ROOT}{i}")
                    };
                }
                Some(parent) => {
                    let n = child_counts[parent];
                    child_counts[parent] += 1;
                    self.widgets[i].path =
                        format!("{}/{}", self.widgets[parent].path, n);
                }
            }
        }
    }

    pub fn terminate(&mut self) {
        self.widgets.clear();
        self.loaded = false;
        self.session = 0;
    }
}

/// `load()`: walk the widget tree, build the object list, register it and
/// begin announcing.
pub fn load(core: &mut Core) -> CoreResult<()> {
    if core.panel.widgets.is_empty() {
        return Err(CoreError::Invalid);
    }
    core.panel.assign_paths();
    core.panel.loaded = true;
    let objects = core.panel.announced_objects();
    debug!(widgets = objects.len(), "control panel loaded");
    core.bus.register_objects(SLOT_PANEL, objects);
    core.bus.bind_session_port(CONTROL_PORT)?;
    core.announce_pending = true;
    Ok(())
}

/// Try to claim an `AcceptSession` for the control-panel port.
pub fn handle_accept(
    core: &mut Core,
    port: u16,
    session: SessionId,
    joiner: &str,
) -> Option<CoreResult<()>> {
    if port != CONTROL_PORT || !core.panel.loaded {
        return None;
    }
    debug!(session, joiner, "controller joined");
    core.panel.session = session;
    Some(core.bus.accept_session_reply(session, true))
}

/// Round to the widget's increment (integer division truncates toward
/// zero) and clamp into `[min, max]`. The arithmetic is widened and
/// saturating so near-boundary values cannot wrap.
fn clamp_int(value: i32, range: &Range) -> i32 {
    let min = range.min as i64;
    let max = range.max as i64;
    let inc = (range.increment as i64).max(1);
    let stepped = (i64::from(value).saturating_add(inc / 2) / inc).saturating_mul(inc);
    stepped.clamp(min, max) as i32
}

/// Double-valued widgets are offset by half an increment and clamped;
/// only the integer path snaps to the increment grid.
fn clamp_num(value: f64, range: &Range) -> f64 {
    let inc = range.increment;
    let stepped = if inc > 0.0 { inc * ((value + inc / 2.0) / inc) } else { value };
    stepped.clamp(range.min, range.max)
}

/// Convert an inbound variant into the widget's value kind, applying the
/// configured range.
fn incoming_value(widget: &Widget, arg: &WireArg) -> CoreResult<WidgetValue> {
    let current = widget.value.as_ref().ok_or(CoreError::Invalid)?;
    let value = marshal::wire_to_value(match arg {
        WireArg::Variant(_, inner) => inner.as_ref(),
        other => other,
    });
    let next = match current {
        WidgetValue::Bool(_) => WidgetValue::Bool(value.as_bool().ok_or(CoreError::Invalid)?),
        WidgetValue::Int(_) => {
            let raw = value.as_i64().ok_or(CoreError::Invalid)?;
            let raw = i32::try_from(raw).map_err(|_| CoreError::Invalid)?;
            let clamped = match &widget.range {
                Some(range) => clamp_int(raw, range),
                None => raw,
            };
            WidgetValue::Int(clamped)
        }
        WidgetValue::Uint16(_) => {
            let raw = value.as_u64().ok_or(CoreError::Invalid)?;
            WidgetValue::Uint16(u16::try_from(raw).map_err(|_| CoreError::Invalid)?)
        }
        WidgetValue::Num(_) => {
            let raw = value.as_f64().ok_or(CoreError::Invalid)?;
            let clamped = match &widget.range {
                Some(range) => clamp_num(raw, range),
                None => raw,
            };
            WidgetValue::Num(clamped)
        }
        WidgetValue::Str(_) => {
            WidgetValue::Str(value.as_str().ok_or(CoreError::Invalid)?.to_owned())
        }
        WidgetValue::Time { .. } => WidgetValue::Time {
            hour: field_u8(&value, "hour")?,
            minute: field_u8(&value, "minute")?,
            second: field_u8(&value, "second")?,
        },
        WidgetValue::Date { .. } => {
            let mut year = field_u16(&value, "year")?;
            if year < 100 {
                year += 2000;
            }
            WidgetValue::Date {
                day: field_u8(&value, "day")?,
                month: field_u8(&value, "month")?,
                year,
            }
        }
    };
    Ok(next)
}

fn field_u8(value: &Value, key: &str) -> CoreResult<u8> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or(CoreError::Invalid)
}

fn field_u16(value: &Value, key: &str) -> CoreResult<u16> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or(CoreError::Invalid)
}

/// Emit `valueChanged` toward the joined controller.
fn signal_value_changed(core: &mut Core, index: usize) -> CoreResult<()> {
    let Some(widget) = core.panel.widgets.get(index) else {
        return Err(CoreError::Invalid);
    };
    let Some(value) = widget.value.as_ref() else {
        return Err(CoreError::Invalid);
    };
    let path = widget.path.clone();
    let iface = widget.kind.interface();
    let sig = value.signature().to_owned();
    let wire = value.to_wire();
    let session = core.panel.session;
    let serial = core.bus.next_serial();
    let msg = Msg::signal(serial, "", &path, iface, "ValueChanged", session)
        .arg(WireArg::Variant(sig, Box::new(wire)));
    core.bus.deliver(msg)
}

/// Emit `metadataChanged` after a script-side label/enabled update.
pub fn signal_metadata_changed(core: &mut Core, index: usize) -> CoreResult<()> {
    let Some(widget) = core.panel.widgets.get(index) else {
        return Err(CoreError::Invalid);
    };
    let path = widget.path.clone();
    let iface = widget.kind.interface();
    let session = core.panel.session;
    let serial = core.bus.next_serial();
    let msg = Msg::signal(serial, "", &path, iface, "MetadataChanged", session);
    core.bus.deliver(msg)
}

/// Script-side value update (bypasses range clamping: the script owns the
/// widget).
pub fn set_widget_value(core: &mut Core, index: usize, value: WidgetValue) -> CoreResult<()> {
    let widget = core.panel.widgets.get_mut(index).ok_or(CoreError::Invalid)?;
    widget.value = Some(value);
    if core.panel.loaded {
        signal_value_changed(core, index)?;
    }
    Ok(())
}

/// Route an inbound message to the widget service. Returns the script
/// callbacks to invoke.
pub fn handle_msg(core: &mut Core, msg: &Msg) -> CoreResult<Vec<PendingCall>> {
    if !core.panel.loaded {
        return Err(CoreError::NoMatch);
    }
    let Some(index) = core.panel.widget_by_path(&msg.hdr.path) else {
        return Err(CoreError::NoMatch);
    };

    if msg.hdr.iface == PROPERTIES_IFACE {
        return match msg.hdr.member.as_str() {
            "Get" => {
                let prop = msg.body.get(1).and_then(|a| a.as_str()).unwrap_or_default();
                widget_prop_get(core, index, prop, msg).map(|()| Vec::new())
            }
            "Set" => widget_prop_set(core, index, msg),
            _ => Err(CoreError::NoMatch),
        };
    }
    // Action/dialog execution.
    if msg.hdr.member == "Exec" {
        let widget = core.panel.widgets.get(index).ok_or(CoreError::Invalid)?;
        if !matches!(widget.kind, WidgetKind::Action | WidgetKind::Dialog) {
            return Err(CoreError::NoMatch);
        }
        let callback = widget.on_action;
        let serial = core.bus.next_serial();
        core.bus.deliver(Msg::reply_to(&msg.hdr, serial))?;
        let mut calls = Vec::new();
        if let Some(callback) = callback {
            calls.push(PendingCall { callback, args: Vec::new() });
        }
        return Ok(calls);
    }
    Err(CoreError::NoMatch)
}

fn widget_prop_get(core: &mut Core, index: usize, prop: &str, msg: &Msg) -> CoreResult<()> {
    let widget = core.panel.widgets.get(index).ok_or(CoreError::Invalid)?;
    let value = match prop {
        "Value" => match &widget.value {
            Some(v) => WireArg::Variant(v.signature().to_owned(), Box::new(v.to_wire())),
            None => return core.error_reply(&msg.hdr, ERROR_REJECTED, "no value"),
        },
        "Label" => WireArg::Variant(
            "s".into(),
            Box::new(WireArg::Str(widget.label.clone())),
        ),
        "States" => WireArg::Variant(
            "u".into(),
            Box::new(WireArg::Uint32(
                (widget.enabled as u32) | ((widget.writeable as u32) << 1),
            )),
        ),
        _ => return core.error_reply(&msg.hdr, ERROR_REJECTED, "unknown widget property"),
    };
    let serial = core.bus.next_serial();
    let reply = Msg::reply_to(&msg.hdr, serial).arg(value);
    core.bus.deliver(reply)
}

fn widget_prop_set(core: &mut Core, index: usize, msg: &Msg) -> CoreResult<Vec<PendingCall>> {
    let prop = msg.body.get(1).and_then(|a| a.as_str()).unwrap_or_default();
    if prop != "Value" {
        core.error_reply(&msg.hdr, ERROR_REJECTED, "read-only widget property")?;
        return Ok(Vec::new());
    }
    let arg = msg.body.get(2).ok_or(CoreError::Invalid)?.clone();
    let (callback, next) = {
        let widget = core.panel.widgets.get(index).ok_or(CoreError::Invalid)?;
        if !widget.writeable || !widget.enabled {
            core.error_reply(&msg.hdr, ERROR_REJECTED, "widget not writeable")?;
            return Ok(Vec::new());
        }
        match incoming_value(widget, &arg) {
            Ok(next) => (widget.on_value_changed, next),
            Err(e) => {
                warn!(path = %msg.hdr.path, "bad widget value");
                core.error_reply(&msg.hdr, ERROR_REJECTED, e.as_str())?;
                return Ok(Vec::new());
            }
        }
    };
    if let Some(widget) = core.panel.widgets.get_mut(index) {
        widget.value = Some(next.clone());
    }
    let serial = core.bus.next_serial();
    core.bus.deliver(Msg::reply_to(&msg.hdr, serial))?;
    signal_value_changed(core, index)?;
    let mut calls = Vec::new();
    match callback {
        Some(callback) => calls.push(PendingCall {
            callback,
            args: vec![next.to_value()],
        }),
        // A write that lands before the script registered its handler is
        // dropped; the race is reported, never queued.
        None => warn!(path = %msg.hdr.path, "value changed before handler registered"),
    }
    Ok(calls)
}

#[cfg(test)]
#[path = "ctrlpanel_tests.rs"]
mod tests;
