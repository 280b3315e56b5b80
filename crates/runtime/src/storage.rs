// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script blob storage over NVRAM.
//!
//! The script lives in three slots: body, length and display name. The
//! length slot is committed last and readers require both body and length,
//! so a reader can never observe a half-written script. Any failure during
//! a streamed install deletes the body, length and name together.

use bytes::Bytes;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::nvram::{self, Nvram, LOCKDOWN_ID, SCRIPT_ID, SCRIPT_NAME_ID, SCRIPT_SIZE_ID};

/// Largest script the store accepts: leave a quarter of NVRAM free for the
/// property store and bus credentials.
pub fn max_script_len(nv: &dyn Nvram) -> usize {
    (3 * nv.remaining()) / 4
}

/// An in-progress streamed install.
///
/// Created by [`begin_install`]; chunks are fed through [`ScriptWriter::write`]
/// and the install becomes visible to readers only after
/// [`ScriptWriter::finish`] commits the length slot.
#[derive(Debug)]
pub struct ScriptWriter {
    expected: u32,
    written: u32,
}

/// Start installing a script of `len` bytes named `name`.
///
/// Fails with `Resources` when `len` exceeds [`max_script_len`]; the name
/// slot is written eagerly so stack traces can refer to it, and is removed
/// again by [`abort_install`] on any failure.
pub fn begin_install(nv: &mut dyn Nvram, name: &str, len: u32) -> CoreResult<ScriptWriter> {
    nv.write(SCRIPT_NAME_ID, name.as_bytes())?;
    if len as usize > max_script_len(nv) {
        warn!(len, max = max_script_len(nv), "script too large");
        nv.delete(SCRIPT_NAME_ID)?;
        return Err(CoreError::Resources);
    }
    nv.create(SCRIPT_ID, len as usize)?;
    Ok(ScriptWriter { expected: len, written: 0 })
}

impl ScriptWriter {
    pub fn write(&mut self, nv: &mut dyn Nvram, chunk: &[u8]) -> CoreResult<()> {
        if self.written + chunk.len() as u32 > self.expected {
            return Err(CoreError::Resources);
        }
        nv.append(SCRIPT_ID, chunk)?;
        self.written += chunk.len() as u32;
        Ok(())
    }

    /// Commit the install: the length slot is written last so the
    /// body+length pair appears atomically.
    pub fn finish(self, nv: &mut dyn Nvram) -> CoreResult<()> {
        if self.written != self.expected {
            return Err(CoreError::Invalid);
        }
        nvram::write_u32(nv, SCRIPT_SIZE_ID, self.written)?;
        nv.commit()?;
        info!(len = self.written, "script installed");
        Ok(())
    }
}

/// Remove a half-written script along with its name and length slots.
pub fn abort_install(nv: &mut dyn Nvram) {
    let _ = nv.delete(SCRIPT_ID);
    let _ = nv.delete(SCRIPT_SIZE_ID);
    let _ = nv.delete(SCRIPT_NAME_ID);
    let _ = nv.commit();
}

/// One-shot install used by the command line launcher.
pub fn install(nv: &mut dyn Nvram, name: &str, body: &[u8]) -> CoreResult<()> {
    let mut writer = begin_install(nv, name, body.len() as u32)?;
    let result = writer.write(nv, body).and_then(|()| writer.finish(nv));
    if result.is_err() {
        abort_install(nv);
    }
    result
}

/// The installed script, or `None` unless both the body and the length slot
/// are present.
pub fn load(nv: &dyn Nvram) -> Option<(String, Bytes)> {
    let body = nv.peek(SCRIPT_ID)?;
    let len = nvram::read_u32(nv, SCRIPT_SIZE_ID)? as usize;
    if len > body.len() {
        warn!(len, body = body.len(), "script length slot disagrees with body");
        return None;
    }
    let name = nv
        .peek(SCRIPT_NAME_ID)
        .and_then(|raw| String::from_utf8(raw.to_vec()).ok())
        .unwrap_or_else(|| "installed-script".to_owned());
    Some((name, body.slice(..len)))
}

/// Display name of the installed script.
pub fn script_name(nv: &dyn Nvram) -> Option<String> {
    nv.peek(SCRIPT_NAME_ID).and_then(|raw| String::from_utf8(raw.to_vec()).ok())
}

/// Delete the installed script (body + length). The name slot is kept so a
/// follow-up install error still has something to report against.
pub fn delete_script(nv: &mut dyn Nvram) -> CoreResult<()> {
    nv.delete(SCRIPT_ID)?;
    nv.delete(SCRIPT_SIZE_ID)?;
    nv.commit()
}

/// Lockdown bit. Once set the console service is never registered again;
/// there is deliberately no recovery path.
pub fn lockdown_state(nv: &dyn Nvram) -> bool {
    nv.peek(LOCKDOWN_ID).map(|raw| raw.first() == Some(&1)).unwrap_or(false)
}

pub fn set_lockdown(nv: &mut dyn Nvram) -> CoreResult<()> {
    nv.write(LOCKDOWN_ID, &[1])
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
