// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object/interface table builder.
//!
//! At script startup the definitions the script registered are expanded
//! into the wire layer's registered-object shape: per-interface member
//! descriptor arrays plus an object list with the standard Properties
//! interface appended. A two-entry proxy table whose path is rewritten
//! before each outbound call lets one wire-layer slot serve any dynamic
//! target path.

use indexmap::IndexMap;
use tracing::{debug, error};

use crate::bus::{AnnouncedObject, PROPERTIES_IFACE};
use crate::error::{CoreError, CoreResult};
use crate::translations::Translations;

/// Wire-layer registration slots.
pub const SLOT_APP: u8 = 0;
pub const SLOT_CONSOLE: u8 = 1;
pub const SLOT_PROXY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Signal,
    Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl Access {
    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "R" => Ok(Self::Read),
            "W" => Ok(Self::Write),
            "RW" => Ok(Self::ReadWrite),
            _ => Err(CoreError::Invalid),
        }
    }

    fn descriptor_char(self) -> char {
        match self {
            Self::Read => '<',
            Self::Write => '>',
            Self::ReadWrite => '=',
        }
    }
}

/// One member of an interface definition.
#[derive(Debug, Clone, Default)]
pub struct MemberDef {
    pub kind: Option<MemberKind>,
    /// In-args for methods, args for signals: `(name, signature)`.
    pub args: Vec<(String, String)>,
    /// Out-args (methods only).
    pub returns: Vec<(String, String)>,
    /// Property signature.
    pub signature: Option<String>,
    pub access: Access,
    /// Optional per-member description served to introspection.
    pub description: Option<String>,
}

impl MemberDef {
    pub fn method() -> Self {
        Self { kind: Some(MemberKind::Method), ..Self::default() }
    }

    pub fn signal() -> Self {
        Self { kind: Some(MemberKind::Signal), ..Self::default() }
    }

    pub fn property(signature: &str, access: Access) -> Self {
        Self {
            kind: Some(MemberKind::Property),
            signature: Some(signature.to_owned()),
            access,
            ..Self::default()
        }
    }

    pub fn arg(mut self, name: &str, sig: &str) -> Self {
        self.args.push((name.to_owned(), sig.to_owned()));
        self
    }

    pub fn ret(mut self, name: &str, sig: &str) -> Self {
        self.returns.push((name.to_owned(), sig.to_owned()));
        self
    }

    /// Concatenated in-signature used to marshal outbound arguments.
    pub fn in_signature(&self) -> String {
        match self.kind {
            Some(MemberKind::Property) => self.signature.clone().unwrap_or_default(),
            _ => self.args.iter().map(|(_, s)| s.as_str()).collect(),
        }
    }

    /// Concatenated out-signature (method returns / property reads).
    pub fn out_signature(&self) -> String {
        match self.kind {
            Some(MemberKind::Property) => self.signature.clone().unwrap_or_default(),
            Some(MemberKind::Signal) => self.args.iter().map(|(_, s)| s.as_str()).collect(),
            _ => self.returns.iter().map(|(_, s)| s.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceDef {
    pub members: IndexMap<String, MemberDef>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectDef {
    pub interfaces: Vec<String>,
    pub description: Option<String>,
}

/// The two script-side definition maps, in declaration order.
#[derive(Debug, Default)]
pub struct Definitions {
    pub interfaces: IndexMap<String, InterfaceDef>,
    pub objects: IndexMap<String, ObjectDef>,
}

impl Definitions {
    /// Find the interface defining `member`, searching `scope` (a service
    /// object's interface list) in order.
    pub fn find_member<'a>(
        &'a self,
        scope: &[String],
        member: &str,
    ) -> Option<(&'a str, &'a MemberDef)> {
        for iface in scope {
            if let Some(def) = self.interfaces.get(iface).and_then(|i| i.members.get(member)) {
                return Some((self.interfaces.get_key_value(iface)?.0.as_str(), def));
            }
        }
        None
    }

    /// Lookup of a fully-qualified member.
    pub fn member(&self, iface: &str, member: &str) -> Option<&MemberDef> {
        self.interfaces.get(iface)?.members.get(member)
    }
}

/// Format one member descriptor string (see the data model):
/// `[?|!]name[ arg<sig]...[ ret>sig]...` or `@name[<|>|=]sig`.
fn member_descriptor(name: &str, def: &MemberDef) -> CoreResult<String> {
    use std::fmt::Write;
    let mut out = String::new();
    match def.kind {
        Some(MemberKind::Property) => {
            let sig = def.signature.as_deref().ok_or(CoreError::Invalid)?;
            let _ = write!(out, "@{name}{}{sig}", def.access.descriptor_char());
        }
        Some(MemberKind::Method) => {
            let _ = write!(out, "?{name}");
            for (arg, sig) in &def.args {
                let _ = write!(out, " {arg}<{sig}");
            }
            for (ret, sig) in &def.returns {
                let _ = write!(out, " {ret}>{sig}");
            }
        }
        Some(MemberKind::Signal) => {
            let _ = write!(out, "!{name}");
            for (arg, sig) in &def.args {
                let _ = write!(out, " {arg}>{sig}");
            }
        }
        None => return Err(CoreError::Invalid),
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct BuiltInterface {
    pub name: String,
    /// Descriptor strings, one per member, in declaration order.
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuiltObject {
    pub path: String,
    /// Indexes into the interface table; the Properties interface is
    /// always appended last.
    pub interfaces: Vec<usize>,
    pub announced: bool,
}

/// The assembled tables handed to the wire layer.
#[derive(Debug, Default)]
pub struct ObjectTables {
    pub interfaces: Vec<BuiltInterface>,
    pub objects: Vec<BuiltObject>,
    /// Rewritable path backing the proxy slot.
    proxy_path: Option<String>,
}

impl ObjectTables {
    /// Expand the script definitions into registered tables.
    ///
    /// Entry 0 of the interface table is the standard Properties
    /// interface; every object references every interface it declares
    /// (unknown names fail) plus Properties, and is marked announced.
    pub fn build(defs: &Definitions) -> CoreResult<Self> {
        let mut interfaces = vec![BuiltInterface {
            name: PROPERTIES_IFACE.to_owned(),
            members: vec![
                "?Get iface<s prop<s value>v".to_owned(),
                "?Set iface<s prop<s value<v".to_owned(),
                "?GetAll iface<s props>a{sv}".to_owned(),
            ],
        }];
        for (name, iface) in &defs.interfaces {
            let mut members = Vec::with_capacity(iface.members.len());
            for (member_name, member) in &iface.members {
                members.push(member_descriptor(member_name, member)?);
            }
            interfaces.push(BuiltInterface { name: name.clone(), members });
            debug!(iface = %name, "built interface");
        }

        let mut objects = Vec::with_capacity(defs.objects.len());
        for (path, object) in &defs.objects {
            let mut indexes = Vec::with_capacity(object.interfaces.len() + 1);
            for iface_name in &object.interfaces {
                let idx = interfaces.iter().position(|i| &i.name == iface_name);
                match idx {
                    Some(idx) => indexes.push(idx),
                    None => {
                        error!(path = %path, iface = %iface_name, "unknown interface");
                        return Err(CoreError::Invalid);
                    }
                }
            }
            indexes.push(0); // Properties.
            objects.push(BuiltObject { path: path.clone(), interfaces: indexes, announced: true });
            debug!(path = %path, "built object");
        }
        Ok(Self { interfaces, objects, proxy_path: None })
    }

    /// The announced-object list fed to About.
    pub fn announced_objects(&self, defs: &Definitions) -> Vec<AnnouncedObject> {
        self.objects
            .iter()
            .filter(|o| o.announced)
            .map(|o| AnnouncedObject {
                path: o.path.clone(),
                interfaces: defs
                    .objects
                    .get(&o.path)
                    .map(|d| d.interfaces.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Whether `path` is one of the registered local objects.
    pub fn has_object(&self, path: &str) -> bool {
        self.objects.iter().any(|o| o.path == path)
    }

    /// Rewrite the proxy slot's path ahead of an outbound call. `"!"` is
    /// the wildcard used while unmarshalling signals from any source path.
    pub fn set_object_path(&mut self, path: Option<&str>) {
        self.proxy_path = path.map(str::to_owned);
    }

    pub fn proxy_path(&self) -> Option<&str> {
        self.proxy_path.as_deref()
    }
}

/// Reference to a describable entity, mirroring the packed description id
/// `(object << 24 | iface << 16 | member << 8 | arg)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescRef {
    pub object: u8,
    /// 1-based; 0 addresses the object itself.
    pub iface: u8,
    /// 1-based; 0 addresses the interface itself.
    pub member: u8,
    /// 1-based; 0 addresses the member itself.
    pub arg: u8,
}

/// Serve a localized description on demand (the callback registered with
/// the wire layer alongside the object tables).
pub fn find_description(
    tables: &ObjectTables,
    defs: &Definitions,
    translations: &Translations,
    desc: DescRef,
    lang: &str,
) -> Option<String> {
    let object = tables.objects.get(desc.object as usize)?;
    let lang_idx = translations.language_index(lang);
    let text = if desc.iface == 0 {
        defs.objects.get(&object.path)?.description.clone()?
    } else {
        let iface_idx = *object.interfaces.get(desc.iface as usize - 1)?;
        let iface_name = &tables.interfaces.get(iface_idx)?.name;
        let iface = defs.interfaces.get(iface_name)?;
        if desc.member == 0 {
            iface.description.clone()?
        } else {
            let (_, member) = iface.members.get_index(desc.member as usize - 1)?;
            if desc.arg == 0 {
                member.description.clone()?
            } else {
                // Args have no individual descriptions; use the name.
                member.args.get(desc.arg as usize - 1)?.0.clone()
            }
        }
    };
    Some(translations.translate(&text, lang_idx).to_owned())
}

#[cfg(test)]
#[path = "tables_tests.rs"]
mod tests;
