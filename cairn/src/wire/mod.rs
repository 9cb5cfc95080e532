/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The vnode attribute-list model shared by the wire codec and the
//! vnode-definition file parser.
//!
//! Both surfaces produce the same shape: a modification time plus a list
//! of vnodes, each carrying `(name, value, type, flags)` attribute tuples.
//! Values stay strings here; typed interpretation happens when a snapshot
//! is built from the list.

pub mod dis;
pub mod vndef;

use std::collections::HashMap;

use crate::release::{VnodeMap, VnodeMeta};

// ── Attribute type codes ──────────────────────────────────────────────────────

/// Attribute type codes carried on the wire (version 4) and produced by
/// the definition-file `type = <name>` clause.
pub mod attr_type {
    pub const UNSPECIFIED: i32 = 0;
    pub const LONG: i32 = 1;
    pub const FLOAT: i32 = 2;
    pub const STRING: i32 = 3;
    pub const STRING_ARRAY: i32 = 4;
    pub const SIZE: i32 = 5;
    pub const BOOLEAN: i32 = 11;
}

/// Map a definition-file type name to its code.
pub fn type_code_for(name: &str) -> Option<i32> {
    match name {
        "long" => Some(attr_type::LONG),
        "float" => Some(attr_type::FLOAT),
        "string" => Some(attr_type::STRING),
        "string_array" => Some(attr_type::STRING_ARRAY),
        "size" => Some(attr_type::SIZE),
        "boolean" => Some(attr_type::BOOLEAN),
        _ => None,
    }
}

// ── Model ─────────────────────────────────────────────────────────────────────

/// One attribute or resource on a vnode.
#[derive(Debug, Clone, PartialEq)]
pub struct VnodeAttr {
    pub name: String,
    pub value: String,
    /// Type code; [`attr_type::UNSPECIFIED`] when the source carried none.
    pub type_code: i32,
    /// Reserved on the wire; always 0 today.
    pub flags: i32,
}

impl VnodeAttr {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        VnodeAttr {
            name: name.into(),
            value: value.into(),
            type_code: attr_type::UNSPECIFIED,
            flags: 0,
        }
    }
}

/// One vnode with its attribute list.
#[derive(Debug, Clone, PartialEq)]
pub struct VnodeEntry {
    pub id: String,
    pub attrs: Vec<VnodeAttr>,
}

impl VnodeEntry {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// A complete vnode list: what one mom reports, or one definition file
/// declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VnodeDefList {
    /// Seconds since the epoch when the source was last modified.
    pub modtime: i64,
    pub vnodes: Vec<VnodeEntry>,
}

impl VnodeDefList {
    pub fn find(&self, id: &str) -> Option<&VnodeEntry> {
        self.vnodes.iter().find(|v| v.id == id)
    }

    /// Insert an attribute, creating the vnode entry on first sight and
    /// replacing an existing attribute of the same name.
    pub fn set_attr(&mut self, id: &str, attr: VnodeAttr) {
        match self.vnodes.iter_mut().find(|v| v.id == id) {
            Some(entry) => match entry.attrs.iter_mut().find(|a| a.name == attr.name) {
                Some(existing) => *existing = attr,
                None => entry.attrs.push(attr),
            },
            None => self.vnodes.push(VnodeEntry {
                id: id.to_string(),
                attrs: vec![attr],
            }),
        }
    }

    /// Derive the release engine's vnode metadata: the managing mom from
    /// `Mom` (falling back to `resources_available.host`), the type from
    /// `resources_available.vntype`.
    pub fn release_meta(&self) -> VnodeMap {
        let mut map: VnodeMap = HashMap::new();
        for v in &self.vnodes {
            let mom = v
                .attr("Mom")
                .or_else(|| v.attr("resources_available.host"))
                .unwrap_or_default()
                .to_string();
            let vntype = v.attr("resources_available.vntype").map(|s| s.to_string());
            map.insert(
                v.id.clone(),
                VnodeMeta {
                    parent_mom: mom,
                    vntype,
                },
            );
        }
        map
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_attr_creates_then_replaces() {
        let mut vnl = VnodeDefList::default();
        vnl.set_attr("v1", VnodeAttr::new("resources_available.ncpus", "4"));
        vnl.set_attr("v1", VnodeAttr::new("resources_available.ncpus", "8"));
        vnl.set_attr("v1", VnodeAttr::new("sharing", "default_shared"));
        let v1 = vnl.find("v1").unwrap();
        assert_eq!(v1.attrs.len(), 2);
        assert_eq!(v1.attr("resources_available.ncpus"), Some("8"));
    }

    #[test]
    fn release_meta_prefers_mom_attribute() {
        let mut vnl = VnodeDefList::default();
        vnl.set_attr("v1", VnodeAttr::new("Mom", "hostA.example.com"));
        vnl.set_attr("v1", VnodeAttr::new("resources_available.host", "hostA"));
        vnl.set_attr("v2", VnodeAttr::new("resources_available.host", "hostB"));
        vnl.set_attr("v2", VnodeAttr::new("resources_available.vntype", "cray_compute"));
        let map = vnl.release_meta();
        assert_eq!(map["v1"].parent_mom, "hostA.example.com");
        assert_eq!(map["v2"].parent_mom, "hostB");
        assert_eq!(map["v2"].vntype.as_deref(), Some("cray_compute"));
    }

    #[test]
    fn type_names_map_to_codes() {
        assert_eq!(type_code_for("size"), Some(attr_type::SIZE));
        assert_eq!(type_code_for("boolean"), Some(attr_type::BOOLEAN));
        assert_eq!(type_code_for("quux"), None);
    }
}
