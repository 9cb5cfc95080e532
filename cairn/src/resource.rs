/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Typed resource values, definitions, and the matching primitives.
//!
//! Everything the engine reasons about — cpus, memory, architectures,
//! provisioning environments — is a [`Resource`] on some vnode (or an
//! aggregate over vnodes), described by a [`ResourceDef`] in the
//! [`ResDefTable`].  A resource carries an *available* quantity and an
//! *assigned* quantity; consumables aggregate and subtract, non-consumables
//! match by value.
//!
//! The matching primitives at the bottom of this module
//! ([`match_resource`], [`check_avail_resources`]) answer the engine's one
//! recurring question: *how many whole chunks of this request fit in that
//! resource list?*  `f64::INFINITY` is the "unlimited / unset" sentinel
//! throughout, mirroring the semantics of an unset `resources_available`
//! entry.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::error::{FailCode, ParseError, SchedError, Severity};

/// Index of a [`ResourceDef`] inside the [`ResDefTable`].
pub type DefId = usize;

/// Unlimited / unset amount sentinel.
pub const UNLIMITED: f64 = f64::INFINITY;

// ── Resource definitions ──────────────────────────────────────────────────────

/// The value shape of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResKind {
    Boolean,
    Long,
    Float,
    /// Byte size, stored kilobyte-granular.
    Size,
    String,
    /// Comma-separated set of strings; a request matches if its value is a
    /// member.
    StringSet,
}

impl ResKind {
    pub fn is_consumable_kind(self) -> bool {
        matches!(self, ResKind::Long | ResKind::Float | ResKind::Size)
    }
}

/// Schema entry naming a resource and fixing its behavior.
#[derive(Debug, Clone)]
pub struct ResourceDef {
    pub name: String,
    pub kind: ResKind,
    /// Consumables aggregate into assigned amounts; non-consumables match.
    pub consumable: bool,
    /// Host-level resources live on the natural vnode of a host.
    pub host_level: bool,
    /// Summed over the whole select when accounting at job level.
    pub rassn: bool,
}

/// The resource schema: built-in definitions plus any added by
/// configuration.  Definitions are append-only for the lifetime of a
/// snapshot so a [`DefId`] stays valid.
#[derive(Debug, Clone)]
pub struct ResDefTable {
    defs: Vec<ResourceDef>,
    by_name: HashMap<String, DefId>,
}

impl ResDefTable {
    /// Table pre-populated with the definitions every cluster carries.
    pub fn with_builtins() -> Self {
        let mut t = Self {
            defs: Vec::new(),
            by_name: HashMap::new(),
        };
        let builtin = [
            ("ncpus", ResKind::Long, true, false, true),
            ("mem", ResKind::Size, true, false, true),
            ("vmem", ResKind::Size, true, false, true),
            ("ngpus", ResKind::Long, true, false, true),
            ("nmics", ResKind::Long, true, false, true),
            ("mpiprocs", ResKind::Long, false, false, false),
            ("arch", ResKind::String, false, false, false),
            ("host", ResKind::String, false, true, false),
            ("vnode", ResKind::String, false, false, false),
            ("aoe", ResKind::StringSet, false, false, false),
            ("eoe", ResKind::StringSet, false, false, false),
            ("vntype", ResKind::StringSet, false, false, false),
        ];
        for (name, kind, consumable, host_level, rassn) in builtin {
            t.add(ResourceDef {
                name: name.to_string(),
                kind,
                consumable,
                host_level,
                rassn,
            });
        }
        t
    }

    /// Add a definition, returning its id.  Re-adding an existing name
    /// returns the existing id unchanged.
    pub fn add(&mut self, def: ResourceDef) -> DefId {
        if let Some(&id) = self.by_name.get(&def.name) {
            return id;
        }
        let id = self.defs.len();
        self.by_name.insert(def.name.clone(), id);
        self.defs.push(def);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<DefId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: DefId) -> &ResourceDef {
        &self.defs[id]
    }

    pub fn name(&self, id: DefId) -> &str {
        &self.defs[id].name
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

/// Parse a boolean resource value.  Accepts the canonical `True`/`False`
/// plus the usual abbreviations.
pub fn parse_bool(s: &str) -> Result<bool, ParseError> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "y" | "yes" => Ok(true),
        "false" | "f" | "0" | "n" | "no" => Ok(false),
        _ => Err(ParseError::BadValue {
            name: "boolean".to_string(),
            value: s.to_string(),
        }),
    }
}

/// Parse a byte-size string (`100kb`, `8gb`, `42`) into kilobytes.
///
/// A bare number is bytes.  Fractional kilobytes round up — the engine is
/// kilobyte-granular and must never under-account.
pub fn parse_size_kb(s: &str) -> Result<f64, ParseError> {
    let s = s.trim();
    let digits_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, suffix) = s.split_at(digits_end);
    let value: f64 = num.parse().map_err(|_| ParseError::BadValue {
        name: "size".to_string(),
        value: s.to_string(),
    })?;
    let kb = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" | "w" => value / 1024.0,
        "kb" | "kw" => value,
        "mb" | "mw" => value * 1024.0,
        "gb" | "gw" => value * 1024.0 * 1024.0,
        "tb" | "tw" => value * 1024.0 * 1024.0 * 1024.0,
        "pb" | "pw" => value * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => {
            return Err(ParseError::BadValue {
                name: "size".to_string(),
                value: s.to_string(),
            })
        }
    };
    Ok(kb.ceil())
}

/// Parse a value string into the numeric amount used for consumable
/// accounting.  Booleans become 1/0 so they can ride in request lists.
pub fn parse_amount(kind: ResKind, s: &str) -> Result<f64, ParseError> {
    match kind {
        ResKind::Boolean => Ok(if parse_bool(s)? { 1.0 } else { 0.0 }),
        ResKind::Long | ResKind::Float => s.trim().parse().map_err(|_| ParseError::BadValue {
            name: "number".to_string(),
            value: s.to_string(),
        }),
        ResKind::Size => parse_size_kb(s),
        ResKind::String | ResKind::StringSet => Ok(0.0),
    }
}

/// Render a consumable amount back into its canonical string form.
pub fn amount_to_str(kind: ResKind, amount: f64) -> String {
    match kind {
        ResKind::Size => format!("{:.0}kb", amount.ceil()),
        ResKind::Float => {
            if amount.fract() == 0.0 {
                format!("{:.0}", amount)
            } else {
                format!("{}", amount)
            }
        }
        _ => format!("{:.0}", amount.ceil()),
    }
}

// ── Resource & request ────────────────────────────────────────────────────────

/// One resource instance on a vnode or aggregate.
///
/// `avail`/`assigned` carry the consumable quantities; `str_avail` carries
/// the value strings used for non-consumable matching (a string-set keeps
/// one entry per member).  `indirect` points at the vnode whose same-named
/// resource is the truth for this one; reads and writes forward one hop
/// (cycles are rejected when the snapshot is built).
#[derive(Debug, Clone)]
pub struct Resource {
    pub def: DefId,
    pub avail: f64,
    pub assigned: f64,
    pub str_avail: Vec<String>,
    pub indirect: Option<usize>,
}

impl Resource {
    pub fn new(def: DefId) -> Self {
        Self {
            def,
            avail: UNLIMITED,
            assigned: 0.0,
            str_avail: Vec::new(),
            indirect: None,
        }
    }

    /// Construct with an availability parsed from `text`.
    pub fn with_avail(def: DefId, kind: ResKind, text: &str) -> Result<Self, ParseError> {
        let mut r = Self::new(def);
        r.set_avail(kind, text)?;
        Ok(r)
    }

    /// Parse `text` into the availability fields for this resource's kind.
    pub fn set_avail(&mut self, kind: ResKind, text: &str) -> Result<(), ParseError> {
        self.str_avail = match kind {
            ResKind::StringSet => text.split(',').map(|s| s.trim().to_string()).collect(),
            _ => vec![text.trim().to_string()],
        };
        self.avail = match kind {
            ResKind::String | ResKind::StringSet => UNLIMITED,
            _ => parse_amount(kind, text)?,
        };
        Ok(())
    }
}

/// One requested resource inside a chunk: the definition, the numeric
/// amount (consumables), and the raw value string (non-consumables).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReq {
    pub def: DefId,
    pub amount: f64,
    pub str_val: String,
}

impl ResourceReq {
    pub fn parse(defs: &ResDefTable, def: DefId, value: &str) -> Result<Self, ParseError> {
        let kind = defs.get(def).kind;
        Ok(Self {
            def,
            amount: parse_amount(kind, value).map_err(|_| ParseError::BadValue {
                name: defs.name(def).to_string(),
                value: value.to_string(),
            })?,
            str_val: value.to_string(),
        })
    }
}

/// Find a resource by definition in a list.
pub fn find_resource(list: &[Resource], def: DefId) -> Option<&Resource> {
    list.iter().find(|r| r.def == def)
}

pub fn find_resource_mut(list: &mut [Resource], def: DefId) -> Option<&mut Resource> {
    list.iter_mut().find(|r| r.def == def)
}

/// `max(0, avail − assigned)`, preserving the unlimited sentinel.
pub fn dynamic_avail(res: &Resource) -> f64 {
    if res.avail == UNLIMITED {
        UNLIMITED
    } else if res.avail - res.assigned <= 0.0 {
        0.0
    } else {
        res.avail - res.assigned
    }
}

// ── Matching ──────────────────────────────────────────────────────────────────

/// Behavior switches for [`check_avail_resources`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckFlags {
    /// Match every boolean request even when a checklist excludes it.
    pub check_all_bools: bool,
    /// A missing resource counts as zero / empty-string / false instead of
    /// unlimited.
    pub unset_res_zero: bool,
    /// Compare against `avail`, ignoring `assigned`.
    pub compare_total: bool,
    /// Collect every mismatch instead of stopping at the first.
    pub return_all_err: bool,
    /// Restrict matching to consumables only.
    pub only_cons: bool,
    /// Restrict matching to non-consumables only.
    pub only_noncons: bool,
}

impl CheckFlags {
    pub const NONE: CheckFlags = CheckFlags {
        check_all_bools: false,
        unset_res_zero: false,
        compare_total: false,
        return_all_err: false,
        only_cons: false,
        only_noncons: false,
    };
}

/// Compare a non-consumable resource against a request.
fn compare_non_consumable(defs: &ResDefTable, res: &Resource, req: &ResourceReq) -> bool {
    match defs.get(req.def).kind {
        ResKind::Boolean => {
            let avail = res
                .str_avail
                .first()
                .and_then(|s| parse_bool(s).ok())
                .unwrap_or(false);
            let wanted = parse_bool(&req.str_val).unwrap_or(false);
            avail == wanted
        }
        ResKind::StringSet => res
            .str_avail
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&req.str_val)),
        _ => res
            .str_avail
            .first()
            .map(|s| s.eq_ignore_ascii_case(&req.str_val))
            .unwrap_or(false),
    }
}

/// Stand-in used when `unset_res_zero` turns a missing resource into a
/// concrete zero / false / empty-string value.
fn unset_stand_in(def: DefId, kind: ResKind) -> Resource {
    let mut r = Resource::new(def);
    match kind {
        ResKind::Boolean => {
            r.avail = 0.0;
            r.str_avail = vec!["false".to_string()];
        }
        ResKind::String | ResKind::StringSet => {
            r.str_avail = vec![String::new()];
        }
        _ => r.avail = 0.0,
    }
    r
}

/// Match one request against one resource.
///
/// Returns the number of whole chunks of `req` obtainable from `res`:
/// [`UNLIMITED`] for a matched non-consumable (or an unlimited consumable),
/// `0.0` on a mismatch (with `err` filled when provided).
pub fn match_resource(
    defs: &ResDefTable,
    res: &Resource,
    req: &ResourceReq,
    flags: CheckFlags,
    fail_code: FailCode,
    err: Option<&mut SchedError>,
) -> f64 {
    let def = defs.get(res.def);
    if !def.consumable && !flags.only_cons {
        if !compare_non_consumable(defs, res, req) {
            if let Some(err) = err {
                err.set(Severity::NotRun, fail_code);
                err.rdef = Some(def.name.clone());
                err.arg1 = Some(format!(
                    "({} != {})",
                    req.str_val,
                    res.str_avail.join(",")
                ));
                if def.name == "host" || def.name == "vnode" {
                    err.arg2 = Some(req.str_val.clone());
                }
            }
            return 0.0;
        }
        UNLIMITED
    } else if def.consumable && !flags.only_noncons {
        let mut avail = if flags.compare_total {
            res.avail
        } else {
            dynamic_avail(res)
        };
        if avail == UNLIMITED && flags.unset_res_zero {
            avail = 0.0;
        }
        if avail == UNLIMITED || req.amount == 0.0 {
            return UNLIMITED;
        }
        if avail < req.amount {
            if let Some(err) = err {
                err.set(Severity::NotRun, fail_code);
                err.rdef = Some(def.name.clone());
                let total = if flags.unset_res_zero && res.avail == UNLIMITED {
                    0.0
                } else {
                    res.avail
                };
                err.arg1 = Some(format!(
                    "(R: {} A: {} T: {})",
                    amount_to_str(def.kind, req.amount),
                    amount_to_str(def.kind, avail),
                    amount_to_str(def.kind, total)
                ));
            }
            0.0
        } else {
            (avail / req.amount).floor()
        }
    } else {
        UNLIMITED
    }
}

/// How many whole multiples of `reqlist` fit in `reslist`.
///
/// The minimum over every checked request of [`match_resource`].  With
/// `checklist` set, only listed definitions are compared (booleans are
/// still compared when `check_all_bools` is on).  With
/// `flags.return_all_err` and `all_errs` provided, every mismatch is
/// collected; otherwise matching stops at the first.
pub fn check_avail_resources(
    defs: &ResDefTable,
    reslist: &[Resource],
    reqlist: &[ResourceReq],
    flags: CheckFlags,
    checklist: Option<&HashSet<DefId>>,
    fail_code: FailCode,
    mut err: Option<&mut SchedError>,
    mut all_errs: Option<&mut Vec<SchedError>>,
) -> f64 {
    let mut num_chunks = UNLIMITED;
    let mut any_fail = false;

    for req in reqlist {
        let def = defs.get(req.def);
        if let Some(list) = checklist {
            let boolean_override = flags.check_all_bools && def.kind == ResKind::Boolean;
            if !boolean_override && !list.contains(&req.def) {
                continue;
            }
        }

        let stand_in;
        let res = match find_resource(reslist, req.def) {
            Some(r) => r,
            None => {
                if !flags.unset_res_zero {
                    continue;
                }
                stand_in = unset_stand_in(req.def, def.kind);
                &stand_in
            }
        };

        let matched = match_resource(defs, res, req, flags, fail_code, err.as_deref_mut());

        if matched < num_chunks {
            num_chunks = matched;
        }

        if matched == 0.0 {
            any_fail = true;
            if flags.return_all_err {
                if let (Some(errs), Some(e)) = (all_errs.as_deref_mut(), err.as_deref_mut()) {
                    errs.push(e.take());
                }
            } else {
                break;
            }
        }
    }

    if any_fail {
        0.0
    } else {
        num_chunks
    }
}

/// Fold `other` into `acc`, summing consumable availability (and assigned
/// amounts when `include_assigned` is set) and OR-ing booleans.  Used to
/// maintain placement-set aggregates.
pub fn add_resource_list(
    defs: &ResDefTable,
    acc: &mut Vec<Resource>,
    other: &[Resource],
    include_assigned: bool,
) {
    for res in other {
        let def = defs.get(res.def);
        match find_resource_mut(acc, res.def) {
            Some(target) => {
                if def.consumable {
                    if res.avail == UNLIMITED || target.avail == UNLIMITED {
                        target.avail = UNLIMITED;
                    } else {
                        target.avail += res.avail;
                    }
                    if include_assigned {
                        target.assigned += res.assigned;
                    }
                } else if def.kind == ResKind::Boolean {
                    let a = target
                        .str_avail
                        .first()
                        .and_then(|s| parse_bool(s).ok())
                        .unwrap_or(false);
                    let b = res
                        .str_avail
                        .first()
                        .and_then(|s| parse_bool(s).ok())
                        .unwrap_or(false);
                    target.str_avail = vec![if a || b { "true" } else { "false" }.to_string()];
                } else {
                    for v in &res.str_avail {
                        if !target.str_avail.iter().any(|t| t.eq_ignore_ascii_case(v)) {
                            target.str_avail.push(v.clone());
                        }
                    }
                }
            }
            None => {
                let mut cloned = res.clone();
                cloned.indirect = None;
                if !include_assigned {
                    cloned.assigned = 0.0;
                }
                acc.push(cloned);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResDefTable {
        ResDefTable::with_builtins()
    }

    // ── Value parsing ─────────────────────────────────────────────────────────

    #[test]
    fn size_parses_common_suffixes_to_kb() {
        assert_eq!(parse_size_kb("100kb").unwrap(), 100.0);
        assert_eq!(parse_size_kb("2mb").unwrap(), 2048.0);
        assert_eq!(parse_size_kb("8gb").unwrap(), 8.0 * 1024.0 * 1024.0);
        assert_eq!(parse_size_kb("1tb").unwrap(), 1024.0 * 1024.0 * 1024.0);
    }

    #[test]
    fn bare_size_is_bytes_rounded_up_to_kb() {
        assert_eq!(parse_size_kb("1").unwrap(), 1.0);
        assert_eq!(parse_size_kb("1024").unwrap(), 1.0);
        assert_eq!(parse_size_kb("1025").unwrap(), 2.0);
    }

    #[test]
    fn garbage_size_is_rejected() {
        assert!(parse_size_kb("10qb").is_err());
        assert!(parse_size_kb("abc").is_err());
    }

    #[test]
    fn bool_accepts_canonical_and_short_forms() {
        assert!(parse_bool("True").unwrap());
        assert!(parse_bool("t").unwrap());
        assert!(!parse_bool("False").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    // ── dynamic_avail ─────────────────────────────────────────────────────────

    #[test]
    fn dynamic_avail_subtracts_and_clamps() {
        let defs = table();
        let ncpus = defs.lookup("ncpus").unwrap();
        let mut r = Resource::with_avail(ncpus, ResKind::Long, "8").unwrap();
        r.assigned = 3.0;
        assert_eq!(dynamic_avail(&r), 5.0);
        r.assigned = 10.0;
        assert_eq!(dynamic_avail(&r), 0.0);
    }

    #[test]
    fn dynamic_avail_preserves_unlimited() {
        let defs = table();
        let r = Resource::new(defs.lookup("ncpus").unwrap());
        assert_eq!(dynamic_avail(&r), UNLIMITED);
    }

    // ── match_resource ────────────────────────────────────────────────────────

    #[test]
    fn consumable_match_counts_whole_chunks() {
        let defs = table();
        let ncpus = defs.lookup("ncpus").unwrap();
        let res = Resource::with_avail(ncpus, ResKind::Long, "9").unwrap();
        let req = ResourceReq::parse(&defs, ncpus, "2").unwrap();
        let n = match_resource(&defs, &res, &req, CheckFlags::NONE, FailCode::InsufficientResource, None);
        assert_eq!(n, 4.0);
    }

    #[test]
    fn consumable_mismatch_reports_requested_available_total() {
        let defs = table();
        let ncpus = defs.lookup("ncpus").unwrap();
        let mut res = Resource::with_avail(ncpus, ResKind::Long, "8").unwrap();
        res.assigned = 6.0;
        let req = ResourceReq::parse(&defs, ncpus, "4").unwrap();
        let mut err = SchedError::new();
        let n = match_resource(
            &defs,
            &res,
            &req,
            CheckFlags::NONE,
            FailCode::InsufficientResource,
            Some(&mut err),
        );
        assert_eq!(n, 0.0);
        assert_eq!(err.rdef.as_deref(), Some("ncpus"));
        assert_eq!(err.arg1.as_deref(), Some("(R: 4 A: 2 T: 8)"));
    }

    #[test]
    fn string_match_is_caseless() {
        let defs = table();
        let arch = defs.lookup("arch").unwrap();
        let res = Resource::with_avail(arch, ResKind::String, "Linux").unwrap();
        let req = ResourceReq::parse(&defs, arch, "linux").unwrap();
        let n = match_resource(&defs, &res, &req, CheckFlags::NONE, FailCode::InsufficientResource, None);
        assert_eq!(n, UNLIMITED);
    }

    #[test]
    fn string_set_matches_any_member() {
        let defs = table();
        let aoe = defs.lookup("aoe").unwrap();
        let res = Resource::with_avail(aoe, ResKind::StringSet, "rhel8,sles15").unwrap();
        let hit = ResourceReq::parse(&defs, aoe, "sles15").unwrap();
        let miss = ResourceReq::parse(&defs, aoe, "ubuntu").unwrap();
        assert_eq!(
            match_resource(&defs, &res, &hit, CheckFlags::NONE, FailCode::InsufficientResource, None),
            UNLIMITED
        );
        assert_eq!(
            match_resource(&defs, &res, &miss, CheckFlags::NONE, FailCode::InsufficientResource, None),
            0.0
        );
    }

    // ── check_avail_resources ─────────────────────────────────────────────────

    fn reqs(defs: &ResDefTable, pairs: &[(&str, &str)]) -> Vec<ResourceReq> {
        pairs
            .iter()
            .map(|(n, v)| ResourceReq::parse(defs, defs.lookup(n).unwrap(), v).unwrap())
            .collect()
    }

    #[test]
    fn min_over_requests_wins() {
        let defs = table();
        let list = vec![
            Resource::with_avail(defs.lookup("ncpus").unwrap(), ResKind::Long, "8").unwrap(),
            Resource::with_avail(defs.lookup("mem").unwrap(), ResKind::Size, "4gb").unwrap(),
        ];
        let req = reqs(&defs, &[("ncpus", "2"), ("mem", "2gb")]);
        let n = check_avail_resources(
            &defs,
            &list,
            &req,
            CheckFlags::NONE,
            None,
            FailCode::InsufficientResource,
            None,
            None,
        );
        // 4 chunks of cpu, 2 of memory
        assert_eq!(n, 2.0);
    }

    #[test]
    fn unset_res_zero_turns_missing_consumable_into_failure() {
        let defs = table();
        let list = vec![Resource::with_avail(
            defs.lookup("ncpus").unwrap(),
            ResKind::Long,
            "8",
        )
        .unwrap()];
        let req = reqs(&defs, &[("mem", "1gb")]);
        let mut err = SchedError::new();
        let flags = CheckFlags {
            unset_res_zero: true,
            ..CheckFlags::NONE
        };
        let n = check_avail_resources(
            &defs,
            &list,
            &req,
            flags,
            None,
            FailCode::InsufficientResource,
            Some(&mut err),
            None,
        );
        assert_eq!(n, 0.0);
        assert_eq!(err.rdef.as_deref(), Some("mem"));
    }

    #[test]
    fn missing_resource_without_unset_zero_is_unlimited() {
        let defs = table();
        let list: Vec<Resource> = Vec::new();
        let req = reqs(&defs, &[("mem", "1gb")]);
        let n = check_avail_resources(
            &defs,
            &list,
            &req,
            CheckFlags::NONE,
            None,
            FailCode::InsufficientResource,
            None,
            None,
        );
        assert_eq!(n, UNLIMITED);
    }

    #[test]
    fn compare_total_ignores_assigned() {
        let defs = table();
        let ncpus = defs.lookup("ncpus").unwrap();
        let mut res = Resource::with_avail(ncpus, ResKind::Long, "8").unwrap();
        res.assigned = 8.0;
        let req = reqs(&defs, &[("ncpus", "4")]);
        let flags = CheckFlags {
            compare_total: true,
            ..CheckFlags::NONE
        };
        let n = check_avail_resources(
            &defs,
            &[res],
            &req,
            flags,
            None,
            FailCode::InsufficientResource,
            None,
            None,
        );
        assert_eq!(n, 2.0);
    }

    #[test]
    fn checklist_restricts_but_bools_override() {
        let mut defs = table();
        let licensed = defs.add(ResourceDef {
            name: "licensed".to_string(),
            kind: ResKind::Boolean,
            consumable: false,
            host_level: false,
            rassn: false,
        });
        let ncpus = defs.lookup("ncpus").unwrap();
        let list = vec![
            Resource::with_avail(ncpus, ResKind::Long, "1").unwrap(),
            Resource::with_avail(licensed, ResKind::Boolean, "false").unwrap(),
        ];
        let req = vec![
            ResourceReq::parse(&defs, ncpus, "8").unwrap(),
            ResourceReq::parse(&defs, licensed, "true").unwrap(),
        ];
        // Checklist contains neither request: ncpus skipped, but the
        // boolean is still matched (and fails).
        let checklist = HashSet::new();
        let flags = CheckFlags {
            check_all_bools: true,
            ..CheckFlags::NONE
        };
        let n = check_avail_resources(
            &defs,
            &list,
            &req,
            flags,
            Some(&checklist),
            FailCode::InsufficientResource,
            None,
            None,
        );
        assert_eq!(n, 0.0);
    }

    #[test]
    fn return_all_err_collects_every_mismatch() {
        let defs = table();
        let list = vec![
            Resource::with_avail(defs.lookup("ncpus").unwrap(), ResKind::Long, "1").unwrap(),
            Resource::with_avail(defs.lookup("mem").unwrap(), ResKind::Size, "1mb").unwrap(),
        ];
        let req = reqs(&defs, &[("ncpus", "4"), ("mem", "1gb")]);
        let mut err = SchedError::new();
        let mut all = Vec::new();
        let flags = CheckFlags {
            return_all_err: true,
            ..CheckFlags::NONE
        };
        let n = check_avail_resources(
            &defs,
            &list,
            &req,
            flags,
            None,
            FailCode::InsufficientResource,
            Some(&mut err),
            Some(&mut all),
        );
        assert_eq!(n, 0.0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].rdef.as_deref(), Some("ncpus"));
        assert_eq!(all[1].rdef.as_deref(), Some("mem"));
    }

    // ── add_resource_list ─────────────────────────────────────────────────────

    #[test]
    fn aggregation_sums_consumables_and_ors_booleans() {
        let mut defs = table();
        let big = defs.add(ResourceDef {
            name: "bigmem".to_string(),
            kind: ResKind::Boolean,
            consumable: false,
            host_level: false,
            rassn: false,
        });
        let ncpus = defs.lookup("ncpus").unwrap();

        let mut acc = vec![
            Resource::with_avail(ncpus, ResKind::Long, "4").unwrap(),
            Resource::with_avail(big, ResKind::Boolean, "false").unwrap(),
        ];
        let other = vec![
            Resource::with_avail(ncpus, ResKind::Long, "4").unwrap(),
            Resource::with_avail(big, ResKind::Boolean, "true").unwrap(),
        ];
        add_resource_list(&defs, &mut acc, &other, false);
        assert_eq!(find_resource(&acc, ncpus).unwrap().avail, 8.0);
        assert_eq!(find_resource(&acc, big).unwrap().str_avail, vec!["true"]);
    }

    #[test]
    fn aggregation_with_assigned_tracks_usage() {
        let defs = table();
        let ncpus = defs.lookup("ncpus").unwrap();
        let mut acc: Vec<Resource> = Vec::new();
        let mut a = Resource::with_avail(ncpus, ResKind::Long, "4").unwrap();
        a.assigned = 2.0;
        add_resource_list(&defs, &mut acc, &[a], true);
        assert_eq!(find_resource(&acc, ncpus).unwrap().assigned, 2.0);
    }
}
