/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The node-release engine: shrink a running job's assignment without
//! breaking its invariants.
//!
//! A running job carries four parallel strings — `exec_vnode`,
//! `exec_host`, `exec_host2`, `schedselect` — whose `+`-separated entries
//! share one super-chunk structure.  Releasing nodes means rewriting all
//! four consistently, plus the complementary `deallocated_execvnode`.
//!
//! Two entry points:
//! * [`release_given_nodelist`] — the user (or the server, on node
//!   failure) names the vnodes to free.
//! * [`release_given_select`] — keep whatever still satisfies a (possibly
//!   reduced) select string, preserving the primary host.
//!
//! The primary execution host (first entry of `exec_host2`) must survive
//! every release; its vnodes are never freed.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::error::ParseError;
use crate::resource::{amount_to_str, parse_amount, ResDefTable, ResKind};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure shapes of the release engine.
#[derive(Debug, Error, PartialEq)]
pub enum ReleaseError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("cannot release vnode '{0}': it belongs to the primary execution host")]
    PrimaryHostVnode(String),

    #[error("cannot release vnode '{0}': cray vnodes cannot be released")]
    CrayVnode(String),

    #[error("could not satisfy the first select chunk on the primary host")]
    PrimaryChunkUnsatisfied,

    #[error("could not satisfy select chunk '{0}'")]
    ChunkUnsatisfied(String),

    #[error("unknown resource '{0}' in select")]
    UnknownResource(String),

    #[error("duplicate resource '{0}' in select chunk")]
    DuplicateResource(String),
}

// ── Vnode metadata ────────────────────────────────────────────────────────────

/// What the engine needs to know about a vnode from the server's vnode
/// data: who manages it and what type it is.
#[derive(Debug, Clone, Default)]
pub struct VnodeMeta {
    /// Managing mom hostname.
    pub parent_mom: String,
    /// The vnode's `vntype` value, when set.
    pub vntype: Option<String>,
}

/// Vnode name → metadata, typically decoded from the vnode list.
pub type VnodeMap = HashMap<String, VnodeMeta>;

/// The four assignment strings of a running job.
#[derive(Debug, Clone)]
pub struct ReleaseInput<'a> {
    pub job_id: &'a str,
    pub exec_vnode: &'a str,
    pub exec_host: &'a str,
    pub exec_host2: &'a str,
    pub schedselect: &'a str,
}

/// The rewritten assignment strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseOutput {
    pub exec_vnode: String,
    pub exec_host: String,
    pub exec_host2: String,
    pub schedselect: String,
    pub deallocated_execvnode: String,
}

// ── exec_vnode parsing ────────────────────────────────────────────────────────

/// One vnode's allocation inside a super-chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct VnodeAlloc {
    pub name: String,
    pub resources: Vec<(String, String)>,
}

/// One parenthesized element of `exec_vnode`.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperChunk {
    pub vnodes: Vec<VnodeAlloc>,
}

impl SuperChunk {
    /// Re-emit the parenthesized form.
    pub fn to_execvnode(&self) -> String {
        let inner: Vec<String> = self
            .vnodes
            .iter()
            .map(|v| {
                let mut s = v.name.clone();
                for (name, val) in &v.resources {
                    s.push(':');
                    s.push_str(name);
                    s.push('=');
                    s.push_str(val);
                }
                s
            })
            .collect();
        format!("({})", inner.join("+"))
    }

    fn lead_vnode(&self) -> &str {
        self.vnodes.first().map(|v| v.name.as_str()).unwrap_or("")
    }
}

/// Parse `(v1:r=v:r=v)+(v2:…)+…` into super-chunks.
pub fn parse_execvnode(s: &str) -> Result<Vec<SuperChunk>, ParseError> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut chunks = Vec::new();
    let mut rest = s;
    loop {
        let Some(stripped) = rest.strip_prefix('(') else {
            return Err(ParseError::BadAssignment(s.to_string()));
        };
        let Some(close) = stripped.find(')') else {
            return Err(ParseError::BadAssignment(s.to_string()));
        };
        let body = &stripped[..close];
        let mut vnodes = Vec::new();
        for part in body.split('+') {
            let mut fields = part.split(':');
            let name = fields
                .next()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ParseError::BadAssignment(s.to_string()))?;
            let mut resources = Vec::new();
            for kv in fields {
                let (rname, rval) = kv
                    .split_once('=')
                    .ok_or_else(|| ParseError::BadAssignment(s.to_string()))?;
                resources.push((rname.to_string(), rval.to_string()));
            }
            vnodes.push(VnodeAlloc {
                name: name.to_string(),
                resources,
            });
        }
        chunks.push(SuperChunk { vnodes });

        rest = &stripped[close + 1..];
        if rest.is_empty() {
            break;
        }
        rest = rest
            .strip_prefix('+')
            .ok_or_else(|| ParseError::BadAssignment(s.to_string()))?;
    }
    Ok(chunks)
}

/// Expand a schedselect so every chunk count is explicit: `2:ncpus=4`
/// becomes two `1:ncpus=4` blocks, aligning blocks with super-chunks.
pub fn expand_schedselect(schedselect: &str) -> Result<Vec<String>, ParseError> {
    if schedselect.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut out = Vec::new();
    for chunk in schedselect.split('+') {
        let (count, body) = split_chunk_count(chunk)?;
        for _ in 0..count {
            out.push(format!("1:{}", body));
        }
    }
    Ok(out)
}

fn split_chunk_count(chunk: &str) -> Result<(u32, &str), ParseError> {
    let digits_end = chunk
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(chunk.len());
    if digits_end == 0 {
        return Ok((1, chunk));
    }
    if chunk.as_bytes().get(digits_end) != Some(&b':') {
        return Err(ParseError::BadAssignment(chunk.to_string()));
    }
    let count: u32 = chunk[..digits_end]
        .parse()
        .map_err(|_| ParseError::BadChunkCount(chunk.to_string()))?;
    if count == 0 {
        return Err(ParseError::BadChunkCount(chunk.to_string()));
    }
    Ok((count, &chunk[digits_end + 1..]))
}

/// The primary execution host: first `hostname[:port]` of `exec_host2`.
pub fn primary_host(exec_host2: &str) -> Result<&str, ParseError> {
    exec_host2
        .split('+')
        .next()
        .and_then(|entry| entry.split('/').next())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ParseError::BadAssignment(exec_host2.to_string()))
}

/// Strip an optional `:port` suffix.
fn host_of(entry: &str) -> &str {
    entry.split(':').next().unwrap_or(entry)
}

/// Hostname equality: caseless, and a short name matches the first label
/// of an FQDN.
fn same_host(a: &str, b: &str) -> bool {
    let a = host_of(a);
    let b = host_of(b);
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    let a_short = a.split('.').next().unwrap_or(a);
    let b_short = b.split('.').next().unwrap_or(b);
    a_short.eq_ignore_ascii_case(b_short)
}

/// The mom managing a vnode: from the vnode map when known, otherwise the
/// natural-vnode convention of `name` or `name[idx]`.
fn parent_mom<'a>(vnode: &'a str, vnmap: &'a VnodeMap) -> &'a str {
    if let Some(meta) = vnmap.get(vnode) {
        if !meta.parent_mom.is_empty() {
            return &meta.parent_mom;
        }
    }
    vnode.split('[').next().unwrap_or(vnode)
}

// ── Release by vnode list ─────────────────────────────────────────────────────

/// Release the named vnodes from a running job's assignment.
///
/// Rewrites the four assignment strings, keeping super-chunk structure and
/// order; released super-chunks are appended to `deallocated_orig` with
/// textual deduplication on the lead vnode.
pub fn release_given_nodelist(
    input: &ReleaseInput<'_>,
    vnodelist: &str,
    deallocated_orig: &str,
    vnmap: &VnodeMap,
    defs: &ResDefTable,
) -> Result<ReleaseOutput, ReleaseError> {
    let chunks = parse_execvnode(input.exec_vnode)?;
    let hosts: Vec<&str> = input.exec_host.split('+').collect();
    let hosts2: Vec<&str> = input.exec_host2.split('+').collect();
    let selects = expand_schedselect(input.schedselect)?;

    if chunks.len() != hosts.len() || chunks.len() != hosts2.len() || chunks.len() != selects.len()
    {
        return Err(ParseError::ChunkMismatch.into());
    }

    let primary = primary_host(input.exec_host2)?;
    let to_release: Vec<&str> = vnodelist.split('+').filter(|v| !v.is_empty()).collect();

    // The release list must not name a primary-host vnode or a cray vnode.
    for &v in &to_release {
        if same_host(parent_mom(v, vnmap), primary) {
            return Err(ReleaseError::PrimaryHostVnode(v.to_string()));
        }
        if let Some(meta) = vnmap.get(v) {
            if meta
                .vntype
                .as_deref()
                .map(|t| t.starts_with("cray_"))
                .unwrap_or(false)
            {
                return Err(ReleaseError::CrayVnode(v.to_string()));
            }
        }
    }

    let mut kept_vnode = Vec::new();
    let mut kept_host = Vec::new();
    let mut kept_host2 = Vec::new();
    let mut kept_select = Vec::new();
    let mut released = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let lead_mom = parent_mom(chunk.lead_vnode(), vnmap);
        let on_primary = same_host(lead_mom, primary);
        let named = chunk
            .vnodes
            .iter()
            .any(|v| to_release.iter().any(|&r| r == v.name));

        if on_primary || !named {
            kept_vnode.push(chunk.to_execvnode());
            kept_host.push(hosts[i].to_string());
            kept_host2.push(hosts2[i].to_string());
            kept_select.push(rebuild_select_chunk(chunk, &selects[i], defs)?);
        } else {
            released.push(chunk.to_execvnode());
        }
    }

    let deallocated = dedup_deallocated(&released, deallocated_orig);

    debug!(
        job = input.job_id,
        released = released.len(),
        kept = kept_vnode.len(),
        "released vnodes from assignment"
    );

    Ok(ReleaseOutput {
        exec_vnode: kept_vnode.join("+"),
        exec_host: kept_host.join("+"),
        exec_host2: kept_host2.join("+"),
        schedselect: kept_select.join("+"),
        deallocated_execvnode: deallocated,
    })
}

/// Rebuild one schedselect chunk from a kept super-chunk: the per-resource
/// sums over its vnodes, followed by select resources with no exec_vnode
/// counterpart, carried over verbatim.
fn rebuild_select_chunk(
    chunk: &SuperChunk,
    select_chunk: &str,
    defs: &ResDefTable,
) -> Result<String, ReleaseError> {
    let mut order: Vec<String> = Vec::new();
    let mut sums: HashMap<String, f64> = HashMap::new();
    let mut strings: HashMap<String, String> = HashMap::new();

    for vnode in &chunk.vnodes {
        for (name, val) in &vnode.resources {
            let kind = defs
                .lookup(name)
                .map(|d| defs.get(d).kind)
                .unwrap_or(ResKind::String);
            if !order.contains(name) {
                order.push(name.clone());
            }
            if kind.is_consumable_kind() {
                let amount =
                    parse_amount(kind, val).map_err(|_| ParseError::BadValue {
                        name: name.clone(),
                        value: val.clone(),
                    })?;
                *sums.entry(name.clone()).or_insert(0.0) += amount;
            } else {
                strings.insert(name.clone(), val.clone());
            }
        }
    }

    let mut parts: Vec<String> = Vec::new();
    for name in &order {
        if let Some(sum) = sums.get(name) {
            let kind = defs
                .lookup(name)
                .map(|d| defs.get(d).kind)
                .unwrap_or(ResKind::Long);
            parts.push(format!("{}={}", name, amount_to_str(kind, *sum)));
        } else if let Some(val) = strings.get(name) {
            parts.push(format!("{}={}", name, val));
        }
    }

    // Resources requested in the select but not surfaced in exec_vnode
    // (mpiprocs, non-consumables) ride along untouched.
    let (_, body) = split_chunk_count(select_chunk)?;
    for kv in body.split(':') {
        if let Some((name, _)) = kv.split_once('=') {
            if !order.iter().any(|n| n == name) {
                parts.push(kv.to_string());
            }
        }
    }

    Ok(format!("1:{}", parts.join(":")))
}

/// Concatenate released chunks with the previous deallocated string,
/// dropping chunks whose lead vnode is already recorded.
fn dedup_deallocated(released: &[String], deallocated_orig: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let lead = |chunk: &str| -> String {
        chunk
            .trim_start_matches('(')
            .split([':', ')', '+'])
            .next()
            .unwrap_or("")
            .to_string()
    };

    for chunk in released
        .iter()
        .map(|s| s.as_str())
        .chain(deallocated_orig.split('+').filter(|s| !s.is_empty()))
    {
        let l = lead(chunk);
        if !seen.contains(&l) {
            seen.push(l);
            out.push(chunk.to_string());
        }
    }
    out.join("+")
}

// ── Release by target select ──────────────────────────────────────────────────

/// What one original super-chunk can still provide.
#[derive(Debug, Clone)]
struct RescLimit {
    chunk: SuperChunk,
    host: String,
    host2: String,
    on_primary: bool,
    consumed: bool,
    /// Distinct resource count, then ncpus and mem for ordering.
    res_count: usize,
    ncpus: f64,
    mem: f64,
}

/// Keep as much of the job as still satisfies `select_str`.
///
/// Super-chunks managed by a failed mom are unavailable; the primary
/// host's chunk must satisfy the first chunk of the target select or the
/// release fails.
pub fn release_given_select(
    input: &ReleaseInput<'_>,
    select_str: &str,
    failed_moms: &[&str],
    succeeded_moms: &[&str],
    vnmap: &VnodeMap,
    defs: &ResDefTable,
) -> Result<ReleaseOutput, ReleaseError> {
    let chunks = parse_execvnode(input.exec_vnode)?;
    let hosts: Vec<&str> = input.exec_host.split('+').collect();
    let hosts2: Vec<&str> = input.exec_host2.split('+').collect();
    if chunks.len() != hosts.len() || chunks.len() != hosts2.len() {
        return Err(ParseError::ChunkMismatch.into());
    }
    let primary = primary_host(input.exec_host2)?.to_string();

    let mut failed_vnodes: Vec<String> = Vec::new();
    let mut have: Vec<RescLimit> = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let mom = parent_mom(chunk.lead_vnode(), vnmap).to_string();
        if failed_moms.iter().any(|&m| same_host(m, &mom)) {
            failed_vnodes.push(chunk.to_execvnode());
            continue;
        }
        if !succeeded_moms.is_empty() && !succeeded_moms.iter().any(|&m| same_host(m, &mom)) {
            // Neither confirmed up nor down: treat as unavailable.
            failed_vnodes.push(chunk.to_execvnode());
            continue;
        }

        let mut res_names: Vec<&str> = Vec::new();
        let mut ncpus = 0.0;
        let mut mem = 0.0;
        for v in &chunk.vnodes {
            for (name, val) in &v.resources {
                if !res_names.contains(&name.as_str()) {
                    res_names.push(name);
                }
                let kind = defs
                    .lookup(name)
                    .map(|d| defs.get(d).kind)
                    .unwrap_or(ResKind::String);
                if name == "ncpus" {
                    ncpus += parse_amount(kind, val).unwrap_or(0.0);
                } else if name == "mem" {
                    mem += parse_amount(kind, val).unwrap_or(0.0);
                }
            }
        }

        have.push(RescLimit {
            chunk: chunk.clone(),
            host: hosts[i].to_string(),
            host2: hosts2[i].to_string(),
            on_primary: same_host(&mom, &primary),
            consumed: false,
            res_count: res_names.len(),
            ncpus,
            mem,
        });
    }

    // Primary first; the rest tightest-fit first so big requests don't
    // greedily eat the richer chunks.
    have.sort_by(|a, b| {
        b.on_primary.cmp(&a.on_primary).then(
            a.res_count
                .cmp(&b.res_count)
                .then(a.ncpus.partial_cmp(&b.ncpus).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.mem.partial_cmp(&b.mem).unwrap_or(std::cmp::Ordering::Equal)),
        )
    });

    // Expand the target select into per-chunk needs.
    let mut needs: Vec<String> = Vec::new();
    for chunk in select_str.split('+') {
        let (count, body) = split_chunk_count(chunk)?;
        for _ in 0..count {
            needs.push(body.to_string());
        }
    }

    let mut out_vnode: Vec<String> = Vec::new();
    let mut out_host: Vec<String> = Vec::new();
    let mut out_host2: Vec<String> = Vec::new();
    let mut out_select_chunks: Vec<String> = Vec::new();

    for (ni, need) in needs.iter().enumerate() {
        let mut satisfied = false;
        for h in have.iter_mut() {
            if h.consumed {
                continue;
            }
            if let Some(sub) = satisfy_chunk_need(need, &h.chunk, defs)? {
                h.consumed = true;
                out_vnode.push(sub);
                out_host.push(h.host.clone());
                out_host2.push(h.host2.clone());
                out_select_chunks.push(need.clone());
                satisfied = true;
                break;
            }
            // The primary-host chunk is always first in the have list; if
            // it cannot hold the first need, the assignment is unusable.
            if ni == 0 && h.on_primary {
                return Err(ReleaseError::PrimaryChunkUnsatisfied);
            }
        }
        if !satisfied {
            debug!(
                job = input.job_id,
                need = %need,
                have = ?have.iter().filter(|h| !h.consumed).map(|h| h.chunk.to_execvnode()).collect::<Vec<_>>(),
                failed_moms = ?failed_moms,
                succeeded_moms = ?succeeded_moms,
                "could not satisfy select chunk"
            );
            return Err(ReleaseError::ChunkUnsatisfied(need.clone()));
        }
    }

    // Group consecutive identical chunks into N:… and canonicalize.
    let schedselect = do_schedselect(&group_chunks(&out_select_chunks), defs, &[], &[], false)?;

    Ok(ReleaseOutput {
        exec_vnode: out_vnode.join("+"),
        exec_host: out_host.join("+"),
        exec_host2: out_host2.join("+"),
        schedselect,
        deallocated_execvnode: failed_vnodes.join("+"),
    })
}

/// Allocate `need` from one have-chunk: the minimum of the need and what
/// each vnode provides, walked in order.  `None` when the chunk cannot
/// cover the need.
fn satisfy_chunk_need(
    need: &str,
    have: &SuperChunk,
    defs: &ResDefTable,
) -> Result<Option<String>, ReleaseError> {
    // Parse the need into consumable amounts and non-consumable values.
    let mut want: Vec<(String, ResKind, f64)> = Vec::new();
    for kv in need.split(':') {
        let (name, val) = kv
            .split_once('=')
            .ok_or_else(|| ParseError::BadAssignment(need.to_string()))?;
        let def = defs
            .lookup(name)
            .ok_or_else(|| ReleaseError::UnknownResource(name.to_string()))?;
        let kind = defs.get(def).kind;
        if defs.get(def).consumable {
            let amount = parse_amount(kind, val).map_err(|_| ParseError::BadValue {
                name: name.to_string(),
                value: val.to_string(),
            })?;
            want.push((name.to_string(), kind, amount));
        }
    }

    let mut remaining: HashMap<&str, f64> = want
        .iter()
        .map(|(n, _, a)| (n.as_str(), *a))
        .collect();
    let mut segments: Vec<String> = Vec::new();

    for vnode in &have.vnodes {
        let mut seg_parts: Vec<String> = Vec::new();
        for (name, kind, _) in &want {
            let left = remaining.get_mut(name.as_str()).filter(|v| **v > 0.0);
            let Some(left) = left else { continue };
            let provided: f64 = vnode
                .resources
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, v)| parse_amount(*kind, v).unwrap_or(0.0))
                .sum();
            if provided <= 0.0 {
                continue;
            }
            let take = provided.min(*left);
            *left -= take;
            seg_parts.push(format!("{}={}", name, amount_to_str(*kind, take)));
        }
        if !seg_parts.is_empty() {
            segments.push(format!("{}:{}", vnode.name, seg_parts.join(":")));
        }
    }

    if remaining.values().any(|&v| v > 0.0) {
        return Ok(None);
    }
    if segments.is_empty() {
        // A need with no consumables takes the lead vnode whole.
        segments.push(have.lead_vnode().to_string());
    }
    Ok(Some(format!("({})", segments.join("+"))))
}

/// Group consecutive identical chunk bodies into `N:body`.
fn group_chunks(chunks: &[String]) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;
    while i < chunks.len() {
        let mut n = 1;
        while i + n < chunks.len() && chunks[i + n] == chunks[i] {
            n += 1;
        }
        out.push(format!("{}:{}", n, chunks[i]));
        i += n;
    }
    out.join("+")
}

// ── do_schedselect ────────────────────────────────────────────────────────────

/// Canonicalize a select string into its schedselect form.
///
/// Per chunk: reject repeated resources and (unless `route_queue`) unknown
/// ones, merge queue then server per-chunk defaults (skipping resources
/// already present), and re-emit canonically:
/// * booleans become the literal `True` / `False`,
/// * sizes without a unit get a `b` suffix,
/// * string values containing any of `"'+:=()` are quoted with the
///   opposite quote character,
/// * the pseudo-default `nchunk` replaces an absent chunk count and is
///   not emitted.
pub fn do_schedselect(
    select: &str,
    defs: &ResDefTable,
    queue_defaults: &[(String, String)],
    server_defaults: &[(String, String)],
    route_queue: bool,
) -> Result<String, ReleaseError> {
    if select.is_empty() {
        return Err(ParseError::Empty.into());
    }

    let mut out_chunks: Vec<String> = Vec::new();
    for chunk in select.split('+') {
        let digits_end = chunk
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(chunk.len());
        let explicit_count = digits_end > 0;
        let (mut count, body) = split_chunk_count(chunk)?;

        let mut names: Vec<String> = Vec::new();
        let mut pairs: Vec<(String, String)> = Vec::new();
        for kv in body.split(':') {
            let (name, val) = kv
                .split_once('=')
                .ok_or_else(|| ParseError::BadAssignment(chunk.to_string()))?;
            if names.iter().any(|n| n == name) {
                return Err(ReleaseError::DuplicateResource(name.to_string()));
            }
            if defs.lookup(name).is_none() && !route_queue {
                return Err(ReleaseError::UnknownResource(name.to_string()));
            }
            names.push(name.to_string());
            pairs.push((name.to_string(), val.to_string()));
        }

        for (name, val) in queue_defaults.iter().chain(server_defaults.iter()) {
            if name == "nchunk" {
                if !explicit_count {
                    count = val
                        .parse()
                        .map_err(|_| ParseError::BadChunkCount(chunk.to_string()))?;
                }
                continue;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
                pairs.push((name.clone(), val.clone()));
            }
        }

        let mut parts: Vec<String> = Vec::new();
        for (name, val) in &pairs {
            let kind = defs
                .lookup(name)
                .map(|d| defs.get(d).kind)
                .unwrap_or(ResKind::String);
            parts.push(format!("{}={}", name, canonical_value(kind, val)?));
        }
        out_chunks.push(format!("{}:{}", count, parts.join(":")));
    }

    Ok(out_chunks.join("+"))
}

fn canonical_value(kind: ResKind, val: &str) -> Result<String, ReleaseError> {
    match kind {
        ResKind::Boolean => {
            let b = crate::resource::parse_bool(val).map_err(|_| ParseError::BadValue {
                name: "boolean".to_string(),
                value: val.to_string(),
            })?;
            Ok(if b { "True" } else { "False" }.to_string())
        }
        ResKind::Size => {
            if val.chars().all(|c| c.is_ascii_digit() || c == '.') {
                Ok(format!("{}b", val))
            } else {
                Ok(val.to_string())
            }
        }
        ResKind::String | ResKind::StringSet => {
            if val.chars().any(|c| "\"'+:=()".contains(c)) {
                let quote = if val.contains('"') { '\'' } else { '"' };
                Ok(format!("{}{}{}", quote, val, quote))
            } else {
                Ok(val.to_string())
            }
        }
        _ => Ok(val.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
