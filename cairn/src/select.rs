/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Parsers for the two request strings: `select` and `place`.
//!
//! A select string is a `+`-separated list of chunks, each an optional
//! count followed by `name=value` resource requests:
//!
//! ```text
//! select = 2:ncpus=4:mem=8gb+1:ncpus=1:arch=linux
//! place  = scatter:excl:group=switch
//! ```
//!
//! Inside a parsed [`Chunk`] the non-consumable requests come first — the
//! matcher checks them before it starts consuming anything, and the
//! break-across-vnodes path relies on that ordering to peel consumables off
//! the tail.  Each chunk keeps its original text so sub-solutions can be
//! attributed back to the requested chunk by the release engine.

use std::collections::HashSet;

use crate::error::ParseError;
use crate::resource::{DefId, ResDefTable, ResourceReq};

// ── Place ─────────────────────────────────────────────────────────────────────

/// Parsed `place` directive.
///
/// `pack`, `scatter`, `vscatter` and `free` are mutually exclusive; when
/// none is given the directive defaults to `free`.  `exclhost` implies
/// `excl`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Place {
    pub pack: bool,
    pub scatter: bool,
    pub vscatter: bool,
    pub free: bool,
    pub excl: bool,
    pub exclhost: bool,
    pub share: bool,
    /// Grouping resource name from `group=<res>`.
    pub group: Option<String>,
}

impl Place {
    /// The default placement: `free`.
    pub fn free() -> Self {
        Place {
            free: true,
            ..Place::default()
        }
    }

    /// Parse a `place` string.
    pub fn parse(place_str: &str) -> Result<Place, ParseError> {
        let mut pl = Place::default();
        if place_str.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        for tok in place_str.split(':') {
            match tok {
                "pack" => pl.pack = true,
                "scatter" => pl.scatter = true,
                "vscatter" => pl.vscatter = true,
                "free" => pl.free = true,
                "excl" => pl.excl = true,
                "shared" => pl.share = true,
                "exclhost" => {
                    pl.exclhost = true;
                    pl.excl = true;
                }
                other => {
                    if let Some(group) = other.strip_prefix("group=") {
                        if group.is_empty() {
                            return Err(ParseError::BadPlace(other.to_string()));
                        }
                        pl.group = Some(group.to_string());
                    } else {
                        return Err(ParseError::BadPlace(other.to_string()));
                    }
                }
            }
        }

        let arrangement =
            pl.pack as u8 + pl.scatter as u8 + pl.vscatter as u8 + pl.free as u8;
        if arrangement > 1 {
            return Err(ParseError::ConflictingPlace);
        }
        if arrangement == 0 {
            pl.free = true;
        }
        Ok(pl)
    }
}

impl std::fmt::Display for Place {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.pack {
            parts.push("pack".to_string());
        }
        if self.scatter {
            parts.push("scatter".to_string());
        }
        if self.vscatter {
            parts.push("vscatter".to_string());
        }
        if self.free {
            parts.push("free".to_string());
        }
        if self.exclhost {
            parts.push("exclhost".to_string());
        } else if self.excl {
            parts.push("excl".to_string());
        }
        if self.share {
            parts.push("shared".to_string());
        }
        if let Some(g) = &self.group {
            parts.push(format!("group={}", g));
        }
        write!(f, "{}", parts.join(":"))
    }
}

// ── Chunks & selspec ──────────────────────────────────────────────────────────

/// One `+`-separated element of a select string.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Requested number of copies of this chunk.
    pub count: u32,
    /// Requests, non-consumables first.
    pub reqs: Vec<ResourceReq>,
    /// Position of this chunk inside the select; stamped on every nspec
    /// the chunk produces.
    pub seq_num: u32,
    /// The original chunk text, count included.
    pub text: String,
}

impl Chunk {
    /// The chunk text with the leading count stripped.
    pub fn sub_chunk_text(&self) -> &str {
        let rest = self.text.trim_start_matches(|c: char| c.is_ascii_digit());
        rest.strip_prefix(':').unwrap_or(rest)
    }
}

/// A fully parsed select string.
#[derive(Debug, Clone, PartialEq)]
pub struct SelSpec {
    pub chunks: Vec<Chunk>,
    /// Sum of all chunk counts.
    pub total_chunks: u32,
    /// Sum of `count × ncpus` over all chunks.
    pub total_cpus: f64,
    /// Every resource definition referenced anywhere in the spec.
    pub defs: HashSet<DefId>,
}

impl SelSpec {
    /// Parse a select string against the resource schema.
    ///
    /// Every referenced resource must be defined; request lists inside each
    /// chunk are reordered so non-consumables come first.
    pub fn parse(defs: &ResDefTable, select: &str) -> Result<SelSpec, ParseError> {
        if select.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let ncpus = defs.lookup("ncpus");
        let mut spec = SelSpec {
            chunks: Vec::new(),
            total_chunks: 0,
            total_cpus: 0.0,
            defs: HashSet::new(),
        };

        for (seq, chunk_str) in select.split('+').enumerate() {
            let chunk = Self::parse_chunk(defs, chunk_str, seq as u32)?;

            spec.total_chunks += chunk.count;
            if let Some(ncpus) = ncpus {
                if let Some(req) = chunk.reqs.iter().find(|r| r.def == ncpus) {
                    spec.total_cpus += chunk.count as f64 * req.amount;
                }
            }
            spec.defs.extend(chunk.reqs.iter().map(|r| r.def));
            spec.chunks.push(chunk);
        }

        Ok(spec)
    }

    fn parse_chunk(defs: &ResDefTable, chunk_str: &str, seq: u32) -> Result<Chunk, ParseError> {
        let text = chunk_str.to_string();
        let mut parts = chunk_str.split(':').peekable();

        // Optional leading count
        let mut count = 1u32;
        if let Some(first) = parts.peek() {
            if first.chars().all(|c| c.is_ascii_digit()) && !first.is_empty() {
                count = first
                    .parse()
                    .map_err(|_| ParseError::BadChunkCount(chunk_str.to_string()))?;
                if count == 0 {
                    return Err(ParseError::BadChunkCount(chunk_str.to_string()));
                }
                parts.next();
            }
        }

        let mut noncons: Vec<ResourceReq> = Vec::new();
        let mut cons: Vec<ResourceReq> = Vec::new();
        for kv in parts {
            let (name, value) = kv
                .split_once('=')
                .ok_or_else(|| ParseError::BadResource(kv.to_string()))?;
            let def = defs
                .lookup(name)
                .ok_or_else(|| ParseError::UnknownResource(name.to_string()))?;
            let req = ResourceReq::parse(defs, def, value)?;
            if defs.get(def).consumable {
                cons.push(req);
            } else {
                noncons.push(req);
            }
        }

        if noncons.is_empty() && cons.is_empty() {
            return Err(ParseError::BadResource(chunk_str.to_string()));
        }

        noncons.extend(cons);
        Ok(Chunk {
            count,
            reqs: noncons,
            seq_num: seq,
            text,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
