//! Scheduler configuration loading.
//!
//! The engine's policy knobs come from one YAML file:
//! ```yaml
//! smp_cluster_dist: round_robin
//! provision_policy: avoid
//! do_not_span_psets: true
//! node_group_key: [switch]
//! backfill_prime: false
//! prime_spill: 0
//! dedicated_time:
//!   - { from: 1700000000, to: 1700086400 }
//! resources:
//!   - { name: switch, type: string }
//!   - { name: scratch, type: size, consumable: true }
//! ```
//!
//! Every field is optional; a missing file section falls back to its
//! default so partial configs load.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::resource::{ResDefTable, ResKind, ResourceDef};

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
///
/// Kept private – callers work with [`SchedConfig`] instead.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchedConfigFile {
    #[serde(default)]
    smp_cluster_dist: SmpClusterDist,
    #[serde(default)]
    provision_policy: ProvisionPolicy,
    #[serde(default)]
    do_not_span_psets: bool,
    #[serde(default)]
    node_group_key: Vec<String>,
    #[serde(default)]
    backfill_prime: bool,
    #[serde(default)]
    prime_spill: i64,
    #[serde(default)]
    dedicated_time: Vec<TimeWindowEntry>,
    #[serde(default)]
    resources: Vec<ResourceEntry>,
}

#[derive(Debug, Deserialize)]
struct TimeWindowEntry {
    from: i64,
    to: i64,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    name: String,
    #[serde(rename = "type")]
    kind: ResKind,
    #[serde(default)]
    consumable: Option<bool>,
    #[serde(default)]
    host_level: bool,
    #[serde(default)]
    rassn: bool,
}

// ── Public configuration ──────────────────────────────────────────────────────

/// How chunks pack onto the vnodes of an SMP host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmpClusterDist {
    /// Fill hosts in node order.
    #[default]
    Pack,
    /// Rotate across hosts, resuming past the last allocated one.
    RoundRobin,
}

/// How eagerly the engine provisions AOEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionPolicy {
    /// Provision whenever it helps.
    #[default]
    Aggressive,
    /// Prefer nodes already instantiated with the requested AOE.
    Avoid,
}

/// A dedicated-time window (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

/// Loaded scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedConfig {
    pub smp_cluster_dist: SmpClusterDist,
    pub provision_policy: ProvisionPolicy,
    pub do_not_span_psets: bool,
    /// Grouping resources for server-level placement sets.
    pub node_group_key: Vec<String>,
    pub backfill_prime: bool,
    /// Seconds a job may spill past the prime boundary.
    pub prime_spill: i64,
    pub dedicated_time: Vec<TimeWindow>,
    /// Site-defined resource definitions to merge into the schema.
    pub(crate) resources: Vec<ResourceDef>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            smp_cluster_dist: SmpClusterDist::default(),
            provision_policy: ProvisionPolicy::default(),
            do_not_span_psets: false,
            node_group_key: Vec::new(),
            backfill_prime: false,
            prime_spill: 0,
            dedicated_time: Vec::new(),
            resources: Vec::new(),
        }
    }
}

impl SchedConfig {
    /// Parse `path` into a configuration.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the YAML is
    /// structurally invalid.  Unknown top-level keys are rejected so a
    /// typo'd knob does not silently fall back to its default.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: SchedConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let cfg = SchedConfig {
            smp_cluster_dist: file.smp_cluster_dist,
            provision_policy: file.provision_policy,
            do_not_span_psets: file.do_not_span_psets,
            node_group_key: file.node_group_key,
            backfill_prime: file.backfill_prime,
            prime_spill: file.prime_spill,
            dedicated_time: file
                .dedicated_time
                .into_iter()
                .map(|w| TimeWindow {
                    from: w.from,
                    to: w.to,
                })
                .collect(),
            resources: file
                .resources
                .into_iter()
                .map(|r| ResourceDef {
                    name: r.name,
                    consumable: r.consumable.unwrap_or_else(|| r.kind.is_consumable_kind()),
                    kind: r.kind,
                    host_level: r.host_level,
                    rassn: r.rassn,
                })
                .collect(),
        };

        for res in &cfg.resources {
            debug!(name = %res.name, kind = ?res.kind, consumable = res.consumable, "site resource");
        }
        info!(
            dist = ?cfg.smp_cluster_dist,
            group_key = ?cfg.node_group_key,
            span = !cfg.do_not_span_psets,
            "configuration loaded"
        );

        Ok(cfg)
    }

    /// Merge the site-defined resources into a schema table.
    pub fn extend_defs(&self, defs: &mut ResDefTable) {
        for res in &self.resources {
            defs.add(res.clone());
        }
    }

    /// The dedicated-time window containing or following `now`, if any.
    pub fn next_dedtime(&self, now: i64) -> Option<TimeWindow> {
        self.dedicated_time
            .iter()
            .filter(|w| w.to > now)
            .min_by_key(|w| w.from)
            .copied()
    }

    /// Is `now` inside a dedicated-time window?
    pub fn is_ded_time(&self, now: i64) -> bool {
        self.dedicated_time
            .iter()
            .any(|w| w.from <= now && now < w.to)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
