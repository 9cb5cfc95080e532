/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The per-cycle cluster snapshot.
//!
//! A [`Snapshot`] owns everything one scheduling cycle evaluates against:
//! the node arena, the request list, the calendar, the host sets, the
//! buckets, and the partition cache.  The engine receives it already
//! populated (discovery and transport are not its concern) and mutates it
//! only through [`Snapshot::update_on_run`] / [`Snapshot::update_on_end`],
//! which keep nodes, placement-set aggregates and bucket pools consistent
//! with each other.

use tracing::info;

use crate::bucket::{bucket_node_on_end, bucket_node_on_run, create_node_buckets, NodeBucket};
use crate::calendar::Calendar;
use crate::job::Request;
use crate::node::{update_node_on_end, update_node_on_run, NodePool};
use crate::partition::{
    create_node_partitions, partition_update_array, Partition, PartitionCache, PartitionFlags,
};
use crate::resource::ResDefTable;

/// One cycle's view of the cluster.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub server_time: i64,
    pub defs: ResDefTable,
    pub pool: NodePool,
    /// Every request the cycle knows about; calendar events index into
    /// this list.
    pub jobs: Vec<Request>,
    pub calendar: Calendar,
    /// Node partitions over the `host` resource; chunk placement iterates
    /// these.
    pub hostsets: Vec<Partition>,
    pub buckets: Vec<NodeBucket>,
    pub np_cache: PartitionCache,

    /// Some host carries more than one vnode.
    pub has_multi_vnode: bool,
    /// Server forbids solutions spanning placement sets.
    pub dont_span_psets: bool,
    pub provision_enable: bool,
    pub power_provisioning: bool,
    /// When the current prime/non-prime status ends, if ever.
    pub prime_status_end: Option<i64>,
}

impl Snapshot {
    /// Assemble a snapshot from a populated pool.
    ///
    /// Validates indirect resources, computes node signatures, builds the
    /// host sets (setting each node's back-reference) and the buckets.
    pub fn build(
        defs: ResDefTable,
        mut pool: NodePool,
        server_time: i64,
    ) -> Result<Self, String> {
        pool.link_indirect()?;

        for i in 0..pool.len() {
            if pool.get(i).nodesig.is_none() {
                let mut n = pool.get(i).clone();
                n.compute_nodesig(&defs);
                *pool.get_mut(i) = n;
            }
        }

        let all = pool.indices();
        let mut hostsets =
            create_node_partitions(&defs, &pool, &all, &["host"], PartitionFlags::default(), 0);
        // Nodes without a host resource still belong to a hostset of their
        // own, keyed by the node's host field.
        if hostsets.is_empty() && !pool.is_empty() {
            let mut by_host: std::collections::HashMap<String, Vec<usize>> = Default::default();
            for &i in &all {
                by_host
                    .entry(pool.get(i).host.clone())
                    .or_default()
                    .push(i);
            }
            let mut hosts: Vec<_> = by_host.into_iter().collect();
            hosts.sort();
            for (rank, (host, nodes)) in hosts.into_iter().enumerate() {
                hostsets.push(Partition {
                    name: format!("host={}", host),
                    def: defs.lookup("host").unwrap_or(0),
                    res_val: host,
                    ok_break: true,
                    excl: false,
                    rank: rank as u32,
                    nodes,
                    free_nodes: 0,
                    res: Vec::new(),
                });
            }
            partition_update_array(&defs, &pool, &mut hostsets);
        }

        for (hi, hs) in hostsets.iter().enumerate() {
            for &ni in &hs.nodes {
                pool.get_mut(ni).hostset = Some(hi);
            }
        }
        for hs in &hostsets {
            if hs.nodes.len() > 1 {
                for &ni in &hs.nodes {
                    pool.get_mut(ni).is_multivnoded = true;
                }
            }
        }
        let has_multi_vnode = hostsets.iter().any(|h| h.nodes.len() > 1);

        let buckets = create_node_buckets(&defs, &mut pool, &all);

        info!(
            nodes = pool.len(),
            hostsets = hostsets.len(),
            buckets = buckets.len(),
            multi_vnode = has_multi_vnode,
            "snapshot assembled"
        );

        Ok(Snapshot {
            server_time,
            defs,
            pool,
            jobs: Vec::new(),
            calendar: Calendar::new(),
            hostsets,
            buckets,
            np_cache: PartitionCache::new(),
            has_multi_vnode,
            dont_span_psets: false,
            provision_enable: false,
            power_provisioning: false,
            prime_status_end: None,
        })
    }

    /// Attach the calendar and its referenced requests, refreshing each
    /// node's pending-event count.
    pub fn attach_calendar(&mut self, calendar: Calendar, jobs: Vec<Request>) {
        self.calendar = calendar;
        self.jobs = jobs;
        self.refresh_node_events();
    }

    /// Recount calendared events per node.
    pub fn refresh_node_events(&mut self) {
        for i in 0..self.pool.len() {
            self.pool.get_mut(i).num_events = 0;
        }
        let mut counts = vec![0u32; self.pool.len()];
        for ev in self.calendar.enabled() {
            if let Some(job) = self.jobs.get(ev.job) {
                for ns in &job.nspecs {
                    counts[ns.node] += 1;
                }
            }
        }
        for (i, c) in counts.into_iter().enumerate() {
            self.pool.get_mut(i).num_events = c;
        }
    }

    /// Start `jobs[job_idx]` on its nspec list: node accounting, bucket
    /// truth bits, and placement-set aggregates all move together.
    pub fn update_on_run(&mut self, job_idx: usize) {
        let job = self.jobs[job_idx].clone();
        for ns in &job.nspecs {
            update_node_on_run(
                &mut self.pool,
                &self.defs,
                ns,
                job_idx,
                job.is_resv,
                &job.place,
                &job.user,
                &job.group,
                job.aoe.as_deref(),
                job.eoe.as_deref(),
            );
            let bucket = self.pool.get(ns.node).bucket;
            bucket_node_on_run(&mut self.buckets, ns.node, bucket);
        }
        partition_update_array(&self.defs, &self.pool, &mut self.hostsets);
    }

    /// Reverse [`Snapshot::update_on_run`] for an ending request.
    pub fn update_on_end(&mut self, job_idx: usize) {
        let job = self.jobs[job_idx].clone();
        let mut touched: Vec<usize> = job.nspecs.iter().map(|ns| ns.node).collect();
        touched.sort_unstable();
        touched.dedup();
        for &ni in &touched {
            update_node_on_end(
                &mut self.pool,
                &self.defs,
                &job.nspecs,
                ni,
                job_idx,
                job.is_resv,
                &job.place,
                &job.user,
                &job.group,
            );
            if self.pool.get(ni).num_jobs == 0 {
                let bucket = self.pool.get(ni).bucket;
                let has_events = self.pool.get(ni).num_events > 0;
                bucket_node_on_end(&mut self.buckets, ni, bucket, has_events);
            }
        }
        partition_update_array(&self.defs, &self.pool, &mut self.hostsets);
    }

}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, Nspec};
    use crate::resource::{find_resource, ResKind, Resource, ResourceReq};
    use crate::select::{Place, SelSpec};

    fn defs() -> ResDefTable {
        ResDefTable::with_builtins()
    }

    fn node(defs: &ResDefTable, rank: u32, name: &str, host: &str, cpus: &str) -> Node {
        let mut n = Node::new(rank, name, host);
        n.res.push(
            Resource::with_avail(defs.lookup("ncpus").unwrap(), ResKind::Long, cpus).unwrap(),
        );
        n.res.push(
            Resource::with_avail(defs.lookup("host").unwrap(), ResKind::String, host).unwrap(),
        );
        n
    }

    fn two_host_snapshot() -> Snapshot {
        let d = defs();
        let mut pool = NodePool::new();
        pool.push(node(&d, 0, "a1", "hostA", "4"));
        pool.push(node(&d, 1, "a2", "hostA", "4"));
        pool.push(node(&d, 2, "b1", "hostB", "8"));
        Snapshot::build(d, pool, 1_000).unwrap()
    }

    #[test]
    fn build_links_hostsets_and_multivnode() {
        let snap = two_host_snapshot();
        assert_eq!(snap.hostsets.len(), 2);
        assert!(snap.has_multi_vnode);
        let a1 = snap.pool.get(0);
        assert!(a1.is_multivnoded);
        let hs = a1.hostset.unwrap();
        assert_eq!(snap.hostsets[hs].res_val, "hostA");
        assert!(!snap.pool.get(2).is_multivnoded);
    }

    #[test]
    fn run_and_end_keep_aggregates_in_sync() {
        let mut snap = two_host_snapshot();
        let ncpus = snap.defs.lookup("ncpus").unwrap();

        let mut job = Request::new_job(
            "j1",
            SelSpec::parse(&snap.defs, "1:ncpus=4").unwrap(),
            Place::free(),
        );
        let mut ns = Nspec::new(0);
        ns.resources.push(ResourceReq {
            def: ncpus,
            amount: 4.0,
            str_val: "4".to_string(),
        });
        ns.end_of_chunk = true;
        job.nspecs.push(ns);
        snap.jobs.push(job);

        snap.update_on_run(0);
        let hs = snap.pool.get(0).hostset.unwrap();
        assert_eq!(
            find_resource(&snap.hostsets[hs].res, ncpus).unwrap().assigned,
            4.0
        );
        assert!(snap.buckets[snap.pool.get(0).bucket.unwrap()]
            .busy_pool
            .truth
            .get(0));

        snap.update_on_end(0);
        assert_eq!(
            find_resource(&snap.hostsets[hs].res, ncpus).unwrap().assigned,
            0.0
        );
        assert!(snap.buckets[snap.pool.get(0).bucket.unwrap()]
            .free_pool
            .truth
            .get(0));
    }
}
