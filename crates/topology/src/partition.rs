//! BFS partition labeling and lookahead derivation.

use crate::{NodeId, SystemId, Topology};
use lockstep_core::SimTime;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from partitioning. Fatal: the run aborts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// A rank may host at most 2^16 - 1 logical processes, because the LP id
    /// must fit the high half of a node's composite system id.
    #[error("partition produced {count} logical processes, above the 65535 per-rank limit")]
    Overflow {
        /// Number of partitions the BFS produced so far.
        count: u32,
    },
}

/// Median of the delays of every point-to-point link with at least one
/// device on a node owned by `rank`.
///
/// Used when the configured minimum lookahead is the zero "auto" sentinel.
/// Returns zero when the rank owns no point-to-point links, in which case
/// every partition is an isolated island and the window advances one tick
/// at a time.
pub fn auto_lookahead(topo: &Topology, rank: u16) -> SimTime {
    let mut delays: Vec<SimTime> = Vec::new();
    for node in topo.node_ids() {
        if !topo.is_local(node, rank) {
            continue;
        }
        for &device in topo.devices(node) {
            if topo.is_point_to_point(device) {
                delays.push(topo.delay(topo.channel(device)));
            }
        }
    }
    delays.sort();

    if delays.is_empty() {
        SimTime::ZERO
    } else if delays.len() % 2 == 1 {
        delays[delays.len() / 2]
    } else {
        let lo = delays[delays.len() / 2 - 1];
        let hi = delays[delays.len() / 2];
        SimTime::from_ticks((lo.ticks() + hi.ticks()) / 2)
    }
}

/// Assign every node owned by `rank` to a logical process by breadth-first
/// traversal, cutting on point-to-point links whose delay is at least
/// `min_lookahead`.
///
/// Returns the number of logical processes created (local ids run 1..=n).
/// Remote nodes are never relabeled, and once assigned a node's id is
/// immutable for the run.
pub fn label_partitions(
    topo: &mut Topology,
    rank: u16,
    min_lookahead: SimTime,
) -> Result<u32, PartitionError> {
    let mut visited = vec![false; topo.node_count()];
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    let mut local_id: u32 = 0;

    for start in topo.node_ids() {
        if visited[start.0 as usize] || !topo.is_local(start, rank) {
            continue;
        }
        local_id += 1;
        if local_id > u16::MAX as u32 {
            return Err(PartitionError::Overflow { count: local_id });
        }

        visited[start.0 as usize] = true;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            topo.set_system_id(node, SystemId::new(local_id as u16, rank));
            trace!(node = node.0, lp = local_id, "node assigned to logical process");

            for &device in topo.devices(node) {
                let channel = topo.channel(device);
                // Point-to-point links at or above the lookahead are
                // partition cuts; everything else is crossed.
                if topo.is_point_to_point(device) && topo.delay(channel) >= min_lookahead {
                    continue;
                }
                let neighbors: Vec<NodeId> = topo.endpoints(channel).collect();
                for neighbor in neighbors {
                    if !visited[neighbor.0 as usize] && topo.is_local(neighbor, rank) {
                        visited[neighbor.0 as usize] = true;
                        queue.push_back(neighbor);
                    }
                }
            }
        }
    }

    debug!(rank, partitions = local_id, "partition labeling complete");
    Ok(local_id)
}
