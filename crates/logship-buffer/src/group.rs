// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Consumer-group coordination state: membership, generation fencing and
//! committed offsets.
//!
//! The buffer acts as the group coordinator. Every membership change bumps
//! the group generation and recomputes the partition assignment; fetches
//! and commits carrying an older generation are fenced out with
//! `CommitConflict`, forcing the consumer to re-join.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::BufferError;

/// Deterministic round-robin assignment: partition `i` goes to the
/// `i % members`-th member in sorted member-id order. Every member of a
/// group computes (or receives) the same answer for the same inputs.
pub fn assign_partitions(
    partition_count: u32,
    members: &BTreeSet<String>,
) -> BTreeMap<String, Vec<u32>> {
    let mut assignment: BTreeMap<String, Vec<u32>> = members
        .iter()
        .map(|member| (member.clone(), Vec::new()))
        .collect();
    let ordered: Vec<&String> = members.iter().collect();
    if ordered.is_empty() {
        return assignment;
    }
    for partition in 0..partition_count {
        let member = ordered[(partition as usize) % ordered.len()];
        if let Some(slot) = assignment.get_mut(member) {
            slot.push(partition);
        }
    }
    assignment
}

pub(crate) struct GroupState {
    pub(crate) generation: u64,
    pub(crate) members: BTreeSet<String>,
    // Last committed offset per partition. Absent means the group has not
    // committed anything for that partition yet.
    pub(crate) committed: HashMap<u32, u64>,
    pub(crate) assignment: BTreeMap<String, Vec<u32>>,
}

impl GroupState {
    pub(crate) fn new() -> Self {
        GroupState {
            generation: 0,
            members: BTreeSet::new(),
            committed: HashMap::new(),
            assignment: BTreeMap::new(),
        }
    }

    /// Add a member. Only a membership change bumps the generation; a
    /// re-join of an existing member (after a fence, say) gets the current
    /// generation and assignment back, so a settled group stays settled.
    pub(crate) fn join(&mut self, member: &str, partition_count: u32) -> u64 {
        if self.members.insert(member.to_string()) {
            self.generation += 1;
            self.assignment = assign_partitions(partition_count, &self.members);
        }
        self.generation
    }

    pub(crate) fn leave(&mut self, member: &str, partition_count: u32) {
        if self.members.remove(member) {
            self.generation += 1;
            self.assignment = assign_partitions(partition_count, &self.members);
        }
    }

    pub(crate) fn check_generation(&self, group: &str, got: u64) -> Result<(), BufferError> {
        if got != self.generation {
            return Err(BufferError::CommitConflict {
                group: group.to_string(),
                got,
                current: self.generation,
            });
        }
        Ok(())
    }

    /// Record a commit. Offsets only move forward; a regression is an
    /// invalid input, not a silent overwrite.
    pub(crate) fn commit(&mut self, partition: u32, offset: u64) -> Result<(), BufferError> {
        if let Some(&prev) = self.committed.get(&partition) {
            if offset < prev {
                return Err(BufferError::InvalidInput(format!(
                    "commit regression on partition {partition}: {offset} < {prev}"
                )));
            }
        }
        self.committed.insert(partition, offset);
        Ok(())
    }
}
