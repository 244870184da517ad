//! Instance table and per-instance state machine.
//!
//! # Responsibilities
//! - Hold `name → Instance` together with every hash ring
//! - Apply Up, Down and finalize events as Absent/Alive/Pending transitions
//! - Resolve keys to owning instances
//!
//! # Design Decisions
//! - Rings change only on Absent ↔ Alive; a Pending instance stays routable
//! - A Pending entry remembers the ticket of its finalize so a removal that
//!   fired before a recovery canceled it is recognised and dropped
//! - Holder calls happen before any mutation; a failed call leaves the
//!   table untouched

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::eviction::{Eviction, EvictionSink, HolderError, Ticket};
use crate::membership::{Endpoint, Instance, InstanceStatus};
use crate::routing::HashRing;

/// A key could not be resolved to a member. Retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no instances available for key {key}")]
    EmptyRing { key: String },

    #[error("ring resolved key {key} to {node}, which is not in the instance table")]
    UnknownNode { key: String, node: String },
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Absent → Alive.
    Joined,
    /// Alive → Alive.
    Unchanged,
    /// Alive → Pending.
    Suspected(Ticket),
    /// Pending → Alive.
    Recovered,
    /// Pending → Absent.
    Evicted,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotMember,
    AlreadyPending,
    AddressMismatch,
    StaleFinalize,
}

impl Transition {
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::Joined => "joined",
            Transition::Unchanged => "unchanged",
            Transition::Suspected(_) => "suspected",
            Transition::Recovered => "recovered",
            Transition::Evicted => "evicted",
            Transition::Ignored(_) => "ignored",
        }
    }

    pub fn changed_membership(&self) -> bool {
        !matches!(self, Transition::Unchanged | Transition::Ignored(_))
    }
}

#[derive(Debug, Clone)]
struct Member {
    instance: Instance,
    ticket: Option<Ticket>,
}

#[derive(Debug, Clone)]
pub struct MembershipTable {
    members: HashMap<String, Member>,
    rings: Vec<HashRing>,
}

impl MembershipTable {
    /// Create an empty table. The first ring is the primary one.
    pub fn new(rings: Vec<HashRing>) -> Self {
        Self {
            members: HashMap::new(),
            rings,
        }
    }

    /// Observed passing health.
    pub fn apply_up(
        &mut self,
        endpoint: &Endpoint,
        sink: &dyn EvictionSink,
    ) -> Result<Transition, HolderError> {
        let member = match self.members.entry(endpoint.name.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                slot.insert(Member {
                    instance: Instance::new(endpoint, InstanceStatus::Alive),
                    ticket: None,
                });
                for ring in &mut self.rings {
                    ring.add_node(&endpoint.name);
                }
                return Ok(Transition::Joined);
            }
        };

        match member.instance.status() {
            InstanceStatus::Alive => {
                member.instance.set_address(&endpoint.address);
                Ok(Transition::Unchanged)
            }
            InstanceStatus::Pending => {
                sink.cancel(&endpoint.name)?;
                member.instance.set_status(InstanceStatus::Alive);
                member.instance.set_address(&endpoint.address);
                member.ticket = None;
                Ok(Transition::Recovered)
            }
        }
    }

    /// Observed failing health.
    pub fn apply_down(
        &mut self,
        endpoint: &Endpoint,
        sink: &dyn EvictionSink,
    ) -> Result<Transition, HolderError> {
        let Some(member) = self.members.get_mut(&endpoint.name) else {
            return Ok(Transition::Ignored(IgnoreReason::NotMember));
        };

        if member.instance.status() == InstanceStatus::Pending {
            return Ok(Transition::Ignored(IgnoreReason::AlreadyPending));
        }
        if member.instance.address() != endpoint.address {
            return Ok(Transition::Ignored(IgnoreReason::AddressMismatch));
        }

        let ticket = sink.schedule(&member.instance.endpoint())?;
        member.instance.set_status(InstanceStatus::Pending);
        member.ticket = Some(ticket);
        Ok(Transition::Suspected(ticket))
    }

    /// Grace period elapsed for a Pending instance.
    pub fn apply_eviction(&mut self, eviction: &Eviction) -> Transition {
        let name = &eviction.change.endpoint.name;
        let Some(member) = self.members.get(name) else {
            return Transition::Ignored(IgnoreReason::NotMember);
        };

        let current = member.instance.status() == InstanceStatus::Pending
            && member.ticket == Some(eviction.ticket);
        if !current {
            return Transition::Ignored(IgnoreReason::StaleFinalize);
        }

        self.members.remove(name);
        for ring in &mut self.rings {
            ring.remove_node(name);
        }
        Transition::Evicted
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.members.values().map(|m| m.instance.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.members.get(name).map(|m| &m.instance)
    }

    /// Owner of `key` on the primary ring.
    pub fn holder(&self, key: &str) -> Result<Instance, LookupError> {
        match self.rings.first() {
            Some(ring) => self.resolve(ring, key),
            None => Err(LookupError::EmptyRing {
                key: key.to_string(),
            }),
        }
    }

    /// Owners of `key` across every ring, deduplicated and sorted by name.
    pub fn holders(&self, key: &str) -> Result<Vec<Instance>, LookupError> {
        let mut owners = BTreeMap::new();
        for ring in &self.rings {
            let instance = self.resolve(ring, key)?;
            owners.entry(instance.name().to_string()).or_insert(instance);
        }
        if owners.is_empty() {
            return Err(LookupError::EmptyRing {
                key: key.to_string(),
            });
        }
        Ok(owners.into_values().collect())
    }

    fn resolve(&self, ring: &HashRing, key: &str) -> Result<Instance, LookupError> {
        let node = ring.node_for(key).ok_or_else(|| LookupError::EmptyRing {
            key: key.to_string(),
        })?;
        self.get(node)
            .cloned()
            .ok_or_else(|| LookupError::UnknownNode {
                key: key.to_string(),
                node: node.to_string(),
            })
    }

    /// Number of (alive, pending) members.
    pub fn counts(&self) -> (usize, usize) {
        let alive = self
            .members
            .values()
            .filter(|m| m.instance.is_alive())
            .count();
        (alive, self.members.len() - alive)
    }

    pub fn ring_count(&self) -> usize {
        self.rings.len()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Drop every member, keeping the ring configuration.
    pub fn clear(&mut self) {
        for name in self.members.keys() {
            for ring in &mut self.rings {
                ring.remove_node(name);
            }
        }
        self.members.clear();
    }
}
