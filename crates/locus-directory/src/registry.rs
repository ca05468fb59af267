//! The directory state machine.
//!
//! [`Registry`] owns every directory table and is mutated only through
//! [`Registry::handle`] and [`Registry::node_lost`]. Handlers never send
//! anything themselves; they return the replies the caller should deliver,
//! in the order they must be delivered.

use chrono::{DateTime, Utc};
use locus_types::{ChannelLocation, LeaseKey, NodeId};
use locus_wire::{DirectoryMessage, MessageKind};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// A reply the registry wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: ChannelLocation,
    pub message: DirectoryMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Bound(ChannelLocation),
    /// Reserved under a lease while its endpoint is in transit.
    Leased,
}

#[derive(Debug, Clone)]
struct Entry {
    binding: Binding,
    owner: NodeId,
    key: Option<LeaseKey>,
}

#[derive(Debug, Clone)]
struct LogonRecord {
    reply_to: ChannelLocation,
    logged_on_at: DateTime<Utc>,
}

/// A snapshot of registry table sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub nodes: usize,
    pub bound: usize,
    pub leased: usize,
    pub pending: usize,
}

/// Name-to-location registry for a whole network.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    owned: HashMap<NodeId, HashSet<String>>,
    pending: HashMap<String, VecDeque<ChannelLocation>>,
    logged_on: HashMap<NodeId, LogonRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one protocol message and return the replies it produces.
    pub fn handle(&mut self, msg: DirectoryMessage) -> Vec<Outgoing> {
        let Some(reply_to) = msg.location1.clone() else {
            warn!(kind = ?msg.kind, "Directory request without reply location dropped");
            return Vec::new();
        };
        match msg.kind {
            MessageKind::Logon => self.logon(reply_to),
            MessageKind::RegisterRequest => self.register(reply_to, msg),
            MessageKind::ResolveRequest => self.resolve(reply_to, msg),
            MessageKind::LeaseRequest => self.lease(reply_to, msg),
            MessageKind::DeregisterRequest => self.deregister(reply_to, msg),
            other => {
                warn!(kind = ?other, from = %reply_to, "Reply-type message sent to directory dropped");
                Vec::new()
            }
        }
    }

    /// Forget a node: its logon, every name it owns, and every resolve
    /// waiting to be answered on it.
    pub fn node_lost(&mut self, node: &NodeId) {
        let was_logged_on = self.logged_on.remove(node).is_some();
        let mut removed = 0;
        if let Some(names) = self.owned.remove(node) {
            for name in names {
                if self
                    .entries
                    .get(&name)
                    .is_some_and(|entry| &entry.owner == node)
                {
                    self.entries.remove(&name);
                    removed += 1;
                }
            }
        }
        let mut purged = 0;
        self.pending.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|requester| requester.node() != node);
            purged += before - queue.len();
            !queue.is_empty()
        });
        if was_logged_on || removed > 0 || purged > 0 {
            info!(
                node = %node,
                names_removed = removed,
                resolves_purged = purged,
                "Node lost"
            );
        }
    }

    /// The location currently bound to `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<&ChannelLocation> {
        match self.entries.get(name).map(|e| &e.binding) {
            Some(Binding::Bound(location)) => Some(location),
            _ => None,
        }
    }

    pub fn is_leased(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| e.binding == Binding::Leased)
    }

    pub fn owner(&self, name: &str) -> Option<&NodeId> {
        self.entries.get(name).map(|e| &e.owner)
    }

    pub fn is_logged_on(&self, node: &NodeId) -> bool {
        self.logged_on.contains_key(node)
    }

    /// When `node` logged on, if it has.
    pub fn logged_on_at(&self, node: &NodeId) -> Option<DateTime<Utc>> {
        self.logged_on.get(node).map(|r| r.logged_on_at)
    }

    /// Number of resolves waiting on `name`.
    pub fn pending_count(&self, name: &str) -> usize {
        self.pending.get(name).map_or(0, VecDeque::len)
    }

    pub fn stats(&self) -> RegistryStats {
        let leased = self
            .entries
            .values()
            .filter(|e| e.binding == Binding::Leased)
            .count();
        RegistryStats {
            nodes: self.logged_on.len(),
            bound: self.entries.len() - leased,
            leased,
            pending: self.pending.values().map(VecDeque::len).sum(),
        }
    }

    fn logon(&mut self, reply_to: ChannelLocation) -> Vec<Outgoing> {
        let node = reply_to.node().clone();
        let success = match self.logged_on.get(&node) {
            Some(existing) => {
                warn!(
                    node = %node,
                    first_reply_to = %existing.reply_to,
                    "Duplicate logon rejected"
                );
                false
            }
            None => {
                info!(node = %node, "Node logged on");
                self.logged_on.insert(
                    node,
                    LogonRecord {
                        reply_to: reply_to.clone(),
                        logged_on_at: Utc::now(),
                    },
                );
                true
            }
        };
        vec![Outgoing {
            to: reply_to,
            message: DirectoryMessage::reply(MessageKind::LogonReply, success),
        }]
    }

    fn register(&mut self, reply_to: ChannelLocation, msg: DirectoryMessage) -> Vec<Outgoing> {
        let node = reply_to.node().clone();
        let reply = |success| Outgoing {
            to: reply_to.clone(),
            message: DirectoryMessage::reply(MessageKind::RegisterReply, success)
                .with_name(msg.name.clone()),
        };

        if !self.is_logged_on(&node) {
            debug!(node = %node, name = %msg.name, "Register from node not logged on");
            return vec![reply(false)];
        }
        let Some(location) = msg.location2.clone() else {
            warn!(node = %node, name = %msg.name, "Register without a location");
            return vec![reply(false)];
        };

        if let Some(entry) = self.entries.get(&msg.name) {
            let same = entry.owner == node && entry.binding == Binding::Bound(location.clone());
            if !same {
                debug!(name = %msg.name, "Register refused, name taken");
            }
            return vec![reply(same)];
        }

        info!(name = %msg.name, location = %location, "Name registered");
        let mut out = self.bind(&msg.name, location, node, None);
        out.push(reply(true));
        out
    }

    fn resolve(&mut self, reply_to: ChannelLocation, msg: DirectoryMessage) -> Vec<Outgoing> {
        if !self.is_logged_on(reply_to.node()) {
            debug!(node = %reply_to.node(), name = %msg.name, "Resolve from node not logged on");
            return vec![Outgoing {
                to: reply_to,
                message: DirectoryMessage::reply(MessageKind::ResolveReply, false)
                    .with_name(msg.name),
            }];
        }
        if let Some(location) = self.lookup(&msg.name) {
            return vec![resolved(reply_to, &msg.name, location.clone())];
        }
        debug!(name = %msg.name, requester = %reply_to, "Resolve queued");
        self.pending.entry(msg.name).or_default().push_back(reply_to);
        Vec::new()
    }

    fn lease(&mut self, reply_to: ChannelLocation, msg: DirectoryMessage) -> Vec<Outgoing> {
        let node = reply_to.node().clone();
        let refuse = |reply_to: ChannelLocation, name: String| {
            vec![Outgoing {
                to: reply_to,
                message: DirectoryMessage::reply(MessageKind::LeaseReply, false).with_name(name),
            }]
        };

        if !self.is_logged_on(&node) {
            debug!(node = %node, name = %msg.name, "Lease from node not logged on");
            return refuse(reply_to, msg.name);
        }
        let permitted = match self.entries.get(&msg.name) {
            None => true,
            Some(entry) => match (&entry.key, &msg.key) {
                (Some(current), Some(presented)) => current == presented,
                (Some(_), None) => false,
                (None, _) => entry.owner == node,
            },
        };
        if !permitted {
            debug!(node = %node, name = %msg.name, "Lease refused");
            return refuse(reply_to, msg.name);
        }

        let key = LeaseKey::generate();
        let mut out = match msg.location2 {
            Some(location) => {
                info!(name = %msg.name, location = %location, "Name rebound under lease");
                self.bind(&msg.name, location, node, Some(key.clone()))
            }
            None => {
                info!(name = %msg.name, "Name leased, location withdrawn");
                self.set_entry(
                    &msg.name,
                    Entry {
                        binding: Binding::Leased,
                        owner: node,
                        key: Some(key.clone()),
                    },
                );
                Vec::new()
            }
        };
        out.push(Outgoing {
            to: reply_to,
            message: DirectoryMessage::reply(MessageKind::LeaseReply, true)
                .with_name(msg.name)
                .with_key(key),
        });
        out
    }

    fn deregister(&mut self, reply_to: ChannelLocation, msg: DirectoryMessage) -> Vec<Outgoing> {
        let node = reply_to.node();
        let allowed = self.is_logged_on(node)
            && self.entries.get(&msg.name).is_some_and(|entry| {
                &entry.owner == node || (entry.key.is_some() && entry.key == msg.key)
            });
        if allowed {
            if let Some(entry) = self.entries.remove(&msg.name) {
                self.disown(&entry.owner, &msg.name);
            }
            info!(name = %msg.name, "Name deregistered");
        } else {
            debug!(node = %node, name = %msg.name, "Deregister refused");
        }
        vec![Outgoing {
            to: reply_to,
            message: DirectoryMessage::reply(MessageKind::DeregisterReply, allowed)
                .with_name(msg.name),
        }]
    }

    /// Bind `name` and answer everything waiting on it, oldest first.
    fn bind(
        &mut self,
        name: &str,
        location: ChannelLocation,
        owner: NodeId,
        key: Option<LeaseKey>,
    ) -> Vec<Outgoing> {
        self.set_entry(
            name,
            Entry {
                binding: Binding::Bound(location.clone()),
                owner,
                key,
            },
        );
        self.pending
            .remove(name)
            .unwrap_or_default()
            .into_iter()
            .map(|requester| resolved(requester, name, location.clone()))
            .collect()
    }

    fn set_entry(&mut self, name: &str, entry: Entry) {
        self.owned
            .entry(entry.owner.clone())
            .or_default()
            .insert(name.to_string());
        if let Some(previous) = self.entries.insert(name.to_string(), entry) {
            if self.entries.get(name).map(|e| &e.owner) != Some(&previous.owner) {
                self.disown(&previous.owner, name);
            }
        }
    }

    fn disown(&mut self, owner: &NodeId, name: &str) {
        if let Some(names) = self.owned.get_mut(owner) {
            names.remove(name);
            if names.is_empty() {
                self.owned.remove(owner);
            }
        }
    }
}

fn resolved(to: ChannelLocation, name: &str, location: ChannelLocation) -> Outgoing {
    Outgoing {
        to,
        message: DirectoryMessage::reply(MessageKind::ResolveReply, true)
            .with_location(location)
            .with_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        id: NodeId,
    }

    impl Node {
        fn new(addr: &str) -> Self {
            Self {
                id: NodeId::new(addr),
            }
        }

        fn at(&self, index: u64) -> ChannelLocation {
            ChannelLocation::new(self.id.clone(), index)
        }

        fn reply(&self) -> ChannelLocation {
            self.at(64)
        }
    }

    fn logged_on(reg: &mut Registry, addr: &str) -> Node {
        let node = Node::new(addr);
        let out = reg.handle(DirectoryMessage::logon(node.reply()));
        assert!(out[0].message.success);
        node
    }

    #[test]
    fn test_logon_and_duplicate() {
        let mut reg = Registry::new();
        let a = Node::new("mem-1");
        let out = reg.handle(DirectoryMessage::logon(a.reply()));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, a.reply());
        assert_eq!(out[0].message.kind, MessageKind::LogonReply);
        assert!(out[0].message.success);
        assert!(reg.is_logged_on(&a.id));
        assert!(reg.logged_on_at(&a.id).is_some());

        let out = reg.handle(DirectoryMessage::logon(a.at(65)));
        assert!(!out[0].message.success);
    }

    #[test]
    fn test_requests_need_logon() {
        let mut reg = Registry::new();
        let a = Node::new("mem-1");
        let out = reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)));
        assert!(!out[0].message.success);
        let out = reg.handle(DirectoryMessage::resolve(a.reply(), "svc"));
        assert_eq!(out[0].message.kind, MessageKind::ResolveReply);
        assert!(!out[0].message.success);
        assert_eq!(reg.pending_count("svc"), 0);
        let out = reg.handle(DirectoryMessage::lease(a.reply(), "svc", None, None));
        assert!(!out[0].message.success);
    }

    #[test]
    fn test_register_then_resolve() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");

        let out = reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)));
        assert_eq!(out.len(), 1);
        assert!(out[0].message.success);

        let out = reg.handle(DirectoryMessage::resolve(b.reply(), "svc"));
        assert_eq!(out[0].to, b.reply());
        assert!(out[0].message.success);
        assert_eq!(out[0].message.location1, Some(a.at(70)));
    }

    #[test]
    fn test_pending_resolves_answered_in_order() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");

        for index in [80, 81, 82] {
            assert!(reg
                .handle(DirectoryMessage::resolve(b.at(index), "svc"))
                .is_empty());
        }
        assert_eq!(reg.pending_count("svc"), 3);

        let out = reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)));
        let targets: Vec<_> = out.iter().map(|o| o.to.index()).collect();
        assert_eq!(targets, vec![80, 81, 82, 64]);
        assert!(out[..3]
            .iter()
            .all(|o| o.message.kind == MessageKind::ResolveReply
                && o.message.location1 == Some(a.at(70))));
        assert_eq!(out[3].message.kind, MessageKind::RegisterReply);
        assert_eq!(reg.pending_count("svc"), 0);
    }

    #[test]
    fn test_name_uniqueness() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");

        assert!(reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)))[0]
            .message
            .success);
        assert!(!reg.handle(DirectoryMessage::register(b.reply(), "svc", b.at(70)))[0]
            .message
            .success);
        // Identical re-registration by the owner is idempotent.
        assert!(reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)))[0]
            .message
            .success);
        assert!(!reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(71)))[0]
            .message
            .success);
        assert_eq!(reg.lookup("svc"), Some(&a.at(70)));
    }

    #[test]
    fn test_node_lost_removes_names_and_purges_resolves() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");
        let c = logged_on(&mut reg, "mem-3");

        reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)));
        reg.handle(DirectoryMessage::resolve(b.reply(), "other"));
        reg.handle(DirectoryMessage::resolve(c.reply(), "other"));

        reg.node_lost(&a.id);
        reg.node_lost(&b.id);
        assert!(reg.lookup("svc").is_none());
        assert!(!reg.is_logged_on(&a.id));
        assert_eq!(reg.pending_count("other"), 1);

        // After loss, resolves for the name wait again.
        assert!(reg
            .handle(DirectoryMessage::resolve(c.reply(), "svc"))
            .is_empty());
        assert_eq!(reg.pending_count("svc"), 1);

        // Losing an unknown node is harmless.
        reg.node_lost(&NodeId::new("mem-9"));
        assert_eq!(reg.stats().nodes, 1);
    }

    #[test]
    fn test_lease_withdraws_and_rebinds() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");
        let c = logged_on(&mut reg, "mem-3");

        reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)));
        let out = reg.handle(DirectoryMessage::lease(a.reply(), "svc", None, None));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message.kind, MessageKind::LeaseReply);
        assert!(out[0].message.success);
        let key = out[0].message.key.clone().unwrap();
        assert!(reg.is_leased("svc"));

        // Resolves queue while the name is leased.
        assert!(reg
            .handle(DirectoryMessage::resolve(c.reply(), "svc"))
            .is_empty());

        // A different node without the key is refused.
        let out = reg.handle(DirectoryMessage::lease(b.reply(), "svc", Some(b.at(90)), None));
        assert!(!out[0].message.success);

        // With the key it may rebind, which drains the queue.
        let out = reg.handle(DirectoryMessage::lease(
            b.reply(),
            "svc",
            Some(b.at(90)),
            Some(key.clone()),
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to, c.reply());
        assert_eq!(out[0].message.location1, Some(b.at(90)));
        let renewed = out[1].message.key.clone().unwrap();
        assert_ne!(renewed, key);
        assert_eq!(reg.owner("svc"), Some(&b.id));

        // The old key is now stale.
        let out = reg.handle(DirectoryMessage::lease(a.reply(), "svc", None, Some(key)));
        assert!(!out[0].message.success);
        assert_eq!(reg.lookup("svc"), Some(&b.at(90)));
    }

    #[test]
    fn test_lease_of_free_name() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let out = reg.handle(DirectoryMessage::lease(a.reply(), "fresh", Some(a.at(70)), None));
        assert!(out[0].message.success);
        assert!(out[0].message.key.is_some());
        assert_eq!(reg.lookup("fresh"), Some(&a.at(70)));
    }

    #[test]
    fn test_deregister() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");
        reg.handle(DirectoryMessage::register(a.reply(), "svc", a.at(70)));

        let out = reg.handle(DirectoryMessage::deregister(b.reply(), "svc", None));
        assert_eq!(out[0].message.kind, MessageKind::DeregisterReply);
        assert!(!out[0].message.success);

        let out = reg.handle(DirectoryMessage::deregister(a.reply(), "svc", None));
        assert!(out[0].message.success);
        assert!(reg.lookup("svc").is_none());

        let out = reg.handle(DirectoryMessage::deregister(a.reply(), "svc", None));
        assert!(!out[0].message.success);
    }

    #[test]
    fn test_deregister_with_key() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let b = logged_on(&mut reg, "mem-2");
        let out = reg.handle(DirectoryMessage::lease(a.reply(), "svc", None, None));
        let key = out[0].message.key.clone().unwrap();

        let out = reg.handle(DirectoryMessage::deregister(b.reply(), "svc", Some(key)));
        assert!(out[0].message.success);
        assert_eq!(reg.stats(), RegistryStats {
            nodes: 2,
            ..RegistryStats::default()
        });
    }

    #[test]
    fn test_reply_kinds_and_missing_reply_location_ignored() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        let stray = DirectoryMessage::reply(MessageKind::ResolveReply, true).with_location(a.reply());
        assert!(reg.handle(stray).is_empty());
        assert!(reg
            .handle(DirectoryMessage::new(MessageKind::ResolveRequest).with_name("svc"))
            .is_empty());
    }

    #[test]
    fn test_stats() {
        let mut reg = Registry::new();
        let a = logged_on(&mut reg, "mem-1");
        reg.handle(DirectoryMessage::register(a.reply(), "one", a.at(70)));
        reg.handle(DirectoryMessage::lease(a.reply(), "two", None, None));
        reg.handle(DirectoryMessage::resolve(a.reply(), "three"));
        assert_eq!(
            reg.stats(),
            RegistryStats {
                nodes: 1,
                bound: 1,
                leased: 1,
                pending: 1,
            }
        );
    }
}
