//! Published-actor registry.
//!
//! Maps local listening ports to the actor advertised on them. The server
//! handshake for a port carries the published actor's id and interface
//! signatures so the dialing side can resolve it.

use std::collections::{BTreeSet, HashMap};

use basp_core::ActorAddr;

/// An actor advertised on a local port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedActor {
    /// Address of the advertised actor.
    pub addr: ActorAddr,
    /// Interface signatures the dialing side may type-check against.
    pub signatures: BTreeSet<String>,
}

/// Port-keyed registry of published actors.
#[derive(Debug, Default)]
pub struct PublishedActors {
    entries: HashMap<u16, PublishedActor>,
}

impl PublishedActors {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `addr` on `port`. Last writer wins per port.
    pub fn insert(
        &mut self,
        port: u16,
        addr: ActorAddr,
        signatures: BTreeSet<String>,
    ) -> &PublishedActor {
        let entry = self.entries.entry(port).or_default();
        *entry = PublishedActor { addr, signatures };
        entry
    }

    /// The actor published on `port`, if any.
    pub fn get(&self, port: u16) -> Option<&PublishedActor> {
        self.entries.get(&port)
    }

    /// Remove whatever is published on `port`. Returns the number of
    /// entries removed (0 or 1).
    pub fn remove_port(
        &mut self,
        port: u16,
        mut on_removed: Option<&mut dyn FnMut(ActorAddr, u16)>,
    ) -> usize {
        match self.entries.remove(&port) {
            Some(entry) => {
                if let Some(cb) = on_removed.as_mut() {
                    cb(entry.addr, port);
                }
                1
            }
            None => 0,
        }
    }

    /// Remove publications of `whom`.
    ///
    /// With `port == 0`, sweeps every port bound to `whom`; otherwise
    /// removes the entry at `port` only if it names `whom`. Returns the
    /// number of entries removed.
    pub fn remove_actor(
        &mut self,
        whom: ActorAddr,
        port: u16,
        mut on_removed: Option<&mut dyn FnMut(ActorAddr, u16)>,
    ) -> usize {
        if port != 0 {
            let matches = self.entries.get(&port).is_some_and(|e| e.addr == whom);
            if !matches {
                return 0;
            }
            self.entries.remove(&port);
            if let Some(cb) = on_removed.as_mut() {
                cb(whom, port);
            }
            return 1;
        }
        let ports: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.addr == whom)
            .map(|(&port, _)| port)
            .collect();
        for &port in &ports {
            self.entries.remove(&port);
            if let Some(cb) = on_removed.as_mut() {
                cb(whom, port);
            }
        }
        ports.len()
    }

    /// Number of published entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basp_core::{ActorId, NodeId};

    fn addr(aid: u32) -> ActorAddr {
        ActorAddr::new(NodeId::new(1), ActorId::new(aid))
    }

    fn sigs(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_last_writer_wins_per_port() {
        let mut reg = PublishedActors::new();
        reg.insert(4000, addr(1), sigs(&["A"]));
        reg.insert(4000, addr(2), sigs(&["B"]));
        assert_eq!(reg.len(), 1);
        let entry = reg.get(4000).expect("entry");
        assert_eq!(entry.addr, addr(2));
        assert_eq!(entry.signatures, sigs(&["B"]));
    }

    #[test]
    fn test_remove_port() {
        let mut reg = PublishedActors::new();
        reg.insert(4000, addr(1), sigs(&[]));

        let mut removed = Vec::new();
        let mut cb = |a: ActorAddr, p: u16| removed.push((a, p));
        assert_eq!(reg.remove_port(4000, Some(&mut cb)), 1);
        assert_eq!(reg.remove_port(4000, Some(&mut cb)), 0);
        assert_eq!(removed, vec![(addr(1), 4000)]);
    }

    #[test]
    fn test_remove_actor_at_port_checks_identity() {
        let mut reg = PublishedActors::new();
        reg.insert(4000, addr(1), sigs(&[]));
        assert_eq!(reg.remove_actor(addr(2), 4000, None), 0);
        assert_eq!(reg.remove_actor(addr(1), 4000, None), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_remove_actor_port_zero_sweeps() {
        let mut reg = PublishedActors::new();
        reg.insert(4000, addr(1), sigs(&[]));
        reg.insert(4001, addr(1), sigs(&[]));
        reg.insert(4002, addr(2), sigs(&[]));

        let mut removed = Vec::new();
        let mut cb = |a: ActorAddr, p: u16| removed.push((a, p));
        assert_eq!(reg.remove_actor(addr(1), 0, Some(&mut cb)), 2);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(4002).is_some());
        removed.sort_by_key(|(_, p)| *p);
        assert_eq!(removed, vec![(addr(1), 4000), (addr(1), 4001)]);
    }
}
