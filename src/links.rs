use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use crate::actor::{ActorId, ActorRef, ActorShared};
use crate::exit::ExitReason;

/// The link graph, kept outside the actors themselves.
///
/// Adjacency is id-keyed; the actor table holds weak handles only, so the
/// registry never keeps a dead actor alive. One registry exists per
/// scheduler pool.
pub(crate) struct LinkRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    actors: HashMap<ActorId, Weak<ActorShared>>,
    links: HashMap<ActorId, HashSet<ActorId>>,
}

impl LinkRegistry {
    pub(crate) fn new() -> LinkRegistry {
        LinkRegistry {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, actor: &ActorRef) {
        self.lock()
            .actors
            .insert(actor.id(), std::sync::Arc::downgrade(&actor.shared));
    }

    pub(crate) fn unregister(&self, id: ActorId) {
        self.lock().actors.remove(&id);
    }

    pub(crate) fn lookup(&self, id: ActorId) -> Option<ActorRef> {
        self.lock()
            .actors
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|shared| ActorRef { shared })
    }

    /// Adds the symmetric link `a ↔ b`. Repeating the call changes nothing;
    /// either end being gone makes it a no-op.
    pub(crate) fn link(&self, a: &ActorRef, b: &ActorRef) {
        if a.id() == b.id() {
            return;
        }
        let mut inner = self.lock();
        if !inner.actors.contains_key(&a.id()) || !inner.actors.contains_key(&b.id()) {
            return;
        }
        inner.links.entry(a.id()).or_default().insert(b.id());
        inner.links.entry(b.id()).or_default().insert(a.id());
    }

    pub(crate) fn unlink(&self, a: ActorId, b: ActorId) {
        let mut inner = self.lock();
        remove_edge(&mut *inner, a, b);
        remove_edge(&mut *inner, b, a);
    }

    pub(crate) fn links_of(&self, id: ActorId) -> Vec<ActorId> {
        self.lock()
            .links
            .get(&id)
            .map(|peers| peers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes every edge touching `id` (both directions) and returns the
    /// former peers. The terminating actor unlinks before it signals, so a
    /// later termination of a peer cannot re-signal it.
    pub(crate) fn drain_links(&self, id: ActorId) -> Vec<ActorId> {
        let mut inner = self.lock();
        let peers: Vec<ActorId> = inner
            .links
            .remove(&id)
            .map(|peers| peers.into_iter().collect())
            .unwrap_or_default();
        for peer in &peers {
            remove_edge(&mut *inner, *peer, id);
        }
        peers
    }
}

fn remove_edge(inner: &mut RegistryInner, from: ActorId, to: ActorId) {
    let emptied = match inner.links.get_mut(&from) {
        Some(peers) => {
            peers.remove(&to);
            peers.is_empty()
        }
        None => false,
    };
    if emptied {
        inner.links.remove(&from);
    }
}

/// Visits every peer linked to the terminating actor and delivers its exit:
/// trappers get an [`crate::Exit`] message, everyone else is terminated in
/// turn when the reason is abnormal.
///
/// `visited` caps the recursion over link cycles: peers terminated inline
/// (detached event-waiters) propagate through the same set, and entering an
/// actor already in it is a no-op.
pub(crate) fn propagate_exit(
    from: &ActorRef,
    reason: &ExitReason,
    visited: &mut HashSet<ActorId>,
) {
    if !visited.insert(from.id()) {
        return;
    }
    let registry = from.registry().clone();
    let peers = registry.drain_links(from.id());
    registry.unregister(from.id());
    for peer_id in peers {
        if peer_id == from.id() {
            continue;
        }
        let peer = match registry.lookup(peer_id) {
            Some(peer) => peer,
            None => continue,
        };
        if peer.traps_exit() {
            peer.deliver_exit_signal(from, reason);
        } else if !reason.is_normal() {
            peer.kill(reason.clone(), visited);
        }
    }
}
