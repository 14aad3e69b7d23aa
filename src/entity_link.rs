//! Entity-to-script identity links.
//!
//! Each native simulation object is identified by a stable `uid` assigned by
//! the entity system. When it gets a script-side peer, the pair is stored in
//! a generation-checked arena: the `LinkId` handed out for a link stops
//! resolving as soon as the link is released, even if the slot (or the uid)
//! is reused by a later object.
//!
//! Links are pure associations. The native object is owned by the entity
//! system, and the peer value is owned by the script runtime.

use std::collections::HashMap;
use std::fmt;

use rhai::Dynamic;

use crate::error::{BridgeError, BridgeResult};

/// Entity uid as assigned by the native entity system.
pub type Uid = i64;

/// Generation-checked handle to a link slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId {
    index: u32,
    generation: u32,
}

impl LinkId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct LiveLink {
    uid: Uid,
    peer: Dynamic,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    link: Option<LiveLink>,
}

#[derive(Debug, Default)]
pub struct LinkRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_uid: HashMap<Uid, LinkId>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `uid` with its script peer.
    ///
    /// Fails if `uid` already has a live link; the previous link must be
    /// released with [`unlink`](Self::unlink) first.
    pub fn link(&mut self, uid: Uid, peer: Dynamic) -> BridgeResult<LinkId> {
        if self.by_uid.contains_key(&uid) {
            return Err(BridgeError::AlreadyLinked(uid));
        }

        // Shared so script-side mutation of the peer stays visible to later lookups.
        let link = LiveLink { uid, peer: peer.into_shared() };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.link = Some(link);
                LinkId { index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, link: Some(link) });
                LinkId { index, generation: 0 }
            }
        };
        self.by_uid.insert(uid, id);
        Ok(id)
    }

    /// Peer linked to `uid`. Absence is normal: the entity may have been
    /// destroyed or may never have had a script peer.
    pub fn lookup(&self, uid: Uid) -> Option<Dynamic> {
        let id = self.by_uid.get(&uid)?;
        self.resolve(*id).map(|(_, peer)| peer)
    }

    /// Resolve a link handle. Stale handles (released links) return `None`.
    pub fn resolve(&self, id: LinkId) -> Option<(Uid, Dynamic)> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.link.as_ref().map(|link| (link.uid, link.peer.clone()))
    }

    pub fn link_id(&self, uid: Uid) -> Option<LinkId> {
        self.by_uid.get(&uid).copied()
    }

    /// Release the link for `uid`, returning the peer it held.
    pub fn unlink(&mut self, uid: Uid) -> Option<Dynamic> {
        let id = self.by_uid.remove(&uid)?;
        let slot = &mut self.slots[id.index as usize];
        let link = slot.link.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        link.map(|l| l.peer)
    }

    pub fn is_linked(&self, uid: Uid) -> bool {
        self.by_uid.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }

    pub fn uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.by_uid.keys().copied()
    }

    /// Release every link.
    pub fn clear(&mut self) {
        let uids: Vec<Uid> = self.by_uid.keys().copied().collect();
        for uid in uids {
            self.unlink(uid);
        }
    }
}
