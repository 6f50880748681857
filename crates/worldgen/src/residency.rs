//! Bounded "keep loaded" reservations on host chunks.
//!
//! Every reservation is tagged with the token of the task or road job that
//! holds it, so a finished job releases exactly what it acquired.

use std::collections::{BTreeSet, HashMap};

use bevy::prelude::*;

use crate::geometry::ChunkPos;
use crate::host::{ChunkTickets, TicketToken};

#[derive(Resource, Default, Debug)]
pub struct ChunkResidency {
    next_token: u64,
    held: HashMap<TicketToken, BTreeSet<ChunkPos>>,
    total: usize,
}

impl ChunkResidency {
    pub fn new_token(&mut self) -> TicketToken {
        self.next_token += 1;
        TicketToken(self.next_token)
    }

    /// Reserve `chunk` for `token`. Returns `false` when the global cap is
    /// reached; already-held chunks always succeed.
    pub fn acquire<T: ChunkTickets + ?Sized>(
        &mut self,
        host: &mut T,
        token: TicketToken,
        chunk: ChunkPos,
        max_reservations: usize,
    ) -> bool {
        let set = self.held.entry(token).or_default();
        if set.contains(&chunk) {
            return true;
        }
        if self.total >= max_reservations {
            return false;
        }
        host.acquire(chunk.x, chunk.z, token);
        set.insert(chunk);
        self.total += 1;
        true
    }

    /// Release every chunk held by `token`.
    pub fn release_all<T: ChunkTickets + ?Sized>(&mut self, host: &mut T, token: TicketToken) {
        let Some(set) = self.held.remove(&token) else {
            return;
        };
        for chunk in &set {
            host.release(chunk.x, chunk.z, token);
        }
        self.total = self.total.saturating_sub(set.len());
        debug!("Released {} chunk reservations for {:?}", set.len(), token);
    }

    /// Release every reservation of every token.
    pub fn release_everything<T: ChunkTickets + ?Sized>(&mut self, host: &mut T) {
        let tokens: Vec<TicketToken> = self.held.keys().copied().collect();
        for token in tokens {
            self.release_all(host, token);
        }
    }

    /// Drop all bookkeeping without calling the host. Used while the host is
    /// shutting down and its ticket API may no longer be safe to call.
    pub fn forget_all(&mut self) {
        if self.total > 0 {
            info!(
                "Forgetting {} chunk reservations without releasing them",
                self.total
            );
        }
        self.held.clear();
        self.total = 0;
    }

    pub fn held_by(&self, token: TicketToken) -> usize {
        self.held.get(&token).map_or(0, BTreeSet::len)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
