//! # Traffic Router
//!
//! ## Responsibility
//! Answer "which environment serves this request?" on the request hot path.
//!
//! ## Guarantees
//! - Lock-free: reads a single `AtomicU64` snapshot published by the
//!   controller; never touches the controller's mutex
//! - Consistent per read: stable environment, canary flag, and canary share
//!   are packed into one word, so a reader never sees a torn combination
//! - Statistical: with a canary at `p`% and uniformly random keys, the canary
//!   receives `p`% of requests in expectation
//!
//! ## NOT Responsible For
//! - Forwarding the request (the surrounding proxy layer does that)
//! - Deciding the split (that belongs to `controller`)

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::types::Environment;

const CANARY_ACTIVE_BIT: u64 = 1 << 8;
const CANARY_PCT_SHIFT: u32 = 16;

/// The routing-relevant view of the controller state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    /// Environment serving all non-canary traffic.
    pub stable: Environment,
    /// Canary share in percent, `None` when no canary is active.
    pub canary_percentage: Option<u8>,
}

impl RoutingSnapshot {
    fn pack(&self) -> u64 {
        let mut word = u64::from(self.stable.tag());
        if let Some(pct) = self.canary_percentage {
            word |= CANARY_ACTIVE_BIT;
            word |= u64::from(pct.min(100)) << CANARY_PCT_SHIFT;
        }
        word
    }

    fn unpack(word: u64) -> Self {
        let stable = Environment::from_tag((word & 0xff) as u8);
        let canary_percentage = if word & CANARY_ACTIVE_BIT != 0 {
            Some(((word >> CANARY_PCT_SHIFT) & 0xff) as u8)
        } else {
            None
        };
        Self {
            stable,
            canary_percentage,
        }
    }

    /// Route a request whose draw in `[0, 100)` is already known.
    pub fn route_draw(&self, draw: u8) -> Environment {
        match self.canary_percentage {
            Some(pct) if draw < pct => Environment::Canary,
            _ => self.stable,
        }
    }
}

/// How a request is mapped onto the `[0, 100)` draw.
#[derive(Debug, Clone, Copy)]
pub enum RoutingKey<'a> {
    /// Independent uniform draw per request.
    Random,
    /// Stable hash of a session or user key, so the same key keeps landing
    /// on the same side of the split.
    Sticky(&'a str),
}

impl RoutingKey<'_> {
    fn draw(&self) -> u8 {
        match self {
            RoutingKey::Random => rand::thread_rng().gen_range(0..100),
            RoutingKey::Sticky(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % 100) as u8
            }
        }
    }
}

/// Cheaply cloneable handle onto the published routing snapshot.
#[derive(Debug, Clone)]
pub struct TrafficRouter {
    word: Arc<AtomicU64>,
}

impl TrafficRouter {
    pub(crate) fn new(initial: RoutingSnapshot) -> Self {
        Self {
            word: Arc::new(AtomicU64::new(initial.pack())),
        }
    }

    /// Replace the snapshot seen by every clone of this router.
    pub(crate) fn publish(&self, snapshot: RoutingSnapshot) {
        self.word.store(snapshot.pack(), Ordering::Release);
    }

    /// Read the current snapshot.
    pub fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot::unpack(self.word.load(Ordering::Acquire))
    }

    /// Pick the environment for one request.
    pub fn route(&self, key: RoutingKey<'_>) -> Environment {
        let snapshot = self.snapshot();
        if snapshot.canary_percentage.is_none() {
            return snapshot.stable;
        }
        snapshot.route_draw(key.draw())
    }
}
