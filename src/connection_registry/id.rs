//! Connection id generation

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use super::types::ConnectionId;

/// Produces candidate connection ids.
///
/// Uniqueness is best-effort: the registry rejects candidates that collide
/// with a live id and asks again, a bounded number of times.
pub trait IdGenerator: Send + Sync {
    fn generate(&self, user_id: &str, session_id: &str) -> ConnectionId;
}

/// `user:session:xxxxxxxx` with a random 32-bit hex token
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self, user_id: &str, session_id: &str) -> ConnectionId {
        let token: u32 = rand::rng().random();
        ConnectionId::new(format!("{user_id}:{session_id}:{token:08x}"))
    }
}

/// Deterministic ids (`user:session:00000001`, ...), for tests and replays
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate(&self, user_id: &str, session_id: &str) -> ConnectionId {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        ConnectionId::new(format!("{user_id}:{session_id}:{n:08x}"))
    }
}
