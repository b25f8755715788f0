//! State Hashing for Verification
//!
//! Provides deterministic hashing of simulation state for:
//! - Transcript checkpoints
//! - Replay validation
//! - Config identity (a run records which maze it was played on)

use sha2::{Sha256, Digest};
use super::vec2::Vec2;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for simulation state.
///
/// Wraps SHA-256 with helpers for the engine's value types.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for game state.
    pub fn for_game_state() -> Self {
        Self::new(b"MAZE_ARENA_STATE_V1")
    }

    /// Create hasher for a per-tick action batch.
    pub fn for_actions() -> Self {
        Self::new(b"MAZE_ARENA_ACTIONS_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f64 by its exact bit pattern.
    ///
    /// `-0.0` and `0.0` hash differently; state never carries `NaN`.
    #[inline]
    pub fn update_f64(&mut self, value: f64) {
        self.update_u64(value.to_bits());
    }

    /// Update with a Vec2.
    #[inline]
    pub fn update_vec2(&mut self, value: Vec2) {
        self.update_f64(value.x);
        self.update_f64(value.y);
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with an optional index, tagging presence.
    #[inline]
    pub fn update_opt_u32(&mut self, value: Option<u32>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u32(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute state hash for replay verification.
///
/// This function is called by `GameState::compute_hash()`.
/// The closure adds state-specific data after the tick and RNG state.
pub fn compute_state_hash<F>(tick: u64, rng_state: [u64; 2], add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_game_state();

    // Always hash tick and noise stream position first
    hasher.update_u64(tick);
    hasher.update_u64(rng_state[0]);
    hasher.update_u64(rng_state[1]);

    add_state(&mut hasher);

    hasher.finalize()
}

/// Short hex prefix for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}

// =============================================================================
// TESTS
// =============================================================================
