//! Core deterministic primitives.
//!
//! Everything here is bit-reproducible given the same inputs. The
//! simulation, transcript and replay verifier are built on these.

pub mod vec2;
pub mod rng;
pub mod hash;

// Re-export core types
pub use vec2::Vec2;
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash, StateHasher};
