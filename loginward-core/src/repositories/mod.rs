//! Repository traits for the data access layer
//!
//! The tracker only talks to storage through [`AttemptRepository`] and the
//! challenge issuer through [`ChallengeStore`]. Durable backends live in their
//! own crates; the in-memory implementations here serve single-process
//! deployments and tests.

pub mod attempt;
pub mod challenge;
pub mod memory;

pub use attempt::AttemptRepository;
pub use challenge::{ChallengeStore, InMemoryChallengeStore};
pub use memory::InMemoryAttemptRepository;
