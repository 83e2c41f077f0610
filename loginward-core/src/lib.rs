//! Core functionality for loginward
//!
//! This crate contains the decision logic of the login guard: the
//! [`AttemptGate`] that rules on each authentication attempt and the
//! [`LockoutTracker`] that turns a history of failures into lockouts.
//!
//! Storage is abstracted behind [`AttemptRepository`]; time behind [`Clock`].
//! Durable backends live in their own crates (see `loginward-storage-sqlite`).
pub mod clock;
pub mod error;
pub mod policy;
pub mod repositories;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use policy::{FailureWindow, LockoutPolicy, LockoutSchedule, LookupFailureMode, PolicySettings};
pub use repositories::{
    AttemptRepository, ChallengeStore, InMemoryAttemptRepository, InMemoryChallengeStore,
};
pub use services::{
    AttemptContext, AttemptGate, ChallengeIssuer, Evaluation, FailureOutcome, LockoutTracker,
    MathChallenge, Verdict,
};
pub use storage::{
    AttemptKey, AttemptRecord, AttemptStatus, LockoutInfo, LockoutStatus, NewAttemptRecord,
    RecordFilter,
};
