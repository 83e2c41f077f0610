//! Service layer for business logic
//!
//! [`AttemptGate`] decides on each attempt, [`LockoutTracker`] keeps the
//! attempt history that decision reads, and [`ChallengeIssuer`] hands out the
//! per-session math challenge.

pub mod challenge;
pub mod gate;
pub mod lockout;

pub use challenge::{ChallengeIssuer, MathChallenge};
pub use gate::{AttemptContext, AttemptGate, Evaluation, Verdict};
pub use lockout::{FailureOutcome, LockoutTracker};
