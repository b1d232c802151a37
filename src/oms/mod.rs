//! Ladder order management
//!
//! Tier matching, admission, outstanding-order handling and submission.
//! Everything here works on a single ladder cycle; scheduling lives in
//! [`crate::scheduler`].

pub mod admission;
pub mod execution;
pub mod order_guard;
pub mod tier_matcher;

pub use admission::{
    exceeds_deviation, price_deviation, AdmissionController, AdmissionRequest, AdmissionVerdict,
    RejectReason,
};
pub use execution::OrderExecutor;
pub use order_guard::{GuardDecision, OutstandingOrderGuard};
pub use tier_matcher::{MatchMode, TierMatcher, TierResolution};
