//! Retention policy and cutoff selection.
//!
//! A [`RetentionPolicy`] bounds the raw sample store by age, by row count, or
//! both. The [`CutoffSelector`] turns the policy and the current store
//! population into a [`CutoffBoundary`]: every sample with
//! `timestamp <= boundary.instant` is eligible for archival.

pub mod cutoff;
pub mod policy;

pub use cutoff::{CutoffBoundary, CutoffSelector, CutoffTrigger};
pub use policy::RetentionPolicy;
