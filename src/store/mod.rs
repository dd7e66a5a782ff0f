// Persistent state: the install-wide metadata document and the
// per-working-copy execution tracker.
pub mod metadata;
pub mod tracker;

pub use metadata::{ChallengeMeta, MetadataStore};
pub use tracker::{TrackedOutcome, Tracker};
