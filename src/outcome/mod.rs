// Classification of raw driver output into structured test outcomes.
pub mod classifier;

pub use classifier::{classify, TestOutcome};
