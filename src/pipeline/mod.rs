pub mod adapter;

pub use adapter::{AdapterStats, PullAdapter, PullOutcome};
