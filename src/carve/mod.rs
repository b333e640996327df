//! Recovering deleted records from bytes no live cell explains.

pub mod carver;
pub mod gaps;
pub mod matcher;
pub mod policy;

pub use carver::{CarvedRecord, Carver};
pub use gaps::{Gap, GapTracker};
pub use matcher::CarveMode;
pub use policy::{DeclaredTypePolicy, FirstColumnPolicy};
