mod args;
mod driver;
mod proc;
mod progress;
mod types;
mod write;

pub use args::*;
pub use driver::{SpectraClusterer, SpectraClustererError};
pub use progress::{ClusteringSummary, ProgressRecord};
pub use write::{ClusterRecord, ClusteringWriter, MemberRecord};
