//! Few-shot dataset fold construction for COCO-style detection corpora.

mod common;

pub mod corpus;
pub mod error;
pub mod filter;
pub mod fold;
pub mod inspect;
pub mod layout;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod sampler;
pub mod verify;

pub use corpus::*;
pub use error::*;
pub use filter::*;
pub use fold::*;
pub use inspect::*;
pub use layout::*;
pub use metrics::*;
pub use orchestrator::*;
pub use registry::*;
pub use sampler::*;
pub use verify::*;

#[cfg(test)]
mod test_utils;
