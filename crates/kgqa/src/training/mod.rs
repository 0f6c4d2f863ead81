//! Training pipeline: dataset adapter and batcher, early-stopping session,
//! checkpoint naming and persistence, and the epoch/phase driver.

pub mod checkpoint;
pub mod data;
pub mod metrics;
pub mod session;
pub mod trainer;
