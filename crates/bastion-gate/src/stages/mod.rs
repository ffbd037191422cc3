pub mod chain;
pub mod idempotency;
pub mod self_hash;
pub mod sequence;

pub use chain::ChainStage;
pub use idempotency::IdempotencyStage;
pub use self_hash::SelfHashStage;
pub use sequence::SequenceStage;
