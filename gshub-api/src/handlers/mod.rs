pub mod callbacks;
pub mod instances;
pub mod rollout;
