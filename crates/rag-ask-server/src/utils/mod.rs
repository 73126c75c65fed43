pub mod error;
pub mod freshness;
pub mod similarity;
