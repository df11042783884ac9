//! Similarity ranking and recommendation logic

pub mod recommend;
pub mod similarity;

pub use recommend::RecommendationResolver;
pub use similarity::{SimilarityEngine, SimilarityHit, DEFAULT_LIMIT, OVERFETCH};
