pub mod analyzer;
pub mod assignment;
pub mod contextual;
pub mod experiments;
pub mod profile;
pub mod recommendations;
pub mod recorder;
pub mod scoring;
pub mod statistics;

pub use analyzer::{Effect, ExperimentAnalyzer, ExperimentResults, SignificanceResult, VariantResult};
pub use assignment::VariantAssigner;
pub use experiments::ExperimentRegistry;
pub use recommendations::{
    ExperimentRecommendations, RecommendationEngine, RecommendationRequest, DEFAULT_COUNT,
};
pub use recorder::{InteractionRecorder, RecordedInteraction};
