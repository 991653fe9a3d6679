pub mod orchestrator;

pub use orchestrator::{AnalysisBatch, AnalysisOrchestrator, AnalysisResult, BatchOutcome};
