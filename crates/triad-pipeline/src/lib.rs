//! §4.F-4.K — stage runner, rank/grade, briefing pre-warm, and the
//! orchestrator that sequences them against a `StateStore`.

pub mod grading;
pub mod json_parsing;
pub mod orchestrator;
pub mod planner_schema;
pub mod prewarm;
pub mod stage;

pub use grading::{rank_and_grade, coordinates_match_provenance, value_per_min, GradingConfig};
pub use orchestrator::{OrchestratorConfig, PipelineOrchestrator, PipelineRunOutcome};
pub use planner_schema::{RawPlannerOutput, RawVenue};
pub use prewarm::{spawn_prewarm, PrewarmHandle, PrewarmedBriefingInputs, SubFetch};
pub use stage::{ProviderRegistry, StageOutcome, StageRunner};
