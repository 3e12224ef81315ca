pub mod api;
pub mod card_generator;
pub mod config;
pub mod database;
pub mod errors;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod task_store;

pub use card_generator::CardGeneratorService;
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use llm_providers::{JsonResponseParser, ModelClient, ProviderKind, build_model_client};
pub use models::*;
pub use pipeline::{CancelOutcome, GenerationPipeline};
pub use planner::PlannerService;
pub use task_store::TaskStatusTable;
