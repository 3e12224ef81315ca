use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Starting,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    CompletedWithErrors,
}

impl TaskStatus {
    /// Terminal statuses stamp `ended_at` and are never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Timeout
                | TaskStatus::Cancelled
                | TaskStatus::CompletedWithErrors
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::CompletedWithErrors => "completed_with_errors",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "queued" => Some(TaskStatus::Queued),
            "starting" => Some(TaskStatus::Starting),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "timeout" => Some(TaskStatus::Timeout),
            "cancelled" => Some(TaskStatus::Cancelled),
            "completed_with_errors" => Some(TaskStatus::CompletedWithErrors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    Queued,
    Initializing,
    ExtractingGoals,
    PlanningStructure,
    SavingStructure,
    StructureSaved,
    GeneratingCards,
    Finished,
}

impl TaskStage {
    /// Position in the forward-only stage progression.
    pub fn rank(&self) -> u8 {
        match self {
            TaskStage::Queued => 0,
            TaskStage::Initializing => 1,
            TaskStage::ExtractingGoals => 2,
            TaskStage::PlanningStructure => 3,
            TaskStage::SavingStructure => 4,
            TaskStage::StructureSaved => 5,
            TaskStage::GeneratingCards => 6,
            TaskStage::Finished => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Queued => "queued",
            TaskStage::Initializing => "initializing",
            TaskStage::ExtractingGoals => "extracting_goals",
            TaskStage::PlanningStructure => "planning_structure",
            TaskStage::SavingStructure => "saving_structure",
            TaskStage::StructureSaved => "structure_saved",
            TaskStage::GeneratingCards => "generating_cards",
            TaskStage::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(TaskStage::Queued),
            "initializing" => Some(TaskStage::Initializing),
            "extracting_goals" => Some(TaskStage::ExtractingGoals),
            "planning_structure" => Some(TaskStage::PlanningStructure),
            "saving_structure" => Some(TaskStage::SavingStructure),
            "structure_saved" => Some(TaskStage::StructureSaved),
            "generating_cards" => Some(TaskStage::GeneratingCards),
            "finished" => Some(TaskStage::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    Pending,
    Generating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionGenerationStatus {
    pub section_id: Uuid,
    pub title: String,
    pub state: SectionState,
    pub cards_generated: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub section_id: Option<Uuid>,
    pub section_title: Option<String>,
    pub message: String,
}

/// Live in-flight view of a task, held only in the in-memory status table.
/// Richer than the durable record: per-section detail and card counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTaskStatus {
    pub task_id: String,
    pub user_id: i64,
    pub learning_path_id: Option<Uuid>,
    pub status: TaskStatus,
    pub stage: Option<TaskStage>,
    pub progress: f64, // 0.0 - 100.0
    pub message: Option<String>,
    pub errors: Vec<TaskError>,
    pub error_details: Option<String>,
    pub sections: HashMap<Uuid, SectionGenerationStatus>,
    pub cards_expected: usize,
    pub cards_completed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl LiveTaskStatus {
    pub fn new(task_id: String, user_id: i64, learning_path_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            user_id,
            learning_path_id,
            status: TaskStatus::Queued,
            stage: Some(TaskStage::Queued),
            progress: 0.0,
            message: Some("Task queued".to_string()),
            errors: Vec::new(),
            error_details: None,
            sections: HashMap::new(),
            cards_expected: 0,
            cards_completed: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
        }
    }
}

/// Partial update applied to a live table entry. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskStatusUpdate {
    pub status: Option<TaskStatus>,
    pub stage: Option<TaskStage>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub learning_path_id: Option<Uuid>,
    pub error: Option<TaskError>, // appended to the error list
    pub error_details: Option<String>,
    pub section: Option<SectionGenerationStatus>, // upserted by section id
    pub cards_expected: Option<usize>,
    pub cards_completed: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Durable task row. Survives restarts and table eviction; source of truth
/// for task existence and final state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub user_id: i64,
    pub learning_path_id: Option<Uuid>,
    pub status: TaskStatus,
    pub stage: Option<TaskStage>,
    pub progress: f64,
    pub message: Option<String>,
    pub error_details: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRecordUpdate {
    pub status: Option<TaskStatus>,
    pub stage: Option<TaskStage>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub error_details: Option<String>,
    pub learning_path_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Unified status answer: live entry when present, durable record otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub user_id: i64,
    pub learning_path_id: Option<Uuid>,
    pub status: TaskStatus,
    pub stage: Option<TaskStage>,
    pub progress: f64,
    pub message: Option<String>,
    pub errors: Vec<TaskError>,
    pub error_details: Option<String>,
    pub sections: Vec<SectionGenerationStatus>,
    pub sections_completed: usize,
    pub sections_failed: usize,
    pub cards_expected: usize,
    pub cards_completed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskStatusView {
    pub fn from_live(live: &LiveTaskStatus) -> Self {
        let mut sections: Vec<SectionGenerationStatus> = live.sections.values().cloned().collect();
        sections.sort_by(|a, b| a.title.cmp(&b.title));
        let sections_completed = sections
            .iter()
            .filter(|s| s.state == SectionState::Completed)
            .count();
        let sections_failed = sections
            .iter()
            .filter(|s| s.state == SectionState::Failed)
            .count();
        Self {
            task_id: live.task_id.clone(),
            user_id: live.user_id,
            learning_path_id: live.learning_path_id,
            status: live.status,
            stage: live.stage,
            progress: live.progress,
            message: live.message.clone(),
            errors: live.errors.clone(),
            error_details: live.error_details.clone(),
            sections,
            sections_completed,
            sections_failed,
            cards_expected: live.cards_expected,
            cards_completed: live.cards_completed,
            created_at: live.created_at,
            updated_at: live.updated_at,
            started_at: live.started_at,
            ended_at: live.ended_at,
        }
    }

    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            user_id: record.user_id,
            learning_path_id: record.learning_path_id,
            status: record.status,
            stage: record.stage,
            progress: record.progress,
            message: record.message.clone(),
            errors: Vec::new(),
            error_details: record.error_details.clone(),
            sections: Vec::new(),
            sections_completed: 0,
            sections_failed: 0,
            cards_expected: 0,
            cards_completed: 0,
            created_at: record.created_at,
            updated_at: record.updated_at,
            started_at: record.started_at,
            ended_at: record.ended_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningGoals {
    pub interests: Vec<String>,
    pub difficulty_level: String, // beginner, intermediate, advanced
    pub estimated_days: i64,
}

/// Planner output before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPlan {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub difficulty_level: String,
    pub estimated_days: i64,
    pub courses: Vec<CoursePlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursePlan {
    pub title: String,
    pub description: Option<String>,
    pub estimated_days: Option<i64>,
    pub sections: Vec<SectionPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionPlan {
    pub title: String,
    pub description: Option<String>,
    pub estimated_days: Option<i64>,
    #[serde(default)]
    pub card_keywords: Vec<String>,
}

/// Persisted skeleton with database ids, as returned by the transactional save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStructure {
    pub learning_path_id: Uuid,
    pub title: String,
    pub difficulty_level: String,
    pub courses: Vec<CourseStructure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStructure {
    pub course_id: Uuid,
    pub title: String,
    pub sections: Vec<SectionStructure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionStructure {
    pub section_id: Uuid,
    pub title: String,
    pub keywords: Vec<String>,
    pub existing_cards: usize,
}

/// One generated card before persistence. Carries the keyword it was
/// generated for so completion order never changes attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDraft {
    pub keyword: String,
    pub question: String,
    pub answer: String,
    pub explanation: String,
    pub difficulty: String,
    #[serde(default)]
    pub resources: Vec<CardResource>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardResource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Card {
    pub id: Uuid,
    pub keyword: String,
    pub question: String,
    pub answer: String,
    pub explanation: String,
    pub difficulty: String,
    pub resources: Option<String>, // JSON array of {title, url}
    pub tags: Option<String>,      // JSON array of strings
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseTitles {
    pub title: String,
    pub sections: Vec<String>,
}

/// What the caller asked the pipeline to do.
#[derive(Debug, Clone)]
pub enum GenerationRequest {
    FromPrompt {
        user_id: i64,
        prompt: String,
    },
    FromStructure {
        user_id: i64,
        title: String,
        courses: Vec<CourseTitles>,
        difficulty_level: String,
        estimated_days: i64,
    },
    FromExistingPath {
        user_id: i64,
        learning_path_id: Uuid,
    },
}

impl GenerationRequest {
    pub fn user_id(&self) -> i64 {
        match self {
            GenerationRequest::FromPrompt { user_id, .. } => *user_id,
            GenerationRequest::FromStructure { user_id, .. } => *user_id,
            GenerationRequest::FromExistingPath { user_id, .. } => *user_id,
        }
    }

    /// Task id prefix, e.g. "path_gen" in "path_gen_42_9f3c...".
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationRequest::FromPrompt { .. } => "path_gen",
            GenerationRequest::FromStructure { .. } => "structured_gen",
            GenerationRequest::FromExistingPath { .. } => "card_gen",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGenerationRequest {
    pub user_id: i64,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureGenerationRequest {
    pub user_id: i64,
    pub title: String,
    pub courses: Vec<CourseTitles>,
    pub difficulty_level: Option<String>, // defaults to intermediate
    pub estimated_days: Option<i64>,      // defaults to 30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingPathGenerationRequest {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreationResponse {
    pub task_id: String,
    pub message: String,
}
