use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    database::Database,
    errors::{ApiError, ErrorContext, classify_database_error},
    models::{
        ExistingPathGenerationRequest, GenerationRequest, PromptGenerationRequest,
        StructureGenerationRequest, TaskCreationResponse, TaskStatusView,
    },
    pipeline::{CancelOutcome, GenerationPipeline},
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: GenerationPipeline,
    pub db: Database,
}

#[derive(Deserialize)]
pub struct ListTasksParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// Generation endpoints

pub async fn generate_from_prompt(
    State(state): State<AppState>,
    Json(request): Json<PromptGenerationRequest>,
) -> Result<Json<ApiResponse<TaskCreationResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("generate_from_prompt", user_id = request.user_id);

    if request.prompt.trim().is_empty() {
        let error = ApiError::ValidationError("Prompt cannot be empty".to_string());
        let context = ErrorContext::new("generate_from_prompt", "task");
        return Err(error.to_response_with_context(context));
    }

    let generation = GenerationRequest::FromPrompt {
        user_id: request.user_id,
        prompt: request.prompt,
    };

    match state.pipeline.schedule(generation).await {
        Ok(task_id) => {
            log_api_success!("generate_from_prompt", task_id = task_id, "task scheduled");
            Ok(Json(ApiResponse::success(TaskCreationResponse {
                task_id,
                message: "Learning path generation started".to_string(),
            })))
        }
        Err(e) => {
            log_api_error!(
                "generate_from_prompt",
                error = e,
                "failed to schedule generation task"
            );
            let classified = classify_database_error(&e);
            let context = ErrorContext::new("generate_from_prompt", "task");
            Err(classified.to_response_with_context(context))
        }
    }
}

pub async fn generate_from_structure(
    State(state): State<AppState>,
    Json(request): Json<StructureGenerationRequest>,
) -> Result<Json<ApiResponse<TaskCreationResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("generate_from_structure", user_id = request.user_id);

    if request.title.trim().is_empty() {
        let error = ApiError::ValidationError("Title cannot be empty".to_string());
        let context = ErrorContext::new("generate_from_structure", "task");
        return Err(error.to_response_with_context(context));
    }
    if request.courses.is_empty() {
        let error =
            ApiError::ValidationError("Structure must contain at least one course".to_string());
        let context = ErrorContext::new("generate_from_structure", "task");
        return Err(error.to_response_with_context(context));
    }

    let generation = GenerationRequest::FromStructure {
        user_id: request.user_id,
        title: request.title,
        courses: request.courses,
        difficulty_level: request
            .difficulty_level
            .unwrap_or_else(|| "intermediate".to_string()),
        estimated_days: request.estimated_days.unwrap_or(30),
    };

    match state.pipeline.schedule(generation).await {
        Ok(task_id) => {
            log_api_success!("generate_from_structure", task_id = task_id, "task scheduled");
            Ok(Json(ApiResponse::success(TaskCreationResponse {
                task_id,
                message: "Structured path generation started".to_string(),
            })))
        }
        Err(e) => {
            log_api_error!(
                "generate_from_structure",
                error = e,
                "failed to schedule generation task"
            );
            let classified = classify_database_error(&e);
            let context = ErrorContext::new("generate_from_structure", "task");
            Err(classified.to_response_with_context(context))
        }
    }
}

pub async fn generate_cards_for_path(
    State(state): State<AppState>,
    Path(path_id): Path<Uuid>,
    Json(request): Json<ExistingPathGenerationRequest>,
) -> Result<Json<ApiResponse<TaskCreationResponse>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("generate_cards_for_path", path_id = path_id);

    // Reject unknown paths up front instead of failing the task later
    match state.db.load_structure(path_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            log_api_warn!("generate_cards_for_path", "learning path not found");
            let error =
                ApiError::NotFound(format!("Learning path with ID '{}' not found", path_id));
            let context = ErrorContext::new("generate_cards_for_path", "learning path")
                .with_id(&path_id.to_string());
            return Err(error.to_response_with_context(context));
        }
        Err(e) => {
            log_api_error!(
                "generate_cards_for_path",
                error = e,
                "database error loading learning path"
            );
            let error = ApiError::DatabaseError(e);
            let context = ErrorContext::new("generate_cards_for_path", "learning path")
                .with_id(&path_id.to_string());
            return Err(error.to_response_with_context(context));
        }
    }

    let generation = GenerationRequest::FromExistingPath {
        user_id: request.user_id,
        learning_path_id: path_id,
    };

    match state.pipeline.schedule(generation).await {
        Ok(task_id) => {
            log_api_success!("generate_cards_for_path", task_id = task_id, "task scheduled");
            Ok(Json(ApiResponse::success(TaskCreationResponse {
                task_id,
                message: "Card generation started".to_string(),
            })))
        }
        Err(e) => {
            log_api_error!(
                "generate_cards_for_path",
                error = e,
                "failed to schedule card generation task"
            );
            let classified = classify_database_error(&e);
            let context = ErrorContext::new("generate_cards_for_path", "task")
                .with_id(&path_id.to_string());
            Err(classified.to_response_with_context(context))
        }
    }
}

// Task status endpoints

pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskStatusView>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("get_task_status", task_id = task_id);

    match state.pipeline.get_status(&task_id).await {
        Ok(Some(view)) => Ok(Json(ApiResponse::success(view))),
        Ok(None) => {
            log_api_warn!("get_task_status", task_id = task_id, "task not found");
            let error = ApiError::NotFound(format!("Task with ID '{}' not found", task_id));
            let context = ErrorContext::new("get_task_status", "task").with_id(&task_id);
            Err(error.to_response_with_context(context))
        }
        Err(e) => {
            log_api_error!(
                "get_task_status",
                task_id = task_id,
                error = e,
                "database error retrieving task"
            );
            let error = ApiError::DatabaseError(e);
            let context = ErrorContext::new("get_task_status", "task").with_id(&task_id);
            Err(error.to_response_with_context(context))
        }
    }
}

pub async fn list_user_tasks(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ApiResponse<Vec<TaskStatusView>>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("list_user_tasks", user_id = user_id);

    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(20).clamp(1, 100);

    match state.pipeline.list_for_user(user_id, skip, limit).await {
        Ok(views) => {
            log_api_success!("list_user_tasks", count = views.len(), "tasks returned");
            Ok(Json(ApiResponse::success(views)))
        }
        Err(e) => {
            log_api_error!(
                "list_user_tasks",
                error = e,
                "database error listing tasks"
            );
            let error = ApiError::DatabaseError(e);
            let context =
                ErrorContext::new("list_user_tasks", "task").with_id(&user_id.to_string());
            Err(error.to_response_with_context(context))
        }
    }
}

pub async fn get_latest_path_task(
    State(state): State<AppState>,
    Path(path_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskStatusView>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("get_latest_path_task", path_id = path_id);

    match state.pipeline.latest_for_path(path_id).await {
        Ok(Some(view)) => Ok(Json(ApiResponse::success(view))),
        Ok(None) => {
            log_api_warn!("get_latest_path_task", "no tasks recorded for path");
            let error = ApiError::NotFound(format!(
                "No tasks found for learning path '{}'",
                path_id
            ));
            let context = ErrorContext::new("get_latest_path_task", "task")
                .with_id(&path_id.to_string())
                .with_user_message(&format!("No tasks found for learning path '{}'", path_id));
            Err(error.to_response_with_context(context))
        }
        Err(e) => {
            log_api_error!(
                "get_latest_path_task",
                error = e,
                "database error retrieving latest task"
            );
            let error = ApiError::DatabaseError(e);
            let context =
                ErrorContext::new("get_latest_path_task", "task").with_id(&path_id.to_string());
            Err(error.to_response_with_context(context))
        }
    }
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskStatusView>>, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("cancel_task", task_id = task_id);

    let outcome = match state.pipeline.cancel(&task_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_api_error!(
                "cancel_task",
                task_id = task_id,
                error = e,
                "database error cancelling task"
            );
            let error = ApiError::DatabaseError(e);
            let context = ErrorContext::new("cancel_task", "task").with_id(&task_id);
            return Err(error.to_response_with_context(context));
        }
    };

    match outcome {
        CancelOutcome::Cancelled => {
            log_api_success!("cancel_task", task_id = task_id, "task cancelled");
            match state.pipeline.get_status(&task_id).await {
                Ok(Some(view)) => Ok(Json(ApiResponse::success(view))),
                _ => {
                    let error =
                        ApiError::InternalError("Task state unavailable after cancel".to_string());
                    let context = ErrorContext::new("cancel_task", "task").with_id(&task_id);
                    Err(error.to_response_with_context(context))
                }
            }
        }
        CancelOutcome::NotCancellable(status) => {
            log_api_warn!("cancel_task", task_id = task_id, "task is not running");
            let error = ApiError::Conflict(format!(
                "Task is {} and cannot be cancelled",
                status.as_str()
            ));
            let context = ErrorContext::new("cancel_task", "task").with_id(&task_id);
            Err(error.to_response_with_context(context))
        }
        CancelOutcome::NotFound => {
            log_api_warn!("cancel_task", task_id = task_id, "task not found");
            let error = ApiError::NotFound(format!("Task with ID '{}' not found", task_id));
            let context = ErrorContext::new("cancel_task", "task").with_id(&task_id);
            Err(error.to_response_with_context(context))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Generation routes
        .route("/api/generate/from-prompt", post(generate_from_prompt))
        .route("/api/generate/from-structure", post(generate_from_structure))
        .route(
            "/api/learning-paths/:path_id/generate-cards",
            post(generate_cards_for_path),
        )
        // Task status routes
        .route("/api/tasks/:task_id", get(get_task_status))
        .route("/api/tasks/:task_id/cancel", post(cancel_task))
        .route("/api/users/:user_id/tasks", get(list_user_tasks))
        .route(
            "/api/learning-paths/:path_id/tasks/latest",
            get(get_latest_path_task),
        )
        .with_state(state)
}
