// Macros file - tracing macros are imported within the macro definitions

/// Standardized logging macros for consistent field names and message patterns across the application
///
/// These macros ensure:
/// - Consistent field naming conventions
/// - Appropriate logging levels for different scenarios
/// - Structured logging with context
/// - Consistent message formatting

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, task_id = $task_id:expr) => {
        tracing::debug!(
            operation = $operation,
            task_id = %$task_id,
            "API operation started"
        );
    };
    ($operation:expr, path_id = $path_id:expr) => {
        tracing::debug!(
            operation = $operation,
            path_id = %$path_id,
            "API operation started"
        );
    };
    ($operation:expr, user_id = $user_id:expr) => {
        tracing::debug!(
            operation = $operation,
            user_id = $user_id,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(
            operation = $operation,
            "API operation started"
        );
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, task_id = $task_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            task_id = %$task_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            "API operation completed: {}", $msg
        );
    };
}

/// Log API operation errors with consistent structure
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, task_id = $task_id:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            task_id = %$task_id,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, task_id = $task_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            task_id = %$task_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            "API operation warning: {}", $msg
        );
    };
}

// ============================================================================
// Task Lifecycle Logging Macros
// ============================================================================

/// Log task lifecycle events with consistent fields
#[macro_export]
macro_rules! log_task_event {
    (scheduled, task_id = $task_id:expr, user_id = $user_id:expr, kind = $kind:expr) => {
        tracing::info!(
            event_type = "task_scheduled",
            task_id = %$task_id,
            user_id = $user_id,
            kind = $kind,
            "Task scheduled"
        );
    };
    (finished, task_id = $task_id:expr, status = $status:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            event_type = "task_finished",
            task_id = %$task_id,
            status = $status,
            duration_ms = $duration,
            "Task finished"
        );
    };
    (cancelled, task_id = $task_id:expr) => {
        tracing::info!(
            event_type = "task_cancelled",
            task_id = %$task_id,
            "Task cancellation requested"
        );
    };
    (reaped, count = $count:expr, remaining = $remaining:expr) => {
        tracing::info!(
            event_type = "task_reaped",
            removed = $count,
            remaining = $remaining,
            "Swept old task status entries"
        );
    };
}

/// Log a pipeline stage transition
#[macro_export]
macro_rules! log_stage_transition {
    ($task_id:expr, stage = $stage:expr, progress = $progress:expr) => {
        tracing::info!(
            task_id = %$task_id,
            stage = $stage,
            progress = $progress,
            "Pipeline stage transition"
        );
    };
}

// ============================================================================
// Card Generation Logging Macros
// ============================================================================

/// Log card generation progress with section context
#[macro_export]
macro_rules! log_generation_event {
    (section_started, task_id = $task_id:expr, section_id = $section_id:expr) => {
        tracing::debug!(
            component = "card_generator",
            task_id = %$task_id,
            section_id = %$section_id,
            "Section generation started"
        );
    };
    (section_completed, task_id = $task_id:expr, section_id = $section_id:expr, cards = $cards:expr) => {
        tracing::info!(
            component = "card_generator",
            task_id = %$task_id,
            section_id = %$section_id,
            cards = $cards,
            "Section generation completed"
        );
    };
    (section_failed, task_id = $task_id:expr, section_id = $section_id:expr, error = $error:expr) => {
        tracing::error!(
            component = "card_generator",
            task_id = %$task_id,
            section_id = %$section_id,
            error = %$error,
            "Section generation failed"
        );
    };
}

// ============================================================================
// Provider Logging Macros
// ============================================================================

/// Log model provider calls with provider context
#[macro_export]
macro_rules! log_provider_operation {
    (start, $operation:expr, provider = $provider:expr) => {
        tracing::info!(
            component = "model_client",
            operation = $operation,
            provider = %$provider,
            "Provider request started"
        );
    };
    (success, $operation:expr, provider = $provider:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = "model_client",
            operation = $operation,
            provider = %$provider,
            duration_ms = $duration,
            "Provider request completed"
        );
    };
    (error, $operation:expr, provider = $provider:expr, error = $error:expr) => {
        tracing::error!(
            component = "model_client",
            operation = $operation,
            provider = %$provider,
            error = %$error,
            "Provider request failed"
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

/// Log database operation performance and results
#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, task_id = $task_id:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            task_id = %$task_id,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "database",
            operation = $operation,
            error = %$error,
            "Database operation failed"
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

/// Log system startup and shutdown events
#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (shutdown, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "shutdown",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

/// Log validation results consistently
#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}
