use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::card_generator::{CardGeneratorService, GenerationEvent, GenerationSummary};
use crate::database::Database;
use crate::models::{
    GenerationRequest, LiveTaskStatus, PathStructure, SectionGenerationStatus, SectionState,
    TaskError, TaskRecordUpdate, TaskStage, TaskStatus, TaskStatusUpdate, TaskStatusView,
};
use crate::planner::PlannerService;
use crate::task_store::TaskStatusTable;
use crate::{log_generation_event, log_stage_transition, log_task_event};

/// Worker handle kept per scheduled task so callers can cancel or await it.
struct TaskHandle {
    join: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

/// Result of a cancellation request.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Only running tasks can be cancelled; carries the status we found.
    NotCancellable(TaskStatus),
    NotFound,
}

/// How the staged work itself ended, before outcome classification.
enum StageExit {
    Finished(GenerationSummary),
    Cancelled,
    TimedOut,
}

/// What the worker concluded, classified from the stage exit.
enum TaskOutcome {
    Classified(GenerationSummary),
    Errored(anyhow::Error),
    TimedOut,
    Cancelled,
}

/// Terminal state written to both task representations.
struct FinalWrite {
    status: TaskStatus,
    stage: Option<TaskStage>,
    progress: Option<f64>,
    message: String,
    error: Option<TaskError>,
    error_details: Option<String>,
}

/// Orchestrates one background generation task per schedule call: plans the
/// path structure, persists it, fans card generation out, and keeps the live
/// table and the durable task row in step at every stage boundary.
///
/// Stages only move forward. The whole task runs under one wall clock budget;
/// the card stage gets whatever of it the earlier stages left over.
#[derive(Clone)]
pub struct GenerationPipeline {
    db: Database,
    planner: PlannerService,
    card_generator: CardGeneratorService,
    table: TaskStatusTable,
    pipeline_timeout: Duration,
    handles: Arc<RwLock<HashMap<String, TaskHandle>>>,
}

impl GenerationPipeline {
    pub fn new(
        db: Database,
        planner: PlannerService,
        card_generator: CardGeneratorService,
        table: TaskStatusTable,
        pipeline_timeout: Duration,
    ) -> Self {
        Self {
            db,
            planner,
            card_generator,
            table,
            pipeline_timeout,
            handles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Schedule a generation task and return its id immediately.
    ///
    /// The durable row and the live table entry both exist before the worker
    /// is spawned, so a status lookup right after this call never misses.
    pub async fn schedule(&self, request: GenerationRequest) -> Result<String> {
        let user_id = request.user_id();
        let kind = request.kind();
        let task_id = format!("{}_{}_{}", kind, user_id, Uuid::new_v4().simple());

        let learning_path_id = match &request {
            GenerationRequest::FromExistingPath {
                learning_path_id, ..
            } => Some(*learning_path_id),
            _ => None,
        };

        self.db
            .insert_task_record(&task_id, user_id, learning_path_id)
            .await?;

        let created = self
            .table
            .create(LiveTaskStatus::new(task_id.clone(), user_id, learning_path_id))
            .await;
        if !created {
            bail!("Task id collision: {}", task_id);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = {
            let pipeline = self.clone();
            let task_id = task_id.clone();
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                pipeline.run_task(&task_id, request, &cancel).await;
            })
        };

        {
            let mut handles = self.handles.write().await;
            handles.retain(|_, handle| !handle.join.is_finished());
            handles.insert(
                task_id.clone(),
                TaskHandle {
                    join: worker,
                    cancel,
                },
            );
        }

        log_task_event!(scheduled, task_id = task_id, user_id = user_id, kind = kind);
        Ok(task_id)
    }

    /// Current status of a task: live table entry first, durable row if the
    /// entry was already swept.
    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatusView>> {
        if let Some(live) = self.table.get(task_id).await {
            return Ok(Some(TaskStatusView::from_live(&live)));
        }
        let record = self.db.get_task_record(task_id).await?;
        Ok(record.map(|record| TaskStatusView::from_record(&record)))
    }

    /// Tasks for one user, newest first. Enumerated from the durable rows so
    /// swept tasks still show up; live entries supply fresher detail.
    pub async fn list_for_user(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<TaskStatusView>> {
        let records = self
            .db
            .list_task_records_for_user(user_id, skip, limit)
            .await?;

        let mut views = Vec::with_capacity(records.len());
        for record in records {
            match self.table.get(&record.task_id).await {
                Some(live) => views.push(TaskStatusView::from_live(&live)),
                None => views.push(TaskStatusView::from_record(&record)),
            }
        }
        Ok(views)
    }

    /// Most recently created task touching the given learning path.
    pub async fn latest_for_path(
        &self,
        learning_path_id: Uuid,
    ) -> Result<Option<TaskStatusView>> {
        let Some(record) = self
            .db
            .latest_task_record_for_path(learning_path_id)
            .await?
        else {
            return Ok(None);
        };

        match self.table.get(&record.task_id).await {
            Some(live) => Ok(Some(TaskStatusView::from_live(&live))),
            None => Ok(Some(TaskStatusView::from_record(&record))),
        }
    }

    /// Request cancellation of a running task.
    ///
    /// Flips the worker's cancel flag and writes the cancelled state to both
    /// representations right away; the worker notices the flag at its next
    /// checkpoint and discards in-flight results. Tasks that are not running
    /// are left untouched.
    pub async fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        let Some(view) = self.get_status(task_id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        if view.status != TaskStatus::Running {
            return Ok(CancelOutcome::NotCancellable(view.status));
        }

        if let Some(handle) = self.handles.read().await.get(task_id) {
            handle.cancel.store(true, Ordering::Relaxed);
        }

        let message = "Task cancelled by user".to_string();
        self.table
            .update(
                task_id,
                TaskStatusUpdate {
                    status: Some(TaskStatus::Cancelled),
                    message: Some(message.clone()),
                    ended_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;
        self.db
            .update_task_record(
                task_id,
                TaskRecordUpdate {
                    status: Some(TaskStatus::Cancelled),
                    message: Some(message),
                    ..Default::default()
                },
            )
            .await?;

        log_task_event!(cancelled, task_id = task_id);
        Ok(CancelOutcome::Cancelled)
    }

    /// Wait for a task's worker to finish. Meant for tests and shutdown;
    /// normal consumers poll `get_status` instead.
    pub async fn wait(&self, task_id: &str) -> Result<()> {
        let handle = self.handles.write().await.remove(task_id);
        if let Some(handle) = handle {
            handle.join.await?;
        }
        Ok(())
    }

    /// Drive the staged work, then finalize. A panic inside a stage is
    /// caught and recorded like a stage error, so the task still reaches a
    /// terminal state.
    async fn run_task(&self, task_id: &str, request: GenerationRequest, cancel: &AtomicBool) {
        let started = Instant::now();

        let staged =
            AssertUnwindSafe(self.execute(task_id, &request, cancel, started)).catch_unwind();
        let outcome = match tokio::time::timeout(self.pipeline_timeout, staged).await {
            Ok(Ok(Ok(StageExit::Finished(summary)))) => TaskOutcome::Classified(summary),
            Ok(Ok(Ok(StageExit::Cancelled))) => TaskOutcome::Cancelled,
            Ok(Ok(Ok(StageExit::TimedOut))) => TaskOutcome::TimedOut,
            Ok(Ok(Err(err))) => TaskOutcome::Errored(err),
            Ok(Err(panic)) => TaskOutcome::Errored(anyhow!(
                "Stage panicked: {}",
                panic_message(panic.as_ref())
            )),
            Err(_) => TaskOutcome::TimedOut,
        };

        self.finalize(task_id, outcome, started).await;
    }

    /// Run the stages for one request. Returns how the staged work ended;
    /// errors bubble out for `finalize` to record.
    async fn execute(
        &self,
        task_id: &str,
        request: &GenerationRequest,
        cancel: &AtomicBool,
        started: Instant,
    ) -> Result<StageExit> {
        let structure = match request {
            GenerationRequest::FromPrompt { prompt, .. } => {
                self.advance_stage(
                    task_id,
                    TaskStage::Initializing,
                    TaskStatus::Starting,
                    5.0,
                    "Starting learning path generation",
                )
                .await;
                if cancel.load(Ordering::Relaxed) {
                    return Ok(StageExit::Cancelled);
                }

                self.advance_stage(
                    task_id,
                    TaskStage::ExtractingGoals,
                    TaskStatus::Running,
                    10.0,
                    "Extracting learning goals",
                )
                .await;
                let goals = self.planner.extract_goals(prompt).await?;
                if cancel.load(Ordering::Relaxed) {
                    return Ok(StageExit::Cancelled);
                }

                self.advance_stage(
                    task_id,
                    TaskStage::PlanningStructure,
                    TaskStatus::Running,
                    15.0,
                    "Planning path structure",
                )
                .await;
                let plan = self.planner.plan_from_interests(&goals).await?;
                if cancel.load(Ordering::Relaxed) {
                    return Ok(StageExit::Cancelled);
                }

                self.advance_stage(
                    task_id,
                    TaskStage::SavingStructure,
                    TaskStatus::Running,
                    25.0,
                    "Saving path structure",
                )
                .await;
                let structure = self.planner.persist_structure(&plan).await?;
                self.record_path_id(task_id, structure.learning_path_id).await;

                self.advance_stage(
                    task_id,
                    TaskStage::StructureSaved,
                    TaskStatus::Running,
                    30.0,
                    "Structure saved",
                )
                .await;
                structure
            }
            GenerationRequest::FromStructure {
                title,
                courses,
                difficulty_level,
                estimated_days,
                ..
            } => {
                self.advance_stage(
                    task_id,
                    TaskStage::Initializing,
                    TaskStatus::Starting,
                    5.0,
                    "Starting learning path generation",
                )
                .await;
                if cancel.load(Ordering::Relaxed) {
                    return Ok(StageExit::Cancelled);
                }

                // Caller supplied the outline, so goal extraction is skipped.
                self.advance_stage(
                    task_id,
                    TaskStage::PlanningStructure,
                    TaskStatus::Running,
                    15.0,
                    "Planning path structure",
                )
                .await;
                let plan =
                    self.planner
                        .plan_from_titles(title, courses, difficulty_level, *estimated_days)?;

                self.advance_stage(
                    task_id,
                    TaskStage::SavingStructure,
                    TaskStatus::Running,
                    25.0,
                    "Saving path structure",
                )
                .await;
                let structure = self.planner.persist_structure(&plan).await?;
                self.record_path_id(task_id, structure.learning_path_id).await;

                self.advance_stage(
                    task_id,
                    TaskStage::StructureSaved,
                    TaskStatus::Running,
                    30.0,
                    "Structure saved",
                )
                .await;
                structure
            }
            GenerationRequest::FromExistingPath {
                learning_path_id, ..
            } => {
                self.advance_stage(
                    task_id,
                    TaskStage::Initializing,
                    TaskStatus::Starting,
                    5.0,
                    "Starting card generation",
                )
                .await;
                if cancel.load(Ordering::Relaxed) {
                    return Ok(StageExit::Cancelled);
                }

                let Some(structure) = self.planner.load_structure(*learning_path_id).await? else {
                    bail!("Learning path {} not found", learning_path_id);
                };
                let structure = restrict_to_empty_sections(structure);

                self.advance_stage(
                    task_id,
                    TaskStage::StructureSaved,
                    TaskStatus::Running,
                    30.0,
                    "Structure loaded",
                )
                .await;
                structure
            }
        };

        if cancel.load(Ordering::Relaxed) {
            return Ok(StageExit::Cancelled);
        }

        let expected = self.card_generator.expected_card_count(&structure);
        self.table
            .update(
                task_id,
                TaskStatusUpdate {
                    cards_expected: Some(expected),
                    ..Default::default()
                },
            )
            .await;

        self.advance_stage(
            task_id,
            TaskStage::GeneratingCards,
            TaskStatus::Running,
            30.0,
            "Generating flashcards",
        )
        .await;

        // The card stage gets whatever is left of the wall clock budget.
        let Some(remaining) = self
            .pipeline_timeout
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
        else {
            return Ok(StageExit::TimedOut);
        };

        let (tx, mut rx) = mpsc::unbounded_channel();

        let generation = async {
            let result = tokio::time::timeout(
                remaining,
                self.card_generator
                    .generate_for_structure(&structure, cancel, &tx),
            )
            .await;
            // Closes the channel so the consumer below drains out.
            drop(tx);
            result
        };

        let consumer = async {
            while let Some(event) = rx.recv().await {
                self.apply_generation_event(task_id, expected, event).await;
            }
        };

        let (result, ()) = tokio::join!(generation, consumer);

        let summary = match result {
            Ok(summary) => summary?,
            Err(_) => return Ok(StageExit::TimedOut),
        };

        if cancel.load(Ordering::Relaxed) {
            return Ok(StageExit::Cancelled);
        }

        Ok(StageExit::Finished(summary))
    }

    /// Move both task representations to the next stage together.
    async fn advance_stage(
        &self,
        task_id: &str,
        stage: TaskStage,
        status: TaskStatus,
        progress: f64,
        message: &str,
    ) {
        log_stage_transition!(task_id, stage = stage.as_str(), progress = progress);
        let now = Utc::now();

        self.table
            .update(
                task_id,
                TaskStatusUpdate {
                    status: Some(status),
                    stage: Some(stage),
                    progress: Some(progress),
                    message: Some(message.to_string()),
                    // First write wins in both representations
                    started_at: Some(now),
                    ..Default::default()
                },
            )
            .await;

        if let Err(err) = self
            .db
            .update_task_record(
                task_id,
                TaskRecordUpdate {
                    status: Some(status),
                    stage: Some(stage),
                    progress: Some(progress),
                    message: Some(message.to_string()),
                    started_at: Some(now),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(
                task_id = %task_id,
                stage = stage.as_str(),
                error = %err,
                "Failed to persist stage transition"
            );
        }
    }

    async fn record_path_id(&self, task_id: &str, learning_path_id: Uuid) {
        self.table
            .update(
                task_id,
                TaskStatusUpdate {
                    learning_path_id: Some(learning_path_id),
                    ..Default::default()
                },
            )
            .await;

        if let Err(err) = self
            .db
            .update_task_record(
                task_id,
                TaskRecordUpdate {
                    learning_path_id: Some(learning_path_id),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(
                task_id = %task_id,
                learning_path_id = %learning_path_id,
                error = %err,
                "Failed to persist learning path id"
            );
        }
    }

    /// Fold one generation event into the live table entry. Per-card progress
    /// stays live-only; the durable row moves at stage boundaries.
    async fn apply_generation_event(
        &self,
        task_id: &str,
        expected: usize,
        event: GenerationEvent,
    ) {
        match event {
            GenerationEvent::SectionStarted { section_id, title } => {
                log_generation_event!(section_started, task_id = task_id, section_id = section_id);
                self.table
                    .update(
                        task_id,
                        TaskStatusUpdate {
                            section: Some(SectionGenerationStatus {
                                section_id,
                                title,
                                state: SectionState::Generating,
                                cards_generated: 0,
                                error: None,
                            }),
                            ..Default::default()
                        },
                    )
                    .await;
            }
            GenerationEvent::CardPersisted {
                cards_completed, ..
            } => {
                self.table
                    .update(
                        task_id,
                        TaskStatusUpdate {
                            progress: Some(card_stage_progress(cards_completed, expected)),
                            message: Some(format!(
                                "Generated {} of {} cards",
                                cards_completed, expected
                            )),
                            cards_completed: Some(cards_completed),
                            ..Default::default()
                        },
                    )
                    .await;
            }
            GenerationEvent::SectionCompleted {
                section_id,
                title,
                cards_generated,
            } => {
                log_generation_event!(
                    section_completed,
                    task_id = task_id,
                    section_id = section_id,
                    cards = cards_generated
                );
                self.table
                    .update(
                        task_id,
                        TaskStatusUpdate {
                            section: Some(SectionGenerationStatus {
                                section_id,
                                title,
                                state: SectionState::Completed,
                                cards_generated,
                                error: None,
                            }),
                            ..Default::default()
                        },
                    )
                    .await;
            }
            GenerationEvent::SectionFailed {
                section_id,
                title,
                error,
            } => {
                log_generation_event!(
                    section_failed,
                    task_id = task_id,
                    section_id = section_id,
                    error = error
                );
                self.table
                    .update(
                        task_id,
                        TaskStatusUpdate {
                            section: Some(SectionGenerationStatus {
                                section_id,
                                title: title.clone(),
                                state: SectionState::Failed,
                                cards_generated: 0,
                                error: Some(error.clone()),
                            }),
                            error: Some(TaskError {
                                section_id: Some(section_id),
                                section_title: Some(title),
                                message: error,
                            }),
                            ..Default::default()
                        },
                    )
                    .await;
            }
        }
    }

    /// Write the terminal state. Always runs, whatever the worker did.
    ///
    /// A cancellation that landed while the worker was unwinding keeps its
    /// word: whatever the worker concluded, the task finishes cancelled, and
    /// the final write below re-asserts that on both representations in case
    /// a stage transition raced the cancel.
    async fn finalize(&self, task_id: &str, outcome: TaskOutcome, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match self.table.get(task_id).await {
            Some(live) if live.status == TaskStatus::Cancelled => TaskOutcome::Cancelled,
            _ => outcome,
        };

        let write = match outcome {
            TaskOutcome::Classified(summary) => classify_summary(&summary),
            TaskOutcome::Errored(err) => {
                error!(task_id = %task_id, error = ?err, "Task failed");
                FinalWrite {
                    status: TaskStatus::Failed,
                    stage: None,
                    progress: None,
                    message: format!("Task failed: {}", err),
                    error: Some(TaskError {
                        section_id: None,
                        section_title: None,
                        message: err.to_string(),
                    }),
                    error_details: Some(format!("{:?}", err)),
                }
            }
            TaskOutcome::TimedOut => FinalWrite {
                status: TaskStatus::Timeout,
                stage: None,
                progress: None,
                message: format!(
                    "Task exceeded the {}s generation budget",
                    self.pipeline_timeout.as_secs()
                ),
                error: None,
                error_details: None,
            },
            TaskOutcome::Cancelled => FinalWrite {
                status: TaskStatus::Cancelled,
                stage: None,
                progress: None,
                message: "Task cancelled by user".to_string(),
                error: None,
                error_details: None,
            },
        };

        self.table
            .update(
                task_id,
                TaskStatusUpdate {
                    status: Some(write.status),
                    stage: write.stage,
                    progress: write.progress,
                    message: Some(write.message.clone()),
                    error: write.error,
                    error_details: write.error_details.clone(),
                    ended_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;

        if let Err(err) = self
            .db
            .update_task_record(
                task_id,
                TaskRecordUpdate {
                    status: Some(write.status),
                    stage: write.stage,
                    progress: write.progress,
                    message: Some(write.message),
                    error_details: write.error_details,
                    ..Default::default()
                },
            )
            .await
        {
            error!(
                task_id = %task_id,
                error = %err,
                "Failed to persist final task state"
            );
        }

        log_task_event!(
            finished,
            task_id = task_id,
            status = write.status.as_str(),
            duration_ms = duration_ms
        );
    }
}

/// Classify the card stage summary into the task's terminal state.
///
/// Every section failing fails the task; anything in between completes it
/// with errors. The stage only reaches `finished` on the completed variants.
fn classify_summary(summary: &GenerationSummary) -> FinalWrite {
    if summary.sections_total == 0 {
        return FinalWrite {
            status: TaskStatus::Completed,
            stage: Some(TaskStage::Finished),
            progress: Some(100.0),
            message: "No sections required card generation".to_string(),
            error: None,
            error_details: None,
        };
    }

    if summary.sections_failed == 0 {
        return FinalWrite {
            status: TaskStatus::Completed,
            stage: Some(TaskStage::Finished),
            progress: Some(100.0),
            message: format!(
                "Generated {} cards across {} sections",
                summary.cards_created, summary.sections_completed
            ),
            error: None,
            error_details: None,
        };
    }

    let details = join_section_errors(&summary.errors);

    if summary.sections_failed < summary.sections_total {
        FinalWrite {
            status: TaskStatus::CompletedWithErrors,
            stage: Some(TaskStage::Finished),
            progress: None,
            message: format!(
                "Generated {} cards; {} of {} sections failed",
                summary.cards_created, summary.sections_failed, summary.sections_total
            ),
            // Per-section errors were already appended as they happened
            error: None,
            error_details: Some(details),
        }
    } else {
        FinalWrite {
            status: TaskStatus::Failed,
            stage: None,
            progress: None,
            message: "Card generation failed for every section".to_string(),
            error: None,
            error_details: Some(details),
        }
    }
}

fn join_section_errors(errors: &[TaskError]) -> String {
    errors
        .iter()
        .map(|e| match &e.section_title {
            Some(title) => format!("{}: {}", title, e.message),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn card_stage_progress(completed: usize, expected: usize) -> f64 {
    if expected == 0 {
        return 100.0;
    }
    ((completed as f64 / expected as f64) * 100.0).floor()
}

/// Best-effort text from a panic payload, for the task's error details.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}

/// Drop sections that already have cards, then courses left empty. Used when
/// regenerating into an existing path so present cards are never touched.
fn restrict_to_empty_sections(mut structure: PathStructure) -> PathStructure {
    for course in &mut structure.courses {
        course.sections.retain(|section| section.existing_cards == 0);
    }
    structure.courses.retain(|course| !course.sections.is_empty());
    structure
}
