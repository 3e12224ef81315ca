use anyhow::Result;
use async_trait::async_trait;
use path_generator::llm_providers::{CompletionOptions, ModelClient};
use path_generator::{
    CancelOutcome, CardDraft, CardGeneratorService, CoursePlan, CourseTitles, Database,
    GenerationPipeline, GenerationRequest, PathPlan, PlannerService, SectionPlan, TaskStage,
    TaskStatus, TaskStatusTable, TaskStatusView,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

const PLAN_JSON: &str = r#"{
    "learning_path": {
        "title": "Rust in Practice",
        "description": "Hands-on Rust",
        "category": "Programming",
        "difficulty_level": "beginner",
        "estimated_days": 21
    },
    "courses": [
        {
            "title": "Core Language",
            "description": "The basics",
            "estimated_days": 10,
            "sections": [
                {
                    "title": "Memory Model",
                    "description": "Ownership rules",
                    "estimated_days": 3,
                    "card_keywords": ["Ownership", "Borrowing"]
                },
                {
                    "title": "Generics",
                    "description": "Parametric code",
                    "estimated_days": 2,
                    "card_keywords": ["Trait Bounds"]
                }
            ]
        }
    ]
}"#;

/// Scripted provider: answers goal extraction and structure planning with
/// fixed JSON and produces valid flashcards for everything else. Card calls
/// can be delayed or failed when the prompt contains a marker.
struct ScriptedModel {
    cards_per_call: usize,
    fail_marker: Option<String>,
    delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        _system_message: Option<&str>,
        prompt: &str,
        _options: CompletionOptions,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        if let Some(marker) = &self.fail_marker {
            if prompt.contains(marker.as_str()) {
                anyhow::bail!("Provider rejected the request");
            }
        }

        if prompt.contains("Analyze the following request") {
            return Ok(json!({
                "interests": ["Rust"],
                "difficulty_level": "beginner",
                "estimated_days": 21
            })
            .to_string());
        }

        if prompt.contains("Create a complete structured learning path") {
            return Ok(PLAN_JSON.to_string());
        }

        let cards: Vec<serde_json::Value> = (0..self.cards_per_call)
            .map(|i| {
                json!({
                    "keyword": format!("Keyword {}", i + 1),
                    "question": format!("Question {}?", i + 1),
                    "answer": format!("Answer {}", i + 1),
                    "explanation": format!("Explanation {}", i + 1),
                    "difficulty": "medium",
                    "resources": [],
                    "tags": []
                })
            })
            .collect();
        Ok(json!({ "cards": cards }).to_string())
    }

    fn provider_name(&self) -> &'static str {
        "Scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-test-model"
    }
}

struct TestRig {
    pipeline: GenerationPipeline,
    db: Database,
    table: TaskStatusTable,
    calls: Arc<AtomicUsize>,
}

async fn rig(
    cards_per_call: usize,
    fail_marker: Option<&str>,
    delay_ms: u64,
    timeout: Duration,
) -> TestRig {
    rig_with_table(
        cards_per_call,
        fail_marker,
        delay_ms,
        timeout,
        TaskStatusTable::new(100, 24),
    )
    .await
}

async fn rig_with_table(
    cards_per_call: usize,
    fail_marker: Option<&str>,
    delay_ms: u64,
    timeout: Duration,
    table: TaskStatusTable,
) -> TestRig {
    let db = Database::new("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    let calls = Arc::new(AtomicUsize::new(0));
    let model: Arc<dyn ModelClient> = Arc::new(ScriptedModel {
        cards_per_call,
        fail_marker: fail_marker.map(str::to_string),
        delay_ms,
        calls: Arc::clone(&calls),
    });

    let planner = PlannerService::new(Arc::clone(&model), db.clone());
    let generator = CardGeneratorService::new(model, db.clone(), 5, 2);
    let pipeline = GenerationPipeline::new(db.clone(), planner, generator, table.clone(), timeout);

    TestRig {
        pipeline,
        db,
        table,
        calls,
    }
}

fn structure_request(user_id: i64, sections: &[&str]) -> GenerationRequest {
    GenerationRequest::FromStructure {
        user_id,
        title: "Rust Fundamentals".to_string(),
        courses: vec![CourseTitles {
            title: "Core Language".to_string(),
            sections: sections.iter().map(|s| s.to_string()).collect(),
        }],
        difficulty_level: "beginner".to_string(),
        estimated_days: 14,
    }
}

fn bare_section(title: &str) -> SectionPlan {
    SectionPlan {
        title: title.to_string(),
        description: None,
        estimated_days: None,
        card_keywords: vec![],
    }
}

fn seed_plan(sections: Vec<SectionPlan>) -> PathPlan {
    PathPlan {
        title: "Existing Path".to_string(),
        description: Some("Seeded for card generation".to_string()),
        category: "Programming".to_string(),
        difficulty_level: "intermediate".to_string(),
        estimated_days: 10,
        courses: vec![CoursePlan {
            title: "Course".to_string(),
            description: None,
            estimated_days: None,
            sections,
        }],
    }
}

fn seed_card(keyword: &str) -> CardDraft {
    CardDraft {
        keyword: keyword.to_string(),
        question: format!("What is {}?", keyword),
        answer: format!("It is {}.", keyword),
        explanation: format!("Background on {}.", keyword),
        difficulty: "easy".to_string(),
        resources: vec![],
        tags: vec![],
    }
}

async fn wait_for_status(
    pipeline: &GenerationPipeline,
    task_id: &str,
    wanted: TaskStatus,
) -> TaskStatusView {
    for _ in 0..200 {
        if let Some(view) = pipeline
            .get_status(task_id)
            .await
            .expect("status lookup failed")
        {
            if view.status == wanted {
                return view;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {} never reached {:?}", task_id, wanted);
}

async fn finished_view(rig: &TestRig, task_id: &str) -> TaskStatusView {
    rig.pipeline.wait(task_id).await.expect("worker panicked");
    rig.pipeline
        .get_status(task_id)
        .await
        .expect("status lookup failed")
        .expect("task vanished")
}

#[tokio::test]
async fn test_structure_task_completes_end_to_end() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(7, &["Ownership", "Borrowing"]))
        .await
        .unwrap();
    assert!(task_id.starts_with("structured_gen_7_"));

    // Visible immediately, before the worker has done anything
    let early = rig.pipeline.get_status(&task_id).await.unwrap();
    assert!(early.is_some());

    let view = finished_view(&rig, &task_id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.stage, Some(TaskStage::Finished));
    assert_eq!(view.progress, 100.0);
    assert_eq!(view.cards_expected, 4);
    assert_eq!(view.cards_completed, 4);
    assert_eq!(view.sections_completed, 2);
    assert_eq!(view.sections_failed, 0);
    assert!(view.errors.is_empty());
    assert!(view.started_at.is_some());
    assert!(view.ended_at.is_some());

    // One batched provider call per section
    assert_eq!(rig.calls.load(Ordering::SeqCst), 2);

    let path_id = view.learning_path_id.expect("path id missing");
    let structure = rig.db.load_structure(path_id).await.unwrap().unwrap();
    assert_eq!(structure.title, "Rust Fundamentals");
    for course in &structure.courses {
        for section in &course.sections {
            let cards = rig.db.cards_for_section(section.section_id).await.unwrap();
            let orders: Vec<i64> = cards.iter().map(|(order, _)| *order).collect();
            assert_eq!(orders, vec![1, 2]);
        }
    }

    // The durable row agrees with the live entry
    let record = rig.db.get_task_record(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.learning_path_id, Some(path_id));
    assert!(record.ended_at.is_some());

    // And the path lookup resolves to this task
    let latest = rig.pipeline.latest_for_path(path_id).await.unwrap().unwrap();
    assert_eq!(latest.task_id, task_id);
    assert!(
        rig.pipeline
            .latest_for_path(Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_prompt_task_plans_and_attributes_keywords() {
    let rig = rig(1, None, 0, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(GenerationRequest::FromPrompt {
            user_id: 42,
            prompt: "I want to learn Rust".to_string(),
        })
        .await
        .unwrap();
    assert!(task_id.starts_with("path_gen_42_"));

    let view = finished_view(&rig, &task_id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.stage, Some(TaskStage::Finished));
    assert_eq!(view.progress, 100.0);
    // Two planned sections carrying three keywords between them
    assert_eq!(view.cards_expected, 3);
    assert_eq!(view.cards_completed, 3);

    let path_id = view.learning_path_id.expect("path id missing");
    let structure = rig.db.load_structure(path_id).await.unwrap().unwrap();
    assert_eq!(structure.title, "Rust in Practice");

    let memory_model = structure.courses[0]
        .sections
        .iter()
        .find(|s| s.title == "Memory Model")
        .expect("planned section missing");
    let cards = rig
        .db
        .cards_for_section(memory_model.section_id)
        .await
        .unwrap();

    // Keywords come from the request, whatever the completion order was
    let mut keywords: Vec<String> = cards.iter().map(|(_, card)| card.keyword.clone()).collect();
    keywords.sort();
    assert_eq!(keywords, vec!["Borrowing".to_string(), "Ownership".to_string()]);

    let mut orders: Vec<i64> = cards.iter().map(|(order, _)| *order).collect();
    orders.sort();
    assert_eq!(orders, vec![1, 2]);
}

#[tokio::test]
async fn test_failing_section_does_not_abort_siblings() {
    let rig = rig(2, Some("Borrowing"), 0, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(3, &["Ownership", "Borrowing"]))
        .await
        .unwrap();
    let view = finished_view(&rig, &task_id).await;

    assert_eq!(view.status, TaskStatus::CompletedWithErrors);
    assert_eq!(view.stage, Some(TaskStage::Finished));
    assert_eq!(view.sections_completed, 1);
    assert_eq!(view.sections_failed, 1);
    assert_eq!(view.cards_completed, 2);
    // Progress stays where card generation left it
    assert_eq!(view.progress, 50.0);

    // One error entry per failed section, attributed to it
    assert_eq!(view.errors.len(), 1);
    assert_eq!(view.errors[0].section_title.as_deref(), Some("Borrowing"));
    let details = view.error_details.expect("error details missing");
    assert!(details.contains("Borrowing"));

    let path_id = view.learning_path_id.unwrap();
    let structure = rig.db.load_structure(path_id).await.unwrap().unwrap();
    for section in &structure.courses[0].sections {
        let cards = rig.db.cards_for_section(section.section_id).await.unwrap();
        match section.title.as_str() {
            "Ownership" => assert_eq!(cards.len(), 2),
            "Borrowing" => assert_eq!(cards.len(), 0),
            other => panic!("unexpected section {}", other),
        }
    }
}

#[tokio::test]
async fn test_every_section_failing_fails_the_task() {
    // Marker matches every card generation prompt
    let rig = rig(2, Some("educational flashcards"), 0, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(3, &["Ownership", "Borrowing"]))
        .await
        .unwrap();
    let view = finished_view(&rig, &task_id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    // The card stage never finished, so the stage does not reach finished
    assert_eq!(view.stage, Some(TaskStage::GeneratingCards));
    assert_eq!(view.sections_failed, 2);
    assert_eq!(view.errors.len(), 2);
    assert_eq!(view.cards_completed, 0);
    assert!(view.ended_at.is_some());

    let record = rig.db.get_task_record(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_wall_clock_budget_times_the_task_out() {
    // Card calls take far longer than the whole budget
    let rig = rig(2, None, 500, Duration::from_millis(150)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(11, &["Ownership"]))
        .await
        .unwrap();
    let view = finished_view(&rig, &task_id).await;

    assert_eq!(view.status, TaskStatus::Timeout);
    assert!(view.ended_at.is_some());
    assert_eq!(view.cards_completed, 0);
    let message = view.message.expect("message missing");
    assert!(message.contains("budget"), "unexpected message: {}", message);

    let record = rig.db.get_task_record(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Timeout);
    assert!(record.ended_at.is_some());
}

#[tokio::test]
async fn test_budget_spent_before_cards_issues_no_generation_calls() {
    // Goal extraction alone outlasts the budget, so the card stage never runs
    let rig = rig(2, None, 400, Duration::from_millis(150)).await;

    let task_id = rig
        .pipeline
        .schedule(GenerationRequest::FromPrompt {
            user_id: 12,
            prompt: "I want to learn Rust".to_string(),
        })
        .await
        .unwrap();
    let view = finished_view(&rig, &task_id).await;

    assert_eq!(view.status, TaskStatus::Timeout);
    assert_eq!(view.stage, Some(TaskStage::ExtractingGoals));
    assert_eq!(view.cards_completed, 0);
    // Only the goal-extraction call went out before the deadline
    assert_eq!(rig.calls.load(Ordering::SeqCst), 1);
}

/// Provider whose every call dies, standing in for an adapter defect.
struct PanickingModel;

#[async_trait]
impl ModelClient for PanickingModel {
    async fn complete(
        &self,
        _system_message: Option<&str>,
        _prompt: &str,
        _options: CompletionOptions,
    ) -> Result<String> {
        panic!("adapter blew up");
    }

    fn provider_name(&self) -> &'static str {
        "Panicking"
    }

    fn model_name(&self) -> &str {
        "panicking-model"
    }
}

#[tokio::test]
async fn test_worker_panic_still_finalizes_the_task() {
    let db = Database::new("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    let model: Arc<dyn ModelClient> = Arc::new(PanickingModel);
    let planner = PlannerService::new(Arc::clone(&model), db.clone());
    let generator = CardGeneratorService::new(model, db.clone(), 5, 2);
    let table = TaskStatusTable::new(100, 24);
    let pipeline = GenerationPipeline::new(
        db.clone(),
        planner,
        generator,
        table,
        Duration::from_secs(30),
    );

    let task_id = pipeline
        .schedule(structure_request(31, &["Ownership"]))
        .await
        .unwrap();
    pipeline
        .wait(&task_id)
        .await
        .expect("panic must not escape the worker");

    let view = pipeline
        .get_status(&task_id)
        .await
        .unwrap()
        .expect("task vanished");
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.stage, Some(TaskStage::GeneratingCards));
    assert!(view.ended_at.is_some());
    let message = view.message.expect("message missing");
    assert!(message.contains("panicked"), "unexpected message: {}", message);

    let record = db.get_task_record(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.ended_at.is_some());
    let details = record.error_details.expect("error details missing");
    assert!(details.contains("adapter blew up"));
}

#[tokio::test]
async fn test_cancel_stops_a_running_task() {
    let rig = rig(2, None, 300, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(5, &["Ownership"]))
        .await
        .unwrap();
    wait_for_status(&rig.pipeline, &task_id, TaskStatus::Running).await;

    let outcome = rig.pipeline.cancel(&task_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);

    // Already cancelled, so a second request has nothing to do
    let again = rig.pipeline.cancel(&task_id).await.unwrap();
    assert_eq!(again, CancelOutcome::NotCancellable(TaskStatus::Cancelled));

    let view = finished_view(&rig, &task_id).await;
    assert_eq!(view.status, TaskStatus::Cancelled);
    assert_eq!(view.message.as_deref(), Some("Task cancelled by user"));
    assert_eq!(view.cards_completed, 0);
    assert!(view.ended_at.is_some());

    let record = rig.db.get_task_record(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_unknown_task_reports_not_found() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;
    let outcome = rig.pipeline.cancel("path_gen_9_missing").await.unwrap();
    assert_eq!(outcome, CancelOutcome::NotFound);
}

#[tokio::test]
async fn test_completed_task_cannot_be_cancelled() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(2, &["Ownership"]))
        .await
        .unwrap();
    finished_view(&rig, &task_id).await;

    let outcome = rig.pipeline.cancel(&task_id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NotCancellable(TaskStatus::Completed));
}

#[tokio::test]
async fn test_status_falls_back_to_durable_row_after_sweep() {
    let rig = rig_with_table(
        2,
        None,
        0,
        Duration::from_secs(30),
        TaskStatusTable::new(1, 24),
    )
    .await;

    let first = rig
        .pipeline
        .schedule(structure_request(4, &["Ownership"]))
        .await
        .unwrap();
    finished_view(&rig, &first).await;

    let second = rig
        .pipeline
        .schedule(structure_request(4, &["Borrowing"]))
        .await
        .unwrap();
    finished_view(&rig, &second).await;

    // Over capacity: the sweep keeps only the most recently touched entry
    assert_eq!(rig.table.sweep().await, 1);
    assert_eq!(rig.table.size().await, 1);

    let evicted = rig.pipeline.get_status(&first).await.unwrap().unwrap();
    assert_eq!(evicted.status, TaskStatus::Completed);
    // Durable rows carry no per-section detail
    assert!(evicted.sections.is_empty());
    assert_eq!(evicted.cards_expected, 0);

    let live = rig.pipeline.get_status(&second).await.unwrap().unwrap();
    assert_eq!(live.cards_expected, 2);
    assert!(!live.sections.is_empty());
}

#[tokio::test]
async fn test_existing_path_generation_skips_populated_sections() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;

    let plan = seed_plan(vec![bare_section("Seeded Section"), bare_section("Empty Section")]);
    let structure = rig.db.insert_structure(&plan).await.unwrap();
    let seeded_id = structure.courses[0].sections[0].section_id;
    let empty_id = structure.courses[0].sections[1].section_id;

    let card = rig.db.insert_card(&seed_card("Seed")).await.unwrap();
    rig.db.link_card_to_section(seeded_id, card.id, 1).await.unwrap();

    let task_id = rig
        .pipeline
        .schedule(GenerationRequest::FromExistingPath {
            user_id: 9,
            learning_path_id: structure.learning_path_id,
        })
        .await
        .unwrap();
    assert!(task_id.starts_with("card_gen_9_"));

    let view = finished_view(&rig, &task_id).await;
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.learning_path_id, Some(structure.learning_path_id));
    // Only the empty section counts toward the expected total
    assert_eq!(view.cards_expected, 2);
    assert_eq!(view.cards_completed, 2);

    let seeded_cards = rig.db.cards_for_section(seeded_id).await.unwrap();
    assert_eq!(seeded_cards.len(), 1);
    assert_eq!(seeded_cards[0].1.keyword, "Seed");

    let generated = rig.db.cards_for_section(empty_id).await.unwrap();
    let orders: Vec<i64> = generated.iter().map(|(order, _)| *order).collect();
    assert_eq!(orders, vec![1, 2]);
}

#[tokio::test]
async fn test_existing_path_with_no_empty_sections_completes_without_calls() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;

    let plan = seed_plan(vec![bare_section("Full Section")]);
    let structure = rig.db.insert_structure(&plan).await.unwrap();
    let section_id = structure.courses[0].sections[0].section_id;
    let card = rig.db.insert_card(&seed_card("Seed")).await.unwrap();
    rig.db.link_card_to_section(section_id, card.id, 1).await.unwrap();

    let task_id = rig
        .pipeline
        .schedule(GenerationRequest::FromExistingPath {
            user_id: 4,
            learning_path_id: structure.learning_path_id,
        })
        .await
        .unwrap();
    let view = finished_view(&rig, &task_id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.progress, 100.0);
    assert_eq!(view.cards_expected, 0);
    assert_eq!(
        view.message.as_deref(),
        Some("No sections required card generation")
    );
    assert_eq!(rig.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_existing_path_that_is_missing_fails_the_task() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(GenerationRequest::FromExistingPath {
            user_id: 2,
            learning_path_id: Uuid::new_v4(),
        })
        .await
        .unwrap();
    let view = finished_view(&rig, &task_id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    assert!(view.message.unwrap().contains("not found"));
    assert!(view.error_details.is_some());
    assert_eq!(view.errors.len(), 1);
    assert!(view.ended_at.is_some());
}

#[tokio::test]
async fn test_stage_and_progress_never_regress_while_polling() {
    let rig = rig(2, None, 40, Duration::from_secs(30)).await;

    let task_id = rig
        .pipeline
        .schedule(structure_request(6, &["Ownership", "Borrowing"]))
        .await
        .unwrap();

    let mut last_rank = 0u8;
    let mut last_progress = -1.0f64;
    let mut finished = false;
    for _ in 0..400 {
        let view = rig
            .pipeline
            .get_status(&task_id)
            .await
            .unwrap()
            .expect("task vanished mid-run");

        let rank = view.stage.map(|s| s.rank()).unwrap_or(0);
        assert!(
            rank >= last_rank,
            "stage went backwards: {} -> {}",
            last_rank,
            rank
        );
        assert!(
            view.progress >= last_progress,
            "progress went backwards: {} -> {}",
            last_progress,
            view.progress
        );
        assert_eq!(view.ended_at.is_some(), view.status.is_terminal());

        last_rank = rank;
        last_progress = view.progress;

        if view.status.is_terminal() {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(finished, "task never reached a terminal status");

    rig.pipeline.wait(&task_id).await.unwrap();
}

#[tokio::test]
async fn test_user_task_listing_is_newest_first_and_paginated() {
    let rig = rig(2, None, 0, Duration::from_secs(30)).await;

    let mut scheduled = Vec::new();
    for section in ["Ownership", "Borrowing", "Lifetimes"] {
        let task_id = rig
            .pipeline
            .schedule(structure_request(21, &[section]))
            .await
            .unwrap();
        finished_view(&rig, &task_id).await;
        scheduled.push(task_id);
    }
    // A different user's task must not show up
    let other = rig
        .pipeline
        .schedule(structure_request(99, &["Macros"]))
        .await
        .unwrap();
    finished_view(&rig, &other).await;

    let first_page = rig.pipeline.list_for_user(21, 0, 2).await.unwrap();
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].task_id, scheduled[2]);
    assert_eq!(first_page[1].task_id, scheduled[1]);

    let second_page = rig.pipeline.list_for_user(21, 2, 2).await.unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].task_id, scheduled[0]);

    let empty = rig.pipeline.list_for_user(7, 0, 20).await.unwrap();
    assert!(empty.is_empty());
}
