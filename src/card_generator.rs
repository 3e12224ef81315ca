use anyhow::Result;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::llm_providers::{CompletionOptions, JsonResponseParser, ModelClient};
use crate::models::{CardDraft, CardResource, PathStructure, SectionStructure, TaskError};

/// Progress notifications emitted while cards are generated. The pipeline
/// consumes these to keep the live task entry current.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    SectionStarted {
        section_id: Uuid,
        title: String,
    },
    CardPersisted {
        section_id: Uuid,
        /// Cumulative count across the whole task, not per section
        cards_completed: usize,
    },
    SectionCompleted {
        section_id: Uuid,
        title: String,
        cards_generated: usize,
    },
    SectionFailed {
        section_id: Uuid,
        title: String,
        error: String,
    },
}

/// Aggregate result of the card stage for one task.
#[derive(Debug, Clone, Default)]
pub struct GenerationSummary {
    pub sections_total: usize,
    pub sections_completed: usize,
    pub sections_failed: usize,
    pub sections_skipped: usize,
    pub cards_created: usize,
    pub errors: Vec<TaskError>,
}

enum SectionOutcome {
    Completed {
        section_id: Uuid,
        cards_generated: usize,
    },
    Failed {
        section_id: Uuid,
        title: String,
        error: String,
    },
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeneratedCards {
    #[serde(default)]
    cards: Vec<GeneratedCardData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeneratedCardData {
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    resources: Vec<CardResource>,
    #[serde(default)]
    tags: Vec<String>,
}

fn draft_from_generated(data: GeneratedCardData, fallback_difficulty: &str) -> Option<CardDraft> {
    if data.keyword.trim().is_empty()
        || data.question.trim().is_empty()
        || data.answer.trim().is_empty()
        || data.explanation.trim().is_empty()
    {
        return None;
    }

    Some(CardDraft {
        keyword: data.keyword,
        question: data.question,
        answer: data.answer,
        explanation: data.explanation,
        difficulty: data
            .difficulty
            .unwrap_or_else(|| fallback_difficulty.to_string()),
        resources: data.resources,
        tags: data.tags,
    })
}

/// Fans card generation out across sections under a shared concurrency
/// ceiling, persisting each card as its generation completes.
///
/// Sections with keywords get one generation call per keyword; sections
/// without keywords get a single batched call for `cards_per_section` cards.
/// One failing keyword or section never aborts its siblings.
#[derive(Clone)]
pub struct CardGeneratorService {
    model: Arc<dyn ModelClient>,
    db: Database,
    json_parser: JsonResponseParser,
    max_concurrent: usize,
    cards_per_section: usize,
}

impl CardGeneratorService {
    pub fn new(
        model: Arc<dyn ModelClient>,
        db: Database,
        max_concurrent: usize,
        cards_per_section: usize,
    ) -> Self {
        Self {
            model,
            db,
            json_parser: JsonResponseParser::new(),
            max_concurrent,
            cards_per_section,
        }
    }

    /// Number of cards this structure is expected to produce. Computed once
    /// up front so progress percentages have a stable denominator.
    pub fn expected_card_count(&self, structure: &PathStructure) -> usize {
        structure
            .courses
            .iter()
            .flat_map(|course| &course.sections)
            .map(|section| {
                if section.keywords.is_empty() {
                    self.cards_per_section
                } else {
                    section.keywords.len()
                }
            })
            .sum()
    }

    /// Generate and persist cards for every section of the structure.
    ///
    /// The cancel flag is checked at section boundaries and before each
    /// persist; results arriving after cancellation are discarded. Returns
    /// the summary the orchestrator classifies the task outcome from.
    pub async fn generate_for_structure(
        &self,
        structure: &PathStructure,
        cancel: &AtomicBool,
        events: &mpsc::UnboundedSender<GenerationEvent>,
    ) -> Result<GenerationSummary> {
        let semaphore = Semaphore::new(self.max_concurrent);
        let completed_cards = AtomicUsize::new(0);

        let mut section_jobs = FuturesUnordered::new();
        for course in &structure.courses {
            for section in &course.sections {
                section_jobs.push(self.run_section(
                    &course.title,
                    section,
                    &structure.difficulty_level,
                    &semaphore,
                    &completed_cards,
                    cancel,
                    events,
                ));
            }
        }

        let mut summary = GenerationSummary {
            sections_total: section_jobs.len(),
            ..Default::default()
        };

        while let Some(outcome) = section_jobs.next().await {
            match outcome {
                SectionOutcome::Completed {
                    section_id,
                    cards_generated,
                } => {
                    debug!(
                        section_id = %section_id,
                        cards_generated,
                        "Section finished"
                    );
                    summary.sections_completed += 1;
                    summary.cards_created += cards_generated;
                }
                SectionOutcome::Failed {
                    section_id,
                    title,
                    error,
                } => {
                    summary.sections_failed += 1;
                    summary.errors.push(TaskError {
                        section_id: Some(section_id),
                        section_title: Some(title),
                        message: error,
                    });
                }
                SectionOutcome::Skipped => {
                    summary.sections_skipped += 1;
                }
            }
        }

        info!(
            sections_total = summary.sections_total,
            sections_completed = summary.sections_completed,
            sections_failed = summary.sections_failed,
            sections_skipped = summary.sections_skipped,
            cards_created = summary.cards_created,
            "Card generation finished for structure"
        );

        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_section(
        &self,
        course_title: &str,
        section: &SectionStructure,
        difficulty: &str,
        semaphore: &Semaphore,
        completed_cards: &AtomicUsize,
        cancel: &AtomicBool,
        events: &mpsc::UnboundedSender<GenerationEvent>,
    ) -> SectionOutcome {
        if cancel.load(Ordering::Relaxed) {
            debug!(
                section_id = %section.section_id,
                "Skipping section, task cancelled"
            );
            return SectionOutcome::Skipped;
        }

        let _ = events.send(GenerationEvent::SectionStarted {
            section_id: section.section_id,
            title: section.title.clone(),
        });

        let (generated, attempted) = if section.keywords.is_empty() {
            self.run_section_batch(
                course_title,
                section,
                difficulty,
                semaphore,
                completed_cards,
                cancel,
                events,
            )
            .await
        } else {
            self.run_section_keywords(
                course_title,
                section,
                difficulty,
                semaphore,
                completed_cards,
                cancel,
                events,
            )
            .await
        };

        if cancel.load(Ordering::Relaxed) {
            return SectionOutcome::Skipped;
        }

        if generated == 0 {
            let error = format!("All {} card generations failed", attempted);
            let _ = events.send(GenerationEvent::SectionFailed {
                section_id: section.section_id,
                title: section.title.clone(),
                error: error.clone(),
            });
            return SectionOutcome::Failed {
                section_id: section.section_id,
                title: section.title.clone(),
                error,
            };
        }

        let _ = events.send(GenerationEvent::SectionCompleted {
            section_id: section.section_id,
            title: section.title.clone(),
            cards_generated: generated,
        });

        SectionOutcome::Completed {
            section_id: section.section_id,
            cards_generated: generated,
        }
    }

    /// One generation call per keyword, persisted in completion order.
    #[allow(clippy::too_many_arguments)]
    async fn run_section_keywords(
        &self,
        course_title: &str,
        section: &SectionStructure,
        difficulty: &str,
        semaphore: &Semaphore,
        completed_cards: &AtomicUsize,
        cancel: &AtomicBool,
        events: &mpsc::UnboundedSender<GenerationEvent>,
    ) -> (usize, usize) {
        let mut card_jobs = FuturesUnordered::new();
        for keyword in &section.keywords {
            card_jobs.push(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return (keyword.clone(), Err(anyhow::Error::from(e))),
                };
                let result = self
                    .generate_card_for_keyword(keyword, &section.title, course_title, difficulty)
                    .await;
                (keyword.clone(), result)
            });
        }

        let attempted = card_jobs.len();
        let mut next_order = section.existing_cards as i64 + 1;
        let mut generated = 0usize;

        while let Some((keyword, result)) = card_jobs.next().await {
            if cancel.load(Ordering::Relaxed) {
                debug!(
                    section_id = %section.section_id,
                    "Discarding in-flight card results, task cancelled"
                );
                break;
            }

            let draft = match result {
                Ok(draft) => draft,
                Err(e) => {
                    warn!(
                        section_id = %section.section_id,
                        keyword = %keyword,
                        error = %e,
                        "Card generation failed, dropping keyword"
                    );
                    continue;
                }
            };

            match self
                .persist_card(&draft, section.section_id, next_order)
                .await
            {
                Ok(_) => {
                    next_order += 1;
                    generated += 1;
                    let completed = completed_cards.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = events.send(GenerationEvent::CardPersisted {
                        section_id: section.section_id,
                        cards_completed: completed,
                    });
                }
                Err(e) => {
                    warn!(
                        section_id = %section.section_id,
                        keyword = %keyword,
                        error = %e,
                        "Failed to persist generated card, dropping it"
                    );
                }
            }
        }

        (generated, attempted)
    }

    /// Single batched call producing the per-section quota of cards.
    #[allow(clippy::too_many_arguments)]
    async fn run_section_batch(
        &self,
        course_title: &str,
        section: &SectionStructure,
        difficulty: &str,
        semaphore: &Semaphore,
        completed_cards: &AtomicUsize,
        cancel: &AtomicBool,
        events: &mpsc::UnboundedSender<GenerationEvent>,
    ) -> (usize, usize) {
        let drafts = {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(
                        section_id = %section.section_id,
                        error = %e,
                        "Semaphore closed before section batch"
                    );
                    return (0, self.cards_per_section);
                }
            };

            match self
                .request_cards(
                    &section.title,
                    &section.title,
                    course_title,
                    difficulty,
                    self.cards_per_section,
                )
                .await
            {
                Ok(drafts) => drafts,
                Err(e) => {
                    warn!(
                        section_id = %section.section_id,
                        error = %e,
                        "Section batch generation failed"
                    );
                    return (0, self.cards_per_section);
                }
            }
        };

        let mut next_order = section.existing_cards as i64 + 1;
        let mut generated = 0usize;

        for draft in &drafts {
            if cancel.load(Ordering::Relaxed) {
                debug!(
                    section_id = %section.section_id,
                    "Discarding batch results, task cancelled"
                );
                break;
            }

            match self
                .persist_card(draft, section.section_id, next_order)
                .await
            {
                Ok(_) => {
                    next_order += 1;
                    generated += 1;
                    let completed = completed_cards.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = events.send(GenerationEvent::CardPersisted {
                        section_id: section.section_id,
                        cards_completed: completed,
                    });
                }
                Err(e) => {
                    warn!(
                        section_id = %section.section_id,
                        keyword = %draft.keyword,
                        error = %e,
                        "Failed to persist generated card, dropping it"
                    );
                }
            }
        }

        (generated, self.cards_per_section.max(drafts.len()))
    }

    async fn generate_card_for_keyword(
        &self,
        keyword: &str,
        section_title: &str,
        course_title: &str,
        difficulty: &str,
    ) -> Result<CardDraft> {
        let subject = format!("keyword: {}", keyword);
        let drafts = self
            .request_cards(&subject, section_title, course_title, difficulty, 1)
            .await?;

        let mut draft = drafts.into_iter().next().ok_or_else(|| {
            anyhow::anyhow!("Generation returned no usable card for keyword '{}'", keyword)
        })?;

        // Attribution comes from the request, never from model output order
        draft.keyword = keyword.to_string();
        Ok(draft)
    }

    async fn request_cards(
        &self,
        subject: &str,
        section_title: &str,
        course_title: &str,
        difficulty: &str,
        num_cards: usize,
    ) -> Result<Vec<CardDraft>> {
        let prompt = format!(
            r#"Based on the provided subject and context, generate exactly {num} distinct educational flashcards.

Context:
Course: {course}
Section/Topic: {section}
Subject for card generation: "{subject}"
Number of cards to generate: {num}
Target Difficulty for all cards: {difficulty}

Format the response as a single JSON object containing a key named "cards". The value of "cards" should be a JSON list, where each element is a flashcard object with this exact structure:
{{
    "keyword": "A specific keyword related to the subject for this card.",
    "question": "A clear question related to the keyword.",
    "answer": "A concise and accurate answer to the question.",
    "explanation": "A brief explanation providing more context or detail about the answer.",
    "difficulty": "{difficulty}",
    "resources": [{{ "title": "Resource Title", "url": "https://example.com" }}],
    "tags": ["tag1", "tag2"]
}}

Ensure the output is ONLY the JSON object containing the 'cards' list. Do not include any introductory text, markdown formatting, or explanations outside the JSON structure. Ensure all {num} requested cards are generated."#,
            num = num_cards,
            course = course_title,
            section = section_title,
            subject = subject,
            difficulty = difficulty
        );

        let system_message = "You are an expert educational content creator who outputs lists of flashcard data in JSON format.";
        let options = CompletionOptions {
            temperature: 0.7,
            max_tokens: (300 * num_cards as u32) + 500,
        };

        let response = self
            .model
            .complete(Some(system_message), &prompt, options)
            .await?;

        let generated = self.parse_cards(&response)?;
        let drafts: Vec<CardDraft> = generated
            .into_iter()
            .filter_map(|data| {
                let draft = draft_from_generated(data, difficulty);
                if draft.is_none() {
                    warn!(
                        subject = %subject,
                        "Skipping generated card with missing required fields"
                    );
                }
                draft
            })
            .collect();

        Ok(drafts)
    }

    fn parse_cards(&self, response: &str) -> Result<Vec<GeneratedCardData>> {
        if let Ok(wrapped) = self.json_parser.parse::<GeneratedCards>(response) {
            return Ok(wrapped.cards);
        }

        // Some models return the bare list without the wrapper object
        self.json_parser
            .parse::<Vec<GeneratedCardData>>(response)
            .map_err(|e| anyhow::anyhow!("Failed to parse card generation JSON: {}", e))
    }

    async fn persist_card(
        &self,
        draft: &CardDraft,
        section_id: Uuid,
        order_index: i64,
    ) -> Result<Uuid> {
        let card = self.db.insert_card(draft).await?;
        self.db
            .link_card_to_section(section_id, card.id, order_index)
            .await?;
        Ok(card.id)
    }
}
