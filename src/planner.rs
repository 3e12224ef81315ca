use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::database::Database;
use crate::llm_providers::{CompletionOptions, JsonResponseParser, ModelClient};
use crate::models::{
    CoursePlan, CourseTitles, LearningGoals, PathPlan, PathStructure, SectionPlan,
};
use crate::{log_provider_operation, log_validation};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtractedGoals {
    interests: Vec<String>,
    #[serde(default = "default_difficulty")]
    difficulty_level: String,
    #[serde(default = "default_estimated_days")]
    estimated_days: i64,
}

fn default_difficulty() -> String {
    "intermediate".to_string()
}

fn default_estimated_days() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPlan {
    pub learning_path: GeneratedPathMeta,
    pub courses: Vec<GeneratedCourse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPathMeta {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default)]
    pub estimated_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCourse {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_days: Option<i64>,
    #[serde(default)]
    pub sections: Vec<GeneratedSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSection {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_days: Option<i64>,
    #[serde(default)]
    pub card_keywords: Vec<String>,
}

/// Plans the path/course/section skeleton and persists it transactionally.
#[derive(Clone)]
pub struct PlannerService {
    model: Arc<dyn ModelClient>,
    db: Database,
    json_parser: JsonResponseParser,
}

impl PlannerService {
    pub fn new(model: Arc<dyn ModelClient>, db: Database) -> Self {
        Self {
            model,
            db,
            json_parser: JsonResponseParser::new(),
        }
    }

    async fn request_model(
        &self,
        operation: &'static str,
        system_message: Option<&str>,
        prompt: &str,
        options: CompletionOptions,
    ) -> Result<String> {
        let started = Instant::now();
        log_provider_operation!(start, operation, provider = self.model.provider_name());
        match self.model.complete(system_message, prompt, options).await {
            Ok(text) => {
                log_provider_operation!(
                    success,
                    operation,
                    provider = self.model.provider_name(),
                    duration_ms = started.elapsed().as_millis() as u64
                );
                Ok(text)
            }
            Err(e) => {
                log_provider_operation!(
                    error,
                    operation,
                    provider = self.model.provider_name(),
                    error = e
                );
                Err(e)
            }
        }
    }

    /// Distill a freeform prompt into interests, difficulty and duration.
    pub async fn extract_goals(&self, prompt: &str) -> Result<LearningGoals> {
        info!(
            prompt_length = prompt.len(),
            "Extracting learning goals from prompt"
        );

        let request = format!(
            r#"Analyze the following request from someone who wants to learn something new.

Request: "{}"

Extract:
1. interests: the topics they want to learn (list of short strings)
2. difficulty_level: "beginner", "intermediate" or "advanced" (default "intermediate" if not stated)
3. estimated_days: how many days they plan to spend (default 30 if not stated)

Respond ONLY with a JSON object in this exact format:
{{
    "interests": ["Topic 1", "Topic 2"],
    "difficulty_level": "intermediate",
    "estimated_days": 30
}}"#,
            prompt
        );

        let system_message =
            "You are an intent recognition expert for a learning path generator. Respond only in JSON.";
        // Low temperature keeps entity extraction deterministic
        let options = CompletionOptions {
            temperature: 0.1,
            max_tokens: 400,
        };

        let response = self
            .request_model("extract_goals", Some(system_message), &request, options)
            .await?;

        debug!(response_content = %response, "Raw goal extraction response");

        let goals: ExtractedGoals = self.json_parser.parse(&response).map_err(|e| {
            error!(
                error = %e,
                json_content = %self.json_parser.extract_json(&response),
                "Failed to parse goal extraction response"
            );
            anyhow::anyhow!("Failed to parse goal extraction JSON: {}", e)
        })?;

        if goals.interests.is_empty() {
            bail!("Goal extraction returned no interests");
        }

        info!(
            interests = ?goals.interests,
            difficulty_level = %goals.difficulty_level,
            estimated_days = goals.estimated_days,
            "Extracted learning goals"
        );

        Ok(LearningGoals {
            interests: goals.interests,
            difficulty_level: goals.difficulty_level,
            estimated_days: goals.estimated_days,
        })
    }

    /// Generate the full path/course/section plan for a set of interests.
    pub async fn plan_from_interests(&self, goals: &LearningGoals) -> Result<PathPlan> {
        if goals.interests.is_empty() {
            bail!("Cannot plan a learning path without interests");
        }

        let interests_str = goals.interests.join(", ");
        info!(
            interests = %interests_str,
            difficulty_level = %goals.difficulty_level,
            estimated_days = goals.estimated_days,
            "Planning learning path structure"
        );

        let prompt = format!(
            r#"Create a complete structured learning path for someone interested in {interests}.
The learning path should be at {difficulty} level and designed to be completed in approximately {days} days.

The learning path should include:
1. A title for the learning path
2. A brief description of the learning path
3. A category (derived from the interests)
4. 2-4 courses, each with:
   - A title
   - A brief description
   - An estimated number of days for the course
5. For each course, 3-5 sections, each with:
   - A title
   - A brief description
   - An estimated number of days for this section
   - 5-10 keyword suggestions for cards (just the keywords)

Format the response as a single JSON object with the following structure:
{{
    "learning_path": {{
        "title": "Learning Path Title",
        "description": "Learning path description",
        "category": "Main category from interests",
        "difficulty_level": "{difficulty}",
        "estimated_days": {days}
    }},
    "courses": [
        {{
            "title": "Course 1 Title",
            "description": "Course 1 description",
            "order_index": 1,
            "estimated_days": 10,
            "sections": [
                {{
                    "title": "Section 1 Title",
                    "description": "Section 1 description",
                    "order_index": 1,
                    "estimated_days": 3,
                    "card_keywords": ["Keyword 1", "Keyword 2"]
                }}
            ]
        }}
    ]
}}

Ensure the output is ONLY the JSON object, starting with {{ and ending with }}."#,
            interests = interests_str,
            difficulty = goals.difficulty_level,
            days = goals.estimated_days
        );

        let system_message =
            "You are an expert curriculum designer who creates detailed learning paths in JSON format.";
        let options = CompletionOptions {
            temperature: 0.7,
            max_tokens: 3000,
        };

        let response = self
            .request_model("plan_path", Some(system_message), &prompt, options)
            .await?;

        debug!(
            response_length = response.len(),
            "Raw structure planning response"
        );

        let generated: GeneratedPlan = self.json_parser.parse(&response).map_err(|e| {
            error!(
                error = %e,
                json_content = %self.json_parser.extract_json(&response),
                "Failed to parse structure planning response"
            );
            anyhow::anyhow!("Failed to parse learning path JSON: {}", e)
        })?;

        let plan = PathPlan {
            title: generated.learning_path.title,
            description: generated.learning_path.description,
            category: generated
                .learning_path
                .category
                .unwrap_or_else(|| goals.interests[0].clone()),
            difficulty_level: generated
                .learning_path
                .difficulty_level
                .unwrap_or_else(|| goals.difficulty_level.clone()),
            estimated_days: generated
                .learning_path
                .estimated_days
                .unwrap_or(goals.estimated_days),
            courses: generated
                .courses
                .into_iter()
                .map(|course| CoursePlan {
                    title: course.title,
                    description: course.description,
                    estimated_days: course.estimated_days,
                    sections: course
                        .sections
                        .into_iter()
                        .map(|section| SectionPlan {
                            title: section.title,
                            description: section.description,
                            estimated_days: section.estimated_days,
                            card_keywords: section.card_keywords,
                        })
                        .collect(),
                })
                .collect(),
        };

        validate_plan(&plan)?;

        info!(
            title = %plan.title,
            course_count = plan.courses.len(),
            section_count = plan.courses.iter().map(|c| c.sections.len()).sum::<usize>(),
            keyword_count = plan
                .courses
                .iter()
                .flat_map(|c| &c.sections)
                .map(|s| s.card_keywords.len())
                .sum::<usize>(),
            "Planned learning path structure"
        );

        Ok(plan)
    }

    /// Build a plan directly from caller-provided titles. No model call; the
    /// sections carry no keywords, so the card stage fills them by quota.
    pub fn plan_from_titles(
        &self,
        title: &str,
        courses: &[CourseTitles],
        difficulty_level: &str,
        estimated_days: i64,
    ) -> Result<PathPlan> {
        let plan = PathPlan {
            title: title.to_string(),
            description: None,
            category: title.to_string(),
            difficulty_level: difficulty_level.to_string(),
            estimated_days,
            courses: courses
                .iter()
                .map(|course| CoursePlan {
                    title: course.title.clone(),
                    description: None,
                    estimated_days: None,
                    sections: course
                        .sections
                        .iter()
                        .map(|section_title| SectionPlan {
                            title: section_title.clone(),
                            description: None,
                            estimated_days: None,
                            card_keywords: Vec::new(),
                        })
                        .collect(),
                })
                .collect(),
        };

        validate_plan(&plan)?;
        Ok(plan)
    }

    /// Persist the plan skeleton in one transaction, returning it with ids.
    pub async fn persist_structure(&self, plan: &PathPlan) -> Result<PathStructure> {
        validate_plan(plan)?;
        let structure = self.db.insert_structure(plan).await?;
        info!(
            learning_path_id = %structure.learning_path_id,
            course_count = structure.courses.len(),
            "Persisted learning path structure"
        );
        Ok(structure)
    }

    pub async fn load_structure(&self, learning_path_id: Uuid) -> Result<Option<PathStructure>> {
        self.db.load_structure(learning_path_id).await
    }
}

/// A plan must carry at least one course and every course at least one
/// section, or the card stage would have nothing to generate into.
fn validate_plan(plan: &PathPlan) -> Result<()> {
    if plan.title.trim().is_empty() {
        log_validation!(failure, "planner", error = "empty path title");
        bail!("Planned learning path has an empty title");
    }
    if plan.courses.is_empty() {
        log_validation!(failure, "planner", error = "no courses in plan");
        bail!("Planned learning path contains no courses");
    }
    for course in &plan.courses {
        if course.title.trim().is_empty() {
            log_validation!(failure, "planner", error = "empty course title");
            bail!("Planned course has an empty title");
        }
        if course.sections.is_empty() {
            log_validation!(failure, "planner", error = "course without sections");
            bail!("Course '{}' contains no sections", course.title);
        }
    }
    log_validation!(success, "planner", "plan structure validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct ScriptedModel {
        response: String,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(
            &self,
            _system_message: Option<&str>,
            _prompt: &str,
            _options: CompletionOptions,
        ) -> Result<String> {
            Ok(self.response.clone())
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted-model"
        }
    }

    async fn planner_with(response: &str) -> PlannerService {
        let db = Database::new("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        PlannerService::new(
            Arc::new(ScriptedModel {
                response: response.to_string(),
            }),
            db,
        )
    }

    #[tokio::test]
    async fn test_plan_from_titles_is_deterministic() {
        let planner = planner_with("unused").await;
        let courses = vec![
            CourseTitles {
                title: "Course A".to_string(),
                sections: vec!["A1".to_string(), "A2".to_string()],
            },
            CourseTitles {
                title: "Course B".to_string(),
                sections: vec!["B1".to_string()],
            },
        ];

        let plan = planner
            .plan_from_titles("My Path", &courses, "beginner", 14)
            .unwrap();

        assert_eq!(plan.title, "My Path");
        assert_eq!(plan.difficulty_level, "beginner");
        assert_eq!(plan.courses.len(), 2);
        assert_eq!(plan.courses[0].sections.len(), 2);
        assert_eq!(plan.courses[1].sections[0].title, "B1");
        assert!(
            plan.courses
                .iter()
                .flat_map(|c| &c.sections)
                .all(|s| s.card_keywords.is_empty())
        );
    }

    #[tokio::test]
    async fn test_plan_from_titles_rejects_empty_course_list() {
        let planner = planner_with("unused").await;
        let result = planner.plan_from_titles("My Path", &[], "beginner", 14);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_plan_from_titles_rejects_course_without_sections() {
        let planner = planner_with("unused").await;
        let courses = vec![CourseTitles {
            title: "Empty Course".to_string(),
            sections: vec![],
        }];
        let result = planner.plan_from_titles("My Path", &courses, "beginner", 14);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_extract_goals_applies_defaults() {
        let planner = planner_with(r#"{"interests": ["Rust", "Async programming"]}"#).await;
        let goals = planner.extract_goals("I want to learn Rust").await.unwrap();

        assert_eq!(goals.interests, vec!["Rust", "Async programming"]);
        assert_eq!(goals.difficulty_level, "intermediate");
        assert_eq!(goals.estimated_days, 30);
    }

    #[tokio::test]
    async fn test_extract_goals_rejects_empty_interests() {
        let planner = planner_with(r#"{"interests": []}"#).await;
        let result = planner.extract_goals("Teach me nothing").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_plan_from_interests_parses_fenced_response() {
        let response = r#"Here is your learning path:
```json
{
    "learning_path": {
        "title": "Rust Deep Dive",
        "description": "Systems programming with Rust",
        "category": "Programming",
        "difficulty_level": "advanced",
        "estimated_days": 45
    },
    "courses": [
        {
            "title": "Ownership",
            "description": "Memory without GC",
            "order_index": 1,
            "estimated_days": 10,
            "sections": [
                {
                    "title": "Borrowing",
                    "description": "References and lifetimes",
                    "order_index": 1,
                    "estimated_days": 3,
                    "card_keywords": ["borrow checker", "lifetimes", "aliasing"]
                }
            ]
        }
    ]
}
```"#;
        let planner = planner_with(response).await;
        let goals = LearningGoals {
            interests: vec!["Rust".to_string()],
            difficulty_level: "intermediate".to_string(),
            estimated_days: 30,
        };

        let plan = planner.plan_from_interests(&goals).await.unwrap();

        assert_eq!(plan.title, "Rust Deep Dive");
        assert_eq!(plan.difficulty_level, "advanced");
        assert_eq!(plan.estimated_days, 45);
        assert_eq!(plan.courses.len(), 1);
        assert_eq!(
            plan.courses[0].sections[0].card_keywords,
            vec!["borrow checker", "lifetimes", "aliasing"]
        );
    }

    #[tokio::test]
    async fn test_plan_from_interests_falls_back_to_first_interest_for_category() {
        let response = r#"{
            "learning_path": {"title": "Minimal Path"},
            "courses": [
                {"title": "C1", "sections": [{"title": "S1", "card_keywords": ["k1"]}]}
            ]
        }"#;
        let planner = planner_with(response).await;
        let goals = LearningGoals {
            interests: vec!["Databases".to_string()],
            difficulty_level: "beginner".to_string(),
            estimated_days: 21,
        };

        let plan = planner.plan_from_interests(&goals).await.unwrap();

        assert_eq!(plan.category, "Databases");
        assert_eq!(plan.difficulty_level, "beginner");
        assert_eq!(plan.estimated_days, 21);
    }

    #[tokio::test]
    async fn test_plan_from_interests_rejects_plan_without_courses() {
        let response = r#"{"learning_path": {"title": "Empty"}, "courses": []}"#;
        let planner = planner_with(response).await;
        let goals = LearningGoals {
            interests: vec!["Rust".to_string()],
            difficulty_level: "intermediate".to_string(),
            estimated_days: 30,
        };

        assert!(planner.plan_from_interests(&goals).await.is_err());
    }

    #[tokio::test]
    async fn test_persist_and_load_structure_roundtrip() {
        let planner = planner_with("unused").await;
        let courses = vec![CourseTitles {
            title: "Course A".to_string(),
            sections: vec!["A1".to_string(), "A2".to_string()],
        }];
        let plan = planner
            .plan_from_titles("Persisted Path", &courses, "intermediate", 30)
            .unwrap();

        let structure = planner.persist_structure(&plan).await.unwrap();
        assert_eq!(structure.courses.len(), 1);
        assert_eq!(structure.courses[0].sections.len(), 2);

        let loaded = planner
            .load_structure(structure.learning_path_id)
            .await
            .unwrap()
            .expect("structure should exist");
        assert_eq!(loaded.title, "Persisted Path");
        assert_eq!(loaded.courses[0].sections[0].title, "A1");
        assert_eq!(loaded.courses[0].sections[0].existing_cards, 0);
    }
}
