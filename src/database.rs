use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        // SQLite serializes writers anyway, and a single connection keeps
        // in-memory databases visible across the whole pool
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migration", "database initialized");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS learning_paths (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                difficulty_level TEXT NOT NULL DEFAULT 'intermediate',
                estimated_days INTEGER NOT NULL DEFAULT 30,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courses (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                estimated_days INTEGER,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS learning_path_courses (
                learning_path_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                PRIMARY KEY (learning_path_id, course_id),
                FOREIGN KEY (learning_path_id) REFERENCES learning_paths(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                estimated_days INTEGER,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS course_sections (
                course_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                PRIMARY KEY (course_id, section_id),
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
                FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                keyword TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                explanation TEXT NOT NULL,
                difficulty TEXT NOT NULL DEFAULT 'intermediate',
                resources TEXT,
                tags TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS section_cards (
                section_id TEXT NOT NULL,
                card_id TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                PRIMARY KEY (section_id, card_id),
                FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE,
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                learning_path_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                stage TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                message TEXT,
                error_details TEXT,
                started_at TEXT,
                ended_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_learning_path_id ON tasks(learning_path_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Task record operations

    pub async fn insert_task_record(
        &self,
        task_id: &str,
        user_id: i64,
        learning_path_id: Option<Uuid>,
    ) -> Result<TaskRecord> {
        let now = Utc::now();
        let record = TaskRecord {
            task_id: task_id.to_string(),
            user_id,
            learning_path_id,
            status: TaskStatus::Pending,
            stage: None,
            progress: 0.0,
            message: None,
            error_details: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, user_id, learning_path_id, status, stage, progress,
                               message, error_details, started_at, ended_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&record.task_id)
        .bind(record.user_id)
        .bind(record.learning_path_id.map(|id| id.to_string()))
        .bind(record.status.as_str())
        .bind(record.stage.map(|s| s.as_str()))
        .bind(record.progress)
        .bind(&record.message)
        .bind(&record.error_details)
        .bind(record.started_at.map(|d| d.to_rfc3339()))
        .bind(record.ended_at.map(|d| d.to_rfc3339()))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_task_record(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update to a task row. Terminal statuses stick, and the
    /// first transition into one stamps `ended_at`; later writes leave both
    /// alone. The read and the write-back share one transaction, so writers
    /// racing on the same row serialize instead of interleaving between the
    /// two.
    pub async fn update_task_record(
        &self,
        task_id: &str,
        update: TaskRecordUpdate,
    ) -> Result<Option<TaskRecord>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = Self::row_to_task_record(&row)?;

        if let Some(status) = update.status {
            if !record.status.is_terminal() || status == record.status {
                record.status = status;
            }
        }
        if let Some(stage) = update.stage {
            record.stage = Some(stage);
        }
        if let Some(progress) = update.progress {
            record.progress = progress;
        }
        if let Some(message) = update.message {
            record.message = Some(message);
        }
        if let Some(details) = update.error_details {
            record.error_details = Some(details);
        }
        if let Some(path_id) = update.learning_path_id {
            record.learning_path_id = Some(path_id);
        }
        if let Some(started) = update.started_at {
            record.started_at.get_or_insert(started);
        }

        record.updated_at = Utc::now();
        if record.status.is_terminal() && record.ended_at.is_none() {
            record.ended_at = Some(record.updated_at);
        }

        sqlx::query(
            r#"
            UPDATE tasks
            SET learning_path_id = ?1, status = ?2, stage = ?3, progress = ?4,
                message = ?5, error_details = ?6, started_at = ?7, ended_at = ?8, updated_at = ?9
            WHERE task_id = ?10
            "#,
        )
        .bind(record.learning_path_id.map(|id| id.to_string()))
        .bind(record.status.as_str())
        .bind(record.stage.map(|s| s.as_str()))
        .bind(record.progress)
        .bind(&record.message)
        .bind(&record.error_details)
        .bind(record.started_at.map(|d| d.to_rfc3339()))
        .bind(record.ended_at.map(|d| d.to_rfc3339()))
        .bind(record.updated_at.to_rfc3339())
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(record))
    }

    pub async fn list_task_records_for_user(
        &self,
        user_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::new();
        for row in rows {
            records.push(Self::row_to_task_record(&row)?);
        }

        Ok(records)
    }

    pub async fn latest_task_record_for_path(
        &self,
        learning_path_id: Uuid,
    ) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE learning_path_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(learning_path_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task_record(&row)?)),
            None => Ok(None),
        }
    }

    // Structure operations

    /// Persist a planned path skeleton in one transaction. Either the whole
    /// skeleton lands or nothing does. Order indices are 1-based and
    /// contiguous in plan order.
    pub async fn insert_structure(&self, plan: &PathPlan) -> Result<PathStructure> {
        let mut tx = self.pool.begin().await?;

        let path_id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO learning_paths (id, title, description, category, difficulty_level,
                                        estimated_days, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(path_id.to_string())
        .bind(&plan.title)
        .bind(&plan.description)
        .bind(&plan.category)
        .bind(&plan.difficulty_level)
        .bind(plan.estimated_days)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let mut courses = Vec::new();
        for (course_index, course_plan) in plan.courses.iter().enumerate() {
            let course_id = Uuid::new_v4();

            sqlx::query(
                "INSERT INTO courses (id, title, description, estimated_days, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(course_id.to_string())
            .bind(&course_plan.title)
            .bind(&course_plan.description)
            .bind(course_plan.estimated_days)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO learning_path_courses (learning_path_id, course_id, order_index) VALUES (?1, ?2, ?3)",
            )
            .bind(path_id.to_string())
            .bind(course_id.to_string())
            .bind((course_index + 1) as i64)
            .execute(&mut *tx)
            .await?;

            let mut sections = Vec::new();
            for (section_index, section_plan) in course_plan.sections.iter().enumerate() {
                let section_id = Uuid::new_v4();

                sqlx::query(
                    "INSERT INTO sections (id, title, description, estimated_days, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(section_id.to_string())
                .bind(&section_plan.title)
                .bind(&section_plan.description)
                .bind(section_plan.estimated_days)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO course_sections (course_id, section_id, order_index) VALUES (?1, ?2, ?3)",
                )
                .bind(course_id.to_string())
                .bind(section_id.to_string())
                .bind((section_index + 1) as i64)
                .execute(&mut *tx)
                .await?;

                sections.push(SectionStructure {
                    section_id,
                    title: section_plan.title.clone(),
                    keywords: section_plan.card_keywords.clone(),
                    existing_cards: 0,
                });
            }

            courses.push(CourseStructure {
                course_id,
                title: course_plan.title.clone(),
                sections,
            });
        }

        tx.commit().await?;

        Ok(PathStructure {
            learning_path_id: path_id,
            title: plan.title.clone(),
            difficulty_level: plan.difficulty_level.clone(),
            courses,
        })
    }

    /// Re-derive the structure of a persisted path, in stored order, with
    /// per-section card counts. Keywords are not stored, so they come back
    /// empty and card generation falls back to the per-section quota.
    pub async fn load_structure(&self, learning_path_id: Uuid) -> Result<Option<PathStructure>> {
        let path_row =
            sqlx::query("SELECT title, difficulty_level FROM learning_paths WHERE id = ?1")
                .bind(learning_path_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        let Some(path_row) = path_row else {
            return Ok(None);
        };

        let course_rows = sqlx::query(
            r#"
            SELECT c.id, c.title
            FROM courses c
            JOIN learning_path_courses lpc ON lpc.course_id = c.id
            WHERE lpc.learning_path_id = ?1
            ORDER BY lpc.order_index
            "#,
        )
        .bind(learning_path_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut courses = Vec::new();
        for course_row in course_rows {
            let course_id = Uuid::parse_str(&course_row.get::<String, _>("id"))?;

            let section_rows = sqlx::query(
                r#"
                SELECT s.id, s.title
                FROM sections s
                JOIN course_sections cs ON cs.section_id = s.id
                WHERE cs.course_id = ?1
                ORDER BY cs.order_index
                "#,
            )
            .bind(course_id.to_string())
            .fetch_all(&self.pool)
            .await?;

            let mut sections = Vec::new();
            for section_row in section_rows {
                let section_id = Uuid::parse_str(&section_row.get::<String, _>("id"))?;

                let count_row =
                    sqlx::query("SELECT COUNT(*) as count FROM section_cards WHERE section_id = ?1")
                        .bind(section_id.to_string())
                        .fetch_one(&self.pool)
                        .await?;
                let existing_cards: i64 = count_row.get("count");

                sections.push(SectionStructure {
                    section_id,
                    title: section_row.get("title"),
                    keywords: Vec::new(),
                    existing_cards: existing_cards as usize,
                });
            }

            courses.push(CourseStructure {
                course_id,
                title: course_row.get("title"),
                sections,
            });
        }

        Ok(Some(PathStructure {
            learning_path_id,
            title: path_row.get("title"),
            difficulty_level: path_row.get("difficulty_level"),
            courses,
        }))
    }

    // Card operations

    pub async fn insert_card(&self, draft: &CardDraft) -> Result<Card> {
        let card = Card {
            id: Uuid::new_v4(),
            keyword: draft.keyword.clone(),
            question: draft.question.clone(),
            answer: draft.answer.clone(),
            explanation: draft.explanation.clone(),
            difficulty: draft.difficulty.clone(),
            resources: if draft.resources.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&draft.resources).unwrap())
            },
            tags: if draft.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&draft.tags).unwrap())
            },
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO cards (id, keyword, question, answer, explanation, difficulty,
                               resources, tags, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(card.id.to_string())
        .bind(&card.keyword)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(&card.explanation)
        .bind(&card.difficulty)
        .bind(&card.resources)
        .bind(&card.tags)
        .bind(card.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(card)
    }

    pub async fn link_card_to_section(
        &self,
        section_id: Uuid,
        card_id: Uuid,
        order_index: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO section_cards (section_id, card_id, order_index) VALUES (?1, ?2, ?3)",
        )
        .bind(section_id.to_string())
        .bind(card_id.to_string())
        .bind(order_index)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn cards_for_section(&self, section_id: Uuid) -> Result<Vec<(i64, Card)>> {
        let rows = sqlx::query(
            r#"
            SELECT sc.order_index, c.*
            FROM cards c
            JOIN section_cards sc ON sc.card_id = c.id
            WHERE sc.section_id = ?1
            ORDER BY sc.order_index
            "#,
        )
        .bind(section_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut cards = Vec::new();
        for row in rows {
            let order_index: i64 = row.get("order_index");
            cards.push((order_index, Self::row_to_card(&row)?));
        }

        Ok(cards)
    }

    fn row_to_card(row: &sqlx::sqlite::SqliteRow) -> Result<Card> {
        Ok(Card {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            keyword: row.get("keyword"),
            question: row.get("question"),
            answer: row.get("answer"),
            explanation: row.get("explanation"),
            difficulty: row.get("difficulty"),
            resources: row.get("resources"),
            tags: row.get("tags"),
            created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))?
                .with_timezone(&Utc),
        })
    }

    fn row_to_task_record(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord> {
        let status_str: String = row.get("status");
        let status = TaskStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown task status '{}' in database", status_str))?;

        let stage = row
            .get::<Option<String>, _>("stage")
            .and_then(|s| TaskStage::parse(&s));

        Ok(TaskRecord {
            task_id: row.get("task_id"),
            user_id: row.get("user_id"),
            learning_path_id: row
                .get::<Option<String>, _>("learning_path_id")
                .and_then(|s| Uuid::parse_str(&s).ok()),
            status,
            stage,
            progress: row.get("progress"),
            message: row.get("message"),
            error_details: row.get("error_details"),
            started_at: row
                .get::<Option<String>, _>("started_at")
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))),
            ended_at: row
                .get::<Option<String>, _>("ended_at")
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))),
            created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))?
                .with_timezone(&Utc),
            updated_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))?
                .with_timezone(&Utc),
        })
    }
}
