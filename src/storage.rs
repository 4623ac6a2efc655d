//! Persistence layer
//!
//! Articles are written through to Postgres after deduplication; quota
//! usage is persisted so counters survive restarts. Writes are upserts so
//! re-fetching a story never duplicates rows.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::Article;
use crate::quota::QuotaSnapshot;

#[derive(Clone)]
pub struct Storage {
    db: PgPool,
}

impl Storage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("connecting to database");
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// Upserts a batch of articles keyed on external id. Returns the
    /// number of rows written.
    pub async fn save_articles(&self, articles: &[Article]) -> Result<u64> {
        debug!(count = articles.len(), "saving articles");
        let mut written = 0u64;

        for article in articles {
            // Runtime queries avoid a compile-time database requirement.
            let result = sqlx::query(
                r#"
                INSERT INTO articles (
                    external_id, title, description, body, url, image_url,
                    source, author, category, published_at, fetched_at,
                    is_regionally_relevant, relevance_score, sentiment_score,
                    word_count, reading_time_minutes, tags, is_active,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, $15, $16, $17, $18, NOW(), NOW())
                ON CONFLICT (external_id) DO UPDATE SET
                    description = EXCLUDED.description,
                    body = EXCLUDED.body,
                    image_url = EXCLUDED.image_url,
                    fetched_at = EXCLUDED.fetched_at,
                    relevance_score = EXCLUDED.relevance_score,
                    word_count = EXCLUDED.word_count,
                    reading_time_minutes = EXCLUDED.reading_time_minutes,
                    updated_at = NOW()
                "#,
            )
            .bind(&article.external_id)
            .bind(&article.title)
            .bind(&article.description)
            .bind(&article.body)
            .bind(&article.url)
            .bind(&article.image_url)
            .bind(&article.source)
            .bind(&article.author)
            .bind(&article.category)
            .bind(article.published_at)
            .bind(article.fetched_at)
            .bind(article.is_regionally_relevant)
            .bind(article.relevance_score)
            .bind(article.sentiment_score)
            .bind(article.word_count as i32)
            .bind(article.reading_time_minutes as i32)
            .bind(article.tags.iter().cloned().collect::<Vec<String>>())
            .bind(article.is_active)
            .execute(&self.db)
            .await?;

            written += result.rows_affected();
        }

        info!(written, "articles saved");
        Ok(written)
    }

    /// Most recently published active articles for a category.
    pub async fn recent_articles(&self, category: &str, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT external_id, id, title, description, body, url, image_url,
                   source, author, category, published_at, fetched_at,
                   is_regionally_relevant, relevance_score, sentiment_score,
                   word_count, reading_time_minutes, tags
            FROM articles
            WHERE category = $1 AND is_active
            ORDER BY published_at DESC
            LIMIT $2
            "#,
        )
        .bind(category)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(Self::row_to_article).collect())
    }

    fn row_to_article(row: &PgRow) -> Article {
        let tags: Vec<String> = row.get("tags");
        Article {
            external_id: row.get("external_id"),
            id: Some(row.get::<i64, _>("id")),
            title: row.get("title"),
            description: row.get("description"),
            body: row.get("body"),
            url: row.get("url"),
            image_url: row.get("image_url"),
            source: row.get("source"),
            author: row.get("author"),
            category: row.get("category"),
            published_at: row.get("published_at"),
            fetched_at: row.get("fetched_at"),
            is_regionally_relevant: row.get("is_regionally_relevant"),
            relevance_score: row.get("relevance_score"),
            sentiment_score: row.get("sentiment_score"),
            word_count: row.get::<i32, _>("word_count") as usize,
            reading_time_minutes: row.get::<i32, _>("reading_time_minutes") as usize,
            tags: tags.into_iter().collect(),
            is_active: true,
            is_featured: false,
            view_count: 0,
        }
    }

    /// Persists quota counters for crash recovery. One row per provider
    /// per reference-timezone day.
    pub async fn save_quota_usage(&self, snapshot: &QuotaSnapshot, day: chrono::NaiveDate) -> Result<()> {
        for provider in &snapshot.providers {
            sqlx::query(
                r#"
                INSERT INTO quota_usage (provider, day, used_today, used_by_category, updated_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (provider, day) DO UPDATE SET
                    used_today = EXCLUDED.used_today,
                    used_by_category = EXCLUDED.used_by_category,
                    updated_at = NOW()
                "#,
            )
            .bind(&provider.provider)
            .bind(day)
            .bind(provider.used_today as i32)
            .bind(serde_json::to_value(&provider.used_by_category)?)
            .execute(&self.db)
            .await?;
        }
        debug!(day = %day, "quota usage persisted");
        Ok(())
    }

    /// Loads persisted quota counters for a day, keyed by provider.
    pub async fn load_quota_usage(
        &self,
        day: chrono::NaiveDate,
    ) -> Result<HashMap<String, (u32, HashMap<String, u32>)>> {
        let rows = sqlx::query(
            "SELECT provider, used_today, used_by_category FROM quota_usage WHERE day = $1",
        )
        .bind(day)
        .fetch_all(&self.db)
        .await?;

        let mut usage = HashMap::new();
        for row in rows {
            let provider: String = row.get("provider");
            let used_today: i32 = row.get("used_today");
            let by_category: serde_json::Value = row.get("used_by_category");
            let by_category: HashMap<String, u32> =
                serde_json::from_value(by_category).unwrap_or_default();
            usage.insert(provider, (used_today.max(0) as u32, by_category));
        }
        Ok(usage)
    }
}
