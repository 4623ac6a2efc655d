//! GNews provider
//!
//! The only provider with an hourly cap on top of its daily budget.
//! https://gnews.io/docs/v4

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::{FetchRequest, Provider, ProviderMetadata, RawArticle};
use crate::breaker::CircuitBreaker;
use crate::error::{IngestError, Result};
use crate::http::{ProviderHttpClient, ResilientHttpClient};
use crate::model::Article;

#[derive(Debug, Deserialize)]
struct GNewsResponse {
    #[serde(default)]
    articles: Vec<GNewsArticle>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GNewsArticle {
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
    image: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    source: Option<GNewsSource>,
}

#[derive(Debug, Deserialize)]
struct GNewsSource {
    name: Option<String>,
}

pub struct GNewsProvider {
    client: ProviderHttpClient,
    api_key: String,
    base_url: String,
    metadata: ProviderMetadata,
}

impl GNewsProvider {
    pub fn new(
        http_client: Arc<ResilientHttpClient>,
        api_key: String,
        base_url: String,
        rate_limit_rpm: u32,
        daily_limit: u32,
        hourly_limit: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let client = ProviderHttpClient::new(http_client, "gnews", rate_limit_rpm, breaker);
        let metadata = ProviderMetadata {
            id: "gnews".to_string(),
            name: "GNews".to_string(),
            daily_limit,
            // Zero means the cap is disabled.
            hourly_limit: (hourly_limit > 0).then_some(hourly_limit),
            priority: 3,
        };
        Self {
            client,
            api_key,
            base_url,
            metadata,
        }
    }

    /// GNews uses a fixed topic vocabulary that differs from ours.
    fn topic_for(category: &str) -> &str {
        match category {
            "business" => "business",
            "sports" => "sports",
            "technology" => "technology",
            "entertainment" => "entertainment",
            "health" => "health",
            "science" => "science",
            "politics" | "breaking" => "nation",
            _ => "general",
        }
    }

    fn into_raw(article: GNewsArticle) -> Option<RawArticle> {
        let title = article.title?;
        let url = article.url?;
        Some(RawArticle {
            title,
            description: article.description,
            body: article.content,
            url,
            image_url: article.image,
            source_name: article.source.and_then(|s| s.name),
            author: None,
            published_at_raw: article.published_at,
        })
    }
}

#[async_trait]
impl Provider for GNewsProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let mut params: Vec<(&str, String)> = vec![
            ("apikey", self.api_key.clone()),
            ("category", Self::topic_for(&request.category).to_string()),
            ("max", request.limit.min(25).to_string()),
            ("lang", "en".to_string()),
        ];
        if let Some(ref region) = request.region {
            params.push(("country", region.clone()));
        }

        debug!(source = "gnews", category = %request.category, "fetching articles");

        let url = format!("{}/top-headlines", self.base_url);
        let response = self.client.get_with_query(&url, &params).await?;
        let body: GNewsResponse = response.json().await.map_err(IngestError::Network)?;

        if let Some(errors) = body.errors {
            return Err(IngestError::Api {
                code: "gnews_error".to_string(),
                message: errors.join("; "),
            });
        }

        let articles: Vec<Article> = body
            .articles
            .into_iter()
            .filter_map(Self::into_raw)
            .map(|raw| super::normalize("gnews", raw, &request.category))
            .collect();

        info!(source = "gnews", count = articles.len(), category = %request.category, "fetched articles");
        Ok(articles)
    }
}
