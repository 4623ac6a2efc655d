//! Mediastack provider
//!
//! https://mediastack.com/documentation

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
struct MediastackResponse {
    #[serde(default)]
    data: Option<Vec<MediastackArticle>>,
    #[serde(default)]
    error: Option<MediastackError>,
}

#[derive(Debug, Deserialize)]
struct MediastackError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MediastackArticle {
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    source: Option<String>,
    image: Option<String>,
    published_at: Option<String>,
}

pub struct MediastackProvider {
    client: ProviderHttpClient,
    api_key: String,
    base_url: String,
    metadata: ProviderMetadata,
}

impl MediastackProvider {
    pub fn new(
        http_client: Arc<ResilientHttpClient>,
        api_key: String,
        base_url: String,
        rate_limit_rpm: u32,
        daily_limit: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let client = ProviderHttpClient::new(http_client, "mediastack", rate_limit_rpm, breaker);
        let metadata = ProviderMetadata {
            id: "mediastack".to_string(),
            name: "Mediastack".to_string(),
            daily_limit,
            hourly_limit: None,
            priority: 2,
        };
        Self {
            client,
            api_key,
            base_url,
            metadata,
        }
    }

    fn into_raw(article: MediastackArticle) -> Option<RawArticle> {
        let title = article.title?;
        let url = article.url?;
        Some(RawArticle {
            title,
            description: article.description,
            body: None,
            url,
            image_url: article.image,
            source_name: article.source,
            author: article.author,
            published_at_raw: article.published_at,
        })
    }
}

#[async_trait]
impl Provider for MediastackProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let mut params: Vec<(&str, String)> = vec![
            ("access_key", self.api_key.clone()),
            ("categories", request.category.clone()),
            ("limit", request.limit.min(100).to_string()),
            ("sort", "published_desc".to_string()),
        ];
        if let Some(ref region) = request.region {
            params.push(("countries", region.clone()));
        }

        debug!(source = "mediastack", category = %request.category, "fetching articles");

        let url = format!("{}/news", self.base_url);
        let response = self.client.get_with_query(&url, &params).await?;
        let body: MediastackResponse = response.json().await.map_err(IngestError::Network)?;

        if let Some(error) = body.error {
            return Err(IngestError::Api {
                code: error.code,
                message: error.message,
            });
        }

        let articles: Vec<Article> = body
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::into_raw)
            .map(|raw| super::normalize("mediastack", raw, &request.category))
            .collect();

        info!(source = "mediastack", count = articles.len(), category = %request.category, "fetched articles");
        Ok(articles)
    }
}
