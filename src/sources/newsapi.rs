//! NewsAPI.org provider
//!
//! Smallest daily budget, used as the last-resort source. The API key is
//! sent in the `X-Api-Key` header rather than the query string.
//! https://newsapi.org/docs/endpoints/top-headlines

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
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    articles: Option<Vec<NewsApiArticle>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    source: Option<NewsApiSourceRef>,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    #[serde(rename = "urlToImage")]
    url_to_image: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSourceRef {
    name: Option<String>,
}

pub struct NewsApiProvider {
    client: ProviderHttpClient,
    api_key: String,
    base_url: String,
    metadata: ProviderMetadata,
}

impl NewsApiProvider {
    pub fn new(
        http_client: Arc<ResilientHttpClient>,
        api_key: String,
        base_url: String,
        rate_limit_rpm: u32,
        daily_limit: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let client = ProviderHttpClient::new(http_client, "newsapi", rate_limit_rpm, breaker);
        let metadata = ProviderMetadata {
            id: "newsapi".to_string(),
            name: "NewsAPI".to_string(),
            daily_limit,
            hourly_limit: None,
            priority: 4,
        };
        Self {
            client,
            api_key,
            base_url,
            metadata,
        }
    }

    fn into_raw(article: NewsApiArticle) -> Option<RawArticle> {
        let title = article.title?;
        // The API returns "[Removed]" placeholders for retracted stories.
        if title == "[Removed]" {
            return None;
        }
        let url = article.url?;
        Some(RawArticle {
            title,
            description: article.description,
            body: article.content,
            url,
            image_url: article.url_to_image,
            source_name: article.source.and_then(|s| s.name),
            author: article.author,
            published_at_raw: article.published_at,
        })
    }
}

#[async_trait]
impl Provider for NewsApiProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let mut params: Vec<(&str, String)> = vec![
            ("category", request.category.clone()),
            ("pageSize", request.limit.min(100).to_string()),
        ];
        if let Some(ref region) = request.region {
            params.push(("country", region.clone()));
        }

        debug!(source = "newsapi", category = %request.category, "fetching articles");

        let url = format!("{}/top-headlines", self.base_url);
        let response = self
            .client
            .get_with_header(&url, &params, "X-Api-Key", &self.api_key)
            .await?;
        let body: NewsApiResponse = response.json().await.map_err(IngestError::Network)?;

        if body.status != "ok" {
            return Err(IngestError::Api {
                code: body.code.unwrap_or_else(|| "unknown".to_string()),
                message: body.message.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let articles: Vec<Article> = body
            .articles
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::into_raw)
            .map(|raw| super::normalize("newsapi", raw, &request.category))
            .collect();

        info!(source = "newsapi", count = articles.len(), category = %request.category, "fetched articles");
        Ok(articles)
    }
}
