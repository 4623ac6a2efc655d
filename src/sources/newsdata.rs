//! Newsdata.io provider
//!
//! Primary provider with the largest daily budget.
//! https://newsdata.io/documentation

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
struct NewsdataResponse {
    status: String,
    #[serde(default)]
    results: Option<Vec<NewsdataArticle>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsdataArticle {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    image_url: Option<String>,
    source_id: Option<String>,
    creator: Option<Vec<String>>,
}

pub struct NewsdataProvider {
    client: ProviderHttpClient,
    api_key: String,
    base_url: String,
    metadata: ProviderMetadata,
}

impl NewsdataProvider {
    pub fn new(
        http_client: Arc<ResilientHttpClient>,
        api_key: String,
        base_url: String,
        rate_limit_rpm: u32,
        daily_limit: u32,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let client = ProviderHttpClient::new(http_client, "newsdata", rate_limit_rpm, breaker);
        let metadata = ProviderMetadata {
            id: "newsdata".to_string(),
            name: "Newsdata.io".to_string(),
            daily_limit,
            hourly_limit: None,
            priority: 1,
        };
        Self {
            client,
            api_key,
            base_url,
            metadata,
        }
    }

    fn into_raw(article: NewsdataArticle) -> Option<RawArticle> {
        let title = article.title?;
        let url = article.link?;
        Some(RawArticle {
            title,
            description: article.description,
            body: article.content,
            url,
            image_url: article.image_url,
            source_name: article.source_id,
            author: article.creator.and_then(|mut c| {
                if c.is_empty() {
                    None
                } else {
                    Some(c.remove(0))
                }
            }),
            published_at_raw: article.pub_date,
        })
    }
}

#[async_trait]
impl Provider for NewsdataProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let mut params: Vec<(&str, String)> = vec![
            ("apikey", self.api_key.clone()),
            ("category", request.category.clone()),
            ("size", request.limit.min(50).to_string()),
        ];
        if let Some(ref region) = request.region {
            params.push(("country", region.clone()));
        }

        debug!(source = "newsdata", category = %request.category, "fetching articles");

        let url = format!("{}/latest", self.base_url);
        let response = self.client.get_with_query(&url, &params).await?;
        let body: NewsdataResponse = response.json().await.map_err(IngestError::Network)?;

        if body.status != "success" {
            return Err(IngestError::Api {
                code: body.code.unwrap_or_else(|| "unknown".to_string()),
                message: body.message.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let articles: Vec<Article> = body
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(Self::into_raw)
            .map(|raw| super::normalize("newsdata", raw, &request.category))
            .collect();

        info!(source = "newsdata", count = articles.len(), category = %request.category, "fetched articles");
        Ok(articles)
    }
}
