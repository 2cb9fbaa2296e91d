use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Article;

const NEWS_API_URL: &str = "https://newsapi.org/v2";
const REMOVED_PLACEHOLDER: &str = "[Removed]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsResponse {
    status: String,
    #[allow(dead_code)]
    total_results: Option<u32>,
    #[serde(default)]
    articles: Vec<Article>,
    code: Option<String>,
    message: Option<String>,
}

/// Where article batches come from.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn top_headlines(
        &self,
        country: &str,
        category: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<Article>>;

    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<Article>>;
}

pub struct NewsApiClient {
    client: Client,
    api_key: String,
}

impl NewsApiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("news-digest/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, api_key }
    }

    async fn fetch(&self, url: Url) -> Result<Vec<Article>> {
        tracing::debug!("Fetching {}", url.path());
        let response = self
            .client
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        decode_articles(status, &body)
    }
}

#[async_trait]
impl ArticleSource for NewsApiClient {
    async fn top_headlines(
        &self,
        country: &str,
        category: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<Article>> {
        self.fetch(top_headlines_url(country, category, page_size)?)
            .await
    }

    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<Article>> {
        self.fetch(search_url(query, page_size)?).await
    }
}

fn top_headlines_url(country: &str, category: Option<&str>, page_size: u32) -> Result<Url> {
    let page_size = page_size.to_string();
    let mut params = vec![("country", country), ("pageSize", page_size.as_str())];
    if let Some(category) = category {
        params.push(("category", category));
    }
    Url::parse_with_params(&format!("{}/top-headlines", NEWS_API_URL), &params)
        .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e).into())
}

fn search_url(query: &str, page_size: u32) -> Result<Url> {
    let page_size = page_size.to_string();
    let mut params = vec![
        ("sortBy", "publishedAt"),
        ("language", "en"),
        ("pageSize", page_size.as_str()),
    ];
    let query = query.trim();
    if !query.is_empty() {
        params.push(("q", query));
    }
    Url::parse_with_params(&format!("{}/everything", NEWS_API_URL), &params)
        .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e).into())
}

fn decode_articles(status: StatusCode, body: &str) -> Result<Vec<Article>> {
    let response: NewsResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(_) if !status.is_success() => {
            return Err(AppError::NewsApi(format!("HTTP {}", status)));
        }
        Err(e) => return Err(e.into()),
    };

    if !status.is_success() || response.status != "ok" {
        let message = response
            .message
            .or(response.code)
            .unwrap_or_else(|| format!("HTTP {}", status));
        return Err(AppError::NewsApi(message));
    }

    let articles: Vec<Article> = response
        .articles
        .into_iter()
        .filter(|a| a.title != REMOVED_PLACEHOLDER)
        .collect();
    tracing::debug!("Decoded {} articles", articles.len());
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_top_headlines_url() {
        let url = top_headlines_url("us", Some("business"), 20).unwrap();
        assert_eq!(
            url.as_str(),
            "https://newsapi.org/v2/top-headlines?country=us&pageSize=20&category=business"
        );
    }

    #[test]
    fn search_url_encodes_query_and_skips_blank() {
        let url = search_url("rust & wasm", 30).unwrap();
        assert!(url.as_str().ends_with("&q=rust+%26+wasm"));

        let url = search_url("  ", 30).unwrap();
        assert!(!url.as_str().contains("q="));
    }

    #[test]
    fn decodes_articles_and_drops_removed() {
        let body = r#"{
            "status": "ok",
            "totalResults": 2,
            "articles": [
                {"source": {"id": null, "name": "Wire"}, "author": null, "title": "Kept",
                 "description": null, "url": "https://e.com/1", "urlToImage": null,
                 "publishedAt": "2026-10-17T00:00:00Z", "content": null},
                {"source": {"id": null, "name": "[Removed]"}, "author": null, "title": "[Removed]",
                 "description": null, "url": "https://removed.com", "urlToImage": null,
                 "publishedAt": "1970-01-01T00:00:00Z", "content": null}
            ]
        }"#;

        let articles = decode_articles(StatusCode::OK, body).unwrap();

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Kept");
    }

    #[test]
    fn api_error_message_is_surfaced() {
        let body = r#"{"status":"error","code":"apiKeyInvalid","message":"Your API key is invalid."}"#;

        match decode_articles(StatusCode::UNAUTHORIZED, body) {
            Err(AppError::NewsApi(message)) => assert_eq!(message, "Your API key is invalid."),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn non_json_failure_reports_status() {
        assert!(matches!(
            decode_articles(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>"),
            Err(AppError::NewsApi(m)) if m.contains("502")
        ));
    }
}
