//! [`RemoteApi`] over the GitHub REST API

use super::client::{ApiResult, Client, Fetched, RateLimitInfo, unwrap_or_return};
use super::models::{CandidateHit, Comment, Page, RateLimitResponse, Review, SearchResponse, WorkItemDetail, WorkItemSummary};
use super::RemoteApi;
use crate::Result;
use chrono::DateTime;
use core::time::Duration;
use serde::de::DeserializeOwned;

const PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: Client,
}

impl GitHubApi {
    pub fn new(token: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::new(token, base_url, timeout)?,
        })
    }

    /// Repeat calls that fail with a network error or a 5xx status, see [`Client::with_transient_retries`].
    #[must_use]
    pub fn with_transient_retries(self, retries: u32, base_delay: Duration) -> Self {
        Self {
            client: self.client.with_transient_retries(retries, base_delay),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<Fetched<T>> {
        match self.client.url(path, query) {
            Ok(url) => self.client.get_json(url).await,
            Err(e) => ApiResult::Failed(e, None),
        }
    }

    async fn get_page<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)], page: u32) -> ApiResult<Page<T>> {
        let page = page.to_string();
        let mut query = query.to_vec();
        query.extend([("per_page", PAGE_SIZE), ("page", page.as_str())]);

        self.get::<Vec<T>>(path, &query).await.map(|fetched| Page {
            items: fetched.body,
            has_next: fetched.has_next,
        })
    }
}

impl RemoteApi for GitHubApi {
    async fn search_candidates(&self, query: &str, page: u32) -> ApiResult<Page<CandidateHit>> {
        let page_str = page.to_string();
        let params = [
            ("q", query),
            ("sort", "stars"),
            ("order", "desc"),
            ("per_page", PAGE_SIZE),
            ("page", page_str.as_str()),
        ];

        self.get::<SearchResponse>("search/repositories", &params).await.map(|fetched| Page {
            items: fetched.body.items,
            has_next: fetched.has_next,
        })
    }

    async fn count_work_items(&self, candidate_id: &str) -> ApiResult<u64> {
        // With one item per page, the `last` link's page number is the total count.
        let path = format!("repos/{candidate_id}/pulls");
        let (fetched, rate_limit) =
            unwrap_or_return!(self.get::<Vec<serde_json::Value>>(&path, &[("state", "all"), ("per_page", "1")]).await);

        let count = fetched.last_page.map_or(fetched.body.len() as u64, u64::from);
        ApiResult::Success(count, rate_limit)
    }

    async fn list_work_items(&self, candidate_id: &str, page: u32) -> ApiResult<Page<WorkItemSummary>> {
        let path = format!("repos/{candidate_id}/pulls");
        self.get_page(&path, &[("state", "all"), ("sort", "created"), ("direction", "desc")], page)
            .await
    }

    async fn get_work_item(&self, candidate_id: &str, number: u64) -> ApiResult<WorkItemDetail> {
        let path = format!("repos/{candidate_id}/pulls/{number}");
        self.get::<WorkItemDetail>(&path, &[]).await.map(|fetched| fetched.body)
    }

    async fn list_reviews(&self, candidate_id: &str, number: u64, page: u32) -> ApiResult<Page<Review>> {
        let path = format!("repos/{candidate_id}/pulls/{number}/reviews");
        self.get_page(&path, &[], page).await
    }

    async fn list_comments(&self, candidate_id: &str, number: u64, page: u32) -> ApiResult<Page<Comment>> {
        let path = format!("repos/{candidate_id}/pulls/{number}/comments");
        self.get_page(&path, &[], page).await
    }

    async fn rate_status(&self) -> ApiResult<RateLimitInfo> {
        let (fetched, rate_limit) = unwrap_or_return!(self.get::<RateLimitResponse>("rate_limit", &[]).await);
        let core = fetched.body.resources.core;

        match DateTime::from_timestamp(core.reset, 0) {
            Some(reset_at) => ApiResult::Success(
                RateLimitInfo {
                    remaining: core.remaining,
                    reset_at,
                },
                rate_limit,
            ),
            None => ApiResult::Failed(ohno::app_err!("invalid rate limit reset timestamp {}", core.reset), rate_limit),
        }
    }
}
