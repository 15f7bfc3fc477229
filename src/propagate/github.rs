// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! GitHub REST API access for secret inventories and dispatch events.

use super::inventory::{SecretInventory, SecretsPage};
use super::protocol::DispatchEvent;
use super::RepoRef;
use crate::constants::github::{API_VERSION, EXPORT_EVENT_TYPE, PAGE_SIZE};
use crate::error::{Result, ShipyardError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hosting service boundary used by the propagation protocol.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Names of every secret stored in `repo`
    async fn list_secrets(&self, repo: &RepoRef) -> Result<SecretInventory>;

    /// Send one export event; `Ok` only if the service accepted it
    async fn dispatch(&self, event: &DispatchEvent) -> Result<()>;

    /// Where a human can read the workflow runs of `repo`
    fn actions_url(&self, repo: &RepoRef) -> String;
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: Url, token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ShipyardError::MissingCredential(
                "GitHub token is empty; set SECRETS_SYNC_TOKEN, GH_TOKEN or GITHUB_TOKEN"
                    .to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .user_agent(concat!("shipyard/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    /// `{api_url}/repos/{owner}/{name}/{tail...}`
    pub(crate) fn repo_url(&self, repo: &RepoRef, tail: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ShipyardError::ConfigError(format!("'{}' cannot be a base URL", self.api_url))
            })?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.name.as_str()])
            .extend(tail);
        Ok(url)
    }

    /// Map authentication failures to a credential error with a remedy
    fn check_auth(response: &Response, what: &str) -> Result<()> {
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ShipyardError::MissingCredential(format!(
                    "GitHub rejected the token for {} (HTTP {}); check that it can read \
                     Actions secrets and dispatch events",
                    what,
                    response.status().as_u16()
                )))
            }
            _ => Ok(()),
        }
    }

    async fn secrets_page(&self, repo: &RepoRef, page: usize) -> Result<SecretsPage> {
        let mut url = self.repo_url(repo, &["actions", "secrets"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check_auth(&response, &format!("listing secrets of {}", repo))?;
        let body = response.error_for_status()?.text().await?;
        SecretsPage::parse(&body)
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_secrets(&self, repo: &RepoRef) -> Result<SecretInventory> {
        let mut pages = Vec::new();
        let mut seen = 0;
        for page in 1.. {
            let current = self.secrets_page(repo, page).await?;
            let fetched = current.secrets.len();
            let total = current.total_count;
            seen += fetched;
            pages.push(current);
            if fetched == 0 || seen >= total {
                break;
            }
        }

        let inventory = SecretInventory::from_pages(&pages)?;
        debug!("{} has {} secret(s) over {} page(s)", repo, inventory.len(), pages.len());
        Ok(inventory)
    }

    #[instrument(skip(self, event), fields(source = %event.source, secret = %event.secret_name))]
    async fn dispatch(&self, event: &DispatchEvent) -> Result<()> {
        let url = self.repo_url(&event.source, &["dispatches"])?;
        let body = serde_json::json!({
            "event_type": EXPORT_EVENT_TYPE,
            "client_payload": event.payload(),
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::check_auth(&response, &format!("dispatching to {}", event.source))?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let detail = response.text().await.unwrap_or_default();
            return Err(ShipyardError::TransientUnavailable(format!(
                "dispatch of {} to {} rejected with HTTP {}: {}",
                event.secret_name,
                event.source,
                status.as_u16(),
                detail.trim()
            )));
        }
        Ok(())
    }

    fn actions_url(&self, repo: &RepoRef) -> String {
        let host = self.api_url.host_str().unwrap_or("github.com");
        let web_host = host.strip_prefix("api.").unwrap_or(host);
        format!("{}://{}/{}/actions", self.api_url.scheme(), web_host, repo)
    }
}
