//! SWR management API client

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SwrConfig;
use crate::error::{Result, SwrError};
use crate::signer::{encode_path, SignableRequest, Signer, DATE_FORMAT, HEADER_DATE};

pub const LIST_REPOS_PATH: &str = "/v2/manage/repos";
const CONTENT_TYPE: &str = "application/json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-side repository filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoFilter {
    pub namespace: Option<String>,
    pub limit: Option<u32>,
    pub is_public: Option<bool>,
}

impl RepoFilter {
    pub fn from_config(config: &SwrConfig) -> Self {
        Self {
            namespace: Some(config.namespace.clone()),
            limit: config.limit,
            // Only `is_public: true` narrows the listing; `false` lists everything
            is_public: config.is_public.filter(|public| *public),
        }
    }

    /// `key::value` terms joined by `|`, only for the parts that are set
    pub fn to_query(&self) -> String {
        let mut terms = Vec::new();
        if let Some(namespace) = &self.namespace {
            terms.push(format!("namespace::{}", namespace));
        }
        if let Some(limit) = self.limit {
            terms.push(format!("limit::{}", limit));
        }
        if let Some(is_public) = self.is_public {
            terms.push(format!("is_public::{}", is_public));
        }
        terms.join("|")
    }
}

/// Path of a single repository; `/` inside the name is sent as `$`
pub fn repo_path(namespace: &str, repo: &str) -> String {
    format!("/v2/manage/namespaces/{}/repos/{}", namespace, repo.replace('/', "$"))
}

#[derive(Debug, Deserialize)]
struct RepoSummary {
    name: String,
}

#[derive(Debug, Serialize)]
struct UpdateRepoBody {
    is_public: bool,
}

/// Registry operations the updater needs
pub trait RegistryApi {
    fn list_repos(&self, filter: &RepoFilter) -> Result<Vec<String>>;

    fn update_repo(&self, namespace: &str, repo: &str, is_public: bool) -> Result<()>;
}

impl<T: RegistryApi + ?Sized> RegistryApi for &T {
    fn list_repos(&self, filter: &RepoFilter) -> Result<Vec<String>> {
        (**self).list_repos(filter)
    }

    fn update_repo(&self, namespace: &str, repo: &str, is_public: bool) -> Result<()> {
        (**self).update_repo(namespace, repo, is_public)
    }
}

/// Signed HTTP client for the SWR management API
pub struct SwrClient {
    http: Client,
    base: Url,
    host: String,
    signer: Signer,
    project_id: Option<String>,
}

impl SwrClient {
    pub fn new(config: &SwrConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        let base = Url::parse(&endpoint)
            .map_err(|e| SwrError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let host = match (base.host_str(), base.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(SwrError::Config(format!("endpoint '{}' has no host", endpoint))),
        };

        Ok(Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base,
            host,
            signer: Signer::new(config.ak.clone(), config.sk.clone()),
            project_id: config.project_id.clone(),
        })
    }

    fn send(&self, request: SignableRequest) -> Result<Response> {
        let sdk_date = chrono::Utc::now().format(DATE_FORMAT).to_string();
        let mut request = request
            .header("content-type", CONTENT_TYPE)
            .header("host", &self.host)
            .header(HEADER_DATE, &sdk_date);
        if let Some(project_id) = &self.project_id {
            request = request.header("x-project-id", project_id);
        }
        let authorization = self.signer.authorization(&request, &sdk_date)?;

        let mut url = self.base.clone();
        url.set_path(&encode_path(&request.path));
        let query = request.query_string();
        url.set_query((!query.is_empty()).then_some(query.as_str()));

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| SwrError::Config(format!("invalid method '{}': {}", request.method, e)))?;
        debug!(method = %method, url = %url, "Sending registry request");

        let mut builder = self
            .http
            .request(method, url)
            .header("Content-Type", CONTENT_TYPE)
            .header(HEADER_DATE, &sdk_date)
            .header("Authorization", authorization);
        if let Some(project_id) = &self.project_id {
            builder = builder.header("X-Project-Id", project_id);
        }
        let response = builder.body(request.body).send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SwrError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl RegistryApi for SwrClient {
    fn list_repos(&self, filter: &RepoFilter) -> Result<Vec<String>> {
        let mut request = SignableRequest::new("GET", LIST_REPOS_PATH);
        let query = filter.to_query();
        if !query.is_empty() {
            request = request.query("filter", &query);
        }
        let body = self.send(request)?.text()?;
        parse_repo_list(&body)
    }

    fn update_repo(&self, namespace: &str, repo: &str, is_public: bool) -> Result<()> {
        let body = serde_json::to_vec(&UpdateRepoBody { is_public })?;
        self.send(SignableRequest::new("PATCH", &repo_path(namespace, repo)).body(body))?;
        Ok(())
    }
}

/// Repository names from a list response; a null or empty body is no repositories
pub fn parse_repo_list(body: &str) -> Result<Vec<String>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let repos: Option<Vec<RepoSummary>> = serde_json::from_str(body)?;
    Ok(repos.unwrap_or_default().into_iter().map(|r| r.name).collect())
}
