//! GitHub pull request client and the text renderings the tools return.

use crate::audit::reason_codes;
use crate::credential::DelegatedCredential;
use crate::headers::build_downstream_headers;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use url::Url;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const BODY_PREVIEW_CHARS: usize = 1000;
const PATCH_PREVIEW_CHARS: usize = 500;
const MAX_FILES: usize = 20;
const MAX_COMMENTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("invalid repository '{0}' (expected owner/name)")]
    InvalidRepo(String),

    #[error("Error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("GitHub request failed: {0}")]
    Network(String),

    #[error("unexpected GitHub response: {0}")]
    Decode(String),
}

impl GithubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidRepo(_) => reason_codes::T_INVALID_ARGS,
            e if e.is_not_found() => reason_codes::R_NOT_FOUND,
            e if e.is_forbidden() => reason_codes::R_FORBIDDEN,
            _ => reason_codes::R_UPSTREAM,
        }
    }
}

/// `owner/name`, validated before it is spliced into a URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    pub fn parse(s: &str) -> Result<Self, GithubError> {
        let invalid = || GithubError::InvalidRepo(s.to_string());
        let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
        let ok = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !ok(owner) || !ok(name) {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: Option<String>,
    pub user: Option<User>,
    pub state: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub body: Option<String>,
    pub html_url: Option<String>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub commits: u64,
    pub mergeable_state: Option<String>,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewComment {
    pub user: Option<User>,
    pub path: Option<String>,
    pub line: Option<u64>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullCommit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub author: Option<CommitAuthor>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub date: Option<String>,
}

/// Minimal view returned by the unauthenticated tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullSummary {
    pub title: Option<String>,
    pub state: Option<String>,
    pub user: Option<String>,
}

impl From<&PullRequest> for PullSummary {
    fn from(pr: &PullRequest) -> Self {
        Self {
            title: pr.title.clone(),
            state: pr.state.clone(),
            user: pr.user.as_ref().map(|u| u.login.clone()),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct GithubClient {
    http: reqwest::Client,
    base: String,
}

impl GithubClient {
    pub fn new(base: &Url) -> Result<Self, GithubError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GithubError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub async fn pull(
        &self,
        repo: &RepoSlug,
        number: u64,
        credential: Option<&DelegatedCredential>,
    ) -> Result<PullRequest, GithubError> {
        self.get(repo, number, "", credential).await
    }

    pub async fn pull_files(
        &self,
        repo: &RepoSlug,
        number: u64,
        credential: Option<&DelegatedCredential>,
    ) -> Result<Vec<PullFile>, GithubError> {
        self.get(repo, number, "/files", credential).await
    }

    pub async fn pull_comments(
        &self,
        repo: &RepoSlug,
        number: u64,
        credential: Option<&DelegatedCredential>,
    ) -> Result<Vec<ReviewComment>, GithubError> {
        self.get(repo, number, "/comments", credential).await
    }

    pub async fn pull_commits(
        &self,
        repo: &RepoSlug,
        number: u64,
        credential: Option<&DelegatedCredential>,
    ) -> Result<Vec<PullCommit>, GithubError> {
        self.get(repo, number, "/commits", credential).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        repo: &RepoSlug,
        number: u64,
        suffix: &str,
        credential: Option<&DelegatedCredential>,
    ) -> Result<T, GithubError> {
        let url = format!("{}/repos/{repo}/pulls/{number}{suffix}", self.base);

        let mut req = self.http.get(&url);
        for (name, value) in build_downstream_headers() {
            req = req.header(name, value);
        }
        if let Some(cred) = credential {
            req = req.header("authorization", cred.bearer_header());
        }

        let response = req
            .send()
            .await
            .map_err(|e| GithubError::Network(e.without_url().to_string()))?;

        let status = response.status();
        tracing::debug!(
            event = "github_request",
            repo = %repo,
            number,
            path = suffix,
            status = status.as_u16(),
            authenticated = credential.is_some(),
        );

        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or_else(|_| truncate(&text, 200).to_string());
            return Err(GithubError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GithubError::Decode(e.without_url().to_string()))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn format_pull(pr: &PullRequest) -> String {
    let state = pr.state.as_deref().unwrap_or("unknown");
    let state_line = if pr.draft {
        format!("{state} (Draft)")
    } else {
        state.to_string()
    };
    let body = match pr.body.as_deref().filter(|b| !b.is_empty()) {
        Some(b) => truncate(b, BODY_PREVIEW_CHARS),
        None => "No description provided",
    };

    format!(
        "Pull Request #{number}: {title}\n\n\
         Author: {author}\n\
         State: {state_line}\n\
         Created: {created}\n\
         Updated: {updated}\n\n\
         Description:\n{body}\n\n\
         Changes:\n\
         - Files changed: {files}\n\
         - Additions: +{add}\n\
         - Deletions: -{del}\n\
         - Commits: {commits}\n\
         - Mergeable: {mergeable}\n\n\
         URL: {url}\n",
        number = pr.number,
        title = pr.title.as_deref().unwrap_or("No title"),
        author = pr.user.as_ref().map(|u| u.login.as_str()).unwrap_or("Unknown"),
        created = pr.created_at.as_deref().unwrap_or(""),
        updated = pr.updated_at.as_deref().unwrap_or(""),
        files = pr.changed_files,
        add = pr.additions,
        del = pr.deletions,
        commits = pr.commits,
        mergeable = pr.mergeable_state.as_deref().unwrap_or("unknown"),
        url = pr.html_url.as_deref().unwrap_or(""),
    )
}

pub fn format_files(files: &[PullFile]) -> String {
    let mut out = format!("Files changed in PR: {}\n\n", files.len());
    for f in files.iter().take(MAX_FILES) {
        let patch = f
            .patch
            .as_deref()
            .map(|p| truncate(p, PATCH_PREVIEW_CHARS))
            .unwrap_or("No patch available");
        let _ = write!(
            out,
            "File: {}\nStatus: {}\nChanges: +{} -{}\nPatch preview:\n{}\n\n---\n",
            f.filename, f.status, f.additions, f.deletions, patch
        );
    }
    out
}

pub fn format_comments(comments: &[ReviewComment]) -> String {
    if comments.is_empty() {
        return "No review comments on this PR.".to_string();
    }
    let mut out = format!("Review Comments ({} total):\n\n", comments.len());
    for c in comments.iter().take(MAX_COMMENTS) {
        let line = c
            .line
            .map(|l| l.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let _ = write!(
            out,
            "Comment by {}:\nFile: {}\nLine: {}\nComment: {}\n\n---\n",
            c.user.as_ref().map(|u| u.login.as_str()).unwrap_or("Unknown"),
            c.path.as_deref().unwrap_or("General"),
            line,
            c.body
        );
    }
    out
}

pub fn format_commits(commits: &[PullCommit]) -> String {
    let mut out = format!("Commits in PR: {}\n\n", commits.len());
    for c in commits {
        let (name, date) = c
            .commit
            .author
            .as_ref()
            .map(|a| (a.name.as_str(), a.date.as_deref().unwrap_or("")))
            .unwrap_or(("Unknown", ""));
        let _ = write!(
            out,
            "Commit: {}\nAuthor: {}\nDate: {}\nMessage: {}\n\n---\n",
            truncate(&c.sha, 7),
            name,
            date,
            c.commit.message
        );
    }
    out
}
