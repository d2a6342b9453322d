use anyhow::{Context, anyhow};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::Session;
use crate::task::{NewTask, Task, TaskPatch};

const HEADER_REQUEST_ID: &str = "x-request-id";

/// Thin REST binding for the remote task store.
///
/// Every call is a single request: nothing is retried and no timeout is set,
/// so a hung server leaves the caller pending.
#[derive(Debug, Clone)]
pub struct TaskStoreClient {
    http: Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

impl TaskStoreClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url: Url = base_url
            .trim()
            .parse()
            .with_context(|| format!("invalid task store URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("task store URL cannot carry paths: {base_url}"));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .build()
            .context("failed building HTTP client for the task store")?;

        debug!(base_url = %base_url, "task store client ready");
        Ok(Self { http, base_url })
    }

    #[instrument(skip(self, bearer))]
    pub async fn list_tasks(&self, bearer: Option<&str>) -> Result<Vec<Task>, StoreError> {
        let url = self.url(&["tasks"]);
        let body = self.send(self.request(Method::GET, url, bearer), "GET /tasks").await?;
        decode(&body, "GET /tasks")
    }

    #[instrument(skip(self, bearer, task), fields(text_len = task.text.len(), category = %task.category))]
    pub async fn create_task(
        &self,
        bearer: Option<&str>,
        task: &NewTask,
    ) -> Result<Task, StoreError> {
        let url = self.url(&["tasks"]);
        let request = with_json(self.request(Method::POST, url, bearer), task, "POST /tasks")?;
        let body = self.send(request, "POST /tasks").await?;
        decode(&body, "POST /tasks")
    }

    #[instrument(skip(self, bearer, patch))]
    pub async fn patch_task(
        &self,
        bearer: Option<&str>,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, StoreError> {
        let url = self.url(&["tasks", id]);
        let endpoint = format!("PATCH /tasks/{id}");
        let request = with_json(self.request(Method::PATCH, url, bearer), patch, &endpoint)?;
        let body = self.send(request, &endpoint).await?;
        decode(&body, &endpoint)
    }

    #[instrument(skip(self, bearer))]
    pub async fn delete_task(&self, bearer: Option<&str>, id: &str) -> Result<(), StoreError> {
        let url = self.url(&["tasks", id]);
        let endpoint = format!("DELETE /tasks/{id}");
        self.send(self.request(Method::DELETE, url, bearer), &endpoint)
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let url = self.url(&["auth", "login"]);
        let payload = LoginRequest { email, password };
        let request = with_json(self.request(Method::POST, url, None), &payload, "POST /auth/login")?;
        let body = self.send(request, "POST /auth/login").await?;
        decode(&body, "POST /auth/login")
    }

    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, StoreError> {
        let url = self.url(&["auth", "register"]);
        let payload = RegisterRequest {
            name,
            email,
            password,
        };
        let request = with_json(
            self.request(Method::POST, url, None),
            &payload,
            "POST /auth/register",
        )?;
        let body = self.send(request, "POST /auth/register").await?;
        decode(&body, "POST /auth/register")
    }

    #[instrument(skip(self, bearer))]
    pub async fn logout(&self, bearer: &str) -> Result<(), StoreError> {
        let url = self.url(&["auth", "logout"]);
        self.send(self.request(Method::POST, url, Some(bearer)), "POST /auth/logout")
            .await
            .map(|_| ())
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&str>) -> RequestBuilder {
        let request = self
            .http
            .request(method, url)
            .header(HEADER_REQUEST_ID, Uuid::new_v4().to_string());
        match bearer {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<String, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;
        debug!(endpoint, status = %status, bytes = body.len(), "task store responded");

        if status == StatusCode::UNAUTHORIZED {
            return Err(StoreError::Unauthorized {
                endpoint: endpoint.to_string(),
                message: error_message(&body),
            });
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                endpoint: endpoint.to_string(),
                status,
                message: error_message(&body),
            });
        }

        Ok(body)
    }
}

fn with_json<T: Serialize + ?Sized>(
    request: RequestBuilder,
    payload: &T,
    endpoint: &str,
) -> Result<RequestBuilder, StoreError> {
    let bytes = serde_json::to_vec(payload).map_err(|source| StoreError::Encode {
        endpoint: endpoint.to_string(),
        source,
    })?;
    Ok(request.header(CONTENT_TYPE, "application/json").body(bytes))
}

fn decode<T: DeserializeOwned>(body: &str, endpoint: &str) -> Result<T, StoreError> {
    serde_json::from_str(body).map_err(|source| StoreError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Pulls the human-readable part out of an error payload.
fn error_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return body.trim().to_string();
    };

    if let Some(message) = parsed.message.filter(|m| !m.trim().is_empty()) {
        return message;
    }
    match parsed.detail {
        Some(Value::String(detail)) => detail,
        Some(other) => other.to_string(),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_message_then_detail() {
        assert_eq!(error_message(r#"{"message":"Wrong password"}"#), "Wrong password");
        assert_eq!(error_message(r#"{"detail":"Task not found"}"#), "Task not found");
        assert_eq!(error_message("upstream exploded"), "upstream exploded");
        assert_eq!(error_message(""), "");
    }

    #[test]
    fn urls_keep_base_path_and_escape_ids() {
        let client = TaskStoreClient::new("http://localhost:8000/api/").expect("client");
        assert_eq!(
            client.url(&["tasks", "a b"]).as_str(),
            "http://localhost:8000/api/tasks/a%20b"
        );

        let bare = TaskStoreClient::new("http://localhost:8000").expect("client");
        assert_eq!(bare.url(&["tasks"]).as_str(), "http://localhost:8000/tasks");
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(TaskStoreClient::new("mailto:someone@example.com").is_err());
        assert!(TaskStoreClient::new("not a url").is_err());
    }
}
