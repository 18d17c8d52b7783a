use crate::errors::ApiError;
use crate::http::{ApiBody, deserialize_body, json_response};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use settings_store::{SettingsDocument, SettingsStore};
use shared::{gauge, histogram};
use std::time::Instant;

/// Endpoints served by the router
#[derive(Debug, PartialEq)]
enum Endpoint {
    /// `/api/projects/{project_id}/settings`
    ProjectSettings(String),
    /// `/api/settings`, bound to the configured legacy project
    LegacySettings,
}

impl Endpoint {
    fn from_path(path: &str) -> Option<Self> {
        if path == "/api/settings" {
            return Some(Endpoint::LegacySettings);
        }

        let project_id = path
            .strip_prefix("/api/projects/")?
            .strip_suffix("/settings")?;
        if project_id.is_empty() || project_id.contains('/') {
            return None;
        }

        Some(Endpoint::ProjectSettings(project_id.to_string()))
    }
}

/// Counts a request as in flight until dropped, including when the request
/// future is abandoned.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

#[derive(Serialize)]
struct PatchResponse<'a> {
    success: bool,
    data: &'a SettingsDocument,
}

/// Maps settings requests onto the settings store
#[derive(Clone)]
pub struct Router {
    store: SettingsStore,
    legacy_project: Option<String>,
}

impl Router {
    pub fn new(store: SettingsStore, legacy_project: Option<String>) -> Self {
        Self {
            store,
            legacy_project,
        }
    }

    /// Routes an incoming request. Failures are rendered as JSON error
    /// responses, so this never fails itself.
    pub async fn route<B>(&self, req: Request<B>) -> Response<ApiBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        tracing::debug!(%method, %path, "Request");

        let inflight = InflightGuard::new();

        let response = match self.handle(req).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status();
                if status.is_server_error() {
                    tracing::error!(%method, %path, %status, error = %e, "Request failed");
                } else {
                    tracing::debug!(%method, %path, %status, error = %e, "Request rejected");
                }
                e.into_response()
            }
        };

        drop(inflight);
        histogram!(
            REQUEST_DURATION,
            "method" => method.to_string(),
            "status" => response.status().as_str().to_string(),
        )
        .record(start.elapsed().as_secs_f64());

        response
    }

    async fn handle<B>(&self, req: Request<B>) -> Result<Response<ApiBody>, ApiError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let endpoint = Endpoint::from_path(req.uri().path()).ok_or(ApiError::NotFound)?;
        let project_id = match endpoint {
            Endpoint::ProjectSettings(project_id) => project_id,
            Endpoint::LegacySettings => self.legacy_project.clone().ok_or(ApiError::NotFound)?,
        };

        match *req.method() {
            Method::GET => {
                let document = self.store.get(&project_id).await?;
                json_response(StatusCode::OK, &document)
            }
            Method::POST | Method::PATCH => {
                let payload: Value = deserialize_body(req.into_body()).await?;
                let document = self.store.patch(&project_id, payload).await?;
                json_response(
                    StatusCode::OK,
                    &PatchResponse {
                        success: true,
                        data: &document,
                    },
                )
            }
            _ => Err(ApiError::MethodNotAllowed),
        }
    }
}
