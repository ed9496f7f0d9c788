use std::time::Duration;

use prag_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

const HEALTH_TIMEOUT: Duration = Duration::from_millis(2000);
const PULL_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client for Ollama. Only loopback hosts (`127.0.0.1`, `localhost`) are accepted.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !is_loopback_url(&base_url) {
            return Err(AppError::new(
                codes::AI_REMOTE_NOT_ALLOWED,
                "Ollama base URL must be a loopback address (127.0.0.1 or localhost)",
            )
            .with_details(format!("base_url={base_url}")));
        }
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(120),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Bound on a single embedding or generation request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(HEALTH_TIMEOUT).call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new(codes::AI_OLLAMA_UNHEALTHY, "Ollama health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(ureq::Error::Status(code, _)) => Err(
                AppError::new(codes::AI_OLLAMA_UNHEALTHY, "Ollama health check failed")
                    .with_details(format!("status={code}")),
            ),
            Err(e) => Err(AppError::new(
                codes::AI_OLLAMA_UNREACHABLE,
                "Failed to reach Ollama; is `ollama serve` running?",
            )
            .with_details(format!("base_url={}; err={}", self.base_url, e))
            .with_retryable(true)),
        }
    }

    /// Names of the locally installed models, as reported by `/api/tags`.
    pub fn list_models(&self) -> Result<Vec<String>, AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(HEALTH_TIMEOUT).call().map_err(|e| {
            AppError::new(codes::AI_OLLAMA_UNREACHABLE, "Failed to list Ollama models")
                .with_details(format!("base_url={}; err={}", self.base_url, e))
                .with_retryable(true)
        })?;
        let tags: TagsResponse = resp.into_json().map_err(|e| {
            AppError::new(codes::AI_OLLAMA_UNHEALTHY, "Failed to decode Ollama model list")
                .with_details(e.to_string())
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    pub fn has_model(&self, model: &str) -> Result<bool, AppError> {
        let installed = self.list_models()?;
        Ok(model_installed(&installed, model))
    }

    /// Blocking download of `model`. Can take minutes for multi-gigabyte models.
    pub fn pull_model(&self, model: &str) -> Result<(), AppError> {
        let url = format!("{}/api/pull", self.base_url);
        let req = PullRequest {
            model,
            stream: false,
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(codes::AI_MODEL_PULL_FAILED, "Failed to encode pull request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url).timeout(PULL_TIMEOUT).send_json(body).map_err(|e| {
            let details = match e {
                ureq::Error::Status(code, r) => format!("status={code}; body={}", read_error_body(r)),
                other => other.to_string(),
            };
            AppError::new(codes::AI_MODEL_PULL_FAILED, "Failed to pull model")
                .with_details(format!("model={model}; {details}"))
                .with_retryable(true)
        })?;
        let v: PullResponse = resp.into_json().map_err(|e| {
            AppError::new(codes::AI_MODEL_PULL_FAILED, "Failed to decode pull response")
                .with_details(e.to_string())
        })?;
        if v.status != "success" {
            return Err(AppError::new(codes::AI_MODEL_PULL_FAILED, "Model pull did not succeed")
                .with_details(format!("model={model}; status={}", v.status)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Debug, Clone, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
}

fn is_loopback_url(base_url: &str) -> bool {
    let Some(authority) = base_url.strip_prefix("http://") else {
        return false;
    };
    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (authority, None),
    };
    if host != "127.0.0.1" && host != "localhost" {
        return false;
    }
    match port {
        None => true,
        Some(p) => matches!(p.parse::<u16>(), Ok(n) if n > 0),
    }
}

/// An untagged name matches its `:latest` install and vice versa.
pub fn model_installed(installed: &[String], wanted: &str) -> bool {
    let normalize = |name: &str| -> String {
        if name.contains(':') {
            name.to_string()
        } else {
            format!("{name}:latest")
        }
    };
    let wanted = normalize(wanted);
    installed.iter().any(|m| normalize(m) == wanted)
}

/// Error codes used when classifying a failed provider call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProviderCodes {
    pub unavailable: &'static str,
    pub failed: &'static str,
}

pub(crate) const EMBEDDING_CODES: ProviderCodes = ProviderCodes {
    unavailable: codes::EMBEDDING_UNAVAILABLE,
    failed: codes::EMBEDDING_FAILED,
};

pub(crate) const GENERATION_CODES: ProviderCodes = ProviderCodes {
    unavailable: codes::GENERATION_UNAVAILABLE,
    failed: codes::GENERATION_FAILED,
};

/// 404 means the model is not installed; transport failures are either a timeout
/// or an unreachable server.
pub(crate) fn call_error(e: ureq::Error, provider: ProviderCodes, model: &str, what: &str) -> AppError {
    match e {
        ureq::Error::Status(404, r) => AppError::new(
            provider.unavailable,
            format!("{what}: model `{model}` is not available; run `personalrag setup`"),
        )
        .with_details(format!("status=404; body={}", read_error_body(r))),
        ureq::Error::Status(code, r) => AppError::new(provider.failed, format!("{what} request failed"))
            .with_details(format!("model={model}; status={code}; body={}", read_error_body(r))),
        ureq::Error::Transport(t) if is_timeout(&t) => {
            AppError::new(codes::PROVIDER_TIMEOUT, format!("{what} request timed out"))
                .with_details(format!("model={model}; err={t}"))
                .with_retryable(true)
        }
        ureq::Error::Transport(t) => AppError::new(
            provider.unavailable,
            format!("{what}: failed to reach Ollama; is `ollama serve` running?"),
        )
        .with_details(format!("model={model}; err={t}"))
        .with_retryable(true),
    }
}

fn is_timeout(t: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(t);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = err.source();
    }
    t.to_string().to_ascii_lowercase().contains("timed out")
}

fn read_error_body(r: ureq::Response) -> String {
    let body = r.into_string().unwrap_or_default();
    body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
}
