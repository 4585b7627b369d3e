use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "http://localhost:4000/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const GENERATE_ENDPOINT: &str = "generate-shader";
const FIX_ENDPOINT: &str = "fix-shader";

/// A request to the generation service that did not produce shader text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("server responded with {status}")]
    Status { status: u16 },
    #[error("request failed: {reason}")]
    Transport { reason: String },
    #[error("unexpected response body: {reason}")]
    Decode { reason: String },
}

/// Anything that can turn prompts and broken sources into shader text.
pub trait ShaderService: Send + Sync {
    fn generate(&self, description: &str) -> Result<String, ServiceError>;
    fn fix(&self, code: &str, diagnostic: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_base: Url,
    pub timeout: Duration,
}

impl GeneratorConfig {
    pub fn new(api_base: &str) -> Result<Self> {
        let trimmed = api_base.trim();
        if trimmed.is_empty() {
            bail!("generation API base url must not be empty");
        }
        let api_base =
            Url::parse(trimmed).with_context(|| format!("invalid generation API url '{trimmed}'"))?;
        if api_base.cannot_be_a_base() {
            bail!("generation API url '{trimmed}' cannot be used as a base");
        }
        Ok(Self {
            api_base,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("invalid generation API base url"))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct FixBody<'a> {
    code: &'a str,
    error: &'a str,
}

#[derive(Debug, Deserialize)]
struct ShaderResponse {
    shader: String,
}

/// Blocking HTTP client for the `generate-shader` and `fix-shader` endpoints.
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    http: Client,
    generate_url: Url,
    fix_url: Url,
}

impl GeneratorClient {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            generate_url: config.endpoint(GENERATE_ENDPOINT)?,
            fix_url: config.endpoint(FIX_ENDPOINT)?,
        })
    }

    fn post<B: Serialize>(&self, url: &Url, body: &B) -> Result<String, ServiceError> {
        debug!(%url, "posting to generation service");
        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .map_err(|err| ServiceError::Transport {
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
            });
        }
        let text = response.text().map_err(|err| ServiceError::Transport {
            reason: err.to_string(),
        })?;
        decode_shader(&text)
    }
}

impl ShaderService for GeneratorClient {
    fn generate(&self, description: &str) -> Result<String, ServiceError> {
        self.post(&self.generate_url, &GenerateBody { description })
    }

    fn fix(&self, code: &str, diagnostic: &str) -> Result<String, ServiceError> {
        self.post(
            &self.fix_url,
            &FixBody {
                code,
                error: diagnostic,
            },
        )
    }
}

fn decode_shader(body: &str) -> Result<String, ServiceError> {
    serde_json::from_str::<ShaderResponse>(body)
        .map(|response| response.shader)
        .map_err(|err| {
            let snippet = body.chars().take(200).collect::<String>();
            ServiceError::Decode {
                reason: format!("{err}; first 200 bytes: {snippet}"),
            }
        })
}
