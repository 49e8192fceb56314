//! HTTP plumbing shared by the REST adapters

use std::time::Duration;

use chat_core::{ChatError, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Build a client with the adapter's request timeout
pub(crate) fn client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ChatError::Config(format!("HTTP client: {}", e)))
}

pub(crate) fn transport(err: reqwest::Error) -> ChatError {
    ChatError::Transport(err.to_string())
}

/// Read the body, mapping throttling and HTTP failures
pub(crate) async fn read_body(provider: &str, response: Response) -> Result<String> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.map_err(transport)?;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ChatError::RateLimited {
            message: format!("{}: {}", provider, truncate(&body)),
            retry_after,
        });
    }
    if !status.is_success() {
        return Err(ChatError::Transport(format!(
            "{} returned HTTP {}: {}",
            provider,
            status.as_u16(),
            truncate(&body)
        )));
    }
    Ok(body)
}

/// Decode a success body; anything unexpected is a malformed response
pub(crate) fn decode<T: DeserializeOwned>(provider: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| ChatError::MalformedResponse(format!("{} response: {}", provider, e)))
}

fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX).collect();
        format!("{}...", head)
    }
}
