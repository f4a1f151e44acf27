//! Generic HTTP webhook notifier.
//!
//! Delivers notifications as JSON payloads to a configured webhook URL
//! with optional custom headers.

use std::collections::HashMap;

use crate::traits::{Notification, Notifier, NotifyError};

/// Delivers notifications as JSON over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and header
/// values are resolved at construction time so secrets stay out of config
/// files.
#[derive(Debug)]
pub struct WebhookNotifier {
    /// Target URL (env vars already resolved).
    url: String,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier. Missing env vars referenced from the
    /// URL or headers produce a [`NotifyError::Config`] error.
    pub fn new(url: String, headers: HashMap<String, String>) -> Result<Self, NotifyError> {
        let resolved_url = resolve_env_vars(&url)?;

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }

        Ok(Self {
            url: resolved_url,
            headers: resolved_headers,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    /// Deliver a notification as a JSON payload to the configured URL.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_string(notification)
            .map_err(|e| NotifyError::Config(format!("failed to serialize notification: {e}")))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Resolve `${VAR_NAME}` references against the process environment.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            NotifyError::Config(format!("unterminated env reference in '{input}'"))
        })?;
        let name = &after[..end];
        let value = std::env::var(name).map_err(|_| {
            NotifyError::Config(format!("environment variable '{name}' is not set"))
        })?;
        result.push_str(&value);
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_passes_through() {
        assert_eq!(
            resolve_env_vars("https://hooks.example.com/das").unwrap(),
            "https://hooks.example.com/das"
        );
    }

    #[test]
    fn env_reference_is_resolved() {
        std::env::set_var("DASKEEPER_TEST_TOKEN", "s3cret");
        let resolved = resolve_env_vars("https://hooks.example.com/${DASKEEPER_TEST_TOKEN}").unwrap();
        assert_eq!(resolved, "https://hooks.example.com/s3cret");
    }

    #[test]
    fn missing_env_var_is_a_config_error() {
        let err = resolve_env_vars("${DASKEEPER_TEST_MISSING_VAR}").unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }

    #[test]
    fn unterminated_reference_is_a_config_error() {
        let err = resolve_env_vars("https://x/${OOPS").unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }
}
