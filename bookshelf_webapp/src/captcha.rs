use anyhow::Context;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::Deserialize;

use crate::settings::CaptchaSettings;

pub const CAPTCHA_FORM_FIELD: &str = "g-recaptcha-response";
const SITEVERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(thiserror::Error, Debug)]
pub enum CaptchaError {
    #[error("Captcha verification request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("Invalid captcha verification response: {0}")]
    Response(#[from] reqwest::Error),
}

/// Checks the token produced by the captcha widget of a submitted form
#[async_trait::async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Public key rendered into the pages
    fn site_key(&self) -> &str;

    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, CaptchaError>;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct RecaptchaVerifier {
    site_key: String,
    secret_key: String,
    client: ClientWithMiddleware,
}

impl RecaptchaVerifier {
    pub fn new(settings: CaptchaSettings) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();
        Ok(Self {
            site_key: settings.site_key,
            secret_key: settings.secret_key,
            client,
        })
    }
}

#[async_trait::async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    fn site_key(&self) -> &str {
        &self.site_key
    }

    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, CaptchaError> {
        if token.trim().is_empty() {
            return Ok(false);
        }
        let mut params = vec![("secret", self.secret_key.as_str()), ("response", token)];
        if let Some(remote_ip) = remote_ip {
            params.push(("remoteip", remote_ip));
        }
        let response: SiteVerifyResponse = self
            .client
            .post(SITEVERIFY_URL)
            .form(&params)
            .send()
            .await?
            .json()
            .await?;
        if !response.success {
            tracing::warn!("Captcha rejected: {:?}", response.error_codes);
        }
        Ok(response.success)
    }
}

#[cfg(test)]
mod captcha_tests {
    use super::*;

    fn verifier() -> RecaptchaVerifier {
        RecaptchaVerifier::new(CaptchaSettings {
            site_key: "site".to_string(),
            secret_key: "secret".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn empty_token_is_rejected_without_a_request() {
        let verifier = verifier();
        assert_eq!(verifier.site_key(), "site");
        assert!(!verifier.verify("  ", None).await.unwrap());
    }

    #[test]
    fn siteverify_response_is_parsed() {
        let response: SiteVerifyResponse = serde_json::from_str(
            r#"{"success": false, "error-codes": ["invalid-input-response"]}"#,
        )
        .unwrap();
        assert!(!response.success);
        assert_eq!(response.error_codes, vec!["invalid-input-response"]);
    }
}
