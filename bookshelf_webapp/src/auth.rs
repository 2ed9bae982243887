use std::future::{ready, Ready};

use actix_web::cookie::{Cookie, CookieJar, Key, SameSite};
use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use anyhow::Context;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use serde::Deserialize;

use bookshelf_repository::api::{UserDetails, UserId};

use crate::settings::OAuthSettings;

pub const SESSION_COOKIE: &str = "user-session";
pub const OAUTH_STATE_COOKIE: &str = "oauth-state";
const OAUTH_STATE_LEN: usize = 32;
const DEFAULT_PROVIDER: &str = "auth0";

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Request to identity provider failed: {0}")]
    Request(#[from] reqwest_middleware::Error),
    #[error("Invalid response from identity provider: {0}")]
    Response(#[from] reqwest::Error),
    #[error("Identity provider returned {status}: {body}")]
    Provider {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Signs and verifies the cookies holding the session and the pending OAuth state
#[derive(Clone)]
pub struct SessionKey {
    key: Key,
}

impl SessionKey {
    /// `secret` has to be at least 32 bytes long
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: Key::derive_from(secret.as_bytes()),
        }
    }

    /// Value of the cookie `name` if it is present and its signature is valid
    pub fn verified_value(&self, request: &HttpRequest, name: &str) -> Option<String> {
        let cookie = request.cookie(name)?;
        let mut jar = CookieJar::new();
        jar.add_original(cookie);
        jar.signed(&self.key)
            .get(name)
            .map(|cookie| cookie.value().to_string())
    }

    pub fn signed_cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        let cookie = Cookie::build(name, value)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish();
        let mut jar = CookieJar::new();
        jar.signed_mut(&self.key).add(cookie.clone());
        jar.get(name).cloned().unwrap_or(cookie)
    }

    pub fn session_cookie(&self, user_id: &str) -> Cookie<'static> {
        self.signed_cookie(SESSION_COOKIE, user_id.to_string())
    }
}

pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build(name, "").path("/").finish();
    cookie.make_removal();
    cookie
}

/// Random token used as the OAuth `state` parameter
pub fn new_oauth_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(OAUTH_STATE_LEN)
        .map(char::from)
        .collect()
}

/// Identifier of the logged in user, `None` for anonymous requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser(pub Option<UserId>);

impl SessionUser {
    pub fn user_id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.0.is_some()
    }
}

impl FromRequest for SessionUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(request: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user_id = request
            .app_data::<Data<SessionKey>>()
            .and_then(|key| key.verified_value(request, SESSION_COOKIE));
        ready(Ok(SessionUser(user_id)))
    }
}

impl paperclip::v2::schema::Apiv2Schema for SessionUser {}
impl paperclip::actix::OperationModifier for SessionUser {}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Profile returned by the `/userinfo` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProfile {
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nickname: String,
}

impl OAuthProfile {
    /// Connection the user logged in with, Auth0 prefixes the subject with it (`google-oauth2|123`)
    pub fn provider(&self) -> &str {
        match self.sub.split_once('|') {
            Some((provider, _)) if !provider.is_empty() => provider,
            _ => DEFAULT_PROVIDER,
        }
    }
}

impl From<OAuthProfile> for UserDetails {
    fn from(profile: OAuthProfile) -> Self {
        let oauth_identifier = profile.provider().to_string();
        let name = if profile.name.is_empty() {
            profile.nickname
        } else {
            profile.name
        };
        UserDetails {
            user_id: profile.sub,
            email: profile.email,
            name,
            oauth_identifier,
        }
    }
}

/// Authorization code flow against an Auth0 style identity provider
pub struct OAuthClient {
    base_url: String,
    settings: OAuthSettings,
    client: ClientWithMiddleware,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();
        let base_url = if settings.domain.starts_with("http://")
            || settings.domain.starts_with("https://")
        {
            settings.domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", settings.domain.trim_end_matches('/'))
        };
        Ok(Self {
            base_url,
            settings,
            client,
        })
    }

    pub fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/authorize", self.base_url),
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.callback_url.as_str()),
                ("scope", "openid profile email"),
                ("state", state),
            ],
        )
        .context("Failed to build authorize url")?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(format!("{}/oauth/token", self.base_url))
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.settings.callback_url.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider { status, body });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn profile(&self, access_token: &str) -> Result<OAuthProfile, AuthError> {
        let response = self
            .client
            .get(format!("{}/userinfo", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider { status, body });
        }
        Ok(response.json().await?)
    }

    /// Trades the authorization code for the profile of the user who logged in
    pub async fn authenticate(&self, code: &str) -> Result<UserDetails, AuthError> {
        let access_token = self.exchange_code(code).await?;
        let profile = self.profile(&access_token).await?;
        Ok(profile.into())
    }
}

#[cfg(test)]
mod auth_tests {
    use actix_web::test::TestRequest;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn oauth_settings() -> OAuthSettings {
        OAuthSettings {
            domain: "bookshelf.eu.auth0.com".to_string(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            callback_url: "http://localhost:8180/auth/callback".to_string(),
        }
    }

    #[test]
    fn signed_session_cookie_is_verified() {
        let key = SessionKey::from_secret(SECRET);
        let cookie = key.session_cookie("auth0|42");
        assert_ne!(cookie.value(), "auth0|42");

        let request = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(
            key.verified_value(&request, SESSION_COOKIE),
            Some("auth0|42".to_string())
        );
    }

    #[test]
    fn tampered_cookie_is_rejected() {
        let key = SessionKey::from_secret(SECRET);
        let request = TestRequest::default()
            .cookie(Cookie::new(SESSION_COOKIE, "auth0|42"))
            .to_http_request();
        assert_eq!(key.verified_value(&request, SESSION_COOKIE), None);

        let other_key = SessionKey::from_secret("fedcba9876543210fedcba9876543210");
        let request = TestRequest::default()
            .cookie(other_key.session_cookie("auth0|42"))
            .to_http_request();
        assert_eq!(key.verified_value(&request, SESSION_COOKIE), None);
    }

    #[test]
    fn oauth_state_is_random() {
        let first = new_oauth_state();
        assert_eq!(first.len(), OAUTH_STATE_LEN);
        assert_ne!(first, new_oauth_state());
    }

    #[test]
    fn authorize_url_carries_client_and_state() {
        let client = OAuthClient::new(oauth_settings()).unwrap();
        let url = client.authorize_url("abc").unwrap();
        assert!(url.starts_with("https://bookshelf.eu.auth0.com/authorize?"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("state=abc"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn profile_without_name_falls_back_to_nickname() {
        let profile: OAuthProfile = serde_json::from_str(
            r#"{"sub": "google-oauth2|7", "nickname": "reader", "email": "reader@example.com"}"#,
        )
        .unwrap();
        let user: UserDetails = profile.into();
        assert_eq!(user.user_id, "google-oauth2|7");
        assert_eq!(user.oauth_identifier, "google-oauth2");
        assert_eq!(user.name, "reader");
        assert_eq!(user.email, "reader@example.com");
    }
}
