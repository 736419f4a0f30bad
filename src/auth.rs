//! OAuth 1.0 request signing and the out-of-band (PIN) token flow.
//!
//! Requests are signed with the PLAINTEXT method, which is only acceptable
//! because every endpoint is reached over TLS.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{header, Client as HttpClient};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::error::RemoteError;

const NONCE_LEN: usize = 16;

/// Consumer and (possibly empty) token credentials used to sign requests
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl From<&Config> for Credentials {
    fn from(config: &Config) -> Self {
        Self {
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            token: config.token.clone(),
            token_secret: config.token_secret.clone(),
        }
    }
}

impl Credentials {
    /// Same consumer, different token
    pub fn with_token(&self, token: &TokenPair) -> Self {
        Self {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            token: token.token.clone(),
            token_secret: token.token_secret.clone(),
        }
    }

    pub fn signature(&self) -> String {
        format!(
            "{}&{}",
            urlencoding::encode(&self.consumer_secret),
            urlencoding::encode(&self.token_secret)
        )
    }

    /// Build an `Authorization` header value with a fresh nonce and timestamp.
    pub fn authorization_header(&self, extra: &[(&str, &str)]) -> String {
        self.authorization_header_with(&nonce(), Utc::now().timestamp(), extra)
    }

    fn authorization_header_with(&self, nonce: &str, timestamp: i64, extra: &[(&str, &str)]) -> String {
        let timestamp = timestamp.to_string();
        let signature = self.signature();

        let mut params: Vec<(&str, &str)> = vec![
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature", signature.as_str()),
            ("oauth_signature_method", "PLAINTEXT"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_version", "1.0"),
        ];
        if !self.token.is_empty() {
            params.push(("oauth_token", self.token.as_str()));
        }
        params.extend_from_slice(extra);
        params.sort_by(|a, b| a.0.cmp(b.0));

        let fields: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, urlencoding::encode(v)))
            .collect();
        format!("OAuth {}", fields.join(", "))
    }
}

fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// An OAuth token and its secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub token: String,
    pub token_secret: String,
}

/// A request token waiting for the user to approve it
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Page where the user approves access and gets a PIN
    pub authorize_url: String,
    request_token: TokenPair,
}

/// Runs the PIN-based token exchange against the OAuth endpoints.
pub struct Authorizer {
    http_client: HttpClient,
    oauth_base: String,
    credentials: Credentials,
}

impl Authorizer {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.network.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let credentials = Credentials {
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            ..Credentials::default()
        };

        Ok(Self {
            http_client,
            oauth_base: config.network.oauth_base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Obtain a request token and the URL the user must visit.
    pub async fn start(&self) -> Result<PendingAuthorization> {
        let url = format!("{}/request_token", self.oauth_base);
        let auth = self.credentials.authorization_header(&[("oauth_callback", "oob")]);
        let fields = self.post_token_request(&url, auth).await?;

        let request_token = token_pair(&fields)?;
        let login_url = fields
            .get("login_url")
            .cloned()
            .ok_or_else(|| anyhow!("request_token response has no login_url"))?;

        Ok(PendingAuthorization {
            authorize_url: format!(
                "{}?oauth_token={}",
                login_url,
                urlencoding::encode(&request_token.token)
            ),
            request_token,
        })
    }

    /// Exchange the approved request token plus the user's PIN for an access token.
    pub async fn complete(&self, pending: &PendingAuthorization, verifier: &str) -> Result<TokenPair> {
        let url = format!("{}/access_token", self.oauth_base);
        let auth = self
            .credentials
            .with_token(&pending.request_token)
            .authorization_header(&[("oauth_verifier", verifier.trim())]);
        let fields = self.post_token_request(&url, auth).await?;
        token_pair(&fields)
    }

    async fn post_token_request(&self, url: &str, auth: String) -> Result<HashMap<String, String>> {
        let response = self
            .http_client
            .post(url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(format!("{}: {}", url, e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), body).into());
        }

        Ok(parse_form(&body))
    }
}

fn token_pair(fields: &HashMap<String, String>) -> Result<TokenPair> {
    let token = fields
        .get("oauth_token")
        .ok_or_else(|| anyhow!("token response has no oauth_token"))?;
    let token_secret = fields
        .get("oauth_token_secret")
        .ok_or_else(|| anyhow!("token response has no oauth_token_secret"))?;
    Ok(TokenPair {
        token: token.clone(),
        token_secret: token_secret.clone(),
    })
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    body.trim()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let k = urlencoding::decode(&k.replace('+', " ")).ok()?.into_owned();
            let v = urlencoding::decode(&v.replace('+', " ")).ok()?.into_owned();
            Some((k, v))
        })
        .collect()
}
