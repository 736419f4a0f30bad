use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient};
use serde_json::Value;
use std::time::Duration;

use super::{HistoryEntry, MusicService, PlayedTrack, Source, Track, UserKey};
use crate::auth::Credentials;
use crate::config::Config;
use crate::error::RemoteError;

/// HTTP client for the web service API.
///
/// Every call is a signed, form-encoded POST of `method=<name>` plus its
/// arguments to a single endpoint. Responses look like
/// `{"status": "ok", "result": ...}`.
pub struct RdioClient {
    http_client: HttpClient,
    api_base: String,
    credentials: Credentials,
}

impl RdioClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.network.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            api_base: config.network.api_base.clone(),
            credentials: Credentials::from(config),
        })
    }

    async fn call(&self, method: &str, args: &[(&str, String)]) -> Result<Value> {
        let mut form: Vec<(&str, &str)> = vec![("method", method)];
        form.extend(args.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .http_client
            .post(&self.api_base)
            .header(header::AUTHORIZATION, self.credentials.authorization_header(&[]))
            .form(&form)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(format!("{}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), body))
                .with_context(|| format!("{} failed", method));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Transient(format!("{}: unreadable response: {}", method, e)))?;

        Ok(unwrap_result(json).with_context(|| format!("{} failed", method))?)
    }
}

/// Pull `result` out of the response envelope.
pub(crate) fn unwrap_result(mut json: Value) -> Result<Value, RemoteError> {
    match json.get("status").and_then(|s| s.as_str()) {
        Some("ok") => Ok(json.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        _ => {
            let message = json
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            Err(RemoteError::Api(message))
        }
    }
}

// Helper to parse a track object
fn parse_track(item: &Value) -> Option<Track> {
    let key = item.get("key")?.as_str()?.to_string();
    let name = item
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("Unknown Track")
        .to_string();
    Some(Track { key, name })
}

fn parse_played_track(item: &Value) -> Option<PlayedTrack> {
    let track = parse_track(item.get("track")?)?;
    let time = item
        .get("time")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    Some(PlayedTrack { time, track })
}

/// Lists arrive either bare or wrapped as `{"items": [...]}`.
fn items(value: &Value) -> &[Value] {
    value
        .as_array()
        .or_else(|| value.get("items").and_then(|i| i.as_array()))
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

/// Parse one history source. A missing or odd `time` is kept as-is; the
/// syncer decides what to do with entries it can't date.
fn parse_history_entry(item: &Value) -> Option<HistoryEntry> {
    let time = item.get("time")?.as_str().unwrap_or_default().to_string();

    let source = item
        .get("source")
        .map(|s| Source {
            name: s
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("Unknown Source")
                .to_string(),
            key: s.get("key").and_then(|k| k.as_str()).map(|k| k.to_string()),
        })
        .unwrap_or_default();

    let tracks = item
        .get("tracks")
        .map(|t| items(t).iter().filter_map(parse_played_track).collect())
        .unwrap_or_default();

    Some(HistoryEntry { time, source, tracks })
}

pub(crate) fn parse_history(result: &Value) -> Vec<HistoryEntry> {
    let sources = result.get("sources").unwrap_or(result);
    items(sources).iter().filter_map(parse_history_entry).collect()
}

pub(crate) fn parse_tracks(result: &Value) -> Vec<Track> {
    items(result).iter().filter_map(parse_track).collect()
}

#[async_trait]
impl MusicService for RdioClient {
    fn service_name(&self) -> &str {
        "rdio"
    }

    async fn current_user(&self) -> Result<UserKey> {
        let result = self.call("currentUser", &[]).await?;
        let key = result
            .get("key")
            .and_then(|k| k.as_str())
            .ok_or_else(|| anyhow!("currentUser response has no user key"))?;
        Ok(UserKey(key.to_string()))
    }

    async fn fetch_history_page(
        &self,
        user: &UserKey,
        offset: usize,
        count: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let result = self
            .call(
                "getHistoryForUser",
                &[
                    ("user", user.0.clone()),
                    ("start", offset.to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;
        Ok(parse_history(&result))
    }

    async fn fetch_offline_tracks(&self, offset: usize, count: usize) -> Result<Vec<Track>> {
        let result = self
            .call(
                "getOfflineTracks",
                &[("start", offset.to_string()), ("count", count.to_string())],
            )
            .await?;
        Ok(parse_tracks(&result))
    }

    async fn set_offline_availability(&self, track_keys: &[String], available: bool) -> Result<()> {
        if track_keys.is_empty() {
            return Ok(());
        }
        self.call(
            "setAvailableOffline",
            &[
                ("keys", track_keys.join(",")),
                ("offline", available.to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}
