//! HTTP command surface of the alignment backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{SyncError, SyncResult};
use crate::fragment::SessionState;
use crate::model::{Position, Reading, SubMode};

/// Body of `POST /api/manual/settings`. Unset fields are left untouched by the backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SettingsUpdate {
    #[serde(rename = "format_type", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diskdefs_path: Option<String>,
    #[serde(rename = "alignment_mode", skip_serializing_if = "Option::is_none")]
    pub sub_mode: Option<SubMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_analyze: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_reads: Option<u32>,
}

impl SettingsUpdate {
    pub fn format(format: impl Into<String>) -> Self {
        Self {
            format: Some(format.into()),
            ..Self::default()
        }
    }

    pub fn sub_mode(mode: SubMode) -> Self {
        Self {
            sub_mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Success body of a manual command. Only the fields the client uses are kept.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandReply {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub reading: Option<Reading>,
    pub state: Option<SessionState>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FormatInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Deserialize)]
struct FormatList {
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_state(&self) -> SyncResult<SessionState>;
    async fn start(&self, from: Position) -> SyncResult<CommandReply>;
    async fn stop(&self) -> SyncResult<CommandReply>;
    async fn seek(&self, to: Position) -> SyncResult<CommandReply>;
    async fn move_by(&self, delta: i32) -> SyncResult<CommandReply>;
    async fn jump(&self, slot: u8) -> SyncResult<CommandReply>;
    async fn set_head(&self, head: u8) -> SyncResult<CommandReply>;
    async fn recalibrate(&self) -> SyncResult<CommandReply>;
    async fn analyze(&self) -> SyncResult<CommandReply>;
    async fn update_settings(&self, update: &SettingsUpdate) -> SyncResult<CommandReply>;
    /// Stops a running automatic alignment.
    async fn cancel_automatic(&self) -> SyncResult<()>;
    /// Clears measurement data in both modes; the backend broadcasts `alignment_reset`.
    async fn reset_data(&self) -> SyncResult<()>;
    async fn list_formats(&self) -> SyncResult<Vec<FormatInfo>>;
}

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let res = self.http.get(self.url(path)).send().await?;
        decode(res).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> SyncResult<T> {
        tracing::debug!(target: "align_sync::backend", path, %body, "issuing command");
        let res = self.http.post(self.url(path)).json(&body).send().await?;
        decode(res).await
    }

    async fn command(&self, path: &str, body: serde_json::Value) -> SyncResult<CommandReply> {
        self.post(path, body).await
    }
}

async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> SyncResult<T> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json::<T>().await?);
    }
    let body = res.text().await.unwrap_or_default();
    Err(SyncError::Rejected {
        status: status.as_u16(),
        detail: rejection_detail(&body),
    })
}

/// Extracts the `detail` field of an error body, falling back to the raw text.
pub(crate) fn rejection_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_state(&self) -> SyncResult<SessionState> {
        self.get("manual/state").await
    }

    async fn start(&self, from: Position) -> SyncResult<CommandReply> {
        self.command(
            "manual/start",
            json!({"initial_track": from.track, "initial_head": from.head}),
        )
        .await
    }

    async fn stop(&self) -> SyncResult<CommandReply> {
        self.command("manual/stop", json!({})).await
    }

    async fn seek(&self, to: Position) -> SyncResult<CommandReply> {
        self.command("manual/seek", json!({"track": to.track, "head": to.head}))
            .await
    }

    async fn move_by(&self, delta: i32) -> SyncResult<CommandReply> {
        self.command("manual/move", json!({"delta": delta})).await
    }

    async fn jump(&self, slot: u8) -> SyncResult<CommandReply> {
        self.command("manual/jump", json!({"track_number": slot}))
            .await
    }

    async fn set_head(&self, head: u8) -> SyncResult<CommandReply> {
        self.command("manual/head", json!({"head": head})).await
    }

    async fn recalibrate(&self) -> SyncResult<CommandReply> {
        self.command("manual/recal", json!({})).await
    }

    async fn analyze(&self) -> SyncResult<CommandReply> {
        self.command("manual/analyze", json!({})).await
    }

    async fn update_settings(&self, update: &SettingsUpdate) -> SyncResult<CommandReply> {
        self.command("manual/settings", serde_json::to_value(update)?)
            .await
    }

    async fn cancel_automatic(&self) -> SyncResult<()> {
        let _: serde_json::Value = self.post("align/cancel", json!({})).await?;
        Ok(())
    }

    async fn reset_data(&self) -> SyncResult<()> {
        let _: serde_json::Value = self.post("align/reset", json!({})).await?;
        Ok(())
    }

    async fn list_formats(&self) -> SyncResult<Vec<FormatInfo>> {
        let list: FormatList = self.get("manual/formats").await?;
        Ok(list.formats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_skip_unset_fields() {
        let body = serde_json::to_value(SettingsUpdate::format("ibm.720")).expect("json");
        assert_eq!(body, json!({"format_type": "ibm.720"}));

        let body = serde_json::to_value(SettingsUpdate::sub_mode(SubMode::HighPrecision))
            .expect("json");
        assert_eq!(body, json!({"alignment_mode": "high_precision"}));
    }

    #[test]
    fn rejection_detail_prefers_fastapi_detail() {
        assert_eq!(
            rejection_detail(r#"{"detail":"head doit être 0 ou 1"}"#),
            "head doit être 0 ou 1"
        );
        assert_eq!(rejection_detail("Internal Server Error"), "Internal Server Error");
        assert_eq!(rejection_detail(""), "no response body");
        assert_eq!(
            rejection_detail(r#"{"detail":[{"msg":"field required"}]}"#),
            r#"[{"msg":"field required"}]"#
        );
    }

    #[test]
    fn url_joins_without_double_slash() {
        let backend = HttpBackend::new("http://localhost:8000/");
        assert_eq!(backend.url("manual/state"), "http://localhost:8000/api/manual/state");
    }
}
