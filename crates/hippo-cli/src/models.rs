//! Model-server discovery.
//!
//! Asks the configured OpenAI-compatible server for its `/v1/models` list so
//! the CLI can report whether memory consolidation has a model to talk to.

use std::time::Duration;

use serde::Deserialize;

/// A single model entry of the `/v1/models` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

/// Raw shape of the `/v1/models` JSON response.
#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

fn models_url(base_url: &str) -> String {
    format!("{}/v1/models", base_url.trim_end_matches('/'))
}

/// Ping the model server and return the models it serves.
///
/// Returns `Err(reason)` when the server is offline, rejects the request, or
/// answers with something that is not a model list.
pub async fn fetch_models(base_url: &str, api_key: Option<&str>) -> Result<Vec<ModelInfo>, String> {
    let url = models_url(base_url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| format!("HTTP client init failed: {}", e))?;

    let mut request = client.get(&url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request.send().await.map_err(|e| format!("Model server unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Model server returned HTTP {}", response.status()));
    }

    let list: ModelList = response.json().await.map_err(|e| format!("Failed to parse model list: {}", e))?;
    Ok(list.data)
}

/// Whether `model` is among `models`, ignoring an Ollama `:latest` tag.
pub fn serves(models: &[ModelInfo], model: &str) -> bool {
    let bare = |name: &str| name.strip_suffix(":latest").unwrap_or(name).to_string();
    models.iter().any(|m| bare(&m.id) == bare(model))
}
