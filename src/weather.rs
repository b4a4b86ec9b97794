use crate::error::IngestError;
use crate::flatten::RawSnapshot;
use crate::pipeline::SnapshotSource;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

pub const DEFAULT_WEATHER_API_URL: &str = "https://api.weatherapi.com/v1/current.json";

/// Client for WeatherAPI's current-conditions endpoint.
#[derive(Clone)]
pub struct WeatherClient {
    http: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl WeatherClient {
    pub fn new(
        http: Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(IngestError::ConfigMissing("apiKey".to_string()));
        }
        Ok(Self {
            http,
            url: url.into(),
            api_key,
            timeout,
        })
    }

    pub async fn fetch_current(&self, location: &str) -> Result<RawSnapshot, IngestError> {
        if location.trim().is_empty() {
            return Err(IngestError::ConfigMissing("location".to_string()));
        }

        // without_url(): the request URL carries the API key.
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", location),
                ("aqi", "yes"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                IngestError::SourceUnavailable(format!(
                    "request to {} failed: {}",
                    self.url,
                    err.without_url()
                ))
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| {
            IngestError::SourceUnavailable(format!(
                "reading response body failed (HTTP {status}): {}",
                err.without_url()
            ))
        })?;

        if !status.is_success() {
            let detail = match serde_json::from_slice::<ApiErrorBody>(&body) {
                Ok(ApiErrorBody { error }) => format!(
                    "{} (code {})",
                    error.message.unwrap_or_default(),
                    error
                        .code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "n/a".to_string())
                ),
                Err(_) => String::from_utf8_lossy(&body).trim().to_string(),
            };
            return Err(IngestError::SourceUnavailable(format!(
                "weather API HTTP {status}: {detail}"
            )));
        }

        let value: JsonValue = serde_json::from_slice(&body).map_err(|err| {
            IngestError::MalformedResponse(format!("response body is not valid JSON: {err}"))
        })?;
        RawSnapshot::from_value(value)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for WeatherClient {
    async fn fetch(&self, location: &str) -> Result<RawSnapshot, IngestError> {
        self.fetch_current(location).await
    }
}
