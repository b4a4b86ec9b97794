use crate::error::IngestError;
use crate::timestamp::parse_utc_offset;
use crate::weather::DEFAULT_WEATHER_API_URL;
use chrono::FixedOffset;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "api_config.json";
const DEFAULT_MEASUREMENT: &str = "location-only";
const DEFAULT_INTERVAL_SECONDS: u64 = 3600;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 20;
const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 3600;
const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 3600;

fn setup_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("WEATHER_INGEST_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

/// Optional JSON setup file. Environment variables take precedence over it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetupConfigFile {
    #[serde(default, alias = "Key")]
    api_key: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    utc_offset: Option<String>,
    #[serde(default, rename = "sinkURL", alias = "sinkUrl")]
    sink_url: Option<String>,
    #[serde(default)]
    sink_token: Option<String>,
    #[serde(default)]
    sink_org: Option<String>,
    #[serde(default)]
    sink_bucket: Option<String>,
    #[serde(default)]
    measurement_name: Option<String>,
    #[serde(default)]
    interval_seconds: Option<u64>,
    #[serde(default)]
    weather_api_url: Option<String>,
    #[serde(default)]
    request_timeout_seconds: Option<u64>,
}

/// `Ok(None)` when there is no file. `Err` carries why an existing file was
/// unusable.
fn load_setup_config_file(path: &Path) -> Result<Option<SetupConfigFile>, String> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no setup config file; using env only");
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(path).map_err(|err| format!("failed to read: {err}"))?;
    let mut bytes = contents.into_bytes();
    simd_json::serde::from_slice(&mut bytes)
        .map(Some)
        .map_err(|err| format!("failed to parse: {err}"))
}

#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub location: String,
    pub utc_offset: FixedOffset,
    pub weather_api_url: String,
    pub sink_url: String,
    pub sink_token: String,
    pub sink_org: String,
    pub sink_bucket: String,
    pub measurement: String,
    pub interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("location", &self.location)
            .field("utc_offset", &self.utc_offset)
            .field("weather_api_url", &self.weather_api_url)
            .field("sink_url", &self.sink_url)
            .field("sink_token", &"<redacted>")
            .field("sink_org", &self.sink_org)
            .field("sink_bucket", &self.sink_bucket)
            .field("measurement", &self.measurement)
            .field("interval_seconds", &self.interval_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl Config {
    /// Reads the process environment. `.env` is loaded by `main` before this
    /// runs.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::load(|key| std::env::var(key).ok(), &setup_config_path())
    }

    fn load(env: impl Fn(&str) -> Option<String>, setup_path: &Path) -> Result<Self, IngestError> {
        match load_setup_config_file(setup_path) {
            Ok(setup) => Self::resolve(env, &setup.unwrap_or_default(), None),
            Err(reason) => {
                tracing::warn!(
                    path = %setup_path.display(),
                    error = %reason,
                    "weather-ingest ignoring setup config; using env only"
                );
                let note = format!("setup config {} was ignored: {reason}", setup_path.display());
                Self::resolve(env, &SetupConfigFile::default(), Some(note.as_str()))
            }
        }
    }

    fn resolve(
        env: impl Fn(&str) -> Option<String>,
        setup: &SetupConfigFile,
        setup_problem: Option<&str>,
    ) -> Result<Self, IngestError> {
        let pick = |env_key: &str, file_value: Option<&String>| -> Option<String> {
            env(env_key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| {
                    file_value
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                })
        };
        let required = |name: &str, env_key: &str, file_value: Option<&String>| {
            pick(env_key, file_value).ok_or_else(|| {
                IngestError::ConfigMissing(match setup_problem {
                    Some(problem) => format!("{name} ({env_key}); {problem}"),
                    None => format!("{name} ({env_key})"),
                })
            })
        };
        let seconds = |name: &str,
                       env_key: &str,
                       file_value: Option<u64>,
                       default: u64,
                       max: u64|
         -> Result<u64, IngestError> {
            let value = match env(env_key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(raw) => raw.parse::<u64>().map_err(|_| {
                    IngestError::config_invalid(name, format!("{raw:?} is not a whole number of seconds"))
                })?,
                None => file_value.unwrap_or(default),
            };
            if value == 0 {
                return Err(IngestError::config_invalid(name, "must be at least 1 second"));
            }
            if value > max {
                return Err(IngestError::config_invalid(
                    name,
                    format!("{value} exceeds the maximum of {max} seconds"),
                ));
            }
            Ok(value)
        };

        let api_key = required("apiKey", "WEATHER_API_KEY", setup.api_key.as_ref())?;
        let location = required("location", "WEATHER_LOCATION", setup.location.as_ref())?;
        let raw_offset = required("utcOffset", "WEATHER_UTC_OFFSET", setup.utc_offset.as_ref())?;
        let utc_offset = parse_utc_offset(&raw_offset)
            .map_err(|reason| IngestError::config_invalid("utcOffset", reason))?;
        let sink_url = required("sinkURL", "INFLUX_URL", setup.sink_url.as_ref())?;
        let sink_token = required("sinkToken", "INFLUX_TOKEN", setup.sink_token.as_ref())?;
        let sink_org = required("sinkOrg", "INFLUX_ORG", setup.sink_org.as_ref())?;
        let sink_bucket = required("sinkBucket", "INFLUX_BUCKET", setup.sink_bucket.as_ref())?;

        let measurement = pick("INFLUX_MEASUREMENT", setup.measurement_name.as_ref())
            .unwrap_or_else(|| DEFAULT_MEASUREMENT.to_string());
        if measurement.chars().any(char::is_control) {
            return Err(IngestError::config_invalid(
                "measurementName",
                "must not contain control characters",
            ));
        }
        let weather_api_url = pick("WEATHER_API_URL", setup.weather_api_url.as_ref())
            .unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string());
        let interval_seconds = seconds(
            "intervalSeconds",
            "WEATHER_INTERVAL_SECONDS",
            setup.interval_seconds,
            DEFAULT_INTERVAL_SECONDS,
            MAX_INTERVAL_SECONDS,
        )?;
        let request_timeout_seconds = seconds(
            "requestTimeoutSeconds",
            "WEATHER_REQUEST_TIMEOUT_SECONDS",
            setup.request_timeout_seconds,
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
            MAX_REQUEST_TIMEOUT_SECONDS,
        )?;

        Ok(Self {
            api_key,
            location,
            utc_offset,
            weather_api_url,
            sink_url,
            sink_token,
            sink_org,
            sink_bucket,
            measurement,
            interval_seconds,
            request_timeout_seconds,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
