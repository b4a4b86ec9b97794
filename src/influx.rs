use crate::error::IngestError;
use crate::flatten::{FieldValue, FlatRecord, TAG_LOCATION};
use crate::pipeline::PointSink;
use chrono::{DateTime, FixedOffset};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use url::Url;

/// One tagged point, the unit written per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<FixedOffset>,
}

impl TimeSeriesPoint {
    pub fn from_record(
        measurement: &str,
        record: &FlatRecord,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<Self, IngestError> {
        let fields: BTreeMap<String, FieldValue> = record
            .fields
            .iter()
            .filter(|(name, _)| name.as_str() != TAG_LOCATION)
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        if fields.is_empty() {
            return Err(IngestError::MalformedResponse(format!(
                "no numeric fields reported for {}",
                record.location
            )));
        }

        let mut tags = BTreeMap::new();
        tags.insert(TAG_LOCATION.to_string(), record.location.clone());

        Ok(Self {
            measurement: measurement.to_string(),
            tags,
            fields,
            timestamp,
        })
    }

    /// InfluxDB line protocol with second precision.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        for (idx, (key, value)) in self.fields.iter().enumerate() {
            line.push(if idx == 0 { ' ' } else { ',' });
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            match value {
                FieldValue::Integer(v) => {
                    let _ = write!(line, "{v}i");
                }
                FieldValue::Float(v) => {
                    let _ = write!(line, "{v}");
                }
            }
        }
        let _ = write!(line, " {}", self.timestamp.timestamp());
        line
    }
}

fn escape(raw: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '\\' || specials.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Deserialize)]
struct InfluxErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Writes points to an InfluxDB v2 bucket. The underlying HTTP client is the
/// long-lived sink connection; the writer itself is owned by the single cycle
/// pipeline and never shared.
pub struct InfluxWriter {
    http: Client,
    write_url: Url,
    token: String,
    org: String,
    bucket: String,
    timeout: Duration,
}

impl InfluxWriter {
    pub fn new(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let write_url = write_endpoint(base_url)?;
        Ok(Self {
            http,
            write_url,
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
            timeout,
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    pub async fn write_point(&self, point: &TimeSeriesPoint) -> Result<(), IngestError> {
        let body = point.to_line_protocol();
        let response = self
            .http
            .post(self.write_url.clone())
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "s"),
            ])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                IngestError::SinkWriteFailed(format!(
                    "InfluxDB unreachable at {}: {}",
                    self.write_url,
                    err.without_url()
                ))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<InfluxErrorBody>(&text) {
            Ok(InfluxErrorBody { code, message }) => format!(
                "{} ({})",
                message.unwrap_or_default(),
                code.unwrap_or_else(|| "no code".to_string())
            ),
            Err(_) => text.trim().to_string(),
        };
        let reason = match status.as_u16() {
            401 | 403 => "authentication rejected",
            400 | 422 => "point rejected",
            404 => "org or bucket not found",
            _ => "write failed",
        };
        Err(IngestError::SinkWriteFailed(format!(
            "{reason}: InfluxDB HTTP {status}: {detail}"
        )))
    }
}

#[async_trait::async_trait]
impl PointSink for InfluxWriter {
    async fn write(&mut self, point: &TimeSeriesPoint) -> Result<(), IngestError> {
        self.write_point(point).await
    }
}

/// Resolves `{base}/api/v2/write`. A bare `host:port` is taken as plain http.
fn write_endpoint(base_url: &str) -> Result<Url, IngestError> {
    let trimmed = base_url.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut base = Url::parse(&with_scheme)
        .map_err(|err| IngestError::config_invalid("sinkURL", err.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(IngestError::config_invalid(
            "sinkURL",
            format!("unsupported scheme {}", base.scheme()),
        ));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("api/v2/write")
        .map_err(|err| IngestError::config_invalid("sinkURL", err.to_string()))
}
