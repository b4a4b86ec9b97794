mod config;
mod error;
mod flatten;
mod influx;
mod pipeline;
mod scheduler;
mod timestamp;
mod weather;

#[cfg(test)]
mod fixtures;

use crate::config::Config;
use crate::influx::InfluxWriter;
use crate::pipeline::{CycleSettings, IngestPipeline};
use crate::scheduler::Scheduler;
use crate::weather::WeatherClient;
use anyhow::Result;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

fn init_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,weather_ingest=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "weather-ingest"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing comes up before configuration so setup-file and validation
    // problems are logged.
    dotenvy::dotenv().ok();
    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|value| !value.trim().is_empty());
    init_tracing(otlp_endpoint.as_deref())?;

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error=%err, "weather-ingest cannot start");
            return Err(err.into());
        }
    };
    tracing::info!(
        location = %config.location,
        utc_offset = %config.utc_offset,
        measurement = %config.measurement,
        bucket = %config.sink_bucket,
        interval_secs = config.interval_seconds,
        "weather-ingest starting"
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("weather-ingest/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let source = WeatherClient::new(
        http.clone(),
        config.weather_api_url.clone(),
        config.api_key.clone(),
        config.request_timeout(),
    )?;
    let sink = InfluxWriter::new(
        http,
        &config.sink_url,
        config.sink_token.clone(),
        config.sink_org.clone(),
        config.sink_bucket.clone(),
        config.request_timeout(),
    )?;
    tracing::info!(url = %sink.write_url(), "writing points to InfluxDB");

    let mut pipeline = IngestPipeline::new(
        source,
        sink,
        CycleSettings {
            location: config.location.clone(),
            utc_offset: config.utc_offset,
            measurement: config.measurement.clone(),
        },
    );
    let stats = pipeline.stats();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown signal received");
                    cancel.cancel();
                }
                Err(err) => tracing::warn!(error=%err, "failed to listen for shutdown signal"),
            }
        });
    }

    let mut scheduler = Scheduler::new(config.interval());
    let cycles = scheduler.run(&mut pipeline, &cancel).await;

    tracing::info!(
        cycles,
        succeeded = stats.succeeded.load(Ordering::Relaxed),
        failed = stats.failed.load(Ordering::Relaxed),
        last_success_unix_ms = stats.last_success_unix_ms.load(Ordering::Relaxed),
        last_cycle_micros = stats.last_cycle_micros.load(Ordering::Relaxed),
        last_error = stats.last_error().as_deref().unwrap_or("none"),
        state = ?scheduler.state(),
        "weather-ingest stopped"
    );

    Ok(())
}
