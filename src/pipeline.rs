use crate::error::{CycleError, IngestError, Stage};
use crate::flatten::{project, RawSnapshot};
use crate::influx::TimeSeriesPoint;
use crate::scheduler::CycleRunner;
use crate::timestamp::{format_timestamp, normalize};
use chrono::{FixedOffset, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::Instrument;

#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<RawSnapshot, IngestError>;
}

/// A sink accepts one point per call and acknowledges synchronously. `&mut`
/// keeps the connection exclusive to the running cycle.
#[async_trait::async_trait]
pub trait PointSink: Send {
    async fn write(&mut self, point: &TimeSeriesPoint) -> Result<(), IngestError>;
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub location: String,
    pub utc_offset: FixedOffset,
    pub measurement: String,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub point: TimeSeriesPoint,
    pub missing_fields: Vec<&'static str>,
}

/// Observability counters only; nothing here feeds back into a cycle.
#[derive(Debug)]
pub struct CycleStats {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub last_success_unix_ms: AtomicU64,
    pub last_cycle_micros: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_success_unix_ms: AtomicU64::new(0),
            last_cycle_micros: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    fn record_success(&self, micros: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_micros.store(micros, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_success_unix_ms.store(now, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    fn record_failure(&self, micros: u64, err: impl Into<String>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_micros.store(micros, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }
}

pub struct IngestPipeline<S, W> {
    source: S,
    sink: W,
    settings: CycleSettings,
    stats: Arc<CycleStats>,
}

impl<S: SnapshotSource, W: PointSink> IngestPipeline<S, W> {
    pub fn new(source: S, sink: W, settings: CycleSettings) -> Self {
        Self {
            source,
            sink,
            settings,
            stats: Arc::new(CycleStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<CycleStats> {
        self.stats.clone()
    }

    /// Fetch, flatten, stamp and write one point. Any failure abandons the
    /// cycle before the write, so no partial point reaches the sink.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let snapshot = self
            .source
            .fetch(&self.settings.location)
            .await
            .map_err(CycleError::at(Stage::Fetch))?;

        let record = project(&snapshot).map_err(CycleError::at(Stage::Flatten))?;
        let timestamp = normalize(snapshot.localtime_epoch(), self.settings.utc_offset)
            .map_err(CycleError::at(Stage::Timestamp))?;
        tracing::debug!(
            location = %record.location,
            fields = ?record.fields,
            timestamp = %format_timestamp(&timestamp),
            "flattened snapshot"
        );

        let missing_fields = record.missing_fields();
        if !missing_fields.is_empty() {
            tracing::info!(missing = ?missing_fields, "fields not reported by weather API");
        }

        let point = TimeSeriesPoint::from_record(&self.settings.measurement, &record, timestamp)
            .map_err(CycleError::at(Stage::Write))?;
        self.sink
            .write(&point)
            .await
            .map_err(CycleError::at(Stage::Write))?;

        Ok(CycleReport {
            point,
            missing_fields,
        })
    }
}

#[async_trait::async_trait]
impl<S: SnapshotSource, W: PointSink> CycleRunner for IngestPipeline<S, W> {
    async fn execute(&mut self, cycle: u64) {
        let span = tracing::info_span!("cycle", n = cycle, location = %self.settings.location);
        let started = Instant::now();
        let outcome = self.run_cycle().instrument(span.clone()).await;
        let micros = started.elapsed().as_micros() as u64;

        span.in_scope(|| match outcome {
            Ok(report) => {
                self.stats.record_success(micros);
                tracing::info!(
                    measurement = %report.point.measurement,
                    fields = report.point.fields.len(),
                    missing = report.missing_fields.len(),
                    timestamp = %format_timestamp(&report.point.timestamp),
                    micros,
                    "wrote weather point"
                );
            }
            Err(err) => {
                self.stats.record_failure(micros, err.to_string());
                tracing::warn!(stage = %err.stage, error = %err.source, micros, "cycle abandoned");
            }
        });
    }
}
