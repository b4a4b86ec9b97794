use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One unit of scheduled work. Failures are the runner's to report; the
/// scheduler only sequences calls.
#[async_trait::async_trait]
pub trait CycleRunner: Send {
    async fn execute(&mut self, cycle: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Waiting,
}

/// Runs cycles start-to-start on a fixed interval. Cycles execute inline, so
/// a new one never starts before the previous one returns; start slots that
/// pass while a cycle is still running are skipped, not queued.
pub struct Scheduler {
    interval: Duration,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Runs until `cancel` fires. Cancellation is observed only while
    /// waiting, so an in-flight cycle always completes. Returns the number of
    /// cycles started.
    pub async fn run<R: CycleRunner>(&mut self, runner: &mut R, cancel: &CancellationToken) -> u64 {
        let mut cycles = 0u64;
        if cancel.is_cancelled() {
            return cycles;
        }

        let mut start = Instant::now();
        loop {
            self.transition(SchedulerState::Running);
            cycles += 1;
            runner.execute(cycles).await;
            self.transition(SchedulerState::Waiting);

            let now = Instant::now();
            let (next, skipped) = next_start(start, self.interval, now);
            if skipped > 0 {
                tracing::warn!(
                    cycle = cycles,
                    skipped,
                    elapsed_ms = now.duration_since(start).as_millis() as u64,
                    interval_ms = self.interval.as_millis() as u64,
                    "cycle overran its interval; skipping overdue starts"
                );
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(cycles, "scheduler stopping");
                    break;
                }
                _ = sleep_until(next) => {}
            }
            start = next;
        }
        cycles
    }

    fn transition(&mut self, next: SchedulerState) {
        tracing::trace!(from = ?self.state, to = ?next, "scheduler transition");
        self.state = next;
    }
}

/// First start slot `last_start + k * period` (k >= 1) not earlier than
/// `now`, and how many slots were skipped to reach it.
pub fn next_start(last_start: Instant, period: Duration, now: Instant) -> (Instant, u64) {
    let next = last_start + period;
    if next >= now || period.is_zero() {
        return (next.max(now), 0);
    }
    let behind = now.duration_since(next).as_nanos();
    let step = period.as_nanos();
    let skipped = behind.div_ceil(step);
    let advance = Duration::from_nanos((skipped * step).min(u64::MAX as u128) as u64);
    (next + advance, skipped.min(u64::MAX as u128) as u64)
}
