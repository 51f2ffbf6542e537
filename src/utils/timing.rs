use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::logging::{LogLevel, Logger};

pub fn round_millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100_000.0).round() / 100.0
}

pub fn millis_since(started_at: Instant) -> f64 {
    round_millis(started_at.elapsed())
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RequestTimings {
    pub queue_wait_ms: f64,
    pub store_ms: f64,
    pub processing_ms: f64,
}

impl RequestTimings {
    pub fn measure(received_at: Instant, picked_up_at: Instant, store_ms: f64) -> Self {
        let queue_wait_ms = round_millis(picked_up_at.saturating_duration_since(received_at));
        let worker_ms = millis_since(picked_up_at);
        Self {
            queue_wait_ms,
            store_ms,
            processing_ms: ((worker_ms - store_ms).max(0.0) * 100.0).round() / 100.0,
        }
    }

    pub fn to_payload(self) -> Value {
        json!({
            "queue_wait_ms": self.queue_wait_ms,
            "store_ms": self.store_ms,
            "processing_ms": self.processing_ms,
        })
    }
}

pub fn measure_execution<T, F>(
    task_name: &str,
    context: Option<&str>,
    logger: &Logger,
    task: F,
) -> T
where
    F: FnOnce() -> T,
{
    let started_at = Instant::now();
    let result = task();
    let elapsed_ms = millis_since(started_at);
    logger.log(
        LogLevel::Debug,
        context,
        &format!("task '{task_name}' finished in {elapsed_ms:.2} ms"),
        Some(json!({ "task": task_name, "elapsed_ms": elapsed_ms })),
    );
    result
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::logging::tests::memory_logger;
    use crate::logging::LogLevel;

    use super::{measure_execution, round_millis, RequestTimings};

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round_millis(Duration::from_micros(1_234)), 1.23);
        assert_eq!(round_millis(Duration::from_micros(1_236)), 1.24);
        assert_eq!(round_millis(Duration::from_secs(2)), 2000.0);
    }

    #[test]
    fn request_timings_never_go_negative() {
        let received_at = Instant::now();
        let timings = RequestTimings::measure(received_at, received_at, 10_000.0);
        assert_eq!(timings.processing_ms, 0.0);
        assert!(timings.queue_wait_ms >= 0.0);

        let payload = timings.to_payload();
        assert_eq!(payload["store_ms"], 10_000.0);
    }

    #[test]
    fn measure_execution_logs_debug_with_task_name() {
        let (logger, sink) = memory_logger(LogLevel::Debug);

        let value = measure_execution("storage.initialize", Some("tests::timing"), &logger, || 7);
        assert_eq!(value, 7);

        let lines = sink.snapshot();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[DEBUG]"));
        assert!(lines[0].contains("task 'storage.initialize' finished in"));
        assert!(lines[0].contains("\"task\":\"storage.initialize\""));
    }
}
