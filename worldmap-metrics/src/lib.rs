use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide pipeline counters.
///
/// Everything here is observational: counters are read by logging and the
/// shutdown report, never to make decisions.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Outcomes
    pub total_chunks_processed: AtomicUsize,
    pub total_chunks_failed: AtomicUsize,
    pub total_chunks_skipped: AtomicUsize,
    pub total_chunks_missing: AtomicUsize,
    pub total_chunks_queued: AtomicUsize,

    // Extraction
    pub total_records_built: AtomicUsize,
    pub total_build_time_us: AtomicU64,
    pub max_build_time_us: AtomicU64,
    pub total_extraction_fallbacks: AtomicUsize,

    // Delivery
    pub total_send_attempts: AtomicUsize,
    pub total_send_retries: AtomicUsize,
    pub total_send_time_us: AtomicU64,
    pub total_bytes_sent: AtomicUsize,

    // Session
    pub start_time: Option<Instant>,
    pub config_summary: String,
}

impl PipelineMetrics {
    pub fn new(config_summary: String) -> Self {
        Self {
            start_time: Some(Instant::now()),
            config_summary,
            ..Default::default()
        }
    }

    /// Returns the new processed total.
    pub fn record_processed(&self) -> usize {
        self.total_chunks_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_failed(&self) -> usize {
        self.total_chunks_failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_skipped(&self) {
        self.total_chunks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing(&self) {
        self.total_chunks_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.total_chunks_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build(&self, duration: Duration) {
        self.total_records_built.fetch_add(1, Ordering::Relaxed);
        let us = duration.as_micros() as u64;
        self.total_build_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_build_time_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_extraction_fallback(&self) {
        self.total_extraction_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// One HTTP attempt; `attempt` is 1-based so anything past the first counts as a retry.
    pub fn record_send_attempt(&self, attempt: u32, duration: Duration, bytes: usize) {
        self.total_send_attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            self.total_send_retries.fetch_add(1, Ordering::Relaxed);
        }
        self.total_send_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn processed(&self) -> usize {
        self.total_chunks_processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.total_chunks_failed.load(Ordering::Relaxed)
    }

    pub fn send_attempts(&self) -> usize {
        self.total_send_attempts.load(Ordering::Relaxed)
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();

        let processed = self.processed();
        let failed = self.failed();
        let skipped = self.total_chunks_skipped.load(Ordering::Relaxed);
        let missing = self.total_chunks_missing.load(Ordering::Relaxed);
        let queued = self.total_chunks_queued.load(Ordering::Relaxed);

        let built = self.total_records_built.load(Ordering::Relaxed);
        let build_total = self.total_build_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let build_max = self.max_build_time_us.load(Ordering::Relaxed) as f64 / 1000.0; // ms
        let build_avg = if built > 0 { build_total / built as f64 } else { 0.0 };
        let fallbacks = self.total_extraction_fallbacks.load(Ordering::Relaxed);

        let attempts = self.send_attempts();
        let retries = self.total_send_retries.load(Ordering::Relaxed);
        let send_total = self.total_send_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let send_avg = if attempts > 0 { send_total / attempts as f64 } else { 0.0 };
        let bytes = self.total_bytes_sent.load(Ordering::Relaxed);
        let avg_payload_kb = if attempts > 0 { bytes as f64 / attempts as f64 / 1024.0 } else { 0.0 };

        let finished = processed + failed;
        let success_rate = if finished > 0 { (processed as f64 / finished as f64) * 100.0 } else { 0.0 };

        format!(
            "Worldmap Pipeline Report\n\
             ========================\n\
             Configuration: {}\n\
             Session Duration: {:.2?}\n\n\
             [Chunks]\n\
             Queued: {}\n\
             Delivered: {}\n\
             Failed: {}\n\
             Skipped (already delivered): {}\n\
             Missing (not loadable): {}\n\
             Success Rate: {:.1}%\n\n\
             [Extraction]\n\
             Records Built: {}\n\
             Avg Time: {:.2} ms/chunk\n\
             Max Time: {:.2} ms\n\
             Fallback Records: {}\n\n\
             [Delivery]\n\
             Attempts: {}\n\
             Retries: {}\n\
             Avg Latency: {:.2} ms/attempt\n\
             Avg Payload: {:.1} KB\n",
            self.config_summary,
            uptime,
            queued, processed, failed, skipped, missing, success_rate,
            built, build_avg, build_max, fallbacks,
            attempts, retries, send_avg, avg_payload_kb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_return_running_totals() {
        let metrics = PipelineMetrics::new("test".to_string());
        assert_eq!(metrics.record_processed(), 1);
        assert_eq!(metrics.record_processed(), 2);
        assert_eq!(metrics.record_failed(), 1);
        assert_eq!(metrics.processed(), 2);
        assert_eq!(metrics.failed(), 1);
    }

    #[test]
    fn test_retries_counted_after_first_attempt() {
        let metrics = PipelineMetrics::default();
        metrics.record_send_attempt(1, Duration::from_millis(5), 100);
        metrics.record_send_attempt(2, Duration::from_millis(5), 100);
        metrics.record_send_attempt(3, Duration::from_millis(5), 100);
        assert_eq!(metrics.send_attempts(), 3);
        assert_eq!(metrics.total_send_retries.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_bytes_sent.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report_mentions_outcomes() {
        let metrics = PipelineMetrics::new("api=http://localhost".to_string());
        metrics.record_processed();
        metrics.record_failed();
        let report = metrics.generate_report();
        assert!(report.contains("Configuration: api=http://localhost"));
        assert!(report.contains("Delivered: 1"));
        assert!(report.contains("Failed: 1"));
        assert!(report.contains("Success Rate: 50.0%"));
    }
}
