//!
//! Request metrics: in-flight gauge, per-(method, code) totals, latency
//! histogram and last-value gauges, with a Prometheus text rendering for
//! the built-in metrics path. Created once per server and injected; no
//! process-global registry.
//!

use crate::imports::*;
use uniport_websocket::SessionCounters;

/// Histogram bucket upper bounds, in milliseconds.
pub const LATENCY_BUCKETS_MS: [u64; 15] = [
    200, 400, 600, 800, 1000, 1500, 2000, 2500, 3000, 5000, 10000, 20000, 30000, 45000, 60000,
];

pub struct Metrics {
    cluster: String,
    processing: AtomicI64,
    totals: Mutex<AHashMap<(String, i64), u64>>,
    // one extra slot for +Inf
    latency_buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    last_latency_ms: AtomicU64,
    last_body_size: AtomicU64,
    sessions: Arc<SessionCounters>,
}

impl Metrics {
    pub fn new(cluster: impl Into<String>) -> Arc<Metrics> {
        Arc::new(Metrics {
            cluster: cluster.into(),
            processing: AtomicI64::new(0),
            totals: Mutex::new(AHashMap::new()),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
            last_body_size: AtomicU64::new(0),
            sessions: Arc::new(SessionCounters::default()),
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn sessions(&self) -> &Arc<SessionCounters> {
        &self.sessions
    }

    pub(crate) fn request_started(&self, body_size: usize) {
        self.processing.fetch_add(1, Ordering::Relaxed);
        self.last_body_size
            .store(body_size as u64, Ordering::Relaxed);
    }

    pub(crate) fn request_finished(&self, name: &str, code: i64, elapsed: Duration) {
        self.processing.fetch_sub(1, Ordering::Relaxed);

        if let Ok(mut totals) = self.totals.lock() {
            *totals.entry((name.to_string(), code)).or_insert(0) += 1;
        }

        let ms = elapsed.as_millis() as u64;
        let slot = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.latency_buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.last_latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Render the Prometheus text exposition for the `_metrics_` surface.
    pub fn render(&self) -> String {
        use std::fmt::Write as _;

        let cluster = &self.cluster;
        let mut out = String::new();

        out.push_str("# HELP request_total Total number of processed requests\n");
        out.push_str("# TYPE request_total counter\n");
        let mut totals: Vec<((String, i64), u64)> = self
            .totals
            .lock()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        totals.sort();
        for ((method, code), count) in totals {
            let _ = writeln!(
                out,
                "request_total{{cluster=\"{cluster}\",method=\"{method}\",status_code=\"{code}\"}} {count}"
            );
        }

        out.push_str("# HELP request_processing Current number of processing requests\n");
        out.push_str("# TYPE request_processing gauge\n");
        let _ = writeln!(
            out,
            "request_processing{{cluster=\"{cluster}\"}} {}",
            self.processing.load(Ordering::Relaxed)
        );

        out.push_str("# HELP request_latency_ms Histogram of latency for requests\n");
        out.push_str("# TYPE request_latency_ms histogram\n");
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.latency_buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(
                out,
                "request_latency_ms_bucket{{cluster=\"{cluster}\",le=\"{bound}\"}} {cumulative}"
            );
        }
        cumulative += self.latency_buckets[LATENCY_BUCKETS_MS.len()].load(Ordering::Relaxed);
        let _ = writeln!(
            out,
            "request_latency_ms_bucket{{cluster=\"{cluster}\",le=\"+Inf\"}} {cumulative}"
        );
        let _ = writeln!(
            out,
            "request_latency_ms_sum{{cluster=\"{cluster}\"}} {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "request_latency_ms_count{{cluster=\"{cluster}\"}} {}",
            self.latency_count.load(Ordering::Relaxed)
        );

        out.push_str("# TYPE realtime_request_latency_ms gauge\n");
        let _ = writeln!(
            out,
            "realtime_request_latency_ms{{cluster=\"{cluster}\"}} {}",
            self.last_latency_ms.load(Ordering::Relaxed)
        );
        out.push_str("# TYPE realtime_request_body_size gauge\n");
        let _ = writeln!(
            out,
            "realtime_request_body_size{{cluster=\"{cluster}\"}} {}",
            self.last_body_size.load(Ordering::Relaxed)
        );

        out.push_str("# TYPE websocket_sessions_active gauge\n");
        let _ = writeln!(
            out,
            "websocket_sessions_active{{cluster=\"{cluster}\"}} {}",
            self.sessions.active_sessions.load(Ordering::Relaxed)
        );
        out.push_str("# TYPE websocket_sessions_total counter\n");
        let _ = writeln!(
            out,
            "websocket_sessions_total{{cluster=\"{cluster}\"}} {}",
            self.sessions.total_sessions.load(Ordering::Relaxed)
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_requests_show_up_in_render() {
        let metrics = Metrics::new("testCluster");
        metrics.request_started(128);
        metrics.request_finished("jsonRpc2", 0, Duration::from_millis(250));

        let text = metrics.render();
        assert!(text.contains(
            r#"request_total{cluster="testCluster",method="jsonRpc2",status_code="0"} 1"#
        ));
        assert!(text.contains(r#"request_processing{cluster="testCluster"} 0"#));
        // 250ms lands in the le="400" bucket and above
        assert!(text.contains(r#"request_latency_ms_bucket{cluster="testCluster",le="200"} 0"#));
        assert!(text.contains(r#"request_latency_ms_bucket{cluster="testCluster",le="400"} 1"#));
        assert!(text.contains(r#"request_latency_ms_count{cluster="testCluster"} 1"#));
    }

    #[test]
    fn in_flight_gauge_tracks_open_requests() {
        let metrics = Metrics::new("c");
        metrics.request_started(0);
        metrics.request_started(0);
        assert!(metrics.render().contains(r#"request_processing{cluster="c"} 2"#));
        metrics.request_finished("m", 0, Duration::from_millis(1));
        assert!(metrics.render().contains(r#"request_processing{cluster="c"} 1"#));
    }
}
