//! Dependency-free Prometheus exposition (§6 `/metrics`): counters/gauges/
//! histograms backed by atomics behind a `DashMap`, so `/metrics` never
//! contends with request handling beyond a lock-free read.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<Vec<(String, String)>, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let mut key: Vec<(String, String)> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        key.sort();
        self.map.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(v, Ordering::Relaxed);
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let label_str = r.key().iter().map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v))).collect::<Vec<_>>().join(",");
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str, r.value().load(Ordering::Relaxed));
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<Vec<(String, String)>, AtomicI64>,
}

impl GaugeVec {
    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        let mut key: Vec<(String, String)> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        key.sort();
        self.map.entry(key).or_insert_with(|| AtomicI64::new(0)).store(v, Ordering::Relaxed);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        let mut key: Vec<(String, String)> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        key.sort();
        self.map.entry(key).or_insert_with(|| AtomicI64::new(0)).fetch_add(v, Ordering::Relaxed);
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let label_str = r.key().iter().map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v))).collect::<Vec<_>>().join(",");
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str, r.value().load(Ordering::Relaxed));
        }
    }
}

const BUCKETS_MICROS: [u64; 9] = [100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000];

struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 9],
}

impl Default for AtomicHistogram {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<Vec<(String, String)>, AtomicHistogram>,
}

impl HistogramVec {
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let mut key: Vec<(String, String)> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        key.sort();
        let hist = self.map.entry(key).or_insert_with(AtomicHistogram::default);
        let micros = duration.as_micros() as u64;
        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let key = r.key();
            let hist = r.value();
            let label_str = key.iter().map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v))).collect::<Vec<_>>().join(",");
            let prefix = if label_str.is_empty() { String::new() } else { format!("{},", label_str) };
            for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, hist.buckets[i].load(Ordering::Relaxed));
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, label_str, hist.sum.load(Ordering::Relaxed));
            let _ = writeln!(out, "{}_count{{{}}} {}", name, label_str, count);
        }
    }
}

#[derive(Default)]
pub struct GatewayMetrics {
    pub http_requests: CounterVec,
    pub http_request_duration: HistogramVec,
    pub ws_upgrades: CounterVec,
    pub ws_active_connections: GaugeVec,
    pub rate_limit_rejections: CounterVec,
    pub queue_depth: GaugeVec,
    draining: AtomicBool,
}

impl GatewayMetrics {
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.http_requests.render("cs_http_requests_total", &mut out);
        self.http_request_duration.render("cs_http_request_duration_micros", &mut out);
        self.ws_upgrades.render("cs_ws_upgrades_total", &mut out);
        self.ws_active_connections.render("cs_ws_active_connections", &mut out);
        self.rate_limit_rejections.render("cs_rate_limit_rejections_total", &mut out);
        self.queue_depth.render("cs_queue_depth", &mut out);
        let _ = writeln!(out, "# TYPE cs_draining gauge\ncs_draining {}", if self.is_draining() { 1 } else { 0 });
        out
    }
}
