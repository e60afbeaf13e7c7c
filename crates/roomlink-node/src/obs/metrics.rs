//! Minimal metrics registry for the node.
//!
//! Counter/gauge/histogram types with dynamic labels backed by `DashMap`.
//! Labels are flattened into sorted key vectors to keep deterministic
//! ordering. Histogram buckets are fixed in milliseconds.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_key(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut key: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn label_str(key: &[(String, String)]) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<Vec<(String, String)>, AtomicU64>,
}

impl CounterVec {
    /// Increment by 1.
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    /// Increment by an arbitrary value.
    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value for a label set (0 when never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<Vec<(String, String)>, AtomicI64>,
}

impl GaugeVec {
    /// Overwrite the current value.
    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        let gauge = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0));
        gauge.store(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, label_str(r.key()), val);
        }
    }
}

// Fixed buckets in milliseconds: peer round trips range from a LAN hop to a
// relay call close to the timeout ceiling.
const BUCKETS_MILLIS: [u64; 8] = [5, 25, 100, 250, 500, 1_000, 2_500, 10_000];

struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 8],
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
    /// Observe a duration and increment cumulative buckets (millisecond scale).
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self
            .map
            .entry(label_key(labels))
            .or_insert_with(AtomicHistogram::default);
        let millis = duration.as_millis() as u64;

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(millis, Ordering::Relaxed);

        for (bucket, &le) in hist.buckets.iter().zip(BUCKETS_MILLIS.iter()) {
            if millis <= le {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Render in Prometheus text exposition format (unit: milliseconds).
    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let labels = label_str(r.key());
            let prefix = if labels.is_empty() { String::new() } else { format!("{},", labels) };

            for (bucket, &le) in hist.buckets.iter().zip(BUCKETS_MILLIS.iter()) {
                let count = bucket.load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);

            let sum = hist.sum.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, sum);
            let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, count);
        }
    }
}

#[derive(Default)]
pub struct NodeMetrics {
    /// labels: kind, outcome
    pub deliveries: CounterVec,
    /// labels: kind
    pub delivery_duration: HistogramVec,
    pub queue_depth: GaugeVec,
    /// labels: origin
    pub inbound_messages: CounterVec,
    pub decode_fallbacks: CounterVec,
    /// labels: app
    pub handler_errors: CounterVec,
    /// labels: origin, app
    pub unrouted_messages: CounterVec,
    /// labels: outcome (commit | rollback)
    pub layout_transitions: CounterVec,
    pub ack_timeouts: CounterVec,
}

impl NodeMetrics {
    /// Render all registered metrics plus any extra lines provided by callers.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.deliveries.render("roomlink_deliveries_total", &mut out);
        self.delivery_duration.render("roomlink_delivery_duration_millis", &mut out);
        self.queue_depth.render("roomlink_queue_depth", &mut out);
        self.inbound_messages.render("roomlink_inbound_messages_total", &mut out);
        self.decode_fallbacks.render("roomlink_decode_fallbacks_total", &mut out);
        self.handler_errors.render("roomlink_handler_errors_total", &mut out);
        self.unrouted_messages.render("roomlink_unrouted_messages_total", &mut out);
        self.layout_transitions.render("roomlink_layout_transitions_total", &mut out);
        self.ack_timeouts.render("roomlink_ack_timeouts_total", &mut out);
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_sorted_labels() {
        let m = NodeMetrics::default();
        m.deliveries.inc(&[("outcome", "ok"), ("kind", "ip")]);
        m.deliveries.inc(&[("kind", "ip"), ("outcome", "ok")]);
        assert_eq!(m.deliveries.get(&[("kind", "ip"), ("outcome", "ok")]), 2);

        let out = m.render(&[]);
        assert!(out.contains("roomlink_deliveries_total{kind=\"ip\",outcome=\"ok\"} 2"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let h = HistogramVec::default();
        h.observe(&[("kind", "relay")], Duration::from_millis(300));
        let mut out = String::new();
        h.render("lat", &mut out);
        assert!(out.contains("lat_bucket{kind=\"relay\",le=\"250\"} 0"));
        assert!(out.contains("lat_bucket{kind=\"relay\",le=\"500\"} 1"));
        assert!(out.contains("lat_bucket{kind=\"relay\",le=\"+Inf\"} 1"));
        assert!(out.contains("lat_sum{kind=\"relay\"} 300"));
    }
}
