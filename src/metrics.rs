//! Metrics and observability for soma_image_meta

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};

use crate::metadata::MetadataBackend;

/// Request counters shared by every organ handler
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    pub metadata_requests: AtomicU64,
    pub exiftool_records: AtomicU64,
    pub fallback_records: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        if op == "image.metadata" {
            self.metadata_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_backend(&self, backend: MetadataBackend) {
        let counter = match backend {
            MetadataBackend::ExifTool => &self.exiftool_records,
            MetadataBackend::ImageMagick => &self.fallback_records,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            metadata: MetadataMetrics {
                requests: self.metadata_requests.load(Ordering::Relaxed),
                exiftool: self.exiftool_records.load(Ordering::Relaxed),
                fallback: self.fallback_records.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub metadata: MetadataMetrics,
}

/// Per-backend breakdown of `image.metadata` results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataMetrics {
    pub requests: u64,
    pub exiftool: u64,
    pub fallback: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
