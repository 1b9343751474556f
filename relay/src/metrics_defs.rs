//! Metrics definitions for calls to the SHIFT API.

use shared::metrics_defs::{MetricDef, MetricType};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "upstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of SHIFT API calls in seconds. Tagged with method and status.",
};

pub const UPSTREAM_REQUEST_FAILED: MetricDef = MetricDef {
    name: "upstream.request.failed",
    metric_type: MetricType::Counter,
    description: "SHIFT API calls that failed before a response was received",
};

pub const DOWNLOAD_RETRIES: MetricDef = MetricDef {
    name: "download.retries",
    metric_type: MetricType::Counter,
    description: "Download attempts repeated after a transport error or 5xx",
};

pub const UPLOAD_CHUNKS_SENT: MetricDef = MetricDef {
    name: "upload.chunks.sent",
    metric_type: MetricType::Counter,
    description: "Chunks sent by the chunked uploader, including resends",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPSTREAM_REQUEST_DURATION,
    UPSTREAM_REQUEST_FAILED,
    DOWNLOAD_RETRIES,
    UPLOAD_CHUNKS_SENT,
];
