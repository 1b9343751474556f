use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Proxy request duration in seconds. Tagged with method, route and status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const NOTIFICATIONS_SENT: MetricDef = MetricDef {
    name: "notifications.sent",
    metric_type: MetricType::Counter,
    description: "Notifications delivered. Tagged with channel.",
};

pub const NOTIFICATIONS_FAILED: MetricDef = MetricDef {
    name: "notifications.failed",
    metric_type: MetricType::Counter,
    description: "Notifications a channel failed to deliver. Tagged with channel.",
};

pub const UPLOADS_REJECTED: MetricDef = MetricDef {
    name: "uploads.rejected",
    metric_type: MetricType::Counter,
    description: "Uploads rejected by local size checks before reaching SHIFT. Tagged with route.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    NOTIFICATIONS_SENT,
    NOTIFICATIONS_FAILED,
    UPLOADS_REJECTED,
];
