//! Metrics definitions for the settings store.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SETTINGS_GET: MetricDef = MetricDef {
    name: "settings.get",
    metric_type: MetricType::Counter,
    description: "Number of settings documents read. Tagged with found.",
};

pub const SETTINGS_PATCH: MetricDef = MetricDef {
    name: "settings.patch",
    metric_type: MetricType::Counter,
    description: "Number of patches applied. Tagged with kind (reorder, fields).",
};

pub const SETTINGS_PATCH_DURATION: MetricDef = MetricDef {
    name: "settings.patch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to load, merge and save a patch in seconds, including lock wait",
};

pub const SETTINGS_BACKEND_ERROR: MetricDef = MetricDef {
    name: "settings.backend.error",
    metric_type: MetricType::Counter,
    description: "Number of failed backend operations. Tagged with operation.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SETTINGS_GET,
    SETTINGS_PATCH,
    SETTINGS_PATCH_DURATION,
    SETTINGS_BACKEND_ERROR,
];
