//! Thin Prometheus facade. Counters and histograms are registered lazily
//! into a process-global registry and exposed as `static` items via
//! [`register_convex_counter`] / [`register_convex_histogram`], following
//! the same "declare a static, get a metric" ergonomics as the rest of this
//! codebase's metrics, just against the upstream `prometheus` crate's own
//! registration macros instead of a custom VictoriaMetrics-flavored
//! histogram type.
use std::sync::LazyLock;

pub use prometheus;
use prometheus::{
    Encoder,
    Registry,
    TextEncoder,
};

mod timer;

pub use crate::timer::{
    CancelableTimer,
    StatusTimer,
    Timer,
};

pub static CONVEX_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Render the registry in Prometheus text exposition format, for a `/metrics`
/// scrape endpoint.
pub fn export_text() -> anyhow::Result<String> {
    let metric_families = CONVEX_METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[macro_export]
macro_rules! register_convex_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                $crate::prometheus::register_int_counter_with_registry!(
                    name,
                    $HELP,
                    $crate::CONVEX_METRICS_REGISTRY
                )
                .expect("metric registration failed")
            });
    };
}

#[macro_export]
macro_rules! register_convex_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntGauge> =
            std::sync::LazyLock::new(|| {
                $crate::paste::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                $crate::prometheus::register_int_gauge_with_registry!(
                    name,
                    $HELP,
                    $crate::CONVEX_METRICS_REGISTRY
                )
                .expect("metric registration failed")
            });
    };
}

#[macro_export]
macro_rules! register_convex_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                $crate::paste::paste! {
                    let name = stringify!([<$NAME:lower>]);
                }
                $crate::prometheus::register_histogram_with_registry!(
                    name,
                    $HELP,
                    $crate::CONVEX_METRICS_REGISTRY
                )
                .expect("metric registration failed")
            });
    };
}

pub use paste;

#[cfg(test)]
mod tests {
    use super::*;

    register_convex_counter!(TEST_REQUESTS_TOTAL, "Test requests handled");

    #[test]
    fn counter_registers_and_increments() {
        TEST_REQUESTS_TOTAL.inc();
        assert!(TEST_REQUESTS_TOTAL.get() >= 1);
        assert!(export_text().unwrap().contains("test_requests_total"));
    }
}
