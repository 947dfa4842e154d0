use prometheus::{
    core::{AtomicI64, GenericGauge},
    register_int_gauge_with_registry,
};

use super::{
    get_metric_opts, get_metrics_registry, GetVirtnodeMetric, VirtnodeMetric, VirtnodeMetricOps,
};
use crate::{new_error, Result, VirtnodeError};

/// A gauge backed by an `AtomicI64`
#[derive(Debug)]
pub struct IntGauge {
    gauge: GenericGauge<AtomicI64>,
    /// The name of the gauge
    pub name: &'static str,
}

impl IntGauge {
    /// Creates a new gauge and registers it with the metric registry
    pub fn new(name: &'static str, help: &str) -> Result<Self> {
        let registry = get_metrics_registry();
        let opts = get_metric_opts(name, help);
        let gauge = register_int_gauge_with_registry!(opts, registry)
            .map_err(|e| new_error!("failed to register gauge {}: {}", name, e))?;
        Ok(Self { gauge, name })
    }
    /// Increments a gauge by 1
    pub fn inc(&self) {
        self.gauge.inc();
    }
    /// Decrements a gauge by 1
    pub fn dec(&self) {
        self.gauge.dec();
    }
    /// Sets a gauge to a value
    pub fn set(&self, val: i64) {
        self.gauge.set(val);
    }
    /// Gets the value of a gauge
    pub fn get(&self) -> i64 {
        self.gauge.get()
    }
}

impl<S: VirtnodeMetricOps> GetVirtnodeMetric<IntGauge> for S {
    fn metric(&self) -> Result<&IntGauge> {
        let metric = self.get_metric()?;
        <&VirtnodeMetric as TryInto<&IntGauge>>::try_into(metric)
    }
}

impl<'a> TryFrom<&'a VirtnodeMetric> for &'a IntGauge {
    type Error = VirtnodeError;
    fn try_from(metric: &'a VirtnodeMetric) -> Result<Self> {
        match metric {
            VirtnodeMetric::IntGauge(gauge) => Ok(gauge),
            _ => Err(new_error!("metric is not a IntGauge")),
        }
    }
}

impl From<IntGauge> for VirtnodeMetric {
    fn from(gauge: IntGauge) -> Self {
        VirtnodeMetric::IntGauge(gauge)
    }
}

/// Increments an IntGauge by 1 or logs an error if the metric is not found
#[macro_export]
macro_rules! int_gauge_inc {
    ($metric:expr) => {{
        match $crate::metrics::GetVirtnodeMetric::<$crate::metrics::IntGauge>::metric($metric) {
            Ok(val) => val.inc(),
            Err(e) => log::error!("error getting metric: {}", e),
        };
    }};
}

/// Decrements an IntGauge by 1 or logs an error if the metric is not found
#[macro_export]
macro_rules! int_gauge_dec {
    ($metric:expr) => {{
        match $crate::metrics::GetVirtnodeMetric::<$crate::metrics::IntGauge>::metric($metric) {
            Ok(val) => val.dec(),
            Err(e) => log::error!("error getting metric: {}", e),
        };
    }};
}

/// Gets the value of an IntGauge logs an error
/// and returns 0 if the metric is not found
#[macro_export]
macro_rules! int_gauge_get {
    ($metric:expr) => {{
        match $crate::metrics::GetVirtnodeMetric::<$crate::metrics::IntGauge>::metric($metric) {
            Ok(val) => val.get(),
            Err(e) => {
                log::error!("error getting metric: {}", e);
                0
            }
        }
    }};
}
