use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::metrics::{IntCounter, IntGauge, VirtnodeMetric, VirtnodeMetricOps};
use crate::{new_error, Result};

/// The name of the gauge tracking live node device handles
pub(crate) const ACTIVE_DEVICE_HANDLES: &str = "active_device_handles";
/// The name of the counter tracking freed node device handles
pub(crate) const FREED_DEVICE_HANDLES: &str = "freed_device_handles";
/// The name of the counter tracking rejected calls on freed handles
pub(crate) const USE_AFTER_FREE_REJECTIONS: &str = "use_after_free_rejections";
/// The name of the counter tracking translated native driver failures
pub(crate) const TRANSLATED_DRIVER_FAILURES: &str = "translated_driver_failures";

lazy_static! {
    static ref NODE_DEVICE_METRICS: HashMap<&'static str, VirtnodeMetric> = {
        let mut m: HashMap<&'static str, VirtnodeMetric> = HashMap::new();
        let metrics: [(&'static str, Result<VirtnodeMetric>); 4] = [
            (
                ACTIVE_DEVICE_HANDLES,
                IntGauge::new(ACTIVE_DEVICE_HANDLES, "Number of live node device handles")
                    .map(VirtnodeMetric::from),
            ),
            (
                FREED_DEVICE_HANDLES,
                IntCounter::new(FREED_DEVICE_HANDLES, "Number of node device handles freed")
                    .map(VirtnodeMetric::from),
            ),
            (
                USE_AFTER_FREE_REJECTIONS,
                IntCounter::new(
                    USE_AFTER_FREE_REJECTIONS,
                    "Number of operations rejected because the device handle was already freed",
                )
                .map(VirtnodeMetric::from),
            ),
            (
                TRANSLATED_DRIVER_FAILURES,
                IntCounter::new(
                    TRANSLATED_DRIVER_FAILURES,
                    "Number of native driver failures translated into typed errors",
                )
                .map(VirtnodeMetric::from),
            ),
        ];
        for (name, metric) in metrics {
            match metric {
                Ok(metric) => {
                    m.insert(name, metric);
                }
                Err(e) => log::error!("failed to create metric {}: {}", name, e),
            }
        }
        m
    };
}

/// Metric definitions for the node-device handle lifecycle.
#[derive(Debug, Copy, Clone)]
pub enum NodeDeviceMetric {
    /// Gauge of currently live device handles
    ActiveDeviceHandles,
    /// Counter of device handles released via free
    FreedDeviceHandles,
    /// Counter of calls rejected with `UseAfterFree`
    UseAfterFreeRejections,
    /// Counter of native failures translated into `Retrieve`/`Operation`
    TranslatedDriverFailures,
}

impl NodeDeviceMetric {
    fn name(&self) -> &'static str {
        match self {
            NodeDeviceMetric::ActiveDeviceHandles => ACTIVE_DEVICE_HANDLES,
            NodeDeviceMetric::FreedDeviceHandles => FREED_DEVICE_HANDLES,
            NodeDeviceMetric::UseAfterFreeRejections => USE_AFTER_FREE_REJECTIONS,
            NodeDeviceMetric::TranslatedDriverFailures => TRANSLATED_DRIVER_FAILURES,
        }
    }
}

impl VirtnodeMetricOps for NodeDeviceMetric {
    fn get_metric(&self) -> Result<&VirtnodeMetric> {
        NODE_DEVICE_METRICS
            .get(self.name())
            .ok_or_else(|| new_error!("metric {} not found", self.name()))
    }
}
