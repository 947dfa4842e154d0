use once_cell::sync::OnceCell;
use prometheus::{default_registry, Opts, Registry};

use crate::{log_then_return, new_error, Result};

/// A named counter backed by an `AtomicU64`
mod int_counter;
/// A named gauge backed by an `AtomicI64`
mod int_gauge;

/// Re-export for the `IntCounter` type
pub use int_counter::IntCounter;
/// Re-export for the `IntGauge` type
pub use int_gauge::IntGauge;

static REGISTRY: OnceCell<&'static Registry> = OnceCell::new();

/// Set the registry that all virtnode metrics register with.
///
/// Must be called before the first metric is created; afterwards the
/// registry is fixed and this returns an error.
pub fn set_metrics_registry(registry: &'static Registry) -> Result<()> {
    match REGISTRY.get() {
        Some(_) => {
            log_then_return!("metrics registry was already set");
        }
        None => {
            REGISTRY
                .set(registry)
                .map_err(|_| new_error!("metrics registry was already set"))?;
            Ok(())
        }
    }
}

/// The registry virtnode metrics register with, defaulting to the process's
/// default prometheus registry when none was set.
pub(crate) fn get_metrics_registry() -> &'static Registry {
    REGISTRY.get_or_init(default_registry)
}

/// The opts for a metric with the given name and help text.
pub(crate) fn get_metric_opts(name: &str, help: &str) -> Opts {
    let opts = Opts::new(name, help);
    opts.namespace("virtnode")
}

/// A metric produced by this crate.
#[derive(Debug)]
pub enum VirtnodeMetric {
    /// A monotonically increasing counter
    IntCounter(IntCounter),
    /// A gauge that can move in both directions
    IntGauge(IntGauge),
}

/// Implemented by metric-name types that can resolve themselves to a
/// registered `VirtnodeMetric`.
pub trait VirtnodeMetricOps {
    /// The registered metric for this name.
    fn get_metric(&self) -> Result<&VirtnodeMetric>;
}

/// Resolve a metric name to a concrete metric of type `T`.
pub trait GetVirtnodeMetric<T> {
    /// The registered metric for this name, as a `T`.
    fn metric(&self) -> Result<&T>;
}
