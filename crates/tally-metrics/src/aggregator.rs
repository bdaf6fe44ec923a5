//! Aggregator — applies observations to the registry.
//!
//! Each call is one registry critical section: family lookup, series
//! lookup and the type-specific merge happen under the same lock
//! acquisition, so scrapes never see half an observation.

use std::sync::Arc;

use tracing::trace;

use tally_core::{MetricsError, MetricsResult, Observation, ObservationValue};

use crate::collector::Collector;
use crate::prometheus::render_prometheus;
use crate::registry::Registry;
use crate::series::check_value;

/// The built-in [`Collector`]: merges into a [`Registry`], renders its
/// snapshot, and forwards `custom` records to an optional delegate.
pub struct Aggregator {
    registry: Arc<Registry>,
    custom: Option<Arc<dyn Collector>>,
}

impl Aggregator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            custom: None,
        }
    }

    /// Hand `custom` records to `collector` and append its rendering.
    pub fn with_custom(mut self, collector: Arc<dyn Collector>) -> Self {
        self.custom = Some(collector);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Merge one observation into its series, creating family and series
    /// on first sight.
    pub fn apply(&self, observation: Observation) -> MetricsResult<()> {
        if let ObservationValue::Custom(_) = observation.value {
            return self.forward_custom(observation);
        }

        // Refuse bad names and values before a series can be created for them.
        observation.validate()?;
        check_value(&observation.name, &observation.value)?;

        let options = self.registry.options();
        let kind = observation.metric_type();
        self.registry.with_state(|state| {
            let family = state.get_or_create_family(
                &observation.name,
                kind,
                &observation.help,
                options.conflict_policy,
            )?;
            let series = family.get_or_create_series(&observation.labels, options, observation.timestamp)?;
            series.record(&observation.name, &observation.value, observation.timestamp)
        })?;

        trace!(metric = %observation.name, %kind, "observation applied");
        Ok(())
    }

    fn forward_custom(&self, observation: Observation) -> MetricsResult<()> {
        match &self.custom {
            Some(custom) => custom.apply(observation),
            None => Err(MetricsError::NoCustomCollector(observation.name)),
        }
    }

    /// Render the registry, followed by the custom delegate's block.
    pub fn render(&self) -> String {
        let mut out = render_prometheus(&self.registry.snapshot());

        if let Some(custom) = &self.custom {
            let extra = custom.render();
            if !extra.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&extra);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }

        out
    }

    /// Clear the registry and the custom delegate.
    pub fn reset(&self) {
        self.registry.reset();
        if let Some(custom) = &self.custom {
            custom.reset();
        }
    }
}

impl Collector for Aggregator {
    fn apply(&self, observation: Observation) -> MetricsResult<()> {
        Aggregator::apply(self, observation)
    }

    fn render(&self) -> String {
        Aggregator::render(self)
    }

    fn reset(&self) {
        Aggregator::reset(self)
    }
}
