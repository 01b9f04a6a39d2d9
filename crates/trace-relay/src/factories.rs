//! Sink construction by destination kind.

use crate::config::DestinationSpec;
use crate::error::{RelayError, RelayResult};
use crate::stdout::StdoutSink;
use delivery_pipeline::Sink;
use http_sink::{HttpSink, HttpSinkError, TransformRegistry, USER_AGENT};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a sink for one destination entry.
pub type SinkFactory =
    Box<dyn Fn(&DestinationSpec, &TransformRegistry) -> RelayResult<Arc<dyn Sink>> + Send + Sync>;

/// Sink factories keyed by `kind`, plus the transforms they may use.
///
/// Constructed by the caller and handed to [`Relay::from_config`](crate::Relay::from_config).
pub struct SinkFactories {
    factories: HashMap<String, SinkFactory>,
    transforms: TransformRegistry,
}

impl SinkFactories {
    /// No factories; transforms from `transforms`.
    pub fn new(transforms: TransformRegistry) -> Self {
        Self {
            factories: HashMap::new(),
            transforms,
        }
    }

    /// `http` and `stdout` factories over the built-in transforms.
    ///
    /// All HTTP sinks share one connection pool.
    pub fn with_builtins() -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(HttpSinkError::from)?;
        let mut factories = Self::new(TransformRegistry::with_builtins());

        factories.register("http", move |spec, transforms| {
            let endpoint = spec.endpoint.as_deref().ok_or_else(|| {
                RelayError::Config(format!(
                    "destination '{}': http sink requires an endpoint",
                    spec.name
                ))
            })?;
            let transform = transforms.get(&spec.transform)?;
            let sink = HttpSink::with_client(&spec.name, endpoint, transform, client.clone())?;
            Ok(Arc::new(sink) as Arc<dyn Sink>)
        });

        factories.register("stdout", |spec, transforms| {
            let transform = transforms.get(&spec.transform)?;
            Ok(Arc::new(StdoutSink::new(&spec.name, transform)) as Arc<dyn Sink>)
        });

        Ok(factories)
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&DestinationSpec, &TransformRegistry) -> RelayResult<Arc<dyn Sink>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn transforms_mut(&mut self) -> &mut TransformRegistry {
        &mut self.transforms
    }

    /// Build the sink for `spec`.
    pub fn build(&self, spec: &DestinationSpec) -> RelayResult<Arc<dyn Sink>> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| RelayError::UnknownSinkKind {
                destination: spec.name.clone(),
                kind: spec.kind.clone(),
            })?;
        factory(spec, &self.transforms)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
