//! One-stop entry point wiring configuration, engines, runtime and storage.

use std::fmt;
use std::sync::Arc;

use polars::prelude::DataFrame;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::config::MontanteConfig;
use crate::dispatch::{PredictionDispatcher, TrainingDispatcher, TrainingOutcome};
use crate::engine::EngineRegistry;
use crate::error::Result;
use crate::runtime::{RuntimeHandle, TrainedModel};
use crate::schema::Schema;
use crate::source::DataSource;
use crate::store::ModelStore;
use crate::types::PredictionPair;
use crate::validator::ValidationError;

/// Trains, predicts, saves and loads models.
///
/// # Example
///
/// ```
/// use montante::Montante;
///
/// let montante = Montante::builder().build().unwrap();
/// let schema = montante.training_schema("caret", Some("C5.0")).unwrap();
/// assert_eq!(schema.as_value()["required"][2], "engine-parameters");
/// ```
#[derive(Clone)]
pub struct Montante {
    config: MontanteConfig,
    runtime: RuntimeHandle,
    training: TrainingDispatcher,
    prediction: PredictionDispatcher,
    store: ModelStore,
}

impl fmt::Debug for Montante {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Montante")
            .field("config", &self.config)
            .field("runtime", &self.runtime.name())
            .field("engines", &self.training.composer().registry().ids())
            .finish()
    }
}

impl Montante {
    /// Create a new builder for `Montante`.
    #[must_use]
    pub fn builder() -> MontanteBuilder {
        MontanteBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MontanteConfig {
        &self.config
    }

    /// The guarded runtime.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// The training schema for `engine` and `method`.
    pub fn training_schema(&self, engine: &str, method: Option<&str>) -> Result<Schema> {
        self.training
            .composer()
            .compose_training_schema(engine, method)
    }

    /// The prediction schema for `model`.
    #[must_use]
    pub fn prediction_schema(&self, model: &TrainedModel) -> Schema {
        self.training.composer().prediction_schema_for(model)
    }

    /// Validates a training payload without training.
    pub fn validate(&self, payload: &Value) -> Result<Vec<ValidationError>> {
        self.training.validate_payload(payload)
    }

    /// See [`TrainingDispatcher::train`].
    pub fn train(&self, dataset: &DataFrame, payload: &Value) -> Result<TrainingOutcome> {
        self.training.train(dataset, payload)
    }

    /// See [`TrainingDispatcher::train_with_token`].
    pub fn train_with_token(
        &self,
        dataset: &DataFrame,
        payload: &Value,
        token: CancellationToken,
    ) -> Result<TrainingOutcome> {
        self.training.train_with_token(dataset, payload, token)
    }

    /// See [`TrainingDispatcher::train_source`].
    pub fn train_source<D: DataSource + ?Sized>(
        &self,
        source: &D,
        payload: &Value,
    ) -> Result<TrainingOutcome> {
        self.training.train_source(source, payload)
    }

    /// See [`PredictionDispatcher::predict`].
    pub fn predict(&self, model: &TrainedModel, request: &Value) -> Result<Vec<PredictionPair>> {
        self.prediction.predict(model, request)
    }

    /// See [`PredictionDispatcher::predict_dataset`].
    pub fn predict_dataset(
        &self,
        model: &TrainedModel,
        dataset: &DataFrame,
    ) -> Result<Vec<PredictionPair>> {
        self.prediction.predict_dataset(model, dataset)
    }

    /// Stores `model` and returns its id.
    pub fn save_model(&self, model: &TrainedModel) -> Result<Uuid> {
        self.store.save(model)
    }

    /// Loads a stored model.
    pub fn load_model(&self, id: &Uuid) -> Result<TrainedModel> {
        self.store.load(id)
    }

    /// The model store.
    #[must_use]
    pub fn store(&self) -> &ModelStore {
        &self.store
    }
}

/// Builder for [`Montante`].
///
/// Every part is optional: the configuration defaults to
/// [`MontanteConfig::default`], the engines to
/// [`EngineRegistry::with_default_engines`] and the runtime to a
/// [`NativeRuntime`](crate::runtime::NativeRuntime) seeded from the
/// configuration.
#[derive(Debug, Default)]
pub struct MontanteBuilder {
    config: Option<MontanteConfig>,
    registry: Option<EngineRegistry>,
    runtime: Option<RuntimeHandle>,
}

impl MontanteBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: MontanteConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the engine registry.
    #[must_use]
    pub fn registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the runtime.
    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeHandle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Wires everything together.
    ///
    /// # Errors
    ///
    /// Returns [`MontanteError::UnknownEngine`](crate::MontanteError::UnknownEngine)
    /// when the configured default engine is not registered.
    pub fn build(self) -> Result<Montante> {
        let config = self.config.unwrap_or_default();
        let registry = Arc::new(
            self.registry
                .unwrap_or_else(EngineRegistry::with_default_engines),
        );
        registry.resolve(&config.default_engine)?;
        let runtime = self
            .runtime
            .unwrap_or_else(|| RuntimeHandle::native(config.random_seed));
        debug!("Montante ready: runtime {}, engines {:?}", runtime.name(), registry.ids());

        Ok(Montante {
            training: TrainingDispatcher::new(registry.clone(), runtime.clone(), config.clone()),
            prediction: PredictionDispatcher::new(registry, runtime.clone())
                .strict(config.strict_prediction_columns),
            store: ModelStore::from_config(&config, runtime.clone()),
            runtime,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MontanteError;

    #[test]
    fn test_builder_defaults() {
        let montante = Montante::builder().build().unwrap();
        assert_eq!(montante.runtime().name(), "native");
        assert_eq!(montante.config().default_engine, "caret");
    }

    #[test]
    fn test_builder_rejects_unregistered_default_engine() {
        let config = MontanteConfig::builder()
            .default_engine("weka")
            .build()
            .unwrap();
        let result = Montante::builder().config(config).build();
        assert!(matches!(result, Err(MontanteError::UnknownEngine(_))));
    }

    #[test]
    fn test_training_schema_errors() {
        let montante = Montante::builder().build().unwrap();
        assert!(montante.training_schema("caret", None).is_err());
    }
}
