//! Training engines and the registry that resolves them by id.
//!
//! An [`Engine`] contributes everything that varies per backend: the
//! `engine-parameters` sub-schema for each of its methods, the translation
//! of validated parameters into a [`TrainControl`], and the train/predict
//! calls. Engines are registered once in an [`EngineRegistry`]; adding an
//! engine is a registration, never a new branch in the dispatchers.
//!
//! ```
//! use montante::engine::{EngineRegistry, CARET_ENGINE};
//!
//! let registry = EngineRegistry::with_default_engines();
//! let caret = registry.resolve(CARET_ENGINE).unwrap();
//! assert!(caret.supports("C5.0"));
//! assert!(registry.resolve("xgboost").is_err());
//! ```

mod caret;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bridge::{ForeignDataBridge, ForeignDataFrame, Formula};
use crate::cancellation::Deadline;
use crate::error::{MontanteError, Result};
use crate::runtime::{TrainControl, TrainedModel};
use crate::types::PredictionPair;

pub use caret::{CARET_ENGINE, CARET_METHODS, CaretEngine};

/// A training backend.
pub trait Engine: Send + Sync + fmt::Debug {
    /// Id used in the payload's `engine` field.
    fn id(&self) -> &'static str;

    /// Whether composing a schema needs a method sub-selector.
    fn requires_method(&self) -> bool {
        true
    }

    /// Registered methods.
    fn methods(&self) -> &[&'static str];

    /// `true` if `method` is registered.
    fn supports(&self, method: &str) -> bool {
        self.methods().contains(&method)
    }

    /// The `engine-parameters` sub-schema. Only called with a supported
    /// method, or with `None` when [`requires_method`](Self::requires_method)
    /// is `false`.
    fn parameters_schema(&self, method: Option<&str>) -> Value;

    /// Turns validated `engine-parameters` into runtime settings.
    fn training_control(&self, parameters: &Value) -> Result<TrainControl>;

    /// Fits a model through the bridge.
    fn train(
        &self,
        bridge: &ForeignDataBridge,
        formula: &Formula,
        data: &ForeignDataFrame,
        control: &TrainControl,
        deadline: &Deadline,
    ) -> Result<TrainedModel> {
        bridge.train(formula, data, control, deadline)
    }

    /// Predicts class labels through the bridge.
    fn predict(
        &self,
        bridge: &ForeignDataBridge,
        model: &TrainedModel,
        data: &ForeignDataFrame,
    ) -> Result<Vec<PredictionPair>> {
        bridge.predict_pairs(model, data)
    }
}

/// Engines by id, in registration order.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn Engine>>,
}

impl EngineRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every engine shipped with the crate.
    #[must_use]
    pub fn with_default_engines() -> Self {
        Self::new().with_engine(CaretEngine)
    }

    /// Adds an engine, replacing any engine registered under the same id.
    #[must_use]
    pub fn with_engine<E: Engine + 'static>(mut self, engine: E) -> Self {
        self.register(Arc::new(engine));
        self
    }

    /// Adds an engine, replacing any engine registered under the same id.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        match self.engines.iter_mut().find(|e| e.id() == engine.id()) {
            Some(slot) => *slot = engine,
            None => self.engines.push(engine),
        }
    }

    /// Looks an engine up.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&dyn Engine> {
        self.engines
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.as_ref())
    }

    /// Looks an engine up, failing with [`MontanteError::UnknownEngine`].
    pub fn resolve(&self, id: &str) -> Result<&dyn Engine> {
        self.get(id)
            .ok_or_else(|| MontanteError::UnknownEngine(id.to_string()))
    }

    /// Registered ids.
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.id()).collect()
    }
}
