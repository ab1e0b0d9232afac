//! The foreign statistical runtime and the guard around it.
//!
//! A runtime is anything implementing [`StatRuntime`]: it fits models from a
//! [`Formula`] and a [`ForeignDataFrame`], predicts, and (un)serializes its
//! models. Two implementations ship with the crate:
//!
//! - [`NativeRuntime`]: an in-process, caret-like trainer (always available)
//! - `Rpy2Runtime`: R + caret through rpy2 (`rpy2` feature)
//!
//! # Thread Safety
//!
//! Runtimes are not assumed to be re-entrant. [`RuntimeHandle`] owns the
//! runtime behind a mutex, so at most one call executes inside it at any
//! time. Handles are cheap to clone and every clone shares the same guard.
//! Each call takes a [`Deadline`] that bounds both the wait for the guard
//! and the call itself.
//!
//! ```
//! use montante::{Deadline, RuntimeHandle};
//! use montante::bridge::{build_formula, ForeignColumn, ForeignDataFrame, ForeignVector, FactorVector};
//! use montante::runtime::{Resampling, ResamplingMethod, TrainControl};
//!
//! let runtime = RuntimeHandle::native(42);
//! let frame = ForeignDataFrame::new(vec![
//!     ForeignColumn { name: "x".into(), vector: ForeignVector::Double((0..20).map(|i| Some(i as f64)).collect()) },
//!     ForeignColumn {
//!         name: "y".into(),
//!         vector: ForeignVector::Factor(FactorVector::from_labels((0..20).map(|i| Some(if i < 10 { "lo" } else { "hi" })))),
//!     },
//! ]).unwrap();
//! let control = TrainControl {
//!     engine: "caret".into(),
//!     method: "C5.0".into(),
//!     metric: None,
//!     preprocess: vec![],
//!     resampling: Resampling { method: ResamplingMethod::None, number: 1, repeats: 1 },
//! };
//! let formula = build_formula("y", &["x"]).unwrap();
//! let model = runtime.train(&formula, &frame, &control, &Deadline::none()).unwrap();
//! assert_eq!(model.levels(), ["hi", "lo"]);
//! ```

mod control;
pub mod native;
#[cfg(feature = "rpy2")]
pub mod rpy2;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::bridge::{ForeignDataFrame, ForeignVector, Formula};
use crate::cancellation::Deadline;
use crate::error::{MontanteError, Result};
use crate::types::{ColumnSpec, ModelSummary};

pub use control::{Metric, Resampling, ResamplingMethod, TrainControl};
pub use native::{NativeModel, NativeRuntime, Preprocessor};

/// How long a waiting caller sleeps on the guard between deadline checks.
const LOCK_POLL: Duration = Duration::from_millis(25);

/// A model object owned by a runtime.
///
/// The core only reads the metadata below. Anything that touches the
/// runtime itself (predict, serialize) goes through [`RuntimeHandle`].
pub trait ForeignModel: Send + Sync + fmt::Debug {
    /// Name of the runtime that produced the model.
    fn runtime(&self) -> &'static str;
    /// Engine id, e.g. `caret`.
    fn engine(&self) -> &str;
    /// Engine method, e.g. `C5.0`.
    fn method(&self) -> &str;
    /// Response column.
    fn target(&self) -> &str;
    /// Predictor columns the model needs at prediction time.
    fn required_columns(&self) -> &[ColumnSpec];
    /// Class levels of the response.
    fn levels(&self) -> &[String];
    /// Descriptive summary.
    fn summary(&self) -> ModelSummary;
    /// Downcasting support for the owning runtime.
    fn as_any(&self) -> &dyn Any;
}

/// A foreign statistical runtime.
///
/// Implementations may assume calls never overlap; [`RuntimeHandle`]
/// guarantees it.
pub trait StatRuntime: Send {
    /// Short runtime name (`native`, `rpy2`).
    fn name(&self) -> &'static str;

    /// Fits a model. Long-running implementations should call
    /// [`Deadline::check`] periodically.
    fn train(
        &mut self,
        formula: &Formula,
        data: &ForeignDataFrame,
        control: &TrainControl,
        deadline: &Deadline,
    ) -> Result<Arc<dyn ForeignModel>>;

    /// Predicts class labels (`type = "raw"`) for every row of `data`.
    fn predict(&mut self, model: &dyn ForeignModel, data: &ForeignDataFrame) -> Result<ForeignVector>;

    /// Serializes a model with the runtime's native format.
    fn serialize(&mut self, model: &dyn ForeignModel) -> Result<Vec<u8>>;

    /// Restores a model from [`serialize`](Self::serialize) output.
    fn unserialize(&mut self, bytes: &[u8]) -> Result<Arc<dyn ForeignModel>>;
}

/// Fails with [`ForeignRuntime`](crate::MontanteError::ForeignRuntime) unless
/// `names` are exactly the predictors in `required`, in any order.
///
/// Runtimes call this before touching new data, so a missing or unexpected
/// column is reported the same way whichever runtime owns the model.
pub(crate) fn check_newdata<S: AsRef<str>>(required: &[ColumnSpec], names: &[S]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| !names.iter().any(|n| n.as_ref() == *name))
        .collect();
    if !missing.is_empty() {
        return Err(MontanteError::foreign(format!(
            "object '{}' not found",
            missing.join("', '")
        )));
    }
    let extra: Vec<&str> = names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !required.iter().any(|c| c.name == *name))
        .collect();
    if !extra.is_empty() {
        return Err(MontanteError::foreign(format!(
            "variables not used by the model: '{}'",
            extra.join("', '")
        )));
    }
    Ok(())
}

/// Opaque handle to a trained model.
///
/// Immutable and cheap to clone; may be shared by many prediction calls.
#[derive(Clone)]
pub struct TrainedModel {
    inner: Arc<dyn ForeignModel>,
}

static_assertions::assert_impl_all!(TrainedModel: Send, Sync);

impl TrainedModel {
    /// Wraps a runtime model.
    #[must_use]
    pub fn new(inner: Arc<dyn ForeignModel>) -> Self {
        Self { inner }
    }

    /// Name of the owning runtime.
    #[must_use]
    pub fn runtime(&self) -> &'static str {
        self.inner.runtime()
    }

    /// Engine id.
    #[must_use]
    pub fn engine(&self) -> &str {
        self.inner.engine()
    }

    /// Engine method.
    #[must_use]
    pub fn method(&self) -> &str {
        self.inner.method()
    }

    /// Response column.
    #[must_use]
    pub fn target(&self) -> &str {
        self.inner.target()
    }

    /// Predictor column signature.
    #[must_use]
    pub fn required_columns(&self) -> &[ColumnSpec] {
        self.inner.required_columns()
    }

    /// Class levels.
    #[must_use]
    pub fn levels(&self) -> &[String] {
        self.inner.levels()
    }

    /// Descriptive summary.
    #[must_use]
    pub fn summary(&self) -> ModelSummary {
        self.inner.summary()
    }

    /// The runtime-level model object.
    #[must_use]
    pub fn foreign(&self) -> &dyn ForeignModel {
        self.inner.as_ref()
    }
}

impl fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedModel")
            .field("runtime", &self.runtime())
            .field("engine", &self.engine())
            .field("method", &self.method())
            .field("target", &self.target())
            .field("predictors", &self.required_columns().len())
            .finish()
    }
}

/// Single owner of a runtime; serializes every call into it.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<Mutex<Box<dyn StatRuntime>>>,
    name: &'static str,
}

static_assertions::assert_impl_all!(RuntimeHandle: Send, Sync);

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("runtime", &self.name)
            .field("busy", &self.inner.is_locked())
            .finish()
    }
}

impl RuntimeHandle {
    /// Takes ownership of a runtime.
    pub fn new<R: StatRuntime + 'static>(runtime: R) -> Self {
        let name = runtime.name();
        Self {
            inner: Arc::new(Mutex::new(Box::new(runtime))),
            name,
        }
    }

    /// A handle over a [`NativeRuntime`] seeded with `seed`.
    #[must_use]
    pub fn native(seed: u64) -> Self {
        Self::new(NativeRuntime::new(seed))
    }

    /// Name of the owned runtime.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the guard, giving up when `deadline` passes or is cancelled.
    fn acquire(&self, deadline: &Deadline) -> Result<MutexGuard<'_, Box<dyn StatRuntime>>> {
        loop {
            deadline.check()?;
            let wait = deadline.remaining().map_or(LOCK_POLL, |left| left.min(LOCK_POLL));
            if let Some(guard) = self.inner.try_lock_for(wait) {
                return Ok(guard);
            }
        }
    }

    /// Fits a model inside the guard.
    ///
    /// # Errors
    ///
    /// [`TrainingTimeout`](crate::MontanteError::TrainingTimeout) or
    /// [`Cancelled`](crate::MontanteError::Cancelled) when the deadline stops
    /// the call, otherwise whatever the runtime raises.
    pub fn train(
        &self,
        formula: &Formula,
        data: &ForeignDataFrame,
        control: &TrainControl,
        deadline: &Deadline,
    ) -> Result<TrainedModel> {
        let mut runtime = self.acquire(deadline)?;
        debug!(runtime = self.name, %formula, rows = data.nrow(), "training");
        let model = runtime.train(formula, data, control, deadline)?;
        Ok(TrainedModel::new(model))
    }

    /// Predicts inside the guard, waiting as long as needed.
    pub fn predict(&self, model: &TrainedModel, data: &ForeignDataFrame) -> Result<ForeignVector> {
        self.predict_with_deadline(model, data, &Deadline::none())
    }

    /// Predicts inside the guard, giving up waiting at `deadline`.
    pub fn predict_with_deadline(
        &self,
        model: &TrainedModel,
        data: &ForeignDataFrame,
        deadline: &Deadline,
    ) -> Result<ForeignVector> {
        let mut runtime = self.acquire(deadline)?;
        debug!(runtime = self.name, rows = data.nrow(), "predicting");
        runtime.predict(model.foreign(), data)
    }

    /// Serializes a model with the runtime's native format.
    pub fn serialize(&self, model: &TrainedModel) -> Result<Vec<u8>> {
        let mut runtime = self.acquire(&Deadline::none())?;
        runtime.serialize(model.foreign())
    }

    /// Restores a model serialized by the same kind of runtime.
    pub fn unserialize(&self, bytes: &[u8]) -> Result<TrainedModel> {
        let mut runtime = self.acquire(&Deadline::none())?;
        Ok(TrainedModel::new(runtime.unserialize(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{FactorVector, ForeignColumn, build_formula};
    use crate::error::MontanteError;
    use crate::types::PrimitiveType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Records how many calls are inside the runtime at once.
    struct StubRuntime {
        inside: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        hold: Duration,
    }

    #[derive(Debug)]
    struct StubModel;

    impl ForeignModel for StubModel {
        fn runtime(&self) -> &'static str {
            "stub"
        }
        fn engine(&self) -> &str {
            "stub"
        }
        fn method(&self) -> &str {
            "stub"
        }
        fn target(&self) -> &str {
            "y"
        }
        fn required_columns(&self) -> &[ColumnSpec] {
            &[]
        }
        fn levels(&self) -> &[String] {
            &[]
        }
        fn summary(&self) -> ModelSummary {
            unreachable!("not used by these tests")
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl StubRuntime {
        fn enter(&self) {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }
        fn leave(&self) {
            self.inside.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl StatRuntime for StubRuntime {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn train(
            &mut self,
            _formula: &Formula,
            _data: &ForeignDataFrame,
            _control: &TrainControl,
            deadline: &Deadline,
        ) -> Result<Arc<dyn ForeignModel>> {
            self.enter();
            let started = Instant::now();
            let outcome = loop {
                if let Err(e) = deadline.check() {
                    break Err(e);
                }
                if started.elapsed() >= self.hold {
                    break Ok(Arc::new(StubModel) as Arc<dyn ForeignModel>);
                }
                thread::sleep(Duration::from_millis(2));
            };
            self.leave();
            outcome
        }

        fn predict(&mut self, _model: &dyn ForeignModel, data: &ForeignDataFrame) -> Result<ForeignVector> {
            self.enter();
            thread::sleep(self.hold);
            self.leave();
            Ok(ForeignVector::Factor(FactorVector::new(
                vec![Some(1); data.nrow()],
                vec!["a".into()],
            )))
        }

        fn serialize(&mut self, _model: &dyn ForeignModel) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn unserialize(&mut self, _bytes: &[u8]) -> Result<Arc<dyn ForeignModel>> {
            Ok(Arc::new(StubModel))
        }
    }

    fn stub_runtime(hold: Duration) -> (RuntimeHandle, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let handle = RuntimeHandle::new(StubRuntime {
            inside: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
            hold,
        });
        (handle, peak)
    }

    fn tiny_frame() -> ForeignDataFrame {
        ForeignDataFrame::new(vec![ForeignColumn {
            name: "x".into(),
            vector: ForeignVector::Integer(vec![Some(1), Some(2)]),
        }])
        .unwrap()
    }

    fn control() -> TrainControl {
        TrainControl {
            engine: "stub".into(),
            method: "stub".into(),
            metric: None,
            preprocess: vec![],
            resampling: Resampling {
                method: ResamplingMethod::None,
                number: 1,
                repeats: 1,
            },
        }
    }

    #[test]
    fn test_newdata_must_match_predictors() {
        let required = [
            ColumnSpec::new("x", PrimitiveType::Float),
            ColumnSpec::new("z", PrimitiveType::Categorical),
        ];
        assert!(check_newdata(&required, &["z", "x"]).is_ok());

        match check_newdata(&required, &["x"]) {
            Err(MontanteError::ForeignRuntime(message)) => assert_eq!(message, "object 'z' not found"),
            other => panic!("expected a runtime error, got {other:?}"),
        }
        match check_newdata(&required, &["x", "z", "flag", "w"]) {
            Err(MontanteError::ForeignRuntime(message)) => {
                assert_eq!(message, "variables not used by the model: 'flag', 'w'");
            }
            other => panic!("expected a runtime error, got {other:?}"),
        }
        assert!(check_newdata(&[], &[] as &[&str]).is_ok());
    }

    #[test]
    fn test_calls_never_overlap() {
        let (handle, peak) = stub_runtime(Duration::from_millis(10));
        let model = TrainedModel::new(Arc::new(StubModel));
        let frame = tiny_frame();

        thread::scope(|scope| {
            for _ in 0..6 {
                let handle = handle.clone();
                let model = model.clone();
                let frame = &frame;
                scope.spawn(move || {
                    handle.predict(&model, frame).unwrap();
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_training_times_out_inside_runtime() {
        let (handle, _) = stub_runtime(Duration::from_secs(5));
        let formula = build_formula("y", &["x"]).unwrap();
        let result = handle.train(
            &formula,
            &tiny_frame(),
            &control(),
            &Deadline::after(Duration::from_millis(30)),
        );
        assert!(matches!(result, Err(MontanteError::TrainingTimeout(_))));
    }

    #[test]
    fn test_training_times_out_waiting_for_guard() {
        let (handle, _) = stub_runtime(Duration::from_millis(300));
        let model = TrainedModel::new(Arc::new(StubModel));
        let frame = tiny_frame();
        let formula = build_formula("y", &["x"]).unwrap();

        thread::scope(|scope| {
            let busy = handle.clone();
            let frame_ref = &frame;
            let model_ref = &model;
            scope.spawn(move || busy.predict(model_ref, frame_ref).unwrap());
            thread::sleep(Duration::from_millis(50));

            let result = handle.train(
                &formula,
                &frame,
                &control(),
                &Deadline::after(Duration::from_millis(40)),
            );
            assert!(matches!(result, Err(MontanteError::TrainingTimeout(_))));
        });

        // the runtime is still usable afterwards
        assert_eq!(handle.predict(&model, &frame).unwrap().len(), 2);
    }

    #[test]
    fn test_cancelled_training() {
        let (handle, _) = stub_runtime(Duration::from_secs(5));
        let token = crate::CancellationToken::new();
        token.cancel();
        let formula = build_formula("y", &["x"]).unwrap();
        let result = handle.train(
            &formula,
            &tiny_frame(),
            &control(),
            &Deadline::none().with_token(token),
        );
        assert!(matches!(result, Err(MontanteError::Cancelled)));
    }
}
