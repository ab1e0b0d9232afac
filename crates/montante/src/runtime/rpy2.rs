//! R + caret through rpy2, embedded with PyO3.
//!
//! Requires a Python with `rpy2` installed and an R installation with the
//! `caret` and `C50` packages. Call [`initialize()`] once (or let
//! [`Rpy2Runtime::new`] do it) before any R work.
//!
//! # Thread Safety
//!
//! The embedded R interpreter is one per process and is not re-entrant.
//! Only one [`Rpy2Runtime`] may exist at a time; wrap it in a
//! [`RuntimeHandle`](crate::RuntimeHandle) to share it.
//!
//! # Timeouts
//!
//! The remaining deadline budget is handed to R's `setTimeLimit(elapsed = )`
//! for the duration of `train()`. R only checks the limit at interrupt
//! points, so a cancelled [`CancellationToken`](crate::CancellationToken)
//! takes effect before the call starts, not during it.

use std::any::Any;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyList, PyString, PyTuple};
use tracing::{debug, info};

use crate::bridge::{FactorVector, ForeignDataFrame, ForeignVector, Formula};
use crate::cancellation::Deadline;
use crate::error::{MontanteError, Result};
use crate::runtime::{ForeignModel, StatRuntime, TrainControl, check_newdata};
use crate::types::{ColumnSpec, ModelSummary, PrimitiveType, TuningResult};

/// Overrides `R_HOME` for the embedded interpreter.
pub const ENV_R_HOME: &str = "MONTANTE_R_HOME";

const RUNTIME_NAME: &str = "rpy2";

/// Error for bytes that are not a serialized model bundle.
const NOT_A_BUNDLE: &str = "not a serialized rpy2 model";

static INIT_RESULT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

static OWNED: AtomicBool = AtomicBool::new(false);

/// Reads the metadata the core needs back out of a caret `train` object.
const MODEL_INFO_FN: &str = r#"
function(m) {
  num_or <- function(x, n) if (is.null(x)) rep(NA_real_, n) else as.numeric(x)
  res <- m$results
  trials <- if (is.null(res$trials)) integer(0) else as.integer(res$trials)
  list(
    method = as.character(m$method),
    target = all.vars(m$terms)[1],
    predictors = names(m$ptype),
    classes = vapply(m$ptype, function(col) class(col)[1], ""),
    levels = as.character(m$levels),
    metric = as.character(m$metric),
    resampling = as.character(m$control$method),
    trials = trials,
    accuracy = num_or(res$Accuracy, length(trials)),
    kappa = num_or(res$Kappa, length(trials)),
    best = if (is.null(m$bestTune$trials)) NA_integer_ else as.integer(m$bestTune$trials),
    rows = nrow(m$trainingData)
  )
}
"#;

/// Initializes the embedded Python interpreter and loads caret.
///
/// Safe to call from several threads; only the first call does the work and
/// later calls return its cached outcome.
///
/// # Errors
///
/// [`MontanteError::RuntimeInit`] when rpy2, R or caret cannot be loaded.
pub fn initialize() -> Result<()> {
    match INIT_RESULT.get_or_init(do_initialize) {
        Ok(()) => Ok(()),
        Err(msg) => Err(MontanteError::RuntimeInit(msg.clone())),
    }
}

fn do_initialize() -> std::result::Result<(), String> {
    if let Ok(home) = env::var(ENV_R_HOME) {
        // SAFETY: set once, before the interpreter starts and before R reads it.
        unsafe {
            env::set_var("R_HOME", home);
        }
    }

    Python::initialize();

    Python::attach(|py| {
        let ro = py
            .import("rpy2.robjects")
            .map_err(|e| format!("Failed to import rpy2.robjects: {e}"))?;
        ro.getattr("r")
            .and_then(|r| r.call1(("suppressPackageStartupMessages(library(caret))",)))
            .map_err(|e| format!("Failed to load the caret package: {e}"))?;
        Ok(())
    })
}

/// A model living inside the embedded R session.
#[derive(Debug)]
pub struct RModel {
    object: Py<PyAny>,
    summary: ModelSummary,
}

impl ForeignModel for RModel {
    fn runtime(&self) -> &'static str {
        RUNTIME_NAME
    }

    fn engine(&self) -> &str {
        &self.summary.engine
    }

    fn method(&self) -> &str {
        &self.summary.method
    }

    fn target(&self) -> &str {
        &self.summary.target
    }

    fn required_columns(&self) -> &[ColumnSpec] {
        &self.summary.predictors
    }

    fn levels(&self) -> &[String] {
        &self.summary.levels
    }

    fn summary(&self) -> ModelSummary {
        self.summary.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// R + caret runtime.
#[derive(Debug)]
pub struct Rpy2Runtime {
    seed: u64,
}

impl Rpy2Runtime {
    /// Initializes R (once per process) and claims it.
    ///
    /// # Errors
    ///
    /// [`MontanteError::RuntimeInit`] when initialization fails or another
    /// `Rpy2Runtime` is alive.
    pub fn new(seed: u64) -> Result<Self> {
        initialize()?;
        if OWNED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MontanteError::RuntimeInit(
                "the embedded R session already has an owner".to_string(),
            ));
        }
        Ok(Self { seed })
    }
}

impl Drop for Rpy2Runtime {
    fn drop(&mut self) {
        OWNED.store(false, Ordering::Release);
    }
}

fn r_function<'py>(py: Python<'py>, name: &str) -> PyResult<Bound<'py, PyAny>> {
    py.import("rpy2.robjects")?.getattr("r")?.get_item(name)
}

fn to_r_vector<'py>(py: Python<'py>, vector: &ForeignVector) -> PyResult<Bound<'py, PyAny>> {
    let ro = py.import("rpy2.robjects")?;
    let items = PyList::empty(py);
    match vector {
        ForeignVector::Integer(values) => {
            let na = ro.getattr("NA_Integer")?;
            for value in values {
                match value {
                    Some(v) => items.append(*v)?,
                    None => items.append(&na)?,
                }
            }
            ro.getattr("IntVector")?.call1((items,))
        }
        ForeignVector::Double(values) => {
            let na = ro.getattr("NA_Real")?;
            for value in values {
                match value {
                    Some(v) => items.append(*v)?,
                    None => items.append(&na)?,
                }
            }
            ro.getattr("FloatVector")?.call1((items,))
        }
        ForeignVector::Factor(factor) => {
            let na = ro.getattr("NA_Character")?;
            for label in factor.labels() {
                match label {
                    Some(l) => items.append(l)?,
                    None => items.append(&na)?,
                }
            }
            let labels = ro.getattr("StrVector")?.call1((items,))?;
            let levels = ro
                .getattr("StrVector")?
                .call1((PyList::new(py, factor.levels())?,))?;
            let kwargs = PyDict::new(py);
            kwargs.set_item("levels", levels)?;
            ro.getattr("FactorVector")?.call((labels,), Some(&kwargs))
        }
    }
}

fn to_r_dataframe<'py>(py: Python<'py>, data: &ForeignDataFrame) -> PyResult<Bound<'py, PyAny>> {
    let pairs = PyList::empty(py);
    for column in data.columns() {
        let vector = to_r_vector(py, &column.vector)?;
        pairs.append(PyTuple::new(py, [PyString::new(py, &column.name).into_any(), vector])?)?;
    }
    let ordered = py
        .import("rpy2.rlike.container")?
        .getattr("OrdDict")?
        .call1((pairs,))?;
    py.import("rpy2.robjects")?
        .getattr("DataFrame")?
        .call1((ordered,))
}

/// `list(value)` on the Python side.
fn py_list<'py>(value: &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>> {
    value.py().import("builtins")?.getattr("list")?.call1((value,))
}

fn field<'py>(list: &Bound<'py, PyAny>, name: &str) -> PyResult<Bound<'py, PyAny>> {
    list.call_method1("rx2", (name,))
}

fn first_string(list: &Bound<'_, PyAny>, name: &str) -> PyResult<String> {
    field(list, name)?.get_item(0)?.extract()
}

fn describe(py: Python<'_>, object: &Bound<'_, PyAny>, engine: &str) -> Result<ModelSummary> {
    let info = py
        .import("rpy2.robjects")?
        .getattr("r")?
        .call1((MODEL_INFO_FN,))?
        .call1((object,))?;

    let predictors: Vec<String> = py_list(&field(&info, "predictors")?)?.extract()?;
    let classes: Vec<String> = py_list(&field(&info, "classes")?)?.extract()?;
    let predictors = predictors
        .into_iter()
        .zip(classes)
        .map(|(name, class)| {
            let kind = match class.as_str() {
                "integer" => PrimitiveType::Integer,
                "numeric" => PrimitiveType::Float,
                _ => PrimitiveType::Categorical,
            };
            ColumnSpec::new(name, kind)
        })
        .collect();

    let trials: Vec<i32> = py_list(&field(&info, "trials")?)?.extract()?;
    let accuracy: Vec<f64> = py_list(&field(&info, "accuracy")?)?.extract()?;
    let kappa: Vec<f64> = py_list(&field(&info, "kappa")?)?.extract()?;
    let tuning = trials
        .iter()
        .zip(accuracy.iter().zip(&kappa))
        .map(|(&trials, (&accuracy, &kappa))| TuningResult {
            trials: u32::try_from(trials).unwrap_or(0),
            accuracy,
            kappa,
        })
        .collect();
    let best: i32 = field(&info, "best")?.get_item(0)?.extract()?;
    let rows: i64 = field(&info, "rows")?.get_item(0)?.extract()?;

    Ok(ModelSummary {
        engine: engine.to_string(),
        method: first_string(&info, "method")?,
        runtime: RUNTIME_NAME.to_string(),
        target: first_string(&info, "target")?,
        predictors,
        levels: py_list(&field(&info, "levels")?)?.extract()?,
        metric: first_string(&info, "metric")?,
        resampling: first_string(&info, "resampling")?,
        tuning,
        selected_trials: u32::try_from(best).ok().filter(|&b| b > 0),
        training_rows: usize::try_from(rows).unwrap_or(0),
        trained_at: Utc::now(),
    })
}

fn downcast(model: &dyn ForeignModel) -> Result<&RModel> {
    model.as_any().downcast_ref::<RModel>().ok_or_else(|| {
        MontanteError::foreign(format!(
            "model belongs to the '{}' runtime, not '{RUNTIME_NAME}'",
            model.runtime()
        ))
    })
}

/// Resolves the R model and checks `data` has exactly its predictors.
/// caret ignores unknown `newdata` columns on its own.
fn checked_model<'m>(model: &'m dyn ForeignModel, data: &ForeignDataFrame) -> Result<&'m RModel> {
    let model = downcast(model)?;
    check_newdata(model.required_columns(), &data.names())?;
    Ok(model)
}

impl StatRuntime for Rpy2Runtime {
    fn name(&self) -> &'static str {
        RUNTIME_NAME
    }

    fn train(
        &mut self,
        formula: &Formula,
        data: &ForeignDataFrame,
        control: &TrainControl,
        deadline: &Deadline,
    ) -> Result<Arc<dyn ForeignModel>> {
        deadline.check()?;
        let seed = self.seed;

        Python::attach(|py| {
            let ro = py.import("rpy2.robjects")?;
            let frame = to_r_dataframe(py, data)?;
            let r_formula = ro.getattr("Formula")?.call1((formula.to_string(),))?;

            let ctrl_kwargs = PyDict::new(py);
            ctrl_kwargs.set_item("method", control.resampling.method.as_str())?;
            ctrl_kwargs.set_item("number", control.resampling.number)?;
            ctrl_kwargs.set_item("repeats", control.resampling.repeats)?;
            let train_control = r_function(py, "trainControl")?.call((), Some(&ctrl_kwargs))?;

            let kwargs = PyDict::new(py);
            kwargs.set_item("data", &frame)?;
            kwargs.set_item("method", control.method.as_str())?;
            kwargs.set_item("trControl", train_control)?;
            if !control.preprocess.is_empty() {
                let steps = ro
                    .getattr("StrVector")?
                    .call1((PyList::new(py, &control.preprocess)?,))?;
                kwargs.set_item("preProcess", steps)?;
            }
            if let Some(metric) = control.metric {
                kwargs.set_item("metric", metric.as_str())?;
            }

            r_function(py, "set.seed")?.call1((seed as f64,))?;
            let set_time_limit = r_function(py, "setTimeLimit")?;
            if let Some(left) = deadline.remaining() {
                let limit = PyDict::new(py);
                limit.set_item("elapsed", left.as_secs_f64())?;
                limit.set_item("transient", true)?;
                set_time_limit.call((), Some(&limit))?;
            }

            debug!("Calling caret::train for {}", formula);
            let trained = r_function(py, "train")?.call((r_formula,), Some(&kwargs));

            let reset = PyDict::new(py);
            reset.set_item("elapsed", f64::INFINITY)?;
            set_time_limit.call((), Some(&reset))?;

            let trained = trained.map_err(|e| {
                let message = e.to_string();
                if message.contains("elapsed time limit") {
                    deadline.timeout_error()
                } else {
                    MontanteError::ForeignRuntime(message)
                }
            })?;

            let summary = describe(py, &trained, &control.engine)?;
            info!(
                "caret selected {} trial(s) for {}",
                summary.selected_trials.unwrap_or(0),
                formula
            );
            Ok(Arc::new(RModel {
                object: trained.unbind(),
                summary,
            }) as Arc<dyn ForeignModel>)
        })
    }

    fn predict(&mut self, model: &dyn ForeignModel, data: &ForeignDataFrame) -> Result<ForeignVector> {
        let model = checked_model(model, data)?;
        Python::attach(|py| {
            let frame = to_r_dataframe(py, data)?;
            let kwargs = PyDict::new(py);
            kwargs.set_item("newdata", frame)?;
            kwargs.set_item("type", "raw")?;
            let predicted = r_function(py, "predict")?
                .call((model.object.bind(py),), Some(&kwargs))
                .map_err(|e| MontanteError::ForeignRuntime(e.to_string()))?;

            let factor_class = py.import("rpy2.robjects")?.getattr("FactorVector")?;
            if !predicted.is_instance(&factor_class)? {
                return Err(MontanteError::foreign("prediction is not a factor"));
            }
            let codes: Vec<i32> = py_list(&predicted)?.extract()?;
            let levels: Vec<String> = py_list(&predicted.getattr("levels")?)?.extract()?;
            let codes = codes
                .into_iter()
                .map(|c| if c == i32::MIN { None } else { u32::try_from(c).ok() })
                .collect();
            Ok(ForeignVector::Factor(FactorVector::new(codes, levels)))
        })
    }

    fn serialize(&mut self, model: &dyn ForeignModel) -> Result<Vec<u8>> {
        let model = downcast(model)?;
        Python::attach(|py| {
            let null = py.import("rpy2.robjects")?.getattr("NULL")?;
            let bundle = PyDict::new(py);
            bundle.set_item("engine", model.engine())?;
            bundle.set_item("model", model.object.bind(py))?;
            let bundle = r_function(py, "list")?.call((), Some(&bundle))?;
            let raw = r_function(py, "serialize")?.call1((bundle, null))?;
            let bytes = py.import("builtins")?.getattr("bytes")?.call1((raw,))?;
            Ok(bytes.extract::<Vec<u8>>()?)
        })
    }

    fn unserialize(&mut self, bytes: &[u8]) -> Result<Arc<dyn ForeignModel>> {
        Python::attach(|py| {
            let raw = py
                .import("rpy2.robjects")?
                .getattr("ByteVector")?
                .call1((PyBytes::new(py, bytes),))?;
            let bundle = r_function(py, "unserialize")?
                .call1((raw,))
                .map_err(|e| MontanteError::ForeignRuntime(e.to_string()))?;
            let engine =
                first_string(&bundle, "engine").map_err(|_| MontanteError::foreign(NOT_A_BUNDLE))?;
            let object = field(&bundle, "model").map_err(|_| MontanteError::foreign(NOT_A_BUNDLE))?;
            let summary = describe(py, &object, &engine)?;
            Ok(Arc::new(RModel {
                object: object.unbind(),
                summary,
            }) as Arc<dyn ForeignModel>)
        })
    }
}
