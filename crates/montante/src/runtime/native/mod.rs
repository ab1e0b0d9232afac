//! In-process runtime with a caret-like `train()` for C5.0 classifiers.
//!
//! Training mirrors what `caret::train(formula, data, method = "C5.0")` does:
//!
//! 1. Checks the response is a factor and nothing is missing (`na.fail`)
//! 2. Fits the requested preprocessing on the predictors
//! 3. Resamples the data per [`Resampling`] and scores each boosting
//!    candidate (`trials` 1, 10 and 20) on the held-out rows
//! 4. Picks the candidate with the best mean metric (fewest trials on ties)
//!    and refits it on all rows
//!
//! Models serialize as a short magic header followed by JSON.

mod metrics;
mod preprocess;
mod resample;
mod tree;

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bridge::{FactorVector, ForeignDataFrame, ForeignVector, Formula};
use crate::cancellation::Deadline;
use crate::error::{MontanteError, Result};
use crate::runtime::{
    ForeignModel, Metric, ResamplingMethod, StatRuntime, TrainControl, check_newdata,
};
use crate::types::{ColumnSpec, ModelSummary, PrimitiveType, TuningResult};

use self::metrics::{accuracy, finite_mean, kappa};
use self::resample::Resampler;
use self::tree::{Design, Ensemble, Feature};

pub use self::preprocess::{ColumnTransform, PREPROCESS_METHODS, Preprocessor};

/// The one method this runtime fits.
pub const NATIVE_METHOD: &str = "C5.0";

/// Boosting trials tried during tuning.
pub const TRIALS_GRID: [u32; 3] = [1, 10, 20];

const MODEL_MAGIC: &[u8] = b"MONTANTE-NATIVE/1\n";

/// Raised for infinite predictor values; split thresholds must stay finite.
const INFINITE_VALUES: &str = "infinite values in object";

/// Runtime name reported by [`NativeRuntime`] and its models.
const RUNTIME_NAME: &str = "native";

/// In-process statistical runtime.
///
/// Deterministic for a given seed: every training call draws its resamples
/// from a fresh generator seeded with it.
#[derive(Debug, Clone)]
pub struct NativeRuntime {
    seed: u64,
}

impl NativeRuntime {
    /// Creates a runtime seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// The resampling seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// A C5.0-style model fitted by [`NativeRuntime`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeModel {
    engine: String,
    method: String,
    target: String,
    predictors: Vec<ColumnSpec>,
    /// Level tables of categorical predictors, by predictor position.
    predictor_levels: Vec<Option<Vec<String>>>,
    levels: Vec<String>,
    preprocessor: Preprocessor,
    ensemble: Ensemble,
    trials: u32,
    metric: Metric,
    resampling: ResamplingMethod,
    tuning: Vec<TuningResult>,
    training_rows: usize,
    trained_at: DateTime<Utc>,
}

impl NativeModel {
    /// Boosting trials of the final model.
    #[must_use]
    pub fn trials(&self) -> u32 {
        self.trials
    }

    /// Resampled performance of every candidate.
    #[must_use]
    pub fn tuning(&self) -> &[TuningResult] {
        &self.tuning
    }

    /// The fitted preprocessing.
    #[must_use]
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Graphviz DOT rendering of the first tree.
    ///
    /// ```
    /// # use montante::{Deadline, RuntimeHandle};
    /// # use montante::bridge::{build_formula, FactorVector, ForeignColumn, ForeignDataFrame, ForeignVector};
    /// # use montante::runtime::{NativeModel, Resampling, ResamplingMethod, TrainControl};
    /// # let frame = ForeignDataFrame::new(vec![
    /// #     ForeignColumn { name: "x".into(), vector: ForeignVector::Double((0..20).map(|i| Some(i as f64)).collect()) },
    /// #     ForeignColumn { name: "y".into(), vector: ForeignVector::Factor(FactorVector::from_labels((0..20).map(|i| Some(if i < 10 { "lo" } else { "hi" })))) },
    /// # ]).unwrap();
    /// # let control = TrainControl { engine: "caret".into(), method: "C5.0".into(), metric: None, preprocess: vec![],
    /// #     resampling: Resampling { method: ResamplingMethod::None, number: 1, repeats: 1 } };
    /// let model = RuntimeHandle::native(1)
    ///     .train(&build_formula("y", &["x"]).unwrap(), &frame, &control, &Deadline::none())
    ///     .unwrap();
    /// let native = model.foreign().as_any().downcast_ref::<NativeModel>().unwrap();
    /// assert!(native.to_dot().unwrap().starts_with("digraph"));
    /// ```
    #[must_use]
    pub fn to_dot(&self) -> Option<String> {
        let names: Vec<String> = self.predictors.iter().map(|p| p.name.clone()).collect();
        self.ensemble
            .first_tree()
            .map(|tree| tree.to_dot(&names, &self.predictor_levels, &self.levels))
    }

    /// Encodes `data` for the trees, checking it matches the training
    /// signature exactly.
    fn encode(&self, data: &ForeignDataFrame) -> Result<Vec<Feature>> {
        check_newdata(&self.predictors, &data.names())?;
        if data.columns().iter().any(|c| c.vector.na_count() > 0) {
            return Err(MontanteError::foreign("missing values in object"));
        }
        if data.columns().iter().any(|c| c.vector.infinite_count() > 0) {
            return Err(MontanteError::foreign(INFINITE_VALUES));
        }

        let data = data.select(
            &self
                .predictors
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>(),
        )?;
        for (spec, column) in self.predictors.iter().zip(data.columns()) {
            let compatible = match spec.kind {
                PrimitiveType::Integer => matches!(column.vector, ForeignVector::Integer(_)),
                PrimitiveType::Float => !matches!(column.vector, ForeignVector::Factor(_)),
                PrimitiveType::Categorical => matches!(column.vector, ForeignVector::Factor(_)),
            };
            if !compatible {
                return Err(MontanteError::foreign(format!(
                    "variable '{}' was fitted with type \"{}\" but \"{}\" was supplied",
                    spec.name,
                    spec.kind,
                    column.vector.class_name()
                )));
            }
        }

        let data = self.preprocessor.apply(&data)?;
        Ok(data
            .columns()
            .iter()
            .zip(&self.predictor_levels)
            .map(|(column, levels)| match (&column.vector, levels) {
                (ForeignVector::Factor(factor), Some(levels)) => recode(factor, levels),
                (vector, _) => numeric_feature(vector),
            })
            .collect())
    }

    fn predict_frame(&self, data: &ForeignDataFrame) -> Result<ForeignVector> {
        let features = self.encode(data)?;
        let codes = (0..data.nrow())
            .map(|row| Some(self.ensemble.predict(&features, row, self.trials) as u32 + 1))
            .collect();
        Ok(ForeignVector::Factor(FactorVector::new(
            codes,
            self.levels.clone(),
        )))
    }
}

impl ForeignModel for NativeModel {
    fn runtime(&self) -> &'static str {
        RUNTIME_NAME
    }

    fn engine(&self) -> &str {
        &self.engine
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn required_columns(&self) -> &[ColumnSpec] {
        &self.predictors
    }

    fn levels(&self) -> &[String] {
        &self.levels
    }

    fn summary(&self) -> ModelSummary {
        ModelSummary {
            engine: self.engine.clone(),
            method: self.method.clone(),
            runtime: RUNTIME_NAME.to_string(),
            target: self.target.clone(),
            predictors: self.predictors.clone(),
            levels: self.levels.clone(),
            metric: self.metric.as_str().to_string(),
            resampling: self.resampling.as_str().to_string(),
            tuning: self.tuning.clone(),
            selected_trials: Some(self.trials),
            training_rows: self.training_rows,
            trained_at: self.trained_at,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl StatRuntime for NativeRuntime {
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
        let model = fit(formula, data, control, self.seed, deadline)?;
        Ok(Arc::new(model))
    }

    fn predict(&mut self, model: &dyn ForeignModel, data: &ForeignDataFrame) -> Result<ForeignVector> {
        downcast(model)?.predict_frame(data)
    }

    fn serialize(&mut self, model: &dyn ForeignModel) -> Result<Vec<u8>> {
        let mut bytes = MODEL_MAGIC.to_vec();
        serde_json::to_writer(&mut bytes, downcast(model)?)?;
        Ok(bytes)
    }

    fn unserialize(&mut self, bytes: &[u8]) -> Result<Arc<dyn ForeignModel>> {
        let body = bytes
            .strip_prefix(MODEL_MAGIC)
            .ok_or_else(|| MontanteError::foreign("not a serialized native model"))?;
        let model: NativeModel = serde_json::from_slice(body)?;
        Ok(Arc::new(model))
    }
}

fn downcast(model: &dyn ForeignModel) -> Result<&NativeModel> {
    model.as_any().downcast_ref::<NativeModel>().ok_or_else(|| {
        MontanteError::foreign(format!(
            "model belongs to the '{}' runtime, not '{RUNTIME_NAME}'",
            model.runtime()
        ))
    })
}

fn numeric_feature(vector: &ForeignVector) -> Feature {
    Feature::Numeric(
        vector
            .as_f64()
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect(),
    )
}

/// Maps a factor onto the training level table by label. Unseen labels get
/// code `levels.len()`.
fn recode(factor: &FactorVector, levels: &[String]) -> Feature {
    let codes = factor
        .labels()
        .into_iter()
        .map(|label| {
            label
                .and_then(|l| levels.iter().position(|known| known == l))
                .unwrap_or(levels.len())
        })
        .collect();
    Feature::Categorical {
        codes,
        n_levels: levels.len(),
    }
}

fn fit(
    formula: &Formula,
    data: &ForeignDataFrame,
    control: &TrainControl,
    seed: u64,
    deadline: &Deadline,
) -> Result<NativeModel> {
    if control.method != NATIVE_METHOD {
        return Err(MontanteError::foreign(format!(
            "Model {} is not in the native runtime's library",
            control.method
        )));
    }

    let response_frame = data.select(&[formula.target()])?;
    let ForeignVector::Factor(response) = &response_frame.columns()[0].vector else {
        return Err(MontanteError::foreign(
            "wrong model type for regression: the response must be a factor",
        ));
    };
    let predictors = data.select(formula.predictors())?;
    if response.codes().iter().any(Option::is_none)
        || predictors.columns().iter().any(|c| c.vector.na_count() > 0)
    {
        return Err(MontanteError::foreign("missing values in object"));
    }
    if predictors.columns().iter().any(|c| c.vector.infinite_count() > 0) {
        return Err(MontanteError::foreign(INFINITE_VALUES));
    }
    let consistent = response.is_consistent()
        && predictors.columns().iter().all(|c| match &c.vector {
            ForeignVector::Factor(f) => f.is_consistent(),
            _ => true,
        });
    if !consistent {
        return Err(MontanteError::foreign("factor codes are out of range"));
    }

    let classes: Vec<usize> = response
        .codes()
        .iter()
        .flatten()
        .map(|&c| c as usize - 1)
        .collect();
    let n_classes = response.levels().len();
    let mut present = vec![false; n_classes];
    for &c in &classes {
        present[c] = true;
    }
    if present.iter().filter(|&&p| p).count() < 2 {
        return Err(MontanteError::foreign(
            "the response needs at least two classes with data",
        ));
    }

    let metric = match control.metric {
        None => Metric::Accuracy,
        Some(m) if m.is_classification() => m,
        Some(m) => {
            warn!(
                "The metric \"{}\" was not in the result set. Accuracy will be used instead.",
                m.as_str()
            );
            Metric::Accuracy
        }
    };

    let signature = predictors.signature();
    let predictor_levels: Vec<Option<Vec<String>>> = predictors
        .columns()
        .iter()
        .map(|c| match &c.vector {
            ForeignVector::Factor(f) => Some(f.levels().to_vec()),
            _ => None,
        })
        .collect();

    let preprocessor = Preprocessor::fit(&predictors, &control.preprocess)?;
    let prepared = preprocessor.apply(&predictors)?;
    if prepared
        .columns()
        .iter()
        .any(|c| c.vector.na_count() + c.vector.infinite_count() > 0)
    {
        return Err(MontanteError::foreign("preprocessing produced non-finite values"));
    }
    let features: Vec<Feature> = prepared
        .columns()
        .iter()
        .map(|c| match &c.vector {
            ForeignVector::Factor(f) => Feature::Categorical {
                codes: f
                    .codes()
                    .iter()
                    .map(|c| c.map_or(0, |c| c as usize - 1))
                    .collect(),
                n_levels: f.levels().len(),
            },
            vector => numeric_feature(vector),
        })
        .collect();
    let design = Design {
        features: &features,
        classes: &classes,
        n_classes,
    };

    let grid: &[u32] = if control.resampling.method == ResamplingMethod::None {
        &TRIALS_GRID[..1]
    } else {
        &TRIALS_GRID
    };
    let max_trials = grid.iter().copied().max().unwrap_or(1);

    let mut resampler = Resampler::new(&control.resampling, &classes, n_classes)?;
    let all_rows: Vec<usize> = (0..classes.len()).collect();
    let full = Ensemble::fit(&design, &all_rows, max_trials, deadline)?;

    let mut rng = StdRng::seed_from_u64(seed);
    debug!(
        "Tuning {} candidates over {} resamples ({})",
        grid.len(),
        resampler.len(),
        control.resampling.method.as_str()
    );

    let mut scores: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); grid.len()];
    while let Some(split) = resampler.next_split(&mut rng, deadline)? {
        if split.holdout.is_empty() || split.train.is_empty() {
            continue;
        }
        let ensemble = Ensemble::fit(&design, &split.train, max_trials, deadline)?;
        let observed: Vec<usize> = split.holdout.iter().map(|&r| classes[r]).collect();
        for (slot, &trials) in scores.iter_mut().zip(grid) {
            let predicted: Vec<usize> = split
                .holdout
                .iter()
                .map(|&r| ensemble.predict(&features, r, trials))
                .collect();
            slot.0.push(accuracy(&predicted, &observed));
            slot.1.push(kappa(&predicted, &observed, n_classes));
        }
    }

    let tuning: Vec<TuningResult> = grid
        .iter()
        .zip(&scores)
        .map(|(&trials, (accuracies, kappas))| {
            let mut result = TuningResult {
                trials,
                accuracy: finite_mean(accuracies),
                kappa: finite_mean(kappas),
            };
            if control.resampling.method == ResamplingMethod::Boot632 {
                let predicted: Vec<usize> = all_rows
                    .iter()
                    .map(|&r| full.predict(&features, r, trials))
                    .collect();
                let apparent_accuracy = accuracy(&predicted, &classes);
                let apparent_kappa = kappa(&predicted, &classes, n_classes);
                result.accuracy = 0.368 * apparent_accuracy + 0.632 * result.accuracy;
                result.kappa = 0.368 * apparent_kappa + 0.632 * result.kappa;
            }
            result
        })
        .collect();

    let trials = select_trials(&tuning, metric);
    info!(
        "Selected C5.0 with {} trial(s) by {} over {} rows",
        trials,
        metric.as_str(),
        classes.len()
    );

    Ok(NativeModel {
        engine: control.engine.clone(),
        method: control.method.clone(),
        target: formula.target().to_string(),
        predictors: signature,
        predictor_levels,
        levels: response.levels().to_vec(),
        preprocessor,
        ensemble: full.truncated(trials),
        trials: trials.min(full.len() as u32).max(1),
        metric,
        resampling: control.resampling.method,
        tuning,
        training_rows: classes.len(),
        trained_at: Utc::now(),
    })
}

/// Candidate with the best mean `metric`; ties and undefined scores go to
/// the fewest trials.
fn select_trials(tuning: &[TuningResult], metric: Metric) -> u32 {
    let score = |t: &TuningResult| {
        let value = if metric == Metric::Kappa { t.kappa } else { t.accuracy };
        if value.is_nan() { f64::NEG_INFINITY } else { value }
    };
    let mut best: Option<&TuningResult> = None;
    for candidate in tuning {
        if best.is_none_or(|b| score(candidate) > score(b)) {
            best = Some(candidate);
        }
    }
    best.map_or(TRIALS_GRID[0], |b| b.trials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ForeignColumn, build_formula};
    use crate::runtime::Resampling;

    fn frame() -> ForeignDataFrame {
        let x: Vec<Option<f64>> = (0..30).map(|i| Some(f64::from(i))).collect();
        let colour = FactorVector::from_labels((0..30).map(|i| Some(if i % 2 == 0 { "red" } else { "blue" })));
        let y = FactorVector::from_labels((0..30).map(|i| Some(if i < 15 { "a" } else { "b" })));
        ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "x".into(),
                vector: ForeignVector::Double(x),
            },
            ForeignColumn {
                name: "colour".into(),
                vector: ForeignVector::Factor(colour),
            },
            ForeignColumn {
                name: "y".into(),
                vector: ForeignVector::Factor(y),
            },
        ])
        .unwrap()
    }

    fn control(method: ResamplingMethod) -> TrainControl {
        TrainControl {
            engine: "caret".into(),
            method: NATIVE_METHOD.into(),
            metric: Some(Metric::Accuracy),
            preprocess: vec![],
            resampling: Resampling {
                method,
                number: 3,
                repeats: 1,
            },
        }
    }

    fn train(control: &TrainControl) -> Result<NativeModel> {
        let formula = build_formula("y", &["x", "colour"])?;
        fit(&formula, &frame(), control, 42, &Deadline::none())
    }

    #[test]
    fn test_fit_learns_threshold() {
        let model = train(&control(ResamplingMethod::Cv)).unwrap();
        assert_eq!(model.levels(), ["a", "b"]);
        assert_eq!(model.tuning().len(), 3);
        assert_eq!(model.required_columns()[0], ColumnSpec::new("x", PrimitiveType::Float));
        assert_eq!(
            model.required_columns()[1],
            ColumnSpec::new("colour", PrimitiveType::Categorical)
        );

        let predictions = model.predict_frame(&frame().select(&["x", "colour"]).unwrap()).unwrap();
        let ForeignVector::Factor(predictions) = predictions else {
            panic!("expected a factor");
        };
        assert_eq!(predictions.label_at(0), Some("a"));
        assert_eq!(predictions.label_at(29), Some("b"));
    }

    #[test]
    fn test_no_resampling_uses_first_grid_point() {
        let model = train(&control(ResamplingMethod::None)).unwrap();
        assert_eq!(model.trials(), 1);
        assert_eq!(model.tuning().len(), 1);
        assert!(model.tuning()[0].accuracy.is_nan());
    }

    #[test]
    fn test_regression_metric_falls_back_to_accuracy() {
        let mut control = control(ResamplingMethod::Boot);
        control.metric = Some(Metric::Rmse);
        let model = train(&control).unwrap();
        assert_eq!(model.summary().metric, "Accuracy");
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut control = control(ResamplingMethod::Cv);
        control.method = "rf".into();
        assert!(matches!(train(&control), Err(MontanteError::ForeignRuntime(_))));
    }

    #[test]
    fn test_numeric_response_rejected() {
        let formula = build_formula("x", &["colour"]).unwrap();
        let err = fit(&formula, &frame(), &control(ResamplingMethod::Cv), 1, &Deadline::none())
            .unwrap_err();
        assert!(err.to_string().contains("regression"));
    }

    #[test]
    fn test_missing_values_rejected() {
        let data = ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "x".into(),
                vector: ForeignVector::Double(vec![Some(1.0), None, Some(3.0), Some(4.0)]),
            },
            ForeignColumn {
                name: "y".into(),
                vector: ForeignVector::Factor(FactorVector::from_labels(["a", "b", "a", "b"].map(Some))),
            },
        ])
        .unwrap();
        let formula = build_formula("y", &["x"]).unwrap();
        let err = fit(&formula, &data, &control(ResamplingMethod::None), 1, &Deadline::none())
            .unwrap_err();
        assert!(err.to_string().contains("missing values"));
    }

    fn split_frame(below: f64, above: f64) -> ForeignDataFrame {
        let x = (0..20).map(|i| Some(if i < 10 { below } else { above })).collect();
        let y = FactorVector::from_labels((0..20).map(|i| Some(if i < 10 { "a" } else { "b" })));
        ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "x".into(),
                vector: ForeignVector::Double(x),
            },
            ForeignColumn {
                name: "y".into(),
                vector: ForeignVector::Factor(y),
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_infinite_values_rejected() {
        let formula = build_formula("y", &["x"]).unwrap();
        let result = fit(
            &formula,
            &split_frame(f64::NEG_INFINITY, 5.0),
            &control(ResamplingMethod::None),
            1,
            &Deadline::none(),
        );
        match result {
            Err(MontanteError::ForeignRuntime(message)) => assert!(message.contains("infinite")),
            other => panic!("expected a runtime error, got {other:?}"),
        }

        let model = fit(
            &formula,
            &split_frame(-5.0, 5.0),
            &control(ResamplingMethod::None),
            1,
            &Deadline::none(),
        )
        .unwrap();
        let newdata = split_frame(f64::INFINITY, 0.0).select(&["x"]).unwrap();
        assert!(matches!(
            model.predict_frame(&newdata),
            Err(MontanteError::ForeignRuntime(_))
        ));
    }

    #[test]
    fn test_extreme_thresholds_survive_serialization() {
        let mut runtime = NativeRuntime::new(1);
        let formula = build_formula("y", &["x"]).unwrap();
        let model = fit(
            &formula,
            &split_frame(-f64::MAX, f64::MAX),
            &control(ResamplingMethod::None),
            1,
            &Deadline::none(),
        )
        .unwrap();

        let bytes = runtime.serialize(&model).unwrap();
        let restored = runtime.unserialize(&bytes).unwrap();
        let newdata = split_frame(-f64::MAX, f64::MAX).select(&["x"]).unwrap();
        assert_eq!(
            runtime.predict(restored.as_ref(), &newdata).unwrap(),
            model.predict_frame(&newdata).unwrap()
        );
    }

    #[test]
    fn test_resampling_stops_at_deadline() {
        let mut boot = control(ResamplingMethod::Boot);
        boot.resampling.number = 10_000;
        let formula = build_formula("y", &["x", "colour"]).unwrap();

        let started = std::time::Instant::now();
        let result = fit(
            &formula,
            &frame(),
            &boot,
            42,
            &Deadline::after(std::time::Duration::from_millis(50)),
        );
        assert!(matches!(result, Err(MontanteError::TrainingTimeout(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        boot.resampling.number = 2_000_000;
        assert!(matches!(train(&boot), Err(MontanteError::ForeignRuntime(_))));
    }

    #[test]
    fn test_prediction_checks_columns() {
        let model = train(&control(ResamplingMethod::None)).unwrap();
        // missing predictor
        assert!(model.predict_frame(&frame().select(&["x"]).unwrap()).is_err());
        // extra column
        match model.predict_frame(&frame()) {
            Err(MontanteError::ForeignRuntime(message)) => {
                assert_eq!(message, "variables not used by the model: 'y'");
            }
            other => panic!("expected a runtime error, got {other:?}"),
        }
        // wrong type
        let swapped = ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "x".into(),
                vector: ForeignVector::Factor(FactorVector::from_labels(["1"].map(Some))),
            },
            ForeignColumn {
                name: "colour".into(),
                vector: ForeignVector::Factor(FactorVector::from_labels(["red"].map(Some))),
            },
        ])
        .unwrap();
        assert!(model.predict_frame(&swapped).is_err());
    }

    #[test]
    fn test_unseen_level_still_predicts() {
        let model = train(&control(ResamplingMethod::None)).unwrap();
        let data = ForeignDataFrame::new(vec![
            ForeignColumn {
                name: "x".into(),
                vector: ForeignVector::Integer(vec![Some(2)]),
            },
            ForeignColumn {
                name: "colour".into(),
                vector: ForeignVector::Factor(FactorVector::from_labels(["green"].map(Some))),
            },
        ])
        .unwrap();
        assert_eq!(model.predict_frame(&data).unwrap().len(), 1);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut runtime = NativeRuntime::new(42);
        let model = train(&control(ResamplingMethod::Cv)).unwrap();
        let bytes = runtime.serialize(&model).unwrap();
        assert!(bytes.starts_with(MODEL_MAGIC));

        let restored = runtime.unserialize(&bytes).unwrap();
        let restored = restored.as_any().downcast_ref::<NativeModel>().unwrap();
        assert_eq!(restored, &model);
        assert!(runtime.unserialize(b"garbage").is_err());
    }

    #[test]
    fn test_training_is_deterministic_per_seed() {
        let a = train(&control(ResamplingMethod::Boot)).unwrap();
        let b = train(&control(ResamplingMethod::Boot)).unwrap();
        assert_eq!(a.tuning(), b.tuning());
    }

    #[test]
    fn test_select_trials_prefers_fewest_on_ties() {
        let tuning = [
            TuningResult { trials: 1, accuracy: 0.9, kappa: 0.8 },
            TuningResult { trials: 10, accuracy: 0.9, kappa: 0.85 },
            TuningResult { trials: 20, accuracy: 0.8, kappa: 0.7 },
        ];
        assert_eq!(select_trials(&tuning, Metric::Accuracy), 1);
        assert_eq!(select_trials(&tuning, Metric::Kappa), 10);
    }
}
