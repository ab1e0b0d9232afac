//! Training control vocabulary shared by the engines and the runtimes.
//!
//! Names follow caret's `trainControl()` and `train()` arguments, since that
//! is what payloads speak.

use serde::{Deserialize, Serialize};

/// Resampling strategy (`trainControl(method = ...)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResamplingMethod {
    /// Bootstrap.
    #[serde(rename = "boot")]
    Boot,
    /// 0.632 bootstrap.
    #[serde(rename = "boot632")]
    Boot632,
    /// Optimism bootstrap.
    #[serde(rename = "optimism_boot")]
    OptimismBoot,
    /// Bootstrap, all estimates.
    #[serde(rename = "boot_all")]
    BootAll,
    /// k-fold cross-validation.
    #[serde(rename = "cv")]
    Cv,
    /// Repeated k-fold cross-validation.
    #[serde(rename = "repeatedcv")]
    RepeatedCv,
    /// Leave-one-out cross-validation.
    #[serde(rename = "LOOCV")]
    Loocv,
    /// Leave-group-out cross-validation.
    #[serde(rename = "LGOCV")]
    Lgocv,
    /// No resampling.
    #[serde(rename = "none")]
    None,
    /// Out-of-bag estimates.
    #[serde(rename = "oob")]
    Oob,
    /// Adaptive cross-validation.
    #[serde(rename = "adaptive_cv")]
    AdaptiveCv,
    /// Adaptive bootstrap.
    #[serde(rename = "adaptive_boot")]
    AdaptiveBoot,
    /// Adaptive leave-group-out.
    #[serde(rename = "adaptive_LGOCV")]
    AdaptiveLgocv,
}

impl ResamplingMethod {
    /// Every strategy, in the order the schema lists them.
    pub const ALL: [ResamplingMethod; 13] = [
        ResamplingMethod::Boot,
        ResamplingMethod::Boot632,
        ResamplingMethod::OptimismBoot,
        ResamplingMethod::BootAll,
        ResamplingMethod::Cv,
        ResamplingMethod::RepeatedCv,
        ResamplingMethod::Loocv,
        ResamplingMethod::Lgocv,
        ResamplingMethod::None,
        ResamplingMethod::Oob,
        ResamplingMethod::AdaptiveCv,
        ResamplingMethod::AdaptiveBoot,
        ResamplingMethod::AdaptiveLgocv,
    ];

    /// Payload spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResamplingMethod::Boot => "boot",
            ResamplingMethod::Boot632 => "boot632",
            ResamplingMethod::OptimismBoot => "optimism_boot",
            ResamplingMethod::BootAll => "boot_all",
            ResamplingMethod::Cv => "cv",
            ResamplingMethod::RepeatedCv => "repeatedcv",
            ResamplingMethod::Loocv => "LOOCV",
            ResamplingMethod::Lgocv => "LGOCV",
            ResamplingMethod::None => "none",
            ResamplingMethod::Oob => "oob",
            ResamplingMethod::AdaptiveCv => "adaptive_cv",
            ResamplingMethod::AdaptiveBoot => "adaptive_boot",
            ResamplingMethod::AdaptiveLgocv => "adaptive_LGOCV",
        }
    }
}

/// Performance metric used to pick the final model (`train(metric = ...)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Root mean squared error (regression).
    #[serde(rename = "RMSE")]
    Rmse,
    /// R squared (regression).
    #[serde(rename = "Rsquared")]
    Rsquared,
    /// Accuracy (classification).
    #[serde(rename = "Accuracy")]
    Accuracy,
    /// Cohen's kappa (classification).
    #[serde(rename = "Kappa")]
    Kappa,
}

impl Metric {
    /// Every metric, in the order the schema lists them.
    pub const ALL: [Metric; 4] = [Metric::Rmse, Metric::Rsquared, Metric::Accuracy, Metric::Kappa];

    /// Payload spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Rmse => "RMSE",
            Metric::Rsquared => "Rsquared",
            Metric::Accuracy => "Accuracy",
            Metric::Kappa => "Kappa",
        }
    }

    /// `true` for metrics that only make sense for classification.
    #[must_use]
    pub fn is_classification(&self) -> bool {
        matches!(self, Metric::Accuracy | Metric::Kappa)
    }
}

/// Resampling settings.
///
/// `number` and `repeats` are kept as given; each runtime decides which
/// values it accepts for which strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resampling {
    /// Strategy.
    pub method: ResamplingMethod,
    /// Folds or resampling iterations.
    pub number: i64,
    /// Repeats, for repeated cross-validation.
    pub repeats: i64,
}

/// Everything a runtime needs to fit one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainControl {
    /// Engine id that produced this control (e.g. `caret`).
    pub engine: String,
    /// Model method, e.g. `C5.0`.
    pub method: String,
    /// Selection metric; the runtime default when `None`.
    pub metric: Option<Metric>,
    /// Preprocessing steps, e.g. `["center", "scale"]`.
    pub preprocess: Vec<String>,
    /// Resampling.
    pub resampling: Resampling,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampling_names_match_serde() {
        for method in ResamplingMethod::ALL {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.as_str()));
        }
    }

    #[test]
    fn test_metric_names_match_serde() {
        for metric in Metric::ALL {
            let parsed: Metric = serde_json::from_str(&format!("\"{}\"", metric.as_str())).unwrap();
            assert_eq!(parsed, metric);
        }
        assert!(Metric::Kappa.is_classification());
        assert!(!Metric::Rmse.is_classification());
    }
}
