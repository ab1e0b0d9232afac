//! Resampling index generation for model tuning.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::cancellation::Deadline;
use crate::error::{MontanteError, Result};
use crate::runtime::{Resampling, ResamplingMethod};

/// Fraction of rows kept for training by leave-group-out splits.
const LGOCV_TRAIN_FRACTION: f64 = 0.75;

/// One resample: rows to fit on (with repeats for bootstraps) and rows to
/// score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resample {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

/// Upper bound on `number * repeats` accepted from a training request.
pub(crate) const MAX_RESAMPLES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
enum Plan {
    None,
    Bootstrap,
    Folds { k: usize },
    LeaveOneOut,
    LeaveGroupOut,
}

/// Yields the resamples for a [`Resampling`] one at a time.
///
/// Settings are validated up front, splits are drawn on demand and every
/// draw checks the deadline first.
#[derive(Debug)]
pub(crate) struct Resampler<'a> {
    plan: Plan,
    classes: &'a [usize],
    n_classes: usize,
    total: usize,
    emitted: usize,
    /// Fold assignment for the current cross-validation repeat.
    fold_of: Vec<usize>,
}

impl<'a> Resampler<'a> {
    /// Validates `resampling` over rows with 0-based `classes`.
    pub(crate) fn new(resampling: &Resampling, classes: &'a [usize], n_classes: usize) -> Result<Self> {
        let n = classes.len();
        let (plan, total) = match resampling.method {
            ResamplingMethod::None => (Plan::None, 0),
            ResamplingMethod::Oob => {
                return Err(MontanteError::foreign(
                    "out-of-bag resampling is only available for bagged models",
                ));
            }
            ResamplingMethod::Boot
            | ResamplingMethod::Boot632
            | ResamplingMethod::OptimismBoot
            | ResamplingMethod::BootAll
            | ResamplingMethod::AdaptiveBoot => {
                (Plan::Bootstrap, capped(positive(resampling.number, "number")?, 1)?)
            }
            ResamplingMethod::Cv | ResamplingMethod::AdaptiveCv => {
                let k = folds(resampling.number, n)?;
                (Plan::Folds { k }, capped(k, 1)?)
            }
            ResamplingMethod::RepeatedCv => {
                let k = folds(resampling.number, n)?;
                let repeats = positive(resampling.repeats, "repeats")?;
                (Plan::Folds { k }, capped(k, repeats)?)
            }
            ResamplingMethod::Loocv => {
                if n < 2 {
                    return Err(MontanteError::foreign("LOOCV needs at least two rows"));
                }
                (Plan::LeaveOneOut, n)
            }
            ResamplingMethod::Lgocv | ResamplingMethod::AdaptiveLgocv => (
                Plan::LeaveGroupOut,
                capped(positive(resampling.number, "number")?, 1)?,
            ),
        };
        Ok(Self {
            plan,
            classes,
            n_classes,
            total,
            emitted: 0,
            fold_of: Vec::new(),
        })
    }

    /// Number of resamples this resampler yields in total.
    pub(crate) fn len(&self) -> usize {
        self.total
    }

    /// Draws the next resample, or `None` once all have been drawn.
    pub(crate) fn next_split<R: Rng>(
        &mut self,
        rng: &mut R,
        deadline: &Deadline,
    ) -> Result<Option<Resample>> {
        if self.emitted >= self.total {
            return Ok(None);
        }
        deadline.check()?;
        let index = self.emitted;
        self.emitted += 1;
        let n = self.classes.len();
        let split = match self.plan {
            Plan::None => return Ok(None),
            Plan::Bootstrap => bootstrap(n, rng),
            Plan::Folds { k } => {
                let fold = index % k;
                if fold == 0 {
                    self.fold_of = assign_folds(self.classes, self.n_classes, k, rng);
                }
                let (holdout, train): (Vec<usize>, Vec<usize>) =
                    (0..n).partition(|&row| self.fold_of[row] == fold);
                Resample { train, holdout }
            }
            Plan::LeaveOneOut => Resample {
                train: (0..n).filter(|&i| i != index).collect(),
                holdout: vec![index],
            },
            Plan::LeaveGroupOut => leave_group_out(self.classes, self.n_classes, rng),
        };
        Ok(Some(split))
    }
}

fn capped(number: usize, repeats: usize) -> Result<usize> {
    number
        .checked_mul(repeats)
        .filter(|&total| total <= MAX_RESAMPLES)
        .ok_or_else(|| {
            MontanteError::foreign(format!(
                "trainControl asks for {number} x {repeats} resamples, at most {MAX_RESAMPLES} are allowed"
            ))
        })
}

fn positive(value: i64, field: &str) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&v| v >= 1)
        .ok_or_else(|| {
            MontanteError::foreign(format!("trainControl {field} must be at least 1, got {value}"))
        })
}

fn folds(number: i64, n: usize) -> Result<usize> {
    match usize::try_from(number) {
        Ok(k) if k >= 2 && k <= n => Ok(k),
        _ => Err(MontanteError::foreign(format!(
            "cross-validation needs between 2 and {n} folds, got {number}"
        ))),
    }
}

fn bootstrap<R: Rng>(n: usize, rng: &mut R) -> Resample {
    let mut in_bag = vec![false; n];
    let train: Vec<usize> = (0..n)
        .map(|_| {
            let i = rng.gen_range(0..n);
            in_bag[i] = true;
            i
        })
        .collect();
    let holdout = (0..n).filter(|&i| !in_bag[i]).collect();
    Resample { train, holdout }
}

/// Row indices grouped by class, each group shuffled.
fn shuffled_by_class<R: Rng>(classes: &[usize], n_classes: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); n_classes];
    for (row, &class) in classes.iter().enumerate() {
        groups[class].push(row);
    }
    for group in &mut groups {
        group.shuffle(rng);
    }
    groups
}

/// Assigns each row to one of `k` folds, balancing classes across folds.
fn assign_folds<R: Rng>(classes: &[usize], n_classes: usize, k: usize, rng: &mut R) -> Vec<usize> {
    let mut fold_of = vec![0usize; classes.len()];
    let mut next = 0usize;
    for group in shuffled_by_class(classes, n_classes, rng) {
        for row in group {
            fold_of[row] = next % k;
            next += 1;
        }
    }
    fold_of
}

fn leave_group_out<R: Rng>(classes: &[usize], n_classes: usize, rng: &mut R) -> Resample {
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for group in shuffled_by_class(classes, n_classes, rng) {
        let keep = ((group.len() as f64) * LGOCV_TRAIN_FRACTION).floor() as usize;
        let keep = keep.max(usize::from(!group.is_empty()));
        train.extend_from_slice(&group[..keep]);
        holdout.extend_from_slice(&group[keep..]);
    }
    train.sort_unstable();
    holdout.sort_unstable();
    Resample { train, holdout }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancellationToken;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    fn classes() -> Vec<usize> {
        (0..30).map(|i| i % 3).collect()
    }

    fn control(method: ResamplingMethod, number: i64, repeats: i64) -> Resampling {
        Resampling {
            method,
            number,
            repeats,
        }
    }

    fn resamples(
        resampling: &Resampling,
        classes: &[usize],
        n_classes: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<Resample>> {
        let mut resampler = Resampler::new(resampling, classes, n_classes)?;
        let mut out = Vec::with_capacity(resampler.len());
        while let Some(split) = resampler.next_split(rng, &Deadline::none())? {
            out.push(split);
        }
        Ok(out)
    }

    #[test]
    fn test_cv_folds_partition_rows() {
        let mut rng = StdRng::seed_from_u64(1);
        let folds = resamples(&control(ResamplingMethod::Cv, 5, 1), &classes(), 3, &mut rng).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.holdout.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.holdout.len(), 30);
        }
    }

    #[test]
    fn test_cv_folds_are_stratified() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = classes();
        let folds = resamples(&control(ResamplingMethod::Cv, 5, 1), &data, 3, &mut rng).unwrap();
        for fold in folds {
            let mut counts = [0; 3];
            for row in fold.holdout {
                counts[data[row]] += 1;
            }
            assert_eq!(counts, [2, 2, 2]);
        }
    }

    #[test]
    fn test_repeated_cv_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let folds =
            resamples(&control(ResamplingMethod::RepeatedCv, 3, 4), &classes(), 3, &mut rng).unwrap();
        assert_eq!(folds.len(), 12);

        // every repeat partitions the rows on its own
        for repeat in folds.chunks(3) {
            let mut seen: Vec<usize> = repeat.iter().flat_map(|f| f.holdout.clone()).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..30).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_bootstrap_holdout_is_out_of_bag() {
        let mut rng = StdRng::seed_from_u64(3);
        let boots = resamples(&control(ResamplingMethod::Boot, 5, 1), &classes(), 3, &mut rng).unwrap();
        assert_eq!(boots.len(), 5);
        for boot in boots {
            assert_eq!(boot.train.len(), 30);
            assert!(boot.holdout.iter().all(|row| !boot.train.contains(row)));
        }
    }

    #[test]
    fn test_loocv_and_lgocv() {
        let mut rng = StdRng::seed_from_u64(3);
        let loo = resamples(&control(ResamplingMethod::Loocv, 0, 0), &classes(), 3, &mut rng).unwrap();
        assert_eq!(loo.len(), 30);
        assert!(loo.iter().all(|r| r.holdout.len() == 1));

        let lgo = resamples(&control(ResamplingMethod::Lgocv, 2, 1), &classes(), 3, &mut rng).unwrap();
        assert_eq!(lgo.len(), 2);
        assert_eq!(lgo[0].train.len(), 21);
        assert_eq!(lgo[0].holdout.len(), 9);
    }

    #[test]
    fn test_same_seed_same_resamples() {
        let a = resamples(
            &control(ResamplingMethod::Cv, 3, 1),
            &classes(),
            3,
            &mut StdRng::seed_from_u64(42),
        )
        .unwrap();
        let b = resamples(
            &control(ResamplingMethod::Cv, 3, 1),
            &classes(),
            3,
            &mut StdRng::seed_from_u64(42),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = classes();
        assert!(resamples(&control(ResamplingMethod::Oob, 5, 1), &data, 3, &mut rng).is_err());
        assert!(resamples(&control(ResamplingMethod::Boot, 0, 1), &data, 3, &mut rng).is_err());
        assert!(resamples(&control(ResamplingMethod::Cv, 1, 1), &data, 3, &mut rng).is_err());
        assert!(resamples(&control(ResamplingMethod::Cv, 31, 1), &data, 3, &mut rng).is_err());
        assert!(resamples(&control(ResamplingMethod::RepeatedCv, 3, 0), &data, 3, &mut rng).is_err());
        assert!(
            resamples(&control(ResamplingMethod::None, 0, 0), &data, 3, &mut rng)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_oversized_resampling_rejected() {
        let data = classes();
        let boot = Resampler::new(&control(ResamplingMethod::Boot, 2_000_000, 1), &data, 3);
        assert!(matches!(boot, Err(MontanteError::ForeignRuntime(_))));

        let repeated = Resampler::new(&control(ResamplingMethod::RepeatedCv, 10, i64::MAX), &data, 3);
        assert!(matches!(repeated, Err(MontanteError::ForeignRuntime(_))));

        let limit = i64::try_from(MAX_RESAMPLES).unwrap();
        let at_limit = Resampler::new(&control(ResamplingMethod::Lgocv, limit, 1), &data, 3).unwrap();
        assert_eq!(at_limit.len(), MAX_RESAMPLES);
    }

    #[test]
    fn test_splits_are_drawn_on_demand() {
        let data = classes();
        let mut rng = StdRng::seed_from_u64(0);
        let limit = i64::try_from(MAX_RESAMPLES).unwrap();
        let mut resampler =
            Resampler::new(&control(ResamplingMethod::Boot, limit, 1), &data, 3).unwrap();

        let first = resampler.next_split(&mut rng, &Deadline::none()).unwrap();
        assert!(first.is_some());
        assert_eq!(resampler.len(), MAX_RESAMPLES);
    }

    #[test]
    fn test_next_split_honours_deadline() {
        let data = classes();
        let mut rng = StdRng::seed_from_u64(0);
        let mut resampler = Resampler::new(&control(ResamplingMethod::Boot, 5, 1), &data, 3).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            resampler.next_split(&mut rng, &Deadline::none().with_token(token)),
            Err(MontanteError::Cancelled)
        ));

        let expired = Deadline::after(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert!(matches!(
            resampler.next_split(&mut rng, &expired),
            Err(MontanteError::TrainingTimeout(_))
        ));
    }
}
