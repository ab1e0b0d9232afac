//! C5.0-style classification trees with boosting.
//!
//! Trees split numeric features on a threshold and categorical features into
//! one branch per level. Splits are chosen by gain ratio among candidates with
//! at least average information gain, every split needs two branches with at
//! least [`MIN_CASES`] weight, and grown trees are pruned with the pessimistic
//! error estimate at a 25% confidence factor.
//!
//! Boosting follows AdaBoost.M1: misclassified cases are up-weighted after
//! each trial and members vote with weight `ln((1 - e) / e)`.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::cancellation::Deadline;
use crate::error::Result;

/// Minimum case weight for a branch to count toward a valid split.
pub(crate) const MIN_CASES: f64 = 2.0;

/// Confidence factor for pruning and its upper normal quantile.
const CF: f64 = 0.25;
const CF_Z: f64 = 0.674_489_750_196_081_7;

const MAX_DEPTH: usize = 64;
const EPS: f64 = 1e-9;
const MIN_ERROR: f64 = 1e-10;

/// One predictor, encoded for the tree learner.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Feature {
    /// Numeric values, one per row.
    Numeric(Vec<f64>),
    /// 0-based level codes, one per row. Codes `>= n_levels` are levels
    /// unseen at training time.
    Categorical { codes: Vec<usize>, n_levels: usize },
}

/// Training design: features and 0-based classes over all rows.
pub(crate) struct Design<'a> {
    pub features: &'a [Feature],
    pub classes: &'a [usize],
    pub n_classes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TreeNode {
    class: usize,
    distribution: Vec<f64>,
    split: Option<Split>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Split {
    Threshold {
        feature: usize,
        threshold: f64,
        below: Box<TreeNode>,
        above: Box<TreeNode>,
    },
    Levels {
        feature: usize,
        branches: Vec<TreeNode>,
    },
}

struct Candidate {
    feature: usize,
    gain: f64,
    split_info: f64,
    kind: CandidateKind,
}

enum CandidateKind {
    Threshold(f64),
    Levels(usize),
}

impl Candidate {
    fn ratio(&self) -> f64 {
        self.gain / self.split_info
    }
}

impl TreeNode {
    fn leaf(class: usize, distribution: Vec<f64>) -> Self {
        Self {
            class,
            distribution,
            split: None,
        }
    }

    fn weight(&self) -> f64 {
        self.distribution.iter().sum()
    }

    /// Predicted class (0-based) for `row`.
    pub(crate) fn predict(&self, features: &[Feature], row: usize) -> usize {
        let mut node = self;
        loop {
            match &node.split {
                None => return node.class,
                Some(Split::Threshold {
                    feature,
                    threshold,
                    below,
                    above,
                }) => {
                    let Feature::Numeric(values) = &features[*feature] else {
                        return node.class;
                    };
                    node = if values[row] <= *threshold { below } else { above };
                }
                Some(Split::Levels { feature, branches }) => {
                    let Feature::Categorical { codes, .. } = &features[*feature] else {
                        return node.class;
                    };
                    node = match branches.get(codes[row]) {
                        Some(branch) => branch,
                        None => match heaviest(branches) {
                            Some(branch) => branch,
                            None => return node.class,
                        },
                    };
                }
            }
        }
    }

    /// Number of leaves.
    pub(crate) fn leaves(&self) -> usize {
        match &self.split {
            None => 1,
            Some(Split::Threshold { below, above, .. }) => below.leaves() + above.leaves(),
            Some(Split::Levels { branches, .. }) => branches.iter().map(TreeNode::leaves).sum(),
        }
    }

    /// Graphviz rendering. `features` and `levels` name feature indices,
    /// categorical levels and classes.
    pub(crate) fn to_dot(
        &self,
        features: &[String],
        feature_levels: &[Option<Vec<String>>],
        classes: &[String],
    ) -> String {
        let mut out = String::from("digraph tree {\n  node [shape=box];\n");
        let mut next_id = 0usize;
        self.write_dot(&mut out, &mut next_id, features, feature_levels, classes);
        out.push_str("}\n");
        out
    }

    fn write_dot(
        &self,
        out: &mut String,
        next_id: &mut usize,
        features: &[String],
        feature_levels: &[Option<Vec<String>>],
        classes: &[String],
    ) -> usize {
        let id = *next_id;
        *next_id += 1;
        let class = classes.get(self.class).map_or("?", String::as_str);
        match &self.split {
            None => {
                let _ = writeln!(
                    out,
                    "  n{id} [label=\"{class}\\n({:.1}/{:.1})\", style=rounded];",
                    self.weight(),
                    self.weight() - self.distribution.get(self.class).copied().unwrap_or(0.0)
                );
            }
            Some(Split::Threshold {
                feature,
                threshold,
                below,
                above,
            }) => {
                let name = features.get(*feature).map_or("?", String::as_str);
                let _ = writeln!(out, "  n{id} [label=\"{name}\"];");
                let child = below.write_dot(out, next_id, features, feature_levels, classes);
                let _ = writeln!(out, "  n{id} -> n{child} [label=\"<= {threshold}\"];");
                let child = above.write_dot(out, next_id, features, feature_levels, classes);
                let _ = writeln!(out, "  n{id} -> n{child} [label=\"> {threshold}\"];");
            }
            Some(Split::Levels { feature, branches }) => {
                let name = features.get(*feature).map_or("?", String::as_str);
                let _ = writeln!(out, "  n{id} [label=\"{name}\"];");
                let levels = feature_levels.get(*feature).and_then(Option::as_ref);
                for (code, branch) in branches.iter().enumerate() {
                    let level = levels
                        .and_then(|l| l.get(code))
                        .map_or("?", String::as_str);
                    let child = branch.write_dot(out, next_id, features, feature_levels, classes);
                    let _ = writeln!(out, "  n{id} -> n{child} [label=\"= {level}\"];");
                }
            }
        }
        id
    }
}

fn heaviest(branches: &[TreeNode]) -> Option<&TreeNode> {
    branches
        .iter()
        .rev()
        .max_by(|a, b| a.weight().total_cmp(&b.weight()))
}

/// Grows and prunes one tree on `rows` (duplicates allowed) with per-position
/// case `weights`.
pub(crate) fn grow(
    design: &Design<'_>,
    rows: &[usize],
    weights: &[f64],
    deadline: &Deadline,
) -> Result<TreeNode> {
    let positions: Vec<usize> = (0..rows.len()).collect();
    let mut tree = grow_node(design, rows, weights, &positions, 0, deadline)?;
    prune(&mut tree);
    Ok(tree)
}

fn grow_node(
    design: &Design<'_>,
    rows: &[usize],
    weights: &[f64],
    positions: &[usize],
    depth: usize,
    deadline: &Deadline,
) -> Result<TreeNode> {
    deadline.check()?;

    let mut distribution = vec![0.0; design.n_classes];
    for &p in positions {
        distribution[design.classes[rows[p]]] += weights[p];
    }
    let class = argmax(&distribution);
    let total: f64 = distribution.iter().sum();
    let errors = total - distribution[class];

    if errors <= EPS || total < 2.0 * MIN_CASES || depth >= MAX_DEPTH {
        return Ok(TreeNode::leaf(class, distribution));
    }

    let Some(candidate) = best_split(design, rows, weights, positions, &distribution, total) else {
        return Ok(TreeNode::leaf(class, distribution));
    };

    let split = match candidate.kind {
        CandidateKind::Threshold(threshold) => {
            let Feature::Numeric(values) = &design.features[candidate.feature] else {
                return Ok(TreeNode::leaf(class, distribution));
            };
            let (below, above): (Vec<usize>, Vec<usize>) = positions
                .iter()
                .partition(|&&p| values[rows[p]] <= threshold);
            Split::Threshold {
                feature: candidate.feature,
                threshold,
                below: Box::new(grow_node(design, rows, weights, &below, depth + 1, deadline)?),
                above: Box::new(grow_node(design, rows, weights, &above, depth + 1, deadline)?),
            }
        }
        CandidateKind::Levels(n_levels) => {
            let Feature::Categorical { codes, .. } = &design.features[candidate.feature] else {
                return Ok(TreeNode::leaf(class, distribution));
            };
            let mut groups = vec![Vec::new(); n_levels];
            for &p in positions {
                groups[codes[rows[p]]].push(p);
            }
            let branches = groups
                .iter()
                .map(|group| {
                    if group.is_empty() {
                        Ok(TreeNode::leaf(class, vec![0.0; design.n_classes]))
                    } else {
                        grow_node(design, rows, weights, group, depth + 1, deadline)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Split::Levels {
                feature: candidate.feature,
                branches,
            }
        }
    };

    Ok(TreeNode {
        class,
        distribution,
        split: Some(split),
    })
}

fn best_split(
    design: &Design<'_>,
    rows: &[usize],
    weights: &[f64],
    positions: &[usize],
    distribution: &[f64],
    total: f64,
) -> Option<Candidate> {
    let base = entropy(distribution, total);
    let candidates: Vec<Candidate> = design
        .features
        .iter()
        .enumerate()
        .filter_map(|(feature, values)| match values {
            Feature::Numeric(values) => numeric_candidate(
                feature, values, design, rows, weights, positions, distribution, total, base,
            ),
            Feature::Categorical { codes, n_levels } => categorical_candidate(
                feature, codes, *n_levels, design, rows, weights, positions, total, base,
            ),
        })
        .filter(|c| c.gain > EPS && c.split_info > EPS)
        .collect();

    if candidates.is_empty() {
        return None;
    }

    let average = candidates.iter().map(|c| c.gain).sum::<f64>() / candidates.len() as f64;
    candidates
        .into_iter()
        .filter(|c| c.gain >= average - EPS)
        .max_by(|a, b| {
            a.ratio()
                .total_cmp(&b.ratio())
                .then_with(|| b.feature.cmp(&a.feature))
        })
}

#[allow(clippy::too_many_arguments)]
fn numeric_candidate(
    feature: usize,
    values: &[f64],
    design: &Design<'_>,
    rows: &[usize],
    weights: &[f64],
    positions: &[usize],
    distribution: &[f64],
    total: f64,
    base: f64,
) -> Option<Candidate> {
    let mut items: Vec<(f64, usize, f64)> = positions
        .iter()
        .map(|&p| (values[rows[p]], design.classes[rows[p]], weights[p]))
        .collect();
    items.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut left = vec![0.0; design.n_classes];
    let mut right = distribution.to_vec();
    let mut left_weight = 0.0;
    let mut thresholds = 0usize;
    let mut best: Option<(f64, f64, f64)> = None;

    for window in items.windows(2) {
        let (value, class, weight) = window[0];
        left[class] += weight;
        right[class] -= weight;
        left_weight += weight;

        if window[1].0 <= value {
            continue;
        }
        let right_weight = total - left_weight;
        if left_weight < MIN_CASES || right_weight < MIN_CASES {
            continue;
        }
        thresholds += 1;

        let gain = base
            - (left_weight / total) * entropy(&left, left_weight)
            - (right_weight / total) * entropy(&right, right_weight);
        if best.is_none_or(|(g, _, _)| gain > g + EPS) {
            best = Some((gain, value, left_weight));
        }
    }

    let (gain, threshold, left_weight) = best?;
    let penalized = gain - (thresholds as f64).log2() / total;
    let split_info = entropy(&[left_weight, total - left_weight], total);
    Some(Candidate {
        feature,
        gain: penalized,
        split_info,
        kind: CandidateKind::Threshold(threshold),
    })
}

#[allow(clippy::too_many_arguments)]
fn categorical_candidate(
    feature: usize,
    codes: &[usize],
    n_levels: usize,
    design: &Design<'_>,
    rows: &[usize],
    weights: &[f64],
    positions: &[usize],
    total: f64,
    base: f64,
) -> Option<Candidate> {
    if n_levels < 2 {
        return None;
    }
    let mut per_level = vec![vec![0.0; design.n_classes]; n_levels];
    for &p in positions {
        let code = codes[rows[p]];
        if let Some(level) = per_level.get_mut(code) {
            level[design.classes[rows[p]]] += weights[p];
        }
    }
    let level_weights: Vec<f64> = per_level.iter().map(|d| d.iter().sum()).collect();
    if level_weights.iter().filter(|&&w| w >= MIN_CASES).count() < 2 {
        return None;
    }

    let remainder: f64 = per_level
        .iter()
        .zip(&level_weights)
        .map(|(dist, &w)| (w / total) * entropy(dist, w))
        .sum();

    Some(Candidate {
        feature,
        gain: base - remainder,
        split_info: entropy(&level_weights, total),
        kind: CandidateKind::Levels(n_levels),
    })
}

/// Collapses subtrees whose pessimistic error is no better than a leaf's.
/// Returns the estimated errors of what remains.
fn prune(node: &mut TreeNode) -> f64 {
    let total = node.weight();
    let errors = total - node.distribution.get(node.class).copied().unwrap_or(0.0);
    let as_leaf = errors + added_errors(total, errors);

    let subtree = match node.split.as_mut() {
        None => return as_leaf,
        Some(Split::Threshold { below, above, .. }) => prune(below) + prune(above),
        Some(Split::Levels { branches, .. }) => branches.iter_mut().map(prune).sum(),
    };

    if as_leaf <= subtree + 0.1 {
        node.split = None;
        as_leaf
    } else {
        subtree
    }
}

/// Extra errors expected at confidence `CF` given `e` observed errors out of
/// `n` cases (upper binomial bound, normal approximation).
fn added_errors(n: f64, e: f64) -> f64 {
    if n <= EPS {
        return 0.0;
    }
    if e < 1.0 {
        let base = n * (1.0 - CF.powf(1.0 / n));
        if e <= EPS {
            return base;
        }
        return base + e * (added_errors(n, 1.0) - base);
    }
    if e + 0.5 >= n {
        return (n - e).max(0.0);
    }
    let z2 = CF_Z * CF_Z;
    let f = (e + 0.5) / n;
    let r = (f + z2 / (2.0 * n) + CF_Z * (f / n - f * f / n + z2 / (4.0 * n * n)).sqrt())
        / (1.0 + z2 / n);
    r * n - e
}

fn entropy(counts: &[f64], total: f64) -> f64 {
    if total <= EPS {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > EPS)
        .map(|&c| {
            let p = c / total;
            -p * p.log2()
        })
        .sum()
}

/// Index of the largest value; ties go to the lowest index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Member {
    vote: f64,
    tree: TreeNode,
}

/// A boosted sequence of trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Ensemble {
    members: Vec<Member>,
    n_classes: usize,
}

impl Ensemble {
    /// Boosts up to `trials` trees on `rows`. Stops early on a perfect tree
    /// or when a later tree's weighted error reaches one half.
    pub(crate) fn fit(
        design: &Design<'_>,
        rows: &[usize],
        trials: u32,
        deadline: &Deadline,
    ) -> Result<Self> {
        let n = rows.len() as f64;
        let mut weights = vec![1.0; rows.len()];
        let mut members = Vec::new();

        for trial in 0..trials.max(1) {
            deadline.check()?;
            let tree = grow(design, rows, &weights, deadline)?;
            let missed: Vec<bool> = rows
                .iter()
                .map(|&r| tree.predict(design.features, r) != design.classes[r])
                .collect();
            let total: f64 = weights.iter().sum();
            let error = weights
                .iter()
                .zip(&missed)
                .filter(|(_, miss)| **miss)
                .map(|(w, _)| *w)
                .sum::<f64>()
                / total;

            if trial > 0 && error >= 0.5 {
                break;
            }
            let clamped = error.clamp(MIN_ERROR, 1.0 - MIN_ERROR);
            let vote = ((1.0 - clamped) / clamped).ln().max(MIN_ERROR);
            members.push(Member { vote, tree });
            if error <= EPS || error >= 0.5 {
                break;
            }

            let factor = (1.0 - error) / error;
            for (w, miss) in weights.iter_mut().zip(&missed) {
                if *miss {
                    *w *= factor;
                }
            }
            let sum: f64 = weights.iter().sum();
            for w in &mut weights {
                *w *= n / sum;
            }
        }

        Ok(Self {
            members,
            n_classes: design.n_classes,
        })
    }

    /// Number of boosted trees.
    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// The first `trials` members.
    pub(crate) fn truncated(&self, trials: u32) -> Self {
        let keep = (trials as usize).clamp(1, self.members.len().max(1));
        Self {
            members: self.members.iter().take(keep).cloned().collect(),
            n_classes: self.n_classes,
        }
    }

    /// Predicted class (0-based) of `row` using the first `trials` members.
    pub(crate) fn predict(&self, features: &[Feature], row: usize, trials: u32) -> usize {
        let used = (trials as usize).clamp(1, self.members.len().max(1));
        match &self.members[..used.min(self.members.len())] {
            [] => 0,
            [only] => only.tree.predict(features, row),
            members => {
                let mut votes = vec![0.0; self.n_classes];
                for member in members {
                    votes[member.tree.predict(features, row)] += member.vote;
                }
                argmax(&votes)
            }
        }
    }

    /// The first tree, if any.
    pub(crate) fn first_tree(&self) -> Option<&TreeNode> {
        self.members.first().map(|m| &m.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design<'a>(features: &'a [Feature], classes: &'a [usize], n_classes: usize) -> Design<'a> {
        Design {
            features,
            classes,
            n_classes,
        }
    }

    #[test]
    fn test_entropy() {
        assert!((entropy(&[5.0, 5.0], 10.0) - 1.0).abs() < 1e-12);
        assert_eq!(entropy(&[10.0, 0.0], 10.0), 0.0);
        assert_eq!(entropy(&[], 0.0), 0.0);
    }

    #[test]
    fn test_argmax_ties_go_low() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0]), 1);
        assert_eq!(argmax(&[0.0]), 0);
    }

    #[test]
    fn test_added_errors_matches_reference_values() {
        // 0 errors in 6 cases at CF 0.25 gives 6 * (1 - 0.25^(1/6))
        let expected = 6.0 * (1.0 - 0.25f64.powf(1.0 / 6.0));
        assert!((added_errors(6.0, 0.0) - expected).abs() < 1e-12);
        assert!(added_errors(10.0, 2.0) > 0.0);
        assert_eq!(added_errors(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_numeric_threshold_split() {
        let features = vec![Feature::Numeric((0..20).map(f64::from).collect())];
        let classes: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let d = design(&features, &classes, 2);
        let rows: Vec<usize> = (0..20).collect();
        let tree = grow(&d, &rows, &vec![1.0; 20], &Deadline::none()).unwrap();

        assert_eq!(tree.leaves(), 2);
        for row in 0..20 {
            assert_eq!(tree.predict(&features, row), classes[row]);
        }
    }

    #[test]
    fn test_categorical_split_and_unseen_level() {
        let codes: Vec<usize> = (0..12).map(|i| i % 3).collect();
        let classes: Vec<usize> = codes.iter().map(|&c| usize::from(c == 2)).collect();
        let features = vec![Feature::Categorical { codes, n_levels: 3 }];
        let d = design(&features, &classes, 2);
        let rows: Vec<usize> = (0..12).collect();
        let tree = grow(&d, &rows, &vec![1.0; 12], &Deadline::none()).unwrap();

        for row in 0..12 {
            assert_eq!(tree.predict(&features, row), classes[row]);
        }

        let unseen = vec![Feature::Categorical {
            codes: vec![7],
            n_levels: 3,
        }];
        // falls back to the heaviest branch instead of panicking
        assert!(tree.predict(&unseen, 0) < 2);
    }

    #[test]
    fn test_pure_node_is_leaf() {
        let features = vec![Feature::Numeric(vec![1.0, 2.0, 3.0, 4.0])];
        let classes = vec![1, 1, 1, 1];
        let d = design(&features, &classes, 2);
        let tree = grow(&d, &[0, 1, 2, 3], &[1.0; 4], &Deadline::none()).unwrap();
        assert_eq!(tree.leaves(), 1);
        assert_eq!(tree.predict(&features, 0), 1);
    }

    #[test]
    fn test_boosting_stops_on_perfect_tree() {
        let features = vec![Feature::Numeric((0..20).map(f64::from).collect())];
        let classes: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let d = design(&features, &classes, 2);
        let rows: Vec<usize> = (0..20).collect();
        let ensemble = Ensemble::fit(&d, &rows, 10, &Deadline::none()).unwrap();

        assert_eq!(ensemble.len(), 1);
        assert_eq!(ensemble.truncated(10).len(), 1);
        assert_eq!(ensemble.predict(&features, 15, 10), 1);
    }

    #[test]
    fn test_boosting_respects_deadline() {
        let features = vec![Feature::Numeric(vec![1.0, 2.0, 3.0, 4.0])];
        let classes = vec![0, 1, 0, 1];
        let d = design(&features, &classes, 2);
        let expired = Deadline::after(std::time::Duration::ZERO);
        assert!(Ensemble::fit(&d, &[0, 1, 2, 3], 5, &expired).is_err());
    }

    #[test]
    fn test_dot_output_names_features() {
        let features = vec![Feature::Numeric((0..20).map(f64::from).collect())];
        let classes: Vec<usize> = (0..20).map(|i| usize::from(i >= 10)).collect();
        let d = design(&features, &classes, 2);
        let rows: Vec<usize> = (0..20).collect();
        let tree = grow(&d, &rows, &vec![1.0; 20], &Deadline::none()).unwrap();
        let dot = tree.to_dot(&["x".to_string()], &[None], &["lo".to_string(), "hi".to_string()]);

        assert!(dot.starts_with("digraph tree {"));
        assert!(dot.contains("label=\"x\""));
        assert!(dot.contains("<= 9"));
    }
}
