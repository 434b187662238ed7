use std::collections::{HashMap, VecDeque};

use ndarray::prelude::*;

use crate::sort::linear_assignment::INFTY_COST;
use crate::sort::DistanceMetric;

// Pair-wise squared distance between points in `a` (NxM) and `b` (LxM).
fn pdist(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Array2<f32> {
    if a.is_empty() || b.is_empty() {
        return Array2::zeros((a.nrows(), b.nrows()));
    }

    let (a2, b2) = (
        (&a * &a).sum_axis(Axis(1)).insert_axis(Axis(1)),
        (&b * &b).sum_axis(Axis(1)).insert_axis(Axis(0)),
    );

    let r2 = -2.0 * a.dot(&b.t()) + a2 + b2;

    r2.mapv_into(|x| x.max(0.0))
}

// Rows scaled to unit length; all-zero rows stay zero.
fn normalize_rows(a: ArrayView2<'_, f32>) -> Array2<f32> {
    let lengths = a.map_axis(Axis(1), |x| x.fold(0.0f32, |acc, v| acc + v * v).sqrt().max(f32::EPSILON));

    &a / &lengths.insert_axis(Axis(1))
}

/// Compute pair-wise cosine distance between points in `a` and `b`.
///
/// ```text
///     Parameters
///     ----------
///     a : an NxM matrix of N samples of dimensionality M.
///     b : an LxM matrix of L samples of dimensionality M.
///     data_is_normalized : if true, rows of a and b are assumed unit length.
///
///     Returns
///     -------
///     Array2<f32>
///         A matrix of size len(a), len(b) such that element (i, j)
///         contains the cosine distance between `a[i]` and `b[j]`.
/// ```
///
fn cosine_distance(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>, data_is_normalized: bool) -> Array2<f32> {
    if data_is_normalized {
        -a.dot(&b.t()) + 1.0
    } else {
        let a = normalize_rows(a);
        let b = normalize_rows(b);

        -a.dot(&b.t()) + 1.0
    }
}

/// For each entry in `y`, the smallest Euclidean distance to a sample in `x`.
fn nn_euclidean_distance(x: ArrayView2<'_, f32>, y: ArrayView2<'_, f32>) -> Array1<f32> {
    let distances = pdist(x, y);

    distances
        .map_axis(Axis(0), |view| view.fold(f32::MAX, |a, &x| a.min(x)))
        .mapv_into(|x| x.max(0.0))
}

/// For each entry in `y`, the smallest cosine distance to a sample in `x`.
fn nn_cosine_distance(x: ArrayView2<'_, f32>, y: ArrayView2<'_, f32>) -> Array1<f32> {
    let distances = cosine_distance(x, y, false);

    distances.map_axis(Axis(0), |view| view.fold(f32::MAX, |a, &x| a.min(x)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NearestNeighborMetricKind {
    EuclideanDistance,
    CosineDistance,
}

///
/// A nearest neighbor distance metric that, for each target, returns
/// the closest distance to any sample that has been observed so far.
///
/// ```text
///     Parameters
///     ----------
///     metric_kind : NearestNeighborMetricKind
///         Euclidean or cosine.
///     matching_threshold : f32
///         Samples with larger distance are considered an invalid match.
///     budget : Option<usize>
///         If set, keep at most this many samples per target, dropping the
///         oldest first.
/// ```
///
#[derive(Clone, Debug)]
pub struct NearestNeighborDistanceMetric {
    metric_kind: NearestNeighborMetricKind,
    matching_threshold: f32,
    budget: Option<usize>,
    samples: HashMap<u64, VecDeque<Array1<f32>>>,
}

impl NearestNeighborDistanceMetric {
    pub fn new(metric_kind: NearestNeighborMetricKind, matching_threshold: f32, budget: Option<usize>) -> Self {
        Self {
            metric_kind,
            matching_threshold,
            budget,
            samples: Default::default(),
        }
    }

    /// Number of gallery samples kept for `target`.
    pub fn sample_count(&self, target: u64) -> usize {
        self.samples.get(&target).map_or(0, VecDeque::len)
    }
}

impl DistanceMetric for NearestNeighborDistanceMetric {
    #[inline]
    fn matching_threshold(&self) -> f32 {
        self.matching_threshold
    }

    fn partial_fit(&mut self, features: Vec<Array1<f32>>, targets: Vec<u64>, active_targets: Vec<u64>) {
        for (feature, target) in features.into_iter().zip(targets) {
            let deque = self.samples.entry(target).or_default();

            deque.push_front(feature);

            if let Some(budget) = self.budget {
                deque.truncate(budget);
            }
        }

        let new_samples = active_targets
            .into_iter()
            .filter_map(|k| Some((k, self.samples.remove(&k)?)))
            .collect();

        self.samples = new_samples;
    }

    fn distance(&self, features: ArrayView2<'_, f32>, targets: &[u64]) -> Array2<f32> {
        let nfeatures = features.nrows();
        let n = nfeatures.max(targets.len());

        let mut cost_matrix = Array2::from_elem((n, n), INFTY_COST);

        for (i, target) in targets.iter().enumerate() {
            let gallery = match self.samples.get(target) {
                Some(gallery) if !gallery.is_empty() => gallery,
                _ => continue,
            };

            let mut sample_features = Array2::zeros((gallery.len(), features.ncols()));
            for (mut row, sample) in sample_features.axis_iter_mut(Axis(0)).zip(gallery.iter()) {
                row.assign(sample);
            }

            cost_matrix
                .slice_mut(s![i, ..nfeatures])
                .assign(&match self.metric_kind {
                    NearestNeighborMetricKind::EuclideanDistance => {
                        nn_euclidean_distance(sample_features.view(), features)
                    }
                    NearestNeighborMetricKind::CosineDistance => nn_cosine_distance(sample_features.view(), features),
                });
        }

        cost_matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_of_parallel_and_orthogonal_vectors() {
        let d = cosine_distance(
            aview2(&[[1.0f32, 0.0], [0.0, 2.0]]),
            aview2(&[[3.0f32, 0.0]]),
            false,
        );

        assert!(d[(0, 0)].abs() < 1e-6);
        assert!((d[(1, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn budget_limits_gallery_and_inactive_targets_are_dropped() {
        let mut metric = NearestNeighborDistanceMetric::new(NearestNeighborMetricKind::CosineDistance, 0.2, Some(2));

        let features = vec![arr1(&[1.0f32, 0.0]), arr1(&[0.9, 0.1]), arr1(&[0.8, 0.2]), arr1(&[0.0, 1.0])];
        metric.partial_fit(features, vec![1, 1, 1, 2], vec![1]);

        assert_eq!(metric.sample_count(1), 2);
        assert_eq!(metric.sample_count(2), 0);
    }

    #[test]
    fn unknown_targets_cost_infinity() {
        let mut metric = NearestNeighborDistanceMetric::new(NearestNeighborMetricKind::CosineDistance, 0.2, None);
        metric.partial_fit(vec![arr1(&[1.0f32, 0.0])], vec![1], vec![1]);

        let cost = metric.distance(aview2(&[[1.0f32, 0.0]]), &[1, 9]);

        assert_eq!(cost.dim(), (2, 2));
        assert!(cost[(0, 0)] < 1e-6);
        assert_eq!(cost[(1, 0)], INFTY_COST);
    }
}
