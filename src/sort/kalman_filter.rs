use crate::error::{Error, Result};
use crate::sort::{BBox, Xyah};
use nalgebra::{Cholesky, DMatrix, Dyn};
use ndarray::prelude::*;

/// 0.95 quantile of the chi-square distribution for 1 to 9 degrees of freedom,
/// indexed by `dof - 1`. Squared Mahalanobis distances above it are gated out.
pub const CHI_2_INV_95: [f32; 9] = [
    3.8415, // 1
    5.9915, // 2
    7.8147, // 3
    9.4877, // 4
    11.070, // 5
    12.592, // 6
    14.067, // 7
    15.507, // 8
    16.919, // 9
];

/// Constant-velocity Kalman filter over `(x, y, a, h, vx, vy, va, vh)`.
///
/// `(x, y)` is the box center, `a` the aspect ratio and `h` the height. The
/// measurement is the first four components, observed directly.
#[derive(Clone, Debug)]
pub struct KalmanFilter {
    motion_mat: Array2<f32>,
    update_mat: Array2<f32>,
    std_weight_position: f32,
    std_weight_velocity: f32,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        let (ndim, dt) = (4, 1.);

        let mut motion_mat = Array2::eye(2 * ndim);

        for i in 0..ndim {
            motion_mat[(i, ndim + i)] = dt;
        }

        let mut update_mat = Array2::zeros((ndim, 2 * ndim));

        for i in 0..ndim {
            update_mat[(i, i)] = 1.0;
        }

        // Motion and observation uncertainty relative to the current height.
        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }
}

impl KalmanFilter {
    /// State of a new track seeded from one measurement, zero velocity.
    pub fn initiate(&self, measurement: BBox<Xyah>) -> (Array1<f32>, Array2<f32>) {
        let mut mean = Array1::zeros((8,));
        mean.slice_mut(s![..4]).assign(&measurement.as_view());

        let h = measurement.height();
        let std = arr1(&[
            2.0 * self.std_weight_position * h,
            2.0 * self.std_weight_position * h,
            1.0e-2,
            2.0 * self.std_weight_position * h,
            10.0 * self.std_weight_velocity * h,
            10.0 * self.std_weight_velocity * h,
            1.0e-5,
            10.0 * self.std_weight_velocity * h,
        ]);

        let covariance = Array2::from_diag(&(&std * &std));

        (mean, covariance)
    }

    /// Advances `(mean, covariance)` by one frame.
    pub fn predict(&self, mean: ArrayView1<'_, f32>, covariance: ArrayView2<'_, f32>) -> (Array1<f32>, Array2<f32>) {
        let std = arr1(&[
            // position
            self.std_weight_position * mean[3],
            self.std_weight_position * mean[3],
            1e-2,
            self.std_weight_position * mean[3],
            // velocity
            self.std_weight_velocity * mean[3],
            self.std_weight_velocity * mean[3],
            1e-5,
            self.std_weight_velocity * mean[3],
        ]);

        let motion_cov = Array2::from_diag(&(&std * &std));
        let mean = self.motion_mat.dot(&mean);
        let covariance = self.motion_mat.dot(&covariance).dot(&self.motion_mat.t());

        (mean, covariance + motion_cov)
    }

    // State distribution seen in measurement space, with measurement noise.
    fn project(&self, mean: ArrayView1<'_, f32>, covariance: ArrayView2<'_, f32>) -> (Array1<f32>, Array2<f32>) {
        let std = arr1(&[
            self.std_weight_position * mean[3],
            self.std_weight_position * mean[3],
            1e-1,
            self.std_weight_position * mean[3],
        ]);

        let innovation_cov = Array2::from_diag(&(&std * &std));
        let mean = self.update_mat.dot(&mean);
        let covariance = self.update_mat.dot(&covariance).dot(&self.update_mat.t());

        (mean, covariance + innovation_cov)
    }

    /// Corrects a predicted state with an `(x, y, a, h)` measurement.
    pub fn update(
        &self,
        mean: ArrayView1<'_, f32>,
        covariance: ArrayView2<'_, f32>,
        measurement: ArrayView1<'_, f32>,
    ) -> Result<(Array1<f32>, Array2<f32>)> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        // chol shape (4, 4)
        let chol = cholesky(projected_cov.view())?;

        // (8, 4) = P H^T, gain = P H^T S^-1
        let cross_cov = covariance.dot(&self.update_mat.t());
        let kalman_gain = to_array(&chol.solve(&to_matrix(cross_cov.t()))).reversed_axes();

        let innovation = &measurement - &projected_mean;
        let new_mean = &mean + &kalman_gain.dot(&innovation);
        let new_covariance = &covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        Ok((new_mean, new_covariance))
    }

    /// Squared Mahalanobis distance from the projected state to each row of
    /// the `Nx4` `measurements`.
    ///
    /// Compare against `CHI_2_INV_95[3]`, or `CHI_2_INV_95[1]` with
    /// `only_position`, which looks at the box center alone.
    pub fn gating_distance(
        &self,
        mean: ArrayView1<'_, f32>,
        covariance: ArrayView2<'_, f32>,
        measurements: ArrayView2<'_, f32>,
        only_position: bool,
    ) -> Result<Array1<f32>> {
        let (mean, covariance) = self.project(mean, covariance);

        let (mean, covariance, measurements) = if only_position {
            (
                mean.slice(s![..2]),
                covariance.slice(s![..2, ..2]),
                measurements.slice(s![.., ..2]),
            )
        } else {
            (mean.view(), covariance.view(), measurements.view())
        };

        let d = &measurements - &mean;

        let z = cholesky(covariance)?
            .l()
            .solve_lower_triangular(&to_matrix(d.t()))
            .ok_or_else(|| Error::Tracker("singular covariance factor".into()))?;
        let z = to_array(&z);

        Ok((&z * &z).sum_axis(Axis(0)))
    }
}

fn to_matrix(a: ArrayView2<'_, f32>) -> DMatrix<f32> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)])
}

fn to_array(m: &DMatrix<f32>) -> Array2<f32> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

fn cholesky(a: ArrayView2<'_, f32>) -> Result<Cholesky<f32, Dyn>> {
    to_matrix(a)
        .cholesky()
        .ok_or_else(|| Error::Tracker("covariance is not positive definite".into()))
}
