//! Empirical orthogonal function decomposition of a `(time, lat, lon)`
//! anomaly field.
//!
//! Grid points are weighted by `sqrt(cos(lat))` and centered in time.
//! Points with a missing value at any time step are left out of the
//! decomposition and come back as NaN in the EOF maps. The decomposition
//! solves the `time x time` problem, which is small for monthly or
//! seasonal series.

use crate::errors::{PmpError, Result};
use crate::field::{Field, Grid};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::{Array2, ArrayView2};
use tracing::debug;

/// Scaling applied to principal components (and to pseudo-PCs from
/// [`EofSolver::project_field`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcScaling {
    /// Raw projection onto unit-length EOFs
    #[default]
    Unscaled,
    /// Divided by the square root of the eigenvalue (unit variance)
    UnitVariance,
    /// Multiplied by the square root of the eigenvalue
    ScaledByEigenvalue,
}

impl PcScaling {
    fn factor(self, eigenvalue: f64) -> f64 {
        match self {
            Self::Unscaled => 1.0,
            Self::UnitVariance => 1.0 / eigenvalue.sqrt(),
            Self::ScaledByEigenvalue => eigenvalue.sqrt(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EofSolver {
    grid: Grid,
    n_time: usize,
    /// Flat `(lat, lon)` indices used in the decomposition
    valid: Vec<usize>,
    weights: DVector<f64>,
    /// Centered, unweighted data, `time x valid`
    anomalies: DMatrix<f64>,
    /// Unit-length weighted EOFs as rows, `neofs x valid`
    eofs: DMatrix<f64>,
    /// Unscaled PCs as columns, `time x neofs`
    pcs: DMatrix<f64>,
    eigenvalues: Vec<f64>,
    total_variance: f64,
}

impl EofSolver {
    /// # Errors
    ///
    /// Fails for fewer than two time steps, when every grid point has a
    /// missing value, or when the field has no variance.
    pub fn new(field: &Field) -> Result<Self> {
        let n_time = field.n_time();
        if n_time < 2 {
            return Err(PmpError::Eof(format!(
                "EOF analysis needs at least 2 time steps, '{}' has {n_time}",
                field.name
            )));
        }
        let (nlat, nlon) = field.grid.shape();
        let flat = field
            .data
            .to_shape((n_time, nlat * nlon))?
            .to_owned();

        let valid: Vec<usize> = (0..nlat * nlon)
            .filter(|&p| flat.column(p).iter().all(|v| v.is_finite()))
            .collect();
        if valid.is_empty() {
            return Err(PmpError::Eof("all grid points contain missing values".into()));
        }

        let lat_weights = field.grid.sqrt_coslat_weights();
        let weights = DVector::from_iterator(valid.len(), valid.iter().map(|&p| lat_weights[p / nlon]));

        let mut anomalies = DMatrix::from_fn(n_time, valid.len(), |t, k| flat[[t, valid[k]]]);
        for mut col in anomalies.column_iter_mut() {
            let mean = col.mean();
            col.add_scalar_mut(-mean);
        }

        let mut weighted = anomalies.clone();
        for (k, mut col) in weighted.column_iter_mut().enumerate() {
            col *= weights[k];
        }

        let gram = &weighted * weighted.transpose();
        let total_variance = gram.trace() / (n_time - 1) as f64;
        if total_variance <= 0.0 {
            return Err(PmpError::Eof(format!("'{}' has no variance", field.name)));
        }
        let eig = SymmetricEigen::new(gram);

        let mut order: Vec<usize> = (0..n_time).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let largest = eig.eigenvalues[order[0]];
        let kept: Vec<usize> = order
            .into_iter()
            .filter(|&i| eig.eigenvalues[i] > largest * 1e-12)
            .collect();

        let mut eofs = DMatrix::zeros(kept.len(), valid.len());
        let mut pcs = DMatrix::zeros(n_time, kept.len());
        let mut eigenvalues = Vec::with_capacity(kept.len());
        for (k, &i) in kept.iter().enumerate() {
            let singular = eig.eigenvalues[i].sqrt();
            let u = eig.eigenvectors.column(i);
            let eof = weighted.transpose() * u / singular;
            eofs.set_row(k, &eof.transpose());
            pcs.set_column(k, &(u * singular));
            eigenvalues.push(eig.eigenvalues[i] / (n_time - 1) as f64);
        }
        debug!(
            modes = eigenvalues.len(),
            points = valid.len(),
            n_time,
            "EOF decomposition"
        );

        Ok(Self {
            grid: field.grid.clone(),
            n_time,
            valid,
            weights,
            anomalies,
            eofs,
            pcs,
            eigenvalues,
            total_variance,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn n_modes(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    fn check_modes(&self, n: usize) -> Result<()> {
        if n == 0 || n > self.n_modes() {
            return Err(PmpError::Eof(format!(
                "requested {n} modes, {} available",
                self.n_modes()
            )));
        }
        Ok(())
    }

    /// Fraction of the total variance explained by each mode
    pub fn variance_fraction(&self) -> Vec<f64> {
        self.eigenvalues
            .iter()
            .map(|l| l / self.total_variance)
            .collect()
    }

    /// Principal components as a `(time, npcs)` array.
    pub fn pcs(&self, npcs: usize, scaling: PcScaling) -> Result<Array2<f64>> {
        self.check_modes(npcs)?;
        Ok(Array2::from_shape_fn((self.n_time, npcs), |(t, k)| {
            self.pcs[(t, k)] * scaling.factor(self.eigenvalues[k])
        }))
    }

    fn to_map(&self, values: impl Iterator<Item = f64>) -> Array2<f64> {
        let (nlat, nlon) = self.grid.shape();
        let mut map = Array2::from_elem((nlat, nlon), f64::NAN);
        for (&p, v) in self.valid.iter().zip(values) {
            map[[p / nlon, p % nlon]] = v;
        }
        map
    }

    /// EOFs expressed as the covariance between each unit-variance PC and
    /// the input anomalies, in the units of the input field.
    pub fn eofs_as_covariance(&self, neofs: usize) -> Result<Vec<Array2<f64>>> {
        self.check_modes(neofs)?;
        let dof = (self.n_time - 1) as f64;
        Ok((0..neofs)
            .map(|k| {
                let pc = self.pcs.column(k) / self.eigenvalues[k].sqrt();
                let cov = self.anomalies.transpose() * pc / dof;
                self.to_map(cov.iter().copied())
            })
            .collect())
    }

    /// Project another field onto the EOFs, giving pseudo-PCs `(time, neofs)`.
    /// The field is not centered; missing values count as zero.
    pub fn project_field(&self, field: &Field, neofs: usize, scaling: PcScaling) -> Result<Array2<f64>> {
        self.check_modes(neofs)?;
        if field.grid.shape() != self.grid.shape() {
            let (a, b) = (field.grid.shape(), self.grid.shape());
            return Err(PmpError::ShapeMismatch {
                context: "project_field grid".into(),
                left: vec![a.0, a.1],
                right: vec![b.0, b.1],
            });
        }
        let (_, nlon) = self.grid.shape();
        let n_time = field.n_time();
        let data = DMatrix::from_fn(n_time, self.valid.len(), |t, k| {
            let p = self.valid[k];
            let v = field.data[[t, p / nlon, p % nlon]];
            if v.is_finite() {
                v * self.weights[k]
            } else {
                0.0
            }
        });
        let eofs = self.eofs.rows(0, neofs);
        let projected = data * eofs.transpose();
        Ok(Array2::from_shape_fn((n_time, neofs), |(t, k)| {
            projected[(t, k)] * scaling.factor(self.eigenvalues[k])
        }))
    }

    /// Typical eigenvalue errors after North et al. (1982), optionally as a
    /// fraction of the total variance.
    pub fn north_test(&self, neigs: usize, vfscaled: bool) -> Vec<f64> {
        let factor = (2.0 / self.n_time as f64).sqrt();
        self.eigenvalues
            .iter()
            .take(neigs)
            .map(|l| {
                let err = l * factor;
                if vfscaled {
                    err / self.total_variance
                } else {
                    err
                }
            })
            .collect()
    }
}

/// Weighted area mean of an EOF map over a sub-box, skipping NaN.
pub(crate) fn box_mean(grid: &Grid, map: ArrayView2<'_, f64>, lat: (f64, f64), lon: Option<(f64, f64)>) -> f64 {
    let lat_idx = grid.lat_indices(lat.0.min(lat.1), lat.0.max(lat.1));
    let lon_idx: Vec<usize> = match lon {
        Some((a, b)) => grid.lon_indices(a, b),
        None => (0..grid.lon.len()).collect(),
    };
    let weights = grid.area_weights();
    let mut sum = 0.0;
    let mut wsum = 0.0;
    for &i in &lat_idx {
        for &j in &lon_idx {
            let v = map[[i, j]];
            if v.is_finite() {
                sum += v * weights[[i, j]];
                wsum += weights[[i, j]];
            }
        }
    }
    if wsum > 0.0 {
        sum / wsum
    } else {
        f64::NAN
    }
}
