//! Linear inequality constraints `A·x ≥ b`.

use nalgebra::{DMatrix, DVector};

/// Linear constraints on a parameter vector.
///
/// An empty matrix (zero rows) means the model is unconstrained.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraints {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl LinearConstraints {
    pub fn empty(n: usize) -> Self {
        Self {
            a: DMatrix::zeros(0, n),
            b: DVector::zeros(0),
        }
    }

    pub fn from_rows(n: usize, rows: &[(Vec<(usize, f64)>, f64)]) -> Self {
        let mut a = DMatrix::zeros(rows.len(), n);
        let mut b = DVector::zeros(rows.len());
        for (i, (coeffs, rhs)) in rows.iter().enumerate() {
            for &(j, c) in coeffs {
                a[(i, j)] = c;
            }
            b[i] = *rhs;
        }
        Self { a, b }
    }

    pub fn is_empty(&self) -> bool {
        self.a.nrows() == 0
    }

    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    /// Smallest slack `min_i (A·x - b)_i`; `+∞` when unconstrained.
    pub fn min_slack(&self, x: &DVector<f64>) -> f64 {
        if self.is_empty() {
            return f64::INFINITY;
        }
        let slack = &self.a * x - &self.b;
        slack.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn is_satisfied(&self, x: &DVector<f64>) -> bool {
        self.min_slack(x) >= 0.0
    }

    /// Express the constraints in scaled coordinates `x = S·y`.
    pub fn scaled(&self, scale: &DVector<f64>) -> Self {
        let mut a = self.a.clone();
        for (j, s) in scale.iter().enumerate() {
            a.column_mut(j).scale_mut(*s);
        }
        Self {
            a,
            b: self.b.clone(),
        }
    }

    /// Move `x` into the feasible region by cyclic projection onto the
    /// violated half-spaces. Returns `None` if no feasible point is reached.
    pub fn repair(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        if self.is_satisfied(x) {
            return Some(x.clone());
        }
        let mut y = x.clone();
        for _ in 0..200 {
            let mut moved = false;
            for i in 0..self.a.nrows() {
                let row = self.a.row(i).transpose();
                let lhs = row.dot(&y);
                if lhs < self.b[i] {
                    let norm2 = row.norm_squared();
                    if norm2 == 0.0 {
                        return None;
                    }
                    // Land slightly inside so rounding keeps the point feasible.
                    let margin = 1e-12 * (1.0 + self.b[i].abs());
                    y += &row * ((self.b[i] - lhs + margin) / norm2);
                    moved = true;
                }
            }
            if !moved || self.is_satisfied(&y) {
                break;
            }
        }
        self.is_satisfied(&y).then_some(y)
    }
}
