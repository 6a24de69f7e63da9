//! Constrained Nelder–Mead simplex minimiser.
//!
//! Constraints are enforced as an extreme barrier: infeasible points score
//! `+∞`, so the simplex never accepts them. The starting point must be
//! feasible (see `LinearConstraints::repair`).

use nalgebra::DVector;

use crate::math::LinearConstraints;

pub const MAX_ITER_WARNING: &str = "Maximum number of iterations reached.";

#[derive(Debug, Clone)]
pub struct SimplexOptions {
    /// Stop when the spread of function values over the simplex drops to this.
    pub func_tol: f64,
    /// Stop when every vertex is within this relative distance of the best one.
    pub x_tol: f64,
    pub max_iterations: usize,
    /// Known lower bound of the objective; reaching it stops immediately.
    pub f_floor: Option<f64>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            func_tol: 1e-25,
            x_tol: 1e-12,
            max_iterations: 10_000_000,
            f_floor: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinResult {
    pub x: DVector<f64>,
    pub f: f64,
    pub iter: usize,
    pub f_count: usize,
    pub warning: Option<String>,
}

struct Counted<'a, F> {
    f: &'a F,
    constraints: Option<&'a LinearConstraints>,
    calls: usize,
}

impl<F: Fn(&DVector<f64>) -> f64> Counted<'_, F> {
    fn eval(&mut self, x: &DVector<f64>) -> f64 {
        if let Some(c) = self.constraints {
            if !c.is_satisfied(x) {
                return f64::INFINITY;
            }
        }
        self.calls += 1;
        let v = (self.f)(x);
        if v.is_nan() { f64::INFINITY } else { v }
    }
}

/// Minimise `f` from `x0`.
pub fn minimise<F>(
    f: &F,
    x0: &DVector<f64>,
    constraints: Option<&LinearConstraints>,
    opts: &SimplexOptions,
) -> MinResult
where
    F: Fn(&DVector<f64>) -> f64,
{
    let n = x0.len();
    let mut obj = Counted {
        f,
        constraints: constraints.filter(|c| !c.is_empty()),
        calls: 0,
    };

    let f0 = obj.eval(x0);
    let at_floor = |v: f64| opts.f_floor.is_some_and(|fl| v <= fl);
    if n == 0 || at_floor(f0) {
        return MinResult {
            x: x0.clone(),
            f: f0,
            iter: 0,
            f_count: obj.calls,
            warning: None,
        };
    }

    let mut verts: Vec<(DVector<f64>, f64)> = Vec::with_capacity(n + 1);
    verts.push((x0.clone(), f0));
    for i in 0..n {
        verts.push(initial_vertex(&mut obj, x0, i));
    }

    let mut iter = 0;
    let mut warning = None;
    loop {
        verts.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (best_f, worst_f) = (verts[0].1, verts[n].1);

        if at_floor(best_f) || converged(&verts, best_f, worst_f, opts) {
            break;
        }
        if iter >= opts.max_iterations {
            warning = Some(MAX_ITER_WARNING.to_string());
            break;
        }
        iter += 1;

        let mut centroid = DVector::zeros(n);
        for (v, _) in &verts[..n] {
            centroid += v;
        }
        centroid /= n as f64;

        let worst = verts[n].0.clone();
        let xr = &centroid + (&centroid - &worst);
        let fr = obj.eval(&xr);

        if fr < verts[0].1 {
            let xe = &centroid + (&xr - &centroid) * 2.0;
            let fe = obj.eval(&xe);
            verts[n] = if fe < fr { (xe, fe) } else { (xr, fr) };
            continue;
        }
        if fr < verts[n - 1].1 {
            verts[n] = (xr, fr);
            continue;
        }

        let (xc, fc) = if fr < worst_f {
            let xc = &centroid + (&xr - &centroid) * 0.5;
            let fc = obj.eval(&xc);
            (xc, fc)
        } else {
            let xc = &centroid + (&worst - &centroid) * 0.5;
            let fc = obj.eval(&xc);
            (xc, fc)
        };
        if fc < fr.min(worst_f) {
            verts[n] = (xc, fc);
            continue;
        }

        let best = verts[0].0.clone();
        for v in verts.iter_mut().skip(1) {
            let xs = &best + (&v.0 - &best) * 0.5;
            let fs = obj.eval(&xs);
            *v = (xs, fs);
        }
    }

    let (x, f) = verts.swap_remove(0);
    MinResult {
        x,
        f,
        iter,
        f_count: obj.calls,
        warning,
    }
}

fn initial_vertex<F: Fn(&DVector<f64>) -> f64>(
    obj: &mut Counted<'_, F>,
    x0: &DVector<f64>,
    i: usize,
) -> (DVector<f64>, f64) {
    let mut h = if x0[i] != 0.0 { 0.05 * x0[i].abs() } else { 0.00025 };
    let mut last = None;
    for _ in 0..20 {
        for sign in [1.0, -1.0] {
            let mut x = x0.clone();
            x[i] += sign * h;
            let fx = obj.eval(&x);
            if fx.is_finite() {
                return (x, fx);
            }
            last = Some((x, fx));
        }
        h *= 0.5;
    }
    last.unwrap_or_else(|| (x0.clone(), f64::INFINITY))
}

fn converged(
    verts: &[(DVector<f64>, f64)],
    best_f: f64,
    worst_f: f64,
    opts: &SimplexOptions,
) -> bool {
    if worst_f.is_finite() && (worst_f - best_f).abs() <= opts.func_tol {
        return true;
    }
    let best = &verts[0].0;
    verts[1..].iter().all(|(v, _)| {
        v.iter()
            .zip(best.iter())
            .all(|(a, b)| (a - b).abs() <= opts.x_tol * (1.0 + b.abs()))
    })
}
