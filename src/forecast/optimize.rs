//! Derivative-free minimisation for the handful of model parameters.

#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    pub max_iterations: usize,
    /// Relative spread of objective values across the simplex.
    pub f_tolerance: f64,
    /// Largest vertex distance from the best vertex.
    pub x_tolerance: f64,
    pub initial_step: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        NelderMeadOptions {
            max_iterations: 2_000,
            f_tolerance: 1e-10,
            x_tolerance: 1e-7,
            initial_step: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Standard Nelder–Mead (reflection 1, expansion 2, contraction ½, shrink ½).
pub fn nelder_mead<F>(objective: F, start: &[f64], opts: NelderMeadOptions) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let dim = start.len();
    let eval = |x: &[f64]| {
        let v = objective(x);
        if v.is_finite() { v } else { f64::INFINITY }
    };

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    simplex.push((start.to_vec(), eval(start)));
    for i in 0..dim {
        let mut x = start.to_vec();
        x[i] += opts.initial_step;
        let v = eval(&x);
        simplex.push((x, v));
    }

    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < opts.max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        if has_converged(&simplex, opts) {
            converged = true;
            break;
        }
        iterations += 1;

        let worst = dim;
        let centroid: Vec<f64> = (0..dim)
            .map(|j| simplex[..worst].iter().map(|(x, _)| x[j]).sum::<f64>() / dim as f64)
            .collect();
        let along = |t: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&simplex[worst].0)
                .map(|(c, w)| c + t * (w - c))
                .collect()
        };

        let reflected = along(-1.0);
        let f_reflected = eval(&reflected);

        if f_reflected < simplex[0].1 {
            let expanded = along(-2.0);
            let f_expanded = eval(&expanded);
            simplex[worst] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }
        if f_reflected < simplex[worst - 1].1 {
            simplex[worst] = (reflected, f_reflected);
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < simplex[worst].1 {
            let x = along(-0.5);
            let v = eval(&x);
            (x, v)
        } else {
            let x = along(0.5);
            let v = eval(&x);
            (x, v)
        };
        if f_contracted < simplex[worst].1.min(f_reflected) {
            simplex[worst] = (contracted, f_contracted);
            continue;
        }

        // shrink toward the best vertex
        let best = simplex[0].0.clone();
        for vertex in simplex.iter_mut().skip(1) {
            let x: Vec<f64> = best.iter().zip(&vertex.0).map(|(b, v)| b + 0.5 * (v - b)).collect();
            let v = eval(&x);
            *vertex = (x, v);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (x, value) = simplex.swap_remove(0);
    Minimum {
        x,
        value,
        iterations,
        converged,
    }
}

fn has_converged(sorted: &[(Vec<f64>, f64)], opts: NelderMeadOptions) -> bool {
    let best = sorted[0].1;
    let worst = sorted[sorted.len() - 1].1;
    if !best.is_finite() || !worst.is_finite() {
        return false;
    }
    if worst - best <= opts.f_tolerance * (best.abs() + opts.f_tolerance) {
        return true;
    }
    let spread = sorted[1..]
        .iter()
        .flat_map(|(x, _)| x.iter().zip(&sorted[0].0).map(|(a, b)| (a - b).abs()))
        .fold(0.0f64, f64::max);
    spread <= opts.x_tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_minimum_of_shifted_quadratic() {
        let f = |x: &[f64]| (x[0] - 1.5).powi(2) + 3.0 * (x[1] + 0.5).powi(2) + (x[2] - 0.2).powi(2);
        let m = nelder_mead(f, &[0.0, 0.0, 0.0], NelderMeadOptions::default());
        assert!(m.converged);
        assert!((m.x[0] - 1.5).abs() < 1e-3);
        assert!((m.x[1] + 0.5).abs() < 1e-3);
        assert!((m.x[2] - 0.2).abs() < 1e-3);
    }

    #[test]
    fn flat_objective_converges_immediately() {
        let m = nelder_mead(|_| 4.0, &[0.3, -0.1], NelderMeadOptions::default());
        assert!(m.converged);
        assert_eq!(m.iterations, 0);
        assert_eq!(m.value, 4.0);
    }

    #[test]
    fn reports_non_convergence_when_budget_is_exhausted() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let opts = NelderMeadOptions {
            max_iterations: 3,
            ..NelderMeadOptions::default()
        };
        let m = nelder_mead(f, &[-1.2, 1.0], opts);
        assert!(!m.converged);
        assert_eq!(m.iterations, 3);
    }

    #[test]
    fn non_finite_regions_are_avoided() {
        let f = |x: &[f64]| if x[0] < 0.0 { f64::NAN } else { (x[0] - 2.0).powi(2) };
        let m = nelder_mead(f, &[1.0], NelderMeadOptions::default());
        assert!((m.x[0] - 2.0).abs() < 1e-3);
    }
}
