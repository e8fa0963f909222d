//! Bisection search core, generic over the probe function.
//!
//! The probe runs one full simulation at the midpoint parameter value and
//! returns the resulting metric, or `None` when the probe itself failed.
//! A probe is feasible when its metric is finite and below the feasibility
//! limit; the search then narrows toward smaller parameter values, looking
//! for the minimal feasible one.

/// Result of one bisection search.
#[derive(Debug, Clone, Copy)]
pub struct BisectionOutcome {
    /// Minimal parameter value that satisfied the constraint, or
    /// `f64::INFINITY` when no probe ever did.
    pub optimal_parameter: f64,
    /// Metric value achieved at the optimal parameter.
    pub optimal_metric: f64,
    /// Number of probes executed.
    pub probes: usize,
}

impl BisectionOutcome {
    pub fn found_feasible(&self) -> bool {
        self.optimal_parameter.is_finite()
    }
}

/// Search `[low, high]` for the minimal parameter value whose probed
/// metric is finite and below `feasibility_limit`.
///
/// Terminates when the bracket is narrower than `tolerance` or after
/// `max_iterations` probes. A probe returning `None` (failed simulation)
/// counts as infeasible for that midpoint and the search continues.
pub fn bisection_search<P>(
    search_range: (f64, f64),
    tolerance: f64,
    max_iterations: usize,
    feasibility_limit: f64,
    mut probe: P,
) -> BisectionOutcome
where
    P: FnMut(usize, f64) -> Option<f64>,
{
    let (mut low, mut high) = search_range;
    let mut best_parameter = f64::INFINITY;
    let mut best_metric = f64::INFINITY;
    let mut probes = 0;

    for iteration in 0..max_iterations {
        if high - low < tolerance {
            tracing::info!(tolerance, "bisection search converged");
            break;
        }
        let mid = f64::midpoint(low, high);
        probes += 1;

        let metric = probe(iteration, mid);
        let feasible = matches!(metric, Some(m) if m.is_finite() && m < feasibility_limit);
        if feasible {
            best_parameter = mid;
            best_metric = metric.unwrap_or(f64::INFINITY);
            high = mid;
        } else {
            low = mid;
        }
    }

    BisectionOutcome {
        optimal_parameter: best_parameter,
        optimal_metric: best_metric,
        probes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_to_minimal_feasible_value() {
        // metric(p) = 100 / p, feasible (< 10) exactly when p > 10, so the
        // minimal feasible parameter is the analytic root p = 10.
        let outcome = bisection_search((1.0, 20.0), 1e-6, 60, 10.0, |_, p| Some(100.0 / p));
        assert!(outcome.found_feasible());
        assert!((outcome.optimal_parameter - 10.0).abs() < 1e-5);
        assert!(outcome.probes <= 60);
    }

    #[test]
    fn test_respects_max_iterations() {
        let outcome = bisection_search((0.0, 1.0), 0.0, 7, 0.5, |_, p| Some(p));
        assert_eq!(outcome.probes, 7);
    }

    #[test]
    fn test_infeasible_returns_infinity_without_panicking() {
        let outcome = bisection_search((1.0, 2.0), 1e-3, 20, 10.0, |_, _| Some(f64::NAN));
        assert!(!outcome.found_feasible());
        assert!(outcome.optimal_parameter.is_infinite());
        assert!(outcome.optimal_metric.is_infinite());
    }

    #[test]
    fn test_failed_probe_treated_as_infeasible() {
        // Probes below 1.5 fail outright; the search must still find the
        // minimal feasible value above that.
        let outcome = bisection_search((1.0, 2.0), 1e-6, 50, 10.0, |_, p| {
            if p < 1.5 { None } else { Some(1.0) }
        });
        assert!(outcome.found_feasible());
        assert!((outcome.optimal_parameter - 1.5).abs() < 1e-5);
    }

    #[test]
    fn test_metric_at_limit_is_infeasible() {
        // A metric exactly equal to the limit does not satisfy "< limit".
        let outcome = bisection_search((0.0, 2.0), 1e-9, 5, 1.0, |_, _| Some(1.0));
        assert!(!outcome.found_feasible());
    }
}
