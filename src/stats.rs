//! Robust statistics

/// Median of the values, the mean of the two middle ones for an even count
///
/// Mutates the input buffer (partial sort).
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (left, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        Some(upper)
    } else {
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(0.5 * (lower + upper))
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Iterative sigma clipping around the median
///
/// Returns the `[low, high]` acceptance interval after at most `max_iters`
/// iterations, or earlier once no more value is rejected.
pub fn sigma_clip_bounds(values: &[f64], sigma: f64, max_iters: usize) -> Option<(f64, f64)> {
    let mut kept: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    let mut bounds = (f64::NEG_INFINITY, f64::INFINITY);
    for _ in 0..max_iters {
        let std = std_dev(&kept)?;
        let center = median_mut(&mut kept)?;
        bounds = (center - sigma * std, center + sigma * std);
        let n = kept.len();
        kept.retain(|x| *x >= bounds.0 && *x <= bounds.1);
        if kept.len() == n {
            break;
        }
    }
    (!kept.is_empty()).then_some(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_even() {
        assert_eq!(median_mut(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_mut(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median_mut(&mut []), None);
    }

    #[test]
    fn clipping_rejects_outliers() {
        let mut values: Vec<f64> = (0..100).map(|i| 10.0 + (i % 5) as f64 * 0.1).collect();
        values.push(1e6);
        values.push(-1e6);
        let (lo, hi) = sigma_clip_bounds(&values, 3.0, 3).unwrap();
        assert!(lo > 9.0 && hi < 11.0, "({lo}, {hi})");
    }

    #[test]
    fn constant_values_survive() {
        let (lo, hi) = sigma_clip_bounds(&[5.0; 10], 3.0, 3).unwrap();
        assert_eq!((lo, hi), (5.0, 5.0));
    }
}
