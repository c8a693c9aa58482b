/// Median of `values`. Even-sized samples take the mean of the two middle values.
/// Returns `None` for an empty sample.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// `(min, max)` span of an iterator, or `None` when empty.
pub fn span<I>(values: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_sample_takes_middle_value() {
        let mut v = vec![14_000.0, 10_000.0, 12_000.0];
        assert_eq!(median(&mut v), Some(12_000.0));
    }

    #[test]
    fn even_sample_interpolates_middle_pair() {
        let mut v = vec![9_000.0, 12_000.0, 10_000.0, 15_000.0];
        assert_eq!(median(&mut v), Some(11_000.0));
    }

    #[test]
    fn empty_sample_has_no_median() {
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn span_of_values() {
        assert_eq!(span([3.0, -1.0, 7.5]), Some((-1.0, 7.5)));
        assert_eq!(span(std::iter::empty()), None);
    }
}
