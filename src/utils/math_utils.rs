use ordered_float::OrderedFloat;

pub struct MathUtils {}

impl MathUtils {
    /**
     * Gets the maximum element's index of an array of f64 values
     * Rather convoluted due to Rust not allowing proper comparisons between floats
     */
    pub fn max_element_index(array: &[f64], start: usize, finish: usize) -> usize {
        let mut max_i = start;
        for i in (start + 1)..finish {
            if array[i] > array[max_i] {
                max_i = i;
            }
        }

        max_i
    }

    pub fn max_element(array: &[f64]) -> f64 {
        *array
            .iter()
            .max_by_key(|x| OrderedFloat(**x))
            .unwrap_or(&f64::NAN)
    }

    /**
     * Normalizes the real-space probability array in place so it sums to one.
     *
     * Does not assume anything about the values in the array, beyond that no
     * elements are below 0. A zero-sum array is left untouched.
     */
    pub fn normalize_sum_to_one(array: &mut [f64]) {
        let sum = array.iter().sum::<f64>();
        assert!(
            sum >= 0.0,
            "Values in probability array sum to a negative number"
        );
        if sum > 0.0 {
            array.iter_mut().for_each(|x| *x /= sum);
        }
    }

    /**
     * Draws an index from the categorical distribution given by `probs`
     * (non-negative, summing to ~1) and a uniform variate `u` in [0, 1).
     * The last index absorbs any floating-point shortfall.
     */
    pub fn cumulative_sample(probs: &[f64], u: f64) -> usize {
        let mut acc = 0.0;
        for (i, p) in probs.iter().enumerate() {
            acc += p;
            if u < acc {
                return i;
            }
        }
        probs.len() - 1
    }

    pub fn is_valid_probability(result: f64) -> bool {
        (0.0..=1.0).contains(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_and_sample() {
        let mut v = vec![2.0, 6.0];
        MathUtils::normalize_sum_to_one(&mut v);
        assert!((v[0] - 0.25).abs() < 1e-12);
        assert_eq!(MathUtils::cumulative_sample(&v, 0.1), 0);
        assert_eq!(MathUtils::cumulative_sample(&v, 0.9), 1);
        assert_eq!(MathUtils::cumulative_sample(&v, 0.999999), 1);
        assert_eq!(MathUtils::max_element_index(&v, 0, 2), 1);
    }
}
