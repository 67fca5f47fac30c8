//! L2 Squared distance metric.

use super::Metric;

/// L2 Squared (Euclidean Squared) distance metric.
///
/// Calculates `sum((a_i - b_i)^2)`.
/// Does not perform the square root operation, as squared distances preserve
/// ordering and are computationally cheaper.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Squared;

impl Metric for L2Squared {
    #[inline]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(
            a.len(),
            b.len(),
            "dimension mismatch: {} != {}",
            a.len(),
            b.len()
        );

        // For small dimensions, SIMD overhead > scalar.
        #[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
        if a.len() >= super::SIMD_MIN_DIM {
            return super::simd::l2_squared(a, b);
        }

        let mut sum = 0.0;
        for (x, y) in a.iter().zip(b.iter()) {
            let diff = x - y;
            sum += diff * diff;
        }
        sum
    }
}
