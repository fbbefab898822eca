//! Numerical kernels shared by the risk engines.
//!
//! References:
//! - Acklam (2003), rational approximation of the inverse normal CDF.
//! - Hyndman and Fan (1996), sample quantile definitions (type 7).

pub mod covariance;
pub mod fast_rng;
pub mod sobol;

pub use covariance::{
    cholesky_lower, factor_covariance, min_eigenvalue_symmetric, portfolio_variance,
};
pub use fast_rng::{Xoshiro256Rng, sample_standard_normal, stream_seed, uniform_open01};
pub use sobol::{SOBOL_MAX_DIMENSIONS, SobolSequence};

pub fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Acklam's rational approximation for the inverse standard normal CDF.
///
/// Absolute error below 1.15e-9 over the open unit interval.
pub fn normal_inv_cdf(p: f64) -> f64 {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        C[0].mul_add(q, C[1]).mul_add(q, C[2]).mul_add(q, C[3]).mul_add(q, C[4]).mul_add(q, C[5])
            / D[0].mul_add(q, D[1]).mul_add(q, D[2]).mul_add(q, D[3]).mul_add(q, 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        A[0].mul_add(r, A[1]).mul_add(r, A[2]).mul_add(r, A[3]).mul_add(r, A[4]).mul_add(r, A[5]) * q
            / B[0].mul_add(r, B[1]).mul_add(r, B[2]).mul_add(r, B[3]).mul_add(r, B[4]).mul_add(r, 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(C[0].mul_add(q, C[1]).mul_add(q, C[2]).mul_add(q, C[3]).mul_add(q, C[4]).mul_add(q, C[5]))
            / D[0].mul_add(q, D[1]).mul_add(q, D[2]).mul_add(q, D[3]).mul_add(q, 1.0)
    }
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// Sorts `sample` in place. `p` must lie in `[0, 1]`.
///
/// # Examples
/// ```rust
/// use quantrisk::math::quantile_linear;
///
/// let mut xs = vec![3.0, 1.0, 2.0, 4.0, 5.0];
/// let median = quantile_linear(&mut xs, 0.5);
/// assert_eq!(median, 3.0);
/// ```
pub fn quantile_linear(sample: &mut [f64], p: f64) -> f64 {
    assert!(!sample.is_empty(), "sample must not be empty");
    assert!((0.0..=1.0).contains(&p), "p must be in [0,1]");

    sample.sort_by(|a, b| a.total_cmp(b));
    if sample.len() == 1 {
        return sample[0];
    }

    let rank = p * (sample.len() as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sample[lo]
    } else {
        let w = rank - lo as f64;
        sample[lo] + w * (sample[hi] - sample[lo])
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased (n-1) sample standard deviation. Zero for fewer than two points.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss = values.iter().map(|x| (x - m) * (x - m)).sum::<f64>();
    (ss / (values.len() as f64 - 1.0)).sqrt()
}
