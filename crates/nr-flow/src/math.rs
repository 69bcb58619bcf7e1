#[inline]
pub(crate) fn standard_normal_logpdf(z: f64) -> f64 {
    // -0.5*ln(2π)
    const LOG_INV_SQRT_2PI: f64 = -0.918_938_533_204_672_7;
    LOG_INV_SQRT_2PI - 0.5 * z * z
}
