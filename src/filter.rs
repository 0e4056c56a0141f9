//! Aspect-ratio gate for decoded images.
//!
//! The band is `[1.0, 2.3]` on either `width / height` or `height / width`. Both bounds
//! are compared by cross-multiplying integers, so `2.3` is exact and `2.30001` is not
//! rounded back into the band.

/// Upper bound of the band as the fraction `23 / 10`.
const MAX_RATIO_NUM: u64 = 23;
const MAX_RATIO_DEN: u64 = 10;

/// `long / short` lies in `[1.0, 2.3]`.
fn within_band(long: u64, short: u64) -> bool {
    long >= short && long * MAX_RATIO_DEN <= short * MAX_RATIO_NUM
}

pub fn accepts(width: u32, height: u32) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    let (w, h) = (u64::from(width), u64::from(height));
    within_band(w, h) || within_band(h, w)
}
