//! Intensity histograms and Otsu thresholds.

pub(crate) type Histogram = [u32; 256];

pub(crate) fn histogram(samples: &[u8]) -> Histogram {
    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    hist
}

/// Otsu threshold of a histogram: values `< t` form the dark class.
///
/// Degenerate inputs are handled without a search: an empty histogram gives
/// the mid-grey 128, a single populated bin gives that bin's value (so nothing
/// is dark), two populated bins split halfway between them.
pub(crate) fn otsu_threshold(hist: &Histogram) -> u8 {
    let populated: Vec<usize> = (0..256).filter(|&i| hist[i] > 0).collect();
    match populated.as_slice() {
        [] => return 128,
        [only] => return *only as u8,
        [lo, hi] => return ((lo + hi + 1) / 2) as u8,
        _ => {}
    }

    let total: f64 = hist.iter().map(|&h| h as f64).sum();
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut w_dark = 0.0f64;
    let mut sum_dark = 0.0f64;
    let mut best_var = -1.0f64;
    let mut best_t = 128usize;

    // Candidate split after bin `t`: dark = [0, t], light = [t + 1, 255].
    for (t, &h) in hist.iter().enumerate().take(255) {
        w_dark += h as f64;
        sum_dark += t as f64 * h as f64;
        if w_dark < 1.0 {
            continue;
        }
        let w_light = total - w_dark;
        if w_light < 1.0 {
            break;
        }
        let m_dark = sum_dark / w_dark;
        let m_light = (sum_total - sum_dark) / w_light;
        let var_between = w_dark * w_light * (m_dark - m_light) * (m_dark - m_light);
        if var_between > best_var {
            best_var = var_between;
            best_t = t + 1;
        }
    }

    best_t.min(255) as u8
}

#[inline]
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    otsu_threshold(&histogram(samples))
}
