use faer::MatRef;
use itertools::izip;
use multiversion::multiversion;

#[inline]
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    if a == b {
        return a + 2f64.ln();
    }
    let diff = a - b;
    if diff > 0. {
        a + (-diff).exp().ln_1p()
    } else if diff < 0. {
        b + diff.exp().ln_1p()
    } else {
        // diff is NAN
        diff
    }
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn squared_distance(x: &[f64], y: &[f64]) -> f64 {
    assert!(x.len() == y.len());

    let head_length = x.len() - x.len() % 4;

    let (x_head, x_tail) = x.split_at(head_length);
    let (y_head, y_tail) = y.split_at(head_length);

    let mut acc = [0f64; 4];
    izip!(x_head.chunks_exact(4), y_head.chunks_exact(4)).for_each(|(x, y)| {
        izip!(acc.iter_mut(), x, y).for_each(|(acc, x, y)| {
            let diff = x - y;
            *acc += diff * diff;
        });
    });

    let mut result = acc.iter().sum::<f64>();
    for (x, y) in x_tail.iter().zip(y_tail) {
        let diff = x - y;
        result += diff * diff;
    }
    result
}

#[multiversion(targets("x86_64+avx+avx2", "x86+sse"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    let n = x.len();
    assert!(y.len() == n);

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

/// Median of the values, averaging the two middle elements for even lengths.
///
/// Reorders `values`. Returns NaN for an empty slice.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        return upper;
    }
    let lower = lower
        .iter()
        .copied()
        .max_by(f64::total_cmp)
        .unwrap_or(upper);
    0.5 * (lower + upper)
}

/// Copy the rows of `mat` into `out` in row-major order.
pub(crate) fn copy_rows_into(mat: MatRef<'_, f64>, out: &mut [f64]) {
    let ncols = mat.ncols();
    assert!(out.len() == mat.nrows() * ncols);
    for (i, row) in out.chunks_exact_mut(ncols.max(1)).enumerate().take(mat.nrows()) {
        for (k, val) in row.iter_mut().enumerate() {
            *val = mat[(i, k)];
        }
    }
}

/// Position of the first non-finite entry as `(row, col)`.
pub(crate) fn first_non_finite(mat: MatRef<'_, f64>) -> Option<(usize, usize)> {
    (0..mat.nrows())
        .flat_map(|i| (0..mat.ncols()).map(move |k| (i, k)))
        .find(|&(i, k)| !mat[(i, k)].is_finite())
}
