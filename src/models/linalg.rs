//! Dense matrix-vector kernels over row-major slices.

/// `out += W x` for a `rows x cols` matrix `w`.
pub fn matvec_add(w: &[f64], rows: usize, cols: usize, x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(w.len(), rows * cols);
    for (r, o) in out.iter_mut().enumerate().take(rows) {
        let row = &w[r * cols..(r + 1) * cols];
        *o += dot(row, x);
    }
}

/// `out += W^T y` for a `rows x cols` matrix `w`.
pub fn matvec_t_add(w: &[f64], rows: usize, cols: usize, y: &[f64], out: &mut [f64]) {
    debug_assert_eq!(w.len(), rows * cols);
    for r in 0..rows {
        let yr = y[r];
        if yr == 0.0 {
            continue;
        }
        let row = &w[r * cols..(r + 1) * cols];
        for (o, wv) in out.iter_mut().zip(row) {
            *o += wv * yr;
        }
    }
}

/// `g += y x^T` for a `rows x cols` gradient block.
pub fn outer_add(g: &mut [f64], rows: usize, cols: usize, y: &[f64], x: &[f64]) {
    debug_assert_eq!(g.len(), rows * cols);
    for r in 0..rows {
        let yr = y[r];
        if yr == 0.0 {
            continue;
        }
        let row = &mut g[r * cols..(r + 1) * cols];
        for (gv, xv) in row.iter_mut().zip(x) {
            *gv += yr * xv;
        }
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha * x`
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yv, xv) in y.iter_mut().zip(x) {
        *yv += alpha * xv;
    }
}

/// Apply `tanh` in place.
pub fn tanh_in_place(v: &mut [f64]) {
    for x in v.iter_mut() {
        *x = x.tanh();
    }
}

/// Back-propagate through `a = tanh(z)`: returns `da * (1 - a^2)`.
pub fn tanh_backward(a: &[f64], da: &[f64]) -> Vec<f64> {
    a.iter().zip(da).map(|(a, d)| d * (1.0 - a * a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matvec_and_transpose() {
        // [[1, 2], [3, 4], [5, 6]]
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut out = vec![0.0; 3];
        matvec_add(&w, 3, 2, &[1.0, -1.0], &mut out);
        assert_eq!(out, vec![-1.0, -1.0, -1.0]);

        let mut back = vec![0.0; 2];
        matvec_t_add(&w, 3, 2, &[1.0, 0.0, 1.0], &mut back);
        assert_eq!(back, vec![6.0, 8.0]);
    }

    #[test]
    fn outer_product_accumulates() {
        let mut g = vec![1.0; 4];
        outer_add(&mut g, 2, 2, &[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(g, vec![4.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn tanh_gradient() {
        let mut a = vec![0.0, 0.5];
        tanh_in_place(&mut a);
        let d = tanh_backward(&a, &[1.0, 1.0]);
        assert_eq!(d[0], 1.0);
        assert!((d[1] - (1.0 - 0.5f64.tanh().powi(2))).abs() < 1e-12);
    }
}
