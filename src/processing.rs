//! # Ready-Made Processing Operations
//!
//! Common SPM corrections in the apply callable contract, usable directly
//! with [`Container::apply`](crate::container::Container::apply). Each takes
//! one 2-D array input (1-D for none of them) and returns one array.

use crate::apply::{ApplyError, ApplyParams, ResolvedInput};
use crate::dataset::ArrayData;

fn single_2d_input(inputs: &[ResolvedInput]) -> Result<&ArrayData, ApplyError> {
    let [input] = inputs else {
        return Err(ApplyError::operation(format!(
            "expected exactly one input, got {}",
            inputs.len()
        )));
    };
    let array = &input.array(0)?.array;
    if array.ndim() != 2 {
        return Err(ApplyError::operation(format!(
            "expected a 2-D array, got {} dimensions",
            array.ndim()
        )));
    }
    Ok(array)
}

/// Subtract the least-squares plane `z = a + b*col + c*row`
///
/// Removes sample tilt from height images. Solved directly from the 3x3
/// normal equations over the pixel grid.
pub fn plane_level(
    inputs: &[ResolvedInput],
    _params: &ApplyParams,
) -> Result<Vec<ArrayData>, ApplyError> {
    let array = single_2d_input(inputs)?;
    let (rows, cols) = (array.shape()[0], array.shape()[1]);

    let n = (rows * cols) as f64;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let (mut sz, mut sxz, mut syz) = (0.0, 0.0, 0.0);
    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = (col as f64, row as f64);
            let z = array.values()[row * cols + col];
            sx += x;
            sy += y;
            sxx += x * x;
            syy += y * y;
            sxy += x * y;
            sz += z;
            sxz += x * z;
            syz += y * z;
        }
    }

    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };

    let base = [[n, sx, sy], [sx, sxx, sxy], [sy, sxy, syy]];
    let det = det3(base);
    if det.abs() < f64::EPSILON {
        return Err(ApplyError::operation("degenerate grid, cannot fit a plane"));
    }
    let a = det3([[sz, sx, sy], [sxz, sxx, sxy], [syz, sxy, syy]]) / det;
    let b = det3([[n, sz, sy], [sx, sxz, sxy], [sy, syz, syy]]) / det;
    let c = det3([[n, sx, sz], [sx, sxx, sxz], [sy, sxy, syz]]) / det;

    let values = array
        .values()
        .iter()
        .enumerate()
        .map(|(i, &z)| {
            let (row, col) = (i / cols, i % cols);
            z - (a + b * col as f64 + c * row as f64)
        })
        .collect();
    Ok(vec![ArrayData::new(array.shape().to_vec(), values)?])
}

/// Subtract a per-row baseline, removing scan-line offsets
///
/// The `method` parameter picks the baseline: `"median"` (default), `"mean"`,
/// or `"polyfit"`, which fits and subtracts a least-squares polynomial of
/// degree `order` (default 1) along each row.
pub fn line_flatten(
    inputs: &[ResolvedInput],
    params: &ApplyParams,
) -> Result<Vec<ArrayData>, ApplyError> {
    let array = single_2d_input(inputs)?;
    let method = params
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("median");
    let order = params.get("order").and_then(|v| v.as_u64()).unwrap_or(1) as usize;

    let (rows, cols) = (array.shape()[0], array.shape()[1]);
    if method == "polyfit" && order + 1 > cols {
        return Err(ApplyError::operation(format!(
            "order {order} needs at least {} points per row, rows have {cols}",
            order + 1
        )));
    }

    let mut values = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        let line = &array.values()[row * cols..(row + 1) * cols];
        match method {
            "mean" => {
                let baseline = line.iter().sum::<f64>() / cols as f64;
                values.extend(line.iter().map(|v| v - baseline));
            }
            "median" => {
                let baseline = median(line);
                values.extend(line.iter().map(|v| v - baseline));
            }
            "polyfit" => {
                let fitted = polynomial_fit(line, order)?;
                values.extend(line.iter().zip(&fitted).map(|(v, f)| v - f));
            }
            other => {
                return Err(ApplyError::operation(format!(
                    "unknown baseline method '{other}'"
                )))
            }
        }
    }
    Ok(vec![ArrayData::new(array.shape().to_vec(), values)?])
}

fn median(line: &[f64]) -> f64 {
    let mut sorted = line.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Least-squares polynomial of degree `order` over `x = 0..line.len()`,
/// evaluated at each point
///
/// Solves the Vandermonde normal equations with partially-pivoted Gaussian
/// elimination; low degrees over short scan lines keep them well conditioned.
fn polynomial_fit(line: &[f64], order: usize) -> Result<Vec<f64>, ApplyError> {
    let terms = order + 1;
    let mut matrix = vec![vec![0.0f64; terms + 1]; terms];
    for (i, &y) in line.iter().enumerate() {
        let x = i as f64;
        for (j, row) in matrix.iter_mut().enumerate() {
            for (k, cell) in row.iter_mut().take(terms).enumerate() {
                *cell += x.powi((j + k) as i32);
            }
            row[terms] += x.powi(j as i32) * y;
        }
    }

    for col in 0..terms {
        let pivot = (col..terms)
            .max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))
            .unwrap_or(col);
        matrix.swap(col, pivot);
        if matrix[col][col].abs() < f64::EPSILON {
            return Err(ApplyError::operation("degenerate line, cannot fit"));
        }
        let pivot_row = matrix[col].clone();
        for row in matrix.iter_mut().skip(col + 1) {
            let factor = row[col] / pivot_row[col];
            for (cell, p) in row.iter_mut().zip(&pivot_row).skip(col) {
                *cell -= factor * p;
            }
        }
    }
    let mut coefficients = vec![0.0f64; terms];
    for row in (0..terms).rev() {
        let dot: f64 = (row + 1..terms).map(|k| matrix[row][k] * coefficients[k]).sum();
        coefficients[row] = (matrix[row][terms] - dot) / matrix[row][row];
    }

    Ok((0..line.len())
        .map(|i| {
            let x = i as f64;
            coefficients
                .iter()
                .enumerate()
                .map(|(j, c)| c * x.powi(j as i32))
                .sum()
        })
        .collect())
}

/// Min-max normalize to `[0, 1]`
///
/// A constant array maps to all zeros.
pub fn normalize(
    inputs: &[ResolvedInput],
    _params: &ApplyParams,
) -> Result<Vec<ArrayData>, ApplyError> {
    let [input] = inputs else {
        return Err(ApplyError::operation(format!(
            "expected exactly one input, got {}",
            inputs.len()
        )));
    };
    let array = &input.array(0)?.array;

    let min = array.values().iter().copied().fold(f64::INFINITY, f64::min);
    let max = array.values().iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    let values = if span == 0.0 || !span.is_finite() {
        vec![0.0; array.len()]
    } else {
        array.values().iter().map(|v| (v - min) / span).collect()
    };
    Ok(vec![ArrayData::new(array.shape().to_vec(), values)?])
}

/// Reduce a 2-D array to the per-row mean, shape `[rows]`
pub fn row_mean(
    inputs: &[ResolvedInput],
    _params: &ApplyParams,
) -> Result<Vec<ArrayData>, ApplyError> {
    let array = single_2d_input(inputs)?;
    let (rows, cols) = (array.shape()[0], array.shape()[1]);

    let values = (0..rows)
        .map(|row| array.values()[row * cols..(row + 1) * cols].iter().sum::<f64>() / cols as f64)
        .collect();
    Ok(vec![ArrayData::new(vec![rows], values)?])
}
