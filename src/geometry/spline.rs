//! Clamped quadratic B-spline fit over a single path.
//!
//! The path vertices act as control points, so the curve is pulled toward
//! them rather than through them, which rounds off the stair-stepping left by
//! elevation-derived traces. Clamped knots keep both endpoints exact.

use crate::model::Coord;
use geo::EuclideanDistance;

const DEGREE: usize = 2;

fn dedupe(path: &[Coord], tolerance: f64) -> Vec<Coord> {
    let mut out: Vec<Coord> = Vec::with_capacity(path.len());
    for c in path {
        match out.last() {
            Some(last) if geo::Point::from(*last).euclidean_distance(&geo::Point::from(*c)) <= tolerance => {}
            _ => out.push(*c),
        }
    }
    // Keep the true end even if it was within tolerance of its neighbour.
    if let (Some(end), Some(last)) = (path.last(), out.last_mut()) {
        *last = *end;
    }
    out
}

/// Open uniform knot vector clamped at both ends: `[0,0,0,1,..,n-2,n-2,n-2]`.
fn clamped_knots(n: usize) -> Vec<f64> {
    let span = (n - DEGREE) as f64;
    let mut knots = vec![0.0; DEGREE + 1];
    knots.extend((1..n - DEGREE).map(|k| k as f64));
    knots.extend(std::iter::repeat(span).take(DEGREE + 1));
    knots
}

/// de Boor evaluation at parameter `u`.
fn evaluate(control: &[Coord], knots: &[f64], u: f64) -> Coord {
    let n = control.len();
    let k = ((u.floor() as usize) + DEGREE).min(n - 1);

    let mut d: Vec<Coord> = (0..=DEGREE).map(|j| control[j + k - DEGREE]).collect();
    for r in 1..=DEGREE {
        for j in (r..=DEGREE).rev() {
            let lo = knots[j + k - DEGREE];
            let hi = knots[j + 1 + k - r];
            let alpha = if hi > lo { (u - lo) / (hi - lo) } else { 0.0 };
            d[j] = [
                (1.0 - alpha) * d[j - 1][0] + alpha * d[j][0],
                (1.0 - alpha) * d[j - 1][1] + alpha * d[j][1],
            ];
        }
    }
    d[DEGREE]
}

/// Fits the spline and samples `density` points per input vertex.
///
/// Paths with fewer than three distinct vertices come back unchanged.
pub fn fit_quadratic(path: &[Coord], tolerance: f64, density: usize) -> Vec<Coord> {
    let control = dedupe(path, tolerance);
    if control.len() <= DEGREE {
        return path.to_vec();
    }

    let knots = clamped_knots(control.len());
    let domain = (control.len() - DEGREE) as f64;
    let samples = (path.len() * density.max(1)).max(2);

    let mut out: Vec<Coord> = (0..samples)
        .map(|i| evaluate(&control, &knots, domain * i as f64 / (samples - 1) as f64))
        .collect();

    // Pin the endpoints exactly; floating evaluation can drift in the last ulp.
    if let Some(first) = out.first_mut() {
        *first = control[0];
    }
    if let Some(last) = out.last_mut() {
        *last = control[control.len() - 1];
    }
    out
}
