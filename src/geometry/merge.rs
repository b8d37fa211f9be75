//! Joins flow-line segments into continuous chains.

use crate::model::Coord;

const ENDPOINT_TOLERANCE: f64 = 1e-9;

fn same(a: Option<&Coord>, b: Option<&Coord>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a[0] - b[0]).abs() <= ENDPOINT_TOLERANCE && (a[1] - b[1]).abs() <= ENDPOINT_TOLERANCE,
        _ => false,
    }
}

/// Greedily chains segments whose endpoints coincide.
///
/// Segments keep their digitized direction where possible and are reversed
/// only when two starts or two ends meet. Chains come back longest first.
pub fn merge_lines(segments: Vec<Vec<Coord>>) -> Vec<Vec<Coord>> {
    let mut pending: Vec<Vec<Coord>> = segments.into_iter().filter(|s| !s.is_empty()).collect();
    let mut chains: Vec<Vec<Coord>> = Vec::new();

    while !pending.is_empty() {
        let mut chain = pending.remove(0);

        loop {
            let position = pending.iter().position(|s| {
                same(chain.last(), s.first())
                    || same(s.last(), chain.first())
                    || same(chain.first(), s.first())
                    || same(chain.last(), s.last())
            });
            let Some(i) = position else { break };
            let mut next = pending.remove(i);

            if same(chain.last(), next.first()) {
                chain.extend(next.into_iter().skip(1));
            } else if same(next.last(), chain.first()) {
                next.extend(chain.into_iter().skip(1));
                chain = next;
            } else if same(chain.first(), next.first()) {
                next.reverse();
                next.extend(chain.into_iter().skip(1));
                chain = next;
            } else {
                next.reverse();
                chain.extend(next.into_iter().skip(1));
            }
        }

        chains.push(chain);
    }

    chains.sort_by(|a, b| b.len().cmp(&a.len()));
    chains
}
