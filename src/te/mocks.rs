use super::problem::{topology_from_links, Problem, Topology};

/// mock topology generation functions

/// 0 - 1 - 2, every link of the given capacity in both directions
pub fn mock_line(capacity: f64) -> Topology {
    topology_from_links(3, &[(0, 1, capacity), (1, 2, capacity)], true)
        .expect("mock topology is valid")
}

/// 0 - 1 - 2 with one commodity 0 -> 2 of the given demand
pub fn mock_line_problem(demand: f64) -> Problem {
    Problem::new("line", mock_line(10.0), &[(0, 2, demand)]).expect("mock problem is valid")
}

///
/// ```text
///     1
///   / | \
///  0--+--3
///   \ | /
///     2
/// ```
/// 0-1 and 1-3 are wide (100), 0-2, 2-3 and 1-2 medium (10), 0-3 thin (1).
pub fn mock_diamond() -> Topology {
    topology_from_links(
        4,
        &[
            (0, 1, 100.0),
            (1, 3, 100.0),
            (0, 2, 10.0),
            (2, 3, 10.0),
            (1, 2, 10.0),
            (0, 3, 1.0),
        ],
        true,
    )
    .expect("mock topology is valid")
}

/// the diamond with a full traffic matrix of small demands
pub fn mock_diamond_problem() -> Problem {
    let g = mock_diamond();
    let demands: Vec<(usize, usize, f64)> = (0..4)
        .flat_map(|s| (0..4).filter(move |&t| t != s).map(move |t| (s, t)))
        .map(|(s, t)| (s, t, (1 + s + 2 * t) as f64))
        .collect();
    Problem::new("diamond", g, &demands).expect("mock problem is valid")
}

///
/// Two disconnected lines 0-1-2 and 3-4-5, capacity 10, one commodity each.
///
pub fn mock_two_lines_problem() -> Problem {
    let g = topology_from_links(
        6,
        &[(0, 1, 10.0), (1, 2, 10.0), (3, 4, 10.0), (4, 5, 10.0)],
        true,
    )
    .expect("mock topology is valid");
    Problem::new("two-lines", g, &[(0, 2, 4.0), (3, 5, 7.0)]).expect("mock problem is valid")
}

///
/// A ring of `n` nodes with alternating capacities and a full traffic matrix
///
pub fn mock_ring_problem(n: usize, demand: f64) -> Problem {
    let links: Vec<(usize, usize, f64)> = (0..n)
        .map(|i| (i, (i + 1) % n, if i % 2 == 0 { 20.0 } else { 12.0 }))
        .collect();
    let g = topology_from_links(n, &links, true).expect("mock topology is valid");
    let demands: Vec<(usize, usize, f64)> = (0..n)
        .flat_map(|s| (0..n).filter(move |&t| t != s).map(move |t| (s, t)))
        .map(|(s, t)| (s, t, demand * (1 + (s * 7 + t * 3) % 5) as f64))
        .collect();
    Problem::new(&format!("ring-{}", n), g, &demands).expect("mock problem is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mocks_are_well_formed() {
        assert_eq!(mock_line(1.0).edge_count(), 4);
        assert_eq!(mock_diamond().edge_count(), 12);
        assert!(mock_diamond_problem().is_traffic_matrix_full());
        assert!(mock_ring_problem(6, 1.0).is_traffic_matrix_full());
        assert_eq!(mock_two_lines_problem().commodity_list.len(), 2);
    }
}
