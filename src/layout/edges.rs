use crate::procedure::{Edge, EdgeKind, Ordinal, Step};

use super::Column;

/// Edges between each pair of adjacent columns.
///
/// Two steps connect when either is shared (`both`) or both belong to the
/// same technician. An edge is bent only when both columns hold parallel
/// steps and the endpoints sit in different slots.
pub(super) fn column_edges(steps: &[Step], columns: &[Column]) -> Vec<Edge> {
    let mut edges = Vec::new();
    for pair in columns.windows(2) {
        let (from, to) = (&pair[0], &pair[1]);
        let both_parallel = from.members.len() > 1 && to.members.len() > 1;
        for &s in &from.members {
            for &t in &to.members {
                let (source, target) = (&steps[s], &steps[t]);
                if !source
                    .technician_assignment
                    .connects_to(target.technician_assignment)
                {
                    continue;
                }
                let kind = if both_parallel && slot(source) != slot(target) {
                    EdgeKind::Bent
                } else {
                    EdgeKind::FlowAligned
                };
                edges.push(Edge::new(&source.id, &target.id, kind));
            }
        }
    }
    edges
}

fn slot(step: &Step) -> Option<u32> {
    Ordinal::parse_lenient(&step.id).minor
}
