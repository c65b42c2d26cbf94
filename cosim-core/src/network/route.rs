use super::NodeId;
use std::collections::VecDeque;

/// Static next-hop tables.
///
/// Computed once from the adjacency lists with a breadth first search
/// from every node: routes have the minimum number of hops, and among
/// the equally short ones the neighbours are explored by increasing
/// [`NodeId`].
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    next_hops: Vec<Vec<Option<NodeId>>>,
}

impl RoutingTable {
    /// `neighbours[i]` lists the nodes directly linked to node `i`
    pub fn compute(neighbours: &[Vec<NodeId>]) -> Self {
        let count = neighbours.len();
        let next_hops = (0..count)
            .map(|source| Self::from_source(neighbours, source))
            .collect();
        Self { next_hops }
    }

    fn from_source(neighbours: &[Vec<NodeId>], source: usize) -> Vec<Option<NodeId>> {
        let mut first_hop: Vec<Option<NodeId>> = vec![None; neighbours.len()];
        let mut visited = vec![false; neighbours.len()];
        let mut queue = VecDeque::new();

        visited[source] = true;
        queue.push_back(source);

        while let Some(current) = queue.pop_front() {
            let mut sorted = neighbours[current].clone();
            sorted.sort();

            for next in sorted {
                let index = next.index();
                if visited[index] {
                    continue;
                }
                visited[index] = true;
                first_hop[index] = if current == source {
                    Some(next)
                } else {
                    first_hop[current]
                };
                queue.push_back(index);
            }
        }

        first_hop
    }

    /// the neighbour of `at` to forward to in order to reach `to`
    ///
    /// `None` if `to` is unreachable or is `at` itself.
    pub fn next_hop(&self, at: NodeId, to: NodeId) -> Option<NodeId> {
        self.next_hops
            .get(at.index())
            .and_then(|row| row.get(to.index()))
            .copied()
            .flatten()
    }

    /// every hop from `from` to `to`, `to` included
    pub fn path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut path = Vec::new();
        let mut at = from;
        while at != to {
            at = self.next_hop(at, to)?;
            path.push(at);
        }
        Some(path)
    }

    pub fn len(&self) -> usize {
        self.next_hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32) -> NodeId {
        NodeId::new(id)
    }

    /// 0 - 1 - 3
    ///  \     /
    ///   - 2 -
    ///
    /// 4 (isolated)
    fn diamond() -> Vec<Vec<NodeId>> {
        vec![
            vec![node(2), node(1)],
            vec![node(0), node(3)],
            vec![node(0), node(3)],
            vec![node(2), node(1)],
            vec![],
        ]
    }

    #[test]
    fn ties_broken_by_lowest_id() {
        let table = RoutingTable::compute(&diamond());

        assert_eq!(table.next_hop(node(0), node(3)), Some(node(1)));
        assert_eq!(table.next_hop(node(3), node(0)), Some(node(1)));
        assert_eq!(table.path(node(0), node(3)), Some(vec![node(1), node(3)]));
    }

    #[test]
    fn direct_neighbour() {
        let table = RoutingTable::compute(&diamond());
        assert_eq!(table.next_hop(node(2), node(0)), Some(node(0)));
    }

    #[test]
    fn unreachable() {
        let table = RoutingTable::compute(&diamond());

        assert_eq!(table.next_hop(node(0), node(4)), None);
        assert_eq!(table.path(node(0), node(4)), None);
        assert_eq!(table.next_hop(node(9), node(0)), None);
    }

    #[test]
    fn path_to_self_is_empty() {
        let table = RoutingTable::compute(&diamond());
        assert_eq!(table.path(node(1), node(1)), Some(vec![]));
    }
}
