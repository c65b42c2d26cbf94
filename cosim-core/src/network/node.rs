use std::fmt;

/// The identifier of a node in the [`Network`]
///
/// Identifiers are given in order of registration, starting from `0`.
/// The ordering is used to break ties between equally short routes.
///
/// [`Network`]: super::Network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

/// A named node of the simulated network
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    position: Option<(f64, f64)>,
}

impl NodeId {
    pub const ZERO: Self = NodeId::new(0);
    pub const ONE: Self = NodeId::new(1);

    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// the value is used as event context for the events of this node
    #[inline]
    pub fn into_context(self) -> u32 {
        self.0
    }
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String) -> Self {
        Self {
            id,
            name,
            position: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.position
    }

    pub(crate) fn set_position(&mut self, x: f64, y: f64) {
        self.position = Some((x, y));
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print() {
        assert_eq!(NodeId::new(42).to_string(), "42");
        assert_eq!(Node::new(NodeId::ONE, "H1".to_owned()).to_string(), "H1(1)");
    }

    #[test]
    fn ordering() {
        assert!(NodeId::ZERO < NodeId::ONE);
        assert_eq!(NodeId::ONE.index(), 1);
    }
}
