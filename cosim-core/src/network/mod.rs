/*!
# Simulated network

A [`Network`] of named nodes joined by full duplex point to point
[`Link`]s. Packets are routed over the shortest path and cross every hop
in store-and-forward fashion: the packet is serialized at the link rate,
waits behind the packets already queued in the same direction, then
propagates for the link delay. Each hop may lose the packet according to
the link's [`PacketLoss`], drawn from a single seeded generator so that a
run can be replayed.

The network does not own the event loop: [`send`] schedules the hops on
the [`Simulator`] driving the world that hosts the network, and the host
is told about every packet reaching its destination through
[`NetworkHost::on_packet_received`].

[`PacketLoss`]: crate::measure::PacketLoss
*/

mod link;
mod node;
mod packet;
mod route;

pub use self::{
    link::{Link, LinkId, Transmission},
    node::{Node, NodeId},
    packet::{Packet, PacketBuilder, PacketId, PacketIdGenerator, Payload},
    route::RoutingTable,
};
use crate::{
    measure::{DataRate, Latency, PacketLoss},
    scheduler::Simulator,
    time::{SimDuration, SimTime},
};
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng as _;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{trace, warn};

pub struct Network {
    nodes: Vec<Node>,
    names: HashMap<String, NodeId>,

    links: HashMap<LinkId, Link>,
    neighbours: Vec<Vec<NodeId>>,

    /// invalidated every time the topology changes
    routes: Option<RoutingTable>,

    packet_ids: PacketIdGenerator,

    /// Centralised RNG for all packet-loss decisions on every link.
    rng: ChaChaRng,

    transmitted: u64,
    dropped: u64,
}

/// The world hosting a [`Network`] in a [`Simulator`].
///
/// This is the delivery capability of the network: the host decides what
/// becomes of a packet once it reaches its destination node.
pub trait NetworkHost<T>: Sized + 'static {
    fn network(&mut self) -> &mut Network;

    /// called from within the event loop, at the arrival time
    fn on_packet_received(&mut self, sim: &mut Simulator<Self>, packet: Packet<T>);
}

/// Builder for a node before registering it with the network.
///
/// Obtained via [`Network::new_node`].
pub struct NodeBuilder<'a> {
    name: String,
    position: Option<(f64, f64)>,
    network: &'a mut Network,
}

/// Builder for configuring a link between two nodes.
///
/// Obtained via [`Network::configure_link`]. Call [`LinkBuilder::apply`] to
/// commit the configuration.
pub struct LinkBuilder<'a> {
    a: NodeId,
    b: NodeId,
    rate: DataRate,
    delay: Latency,
    packet_loss: PacketLoss,
    network: &'a mut Network,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Node `{name}' already exists")]
    DuplicateNode { name: String },
    #[error("Node ({node}) Not Found")]
    UnknownNode { node: NodeId },
    #[error("Cannot link node ({node}) to itself")]
    SelfLink { node: NodeId },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Node ({node}) Not Found")]
    UnknownNode { node: NodeId },
    #[error("No route from ({from}) to ({to})")]
    Unreachable { from: NodeId, to: NodeId },
    #[error("Link ({link:?}) Not Found: nodes are not directly connected")]
    LinkNotFound { link: LinkId },
}

impl Network {
    pub fn new() -> Self {
        Self::with_seed(crate::defaults::DEFAULT_RANDOM_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            names: HashMap::new(),
            links: HashMap::new(),
            neighbours: Vec::new(),
            routes: None,
            packet_ids: PacketIdGenerator::new(),
            rng: ChaChaRng::seed_from_u64(seed),
            transmitted: 0,
            dropped: 0,
        }
    }

    /// Re-seed the packet loss generator.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = ChaChaRng::seed_from_u64(seed);
    }

    pub fn new_node(&mut self, name: impl Into<String>) -> NodeBuilder<'_> {
        NodeBuilder {
            name: name.into(),
            position: None,
            network: self,
        }
    }

    /// the node with the given name, registered if it does not exist yet
    pub fn node_or_insert(&mut self, name: &str) -> NodeId {
        match self.names.get(name) {
            Some(id) => *id,
            None => self.insert_node(name.to_owned(), None),
        }
    }

    fn insert_node(&mut self, name: String, position: Option<(f64, f64)>) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        let mut node = Node::new(id, name.clone());
        if let Some((x, y)) = position {
            node.set_position(x, y);
        }

        trace!(node = %node, "new node");
        self.nodes.push(node);
        self.neighbours.push(Vec::new());
        self.names.insert(name, id);
        self.routes = None;
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Configure the link between `a` and `b`.
    ///
    /// Applying the builder on an existing link replaces its measures.
    pub fn configure_link(&mut self, a: NodeId, b: NodeId) -> LinkBuilder<'_> {
        LinkBuilder {
            a,
            b,
            rate: DataRate::default(),
            delay: Latency::default(),
            packet_loss: PacketLoss::default(),
            network: self,
        }
    }

    pub fn link(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        self.links.get(&LinkId::new((a, b)))
    }

    pub fn links(&self) -> impl Iterator<Item = (&LinkId, &Link)> {
        self.links.iter()
    }

    /// the next hop tables, computed on first use after a topology change
    pub fn routes(&mut self) -> &RoutingTable {
        self.routes
            .get_or_insert_with(|| RoutingTable::compute(&self.neighbours))
    }

    pub fn next_hop(&mut self, at: NodeId, to: NodeId) -> Result<NodeId, RouteError> {
        for node in [at, to] {
            if self.node(node).is_none() {
                return Err(RouteError::UnknownNode { node });
            }
        }

        self.routes()
            .next_hop(at, to)
            .ok_or(RouteError::Unreachable { from: at, to })
    }

    /// Put `bytes` on the link from `from` to its neighbour `to` at `now`.
    pub fn transmit(
        &mut self,
        now: SimTime,
        from: NodeId,
        to: NodeId,
        bytes: u64,
    ) -> Result<Transmission, RouteError> {
        let link_id = LinkId::new((from, to));
        let Some(link) = self.links.get_mut(&link_id) else {
            return Err(RouteError::LinkNotFound { link: link_id });
        };

        let outcome = link.transmit(now, LinkId::direction(from, to), bytes, &mut self.rng);
        match outcome {
            Transmission::Arrival(_) => self.transmitted += 1,
            Transmission::Dropped => self.dropped += 1,
        }
        Ok(outcome)
    }

    pub fn new_packet<T: Payload>(&mut self) -> PacketBuilder<'_, T> {
        PacketBuilder::new(&mut self.packet_ids)
    }

    /// number of successful hop transmissions
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// number of packets lost on a link
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBuilder<'_> {
    pub fn set_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some((x, y));
        self
    }

    pub fn build(self) -> Result<NodeId, NetworkError> {
        let Self {
            name,
            position,
            network,
        } = self;

        if network.names.contains_key(&name) {
            return Err(NetworkError::DuplicateNode { name });
        }
        Ok(network.insert_node(name, position))
    }
}

impl LinkBuilder<'_> {
    pub fn set_rate(mut self, rate: DataRate) -> Self {
        self.rate = rate;
        self
    }

    /// Set the one-way latency of this link.
    pub fn set_delay(mut self, delay: Latency) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_packet_loss(mut self, packet_loss: PacketLoss) -> Self {
        self.packet_loss = packet_loss;
        self
    }

    /// Commit the link configuration to the network.
    pub fn apply(self) -> Result<LinkId, NetworkError> {
        let Self {
            a,
            b,
            rate,
            delay,
            packet_loss,
            network,
        } = self;

        for node in [a, b] {
            if network.node(node).is_none() {
                return Err(NetworkError::UnknownNode { node });
            }
        }
        if a == b {
            return Err(NetworkError::SelfLink { node: a });
        }

        let id = LinkId::new((a, b));
        let link = Link::new(rate, delay, packet_loss);
        if network.links.insert(id, link).is_none() {
            network.neighbours[a.index()].push(b);
            network.neighbours[b.index()].push(a);
            network.routes = None;
        }
        Ok(id)
    }
}

/// Hand `packet` over to the network, at the simulator's current time.
///
/// The packet is forwarded hop by hop until it reaches its destination,
/// where it is given to [`NetworkHost::on_packet_received`]. A packet sent
/// to its own node is delivered right away, but still through the event
/// loop.
///
/// # Errors
///
/// Fails without scheduling anything if there is no route between the
/// two end points.
pub fn send<T, W>(world: &mut W, sim: &mut Simulator<W>, packet: Packet<T>) -> Result<(), RouteError>
where
    T: Send + 'static,
    W: NetworkHost<T>,
{
    let (from, to) = (packet.from(), packet.to());

    if from == to {
        if world.network().node(to).is_none() {
            return Err(RouteError::UnknownNode { node: to });
        }
        sim.schedule_with_context(to.into_context(), SimDuration::ZERO, move |world: &mut W, sim| {
            world.on_packet_received(sim, packet)
        });
        return Ok(());
    }

    world.network().next_hop(from, to)?;
    forward(world, sim, from, packet);
    Ok(())
}

fn forward<T, W>(world: &mut W, sim: &mut Simulator<W>, at: NodeId, packet: Packet<T>)
where
    T: Send + 'static,
    W: NetworkHost<T>,
{
    if at == packet.to() {
        world.on_packet_received(sim, packet);
        return;
    }

    let network = world.network();
    let next = match network.next_hop(at, packet.to()) {
        Ok(next) => next,
        Err(error) => {
            warn!(packet = %packet.id(), %error, "packet discarded");
            return;
        }
    };

    match network.transmit(sim.now(), at, next, packet.bytes_size()) {
        Ok(Transmission::Arrival(arrival)) => {
            let delay = arrival.saturating_duration_since(sim.now());
            sim.schedule_with_context(next.into_context(), delay, move |world: &mut W, sim| {
                forward(world, sim, next, packet)
            });
        }
        Ok(Transmission::Dropped) => {
            trace!(packet = %packet.id(), from = %at, to = %next, "packet lost");
        }
        Err(error) => {
            warn!(packet = %packet.id(), %error, "packet discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Host {
        network: Network,
        received: Vec<(SimTime, String)>,
    }

    impl NetworkHost<String> for Host {
        fn network(&mut self) -> &mut Network {
            &mut self.network
        }

        fn on_packet_received(&mut self, sim: &mut Simulator<Self>, packet: Packet<String>) {
            self.received.push((sim.now(), packet.into_inner()));
        }
    }

    /// A - B - C with 1Mbps/2ms links
    fn line() -> (Host, [NodeId; 3]) {
        let mut network = Network::new();
        let a = network.new_node("A").build().unwrap();
        let b = network.new_node("B").build().unwrap();
        let c = network.new_node("C").build().unwrap();
        network.configure_link(a, b).apply().unwrap();
        network.configure_link(b, c).apply().unwrap();

        (
            Host {
                network,
                received: Vec::new(),
            },
            [a, b, c],
        )
    }

    fn packet(host: &mut Host, from: NodeId, to: NodeId, data: &str) -> Packet<String> {
        host.network
            .new_packet()
            .from(from)
            .to(to)
            .data(data.to_owned())
            .build()
            .unwrap()
    }

    // ---- 1. Topology -----------------------------------------------------

    #[test]
    fn duplicate_node() {
        let mut network = Network::new();
        network.new_node("A").build().unwrap();

        assert!(matches!(
            network.new_node("A").build(),
            Err(NetworkError::DuplicateNode { .. })
        ));
        assert_eq!(network.node_or_insert("A"), NodeId::ZERO);
        assert_eq!(network.node_or_insert("B"), NodeId::ONE);
        assert_eq!(network.len(), 2);
    }

    #[test]
    fn invalid_links() {
        let mut network = Network::new();
        let a = network.new_node("A").set_position(1.0, 2.0).build().unwrap();

        assert!(matches!(
            network.configure_link(a, a).apply(),
            Err(NetworkError::SelfLink { .. })
        ));
        assert!(matches!(
            network.configure_link(a, NodeId::new(7)).apply(),
            Err(NetworkError::UnknownNode { .. })
        ));
        assert_eq!(network.node(a).unwrap().position(), Some((1.0, 2.0)));
    }

    #[test]
    fn routes_follow_topology_changes() {
        let (mut host, [a, _, c]) = line();
        assert_eq!(host.network.routes().path(a, c).map(|p| p.len()), Some(2));

        host.network.configure_link(a, c).apply().unwrap();
        assert_eq!(host.network.next_hop(a, c), Ok(c));
    }

    // ---- 2. Delivery -----------------------------------------------------

    #[test]
    fn multi_hop_delivery() {
        let (mut host, [a, _, c]) = line();
        let mut sim = Simulator::new();

        // 10 bytes of payload + 40 bytes of headers: 400µs per hop + 2ms
        let message = packet(&mut host, a, c, "0123456789");
        send(&mut host, &mut sim, message).unwrap();
        sim.run(&mut host);

        assert_eq!(
            host.received,
            [(SimTime::from_micros(4_800), "0123456789".to_owned())]
        );
        assert_eq!(host.network.transmitted(), 2);
    }

    #[test]
    fn loopback_goes_through_event_loop() {
        let (mut host, [a, ..]) = line();
        let mut sim = Simulator::new();

        let message = packet(&mut host, a, a, "self");
        send(&mut host, &mut sim, message).unwrap();
        assert!(host.received.is_empty());

        sim.run(&mut host);
        assert_eq!(host.received, [(SimTime::ZERO, "self".to_owned())]);
    }

    #[test]
    fn unreachable_is_reported_to_sender() {
        let (mut host, [a, ..]) = line();
        let island = host.network.new_node("D").build().unwrap();
        let mut sim = Simulator::new();

        let message = packet(&mut host, a, island, "lost");
        assert_eq!(
            send(&mut host, &mut sim, message),
            Err(RouteError::Unreachable { from: a, to: island })
        );
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn lossy_links_are_reproducible() {
        let run = |seed| {
            let mut network = Network::with_seed(seed);
            let a = network.new_node("A").build().unwrap();
            let b = network.new_node("B").build().unwrap();
            network
                .configure_link(a, b)
                .set_packet_loss(PacketLoss::rate(0.5).unwrap())
                .apply()
                .unwrap();
            let mut host = Host {
                network,
                received: Vec::new(),
            };
            let mut sim = Simulator::new();
            for i in 0..50 {
                let message = packet(&mut host, a, b, &i.to_string());
                send(&mut host, &mut sim, message).unwrap();
            }
            sim.run(&mut host);
            (host.received, host.network.dropped())
        };

        let (first, dropped) = run(7);
        assert!(dropped > 0 && dropped < 50);
        assert_eq!(first.len() as u64, 50 - dropped);
        assert_eq!(run(7).0, first);
    }
}
