/*!
# Network simulator facade

[`NetSim`] owns the [`Simulator`] and the world it drives: the simulated
[`Network`], one client application per connection, one server
application per receiving node and the two data exchange queues.

* the *input* queue holds the values handed over with [`NetSim::schedule`]
  until their client application sends them;
* the *output* queue holds a [`DataXchg`] record for every value
  delivered by the network, until [`NetSim::get_data`] hands it over.

Time is expressed in [`SimTime`]; [`NetSim::ticks_to_time`] and
[`NetSim::time_to_ticks`] convert from and to the orchestrator's steps.
*/

mod app;

pub use self::app::{ConnectionId, Protocol, ProtocolParseError, Segment};
use self::app::{
    ClientApp, ClientState, MAX_RETRANSMISSIONS, Outgoing, RETRANSMIT_TIMEOUT, ServerApp,
    Unacked, decode_message, encode_message,
};
use cosim_core::{
    DataRate, Latency, Network, NodeId, PacketLoss, SimDuration, SimTime, Simulator,
    defaults::{DEFAULT_LINK_DELAY, DEFAULT_LINK_RATE, DEFAULT_RANDOM_SEED},
    network::{self, NetworkError, NetworkHost, Packet, RouteError},
    topology::{self, AdjacencyMatrix, TopologyError},
};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::PathBuf,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Everything [`NetSim::init`] needs to build the simulation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub adjmat_file: Option<PathBuf>,
    pub coords_file: Option<PathBuf>,
    pub appcon_file: Option<PathBuf>,

    pub link_rate: DataRate,
    pub link_delay: Latency,
    pub link_loss: PacketLoss,
    pub protocol: Protocol,
    pub random_seed: u64,

    /// duration of one orchestrator step
    pub resolution: SimDuration,
    /// when the applications start
    pub start: SimTime,
    /// end of the simulation, `None` for an unbounded run
    pub stop: Option<SimTime>,
    /// horizon used by [`NetSim::run_until`] when the orchestrator gives none
    pub step_size: Option<SimDuration>,
}

/// A value crossing the network, from the entity `id`.
///
/// In the input queue `time` is when the value is handed to the client
/// application, in the output queue it is when the value reached the
/// server application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataXchg {
    pub id: String,
    pub src: String,
    pub dst: String,
    pub value: String,
    pub time: SimTime,
}

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("Invalid topology")]
    Topology(#[from] TopologyError),
    #[error("Invalid network")]
    Network(#[from] NetworkError),
    #[error("No route between `{src}' and `{dst}'")]
    Route {
        src: String,
        dst: String,
        #[source]
        source: RouteError,
    },
    #[error("An adjacency matrix needs a coordinates file to name its nodes")]
    MissingCoordinates,
    #[error("Node `{name}' is not part of the topology")]
    UnknownNode { name: String },
    #[error("No connection from `{src}' to `{dst}'")]
    UnknownConnection { src: String, dst: String },
    #[error("The time resolution must be at least one microsecond")]
    InvalidResolution,
}

type Subscriber = Box<dyn FnMut(&DataXchg) + Send>;

/// What the events act upon.
struct World {
    network: Network,
    protocol: Protocol,

    clients: Vec<ClientApp>,
    connections: HashMap<(NodeId, NodeId), ConnectionId>,
    servers: HashMap<NodeId, ServerApp>,

    input: BTreeMap<u64, DataXchg>,
    next_ticket: u64,
    output: VecDeque<DataXchg>,
    /// number of records ever pushed to the output queue
    produced: u64,
    subscribers: Vec<Subscriber>,
}

pub struct NetSim {
    sim: Simulator<World>,
    world: World,
    settings: Settings,
    /// nodes and links are created on demand by [`NetSim::create`]
    implicit_nodes: bool,
    implicit_links: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adjmat_file: None,
            coords_file: None,
            appcon_file: None,
            link_rate: DEFAULT_LINK_RATE,
            link_delay: DEFAULT_LINK_DELAY,
            link_loss: PacketLoss::None,
            protocol: Protocol::default(),
            random_seed: DEFAULT_RANDOM_SEED,
            resolution: SimDuration::from_millis(1),
            start: SimTime::ZERO,
            stop: None,
            step_size: None,
        }
    }
}

impl NetSim {
    /// Build the topology and wire the pre-declared connections.
    ///
    /// # Errors
    ///
    /// Any inconsistency of the topology files is fatal.
    pub fn init(settings: Settings) -> Result<Self, FacadeError> {
        if settings.resolution.is_zero() {
            return Err(FacadeError::InvalidResolution);
        }

        let mut network = Network::with_seed(settings.random_seed);

        let (implicit_nodes, implicit_links) = match (&settings.adjmat_file, &settings.coords_file) {
            (Some(_), None) => return Err(FacadeError::MissingCoordinates),
            (adjmat, Some(coords)) => {
                let nodes = topology::read_coordinates(coords)?;
                let ids = nodes
                    .iter()
                    .map(|node| {
                        network
                            .new_node(node.name.clone())
                            .set_position(node.x, node.y)
                            .build()
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                if let Some(adjmat) = adjmat {
                    let matrix = AdjacencyMatrix::read(adjmat)?;
                    topology::check_dimensions(&matrix, &nodes)?;
                    for (a, b) in matrix.links() {
                        network
                            .configure_link(ids[a], ids[b])
                            .set_rate(settings.link_rate)
                            .set_delay(settings.link_delay)
                            .set_packet_loss(settings.link_loss)
                            .apply()?;
                    }
                }
                (false, adjmat.is_none())
            }
            (None, None) => (true, true),
        };

        info!(
            nodes = network.len(),
            links = network.links().count(),
            protocol = %settings.protocol,
            rate = %settings.link_rate,
            delay = %settings.link_delay,
            loss = %settings.link_loss,
            "network initialised"
        );

        let mut sim = Simulator::<World>::new();
        sim.schedule_destroy(|world: &mut World, sim| {
            info!(
                events = sim.event_count(),
                transmitted = world.network.transmitted(),
                dropped = world.network.dropped(),
                delivered = world.produced,
                "simulation destroyed"
            );
        });

        let world = World {
            network,
            protocol: settings.protocol,
            clients: Vec::new(),
            connections: HashMap::new(),
            servers: HashMap::new(),
            input: BTreeMap::new(),
            next_ticket: 0,
            output: VecDeque::new(),
            produced: 0,
            subscribers: Vec::new(),
        };

        let mut netsim = Self {
            sim,
            world,
            implicit_nodes,
            implicit_links,
            settings,
        };

        if let Some(appcon) = netsim.settings.appcon_file.clone() {
            for connection in topology::read_connections(appcon)? {
                netsim.create(&connection.client, &connection.server)?;
            }
        }

        Ok(netsim)
    }

    fn node(&mut self, name: &str) -> Result<NodeId, FacadeError> {
        if self.implicit_nodes {
            return Ok(self.world.network.node_or_insert(name));
        }
        self.world
            .network
            .node_id(name)
            .ok_or_else(|| FacadeError::UnknownNode {
                name: name.to_owned(),
            })
    }

    /// Install the applications for `client` to send to `server`.
    ///
    /// Returns `false`, and does nothing, if that connection exists
    /// already.
    ///
    /// # Errors
    ///
    /// If a node is unknown or there is no route between the two nodes.
    pub fn create(&mut self, client: &str, server: &str) -> Result<bool, FacadeError> {
        let src = self.node(client)?;
        let dst = self.node(server)?;

        if self.world.connections.contains_key(&(src, dst)) {
            debug!(%client, %server, "connection already exists");
            return Ok(false);
        }

        if src != dst {
            if self.implicit_links && self.world.network.link(src, dst).is_none() {
                self.world
                    .network
                    .configure_link(src, dst)
                    .set_rate(self.settings.link_rate)
                    .set_delay(self.settings.link_delay)
                    .set_packet_loss(self.settings.link_loss)
                    .apply()?;
            }
            self.world
                .network
                .next_hop(src, dst)
                .map_err(|source| FacadeError::Route {
                    src: client.to_owned(),
                    dst: server.to_owned(),
                    source,
                })?;
        }

        let conn = ConnectionId::new(self.world.clients.len());
        self.world.clients.push(ClientApp::new(conn, src, dst));
        self.world.connections.insert((src, dst), conn);
        self.world.servers.entry(dst).or_default();

        let delay = self.settings.start.saturating_duration_since(self.sim.now());
        self.sim
            .schedule_with_context(src.into_context(), delay, move |world: &mut World, sim| {
                world.start_client(sim, conn)
            });

        info!(%client, %server, %conn, "connection created");
        Ok(true)
    }

    /// Hand `value` to the client application of `src`, to be sent to
    /// `dst` at `at`.
    ///
    /// A time that is not in the future is moved just after the current
    /// time.
    ///
    /// # Errors
    ///
    /// If no connection from `src` to `dst` has been created.
    pub fn schedule(
        &mut self,
        id: &str,
        src: &str,
        dst: &str,
        value: &str,
        at: SimTime,
    ) -> Result<(), FacadeError> {
        let unknown = || FacadeError::UnknownConnection {
            src: src.to_owned(),
            dst: dst.to_owned(),
        };
        let client = self.world.network.node_id(src).ok_or_else(unknown)?;
        let server = self.world.network.node_id(dst).ok_or_else(unknown)?;
        let conn = *self
            .world
            .connections
            .get(&(client, server))
            .ok_or_else(unknown)?;

        let mut delay = at.saturating_duration_since(self.sim.now());
        if delay.is_zero() {
            delay = SimDuration::EPSILON;
        }

        let ticket = self.world.next_ticket;
        self.world.next_ticket += 1;
        self.world.input.insert(
            ticket,
            DataXchg {
                id: id.to_owned(),
                src: src.to_owned(),
                dst: dst.to_owned(),
                value: value.to_owned(),
                time: self.sim.now() + delay,
            },
        );

        self.sim
            .schedule_with_context(client.into_context(), delay, move |world: &mut World, sim| {
                world.submit(sim, conn, ticket)
            });
        trace!(%id, %src, %dst, %at, "value scheduled");
        Ok(())
    }

    /// Advance the simulation on behalf of the orchestrator at `current`.
    ///
    /// Every event of the current step is executed. The simulation then
    /// keeps going from event to event as long as nothing was delivered,
    /// the next event is within the horizon and before the stop time. The
    /// horizon is `max_advance`, or one `step_size` from `current`, or the
    /// stop time.
    ///
    /// Returns the next time the orchestrator should step the simulation,
    /// `None` if nothing is left to do.
    pub fn run_until(&mut self, current: SimTime, max_advance: Option<SimTime>) -> Option<SimTime> {
        let produced = self.world.produced;
        let stop = self.settings.stop;

        self.sim
            .run_until(&mut self.world, current + self.settings.resolution);

        let horizon = max_advance
            .or_else(|| self.settings.step_size.map(|step| current + step))
            .or(stop)
            .unwrap_or(SimTime::MAX);

        while self.world.produced == produced {
            let Some(next) = self.sim.next_time() else {
                break;
            };
            if next > horizon || stop.is_some_and(|stop| next >= stop) {
                break;
            }
            self.sim
                .run_until(&mut self.world, next + SimDuration::EPSILON);
        }

        let lookahead = self.lookahead(current);
        debug!(
            %current,
            %horizon,
            now = %self.sim.now(),
            next = ?lookahead,
            "run until"
        );
        lookahead
    }

    /// The last step is withheld: the applications are torn down at the
    /// stop time.
    fn last_step(&self) -> Option<SimTime> {
        self.settings
            .stop
            .map(|stop| stop.saturating_sub(self.settings.resolution))
    }

    fn lookahead(&self, current: SimTime) -> Option<SimTime> {
        let last = self.last_step();
        if last.is_some_and(|last| current >= last) {
            return None;
        }

        let due = current + self.settings.resolution;
        let next_output = self
            .world
            .output
            .iter()
            .map(|record| record.time)
            .filter(|time| *time >= due)
            .min();
        let next = [self.sim.next_time(), next_output]
            .into_iter()
            .flatten()
            .min()
            .map(|next| self.floor_to_step(next));

        match (next, last) {
            (Some(next), Some(last)) => Some(next.min(last)),
            (Some(next), None) => Some(next),
            (None, last) => last,
        }
    }

    fn floor_to_step(&self, time: SimTime) -> SimTime {
        self.ticks_to_time(self.time_to_ticks(time))
    }

    /// Pop the oldest delivered record, if it is due by the step `now`.
    pub fn get_data(&mut self, now: SimTime) -> Option<DataXchg> {
        let due = now + self.settings.resolution;
        if self.world.output.front()?.time < due {
            self.world.output.pop_front()
        } else {
            None
        }
    }

    /// Take every record due by the step `now` that `filter` selects,
    /// leaving the others in the output queue.
    pub fn take_data<F>(&mut self, now: SimTime, mut filter: F) -> Vec<DataXchg>
    where
        F: FnMut(&DataXchg) -> bool,
    {
        let due = now + self.settings.resolution;
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.world.output)
            .into_iter()
            .partition(|record| record.time < due && filter(record));
        self.world.output = kept.into();
        taken
    }

    /// Register a closure called with every record pushed to the output
    /// queue.
    pub fn on_data_received<F>(&mut self, subscriber: F)
    where
        F: FnMut(&DataXchg) + Send + 'static,
    {
        self.world.subscribers.push(Box::new(subscriber));
    }

    /// Release the simulation, pending events are dropped.
    pub fn destroy(&mut self) {
        self.sim.destroy(&mut self.world);
        self.world.input.clear();
    }

    pub fn ticks_to_time(&self, ticks: u64) -> SimTime {
        SimTime::from_micros(ticks.saturating_mul(self.settings.resolution.as_micros()))
    }

    /// whole steps, rounded down
    pub fn time_to_ticks(&self, time: SimTime) -> u64 {
        time.as_micros() / self.settings.resolution.as_micros()
    }

    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn network(&self) -> &Network {
        &self.world.network
    }

    pub fn connections(&self) -> usize {
        self.world.clients.len()
    }

    pub fn input_len(&self) -> usize {
        self.world.input.len()
    }

    pub fn input_is_empty(&self) -> bool {
        self.world.input.is_empty()
    }

    pub fn output_len(&self) -> usize {
        self.world.output.len()
    }

    pub fn output_is_empty(&self) -> bool {
        self.world.output.is_empty()
    }
}

impl World {
    fn send_segment(
        &mut self,
        sim: &mut Simulator<Self>,
        from: NodeId,
        to: NodeId,
        segment: Segment,
    ) {
        let packet = match self
            .network
            .new_packet()
            .from(from)
            .to(to)
            .sent_at(sim.now())
            .data(segment)
            .build()
        {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%error, "cannot build segment");
                return;
            }
        };

        if let Err(error) = network::send(self, sim, packet) {
            warn!(%from, %to, %error, "segment not sent");
        }
    }

    fn start_client(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId) {
        let client = &mut self.clients[conn.index()];
        if client.state != ClientState::Idle {
            return;
        }

        match self.protocol {
            Protocol::Udp => {
                client.state = ClientState::Established;
                self.flush_backlog(sim, conn);
            }
            Protocol::Tcp => {
                client.state = ClientState::Connecting;
                self.send_syn(sim, conn);
            }
        }
    }

    fn send_syn(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId) {
        let client = &mut self.clients[conn.index()];
        client.handshake_attempts += 1;
        let (from, to) = (client.client, client.server);

        let timer = sim.schedule_with_context(
            from.into_context(),
            RETRANSMIT_TIMEOUT,
            move |world: &mut World, sim| world.handshake_timeout(sim, conn),
        );
        client.handshake_timer = Some(timer);

        self.send_segment(sim, from, to, Segment::Syn { conn });
    }

    fn handshake_timeout(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId) {
        let client = &mut self.clients[conn.index()];
        if client.state != ClientState::Connecting {
            return;
        }
        if client.handshake_attempts > MAX_RETRANSMISSIONS {
            warn!(
                %conn,
                pending = client.backlog.len(),
                "connection failed, the queued values are lost"
            );
            client.state = ClientState::Failed;
            client.backlog.clear();
            return;
        }
        debug!(%conn, attempt = client.handshake_attempts, "handshake timed out");
        self.send_syn(sim, conn);
    }

    fn flush_backlog(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId) {
        let backlog = std::mem::take(&mut self.clients[conn.index()].backlog);
        for outgoing in backlog {
            self.transmit_data(sim, conn, outgoing);
        }
    }

    /// The value of `ticket` is due: give it to the client application.
    fn submit(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId, ticket: u64) {
        let Some(record) = self.input.remove(&ticket) else {
            return;
        };
        let outgoing = Outgoing {
            eid: record.id,
            value: record.value,
        };

        let client = &mut self.clients[conn.index()];
        match client.state {
            ClientState::Established => self.transmit_data(sim, conn, outgoing),
            ClientState::Idle | ClientState::Connecting => client.backlog.push_back(outgoing),
            ClientState::Failed => {
                warn!(%conn, eid = %outgoing.eid, "connection failed, value dropped");
            }
        }
    }

    fn transmit_data(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId, outgoing: Outgoing) {
        let client = &mut self.clients[conn.index()];
        let seq = client.next_seq();
        let (from, to) = (client.client, client.server);
        let message = encode_message(&outgoing.value, sim.now());

        if self.protocol == Protocol::Tcp {
            let timer = sim.schedule_with_context(
                from.into_context(),
                RETRANSMIT_TIMEOUT,
                move |world: &mut World, sim| world.retransmit(sim, conn, seq),
            );
            client.unacked.push((
                seq,
                Unacked {
                    eid: outgoing.eid.clone(),
                    message: message.clone(),
                    retransmissions: 0,
                    timer,
                },
            ));
        }

        let segment = Segment::Data {
            conn,
            seq,
            eid: outgoing.eid,
            message,
        };
        self.send_segment(sim, from, to, segment);
    }

    fn retransmit(&mut self, sim: &mut Simulator<Self>, conn: ConnectionId, seq: u64) {
        let client = &mut self.clients[conn.index()];
        let (from, to) = (client.client, client.server);
        let Some(unacked) = client.unacked_mut(seq) else {
            return;
        };

        if unacked.retransmissions >= MAX_RETRANSMISSIONS {
            warn!(%conn, seq, eid = %unacked.eid, "segment given up");
            client.take_unacked(seq);
            return;
        }
        unacked.retransmissions += 1;
        debug!(%conn, seq, attempt = unacked.retransmissions, "retransmission");

        unacked.timer = sim.schedule_with_context(
            from.into_context(),
            RETRANSMIT_TIMEOUT,
            move |world: &mut World, sim| world.retransmit(sim, conn, seq),
        );
        let segment = Segment::Data {
            conn,
            seq,
            eid: unacked.eid.clone(),
            message: unacked.message.clone(),
        };
        self.send_segment(sim, from, to, segment);
    }

    fn deliver(&mut self, sim: &Simulator<Self>, from: NodeId, to: NodeId, eid: String, message: &str) {
        let (value, sent_at) = decode_message(message);
        let name = |id| {
            self.network
                .node(id)
                .map(|node| node.name().to_owned())
                .unwrap_or_default()
        };

        let record = DataXchg {
            id: eid,
            src: name(from),
            dst: name(to),
            value: value.to_owned(),
            time: sim.now(),
        };
        debug!(
            id = %record.id,
            src = %record.src,
            dst = %record.dst,
            sent_ms = ?sent_at,
            arrival = %record.time,
            "value delivered"
        );

        for subscriber in self.subscribers.iter_mut() {
            subscriber(&record);
        }
        self.output.push_back(record);
        self.produced += 1;
    }
}

impl NetworkHost<Segment> for World {
    fn network(&mut self) -> &mut Network {
        &mut self.network
    }

    fn on_packet_received(&mut self, sim: &mut Simulator<Self>, packet: Packet<Segment>) {
        let (from, to) = (packet.from(), packet.to());

        match packet.into_inner() {
            Segment::Syn { conn } => {
                if !self.servers.entry(to).or_default().accept(conn) {
                    trace!(%conn, "duplicate handshake");
                }
                self.send_segment(sim, to, from, Segment::SynAck { conn });
            }
            Segment::SynAck { conn } => {
                let client = &mut self.clients[conn.index()];
                if client.state != ClientState::Connecting {
                    return;
                }
                client.state = ClientState::Established;
                if let Some(timer) = client.handshake_timer.take() {
                    sim.cancel(timer);
                }
                trace!(%conn, "connection established");
                self.flush_backlog(sim, conn);
            }
            Segment::Data {
                conn,
                seq,
                eid,
                message,
            } => {
                if self.protocol == Protocol::Tcp {
                    self.send_segment(sim, to, from, Segment::Ack { conn, seq });
                }
                if self.servers.entry(to).or_default().deliver(conn, seq) {
                    self.deliver(sim, from, to, eid, &message);
                }
            }
            Segment::Ack { conn, seq } => {
                if let Some(unacked) = self.clients[conn.index()].take_unacked(seq) {
                    sim.cancel(unacked.timer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs,
        sync::{Arc, Mutex},
    };

    fn settings(protocol: Protocol) -> Settings {
        Settings {
            protocol,
            ..Settings::default()
        }
    }

    fn ms(millis: u64) -> SimTime {
        SimTime::from_millis(millis)
    }

    // ---- 1. bounded advance ------------------------------------------------

    #[test]
    fn run_until_stops_before_horizon() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        for at in [5, 20, 40] {
            netsim
                .sim
                .schedule(SimDuration::from_millis(at), |_: &mut World, _| {});
        }

        let next = netsim.run_until(SimTime::ZERO, Some(ms(30)));

        assert_eq!(next, Some(ms(40)));
        assert_eq!(netsim.sim.event_count(), 2);
        assert_eq!(netsim.now(), ms(20));
    }

    #[test]
    fn lookahead_withholds_last_step() {
        let mut netsim = NetSim::init(Settings {
            stop: Some(ms(100)),
            ..settings(Protocol::Udp)
        })
        .unwrap();

        assert_eq!(netsim.run_until(SimTime::ZERO, None), Some(ms(99)));
        assert_eq!(netsim.run_until(ms(99), None), None);
    }

    #[test]
    fn lookahead_clamped_to_last_step() {
        let mut netsim = NetSim::init(Settings {
            stop: Some(ms(10)),
            ..settings(Protocol::Udp)
        })
        .unwrap();
        netsim
            .sim
            .schedule(SimDuration::from_millis(50), |_: &mut World, _| {});

        assert_eq!(netsim.run_until(SimTime::ZERO, None), Some(ms(9)));
        assert_eq!(netsim.sim.event_count(), 0);
    }

    #[test]
    fn unbounded_run_without_events() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        assert_eq!(netsim.run_until(SimTime::ZERO, None), None);
    }

    // ---- 2. connections ----------------------------------------------------

    #[test]
    fn create_is_idempotent() {
        let mut netsim = NetSim::init(settings(Protocol::Tcp)).unwrap();

        assert!(netsim.create("A", "B").unwrap());
        assert!(!netsim.create("A", "B").unwrap());
        assert!(netsim.create("B", "A").unwrap());

        assert_eq!(netsim.connections(), 2);
        assert_eq!(netsim.network().len(), 2);
        assert_eq!(netsim.network().links().count(), 1);
    }

    #[test]
    fn schedule_needs_a_connection() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        netsim.create("A", "B").unwrap();

        assert!(matches!(
            netsim.schedule("B-A", "B", "A", "1", ms(1)),
            Err(FacadeError::UnknownConnection { .. })
        ));
        assert!(matches!(
            netsim.schedule("A-C", "A", "C", "1", ms(1)),
            Err(FacadeError::UnknownConnection { .. })
        ));
        assert!(netsim.input_is_empty());
    }

    #[test]
    fn schedule_now_is_moved_forward() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        netsim.create("A", "B").unwrap();

        netsim.schedule("A-B", "A", "B", "1", SimTime::ZERO).unwrap();
        assert_eq!(netsim.input_len(), 1);
        assert_eq!(netsim.world.input[&0].time, SimTime::from_micros(1));

        netsim.run_until(SimTime::ZERO, Some(ms(10)));
        assert!(netsim.input_is_empty());
    }

    // ---- 3. delivery -------------------------------------------------------

    #[test]
    fn udp_delivery() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        netsim.create("A", "B").unwrap();
        netsim.schedule("A-B", "A", "B", "42", ms(5)).unwrap();

        // 5ms + serialization + 2ms of link delay
        let next = netsim.run_until(SimTime::ZERO, Some(ms(10)));
        assert_eq!(next, Some(ms(7)));
        assert_eq!(netsim.output_len(), 1);

        assert_eq!(netsim.get_data(SimTime::ZERO), None);
        let record = netsim.get_data(ms(7)).unwrap();
        assert_eq!(record.id, "A-B");
        assert_eq!(record.src, "A");
        assert_eq!(record.dst, "B");
        assert_eq!(record.value, "42");
        assert_eq!(record.time.as_millis(), 7);
        assert!(netsim.output_is_empty());
    }

    #[test]
    fn tcp_delivery_after_handshake() {
        let mut netsim = NetSim::init(settings(Protocol::Tcp)).unwrap();
        netsim.create("A", "B").unwrap();
        netsim.schedule("A-B", "A", "B", "hello", ms(1)).unwrap();

        let next = netsim.run_until(SimTime::ZERO, Some(ms(50))).unwrap();
        assert_eq!(netsim.output_len(), 1);

        let record = netsim.get_data(next).unwrap();
        assert_eq!(record.value, "hello");
        // the value waited for the handshake
        assert!(record.time > ms(4));

        // the acknowledgement, the timers are cancelled
        assert_eq!(netsim.run_until(next, None), None);
        assert!(netsim.world.clients[0].unacked.is_empty());
        assert_eq!(netsim.network().dropped(), 0);
        assert!(netsim.now() < ms(20), "{}", netsim.now());
        assert_eq!(netsim.sim.pending(), 0);
    }

    #[test]
    fn cancelled_timers_do_not_move_the_clock() {
        let mut netsim = NetSim::init(settings(Protocol::Tcp)).unwrap();
        netsim.create("A", "B").unwrap();
        netsim.schedule("A-B", "A", "B", "first", ms(1)).unwrap();

        let next = netsim.run_until(SimTime::ZERO, None).unwrap();
        assert_eq!(netsim.get_data(next).unwrap().value, "first");

        netsim.run_until(next, Some(ms(3_600_000)));
        assert!(netsim.now() < ms(20), "{}", netsim.now());

        // still in the future of the network
        netsim.schedule("A-B", "A", "B", "second", ms(25)).unwrap();
        assert_eq!(netsim.input_len(), 1);
        let next = netsim.run_until(ms(20), None).unwrap();
        assert_eq!(netsim.get_data(next).unwrap().value, "second");
        assert_eq!(netsim.world.clients[0].state, ClientState::Established);
    }

    #[test]
    fn failed_handshake_drops_values() {
        let mut netsim = NetSim::init(Settings {
            link_loss: PacketLoss::rate(1.0).unwrap(),
            ..settings(Protocol::Tcp)
        })
        .unwrap();
        netsim.create("A", "B").unwrap();
        netsim.schedule("A-B", "A", "B", "queued", ms(1)).unwrap();

        while netsim.run_until(netsim.now(), None).is_some() {}
        let client = &netsim.world.clients[0];
        assert_eq!(client.state, ClientState::Failed);
        assert!(client.backlog.is_empty());

        netsim
            .schedule("A-B", "A", "B", "late", netsim.now() + SimDuration::from_millis(1))
            .unwrap();
        netsim.run_until(netsim.now(), None);
        assert!(netsim.world.clients[0].backlog.is_empty());
        assert!(netsim.output_is_empty());
    }

    #[test]
    fn subscribers_see_every_record() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        netsim.on_data_received(move |record| sink.lock().unwrap().push(record.value.clone()));

        netsim.create("A", "B").unwrap();
        netsim.schedule("A-B", "A", "B", "1", ms(1)).unwrap();
        netsim.schedule("A-B", "A", "B", "2", ms(2)).unwrap();
        netsim.run_until(SimTime::ZERO, Some(ms(100)));
        netsim.run_until(ms(3), Some(ms(100)));

        assert_eq!(*seen.lock().unwrap(), ["1", "2"]);
    }

    #[test]
    fn take_data_leaves_the_rest() {
        let mut netsim = NetSim::init(settings(Protocol::Udp)).unwrap();
        netsim.create("A", "B").unwrap();
        netsim.create("A", "C").unwrap();
        netsim.schedule("A-B", "A", "B", "b", ms(1)).unwrap();
        netsim.schedule("A-C", "A", "C", "c", ms(1)).unwrap();
        netsim.run_until(SimTime::ZERO, Some(ms(100)));
        netsim.run_until(ms(1), Some(ms(100)));
        assert_eq!(netsim.output_len(), 2);

        let taken = netsim.take_data(ms(10), |record| record.dst == "C");
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].value, "c");
        assert_eq!(netsim.get_data(ms(10)).unwrap().value, "b");
    }

    // ---- 4. topology files -------------------------------------------------

    #[test]
    fn routed_topology() {
        let dir = std::env::temp_dir().join(format!("cosim-facade-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let adjmat = dir.join("adjmat.txt");
        let coords = dir.join("coords.txt");
        fs::write(&adjmat, "0 1 0\n1 0 1\n0 1 0\n").unwrap();
        fs::write(&coords, "A,0,0\nB,10,0\nC,20,0\n").unwrap();

        let mut netsim = NetSim::init(Settings {
            adjmat_file: Some(adjmat),
            coords_file: Some(coords),
            ..settings(Protocol::Udp)
        })
        .unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(
            netsim.create("A", "Z"),
            Err(FacadeError::UnknownNode { .. })
        ));
        netsim.create("A", "C").unwrap();
        netsim.schedule("A-C", "A", "C", "far", ms(1)).unwrap();

        let next = netsim.run_until(SimTime::ZERO, Some(ms(100))).unwrap();
        // two hops of at least 2ms each
        assert!(next >= ms(5));
        let record = netsim.get_data(next).unwrap();
        assert_eq!(record.dst, "C");
        assert_eq!(netsim.network().transmitted(), 2);
    }

    #[test]
    fn adjacency_needs_coordinates() {
        let result = NetSim::init(Settings {
            adjmat_file: Some(PathBuf::from("adjmat.txt")),
            ..Settings::default()
        });
        assert!(matches!(result, Err(FacadeError::MissingCoordinates)));

        let result = NetSim::init(Settings {
            coords_file: Some(PathBuf::from("/nonexistent/coords.txt")),
            ..Settings::default()
        });
        assert!(matches!(result, Err(FacadeError::Topology(_))));
    }

    #[test]
    fn ticks() {
        let netsim = NetSim::init(Settings {
            resolution: SimDuration::from_millis(10),
            ..Settings::default()
        })
        .unwrap();

        assert_eq!(netsim.ticks_to_time(3), ms(30));
        assert_eq!(netsim.time_to_ticks(SimTime::from_micros(39_999)), 3);
    }
}
