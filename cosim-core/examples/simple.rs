use cosim_core::{
    Latency, Network, SimDuration, SimTime, Simulator,
    network::{self, NetworkHost, Packet},
};

struct Host {
    network: Network,
}

impl NetworkHost<String> for Host {
    fn network(&mut self) -> &mut Network {
        &mut self.network
    }

    fn on_packet_received(&mut self, sim: &mut Simulator<Self>, packet: Packet<String>) {
        println!(
            "[{id}] {from}->{to} at {now}: {msg}",
            id = packet.id(),
            from = packet.from(),
            to = packet.to(),
            now = sim.now(),
            msg = packet.into_inner()
        );
    }
}

fn main() -> anyhow::Result<()> {
    let mut network = Network::new();
    let sender = network.new_node("sender").build()?;
    let receiver = network.new_node("receiver").build()?;

    // Connect the two nodes with a 50ms latency link.
    network
        .configure_link(sender, receiver)
        .set_delay(Latency::new(SimDuration::from_millis(50)))
        .set_rate("10Mbps".parse()?)
        .apply()?;

    let mut host = Host { network };
    let mut sim = Simulator::new();

    let packet = host
        .network
        .new_packet()
        .from(sender)
        .to(receiver)
        .data("Hello World!".to_owned())
        .build()?;
    network::send(&mut host, &mut sim, packet)?;

    // Still within the link latency, nothing is delivered.
    let executed = sim.run_until(&mut host, SimTime::from_millis(10));
    println!("{executed} event(s) before {}", sim.now());
    println!("next event at {:?}", sim.next_time());

    // After enough time the packet is delivered.
    sim.run_until(&mut host, SimTime::from_millis(100));

    Ok(())
}
