/*!
# Co-simulation core

Deterministic building blocks of the network side of a co-simulation:

* [`time`]: the simulated clock, in microseconds;
* [`scheduler`]: the discrete event [`Simulator`], which can be advanced
  in bounded increments and be fed events from other threads;
* [`measure`]: link rate, delay and loss;
* [`network`]: routed store-and-forward network of named nodes;
* [`topology`]: readers of the topology description files.

Nothing in here performs I/O apart from reading the topology files.

[`Simulator`]: scheduler::Simulator
*/

pub mod defaults;
pub mod measure;
pub mod network;
pub mod scheduler;
pub mod time;
pub mod topology;

pub use self::{
    measure::{DataRate, Latency, PacketLoss},
    network::{Network, NodeId},
    scheduler::Simulator,
    time::{SimDuration, SimTime},
};
