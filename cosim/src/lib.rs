/*!
# Co-simulation bridge

Exposes the [`cosim_core`] network model to a Mosaik style orchestrator.

The orchestrator drives the simulation over a single TCP connection:
[`transport`] cuts the stream into frames, [`codec`] turns the frames
into requests and replies, the [`Server`] loop hands every request to the
[`SimulationModel`] which forwards the values it receives to the network
through the [`NetSim`] facade.

```no_run
use cosim::{Server, SimulationModel};

# fn main() -> anyhow::Result<()> {
let mut server = Server::connect("127.0.0.1:5678", SimulationModel::new())?;
server.run()?;
# Ok(())
# }
```
*/

pub mod codec;
pub mod command;
pub mod facade;
pub mod model;
pub mod server;
pub mod transport;

pub use self::{
    command::Command,
    facade::{DataXchg, FacadeError, NetSim, Protocol, Settings},
    model::{Reply, SimulationModel, VerbosityHook},
    server::Server,
    transport::{FrameError, Transport},
};
