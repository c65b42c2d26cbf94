mod data_rate;
mod latency;
mod packet_loss;

pub use self::{
    data_rate::{DataRate, DataRateParseError},
    latency::Latency,
    packet_loss::{PacketLoss, PacketLossParseError, PacketLossRate, PacketLossRateError},
};
