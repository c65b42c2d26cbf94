use crate::facade::{Protocol, Settings};
use cosim_core::{
    DataRate, Latency, PacketLoss, SimDuration, SimTime,
    defaults::{DEFAULT_LINK_DELAY, DEFAULT_LINK_RATE, DEFAULT_RANDOM_SEED},
};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL_NAME: &str = "Transporter";

/// Seconds of simulated time per orchestrator step.
pub const DEFAULT_TIME_RESOLUTION: f64 = 0.001;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown parameter `{0}'")]
    UnknownKey(String),
    #[error("Invalid value `{value}' for `{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// The parameters of the `init` command.
///
/// Times are in orchestrator steps, see `time_resolution`.
#[derive(Debug, Clone)]
pub struct NetSimConfig {
    pub model_name: String,
    pub eid_prefix: String,
    pub instance_name: String,

    pub start_time: u64,
    pub stop_time: Option<u64>,
    pub step_size: Option<u64>,
    pub time_resolution: f64,
    pub random_seed: u64,

    pub appcon_file: Option<PathBuf>,
    pub adjmat_file: Option<PathBuf>,
    pub coords_file: Option<PathBuf>,

    pub link_rate: DataRate,
    pub link_delay: Latency,
    pub link_error_rate: PacketLoss,
    pub protocol: Protocol,

    pub verbose: Option<u8>,
    pub none_placeholders: bool,
}

impl Default for NetSimConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_owned(),
            eid_prefix: String::new(),
            instance_name: String::new(),
            start_time: 0,
            stop_time: None,
            step_size: None,
            time_resolution: DEFAULT_TIME_RESOLUTION,
            random_seed: DEFAULT_RANDOM_SEED,
            appcon_file: None,
            adjmat_file: None,
            coords_file: None,
            link_rate: DEFAULT_LINK_RATE,
            link_delay: DEFAULT_LINK_DELAY,
            link_error_rate: PacketLoss::None,
            protocol: Protocol::default(),
            verbose: None,
            none_placeholders: false,
        }
    }
}

fn invalid(key: &str, value: &Value, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_owned(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Numbers may come as JSON numbers or as strings.
fn as_f64(key: &str, value: &Value) -> Result<f64, ConfigError> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    number
        .filter(|number: &f64| number.is_finite())
        .ok_or_else(|| invalid(key, value, "expecting a number"))
}

fn as_u64(key: &str, value: &Value) -> Result<u64, ConfigError> {
    if let Some(number) = value.as_u64() {
        return Ok(number);
    }
    let number = as_f64(key, value)?;
    if number < 0.0 || number.fract() != 0.0 || number > u64::MAX as f64 {
        return Err(invalid(key, value, "expecting a non negative integer"));
    }
    Ok(number as u64)
}

fn as_text(key: &str, value: &Value) -> Result<String, ConfigError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(invalid(key, value, "expecting a string")),
    }
}

fn as_bool(key: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(invalid(key, value, "expecting a boolean")),
        },
        _ => Err(invalid(key, value, "expecting a boolean")),
    }
}

/// `null` and empty strings unset the value
fn optional<T>(
    key: &str,
    value: &Value,
    parse: impl FnOnce(&str, &Value) -> Result<T, ConfigError>,
) -> Result<Option<T>, ConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        value => parse(key, value).map(Some),
    }
}

fn as_path(key: &str, value: &Value) -> Result<PathBuf, ConfigError> {
    as_text(key, value).map(PathBuf::from)
}

impl NetSimConfig {
    /// Set the parameter `key`.
    ///
    /// # Errors
    ///
    /// On unknown keys and values that cannot be parsed, in which case the
    /// configuration is left unchanged.
    pub fn apply(&mut self, key: &str, value: &Value) -> Result<(), ConfigError> {
        match key {
            "model_name" => self.model_name = as_text(key, value)?,
            "eid_prefix" => self.eid_prefix = as_text(key, value)?,
            "instance_name" => self.instance_name = as_text(key, value)?,
            "start_time" => self.start_time = as_u64(key, value)?,
            "stop_time" => self.stop_time = optional(key, value, as_u64)?,
            "step_size" => self.step_size = optional(key, value, as_u64)?,
            "random_seed" => self.random_seed = as_u64(key, value)?,
            "time_resolution" => {
                let resolution = as_f64(key, value)?;
                if resolution * 1e6 < 1.0 {
                    return Err(invalid(key, value, "must be at least a microsecond"));
                }
                self.time_resolution = resolution;
            }
            "appcon_file" => self.appcon_file = optional(key, value, as_path)?,
            "adjmat_file" => self.adjmat_file = optional(key, value, as_path)?,
            "coords_file" => self.coords_file = optional(key, value, as_path)?,
            "verbose" => {
                let level = as_u64(key, value)?;
                self.verbose = Some(level.min(u8::MAX as u64) as u8);
            }
            "linkRate" => {
                self.link_rate = match value {
                    Value::String(text) => text
                        .parse::<DataRate>()
                        .map_err(|e| invalid(key, value, e))?,
                    _ => DataRate::from_bits_per_sec(as_u64(key, value)?),
                }
            }
            "linkDelay" => {
                self.link_delay = match value {
                    Value::String(text) if text.trim().parse::<f64>().is_err() => {
                        text.parse::<Latency>().map_err(|e| invalid(key, value, e))?
                    }
                    // bare numbers are milliseconds
                    _ => Latency::new(SimDuration::from_micros(
                        (as_f64(key, value)? * 1_000.0).round().max(0.0) as u64,
                    )),
                }
            }
            "linkErrorRate" => {
                self.link_error_rate = match value {
                    Value::String(text) => text
                        .parse::<PacketLoss>()
                        .map_err(|e| invalid(key, value, e))?,
                    _ => PacketLoss::rate(as_f64(key, value)?).map_err(|e| invalid(key, value, e))?,
                }
            }
            "tcpOrUdp" => {
                self.protocol = as_text(key, value)?
                    .parse::<Protocol>()
                    .map_err(|e| invalid(key, value, e))?
            }
            "none_placeholders" => self.none_placeholders = as_bool(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_owned())),
        }
        Ok(())
    }

    /// one orchestrator step
    pub fn resolution(&self) -> SimDuration {
        SimDuration::from_micros((self.time_resolution * 1e6).round() as u64)
    }

    fn ticks(&self, ticks: u64) -> SimTime {
        SimTime::from_micros(ticks.saturating_mul(self.resolution().as_micros()))
    }

    /// The facade settings, in simulated time.
    pub fn settings(&self) -> Settings {
        let resolution = self.resolution();
        Settings {
            adjmat_file: self.adjmat_file.clone(),
            coords_file: self.coords_file.clone(),
            appcon_file: self.appcon_file.clone(),
            link_rate: self.link_rate,
            link_delay: self.link_delay,
            link_loss: self.link_error_rate,
            protocol: self.protocol,
            random_seed: self.random_seed,
            resolution,
            start: self.ticks(self.start_time),
            stop: self.stop_time.map(|stop| self.ticks(stop)),
            step_size: self
                .step_size
                .map(|step| SimDuration::from_micros(step.saturating_mul(resolution.as_micros()))),
        }
    }
}
