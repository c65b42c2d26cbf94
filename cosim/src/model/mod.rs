/*!
# Simulation model

The [`SimulationModel`] implements the orchestrator's commands on top of
the [`NetSim`] facade. Each entity is a connection between two nodes of
the network, identified by its `eid`; its attributes are the value `v`
received at the server end and the time `t` it arrived.

The model goes through the following states:

```text
Uninitialized --init--> Initialized --create--> Ready --step--> Stepping
                                                              |
                         (any state) ---------stop--------> Stopped
```

Commands issued out of order are answered with a failure and do not
change the state.
*/

pub mod config;
pub mod inputs;
pub mod meta;

pub use self::{
    config::{ConfigError, NetSimConfig},
    meta::Meta,
};
use self::inputs::{TIME, VALUE, parse_time, render};
use crate::{
    codec::MessageType,
    command::Command,
    facade::{DataXchg, FacadeError, NetSim},
};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Change the verbosity of the logs at run time, `0` being the quietest.
pub trait VerbosityHook: Send {
    fn set_verbosity(&self, level: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    Ready,
    Stepping,
    Stopped,
}

/// What to answer to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: MessageType,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub eid: String,
    pub model: String,
    pub src: String,
    pub dst: String,
}

/// A downstream simulator registered with `set_next`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    name: String,
    node: String,
    vars: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Cannot initialise the network simulator")]
    Facade(#[from] FacadeError),
    #[error("Cannot serialize the reply")]
    Json(#[from] serde_json::Error),
}

pub struct SimulationModel {
    state: State,
    config: NetSimConfig,
    sid: String,
    netsim: Option<NetSim>,

    entities: BTreeMap<String, Entity>,
    /// `(src, dst)` to `eid`
    pairs: BTreeMap<(String, String), String>,

    /// the time of the last step, in orchestrator steps
    current: u64,
    /// cleared on every `get_data`
    received: BTreeMap<String, DataXchg>,

    targets: Vec<Target>,
    /// arguments of the `set_data` requests to issue
    outgoing: VecDeque<Vec<Value>>,

    verbosity: Option<Box<dyn VerbosityHook>>,
}

impl Reply {
    pub fn success(body: Value) -> Self {
        Self {
            status: MessageType::Success,
            body,
        }
    }

    pub fn failure(body: Value) -> Self {
        Self {
            status: MessageType::Failure,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MessageType::Success
    }
}

impl Target {
    /// `Sim-0.Instance_Node`: the node is what follows the first `_` of
    /// the entity name
    fn new(name: String, vars: Vec<String>) -> Self {
        let entity = name.split_once('.').map_or(name.as_str(), |(_, entity)| entity);
        let node = entity
            .split_once('_')
            .map_or(entity, |(_, node)| node)
            .to_owned();
        Self { name, node, vars }
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    value.map(render).filter(|text| !text.is_empty())
}

/// `sid.instance_name`, or the full id of the entity if there is no
/// instance name
fn full_id(sid: &str, instance: &str, eid: Option<&str>) -> String {
    match (instance, eid) {
        ("", Some(eid)) => format!("{sid}.{eid}"),
        ("", None) => sid.to_owned(),
        (instance, _) => format!("{sid}.{instance}"),
    }
}

impl SimulationModel {
    pub fn new() -> Self {
        Self {
            state: State::Uninitialized,
            config: NetSimConfig::default(),
            sid: String::new(),
            netsim: None,
            entities: BTreeMap::new(),
            pairs: BTreeMap::new(),
            current: 0,
            received: BTreeMap::new(),
            targets: Vec::new(),
            outgoing: VecDeque::new(),
            verbosity: None,
        }
    }

    pub fn with_verbosity_hook(mut self, hook: Box<dyn VerbosityHook>) -> Self {
        self.verbosity = Some(hook);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == State::Stopped
    }

    pub fn config(&self) -> &NetSimConfig {
        &self.config
    }

    pub fn netsim(&self) -> Option<&NetSim> {
        self.netsim.as_ref()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// The next `set_data` request to issue to the orchestrator, as its
    /// positional arguments.
    pub fn take_set_data(&mut self) -> Option<Vec<Value>> {
        self.outgoing.pop_front()
    }

    /// Run `command`.
    ///
    /// # Errors
    ///
    /// Only on fatal errors, such as a topology that cannot be built: the
    /// simulation cannot go on.
    pub fn dispatch(
        &mut self,
        command: &Command,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Reply, ModelError> {
        use State::*;

        let allowed: &[State] = match command {
            Command::Init => &[Uninitialized],
            Command::Create => &[Initialized, Ready, Stepping],
            Command::SetupDone
            | Command::Step
            | Command::GetData
            | Command::GetProgress
            | Command::GetRelatedEntities
            | Command::SetNext => &[Initialized, Ready, Stepping],
            Command::Stop => &[Uninitialized, Initialized, Ready, Stepping],
            Command::SetData | Command::Unknown(_) => &[],
        };
        if !allowed.contains(&self.state) {
            warn!(%command, state = ?self.state, "command rejected");
            return Ok(Reply::failure(Value::Null));
        }

        let reply = match command {
            Command::Init => return self.init(args, kwargs),
            Command::Create => self.create(args, kwargs),
            Command::SetupDone => {
                debug!("setup done");
                Reply::success(Value::Null)
            }
            Command::Step => self.step(args),
            Command::GetData => self.get_data(args),
            Command::Stop => self.stop(),
            Command::GetProgress => Reply::success(json!(self.progress())),
            Command::GetRelatedEntities => self.related_entities(args),
            Command::SetNext => self.set_next(args, kwargs),
            Command::SetData | Command::Unknown(_) => Reply::failure(Value::Null),
        };
        Ok(reply)
    }

    fn init(&mut self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Reply, ModelError> {
        let mut status = MessageType::Success;

        if let Some(sid) = text(args.first()) {
            self.sid = sid;
        }
        let resolution = args.get(1).into_iter().map(|value| ("time_resolution", value));
        let parameters = kwargs.iter().map(|(key, value)| (key.as_str(), value));
        for (key, value) in resolution.chain(parameters) {
            if let Err(error) = self.config.apply(key, value) {
                warn!(%error, "init parameter rejected");
                status = MessageType::Failure;
            }
        }

        if let (Some(level), Some(hook)) = (self.config.verbose, &self.verbosity) {
            hook.set_verbosity(level);
        }

        let netsim = NetSim::init(self.config.settings())?;
        self.netsim = Some(netsim);
        self.current = self.config.start_time;
        self.state = State::Initialized;

        info!(
            sid = %self.sid,
            model = %self.config.model_name,
            start = self.config.start_time,
            stop = ?self.config.stop_time,
            "simulator initialised"
        );

        let meta = serde_json::to_value(Meta::new(&self.config.model_name))?;
        Ok(Reply { status, body: meta })
    }

    fn create(&mut self, args: Vec<Value>, kwargs: Map<String, Value>) -> Reply {
        let Some(netsim) = self.netsim.as_mut() else {
            return Reply::failure(Value::Null);
        };

        let model = text(args.get(1)).unwrap_or_else(|| self.config.model_name.clone());
        if model != self.config.model_name {
            warn!(%model, "unknown model");
            return Reply::failure(Value::Null);
        }
        let count = args.first().and_then(parse_time).unwrap_or(1);
        if count != 1 {
            debug!(count, "a single entity per pair of nodes");
        }

        let (Some(src), Some(dst)) = (text(kwargs.get("src")), text(kwargs.get("dst"))) else {
            warn!(?kwargs, "create needs `src' and `dst'");
            return Reply::failure(Value::Null);
        };

        let descriptor = |eid: &str| json!([{"type": model, "eid": eid}]);

        if let Some(eid) = self.pairs.get(&(src.clone(), dst.clone())) {
            debug!(%eid, "entity already exists");
            return Reply::success(descriptor(eid));
        }

        let eid = text(kwargs.get("eid"))
            .unwrap_or_else(|| format!("{}{src}-{dst}", self.config.eid_prefix));
        if self.entities.contains_key(&eid) {
            warn!(%eid, %src, %dst, "entity id already used by another connection");
            return Reply::failure(Value::Null);
        }

        if let Err(error) = netsim.create(&src, &dst) {
            warn!(%eid, %error, "cannot create the connection");
            return Reply::failure(Value::Null);
        }

        let reply = Reply::success(descriptor(&eid));
        self.pairs.insert((src.clone(), dst.clone()), eid.clone());
        self.entities.insert(
            eid.clone(),
            Entity {
                eid,
                model,
                src,
                dst,
            },
        );
        if self.state == State::Initialized {
            self.state = State::Ready;
        }
        reply
    }

    fn step(&mut self, args: Vec<Value>) -> Reply {
        let Some(netsim) = self.netsim.as_mut() else {
            return Reply::failure(Value::Null);
        };

        let Some(current) = args.first().and_then(parse_time) else {
            warn!(time = ?args.first(), "step needs the current time");
            return Reply::failure(Value::Null);
        };
        let max_advance = args.get(2).and_then(parse_time);

        let mut status = MessageType::Success;
        let inputs = match args.get(1) {
            Some(Value::Object(inputs)) => inputs.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                warn!(inputs = %other, "step inputs are not an object");
                status = MessageType::Failure;
                Map::new()
            }
        };

        for record in inputs::flatten(&inputs) {
            let Some(entity) = self.entities.get(&record.eid) else {
                warn!(eid = %record.eid, "inputs for an unknown entity");
                continue;
            };

            let at = netsim.ticks_to_time(record.time);
            if at <= netsim.now() {
                warn!(
                    eid = %entity.eid,
                    source = %record.source,
                    time = record.time,
                    now = %netsim.now(),
                    "time rollback, value dropped"
                );
                continue;
            }

            if let Err(error) = netsim.schedule(&entity.eid, &entity.src, &entity.dst, &record.value, at) {
                warn!(eid = %entity.eid, %error, "value not scheduled");
            }
        }

        self.current = current;
        let now = netsim.ticks_to_time(current);
        let horizon = max_advance.map(|max| netsim.ticks_to_time(max));
        let next = netsim.run_until(now, horizon);
        let body = match next {
            Some(next) => Value::String(netsim.time_to_ticks(next).to_string()),
            None => Value::Null,
        };

        self.state = State::Stepping;
        if !self.targets.is_empty() {
            self.collect_set_data();
        }

        debug!(current, ?max_advance, next = %body, "step");
        Reply { status, body }
    }

    /// Queue a `set_data` request for every record due for a target, or
    /// a placeholder per target if none is due.
    fn collect_set_data(&mut self) {
        let Some(netsim) = self.netsim.as_mut() else {
            return;
        };

        let nodes: HashSet<&str> = self.targets.iter().map(|target| target.node.as_str()).collect();
        let now = netsim.ticks_to_time(self.current);
        let records = netsim.take_data(now, |record| nodes.contains(record.dst.as_str()));

        if records.is_empty() {
            let source = full_id(&self.sid, &self.config.instance_name, None);
            for target in &self.targets {
                let placeholders: Map<String, Value> = target
                    .vars
                    .iter()
                    .map(|var| (var.clone(), Value::from("null")))
                    .collect();
                self.outgoing
                    .push_back(vec![json!({ &source: { &target.name: placeholders } })]);
            }
            return;
        }

        for record in records {
            let source = full_id(&self.sid, &self.config.instance_name, Some(&record.id));
            let time = netsim.time_to_ticks(record.time);
            for target in self.targets.iter().filter(|target| target.node == record.dst) {
                let data = json!({
                    "s": record.src,
                    "d": record.dst,
                    VALUE: record.value,
                    TIME: time,
                });
                self.outgoing
                    .push_back(vec![json!({ &source: { &target.name: data } })]);
            }
        }
    }

    fn get_data(&mut self, args: Vec<Value>) -> Reply {
        let Some(netsim) = self.netsim.as_mut() else {
            return Reply::failure(Value::Null);
        };

        self.received.clear();
        let now = netsim.ticks_to_time(self.current);
        while let Some(record) = netsim.get_data(now) {
            self.received.insert(record.id.clone(), record);
        }

        let requested = match args.into_iter().next() {
            Some(Value::Object(requested)) => requested,
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                warn!(outputs = %other, "get_data expects an object");
                return Reply::failure(Value::Null);
            }
        };

        let mut data = Map::new();
        for (eid, attrs) in requested {
            let attrs: Vec<String> = match attrs {
                Value::Array(attrs) if !attrs.is_empty() => attrs.iter().map(render).collect(),
                _ => vec![VALUE.to_owned(), TIME.to_owned()],
            };

            let mut values = Map::new();
            if let Some(record) = self.received.remove(&eid) {
                for attr in attrs {
                    let value = match attr.as_str() {
                        VALUE => Value::String(record.value.clone()),
                        TIME => json!(netsim.time_to_ticks(record.time)),
                        _ => {
                            debug!(%eid, %attr, "unknown attribute");
                            continue;
                        }
                    };
                    values.insert(attr, value);
                }
            } else if self.config.none_placeholders {
                for attr in attrs {
                    values.insert(attr, Value::from("None"));
                }
            } else {
                continue;
            }
            data.insert(eid, Value::Object(values));
        }

        Reply::success(Value::Object(data))
    }

    fn stop(&mut self) -> Reply {
        if let Some(netsim) = self.netsim.as_mut() {
            netsim.destroy();
        }
        self.state = State::Stopped;
        info!("simulator stopped");
        Reply::success(Value::Null)
    }

    /// percentage of `[start_time, stop_time]` covered
    fn progress(&self) -> f64 {
        let Some(stop) = self.config.stop_time else {
            return 0.0;
        };
        let start = self.config.start_time;
        if stop <= start {
            return 100.0;
        }
        let done = self.current.saturating_sub(start) as f64 / (stop - start) as f64;
        (done * 100.0).clamp(0.0, 100.0)
    }

    /// the entities sharing a node with `entity`
    fn related(&self, entity: &Entity) -> Map<String, Value> {
        self.entities
            .values()
            .filter(|other| other.eid != entity.eid)
            .filter(|other| {
                [&other.src, &other.dst]
                    .iter()
                    .any(|node| **node == entity.src || **node == entity.dst)
            })
            .map(|other| (other.eid.clone(), Value::from(other.model.clone())))
            .collect()
    }

    fn related_entities(&self, args: Vec<Value>) -> Reply {
        match args.into_iter().next() {
            None | Some(Value::Null) => {
                let nodes: Map<String, Value> = self
                    .entities
                    .values()
                    .map(|entity| (entity.eid.clone(), json!({"type": entity.model})))
                    .collect();
                let mut edges = Vec::new();
                for entity in self.entities.values() {
                    for related in self.related(entity).keys() {
                        if entity.eid < *related {
                            edges.push(json!([entity.eid, related, {}]));
                        }
                    }
                }
                Reply::success(json!({ "nodes": nodes, "edges": edges }))
            }
            Some(Value::String(eid)) => match self.entities.get(&eid) {
                Some(entity) => Reply::success(Value::Object(self.related(entity))),
                None => Reply::failure(Value::Null),
            },
            Some(Value::Array(eids)) => {
                let mut related = Map::new();
                let mut status = MessageType::Success;
                for eid in eids.iter().map(render) {
                    match self.entities.get(&eid) {
                        Some(entity) => {
                            related.insert(eid, Value::Object(self.related(entity)));
                        }
                        None => {
                            warn!(%eid, "unknown entity");
                            status = MessageType::Failure;
                        }
                    }
                }
                Reply {
                    status,
                    body: Value::Object(related),
                }
            }
            Some(other) => {
                warn!(args = %other, "get_related_entities expects entity ids");
                Reply::failure(Value::Null)
            }
        }
    }

    fn set_next(&mut self, args: Vec<Value>, kwargs: Map<String, Value>) -> Reply {
        let name = text(kwargs.get("target_name").or(args.first()));
        let vars = kwargs.get("target_vars").or(args.get(1));

        let Some(name) = name else {
            warn!("set_next needs a `target_name'");
            return Reply::failure(Value::Null);
        };
        let vars = match vars {
            Some(Value::Array(vars)) => vars.iter().map(render).collect(),
            Some(Value::String(var)) => vec![var.clone()],
            _ => vec![VALUE.to_owned(), TIME.to_owned()],
        };

        if self.targets.iter().any(|target| target.name == name) {
            debug!(%name, "target already registered");
            return Reply::success(Value::Null);
        }
        let target = Target::new(name, vars);
        info!(name = %target.name, node = %target.node, "target registered");
        self.targets.push(target);
        Reply::success(Value::Null)
    }
}

impl Default for SimulationModel {
    fn default() -> Self {
        Self::new()
    }
}
