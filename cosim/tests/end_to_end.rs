//! A session over a real TCP connection, the test playing the orchestrator.

use cosim::{
    Server, SimulationModel, Transport,
    codec::{self, MessageType},
};
use serde_json::{Map, Value, json};
use std::{
    net::{TcpListener, TcpStream},
    thread::{self, JoinHandle},
    time::Duration,
};

struct Orchestrator {
    transport: Transport<TcpStream>,
    server: Option<JoinHandle<anyhow::Result<()>>>,
    next_id: u64,
}

impl Orchestrator {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || Server::connect(addr, SimulationModel::new())?.run());

        let (stream, _) = listener.accept().unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        Self {
            transport: Transport::new(stream),
            server: Some(server),
            next_id: 0,
        }
    }

    fn send(&mut self, command: &str, args: Value, kwargs: Value) -> u64 {
        let Value::Array(args) = args else {
            panic!("args must be an array")
        };
        let Value::Object(kwargs) = kwargs else {
            panic!("kwargs must be an object")
        };
        let id = self.next_id;
        self.next_id += 1;
        let payload = codec::encode_request(id, command, args, kwargs).unwrap();
        self.transport.write_frame(&payload).unwrap();
        id
    }

    fn receive(&mut self) -> codec::Envelope {
        let payload = self.transport.read_frame().unwrap();
        codec::decode(&payload).unwrap()
    }

    /// send a request and wait for its reply
    fn call(&mut self, command: &str, args: Value, kwargs: Value) -> (MessageType, Value) {
        let id = self.send(command, args, kwargs);
        let reply = self.receive();
        assert_eq!(reply.id, id, "reply to {command}");
        (reply.kind, reply.body)
    }

    fn reply(&mut self, id: u64, body: Value) {
        let payload = codec::encode(MessageType::Success, id, body).unwrap();
        self.transport.write_frame(&payload).unwrap();
    }

    fn stop(mut self) -> anyhow::Result<()> {
        let (kind, _) = self.call("stop", json!([]), json!({}));
        assert_eq!(kind, MessageType::Success);
        self.server.take().unwrap().join().unwrap()
    }
}

fn setup(kwargs: Value) -> Orchestrator {
    let mut orchestrator = Orchestrator::start();

    let (kind, meta) = orchestrator.call("init", json!(["Net", 0.001]), kwargs);
    assert_eq!(kind, MessageType::Success);
    assert_eq!(meta["api_version"], "2.4");
    assert!(meta["models"]["Transporter"]["public"].as_bool().unwrap());

    let (kind, entities) = orchestrator.call(
        "create",
        json!([1, "Transporter"]),
        json!({"src": "A", "dst": "B"}),
    );
    assert_eq!(kind, MessageType::Success);
    assert_eq!(entities, json!([{"type": "Transporter", "eid": "A-B"}]));

    let (kind, _) = orchestrator.call("setup_done", json!([]), json!({}));
    assert_eq!(kind, MessageType::Success);

    orchestrator
}

fn next_step(body: &Value) -> u64 {
    body.as_str()
        .and_then(|next| next.parse().ok())
        .unwrap_or_else(|| panic!("expecting the next step, got {body}"))
}

#[test]
fn value_crosses_the_network() {
    let mut orchestrator = setup(json!({"stop_time": 100, "tcpOrUdp": "udp"}));

    let inputs = json!({"A-B": {"v": {"Grid-0.bus": "42"}, "t": {"Grid-0.bus": 2}}});
    let (kind, mut next) = orchestrator.call("step", json!([0, inputs]), json!({}));
    assert_eq!(kind, MessageType::Success);

    let mut received = Map::new();
    for _ in 0..100 {
        let time = next_step(&next);
        assert!(time < 100, "{time}");

        let (kind, body) = orchestrator.call("step", json!([time, {}]), json!({}));
        assert_eq!(kind, MessageType::Success);
        next = body;

        let (_, data) = orchestrator.call("get_data", json!([{"A-B": ["v", "t"]}]), json!({}));
        if let Value::Object(data) = data {
            if !data.is_empty() {
                received = data;
                break;
            }
        }
    }

    let record = &received["A-B"];
    assert_eq!(record["v"], "42");
    assert!(record["t"].as_u64().unwrap() >= 2);

    orchestrator.stop().unwrap();
}

#[test]
fn set_data_is_answered_before_the_step() {
    let mut orchestrator = setup(json!({"tcpOrUdp": "udp"}));

    let (kind, _) = orchestrator.call(
        "set_next",
        json!([]),
        json!({"target_name": "Ctrl-0.Ctrl_B", "target_vars": ["v"]}),
    );
    assert_eq!(kind, MessageType::Success);

    let step = orchestrator.send("step", json!([0, {}]), json!({}));

    let request = orchestrator.receive();
    assert_eq!(request.kind, MessageType::Request);
    let set_data = request.clone().into_request().unwrap();
    assert_eq!(set_data.command, "set_data");
    assert_eq!(
        set_data.args,
        [json!({"Net": {"Ctrl-0.Ctrl_B": {"v": "null"}}})]
    );
    orchestrator.reply(request.id, Value::Null);

    let reply = orchestrator.receive();
    assert_eq!((reply.kind, reply.id), (MessageType::Success, step));

    orchestrator.stop().unwrap();
}

#[test]
fn unknown_command_is_rejected() {
    let mut orchestrator = setup(json!({}));

    let (kind, body) = orchestrator.call("teleport", json!(["A", "B"]), json!({}));
    assert_eq!(kind, MessageType::Failure);
    assert_eq!(body, Value::Null);

    // the session goes on
    let (kind, progress) = orchestrator.call("get_progress", json!([]), json!({}));
    assert_eq!(kind, MessageType::Success);
    assert_eq!(progress, 0.0);

    orchestrator.stop().unwrap();
}
