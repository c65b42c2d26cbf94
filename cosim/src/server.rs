/*!
The main loop: read a request, run it, write the reply.

Requests are served one at a time. Before the reply to a `step`, the
`set_data` requests queued by the model are sent to the orchestrator, each
waiting for its own reply.
*/

use crate::{
    codec::{self, CodecError, Envelope, MessageType},
    command::Command,
    model::{Reply, SimulationModel},
    transport::Transport,
};
use anyhow::{Context as _, Result};
use serde_json::{Map, Value};
use std::{
    fmt,
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
};
use tracing::{debug, info, warn};

pub struct Server<S> {
    transport: Transport<S>,
    model: SimulationModel,
    /// id of the next request issued by this side
    next_request_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl Server<TcpStream> {
    /// Connect to the orchestrator listening on `addr`.
    pub fn connect<A>(addr: A, model: SimulationModel) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let stream = TcpStream::connect(&addr)
            .with_context(|| format!("Cannot connect to the orchestrator at {addr}"))?;
        stream
            .set_nodelay(true)
            .context("Cannot configure the connection")?;
        info!(%addr, "connected to the orchestrator");

        Ok(Self::new(stream, model))
    }
}

impl<S> Server<S>
where
    S: Read + Write,
{
    pub fn new(stream: S, model: SimulationModel) -> Self {
        Self {
            transport: Transport::new(stream),
            model,
            next_request_id: 0,
        }
    }

    pub fn model(&self) -> &SimulationModel {
        &self.model
    }

    /// Serve requests until `stop`.
    ///
    /// # Errors
    ///
    /// When the connection is lost or the simulation cannot go on.
    /// Malformed frames and failed commands are only logged.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let payload = match self.transport.read_frame() {
                Ok(payload) => payload,
                Err(error) if error.is_recoverable() => {
                    warn!(%error, "frame lost");
                    continue;
                }
                Err(error) => return Err(error).context("Cannot read from the orchestrator"),
            };

            if self.handle(&payload)? == Flow::Stop {
                info!("stopped by the orchestrator");
                return Ok(());
            }
        }
    }

    fn handle(&mut self, payload: &[u8]) -> Result<Flow> {
        let envelope = match codec::decode(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, "malformed frame dropped");
                return Ok(Flow::Continue);
            }
        };
        if envelope.kind != MessageType::Request {
            warn!(id = envelope.id, kind = %envelope.kind, "unexpected reply dropped");
            return Ok(Flow::Continue);
        }

        let request = match Envelope::into_request(envelope) {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "malformed request");
                if let CodecError::MalformedRequest { id, .. } = error {
                    self.reply(id, Reply::failure(Value::Null))?;
                }
                return Ok(Flow::Continue);
            }
        };

        let command = Command::from(request.command.as_str());
        debug!(id = request.id, %command, "request");
        if let Command::Unknown(name) = &command {
            warn!(id = request.id, %name, "unknown command");
        }

        let reply = match self.model.dispatch(&command, request.args, request.kwargs) {
            Ok(reply) => reply,
            Err(error) => {
                self.reply(request.id, Reply::failure(Value::Null))?;
                return Err(error).context("The simulation cannot go on");
            }
        };

        while let Some(args) = self.model.take_set_data() {
            self.call("set_data", args)?;
        }
        self.reply(request.id, reply)?;

        if self.model.is_stopped() {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn reply(&mut self, id: u64, reply: Reply) -> Result<()> {
        if !reply.is_success() {
            debug!(id, "replying with a failure");
        }
        let payload = codec::encode(reply.status, id, reply.body)?;
        self.transport
            .write_frame(&payload)
            .context("Cannot reply to the orchestrator")
    }

    /// Issue a request to the orchestrator and wait for its reply.
    ///
    /// Frames that are not the reply to this request are dropped.
    fn call(&mut self, command: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let payload = codec::encode_request(id, command, args, Map::new())?;
        self.transport
            .write_frame(&payload)
            .with_context(|| format!("Cannot send `{command}' to the orchestrator"))?;
        debug!(id, %command, "request sent");

        loop {
            let payload = match self.transport.read_frame() {
                Ok(payload) => payload,
                Err(error) if error.is_recoverable() => {
                    warn!(%error, "frame lost");
                    continue;
                }
                Err(error) => {
                    return Err(error)
                        .with_context(|| format!("No reply to `{command}' ({id})"));
                }
            };

            let envelope = match codec::decode(&payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(%error, "malformed frame dropped");
                    continue;
                }
            };

            match envelope.kind {
                MessageType::Request => {
                    warn!(
                        id = envelope.id,
                        waiting_for = id,
                        "request received while waiting for a reply, dropped"
                    );
                }
                _ if envelope.id != id => {
                    warn!(expected = id, received = envelope.id, "uncorrelated reply dropped");
                }
                MessageType::Failure => {
                    warn!(id, %command, body = %envelope.body, "request failed");
                    return Ok(envelope.body);
                }
                MessageType::Success => return Ok(envelope.body),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{decode_frame, encode_frame};
    use serde_json::json;
    use std::io::{self, Cursor};

    /// plays back what the orchestrator sends and records the replies
    struct Script {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Script {
        fn new(messages: &[Value]) -> Self {
            let mut input = Vec::new();
            for message in messages {
                let payload = serde_json::to_vec(message).unwrap();
                input.extend(encode_frame(&payload).unwrap());
            }
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        fn raw(frames: &[&[u8]]) -> Self {
            let mut input = Vec::new();
            for frame in frames {
                input.extend(encode_frame(frame).unwrap());
            }
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        fn sent(&self) -> Vec<Value> {
            let mut sent = Vec::new();
            let mut bytes = self.output.as_slice();
            while let Some((payload, used)) = decode_frame(bytes).unwrap() {
                sent.push(serde_json::from_slice(payload).unwrap());
                bytes = &bytes[used..];
            }
            assert!(bytes.is_empty(), "trailing bytes");
            sent
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn serve(script: Script) -> (Result<()>, Vec<Value>) {
        let mut server = Server::new(script, SimulationModel::new());
        let result = server.run();
        let sent = server.transport.get_ref().sent();
        (result, sent)
    }

    #[test]
    fn session() {
        let script = Script::new(&[
            json!([0, 0, ["init", ["Net"], {"stop_time": 100, "tcpOrUdp": "udp"}]]),
            json!([0, 1, ["create", [1, "Transporter"], {"src": "A", "dst": "B"}]]),
            json!([0, 2, ["setup_done", [], {}]]),
            json!([0, 3, ["step", [0, {}], {}]]),
            json!([0, 4, ["stop", [], {}]]),
            json!([0, 5, ["step", [1, {}], {}]]),
        ]);

        let (result, sent) = serve(script);

        assert!(result.is_ok());
        assert_eq!(sent.len(), 5, "nothing served after stop");
        for (id, reply) in sent.iter().enumerate() {
            assert_eq!(reply[0], 1, "{reply}");
            assert_eq!(reply[1], id);
        }
        assert_eq!(sent[1][2], json!([{"type": "Transporter", "eid": "A-B"}]));
        assert_eq!(sent[2][2], Value::Null);
        let next: u64 = sent[3][2].as_str().unwrap().parse().unwrap();
        assert!(next < 100, "{next}");
    }

    #[test]
    fn unknown_command_gets_a_failure() {
        let script = Script::new(&[json!([0, 9, ["teleport", [], {}]])]);

        let (result, sent) = serve(script);

        // then the connection is closed
        assert!(result.is_err());
        assert_eq!(sent, [json!([2, 9, null])]);
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let script = Script::raw(&[
            b"not json",
            br#"[0, "x", ["init", [], {}]]"#,
            br#"[0, 4, "init"]"#,
            br#"[1, 0, null]"#,
            br#"[0, 5, ["setup_done"]]"#,
        ]);

        let (result, sent) = serve(script);

        assert!(result.is_err());
        assert_eq!(sent, [json!([2, 4, null]), json!([2, 5, null])]);
    }

    #[test]
    fn set_data_waits_for_its_reply() {
        let script = Script::new(&[
            json!([0, 0, ["init", ["Net"], {"tcpOrUdp": "udp"}]]),
            json!([0, 1, ["create", [1, "Transporter"], {"src": "A", "dst": "B"}]]),
            json!([0, 2, ["set_next", [], {"target_name": "Ctrl-0.Ctrl_B", "target_vars": ["v"]}]]),
            json!([0, 3, ["step", [0, {}], {}]]),
            // a stale reply, then the reply to the first `set_data'
            json!([1, 7, null]),
            json!([1, 0, null]),
            json!([0, 4, ["step", [1, {}], {}]]),
            json!([1, 1, null]),
            json!([0, 5, ["stop", [], {}]]),
        ]);

        let (result, sent) = serve(script);

        assert!(result.is_ok());
        let kinds_and_ids: Vec<(u64, u64)> = sent
            .iter()
            .map(|message| (message[0].as_u64().unwrap(), message[1].as_u64().unwrap()))
            .collect();
        assert_eq!(
            kinds_and_ids,
            [(1, 0), (1, 1), (1, 2), (0, 0), (1, 3), (0, 1), (1, 4), (1, 5)]
        );
        assert_eq!(
            sent[3],
            json!([0, 0, ["set_data", [{"Net": {"Ctrl-0.Ctrl_B": {"v": "null"}}}], {}]])
        );
    }

    #[test]
    fn fatal_init_fails_the_session() {
        let script = Script::new(&[json!([
            0,
            0,
            ["init", ["Net"], {"coords_file": "/nonexistent/coords.txt"}]
        ])]);

        let (result, sent) = serve(script);

        assert!(result.is_err());
        assert_eq!(sent, [json!([2, 0, null])]);
    }
}
