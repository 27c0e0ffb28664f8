//! remote.rs
//! Operator-facing request/reply service.
//!
//! `RemoteControl` is the transport-neutral core: it flips events, routes peak
//! torques and reads the snapshot board. `RemoteServer` carries it over HTTP
//! (`POST /rpc`, JSON in and out). Nothing here runs on the real-time path.
//!
//! ```text
//! {"method": "torques", "left": 20.0, "right": 18.5}   -> {"ok": true}
//! {"method": "ret_val", "thread": "exo_left", "field": "n"} -> {"ok": 17.93}
//! {"method": "dance"}  -> {"error": {"code": "unknown_method", "message": "..."}}
//! ```

use std::{io::Read, net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tiny_http::{Header, Method, Response, Server};

use crate::{
    comms::{
        message::{EventMsg, MessageBody, PeakTorqueMsg},
        router::MessageRouter,
    },
    error::{ExoError, RemoteError},
    events::{EventKind, Events},
    gait::estimator::GAIT_ADDRESS,
    model::side::Side,
    utils::{metrics::RemoteCounters, recorder::SnapshotBoard},
};

/// Router address used as sender for everything the service emits.
pub const REMOTE_ADDRESS: &str = "remote";

const METHODS: [&str; 7] = ["subject_info", "get_subject_info", "pause", "quit", "log", "torques", "ret_val"];

/// Trial metadata carried into log file names; never affects control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_id: String,
    pub trial_type: String,
    #[serde(default)]
    pub trial_condition: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub use_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    SubjectInfo {
        subject_id: String,
        trial_type: String,
        #[serde(default)]
        trial_condition: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        use_backup: bool,
    },
    GetSubjectInfo,
    Pause { value: bool },
    Quit { value: bool },
    Log { value: bool },
    Torques { left: f64, right: f64 },
    RetVal { thread: String, field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    SubjectInfo(SubjectInfo),
    Value(Value),
}

impl Reply {
    pub fn into_json(self) -> Value {
        match self {
            Reply::Ack => Value::Bool(true),
            Reply::SubjectInfo(info) => json!(info),
            Reply::Value(v) => v,
        }
    }
}

/// Parses a JSON request, telling an unknown method apart from a malformed body.
pub fn parse_request(body: &str) -> Result<Request, RemoteError> {
    let raw: Value = serde_json::from_str(body).map_err(|e| RemoteError::BadRequest(e.to_string()))?;
    let method = raw
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::BadRequest("missing \"method\"".into()))?;
    if !METHODS.contains(&method) {
        return Err(RemoteError::UnknownMethod(method.to_string()));
    }
    serde_json::from_value(raw).map_err(|e| RemoteError::BadRequest(e.to_string()))
}

/// Where peak torques go: straight to the loops, or through the gait estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorqueRoute {
    Direct,
    ViaGait,
}

#[derive(Clone)]
pub struct RemoteControl {
    router: Arc<MessageRouter>,
    events: Arc<Events>,
    board: SnapshotBoard,
    subject: Arc<Mutex<SubjectInfo>>,
    torque_route: TorqueRoute,
}

impl RemoteControl {
    pub fn new(
        router: Arc<MessageRouter>,
        events: Arc<Events>,
        board: SnapshotBoard,
        subject: SubjectInfo,
        torque_route: TorqueRoute,
    ) -> Self {
        Self { router, events, board, subject: Arc::new(Mutex::new(subject)), torque_route }
    }

    pub fn subject(&self) -> SubjectInfo {
        self.subject.lock().clone()
    }

    fn set_event(&self, kind: EventKind, value: bool) {
        self.events.get(kind).assign(value);
        info!("[Remote] {} <- {}", kind.name(), value);
        // acknowledgements are best-effort
        for side in Side::BOTH {
            let _ = self
                .router
                .send(REMOTE_ADDRESS, side.address(), MessageBody::Event(EventMsg { kind, value }));
        }
    }

    fn set_torques(&self, left: f64, right: f64) -> Result<(), RemoteError> {
        for (side, torque) in [(Side::Left, left), (Side::Right, right)] {
            if !torque.is_finite() || torque < 0.0 {
                return Err(RemoteError::InvalidField {
                    thread: side.address().to_string(),
                    field: format!("peak_torque={torque}"),
                });
            }
        }
        for (side, torque_nm) in [(Side::Left, left), (Side::Right, right)] {
            let to = match self.torque_route {
                TorqueRoute::Direct => side.address(),
                TorqueRoute::ViaGait => GAIT_ADDRESS,
            };
            self.router
                .send(REMOTE_ADDRESS, to, MessageBody::PeakTorque(PeakTorqueMsg { side, torque_nm }))?;
        }
        debug!("[Remote] peak torque left={:.1} right={:.1}", left, right);
        Ok(())
    }

    fn read_field(&self, thread: &str, field: &str) -> Result<Value, RemoteError> {
        let latest = self
            .board
            .get(thread)
            .ok_or_else(|| RemoteError::UnknownAddressee(thread.to_string()))?;
        let invalid = || RemoteError::InvalidField { thread: thread.to_string(), field: field.to_string() };
        let Some(snap) = latest else {
            return Ok(Value::Null);
        };
        let Value::Object(fields) = serde_json::to_value(snap).map_err(|_| invalid())? else {
            return Err(invalid());
        };
        fields.get(field).cloned().ok_or_else(invalid)
    }

    pub fn handle(&self, req: Request) -> Result<Reply, RemoteError> {
        if !self.events.running() {
            return Err(RemoteError::ServiceDown);
        }
        match req {
            Request::SubjectInfo { subject_id, trial_type, trial_condition, description, use_backup } => {
                *self.subject.lock() =
                    SubjectInfo { subject_id, trial_type, trial_condition, description, use_backup };
                Ok(Reply::Ack)
            }
            Request::GetSubjectInfo => Ok(Reply::SubjectInfo(self.subject())),
            Request::Pause { value } => {
                self.set_event(EventKind::Pause, value);
                Ok(Reply::Ack)
            }
            Request::Quit { value } => {
                self.set_event(EventKind::Quit, value);
                Ok(Reply::Ack)
            }
            Request::Log { value } => {
                self.set_event(EventKind::Log, value);
                Ok(Reply::Ack)
            }
            Request::Torques { left, right } => self.set_torques(left, right).map(|_| Reply::Ack),
            Request::RetVal { thread, field } => self.read_field(&thread, &field).map(Reply::Value),
        }
    }

    /// Wire-level entry point: JSON body in, HTTP status and JSON body out.
    pub fn handle_json(&self, body: &str) -> (u16, Value) {
        match parse_request(body).and_then(|req| self.handle(req)) {
            Ok(reply) => (200, json!({ "ok": reply.into_json() })),
            Err(e) => {
                let status = match e {
                    RemoteError::ServiceDown => 503,
                    RemoteError::UnknownAddressee(_) => 404,
                    _ => 400,
                };
                (status, json!({ "error": { "code": e.code(), "message": e.to_string() } }))
            }
        }
    }
}

/// HTTP transport. Polls with a timeout so it notices `quit` being cleared.
pub struct RemoteServer {
    server: Server,
    control: RemoteControl,
    events: Arc<Events>,
    poll: Duration,
    counters: RemoteCounters,
}

impl RemoteServer {
    pub fn bind(addr: &str, control: RemoteControl, events: Arc<Events>, poll_ms: u64) -> Result<Self, ExoError> {
        let server = Server::http(addr).map_err(|e| ExoError::Remote(format!("cannot bind {addr}: {e}")))?;
        Ok(Self {
            server,
            control,
            events,
            poll: Duration::from_millis(poll_ms.max(1)),
            counters: RemoteCounters::default(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    fn respond(&mut self, mut request: tiny_http::Request) {
        self.counters.requests += 1;
        let (status, body) = if *request.method() != Method::Post || request.url() != "/rpc" {
            let e = RemoteError::BadRequest(format!("{} {} (expected POST /rpc)", request.method(), request.url()));
            (404, json!({ "error": { "code": e.code(), "message": e.to_string() } }))
        } else {
            let mut text = String::new();
            match request.as_reader().read_to_string(&mut text) {
                Ok(_) => self.control.handle_json(&text),
                Err(e) => {
                    let e = RemoteError::BadRequest(e.to_string());
                    (400, json!({ "error": { "code": e.code(), "message": e.to_string() } }))
                }
            }
        };
        if status != 200 {
            self.counters.rejected += 1;
        }

        let mut response = Response::from_string(body.to_string()).with_status_code(status);
        if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
            response = response.with_header(h);
        }
        if let Err(e) = request.respond(response) {
            self.counters.transport_errors += 1;
            warn!("[Remote] reply failed: {}", e);
        }
    }

    pub fn run(mut self) -> RemoteCounters {
        info!("[Remote] listening on {:?}", self.local_addr());
        while self.events.running() {
            match self.server.recv_timeout(self.poll) {
                Ok(Some(request)) => self.respond(request),
                Ok(None) => {}
                Err(e) => {
                    self.counters.transport_errors += 1;
                    warn!("[Remote] receive failed: {}", e);
                }
            }
        }
        // anything already queued is told the service is going away
        while let Ok(Some(request)) = self.server.try_recv() {
            self.respond(request);
        }
        info!(
            "[Remote] closed after {} requests ({} rejected)",
            self.counters.requests, self.counters.rejected
        );
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::router::Inbox;
    use crate::utils::recorder::{ActuatorSnapshot, Snapshot};
    use std::io::Write;
    use std::net::TcpStream;

    struct Rig {
        control: RemoteControl,
        events: Arc<Events>,
        left: Inbox,
        right: Inbox,
        gait: Inbox,
        board: SnapshotBoard,
    }

    fn rig(route: TorqueRoute) -> Rig {
        let router = Arc::new(MessageRouter::new());
        let (left, right, gait) = (Inbox::default(), Inbox::default(), Inbox::default());
        router.register("exo_left", left.clone()).unwrap();
        router.register("exo_right", right.clone()).unwrap();
        router.register(GAIT_ADDRESS, gait.clone()).unwrap();
        let events = Events::new();
        events.arm();
        let board = SnapshotBoard::new();
        board.register("exo_left");
        let control = RemoteControl::new(router, events.clone(), board.clone(), SubjectInfo::default(), route);
        Rig { control, events, left, right, gait, board }
    }

    fn peak_torques(inbox: &Inbox) -> Vec<(Side, f64)> {
        inbox
            .drain()
            .into_iter()
            .filter_map(|m| match m.body {
                MessageBody::PeakTorque(p) => Some((p.side, p.torque_nm)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn events_follow_requests() {
        let r = rig(TorqueRoute::Direct);
        r.control.handle(Request::Pause { value: true }).unwrap();
        r.control.handle(Request::Log { value: true }).unwrap();
        assert!(r.events.pause.is_set());
        assert!(r.events.log.is_set());
        r.control.handle(Request::Pause { value: false }).unwrap();
        assert!(!r.events.pause.is_set());
        // every change is acknowledged to both loops
        assert_eq!(r.left.len(), 3);
        assert_eq!(r.right.len(), 3);
    }

    #[test]
    fn torques_go_to_each_side() {
        let r = rig(TorqueRoute::Direct);
        r.control.handle(Request::Torques { left: 20.0, right: 18.5 }).unwrap();
        assert_eq!(peak_torques(&r.left), vec![(Side::Left, 20.0)]);
        assert_eq!(peak_torques(&r.right), vec![(Side::Right, 18.5)]);
        assert!(r.gait.is_empty());
    }

    #[test]
    fn coupled_torques_go_through_gait() {
        let r = rig(TorqueRoute::ViaGait);
        r.control.handle(Request::Torques { left: 10.0, right: 12.0 }).unwrap();
        assert_eq!(peak_torques(&r.gait), vec![(Side::Left, 10.0), (Side::Right, 12.0)]);
        assert!(r.left.is_empty());
    }

    #[test]
    fn negative_torque_is_invalid_and_nothing_is_sent() {
        let r = rig(TorqueRoute::Direct);
        let err = r.control.handle(Request::Torques { left: 5.0, right: -1.0 }).unwrap_err();
        assert_eq!(err.code(), "invalid_field");
        assert!(r.left.is_empty());
    }

    #[test]
    fn ret_val_reads_latest_snapshot() {
        let r = rig(TorqueRoute::Direct);
        let field = |thread: &str, field: &str| {
            r.control.handle(Request::RetVal { thread: thread.into(), field: field.into() })
        };
        assert_eq!(field("exo_left", "n"), Ok(Reply::Value(Value::Null)));

        let snap = ActuatorSnapshot { n: 17.5, mode: "active", ..Default::default() };
        r.board.publish("exo_left", Snapshot::Actuator(snap));
        assert_eq!(field("exo_left", "n"), Ok(Reply::Value(json!(17.5))));
        assert_eq!(field("exo_left", "mode"), Ok(Reply::Value(json!("active"))));
        assert!(matches!(field("exo_left", "nope"), Err(RemoteError::InvalidField { .. })));
        assert!(matches!(field("exo_middle", "n"), Err(RemoteError::UnknownAddressee(_))));
    }

    #[test]
    fn subject_info_round_trips() {
        let r = rig(TorqueRoute::Direct);
        let req = parse_request(
            r#"{"method":"subject_info","subject_id":"S07","trial_type":"walk","description":"1.25 m/s"}"#,
        )
        .unwrap();
        r.control.handle(req).unwrap();
        match r.control.handle(Request::GetSubjectInfo).unwrap() {
            Reply::SubjectInfo(info) => {
                assert_eq!(info.subject_id, "S07");
                assert_eq!(info.description, "1.25 m/s");
                assert!(!info.use_backup);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_method_and_bad_body_are_typed() {
        assert_eq!(parse_request(r#"{"method":"dance"}"#), Err(RemoteError::UnknownMethod("dance".into())));
        assert!(matches!(parse_request(r#"{"method":"torques","left":1}"#), Err(RemoteError::BadRequest(_))));
        assert!(matches!(parse_request("not json"), Err(RemoteError::BadRequest(_))));
    }

    #[test]
    fn quit_stops_service() {
        let r = rig(TorqueRoute::Direct);
        r.control.handle(Request::Quit { value: false }).unwrap();
        assert!(!r.events.running());
        assert_eq!(r.control.handle(Request::Pause { value: true }), Err(RemoteError::ServiceDown));
        let (status, body) = r.control.handle_json(r#"{"method":"log","value":true}"#);
        assert_eq!(status, 503);
        assert_eq!(body["error"]["code"], "service_down");
    }

    fn post(addr: SocketAddr, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        write!(
            stream,
            "POST /rpc HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
        .unwrap();
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[test]
    fn http_round_trip() {
        let r = rig(TorqueRoute::Direct);
        let server = RemoteServer::bind("127.0.0.1:0", r.control.clone(), r.events.clone(), 10).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = std::thread::spawn(move || server.run());

        let reply = post(addr, r#"{"method":"pause","value":true}"#);
        assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
        assert!(reply.contains(r#"{"ok":true}"#), "{reply}");
        assert!(r.events.pause.is_set());

        let reply = post(addr, r#"{"method":"ret_val","thread":"exo_right","field":"n"}"#);
        assert!(reply.contains("unknown_addressee"), "{reply}");

        post(addr, r#"{"method":"quit","value":false}"#);
        let counters = handle.join().unwrap();
        assert_eq!(counters.requests, 3);
        assert_eq!(counters.rejected, 1);
    }
}
