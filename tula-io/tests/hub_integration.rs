//! Hub over real loopback sockets: a server fed by a mock scale, viewers
//! joining as `ClientHub`s or as raw protocol speakers.

use approx::assert_relative_eq;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tula_io::core::types::{LinkState, Measurement, Unit};
use tula_io::hub::{PasswordVerifier, SessionState};
use tula_io::streaming::{ClientMessage, FrameReader, Serializer, ServerMessage, WireFormat};
use tula_io::transport::{MockConnector, MockTransport};
use tula_io::{
    AuthError, ClientHub, Error, HubConfig, NetMode, ReadingStream, ScaleFormat, ServerHub,
    StreamConfig, TareConfiguration, WeightSource,
};

const PASSWORD: &str = "secret";
const WAIT: Duration = Duration::from_secs(5);

fn hub_config(bind_address: &str) -> HubConfig {
    HubConfig {
        bind_address: bind_address.to_string(),
        session_timeout: Duration::from_millis(800),
        auth_timeout: Duration::from_millis(500),
        ping_interval: Duration::from_millis(100),
        stale_after: Duration::from_secs(2),
        reconnect_initial: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        ..HubConfig::default()
    }
}

fn start_hub(transport: &MockTransport, bind_address: &str) -> ServerHub {
    start_hub_with(transport, hub_config(bind_address))
}

fn start_hub_with(transport: &MockTransport, config: HubConfig) -> ServerHub {
    let stream = ReadingStream::open(
        MockConnector::with(transport),
        ScaleFormat::El05,
        StreamConfig::default(),
    )
    .unwrap();
    ServerHub::start(stream, config, Arc::new(PasswordVerifier::new(PASSWORD))).unwrap()
}

fn feed(transport: &MockTransport, kg: f64) {
    transport.inject_read(&ScaleFormat::El05.encode(&Measurement::new(kg, Unit::Kg, true), 1));
}

fn join(hub: &ServerHub) -> ClientHub {
    ClientHub::connect(
        &hub.local_addr().to_string(),
        Some(PASSWORD.to_string()),
        hub_config("127.0.0.1:0"),
    )
    .unwrap()
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn shows(source: &impl WeightSource, kg: f64) -> bool {
    source
        .current_reading()
        .reading
        .value_kg()
        .is_some_and(|v| (v - kg).abs() < 1e-9)
}

/// A viewer speaking the wire protocol by hand
struct RawViewer {
    stream: TcpStream,
    frames: FrameReader,
    serializer: Serializer,
}

impl RawViewer {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        Self {
            stream,
            frames: FrameReader::new(),
            serializer: Serializer::new(WireFormat::Json),
        }
    }

    fn send(&mut self, msg: &ClientMessage) {
        self.serializer.write_message(&mut self.stream, msg).unwrap();
    }

    /// Next message that is not a reading update
    fn next_control(&mut self) -> ServerMessage {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            match self
                .frames
                .read_message::<_, ServerMessage>(&mut self.stream, &self.serializer)
                .unwrap()
            {
                Some(ServerMessage::Update { .. }) | None => continue,
                Some(other) => return other,
            }
        }
        panic!("no control message within {:?}", WAIT);
    }

    fn hello(&mut self, credential: Option<&str>) -> ServerMessage {
        self.send(&ClientMessage::Hello {
            client_name: "raw".to_string(),
            credential: credential.map(str::to_string),
        });
        self.next_control()
    }
}

#[test]
fn test_two_viewers_see_same_increasing_versions() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");
    feed(&scale, 20.0);
    wait_for("hub to show 20 kg", || shows(&hub, 20.0));

    let a = join(&hub);
    let b = join(&hub);
    assert_ne!(a.session_id(), b.session_id());
    wait_for("viewers to see 20 kg", || shows(&a, 20.0) && shows(&b, 20.0));

    let mut sub_a = a.subscribe();
    let mut sub_b = b.subscribe();
    for kg in [21.0, 22.0, 23.0] {
        feed(&scale, kg);
        std::thread::sleep(Duration::from_millis(30));
    }

    for sub in [&mut sub_a, &mut sub_b] {
        let mut last = sub.last_version();
        loop {
            let update = sub.recv_timeout(WAIT).unwrap();
            assert!(update.version > last, "version went from {} to {}", last, update.version);
            last = update.version;
            if update.reading.value_kg() == Some(23.0) {
                assert_eq!(update.link, LinkState::Connected);
                break;
            }
        }
    }

    let sessions = hub.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.state == SessionState::Authenticated));
    assert!(sessions.iter().all(|s| s.client_name.as_deref() == Some("viewer")));
}

#[test]
fn test_wrong_password_rejected_without_disturbing_others() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");
    let good = join(&hub);

    let result = ClientHub::connect(
        &hub.local_addr().to_string(),
        Some("guess".to_string()),
        hub_config("127.0.0.1:0"),
    );
    match result {
        Err(Error::Auth(AuthError::Rejected { reason })) => assert!(reason.contains("password")),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("wrong password accepted"),
    }

    feed(&scale, 7.5);
    wait_for("good viewer to see 7.5 kg", || shows(&good, 7.5));
    assert!(good.is_connected());
    wait_for("rejected session to leave the registry", || hub.sessions().len() == 1);
}

#[test]
fn test_missing_hello_times_out() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");

    let mut raw = RawViewer::connect(hub.local_addr());
    match raw.next_control() {
        ServerMessage::Rejected { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected rejection, got {}", other.kind()),
    }
    wait_for("session to be dropped", || hub.sessions().is_empty());
}

#[test]
fn test_viewer_cannot_publish() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");
    feed(&scale, 10.0);
    wait_for("hub to show 10 kg", || shows(&hub, 10.0));
    let before = hub.current_reading().version;

    let mut raw = RawViewer::connect(hub.local_addr());
    match raw.hello(Some(PASSWORD)) {
        ServerMessage::Welcome { snapshot, .. } => {
            assert_relative_eq!(snapshot.reading.value_kg().unwrap(), 10.0)
        }
        other => panic!("expected welcome, got {}", other.kind()),
    }

    raw.send(&ClientMessage::Publish {
        reading: tula_io::WeightReading::new(Measurement::new(999.0, Unit::Kg, true)),
    });
    assert!(matches!(raw.next_control(), ServerMessage::Refused { .. }));

    // Still a live session after the refusal
    raw.send(&ClientMessage::Ping { nonce: 9 });
    assert!(matches!(raw.next_control(), ServerMessage::Pong { nonce: 9 }));

    assert!(shows(&hub, 10.0));
    assert_eq!(hub.current_reading().version, before);
}

#[test]
fn test_idle_viewer_is_evicted() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");

    let mut raw = RawViewer::connect(hub.local_addr());
    assert!(matches!(raw.hello(Some(PASSWORD)), ServerMessage::Welcome { .. }));
    wait_for("session to register", || hub.sessions().len() == 1);

    match raw.next_control() {
        ServerMessage::Evicted { reason } => assert_eq!(reason, "idle timeout"),
        other => panic!("expected eviction, got {}", other.kind()),
    }
    wait_for("session to be dropped", || hub.sessions().is_empty());
}

#[test]
fn test_pinging_client_is_not_evicted() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");
    let viewer = join(&hub);

    // Several session timeouts with no scale traffic
    std::thread::sleep(Duration::from_millis(2000));
    assert!(viewer.is_connected());
    assert_eq!(hub.sessions().len(), 1);
}

#[test]
fn test_viewer_survives_server_restart() {
    let scale = MockTransport::new();
    let mut hub = start_hub(&scale, "127.0.0.1:0");
    let addr = hub.local_addr();
    feed(&scale, 30.0);
    wait_for("hub to show 30 kg", || shows(&hub, 30.0));

    let viewer = join(&hub);
    wait_for("viewer to see 30 kg", || shows(&viewer, 30.0));
    let first_session = viewer.session_id();
    let mut updates = viewer.subscribe();

    hub.shutdown();
    wait_for("viewer to notice", || !viewer.is_connected());
    let lost = viewer.current_reading();
    assert!(lost.reading.is_stale());
    assert_eq!(lost.link, LinkState::Disconnected);

    let scale = MockTransport::new();
    let hub = start_hub(&scale, &addr.to_string());
    feed(&scale, 31.0);
    wait_for("viewer to rejoin and see 31 kg", || shows(&viewer, 31.0));
    assert!(viewer.is_connected());
    assert_eq!(viewer.session_id(), 1);
    assert_eq!(first_session, 1);

    // The restarted server counts from scratch; the mirror never goes back
    let mut last = updates.last_version();
    while let Ok(update) = updates.try_recv() {
        assert!(update.version > last);
        last = update.version;
    }
    assert!(viewer.current_reading().version > lost.version);
    drop(hub);
}

#[test]
fn test_net_weight_through_client() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");
    let viewer = join(&hub);
    feed(&scale, 40.0);
    wait_for("viewer to see 40 kg", || shows(&viewer, 40.0));

    let tare = TareConfiguration {
        boxes_count: 40,
        box_weight: 0.35,
        trays_count: 4,
        tray_weight: 1.7,
        pallet_weight: 5.0,
    };
    let net = viewer.net_weight(&tare, NetMode::Strict).unwrap();
    assert_relative_eq!(net.tare_kg, 25.8, epsilon = 1e-9);
    assert_relative_eq!(net.value, 14.2, epsilon = 1e-9);
    assert!(!net.clamped);
}

#[test]
fn test_link_state_follows_scale() {
    let scale = MockTransport::new();
    let hub = start_hub(&scale, "127.0.0.1:0");

    feed(&scale, 15.0);
    wait_for("hub to show 15 kg", || shows(&hub, 15.0));
    let live = hub.current_reading();
    assert_eq!(live.link, LinkState::Connected);
    assert!(live.is_live());

    // Enough junk in a row to trip the degraded threshold
    let junk = b"M??????\r".repeat(StreamConfig::default().degraded_after as usize);
    scale.inject_read(&junk);
    wait_for("hub to flag the line", || {
        hub.current_reading().link == LinkState::Degraded
    });
    let noisy = hub.current_reading();
    assert!(noisy.version > live.version);
    assert_eq!(noisy.reading, live.reading);

    scale.disconnect();
    wait_for("hub to report the scale gone", || {
        hub.current_reading().link == LinkState::Disconnected
    });
    let gone = hub.current_reading();
    assert!(gone.reading.is_stale());
    assert!(!gone.is_live());
}

#[test]
fn test_silent_server_reads_as_stale() {
    let scale = MockTransport::new();
    let hub = start_hub_with(
        &scale,
        HubConfig {
            session_timeout: Duration::from_secs(10),
            ..hub_config("127.0.0.1:0")
        },
    );
    feed(&scale, 20.0);
    wait_for("hub to show 20 kg", || shows(&hub, 20.0));

    let viewer = ClientHub::connect(
        &hub.local_addr().to_string(),
        Some(PASSWORD.to_string()),
        HubConfig {
            stale_after: Duration::from_millis(300),
            ping_interval: Duration::from_secs(5),
            ..hub_config("127.0.0.1:0")
        },
    )
    .unwrap();
    assert!(viewer.current_reading().is_live());

    // No scale frames and no pings: nothing arrives from the server
    std::thread::sleep(Duration::from_millis(600));
    let silent = viewer.current_reading();
    assert!(silent.reading.is_stale());
    assert!(!silent.is_live());
    assert!(viewer.is_connected());

    feed(&scale, 21.0);
    wait_for("viewer to see 21 kg", || shows(&viewer, 21.0));
    assert!(viewer.current_reading().is_live());
}
