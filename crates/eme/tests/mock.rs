use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use bytes::Bytes;
use iori_eme::{
    error::{EmeError, EmeResult},
    key_system::{
        InitDataType, KeyContainer, KeySession, KeySystem, KeySystemAccess,
        KeySystemConfiguration, SessionType,
    },
    license::LicenseService,
    mp4::{PsshBox, COMMON_SYSTEM_ID},
    pipeline::{BufferHandle, PipelineEvent, PipelineEvents, PipelineNotifier, PlaybackPipeline},
};
use tokio::sync::{mpsc, Notify};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("iori_eme=debug,wiremock=info")
        .with_test_writer()
        .try_init();
}

/// Ordered log of calls made on the mock collaborators.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push<S: Into<String>>(&self, entry: S) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }
}

/// Records every call and raises `ReadyForMore` after each append.
pub struct RecordingPipeline {
    journal: Journal,
    notifier: PipelineNotifier,
}

impl RecordingPipeline {
    pub fn new(journal: Journal) -> (Self, PipelineEvents) {
        let (notifier, events) = mpsc::unbounded_channel();
        (Self { journal, notifier }, events)
    }
}

impl PlaybackPipeline for RecordingPipeline {
    async fn open_for_writing(&self, mime_type: &str) -> EmeResult<BufferHandle> {
        self.journal.push("open");
        Ok(BufferHandle::new(0, mime_type))
    }

    async fn append(&self, _buffer: &BufferHandle, data: Bytes) -> EmeResult<()> {
        self.journal
            .push(format!("append {}", String::from_utf8_lossy(&data)));
        _ = self.notifier.send(PipelineEvent::ReadyForMore);
        Ok(())
    }

    async fn end_of_stream(&self) -> EmeResult<()> {
        self.journal.push("end_of_stream");
        Ok(())
    }

    async fn bind_key_container<C: KeyContainer>(&self, _container: Arc<C>) -> EmeResult<()> {
        self.journal.push("bind");
        Ok(())
    }
}

/// Accepts one append and then closes its notification channel without asking for more.
pub struct SilentPipeline {
    journal: Journal,
    notifier: Mutex<Option<PipelineNotifier>>,
}

impl SilentPipeline {
    pub fn new(journal: Journal) -> (Self, PipelineEvents) {
        let (notifier, events) = mpsc::unbounded_channel();
        let pipeline = Self {
            journal,
            notifier: Mutex::new(Some(notifier)),
        };
        (pipeline, events)
    }
}

impl PlaybackPipeline for SilentPipeline {
    async fn open_for_writing(&self, mime_type: &str) -> EmeResult<BufferHandle> {
        self.journal.push("open");
        Ok(BufferHandle::new(0, mime_type))
    }

    async fn append(&self, _buffer: &BufferHandle, data: Bytes) -> EmeResult<()> {
        self.journal
            .push(format!("append {}", String::from_utf8_lossy(&data)));
        self.notifier.lock().unwrap().take();
        Ok(())
    }

    async fn end_of_stream(&self) -> EmeResult<()> {
        self.journal.push("end_of_stream");
        Ok(())
    }

    async fn bind_key_container<C: KeyContainer>(&self, _container: Arc<C>) -> EmeResult<()> {
        self.journal.push("bind");
        Ok(())
    }
}

/// Forwards `ReadyForMore` notifications to a feeder ready channel.
pub fn forward_ready(mut events: PipelineEvents) -> mpsc::UnboundedReceiver<()> {
    let (ready, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event == PipelineEvent::ReadyForMore && ready.send(()).is_err() {
                break;
            }
        }
    });
    receiver
}

/// A key system whose negotiation can be held back until the test opens the gate.
pub struct MockKeySystem {
    pub journal: Journal,
    pub gate: Option<Arc<Notify>>,
    pub fail_negotiation: bool,
}

impl MockKeySystem {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            gate: None,
            fail_negotiation: false,
        }
    }

    pub fn gated(journal: Journal, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(journal)
        }
    }

    pub fn failing(journal: Journal) -> Self {
        Self {
            fail_negotiation: true,
            ..Self::new(journal)
        }
    }
}

impl KeySystem for MockKeySystem {
    type Access = MockAccess;

    fn name(&self) -> &str {
        "org.example.mock"
    }

    async fn negotiate(&self, config: &KeySystemConfiguration) -> EmeResult<MockAccess> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.journal.push("negotiate");
        if self.fail_negotiation {
            return Err(EmeError::NegotiationFailure(
                "no supported configuration".to_string(),
            ));
        }

        Ok(MockAccess {
            journal: self.journal.clone(),
            configuration: config.clone(),
        })
    }
}

pub struct MockAccess {
    journal: Journal,
    configuration: KeySystemConfiguration,
}

impl KeySystemAccess for MockAccess {
    type Container = MockContainer;

    fn configuration(&self) -> &KeySystemConfiguration {
        &self.configuration
    }

    async fn create_container(&self) -> EmeResult<MockContainer> {
        self.journal.push("create_container");
        Ok(MockContainer {
            journal: self.journal.clone(),
            sessions: AtomicU32::new(0),
        })
    }
}

pub struct MockContainer {
    journal: Journal,
    sessions: AtomicU32,
}

impl KeyContainer for MockContainer {
    type Session = MockSession;

    fn create_session(&self, _session_type: SessionType) -> EmeResult<MockSession> {
        self.journal.push("create_session");
        let id = self.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(MockSession {
            session_id: format!("mock-{id}"),
            journal: self.journal.clone(),
            challenge: None,
        })
    }
}

/// Echoes the init data back as its license challenge.
///
/// Init data starting with `fail-generate` fails the request, `no-challenge` produces no
/// message and `fail-update` makes the license update fail.
pub struct MockSession {
    session_id: String,
    journal: Journal,
    challenge: Option<Bytes>,
}

impl KeySession for MockSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn generate_request(
        &mut self,
        _init_data_type: InitDataType,
        init_data: &[u8],
    ) -> EmeResult<()> {
        self.journal
            .push(format!("generate_request {}", String::from_utf8_lossy(init_data)));
        if init_data.starts_with(b"fail-generate") {
            return Err(EmeError::InvalidInitData("unrecognized init data".to_string()));
        }
        if !init_data.starts_with(b"no-challenge") {
            self.challenge = Some(Bytes::copy_from_slice(init_data));
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Bytes> {
        self.challenge.take()
    }

    async fn update(&mut self, response: &[u8]) -> EmeResult<()> {
        self.journal
            .push(format!("update {}", String::from_utf8_lossy(response)));
        if response.ends_with(b"fail-update") {
            return Err(EmeError::InvalidInitData("license does not match".to_string()));
        }
        Ok(())
    }
}

/// Answers `license:<challenge>`, refuses challenges starting with `bad` and returns an
/// unreadable response for challenges starting with `garbled`.
pub struct EchoLicense;

impl LicenseService for EchoLicense {
    async fn acquire(&self, challenge: Bytes) -> EmeResult<Bytes> {
        if challenge.starts_with(b"bad") {
            return Err(EmeError::LicenseFetchFailure(
                iori_eme::FetchError::HttpError(reqwest::StatusCode::FORBIDDEN),
            ));
        }
        if challenge.starts_with(b"garbled") {
            return Err(EmeError::LicenseParseFailure(
                "response body is not a license".to_string(),
            ));
        }
        let mut license = b"license:".to_vec();
        license.extend_from_slice(&challenge);
        Ok(Bytes::from(license))
    }
}

pub fn mp4_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut result = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    result.extend_from_slice(box_type);
    result.extend_from_slice(payload);
    result
}

/// An initialization segment announcing `kid` through a common `pssh` box.
pub fn init_segment(kid: [u8; 16]) -> Vec<u8> {
    let pssh = PsshBox {
        version: 1,
        system_id: COMMON_SYSTEM_ID,
        key_ids: vec![kid],
        data: Vec::new(),
    };
    let mut segment = mp4_box(b"ftyp", b"iso6\0\0\0\0");
    segment.extend(mp4_box(b"moov", &pssh.to_bytes()));
    segment
}

pub fn cenc_init_data(kid: [u8; 16]) -> Bytes {
    let pssh = PsshBox {
        version: 1,
        system_id: COMMON_SYSTEM_ID,
        key_ids: vec![kid],
        data: Vec::new(),
    };
    Bytes::from(pssh.to_bytes())
}
