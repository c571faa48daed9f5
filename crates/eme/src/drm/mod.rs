//! Key system initialization and per-session license exchange.
//!
//! ```text
//!  KeySystem ──negotiate──► Access ──create──► Container ──bind──► Pipeline
//!                                                  │
//!                                                  ▼ latch
//!  EncryptedContentDetected ──► create_session ──► generate_request ──► challenge
//!                                                                          │
//!                              update ◄── license ◄── LicenseService ◄─────┘
//! ```

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::task::JoinHandle;

mod latch;
mod registry;

pub use latch::{key_container_latch, KeyContainerBinder, KeyContainerLatch};
pub use registry::{SessionId, SessionRecord, SessionRegistry, SessionState};

use crate::{
    error::{EmeError, EmeResult, ReportExt, Stage},
    key_system::{
        InitDataType, KeyContainer, KeySession, KeySystem, KeySystemAccess,
        KeySystemConfiguration, SessionType,
    },
    license::LicenseService,
    pipeline::PlaybackPipeline,
};

/// Negotiates `key_system`, creates its key container and binds it to `pipeline`.
///
/// The outcome is published through `binder`, so waiting sessions observe failures as well.
pub async fn bind_key_system<K, P>(
    key_system: K,
    config: KeySystemConfiguration,
    pipeline: Arc<P>,
    binder: KeyContainerBinder<<K::Access as KeySystemAccess>::Container>,
) -> EmeResult<()>
where
    K: KeySystem,
    P: PlaybackPipeline,
{
    let result = async {
        let access = key_system
            .negotiate(&config)
            .await
            .report(Stage::ObtainKeySystemAccess)?;
        tracing::info!("drm: media key system access provided: {}", key_system.name());
        tracing::debug!("drm: negotiated configuration {:?}", access.configuration());

        let container = access
            .create_container()
            .await
            .report(Stage::CreateKeyContainer)?;
        let container = Arc::new(container);
        tracing::info!("drm: media keys created");

        pipeline
            .bind_key_container(container.clone())
            .await
            .report(Stage::BindKeyContainer)?;
        tracing::info!("drm: media keys set");
        Ok::<_, EmeError>(container)
    }
    .await;

    match result {
        Ok(container) => {
            binder.bind(container);
            Ok(())
        }
        Err(e) => {
            binder.fail(&e);
            Err(e)
        }
    }
}

pub struct DrmCoordinator<C, L>
where
    C: KeyContainer,
{
    latch: KeyContainerLatch<C>,
    license: L,
    session_type: SessionType,

    registry: SessionRegistry,
    // sessions that reached `Updated` stay alive until closed
    sessions: std::sync::Mutex<HashMap<SessionId, C::Session>>,
}

impl<C, L> DrmCoordinator<C, L>
where
    C: KeyContainer,
    L: LicenseService,
{
    pub fn new(latch: KeyContainerLatch<C>, license: L) -> Self {
        Self {
            latch,
            license,
            session_type: SessionType::Temporary,
            registry: SessionRegistry::new(),
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Creates the coordinator and starts key system initialization in the background.
    ///
    /// Encrypted content handled before initialization resolves waits for the container.
    pub fn initialize<K, P>(
        key_system: K,
        config: KeySystemConfiguration,
        pipeline: Arc<P>,
        license: L,
    ) -> (Self, JoinHandle<EmeResult<()>>)
    where
        K: KeySystem,
        K::Access: KeySystemAccess<Container = C>,
        P: PlaybackPipeline,
    {
        let (binder, latch) = key_container_latch();
        let handle = tokio::spawn(bind_key_system(key_system, config, pipeline, binder));
        (Self::new(latch, license), handle)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn key_container(&self) -> Option<Arc<C>> {
        self.latch.get()
    }

    /// Runs one complete license exchange for an encrypted-content notification.
    pub async fn handle_encrypted(
        &self,
        init_data_type: InitDataType,
        init_data: Bytes,
    ) -> EmeResult<SessionId> {
        let container = self.latch.wait().await.report(Stage::BindKeyContainer)?;

        let mut session = container
            .create_session(self.session_type)
            .report(Stage::CreateSession)?;
        let id = self.registry.register(session.session_id());
        tracing::info!("drm: session {id} created ({})", session.session_id());

        let mut stage = Stage::GenerateRequest;
        let result = async {
            session.generate_request(init_data_type, &init_data).await?;
            self.registry.transition(id, SessionState::RequestGenerated);
            tracing::info!("drm: session {id} generated request");

            stage = Stage::AwaitChallenge;
            let challenge = session.next_message().await.ok_or_else(|| {
                EmeError::SessionRequestFailure("no license challenge was produced".to_string())
            })?;
            self.registry.transition(id, SessionState::LicenseRequested);
            tracing::debug!("drm: session {id} challenge of {} bytes", challenge.len());

            stage = Stage::RequestLicense;
            let license = match self.license.acquire(challenge).await {
                Ok(license) => license,
                Err(e) => {
                    if matches!(e, EmeError::LicenseParseFailure(_)) {
                        stage = Stage::ReadLicense;
                    }
                    return Err(e);
                }
            };
            self.registry.transition(id, SessionState::LicenseReceived);

            stage = Stage::UpdateSession;
            tracing::info!("drm: updating session {id}");
            session.update(&license).await?;
            self.registry.transition(id, SessionState::Updated);
            tracing::info!("drm: session {id} updated");
            Ok::<(), EmeError>(())
        }
        .await;

        match result.report(stage) {
            Ok(()) => {
                self.lock_sessions().insert(id, session);
                Ok(id)
            }
            Err(e) => {
                self.registry.fail(id, stage, &e);
                Err(e)
            }
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, C::Session>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drops a live session and forgets its record.
    pub fn close_session(&self, id: SessionId) -> bool {
        let live = self.lock_sessions().remove(&id).is_some();
        let known = self.registry.remove(id).is_some();
        live || known
    }

    pub fn live_sessions(&self) -> usize {
        self.lock_sessions().len()
    }
}
