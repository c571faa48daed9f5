use std::sync::Arc;

use tokio::{
    sync::mpsc,
    task::{JoinError, JoinSet},
};

use crate::{
    drm::{DrmCoordinator, SessionId, SessionRegistry},
    error::{EmeError, EmeResult},
    feeder::{FeederState, SegmentFeeder},
    fetch::SegmentFetcher,
    key_system::{KeySystem, KeySystemAccess, KeySystemConfiguration},
    license::LicenseService,
    pipeline::{PipelineEvent, PipelineEvents, PlaybackPipeline},
};

type Container<K> = <<K as KeySystem>::Access as KeySystemAccess>::Container;

/// Outcome of a [`Player::play`] run.
#[derive(Debug)]
pub struct PlaybackSummary {
    pub segments_appended: usize,
    pub end_of_stream: bool,
    pub feeder_error: Option<EmeError>,
    pub key_system_error: Option<EmeError>,
    /// One entry per encrypted content notification, in completion order
    pub sessions: Vec<EmeResult<SessionId>>,
    pub registry: SessionRegistry,
}

impl PlaybackSummary {
    pub fn is_complete(&self) -> bool {
        self.end_of_stream
            && self.feeder_error.is_none()
            && self.key_system_error.is_none()
            && self.sessions.iter().all(Result::is_ok)
    }
}

/// Drives the segment feeder and the DRM coordinator over one pipeline.
pub struct Player<P, F, K, L> {
    pipeline: Arc<P>,
    events: PipelineEvents,
    feeder: SegmentFeeder<F>,

    key_system: K,
    configuration: KeySystemConfiguration,
    license: L,
}

impl<P, F, K, L> Player<P, F, K, L>
where
    P: PlaybackPipeline,
    F: SegmentFetcher + Send + Sync + 'static,
    K: KeySystem,
    L: LicenseService,
{
    pub fn new(
        pipeline: Arc<P>,
        events: PipelineEvents,
        feeder: SegmentFeeder<F>,
        key_system: K,
        configuration: KeySystemConfiguration,
        license: L,
    ) -> Self {
        Self {
            pipeline,
            events,
            feeder,
            key_system,
            configuration,
            license,
        }
    }

    /// Plays until the feeder terminates and every license exchange has finished.
    pub async fn play(self) -> PlaybackSummary {
        let Self {
            pipeline,
            mut events,
            mut feeder,
            key_system,
            configuration,
            license,
        } = self;

        let (coordinator, initialization) = DrmCoordinator::<Container<K>, L>::initialize(
            key_system,
            configuration,
            pipeline.clone(),
            license,
        );
        let coordinator = Arc::new(coordinator);

        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let mut ready = Some(ready_tx);
        let mut feeder_task = tokio::spawn({
            let pipeline = pipeline.clone();
            async move {
                let result = feeder.run(pipeline.as_ref(), &mut ready_rx).await;
                (feeder, result)
            }
        });

        let mut tasks = JoinSet::new();
        let mut sessions = Vec::new();
        let mut events_open = true;

        let feeder_outcome = loop {
            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(PipelineEvent::ReadyForMore) => {
                        if let Some(ready) = &ready {
                            _ = ready.send(());
                        }
                    }
                    Some(PipelineEvent::EncryptedContentDetected { init_data_type, init_data }) => {
                        tracing::info!("drm: encrypted content detected ({init_data_type})");
                        let coordinator = coordinator.clone();
                        tasks.spawn(async move {
                            coordinator.handle_encrypted(init_data_type, init_data).await
                        });
                    }
                    None => {
                        // no more ready signals can arrive, let the feeder stop
                        events_open = false;
                        ready = None;
                    }
                },
                Some(result) = tasks.join_next() => sessions.push(joined(result)),
                outcome = &mut feeder_task => break outcome,
            }
        };
        drop(ready);

        // notifications raised by the final append are already queued
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::EncryptedContentDetected {
                init_data_type,
                init_data,
            } = event
            {
                let coordinator = coordinator.clone();
                tasks.spawn(async move {
                    coordinator.handle_encrypted(init_data_type, init_data).await
                });
            }
        }
        while let Some(result) = tasks.join_next().await {
            sessions.push(joined(result));
        }

        let key_system_error = joined(initialization.await).err();

        let (segments_appended, end_of_stream, feeder_error) = match feeder_outcome {
            Ok((feeder, result)) => (
                feeder.appended(),
                feeder.state() == FeederState::Ended,
                result.err(),
            ),
            Err(e) => (0, false, Some(task_failure(e))),
        };

        PlaybackSummary {
            segments_appended,
            end_of_stream,
            feeder_error,
            key_system_error,
            sessions,
            registry: coordinator.registry().clone(),
        }
    }
}

fn task_failure(e: JoinError) -> EmeError {
    EmeError::PipelineFailure(format!("task failed: {e}"))
}

fn joined<T>(result: Result<EmeResult<T>, JoinError>) -> EmeResult<T> {
    result.map_err(task_failure).and_then(|r| r)
}
