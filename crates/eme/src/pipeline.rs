use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    error::EmeResult,
    key_system::{InitDataType, KeyContainer},
};

mod sink;
pub use sink::SinkPipeline;

/// A source buffer opened on the pipeline for one MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferHandle {
    id: usize,
    mime_type: String,
}

impl BufferHandle {
    pub fn new<S: Into<String>>(id: usize, mime_type: S) -> Self {
        Self {
            id,
            mime_type: mime_type.into(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// Notifications raised by a playback pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The last append has been consumed and the buffer accepts more data.
    ReadyForMore,
    /// Appended media declared protection data.
    EncryptedContentDetected {
        init_data_type: InitDataType,
        init_data: Bytes,
    },
}

pub type PipelineEvents = mpsc::UnboundedReceiver<PipelineEvent>;
pub type PipelineNotifier = mpsc::UnboundedSender<PipelineEvent>;

/// The media pipeline both pumps feed.
///
/// Implementations hand out a [`PipelineEvents`] receiver at construction and raise
/// [`PipelineEvent::ReadyForMore`] once per completed append.
pub trait PlaybackPipeline: Send + Sync + 'static {
    fn open_for_writing(
        &self,
        mime_type: &str,
    ) -> impl std::future::Future<Output = EmeResult<BufferHandle>> + Send;

    fn append(
        &self,
        buffer: &BufferHandle,
        data: Bytes,
    ) -> impl std::future::Future<Output = EmeResult<()>> + Send;

    fn end_of_stream(&self) -> impl std::future::Future<Output = EmeResult<()>> + Send;

    fn bind_key_container<C>(
        &self,
        container: Arc<C>,
    ) -> impl std::future::Future<Output = EmeResult<()>> + Send
    where
        C: KeyContainer;
}
