use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use super::{BufferHandle, PipelineEvent, PipelineEvents, PipelineNotifier, PlaybackPipeline};
use crate::{
    error::{EmeError, EmeResult},
    key_system::{InitDataType, KeyContainer},
    mp4::extract_pssh_boxes,
};

const SUPPORTED_CONTAINERS: [&str; 4] = ["audio/mp4", "video/mp4", "audio/webm", "video/webm"];

/// A pipeline that writes every appended segment to `W`.
///
/// Each append raises [`PipelineEvent::EncryptedContentDetected`] when the segment carries
/// `moov/pssh` boxes, then [`PipelineEvent::ReadyForMore`].
pub struct SinkPipeline<W> {
    writer: tokio::sync::Mutex<W>,
    notifier: PipelineNotifier,

    buffer: Mutex<Option<BufferHandle>>,
    key_container: OnceLock<Arc<dyn Any + Send + Sync>>,
    ended: AtomicBool,

    segments_appended: AtomicUsize,
    bytes_appended: AtomicU64,
}

impl<W> SinkPipeline<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> (Self, PipelineEvents) {
        let (notifier, events) = mpsc::unbounded_channel();
        let pipeline = Self {
            writer: tokio::sync::Mutex::new(writer),
            notifier,
            buffer: Mutex::new(None),
            key_container: OnceLock::new(),
            ended: AtomicBool::new(false),
            segments_appended: AtomicUsize::new(0),
            bytes_appended: AtomicU64::new(0),
        };
        (pipeline, events)
    }

    /// Accepts `container/subtype` optionally followed by a non-empty `codecs` parameter.
    pub fn is_type_supported(mime_type: &str) -> bool {
        let mut parts = mime_type.split(';').map(str::trim);
        let container = parts.next().unwrap_or_default().to_ascii_lowercase();
        if !SUPPORTED_CONTAINERS.contains(&container.as_str()) {
            return false;
        }

        parts.all(|param| match param.split_once('=') {
            Some((key, value)) if key.trim().eq_ignore_ascii_case("codecs") => {
                !value.trim().trim_matches('"').trim().is_empty()
            }
            Some(_) => true,
            None => false,
        })
    }

    pub fn segments_appended(&self) -> usize {
        self.segments_appended.load(Ordering::Relaxed)
    }

    pub fn bytes_appended(&self) -> u64 {
        self.bytes_appended.load(Ordering::Relaxed)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }

    pub fn has_key_container(&self) -> bool {
        self.key_container.get().is_some()
    }

    /// The bound key container, if it is a `C`.
    pub fn key_container<C: KeyContainer>(&self) -> Option<Arc<C>> {
        self.key_container.get()?.clone().downcast::<C>().ok()
    }

    fn notify(&self, event: PipelineEvent) {
        // nobody listening is not an error for the pipeline
        _ = self.notifier.send(event);
    }

    fn current_buffer(&self) -> Option<BufferHandle> {
        match self.buffer.lock() {
            Ok(buffer) => buffer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl<W> PlaybackPipeline for SinkPipeline<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn open_for_writing(&self, mime_type: &str) -> EmeResult<BufferHandle> {
        if !Self::is_type_supported(mime_type) {
            return Err(EmeError::UnsupportedMimeType(mime_type.to_string()));
        }

        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.is_some() {
            return Err(EmeError::PipelineFailure(
                "a source buffer is already open".to_string(),
            ));
        }

        let handle = BufferHandle::new(0, mime_type);
        *buffer = Some(handle.clone());
        Ok(handle)
    }

    async fn append(&self, buffer: &BufferHandle, data: Bytes) -> EmeResult<()> {
        if self.is_ended() {
            return Err(EmeError::PipelineFailure(
                "can not append after end of stream".to_string(),
            ));
        }
        if self.current_buffer().as_ref() != Some(buffer) {
            return Err(EmeError::PipelineFailure(format!(
                "unknown source buffer {}",
                buffer.id()
            )));
        }

        {
            let mut writer = self.writer.lock().await;
            writer.write_all(&data).await?;
            writer.flush().await?;
        }
        self.segments_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        match extract_pssh_boxes(&data) {
            Ok(boxes) if !boxes.is_empty() => {
                tracing::debug!("{} pssh box(es) found in appended segment", boxes.len());
                self.notify(PipelineEvent::EncryptedContentDetected {
                    init_data_type: InitDataType::Cenc,
                    init_data: Bytes::from(boxes.concat()),
                });
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Appended segment is not box aligned: {e}"),
        }

        self.notify(PipelineEvent::ReadyForMore);
        Ok(())
    }

    async fn end_of_stream(&self) -> EmeResult<()> {
        if self.ended.swap(true, Ordering::Relaxed) {
            return Err(EmeError::PipelineFailure(
                "end of stream already signaled".to_string(),
            ));
        }

        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        writer.shutdown().await?;
        tracing::info!(
            "End of stream, {} segment(s), {} bytes",
            self.segments_appended(),
            self.bytes_appended()
        );
        Ok(())
    }

    async fn bind_key_container<C>(&self, container: Arc<C>) -> EmeResult<()>
    where
        C: KeyContainer,
    {
        self.key_container
            .set(container as Arc<dyn Any + Send + Sync>)
            .map_err(|_| EmeError::KeyContainerFailure("a key container is already bound".into()))
    }
}
