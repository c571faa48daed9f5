use tokio::sync::mpsc;

use crate::{
    error::{EmeError, EmeResult, ReportExt, Stage},
    fetch::SegmentFetcher,
    pipeline::{BufferHandle, PlaybackPipeline},
    queue::AssetQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    /// The source buffer has not been opened yet
    Idle,
    Streaming,
    /// End of stream was signaled
    Ended,
    /// A stage failed, nothing more will be fetched
    Halted,
}

/// What a single feed cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedProgress {
    Appended { index: usize, bytes: usize },
    EndOfStream,
}

/// Pulls segments from an [`AssetQueue`] into a playback pipeline, one cycle at a time.
pub struct SegmentFeeder<F> {
    fetcher: F,
    queue: AssetQueue,
    mime_type: String,

    buffer: Option<BufferHandle>,
    state: FeederState,
    appended: usize,
}

impl<F> SegmentFeeder<F>
where
    F: SegmentFetcher,
{
    pub fn new<S: Into<String>>(fetcher: F, queue: AssetQueue, mime_type: S) -> Self {
        Self {
            fetcher,
            queue,
            mime_type: mime_type.into(),
            buffer: None,
            state: FeederState::Idle,
            appended: 0,
        }
    }

    pub fn state(&self) -> FeederState {
        self.state
    }

    pub fn queue(&self) -> &AssetQueue {
        &self.queue
    }

    /// Number of segments appended so far.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Opens the source buffer and runs the first cycle.
    pub async fn start<P>(&mut self, pipeline: &P) -> EmeResult<FeedProgress>
    where
        P: PlaybackPipeline,
    {
        if self.state != FeederState::Idle {
            return Err(EmeError::PipelineFailure(
                "segment feeder was already started".to_string(),
            ));
        }

        let buffer = pipeline
            .open_for_writing(&self.mime_type)
            .await
            .report(Stage::OpenBuffer);
        match buffer {
            Ok(buffer) => {
                tracing::info!("Source buffer opened for {}", buffer.mime_type());
                self.buffer = Some(buffer);
                self.state = FeederState::Streaming;
            }
            Err(e) => {
                self.state = FeederState::Halted;
                return Err(e);
            }
        }

        self.advance(pipeline).await
    }

    /// Runs one fetch/append cycle, or signals end of stream once the queue is exhausted.
    ///
    /// Calling this again after end of stream fetches nothing and signals nothing.
    pub async fn advance<P>(&mut self, pipeline: &P) -> EmeResult<FeedProgress>
    where
        P: PlaybackPipeline,
    {
        match self.state {
            FeederState::Streaming => {}
            FeederState::Ended => return Ok(FeedProgress::EndOfStream),
            FeederState::Idle => {
                return Err(EmeError::PipelineFailure(
                    "segment feeder was not started".to_string(),
                ))
            }
            FeederState::Halted => {
                return Err(EmeError::PipelineFailure(
                    "segment feeder halted".to_string(),
                ))
            }
        }

        let result = self.cycle(pipeline).await;
        match &result {
            Ok(FeedProgress::EndOfStream) => self.state = FeederState::Ended,
            Ok(FeedProgress::Appended { .. }) => self.appended += 1,
            Err(_) => self.state = FeederState::Halted,
        }
        result
    }

    async fn cycle<P>(&mut self, pipeline: &P) -> EmeResult<FeedProgress>
    where
        P: PlaybackPipeline,
    {
        let Some(buffer) = &self.buffer else {
            return Err(EmeError::PipelineFailure("no source buffer".to_string()));
        };

        let total = self.queue.len();
        let Some((index, url)) = self.queue.next() else {
            pipeline.end_of_stream().await.report(Stage::EndOfStream)?;
            tracing::info!("All {total} segment(s) appended");
            return Ok(FeedProgress::EndOfStream);
        };

        tracing::info!("fetching: {url}");
        let data = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| EmeError::SegmentFetchFailure {
                url: url.to_string(),
                source,
            })
            .report(Stage::FetchSegment)?;

        let bytes = data.len();
        pipeline
            .append(buffer, data)
            .await
            .report(Stage::AppendSegment)?;
        tracing::debug!("Appended segment {index} ({bytes} bytes)");

        Ok(FeedProgress::Appended { index, bytes })
    }

    /// Starts the feeder and advances it on every ready signal until end of stream.
    ///
    /// Returns early without error when `ready` closes first.
    pub async fn run<P>(
        &mut self,
        pipeline: &P,
        ready: &mut mpsc::UnboundedReceiver<()>,
    ) -> EmeResult<()>
    where
        P: PlaybackPipeline,
    {
        let mut progress = self.start(pipeline).await?;
        while progress != FeedProgress::EndOfStream {
            if ready.recv().await.is_none() {
                tracing::warn!(
                    "Pipeline stopped asking for data after {} segment(s)",
                    self.appended
                );
                return Ok(());
            }
            progress = self.advance(pipeline).await?;
        }
        Ok(())
    }
}
