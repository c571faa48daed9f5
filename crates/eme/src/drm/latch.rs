use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{EmeError, EmeResult};

enum LatchState<C> {
    Pending,
    Bound(Arc<C>),
    Failed(String),
}

impl<C> Clone for LatchState<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Bound(container) => Self::Bound(container.clone()),
            Self::Failed(reason) => Self::Failed(reason.clone()),
        }
    }
}

/// Write side of the key container latch. Consumed by the single bind attempt.
pub struct KeyContainerBinder<C> {
    sender: watch::Sender<LatchState<C>>,
}

impl<C> KeyContainerBinder<C> {
    pub fn bind(self, container: Arc<C>) {
        self.sender.send_replace(LatchState::Bound(container));
    }

    pub fn fail<E: ToString>(self, reason: E) {
        self.sender.send_replace(LatchState::Failed(reason.to_string()));
    }
}

/// Read side of the key container latch, shared by every session handler.
pub struct KeyContainerLatch<C> {
    receiver: watch::Receiver<LatchState<C>>,
}

impl<C> Clone for KeyContainerLatch<C> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

pub fn key_container_latch<C>() -> (KeyContainerBinder<C>, KeyContainerLatch<C>) {
    let (sender, receiver) = watch::channel(LatchState::Pending);
    (KeyContainerBinder { sender }, KeyContainerLatch { receiver })
}

impl<C> KeyContainerLatch<C> {
    /// Returns the bound container without waiting.
    pub fn get(&self) -> Option<Arc<C>> {
        match &*self.receiver.borrow() {
            LatchState::Bound(container) => Some(container.clone()),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.get().is_some()
    }

    /// Waits until the container is bound to the pipeline.
    ///
    /// Fails instead of hanging when the bind attempt failed or was abandoned.
    pub async fn wait(&self) -> EmeResult<Arc<C>> {
        let mut receiver = self.receiver.clone();
        loop {
            let state = receiver.borrow_and_update().clone();
            match state {
                LatchState::Bound(container) => return Ok(container),
                LatchState::Failed(reason) => return Err(EmeError::KeyContainerFailure(reason)),
                LatchState::Pending => {}
            }

            if receiver.changed().await.is_err() {
                let state = receiver.borrow().clone();
                return match state {
                    LatchState::Bound(container) => Ok(container),
                    LatchState::Failed(reason) => Err(EmeError::KeyContainerFailure(reason)),
                    LatchState::Pending => Err(EmeError::KeyContainerFailure(
                        "key system initialization was abandoned".to_string(),
                    )),
                };
            }
        }
    }
}
