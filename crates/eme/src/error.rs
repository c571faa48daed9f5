use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Transport level failure shared by segment and license requests.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum EmeError {
    #[error("Key system negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Key container failure: {0}")]
    KeyContainerFailure(String),

    #[error("Segment fetch failed, url: {url}, reason: {source}")]
    SegmentFetchFailure {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Session request failed: {0}")]
    SessionRequestFailure(String),

    #[error("License fetch failed: {0}")]
    LicenseFetchFailure(#[source] FetchError),

    #[error("Could not parse license response: {0}")]
    LicenseParseFailure(String),

    #[error("Session update failed: {0}")]
    SessionUpdateFailure(String),

    #[error("Playback pipeline error: {0}")]
    PipelineFailure(String),

    #[error("Unsupported MIME type or codec: {0}")]
    UnsupportedMimeType(String),

    #[error("No license server configured for key system {0}")]
    MissingLicenseUrl(String),

    #[error("Invalid init data: {0}")]
    InvalidInitData(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

pub type EmeResult<T> = Result<T, EmeError>;

/// Named steps of both pumps, used as context when a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OpenBuffer,
    FetchSegment,
    AppendSegment,
    EndOfStream,
    ObtainKeySystemAccess,
    CreateKeyContainer,
    BindKeyContainer,
    CreateSession,
    GenerateRequest,
    AwaitChallenge,
    RequestLicense,
    ReadLicense,
    UpdateSession,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenBuffer => "Could not open source buffer",
            Self::FetchSegment => "Error fetching segment",
            Self::AppendSegment => "Could not append segment",
            Self::EndOfStream => "Could not signal end of stream",
            Self::ObtainKeySystemAccess => "Could not obtain media key system access",
            Self::CreateKeyContainer => "Could not create media keys",
            Self::BindKeyContainer => "Could not set media keys",
            Self::CreateSession => "Could not create session",
            Self::GenerateRequest => "Could not generate a session request",
            Self::AwaitChallenge => "Session closed before a license challenge was produced",
            Self::RequestLicense => "License request failed",
            Self::ReadLicense => "Could not parse license response",
            Self::UpdateSession => "Session update failed",
        }
    }

    /// Files a collaborator error under the failure kind this stage stands for.
    pub fn classify(&self, error: EmeError) -> EmeError {
        match (self, error) {
            (Self::ObtainKeySystemAccess, e @ EmeError::NegotiationFailure(_)) => e,
            (Self::ObtainKeySystemAccess, e) => EmeError::NegotiationFailure(e.to_string()),
            (
                Self::CreateKeyContainer | Self::BindKeyContainer,
                e @ EmeError::KeyContainerFailure(_),
            ) => e,
            (Self::CreateKeyContainer | Self::BindKeyContainer, e) => {
                EmeError::KeyContainerFailure(e.to_string())
            }
            (
                Self::CreateSession | Self::GenerateRequest | Self::AwaitChallenge,
                e @ EmeError::SessionRequestFailure(_),
            ) => e,
            (Self::CreateSession | Self::GenerateRequest | Self::AwaitChallenge, e) => {
                EmeError::SessionRequestFailure(e.to_string())
            }
            (Self::UpdateSession, e @ EmeError::SessionUpdateFailure(_)) => e,
            (Self::UpdateSession, e) => EmeError::SessionUpdateFailure(e.to_string()),
            (_, e) => e,
        }
    }

    fn is_drm(&self) -> bool {
        !matches!(
            self,
            Self::OpenBuffer | Self::FetchSegment | Self::AppendSegment | Self::EndOfStream
        )
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ReportExt {
    /// Classifies a failure by the stage it originated from, logs it and hands it back.
    fn report(self, stage: Stage) -> Self;
}

impl<T> ReportExt for EmeResult<T> {
    fn report(self, stage: Stage) -> Self {
        self.map_err(|e| {
            let e = stage.classify(e);
            if stage.is_drm() {
                tracing::error!("drm: {stage}, reason: {e}");
            } else {
                tracing::error!("{stage}, reason: {e}");
            }
            e
        })
    }
}
