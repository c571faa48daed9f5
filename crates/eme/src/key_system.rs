use std::fmt::{Display, Formatter};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::EmeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitDataType {
    /// Concatenated `pssh` boxes
    Cenc,
    /// JSON object listing key ids
    Keyids,
    Webm,
}

impl InitDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cenc => "cenc",
            Self::Keyids => "keyids",
            Self::Webm => "webm",
        }
    }
}

impl Display for InitDataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    #[default]
    Temporary,
    PersistentLicense,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporary => "temporary",
            Self::PersistentLicense => "persistent-license",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCapability {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub robustness: String,
}

/// The capabilities requested while negotiating a key system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySystemConfiguration {
    pub init_data_types: Vec<InitDataType>,
    pub session_types: Vec<SessionType>,
    #[serde(default)]
    pub audio_capabilities: Vec<MediaCapability>,
}

impl KeySystemConfiguration {
    /// A temporary-session `cenc` configuration for a single audio stream.
    pub fn audio<S, R>(content_type: S, robustness: R) -> Self
    where
        S: Into<String>,
        R: Into<String>,
    {
        Self {
            init_data_types: vec![InitDataType::Cenc],
            session_types: vec![SessionType::Temporary],
            audio_capabilities: vec![MediaCapability {
                content_type: content_type.into(),
                robustness: robustness.into(),
            }],
        }
    }
}

/// Entry point of a content decryption module.
pub trait KeySystem: Send + Sync + 'static {
    type Access: KeySystemAccess;

    fn name(&self) -> &str;

    fn negotiate(
        &self,
        config: &KeySystemConfiguration,
    ) -> impl std::future::Future<Output = EmeResult<Self::Access>> + Send;
}

/// A granted key system, able to create the key container.
pub trait KeySystemAccess: Send + Sync + 'static {
    type Container: KeyContainer;

    /// The configuration the key system agreed to.
    fn configuration(&self) -> &KeySystemConfiguration;

    fn create_container(
        &self,
    ) -> impl std::future::Future<Output = EmeResult<Self::Container>> + Send;
}

/// Holder of decryption keys, bound to the playback pipeline once.
pub trait KeyContainer: Send + Sync + 'static {
    type Session: KeySession;

    fn create_session(&self, session_type: SessionType) -> EmeResult<Self::Session>;
}

pub trait KeySession: Send + 'static {
    fn session_id(&self) -> &str;

    fn generate_request(
        &mut self,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> impl std::future::Future<Output = EmeResult<()>> + Send;

    /// Waits for the next license challenge of this session.
    ///
    /// Resolves to `None` once the session can no longer produce one.
    fn next_message(&mut self) -> impl std::future::Future<Output = Option<Bytes>> + Send;

    fn update(&mut self, response: &[u8])
        -> impl std::future::Future<Output = EmeResult<()>> + Send;
}
