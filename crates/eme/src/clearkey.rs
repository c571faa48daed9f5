//! W3C ClearKey key system.
//!
//! Challenges are JSON key id lists and licenses are JSON Web Key sets, so no CDM binary is
//! involved. Installed keys are kept in the shared [`ClearKeyContainer`].

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, RwLock,
    },
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    encoding::{base64url_decode, base64url_encode},
    error::{EmeError, EmeResult},
    key_system::{
        InitDataType, KeyContainer, KeySession, KeySystem, KeySystemAccess,
        KeySystemConfiguration, SessionType,
    },
    mp4::{PsshBox, COMMON_SYSTEM_ID},
};

pub const CLEARKEY_KEY_SYSTEM: &str = "org.w3.clearkey";

pub type KeyId = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentKey {
    pub kid: KeyId,
    pub key: [u8; 16],
}

impl Display for ContentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.kid), hex::encode(self.key))
    }
}

#[derive(Debug, Default, Clone)]
pub struct ClearKeySystem;

impl KeySystem for ClearKeySystem {
    type Access = ClearKeyAccess;

    fn name(&self) -> &str {
        CLEARKEY_KEY_SYSTEM
    }

    async fn negotiate(&self, config: &KeySystemConfiguration) -> EmeResult<Self::Access> {
        let init_data_types: Vec<_> = config
            .init_data_types
            .iter()
            .copied()
            .filter(|t| matches!(t, InitDataType::Cenc | InitDataType::Keyids))
            .collect();
        if init_data_types.is_empty() {
            return Err(EmeError::NegotiationFailure(format!(
                "{CLEARKEY_KEY_SYSTEM} supports neither of {:?}",
                config.init_data_types
            )));
        }

        if let Some(session_type) = config
            .session_types
            .iter()
            .find(|t| **t != SessionType::Temporary)
        {
            return Err(EmeError::NegotiationFailure(format!(
                "{CLEARKEY_KEY_SYSTEM} does not support {} sessions",
                session_type.as_str()
            )));
        }

        for capability in &config.audio_capabilities {
            let content_type = capability.content_type.to_ascii_lowercase();
            if !(content_type.starts_with("audio/mp4") || content_type.starts_with("audio/webm")) {
                return Err(EmeError::NegotiationFailure(format!(
                    "unsupported audio capability: {}",
                    capability.content_type
                )));
            }
            if !capability.robustness.is_empty() {
                log::warn!(
                    "{CLEARKEY_KEY_SYSTEM} ignores robustness {}",
                    capability.robustness
                );
            }
        }

        Ok(ClearKeyAccess {
            configuration: KeySystemConfiguration {
                init_data_types,
                session_types: vec![SessionType::Temporary],
                audio_capabilities: config.audio_capabilities.clone(),
            },
        })
    }
}

pub struct ClearKeyAccess {
    configuration: KeySystemConfiguration,
}

impl KeySystemAccess for ClearKeyAccess {
    type Container = ClearKeyContainer;

    fn configuration(&self) -> &KeySystemConfiguration {
        &self.configuration
    }

    async fn create_container(&self) -> EmeResult<Self::Container> {
        Ok(ClearKeyContainer::default())
    }
}

#[derive(Default, Clone)]
pub struct ClearKeyContainer {
    keys: Arc<RwLock<BTreeMap<KeyId, [u8; 16]>>>,
    sessions: Arc<AtomicU32>,
}

impl ClearKeyContainer {
    /// Every key installed so far, ordered by key id.
    pub fn keys(&self) -> Vec<ContentKey> {
        let keys = match self.keys.read() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.iter()
            .map(|(kid, key)| ContentKey {
                kid: *kid,
                key: *key,
            })
            .collect()
    }

    pub fn key(&self, kid: &KeyId) -> Option<[u8; 16]> {
        let keys = match self.keys.read() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.get(kid).copied()
    }

    fn install(&self, new_keys: Vec<ContentKey>) {
        let mut keys = match self.keys.write() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        for ContentKey { kid, key } in new_keys {
            keys.insert(kid, key);
        }
    }
}

impl KeyContainer for ClearKeyContainer {
    type Session = ClearKeySession;

    fn create_session(&self, session_type: SessionType) -> EmeResult<Self::Session> {
        if session_type != SessionType::Temporary {
            return Err(EmeError::SessionRequestFailure(format!(
                "{} sessions are not supported",
                session_type.as_str()
            )));
        }

        let id = self.sessions.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(ClearKeySession {
            session_id: format!("clearkey-{id}"),
            container: self.clone(),
            key_ids: Vec::new(),
            messages: Some(sender),
            receiver,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct KeyIdsInitData {
    kids: Vec<String>,
}

#[derive(Serialize)]
struct LicenseRequest<'a> {
    kids: Vec<String>,
    r#type: &'a str,
}

#[derive(Deserialize)]
struct JsonWebKeySet {
    keys: Vec<JsonWebKey>,
}

#[derive(Deserialize)]
struct JsonWebKey {
    kty: String,
    kid: String,
    k: String,
}

fn decode_key_id(input: &str) -> Option<KeyId> {
    base64url_decode(input).ok()?.try_into().ok()
}

pub struct ClearKeySession {
    session_id: String,
    container: ClearKeyContainer,
    key_ids: Vec<KeyId>,

    messages: Option<mpsc::UnboundedSender<Bytes>>,
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl ClearKeySession {
    /// Key ids requested by this session.
    pub fn key_ids(&self) -> &[KeyId] {
        &self.key_ids
    }

    fn parse_init_data(init_data_type: InitDataType, init_data: &[u8]) -> EmeResult<Vec<KeyId>> {
        let key_ids = match init_data_type {
            InitDataType::Cenc => {
                let boxes = PsshBox::parse_all(init_data)
                    .map_err(|e| EmeError::InvalidInitData(e.to_string()))?;
                let mut key_ids: Vec<KeyId> = Vec::new();
                for pssh in boxes.iter().filter(|b| b.system_id == COMMON_SYSTEM_ID) {
                    for kid in &pssh.key_ids {
                        if !key_ids.contains(kid) {
                            key_ids.push(*kid);
                        }
                    }
                }
                key_ids
            }
            InitDataType::Keyids => {
                let init: KeyIdsInitData = serde_json::from_slice(init_data)?;
                init.kids
                    .iter()
                    .map(|kid| {
                        decode_key_id(kid)
                            .ok_or_else(|| EmeError::InvalidInitData(format!("invalid kid {kid}")))
                    })
                    .collect::<EmeResult<Vec<_>>>()?
            }
            InitDataType::Webm => vec![init_data
                .try_into()
                .map_err(|_| EmeError::InvalidInitData("webm key id must be 16 bytes".into()))?],
        };
        Ok(key_ids)
    }
}

impl KeySession for ClearKeySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn generate_request(
        &mut self,
        init_data_type: InitDataType,
        init_data: &[u8],
    ) -> EmeResult<()> {
        let Some(messages) = self.messages.take() else {
            return Err(EmeError::SessionRequestFailure(
                "a request was already generated for this session".to_string(),
            ));
        };

        let key_ids = Self::parse_init_data(init_data_type, init_data)
            .map_err(|e| EmeError::SessionRequestFailure(e.to_string()))?;
        if key_ids.is_empty() {
            return Err(EmeError::SessionRequestFailure(format!(
                "no {CLEARKEY_KEY_SYSTEM} key id found in {init_data_type} init data"
            )));
        }

        let request = LicenseRequest {
            kids: key_ids.iter().map(base64url_encode).collect(),
            r#type: SessionType::Temporary.as_str(),
        };
        let challenge = serde_json::to_vec(&request)?;
        self.key_ids = key_ids;

        // ClearKey never renews, so the sender is dropped after the only challenge.
        _ = messages.send(Bytes::from(challenge));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    async fn update(&mut self, response: &[u8]) -> EmeResult<()> {
        if self.key_ids.is_empty() {
            return Err(EmeError::SessionUpdateFailure(
                "no request was generated for this session".to_string(),
            ));
        }

        let set: JsonWebKeySet = serde_json::from_slice(response)
            .map_err(|e| EmeError::SessionUpdateFailure(format!("invalid JSON Web Key set: {e}")))?;

        let mut keys = Vec::with_capacity(set.keys.len());
        for jwk in set.keys {
            if jwk.kty != "oct" {
                return Err(EmeError::SessionUpdateFailure(format!(
                    "unsupported key type {}",
                    jwk.kty
                )));
            }
            let kid = decode_key_id(&jwk.kid)
                .ok_or_else(|| EmeError::SessionUpdateFailure(format!("invalid kid {}", jwk.kid)))?;
            let key = decode_key_id(&jwk.k)
                .ok_or_else(|| EmeError::SessionUpdateFailure(format!("invalid key for {}", jwk.kid)))?;
            keys.push(ContentKey { kid, key });
        }
        if keys.is_empty() {
            return Err(EmeError::SessionUpdateFailure(
                "license contains no keys".to_string(),
            ));
        }

        for key in &keys {
            if !self.key_ids.contains(&key.kid) {
                log::warn!(
                    "{}: license carries unrequested key id {}",
                    self.session_id,
                    hex::encode(key.kid)
                );
            }
        }
        log::info!("{}: {} key(s) installed", self.session_id, keys.len());
        self.container.install(keys);
        Ok(())
    }
}
