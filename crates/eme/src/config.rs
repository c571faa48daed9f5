use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    clearkey::CLEARKEY_KEY_SYSTEM,
    error::{EmeError, EmeResult},
    key_system::KeySystemConfiguration,
};

pub const DEFAULT_ASSET_BASE: &str = "https://d1cjkfw7z3xyxy.cloudfront.net/opus_16_48000_drm/";
pub const DEFAULT_ASSET_PARTS: [&str; 5] = [
    "sample.mp4",
    "part_1.m4s",
    "part_2.m4s",
    "part_3.m4s",
    "part_4.m4s",
];
pub const DEFAULT_MIME_TYPE: &str = "audio/mp4; codecs=\"opus\"";
pub const WIDEVINE_KEY_SYSTEM: &str = "com.widevine.alpha";
/// Public Widevine license proxy the default asset was packaged for
pub const WIDEVINE_LICENSE_URL: &str = "https://cwip-shaka-proxy.appspot.com/no_auth";
pub const DEFAULT_ROBUSTNESS: &str = "SW_SECURE_CRYPTO";

/// Everything needed to play one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Segment locators in playback order, initialization segment first
    pub assets: Vec<Url>,
    pub mime_type: String,
    /// License server, falls back to the key system's known server when unset
    pub license_url: Option<Url>,
    pub key_system: String,
    pub robustness: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let base = Url::parse(DEFAULT_ASSET_BASE).expect("default asset base is a valid url");
        Self {
            assets: DEFAULT_ASSET_PARTS
                .iter()
                .map(|part| base.join(part).expect("default asset part is a valid path"))
                .collect(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            license_url: None,
            key_system: CLEARKEY_KEY_SYSTEM.to_string(),
            robustness: DEFAULT_ROBUSTNESS.to_string(),
        }
    }
}

impl PlayerConfig {
    /// Resolves `parts` against `base`, keeping their order.
    pub fn assets_from<I, S>(base: &Url, parts: I) -> Result<Vec<Url>, url::ParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        parts
            .into_iter()
            .map(|part| base.join(part.as_ref()))
            .collect()
    }

    /// License server known to serve `key_system`.
    ///
    /// ClearKey has no public server: its keys are only meaningful to whoever packaged the
    /// content.
    pub fn default_license_url(key_system: &str) -> Option<Url> {
        match key_system {
            WIDEVINE_KEY_SYSTEM => Url::parse(WIDEVINE_LICENSE_URL).ok(),
            _ => None,
        }
    }

    /// The configured license server, or the key system's default.
    pub fn license_url(&self) -> EmeResult<Url> {
        self.license_url
            .clone()
            .or_else(|| Self::default_license_url(&self.key_system))
            .ok_or_else(|| EmeError::MissingLicenseUrl(self.key_system.clone()))
    }

    pub fn key_system_configuration(&self) -> KeySystemConfiguration {
        KeySystemConfiguration::audio(self.mime_type.clone(), self.robustness.clone())
    }
}
