use std::sync::LazyLock;

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{DecodeError, Engine};

// ClearKey JSON uses unpadded base64url, but some servers pad anyway.
static ENGINE: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    GeneralPurpose::new(
        &base64::alphabet::URL_SAFE,
        GeneralPurposeConfig::new()
            .with_encode_padding(false)
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    )
});

pub fn base64url_encode<T: AsRef<[u8]>>(input: T) -> String {
    ENGINE.encode(input)
}

pub fn base64url_decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, DecodeError> {
    ENGINE.decode(input)
}
