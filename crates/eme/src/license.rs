use std::str::FromStr;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{
    error::{EmeError, EmeResult, FetchError},
    util::http::HttpClient,
};

/// Exchanges a license challenge for a license.
pub trait LicenseService: Send + Sync + 'static {
    fn acquire(&self, challenge: Bytes)
        -> impl std::future::Future<Output = EmeResult<Bytes>> + Send;
}

pub trait IntoLicenseHeaders {
    fn into_license_headers(self) -> HeaderMap<HeaderValue>;
}

impl IntoLicenseHeaders for HeaderMap<HeaderValue> {
    fn into_license_headers(self) -> HeaderMap<HeaderValue> {
        self
    }
}

/// `Name: value` lines, as accepted by `-H` on the command line.
impl IntoLicenseHeaders for Vec<String> {
    fn into_license_headers(self) -> HeaderMap<HeaderValue> {
        let mut map = HeaderMap::new();
        for header in self {
            let parsed = header.split_once(':').and_then(|(key, value)| {
                let key = HeaderName::from_str(key.trim()).ok()?;
                let value = HeaderValue::from_str(value.trim()).ok()?;
                Some((key, value))
            });
            match parsed {
                Some((key, value)) => {
                    map.insert(key, value);
                }
                None => tracing::warn!("Ignored invalid header: {header}"),
            }
        }
        map
    }
}

impl IntoLicenseHeaders for () {
    fn into_license_headers(self) -> HeaderMap<HeaderValue> {
        HeaderMap::new()
    }
}

/// POSTs the raw challenge to a license server and returns the raw response body.
pub struct HttpLicenseService {
    client: HttpClient,
    license_url: Url,
    headers: HeaderMap<HeaderValue>,
}

impl HttpLicenseService {
    pub fn new(client: HttpClient, license_url: Url) -> Self {
        Self {
            client,
            license_url,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers<H>(mut self, headers: H) -> Self
    where
        H: IntoLicenseHeaders,
    {
        self.headers = headers.into_license_headers();
        self
    }

    pub fn license_url(&self) -> &Url {
        &self.license_url
    }
}

impl LicenseService for HttpLicenseService {
    async fn acquire(&self, challenge: Bytes) -> EmeResult<Bytes> {
        let response = self
            .client
            .post(self.license_url.clone())
            .headers(self.headers.clone())
            .body(challenge)
            .send()
            .await
            .map_err(|e| EmeError::LicenseFetchFailure(FetchError::RequestError(e)))?;

        let status = response.status();
        if !status.is_success() {
            if let Ok(body) = response.text().await {
                tracing::warn!("Error body: {body}");
            }
            return Err(EmeError::LicenseFetchFailure(FetchError::HttpError(status)));
        }
        tracing::info!("drm: license received");

        response
            .bytes()
            .await
            .map_err(|e| EmeError::LicenseParseFailure(e.to_string()))
    }
}

impl<T> LicenseService for std::sync::Arc<T>
where
    T: LicenseService,
{
    fn acquire(
        &self,
        challenge: Bytes,
    ) -> impl std::future::Future<Output = EmeResult<Bytes>> + Send {
        self.as_ref().acquire(challenge)
    }
}
