use bytes::Bytes;
use url::Url;

use crate::{error::FetchError, util::http::HttpClient};

/// Retrieves the raw bytes behind one segment locator.
pub trait SegmentFetcher {
    fn fetch(&self, url: &Url)
        -> impl std::future::Future<Output = Result<Bytes, FetchError>> + Send;
}

impl SegmentFetcher for HttpClient {
    fn fetch(
        &self,
        url: &Url,
    ) -> impl std::future::Future<Output = Result<Bytes, FetchError>> + Send {
        let request = self.get(url.clone());
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(FetchError::HttpError(status));
            }

            let bytes = response.bytes().await?;
            Ok(bytes)
        }
    }
}

impl<T> SegmentFetcher for std::sync::Arc<T>
where
    T: SegmentFetcher + Send + Sync,
{
    fn fetch(
        &self,
        url: &Url,
    ) -> impl std::future::Future<Output = Result<Bytes, FetchError>> + Send {
        self.as_ref().fetch(url)
    }
}
