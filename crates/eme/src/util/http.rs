use std::{ops::Deref, sync::Arc};

use reqwest::{Client, ClientBuilder, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::EmeResult;

/// Shared HTTP client for segment and license requests.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> EmeResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder
            .cookie_provider(cookies_store.clone())
            .build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> EmeResult<()> {
        let url = url.into_url()?;
        let mut lock = match self.cookies_store.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        for cookie in cookies {
            if let Err(e) = lock.parse(&cookie, &url) {
                tracing::warn!("Ignored invalid cookie {cookie}: {e}");
            }
        }
        Ok(())
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap_or_default();

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
