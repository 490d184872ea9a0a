use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue, REFERER, USER_AGENT,
};
use tracing::debug;

use crate::domain::{BdnsId, GrantRecord};
use crate::error::HarvestError;

const BASE_URL: &str = "https://www.pap.hacienda.gob.es/bdnstrans/api/convocatorias";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Classification of one lookup. Transport failures, undecodable payloads
/// and non-404 error statuses (429 included) all land in `Transient`:
/// the fetch loop logs them and moves on without touching its
/// consecutive-not-found counter.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(GrantRecord),
    NotFound,
    Transient(String),
}

pub trait RegistryClient: Send + Sync {
    fn fetch(&self, id: BdnsId) -> FetchOutcome;
}

#[derive(Clone)]
pub struct BdnsHttpClient {
    client: Client,
    base_url: String,
}

impl BdnsHttpClient {
    pub fn new() -> Result<Self, HarvestError> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, HarvestError> {
        // The registry rejects clients that do not look like a browser.
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("es-ES,es;q=0.9,en;q=0.8"),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            REFERER,
            HeaderValue::from_static(
                "https://www.pap.hacienda.gob.es/bdnstrans/GE/es/convocatorias/",
            ),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| HarvestError::RegistryHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    fn lookup_url(&self, id: BdnsId) -> String {
        format!("{}?numConv={}&vpd=GE", self.base_url, id)
    }
}

impl RegistryClient for BdnsHttpClient {
    fn fetch(&self, id: BdnsId) -> FetchOutcome {
        let url = self.lookup_url(id);
        debug!(%id, "registry.request");

        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(err) => return FetchOutcome::Transient(err.to_string()),
        };

        match response.status() {
            StatusCode::NOT_FOUND => FetchOutcome::NotFound,
            status if status.is_success() => match response.json::<GrantRecord>() {
                Ok(record) => FetchOutcome::Success(record),
                Err(err) => FetchOutcome::Transient(format!("undecodable payload: {err}")),
            },
            status => FetchOutcome::Transient(
                HarvestError::RegistryStatus {
                    status: status.as_u16(),
                    message: status
                        .canonical_reason()
                        .unwrap_or("registry request failed")
                        .to_string(),
                }
                .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_url_carries_id_and_portal() {
        let client = BdnsHttpClient::new().unwrap();
        let url = client.lookup_url(BdnsId::new(747573));
        assert_eq!(
            url,
            "https://www.pap.hacienda.gob.es/bdnstrans/api/convocatorias?numConv=747573&vpd=GE"
        );
    }
}
