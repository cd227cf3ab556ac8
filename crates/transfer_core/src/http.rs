//! reqwest implementation of [`SwapApi`].

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Response};
use shared::{
    domain::CatalogIndex,
    protocol::{
        ApiPayload, ImagesCountResponse, SwapPhotoRequest, IMAGES_COUNT_PATH,
        IMAGE_BY_INDEX_PATH, SWAP_PATH,
    },
};

use crate::SwapApi;

pub struct HttpSwapApi {
    http: Client,
    base_url: String,
}

impl HttpSwapApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl SwapApi for HttpSwapApi {
    async fn images_count(&self) -> Result<u32> {
        let body: ImagesCountResponse = self
            .http
            .get(self.url(IMAGES_COUNT_PATH))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.count)
    }

    async fn image(&self, index: CatalogIndex) -> Result<Vec<u8>> {
        let bytes = self
            .http
            .get(self.url(&format!("{IMAGE_BY_INDEX_PATH}{index}")))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn swap_indexes(
        &self,
        first: CatalogIndex,
        second: CatalogIndex,
    ) -> Result<ApiPayload> {
        let response = self
            .http
            .get(self.url(&format!("{SWAP_PATH}{first}/{second}")))
            .send()
            .await?;
        read_payload(response).await
    }

    async fn swap_photo(&self, request: SwapPhotoRequest) -> Result<ApiPayload> {
        let response = self.http.post(&self.base_url).json(&request).send().await?;
        read_payload(response).await
    }
}

/// Successful non-text answers are images; anything else is an error message.
async fn read_payload(response: Response) -> Result<ApiPayload> {
    let is_text = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("text/"));

    if response.status().is_success() && !is_text {
        let bytes = response.bytes().await?;
        return Ok(ApiPayload::Image(bytes.to_vec()));
    }

    let status = response.status();
    let body = response.text().await?;
    let message = body.trim();
    if message.is_empty() {
        return Ok(ApiPayload::Text(format!("remote answered {status} without a message")));
    }
    Ok(ApiPayload::Text(message.to_string()))
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
