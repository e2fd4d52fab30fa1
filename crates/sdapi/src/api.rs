//! REST client for the AUTOMATIC1111 web UI `/sdapi/v1` endpoints.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use sdbot_core::backend::CatalogKind;
use sdbot_core::error::BackendError;

use crate::messages::{
    EmbeddingsResponse, ExtraSingleImageRequest, ExtraSingleImageResponse, ModelEntry,
    NamedEntry, ProgressResponse, Txt2ImgRequest, Txt2ImgResponse, VaeEntry,
};

/// HTTP client for a single web UI instance.
pub struct SdApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the sdapi REST layer.
#[derive(Debug, thiserror::Error)]
pub enum SdApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The web UI returned a non-2xx status code.
    #[error("sdapi error ({status}): {body}")]
    Api { status: u16, body: String },

    /// A response field could not be decoded.
    #[error("invalid sdapi response: {0}")]
    Decode(String),
}

impl From<SdApiError> for BackendError {
    fn from(err: SdApiError) -> Self {
        match err {
            SdApiError::Request(e) if e.is_decode() => BackendError::Decode(e.to_string()),
            SdApiError::Request(e) => BackendError::Request(e.to_string()),
            SdApiError::Api { status, body } => BackendError::Api { status, body },
            SdApiError::Decode(msg) => BackendError::Decode(msg),
        }
    }
}

impl SdApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:7860`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Fetch the names of one catalog, in the order the web UI reports them.
    pub async fn catalog(&self, kind: CatalogKind) -> Result<Vec<String>, SdApiError> {
        let names = match kind {
            CatalogKind::Models => self
                .get::<Vec<ModelEntry>>("sd-models")
                .await?
                .into_iter()
                .map(|m| m.model_name)
                .collect(),
            CatalogKind::Vaes => self
                .get::<Vec<VaeEntry>>("sd-vae")
                .await?
                .into_iter()
                .map(|v| v.model_name)
                .collect(),
            CatalogKind::Embeddings => self
                .get::<EmbeddingsResponse>("embeddings")
                .await?
                .loaded,
            CatalogKind::Samplers | CatalogKind::Loras | CatalogKind::Upscalers => self
                .get::<Vec<NamedEntry>>(kind.as_str())
                .await?
                .into_iter()
                .map(|e| e.name)
                .collect(),
        };
        Ok(names)
    }

    /// Run a text-to-image job and return the decoded PNGs.
    pub async fn txt2img(&self, request: &Txt2ImgRequest) -> Result<Vec<Vec<u8>>, SdApiError> {
        let response: Txt2ImgResponse = self.post("txt2img", request).await?;
        response.images.iter().map(|img| decode_image(img)).collect()
    }

    /// Upscale a single image.
    pub async fn extra_single_image(
        &self,
        request: &ExtraSingleImageRequest,
    ) -> Result<Vec<u8>, SdApiError> {
        let response: ExtraSingleImageResponse = self.post("extra-single-image", request).await?;
        decode_image(&response.image)
    }

    /// Progress of whatever the web UI is currently executing.
    pub async fn progress(&self) -> Result<ProgressResponse, SdApiError> {
        self.get("progress?skip_current_image=true").await
    }

    /// Interrupt the currently running execution. Not job-specific.
    pub async fn interrupt(&self) -> Result<(), SdApiError> {
        let response = self
            .client
            .post(self.endpoint("interrupt"))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> String {
        format!("{}/sdapi/v1/{path}", self.api_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SdApiError> {
        let response = self.client.get(self.endpoint(path)).send().await?;
        Self::parse_response(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SdApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SdApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SdApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SdApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Decode a base64 image, accepting an optional `data:...;base64,` prefix.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, SdApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| SdApiError::Decode(format!("image is not valid base64: {e}")))
}

pub fn encode_image(data: &[u8]) -> String {
    STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn decode_plain_and_data_url() {
        assert_eq!(decode_image("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_image("data:image/png;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_matches!(decode_image("not base64!"), Err(SdApiError::Decode(_)));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = SdApi::new("http://localhost:7860/");
        assert_eq!(api.endpoint("progress"), "http://localhost:7860/sdapi/v1/progress");
    }

    #[test]
    fn api_error_maps_to_backend_error() {
        let err = BackendError::from(SdApiError::Api {
            status: 500,
            body: "boom".into(),
        });
        assert_matches!(err, BackendError::Api { status: 500, .. });
    }
}
