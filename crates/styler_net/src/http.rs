//!The one-shot request path: one multipart POST carrying the content and
//!style payloads, one processed image back. The collaborator service
//!answers either with raw image bytes or with a small JSON body pointing at
//!them; both conventions are accepted.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use styler_core::error::UpstreamError;
use styler_core::{StyleService, StyleSpec};
use tracing::debug;

pub struct HttpStyleService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStyleService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    ///Fetch the preset style catalog. Done once at startup; the catalog is
    ///a collaborator concern and is not cached here.
    pub async fn styles(&self) -> Result<Vec<StyleEntry>, UpstreamError> {
        let url = format!("{}/api/styles", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json::<Vec<StyleEntry>>()
            .await
            .map_err(|err| UpstreamError::Payload(err.to_string()))
    }

    async fn fetch_result_url(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        };
        debug!("fetching result payload from {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|err| UpstreamError::Transport(err.to_string()))
    }
}

#[async_trait]
impl StyleService for HttpStyleService {
    async fn stylize_image(
        &self,
        content: Vec<u8>,
        style: &StyleSpec,
        model: &str,
    ) -> Result<Vec<u8>, UpstreamError> {
        let mut form = Form::new()
            .part("content_image", image_part(content, "content.jpg")?)
            .text("model_name", model.to_string());
        form = match style {
            StyleSpec::Preset(name) => form.text("style_name", name.clone()),
            StyleSpec::Image(bytes) => {
                form.part("style_image", image_part(bytes.clone(), "style.jpg")?)
            }
        };

        let response = self
            .client
            .post(format!("{}/api/style/image", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("application/json") {
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|err| UpstreamError::Payload(err.to_string()))?;
            match decode_json_result(&body)? {
                ResultPayload::Bytes(bytes) => Ok(bytes),
                ResultPayload::Url(url) => self.fetch_result_url(&url).await,
            }
        } else {
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|err| UpstreamError::Transport(err.to_string()))
        }
    }
}

fn image_part(bytes: Vec<u8>, file_name: &str) -> Result<Part, UpstreamError> {
    Part::bytes(bytes)
        .file_name(file_name.to_string())
        .mime_str("image/jpeg")
        .map_err(|err| UpstreamError::Payload(err.to_string()))
}

enum ResultPayload {
    Bytes(Vec<u8>),
    Url(String),
}

///JSON answers carry `result`/`result_base64` (encoded bytes) or
///`result_url` (a location to fetch).
fn decode_json_result(body: &serde_json::Value) -> Result<ResultPayload, UpstreamError> {
    if let Some(encoded) = body
        .get("result")
        .or_else(|| body.get("result_base64"))
        .and_then(|v| v.as_str())
    {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| UpstreamError::Payload(format!("bad base64 payload: {}", err)))?;
        return Ok(ResultPayload::Bytes(bytes));
    }
    if let Some(url) = body.get("result_url").and_then(|v| v.as_str()) {
        return Ok(ResultPayload::Url(url.to_string()));
    }
    Err(UpstreamError::Payload("response carries no result".to_string()))
}

///One entry of the preset style catalog.
#[derive(Clone, Debug, Deserialize)]
pub struct StyleEntry {
    pub id: String,
    pub thumbnail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base64_result_is_decoded() {
        let body = json!({ "result": base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]) });
        match decode_json_result(&body).unwrap() {
            ResultPayload::Bytes(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            ResultPayload::Url(_) => panic!("expected bytes"),
        }
    }

    #[test]
    fn result_base64_alias_is_accepted() {
        let body = json!({ "result_base64": base64::engine::general_purpose::STANDARD.encode([7u8]) });
        assert!(matches!(decode_json_result(&body).unwrap(), ResultPayload::Bytes(_)));
    }

    #[test]
    fn result_url_is_passed_through() {
        let body = json!({ "result_url": "/static/results/42.jpg" });
        match decode_json_result(&body).unwrap() {
            ResultPayload::Url(url) => assert_eq!(url, "/static/results/42.jpg"),
            ResultPayload::Bytes(_) => panic!("expected a url"),
        }
    }

    #[test]
    fn bad_base64_is_a_payload_error() {
        let body = json!({ "result": "*** not base64 ***" });
        assert!(matches!(decode_json_result(&body), Err(UpstreamError::Payload(_))));
    }

    #[test]
    fn missing_result_is_a_payload_error() {
        let body = json!({ "status": "ok" });
        assert!(matches!(decode_json_result(&body), Err(UpstreamError::Payload(_))));
    }

    #[test]
    fn catalog_entries_deserialize() {
        let entries: Vec<StyleEntry> = serde_json::from_value(json!([
            { "id": "mosaic", "thumbnail": "/static/styles/mosaic.jpg" },
            { "id": "wave", "thumbnail": "/static/styles/wave.jpg" }
        ]))
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "mosaic");
    }
}
