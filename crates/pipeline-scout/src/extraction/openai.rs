//! OpenAI-compatible chat-completions client for product extraction.

use super::{
    ExtractedProduct, ExtractionError, ExtractionRequest, ExtractionResponse, ExtractionService,
    TokenUsage,
};
use crate::config::ExtractionSettings;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You extract drug development pipeline data from web pages. \
You list every pharmaceutical product regardless of layout and always answer with valid JSON.";

const INSTRUCTIONS: &str = r#"Extract ONLY drugs and molecules in clinical development or approved from the pharmaceutical pipeline content below.

Extract: drugs (e.g. "Pembrolizumab"), compounds and codes (e.g. "PF-07321332", "BNT162b2"), biologics, vaccines, gene and cell therapies, veterinary medicines.
Ignore: cosmetics, personal hygiene products, food supplements, medical devices, consumer goods.

Fields:
- name: the drug or molecule name
- category: the therapeutic area (e.g. Oncology, Vaccines, Immunology, Neuroscience, Rare diseases, Cardiometabolic, Infectious disease)
- stage: one of 1, 2, 3, Filed, Approved, Registration, Submission, Marketed, Preclinical
  ("Phase I"->"1", "Phase II"->"2", "Phase III"->"3", "Marketed"/"Approved"->"Approved")

Rules: extract every product found; do not invent data; if the page is not a pharmaceutical pipeline return {"products": []}.

Answer with JSON only:
{"products": [{"name": "...", "category": "...", "stage": "..."}]}

CONTENT (from {url}):
"#;

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Products are kept raw so one bad entry does not sink the rest.
#[derive(Debug, Deserialize)]
struct ProductsPayload {
    #[serde(default, alias = "productos")]
    products: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Extraction client for `POST {api_base}/chat/completions`.
pub struct OpenAiExtractor {
    client: reqwest::Client,
    settings: ExtractionSettings,
}

impl OpenAiExtractor {
    pub fn new(settings: ExtractionSettings) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        )
    }

    fn build_body(&self, request: &ExtractionRequest) -> serde_json::Value {
        let text = truncate_chars(&request.text, self.settings.max_content_chars);
        let prompt = format!(
            "{}{}",
            INSTRUCTIONS.replace("{url}", &request.source_url),
            text
        );
        json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_output_tokens,
            "response_format": { "type": "json_object" },
        })
    }
}

#[async_trait]
impl ExtractionService for OpenAiExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, ExtractionError> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            return Err(ExtractionError::Authentication(
                "OPENAI_API_KEY is not set".into(),
            ));
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(classify_failure(status, &body));
        }

        let completion: ChatCompletion =
            serde_json::from_str(&body).map_err(|e| ExtractionError::Malformed {
                reason: format!("invalid completion envelope: {e}"),
                usage: salvage_usage(&body),
            })?;

        let usage = completion.usage.map(TokenUsage::from).unwrap_or_default();

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractionError::Malformed {
                reason: "completion has no content".into(),
                usage: Some(usage),
            })?;

        let payload: ProductsPayload =
            serde_json::from_str(content.trim()).map_err(|e| ExtractionError::Malformed {
                reason: format!("content is not the expected JSON: {e}"),
                usage: Some(usage),
            })?;

        let offered = payload.products.len();
        let products: Vec<ExtractedProduct> = payload
            .products
            .into_iter()
            .filter_map(|raw| serde_json::from_value::<ExtractedProduct>(raw).ok())
            .filter(|p| !p.name.trim().is_empty())
            .collect();

        debug!(
            url = %request.source_url,
            products = products.len(),
            skipped = offered - products.len(),
            input_units = usage.input_units,
            output_units = usage.output_units,
            "extraction complete"
        );

        Ok(ExtractionResponse { products, usage })
    }
}

impl From<Usage> for TokenUsage {
    fn from(u: Usage) -> Self {
        TokenUsage {
            input_units: u.prompt_tokens,
            output_units: u.completion_tokens,
        }
    }
}

/// Pull the `usage` block out of a body whose envelope did not parse.
fn salvage_usage(body: &str) -> Option<TokenUsage> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let usage: Usage = serde_json::from_value(value.get("usage")?.clone()).ok()?;
    Some(usage.into())
}

/// Map a non-2xx response to an error kind.
fn classify_failure(status: u16, body: &str) -> ExtractionError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .unwrap_or_default()
        .error;
    let message = if detail.message.is_empty() {
        body.chars().take(200).collect()
    } else {
        detail.message
    };

    match status {
        401 | 403 => ExtractionError::Authentication(message),
        429 => {
            let exhausted = [detail.code.as_deref(), detail.kind.as_deref()]
                .into_iter()
                .flatten()
                .any(|c| c == "insufficient_quota");
            if exhausted {
                ExtractionError::QuotaExhausted(message)
            } else {
                ExtractionError::RateLimited(message)
            }
        }
        _ => ExtractionError::Http { status, message },
    }
}

/// First `max` chars of `text`, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn extractor(server: &MockServer) -> OpenAiExtractor {
        OpenAiExtractor::new(ExtractionSettings {
            api_base: format!("{}/v1", server.uri()),
            api_key: Some("sk-test".into()),
            max_content_chars: 50,
            timeout_ms: 5_000,
            ..ExtractionSettings::default()
        })
        .unwrap()
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            text: "x".repeat(80),
            source_url: "https://www.pfizer.com/pipeline".into(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 1200, "completion_tokens": 300, "total_tokens": 1500 }
        })
    }

    #[tokio::test]
    async fn test_successful_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                &json!({"products": [
                    {"name": "Paxlovid", "category": "Antiviral", "stage": "Approved"},
                    {"name": " ", "category": "", "stage": ""}
                ]})
                .to_string(),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let resp = extractor(&server).extract(&request()).await.unwrap();
        assert_eq!(resp.products.len(), 1);
        assert_eq!(resp.products[0].name, "Paxlovid");
        assert_eq!(
            resp.usage,
            TokenUsage {
                input_units: 1200,
                output_units: 300
            }
        );

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_json_include!(
            actual: body,
            expected: json!({
                "model": "gpt-4o-mini",
                "max_tokens": 4000,
                "response_format": { "type": "json_object" }
            })
        );
        let prompt = body["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.ends_with(&"x".repeat(50)));
        assert!(!prompt.ends_with(&"x".repeat(51)));
    }

    #[tokio::test]
    async fn test_malformed_content_keeps_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("not json")))
            .mount(&server)
            .await;

        let err = extractor(&server).extract(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert_eq!(err.usage().unwrap().output_units, 300);
    }

    #[tokio::test]
    async fn test_nameless_product_is_skipped_not_fatal() {
        let server = MockServer::start().await;
        let content = json!({"products": [
            {"category": "Oncology", "stage": "2"},
            {"name": "Vepdegestrant", "category": "Oncology", "stage": "3"},
            {"name": null, "stage": "1"}
        ]})
        .to_string();
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&content)))
            .mount(&server)
            .await;

        let resp = extractor(&server).extract(&request()).await.unwrap();
        let names: Vec<&str> = resp.products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Vepdegestrant"]);
        assert_eq!(resp.usage.input_units, 1200);
    }

    #[tokio::test]
    async fn test_broken_envelope_keeps_usage() {
        let server = MockServer::start().await;
        // `choices` has the wrong shape but the service still billed the call.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": "unavailable",
                "usage": { "prompt_tokens": 900, "completion_tokens": 40 }
            })))
            .mount(&server)
            .await;

        let err = extractor(&server).extract(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert_eq!(
            err.usage(),
            Some(TokenUsage {
                input_units: 900,
                output_units: 40
            })
        );
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            (
                401,
                json!({"error": {"message": "bad key", "type": "invalid_request_error"}}),
                "authentication",
            ),
            (
                429,
                json!({"error": {
                    "message": "quota",
                    "type": "insufficient_quota",
                    "code": "insufficient_quota"
                }}),
                "quotaExhausted",
            ),
            (
                429,
                json!({"error": {
                    "message": "slow down",
                    "type": "requests",
                    "code": "rate_limit_exceeded"
                }}),
                "rateLimited",
            ),
            (503, json!({"error": {"message": "overloaded"}}), "http"),
        ];
        for (status, body, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_json(body))
                .mount(&server)
                .await;
            let err = extractor(&server).extract(&request()).await.unwrap_err();
            assert_eq!(err.kind(), expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let server = MockServer::start().await;
        let mut settings = ExtractionSettings {
            api_base: server.uri(),
            ..ExtractionSettings::default()
        };
        settings.api_key = None;
        let err = OpenAiExtractor::new(settings)
            .unwrap()
            .extract(&request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "authentication");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
