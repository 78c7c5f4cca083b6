//! The LLM provider interface (§6.5): `Stream(request) -> (textChan,
//! errChan)`, modeled in Rust as a `BoxStream` of `Result<String>` chunks.
//! The provider owns its API key and model selection; the core only
//! supplies the request body.
use futures::stream::BoxStream;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceInput {
    pub id: u64,
    pub text: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub query: String,
    pub references: Vec<ReferenceInput>,
    pub prompt: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream(&self, request: GenerateRequest) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>>;
}

/// Forwards generation to an HTTP endpoint that streams newline-delimited
/// text chunks, matching the reqwest-based client style used elsewhere in
/// this workspace (`auth_gate::ControlPlaneClient`).
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn stream(&self, request: GenerateRequest) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
        use futures::StreamExt;

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| String::from_utf8_lossy(&b).into_owned()).map_err(anyhow::Error::from));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use futures::{
        stream,
        StreamExt,
    };

    use super::*;

    struct FixedProvider(Vec<&'static str>);

    #[async_trait::async_trait]
    impl LlmProvider for FixedProvider {
        async fn stream(&self, _request: GenerateRequest) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
            let chunks: Vec<anyhow::Result<String>> = self.0.iter().map(|s| Ok(s.to_string())).collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    #[tokio::test]
    async fn fixed_provider_streams_expected_tokens() {
        let provider = FixedProvider(vec!["X ", "is ", "..."]);
        let request = GenerateRequest {
            query: "what is X?".to_string(),
            references: vec![],
            prompt: None,
            provider: None,
            model: None,
        };
        let mut out = String::new();
        let mut stream = provider.stream(request).await.unwrap();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk.unwrap());
        }
        assert_eq!(out, "X is ...");
    }
}
