use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};

use crate::agent::ChatError;
use crate::agent::config::GatewayRewrite;

use super::{ByteStream, CompletionRequest, CompletionTransport};

pub mod models;

use models::{ChatCompletionPayload, ChatCompletionResponse};

const COMPLETIONS_PATH: &str = "/chat/completions";

/// `CompletionTransport` 的 HTTP 實作。
#[derive(Clone, Default)]
pub struct HttpTransport {
    /// `reqwest` 的非同步 HTTP 客戶端；逾時以單一請求為單位設定。
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        let payload = ChatCompletionPayload {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: None,
        };

        info!("POST {} (model {})", request.url, request.model);
        let response = self
            .client
            .post(&request.url)
            .headers(build_headers(&request.api_key)?)
            .json(&payload)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;
        let response = ensure_success(response).await?;

        let data: ChatCompletionResponse = response.json().await.map_err(classify)?;
        Ok(data.into_content())
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ChatError> {
        let payload = ChatCompletionPayload {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(true),
        };

        info!("POST {} (model {}, streaming)", request.url, request.model);
        // 串流請求刻意不設逾時，只在取消或伺服器結束串流時終止。
        let response = self
            .client
            .post(&request.url)
            .headers(build_headers(&request.api_key)?)
            .json(&payload)
            .send()
            .await
            .map_err(classify)?;
        let response = ensure_success(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(classify));
        Ok(Box::pin(stream))
    }
}

/// 正規化端點 URL：命中閘道規則時改走代理，並確保以 `/chat/completions` 結尾。
pub fn normalize_url(base_url: &str, rewrites: &[GatewayRewrite]) -> String {
    let base_url = base_url.trim();
    let api_url = rewrites
        .iter()
        .find(|rule| !rule.host.is_empty() && base_url.contains(&rule.host))
        .map(|rule| {
            debug!("Rewriting gateway URL {} to {}", base_url, rule.proxy_url);
            rule.proxy_url.as_str()
        })
        .unwrap_or(base_url);

    if api_url.contains(COMPLETIONS_PATH) {
        api_url.to_string()
    } else {
        format!("{}{}", api_url.trim_end_matches('/'), COMPLETIONS_PATH)
    }
}

/// 建構 Bearer 授權與 JSON 內容類型標頭。
fn build_headers(api_key: &str) -> Result<HeaderMap, ChatError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|err| ChatError::RequestFailed(format!("無效的 API 金鑰格式: {err}")))?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// 狀態碼 >= 400 時讀出原始錯誤內容並轉成 `ApiError`。
async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        warn!("Completion endpoint returned {}: {}", status, body);
        return Err(ChatError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    debug!("Completion endpoint returned {}", status);
    Ok(response)
}

fn classify(err: reqwest::Error) -> ChatError {
    let classified = ChatError::from(err);
    debug!("Transport error: {classified:?}");
    classified
}
