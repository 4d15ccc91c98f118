//! `providers` 模組負責與 chat-completions 端點的實際通訊。
//!
//! 傳輸層實作 `CompletionTransport` trait，並把所有傳輸失敗轉成帶標籤的
//! `ChatError`，上層不需要再檢查原始的例外物件。

/// `http` 模組：透過 `reqwest` 發出請求的預設實作。
pub mod http;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::agent::ChatError;
use crate::agent::config::{AgentProfile, ClientOptions};
use crate::agent::message::ChatMessage;

/// 串流回應的原始位元組序列。丟棄它即釋放底層連線。
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ChatError>> + Send>>;

/// 一次 chat-completions 呼叫所需的全部資料。
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// 已正規化、以 `/chat/completions` 結尾的完整 URL。
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// 非串流呼叫的用戶端逾時。串流呼叫不使用。
    pub timeout: Duration,
}

impl CompletionRequest {
    /// 依照智能體與共用選項建立請求。
    pub fn for_agent(
        agent: &AgentProfile,
        api_key: String,
        messages: Vec<ChatMessage>,
        options: &ClientOptions,
    ) -> Self {
        Self {
            url: http::normalize_url(&agent.config.url, &options.gateway_rewrites),
            api_key,
            model: agent.config.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: Some(options.max_tokens),
            timeout: Duration::from_secs(options.request_timeout_secs),
        }
    }
}

/// 所有傳輸實作都必須遵守的行為介面。
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// 回傳此傳輸的名稱，用於日誌記錄。
    fn name(&self) -> &str;

    /// 單次呼叫，回傳 `choices[0].message.content`（缺少時為空字串）。
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError>;

    /// 串流呼叫，回傳原始位元組序列。狀態碼 >= 400 時在這裡就失敗。
    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ChatError>;
}
