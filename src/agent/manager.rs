use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::agent::ChatError;
use crate::agent::config::{AgentProfile, AgentSettings};
use crate::agent::markers::{MarkerExtractor, extract_skill};
use crate::agent::message::{ChatMessage, ChatResult};
use crate::agent::prompt::{
    build_skill_executor_prompt, build_skill_user_message, build_system_prompt,
};
use crate::agent::providers::http::HttpTransport;
use crate::agent::providers::{CompletionRequest, CompletionTransport};
use crate::agent::session::AgentConversation;
use crate::agent::skills::{FsSkillSource, HttpSkillSource, SkillResolver, SkillSource};
use crate::agent::stream::{FrameStream, ProtocolFrame};

/// 技能執行器使用的溫度。
const SKILL_TEMPERATURE: f32 = 0.1;

/// 串流呼叫的回呼介面。
///
/// `on_chunk` 收到的是原始增量而非累積內容；`on_done` 收到完整的累積文字，
/// 主要內容/思考/技能的拆分由呼叫端自行處理。取消時三者都不會被呼叫。
pub trait StreamHandler: Send {
    fn on_chunk(&mut self, delta: &str);

    /// 已關閉的思考區塊內容有變化時呼叫。
    fn on_thinking(&mut self, _thinking: &str) {}

    fn on_done(&mut self, full_text: &str);

    fn on_error(&mut self, message: &str);
}

/// 一次聊天回合所處的階段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

/// 聊天核心的對外介面。
///
/// `ChatSession` 負責：
/// - 依 ID 查找智能體並檢查端點設定。
/// - 組出系統提示詞並透過 `CompletionTransport` 發出請求。
/// - 解碼串流回應、增量解析標記，並以回呼通知呼叫端。
///
/// 同一個 session 同時間只應有一個進行中的請求，由呼叫端自行序列化。
pub struct ChatSession {
    settings: AgentSettings,
    skills: SkillResolver,
    transport: Arc<dyn CompletionTransport>,
    state: Mutex<SessionState>,
    cancel: Mutex<CancellationToken>,
}

impl ChatSession {
    pub fn new(
        settings: AgentSettings,
        transport: Arc<dyn CompletionTransport>,
        skill_source: Arc<dyn SkillSource>,
    ) -> Self {
        Self {
            settings,
            skills: SkillResolver::new(skill_source),
            transport,
            state: Mutex::new(SessionState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// 從工作區載入設定，使用 HTTP 傳輸。技能文件預設從本機技能目錄讀取，
    /// 設定了 `skills_base_url` 時改走 HTTP。
    pub fn from_workspace(workspace_root: &Path) -> Result<Self, ChatError> {
        let settings = AgentSettings::load(workspace_root)
            .map_err(|err| ChatError::Config(format!("{err:#}")))?;
        let skill_source: Arc<dyn SkillSource> = match &settings.client.skills_base_url {
            Some(base_url) => Arc::new(HttpSkillSource::new(base_url.clone())),
            None => Arc::new(FsSkillSource::new(settings.client.skills_root.clone())),
        };
        Ok(Self::new(settings, Arc::new(HttpTransport::new()), skill_source))
    }

    /// 預先解析所有智能體的技能描述，回傳成功解析的數量。
    pub async fn load_skills(&self) -> usize {
        let loaded = self.skills.load_all(self.settings.profiles()).await;
        info!("Loaded {} skill description(s)", loaded);
        loaded
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// 所有智能體，依設定順序攤平。
    pub fn agents(&self) -> impl Iterator<Item = &AgentProfile> {
        self.settings.profiles()
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentProfile> {
        self.settings.profile(agent_id)
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// 要求停止目前的串流。不會觸發任何回呼。
    pub fn cancel(&self) {
        let token = lock(&self.cancel);
        if !token.is_cancelled() {
            info!("Cancelling active completion stream");
            token.cancel();
        }
    }

    /// 非串流呼叫。錯誤一律放在 `ChatResult::error` 中回傳。
    pub async fn send(&self, agent_id: &str, message: &str) -> ChatResult {
        self.set_state(SessionState::Sending);
        let (agent, api_key) = match self.resolve_agent(agent_id) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("Rejected send to {}: {}", agent_id, err);
                self.set_state(SessionState::Failed);
                return ChatResult::failure(agent_id, &err);
            }
        };

        let messages = self.build_messages(agent, message).await;
        let request = CompletionRequest::for_agent(agent, api_key, messages, &self.settings.client);
        debug!("Sending to {} via {} transport", agent_id, self.transport.name());

        match self.transport.complete(&request).await {
            Ok(content) => {
                let skill_used =
                    extract_skill(&content).or_else(|| agent.default_skill().map(str::to_string));
                debug!("Received {} char(s) from {}", content.chars().count(), agent_id);
                self.set_state(SessionState::Completed);
                ChatResult::success(agent_id, content, skill_used)
            }
            Err(err) => {
                error!("Chat request to {} failed: {}", agent_id, err);
                self.set_state(SessionState::Failed);
                ChatResult::failure(agent_id, &err)
            }
        }
    }

    /// 串流呼叫。結果只透過 `handler` 回報：每段增量呼叫 `on_chunk`，
    /// 結束時呼叫一次 `on_done` 或 `on_error`；被取消則都不呼叫。
    pub async fn stream(&self, agent_id: &str, message: &str, handler: &mut dyn StreamHandler) {
        let token = self.reset_cancellation();
        self.set_state(SessionState::Sending);

        let (agent, api_key) = match self.resolve_agent(agent_id) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("Rejected stream to {}: {}", agent_id, err);
                self.fail(handler, &err);
                return;
            }
        };

        let messages = self.build_messages(agent, message).await;
        let request = CompletionRequest::for_agent(agent, api_key, messages, &self.settings.client);
        debug!("Streaming from {} via {} transport", agent_id, self.transport.name());

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.transport.stream(&request) => Some(result),
        };
        let bytes = match opened {
            None => {
                self.finish_cancelled(0);
                return;
            }
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                error!("Opening stream to {} failed: {}", agent_id, err);
                self.fail(handler, &err);
                return;
            }
        };

        self.set_state(SessionState::Streaming);
        let mut frames = FrameStream::new(bytes);
        let mut accumulated = String::new();
        let mut extractor = MarkerExtractor::new();
        let mut delivered = 0usize;

        loop {
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                next = frames.next_frame() => Some(next),
            };
            match step {
                None => {
                    // 丟棄 frame 序列即釋放底層連線。
                    drop(frames);
                    self.finish_cancelled(delivered);
                    return;
                }
                Some(Some(Ok(ProtocolFrame::Delta(delta)))) => {
                    accumulated.push_str(&delta);
                    delivered += 1;
                    handler.on_chunk(&delta);
                    if let Some(thinking) = extractor.update(&accumulated) {
                        handler.on_thinking(thinking);
                    }
                }
                Some(Some(Ok(ProtocolFrame::Done))) | Some(None) => break,
                Some(Some(Err(err))) => {
                    error!("Stream from {} broke after {} chunk(s): {}", agent_id, delivered, err);
                    self.fail(handler, &err);
                    return;
                }
            }
        }

        let parsed = extractor.finalize(&accumulated, None);
        debug!(
            "Stream from {} completed: {} chunk(s), thinking: {}, skill: {:?}",
            agent_id,
            delivered,
            parsed.thinking_content.is_some(),
            parsed.skill_activated
        );
        self.set_state(SessionState::Completed);
        handler.on_done(&accumulated);
    }

    /// 以對話中最近一則使用者訊息重新串流。找不到使用者訊息時不做任何事並回傳 `false`。
    pub async fn retry(
        &self,
        agent_id: &str,
        conversation: &AgentConversation,
        handler: &mut dyn StreamHandler,
    ) -> bool {
        let Some(message) = conversation.last_user_message() else {
            debug!("Retry requested for {} without any user message", agent_id);
            return false;
        };
        self.stream(agent_id, message, handler).await;
        true
    }

    /// 直接執行智能體上的某個技能，回傳模型輸出。
    pub async fn call_skill(
        &self,
        agent_id: &str,
        skill_name: &str,
        parameters: &serde_json::Value,
    ) -> Result<String, ChatError> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| ChatError::AgentNotFound(agent_id.to_string()))?;
        let skill = agent
            .skill(skill_name)
            .ok_or_else(|| ChatError::SkillNotFound(skill_name.to_string()))?;
        let (agent, api_key) = self.resolve_agent(agent_id)?;

        let description = self.skills.resolve(skill).await.unwrap_or_default();
        let messages = vec![
            ChatMessage::system(build_skill_executor_prompt(skill_name, &description, parameters)),
            ChatMessage::user(build_skill_user_message(skill_name, parameters)),
        ];
        let mut request =
            CompletionRequest::for_agent(agent, api_key, messages, &self.settings.client);
        request.temperature = SKILL_TEMPERATURE;
        request.max_tokens = None;

        info!("Invoking skill {} on {}", skill_name, agent_id);
        self.transport.complete(&request).await
    }

    /// 查找智能體並確認端點 URL 與金鑰都已設定。
    fn resolve_agent(&self, agent_id: &str) -> Result<(&AgentProfile, String), ChatError> {
        let agent = self
            .agent(agent_id)
            .ok_or_else(|| ChatError::AgentNotFound(agent_id.to_string()))?;
        if !agent.config.has_url() {
            return Err(ChatError::MissingCredentials(agent.name.clone()));
        }
        let api_key = agent
            .config
            .resolved_api_key()
            .ok_or_else(|| ChatError::MissingCredentials(agent.name.clone()))?;
        Ok((agent, api_key))
    }

    /// 組出系統提示詞與使用者訊息。尚未快取的技能描述會在這裡補讀。
    async fn build_messages(&self, agent: &AgentProfile, message: &str) -> Vec<ChatMessage> {
        for skill in &agent.skills {
            self.skills.resolve(skill).await;
        }
        let descriptions = self.skills.snapshot().await;
        vec![
            ChatMessage::system(build_system_prompt(agent, &descriptions)),
            ChatMessage::user(message),
        ]
    }

    fn reset_cancellation(&self) -> CancellationToken {
        let mut current = lock(&self.cancel);
        *current = CancellationToken::new();
        current.clone()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        debug!("Session state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn fail(&self, handler: &mut dyn StreamHandler, err: &ChatError) {
        self.set_state(SessionState::Failed);
        handler.on_error(&err.to_string());
    }

    fn finish_cancelled(&self, delivered: usize) {
        info!("Stream cancelled after {} chunk(s)", delivered);
        self.set_state(SessionState::Idle);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
