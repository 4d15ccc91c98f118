use serde::{Deserialize, Serialize};

use super::ChatError;

/// 對話訊息的角色。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 送往 chat-completions 端點的單則訊息。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 非串流呼叫的結果。
///
/// 傳輸錯誤不會往外丟，而是放在 `error` 欄位中，`content` 此時為空字串。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatResult {
    /// 模型回覆的完整文字。
    pub content: String,
    /// 本次回覆使用的技能（可選）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_used: Option<String>,
    pub agent_id: String,
    /// 人類可讀的錯誤訊息（可選）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResult {
    /// 建立一個成功的結果。
    pub fn success(
        agent_id: impl Into<String>,
        content: impl Into<String>,
        skill_used: Option<String>,
    ) -> Self {
        Self {
            content: content.into(),
            skill_used,
            agent_id: agent_id.into(),
            error: None,
        }
    }

    /// 建立一個只帶錯誤訊息的結果。
    pub fn failure(agent_id: impl Into<String>, err: &ChatError) -> Self {
        Self {
            content: String::new(),
            skill_used: None,
            agent_id: agent_id.into(),
            error: Some(err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 串流輸出的單一片段：一段內容增量，或是結束旗標。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
        }
    }
}
