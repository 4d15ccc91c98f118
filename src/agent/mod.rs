//! 智能體聊天核心。
//!
//! 此模組負責：組裝系統提示詞、解析技能描述、發出 chat-completions 請求、
//! 解碼串流回應並從中分離思考內容與技能標記，最後經由 `ChatSession`
//! 以回呼的方式交給呼叫端。

/// `config` 模組：`agents.toml` / `agents.json` 的解析格式，
/// 包含智能體分組、端點設定與共用的客戶端選項。
pub mod config;

/// `error` 模組：對呼叫端可見的錯誤分類 `ChatError`。
pub mod error;

/// `manager` 模組：提供 `ChatSession`，負責單一聊天回合的狀態轉換、
/// 取消與重試。
pub mod manager;

/// `markers` 模組：思考區塊、技能標記與主要內容的拆分。
pub mod markers;

/// `message` 模組：送往端點的訊息與回傳給呼叫端的結果。
pub mod message;

pub mod prompt;

/// `providers` 模組：實際與 chat-completions 端點通訊的傳輸層。
pub mod providers;

/// `session` 模組：已顯示的對話歷史 (`AgentConversation`)，重試時使用。
pub mod session;

/// `skills` 模組：技能文件的讀取、描述擷取與快取。
pub mod skills;

/// `stream` 模組：把串流位元組解碼成 `ProtocolFrame`。
pub mod stream;

pub use error::ChatError;
pub use manager::{ChatSession, SessionState, StreamHandler};
pub use markers::ParsedContent;
pub use message::{ChatMessage, ChatResult, StreamChunk};
pub use session::{AgentConversation, AgentPanelEntry};
