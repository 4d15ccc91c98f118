use super::markers::ParsedContent;

/// 對話中單一可顯示的條目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPanelEntry {
    /// 使用者輸入的訊息。
    UserPrompt { prompt: String },
    /// 智能體的回覆，已拆分出思考內容與技能標記。
    Response(ParsedContent),
    /// 失敗的回合，保存人類可讀的錯誤訊息。
    Error { detail: String },
}

impl AgentPanelEntry {
    /// 從不同類型的條目中取出要顯示的主要文字。
    pub fn text(&self) -> &str {
        match self {
            AgentPanelEntry::UserPrompt { prompt } => prompt,
            AgentPanelEntry::Response(parsed) => &parsed.main_content,
            AgentPanelEntry::Error { detail } => detail,
        }
    }
}

/// 已顯示的對話歷史。核心本身不持久化它，只在重試時讀取。
#[derive(Debug, Default)]
pub struct AgentConversation {
    entries: Vec<AgentPanelEntry>,
}

impl AgentConversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 回傳對話條目列表的不可變切片。
    pub fn entries(&self) -> &[AgentPanelEntry] {
        &self.entries
    }

    pub fn push(&mut self, entry: AgentPanelEntry) {
        self.entries.push(entry);
    }

    pub fn push_user(&mut self, prompt: impl Into<String>) {
        self.push(AgentPanelEntry::UserPrompt {
            prompt: prompt.into(),
        });
    }

    /// 由後往前找到最近一則使用者訊息。
    pub fn last_user_message(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match entry {
            AgentPanelEntry::UserPrompt { prompt } => Some(prompt.as_str()),
            _ => None,
        })
    }
}
