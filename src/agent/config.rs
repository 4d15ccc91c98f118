use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// 智能體設定的頂層結構，從 `config/agents.toml` 或 `config/agents.json` 載入。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    /// 依群組排列的智能體。
    #[serde(default)]
    pub agents: Vec<AgentGroup>,
    /// 請求相關的共用選項。
    #[serde(default)]
    pub client: ClientOptions,
}

impl AgentSettings {
    /// 從指定的工作區目錄讀取設定。
    ///
    /// 優先讀取 `config/agents.toml`，其次是桌面版使用的 `config/agents.json`。
    /// 兩者皆不存在時回傳空的設定，之後的查找都會得到 `AgentNotFound`。
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_dir = workspace_root.join("config");
        let toml_path = config_dir.join("agents.toml");
        let json_path = config_dir.join("agents.json");

        let parsed = if toml_path.exists() {
            let raw = fs::read_to_string(&toml_path)
                .with_context(|| format!("讀取智能體設定失敗: {}", toml_path.display()))?;
            Self::from_toml_str(&raw)
                .with_context(|| format!("解析智能體設定失敗: {}", toml_path.display()))?
        } else if json_path.exists() {
            let raw = fs::read_to_string(&json_path)
                .with_context(|| format!("讀取智能體設定失敗: {}", json_path.display()))?;
            Self::from_json_str(&raw)
                .with_context(|| format!("解析智能體設定失敗: {}", json_path.display()))?
        } else {
            warn!(
                "No agent configuration found under {}, starting with an empty agent list",
                config_dir.display()
            );
            Self::default()
        };

        let settings = parsed.normalize(workspace_root);
        debug!(
            "Loaded {} agent(s) in {} group(s)",
            settings.agent_count(),
            settings.agents.len()
        );
        Ok(settings)
    }

    /// 解析 TOML 格式的設定內容。
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// 解析 JSON 格式的設定內容。
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// 將相對的技能根目錄轉為相對於工作區根目錄的絕對路徑。
    fn normalize(mut self, workspace_root: &Path) -> Self {
        if self.client.skills_root.is_relative() {
            self.client.skills_root = workspace_root.join(&self.client.skills_root);
        }
        self
    }

    /// 所有群組。
    pub fn groups(&self) -> &[AgentGroup] {
        &self.agents
    }

    /// 依設定順序攤平所有群組中的智能體。
    pub fn profiles(&self) -> impl Iterator<Item = &AgentProfile> {
        self.agents.iter().flat_map(|group| group.agents.iter())
    }

    /// 根據 ID 尋找智能體。
    pub fn profile(&self, id: &str) -> Option<&AgentProfile> {
        self.profiles().find(|profile| profile.id == id)
    }

    fn agent_count(&self) -> usize {
        self.agents.iter().map(|group| group.agents.len()).sum()
    }
}

/// 一組在側邊欄中並列顯示的智能體。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGroup {
    pub group_name: String,
    #[serde(default)]
    pub agents: Vec<AgentProfile>,
}

/// 描述一個智能體的完整設定。
///
/// 在一次對話回合中不可變。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// 唯一的識別碼。
    pub id: String,
    /// 顯示名稱，同時用於系統提示詞。
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: String,
    /// 綁定的 chat-completions 端點。
    #[serde(default)]
    pub config: EndpointConfig,
    /// 有序的技能列表。
    #[serde(default)]
    pub skills: Vec<SkillRef>,
}

impl AgentProfile {
    /// 第一個技能的名稱；非串流回應沒有技能標記時以此作為預設值。
    pub fn default_skill(&self) -> Option<&str> {
        self.skills.first().map(|skill| skill.name.as_str())
    }

    /// 根據名稱尋找技能。
    pub fn skill(&self, name: &str) -> Option<&SkillRef> {
        self.skills.iter().find(|skill| skill.name == name)
    }
}

/// chat-completions 端點設定。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// API 的基礎 URL，可包含或省略 `/chat/completions`。
    #[serde(default)]
    pub url: String,
    /// 直接在設定中指定的 API 金鑰。
    #[serde(default)]
    pub api_key: String,
    /// 用於讀取 API 金鑰的環境變數名稱。
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub model: String,
}

impl EndpointConfig {
    /// 解析並回傳最終的 API 金鑰。
    /// 優先順序：`api_key` 欄位 > `api_key_env` 環境變數。空字串視為未設定。
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            Some(self.api_key.clone())
        } else if let Some(var) = &self.api_key_env {
            env::var(var).ok().filter(|value| !value.trim().is_empty())
        } else {
            None
        }
    }

    /// 端點 URL 是否有設定。
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// 技能參照。描述文字可直接寫在設定中，或由 `storage_path` 指向的 `SKILL.md` 取得。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub storage_path: String,
    #[serde(default)]
    pub version: String,
}

/// 所有請求共用的選項。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 只套用於非串流請求；串流請求沒有逾時。
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// `{skills_root}/{skill}/SKILL.md` 的根目錄。
    #[serde(default = "default_skills_root")]
    pub skills_root: PathBuf,
    /// 設定後改由 `{skills_base_url}/skills/{技能}/SKILL.md` 以 HTTP 取得技能文件。
    #[serde(default)]
    pub skills_base_url: Option<String>,
    /// 命中特定閘道主機時改走本地代理。
    #[serde(default)]
    pub gateway_rewrites: Vec<GatewayRewrite>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_timeout_secs(),
            skills_root: default_skills_root(),
            skills_base_url: None,
            gateway_rewrites: Vec::new(),
        }
    }
}

/// 閘道改寫規則：URL 含有 `host` 時改用 `proxy_url`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRewrite {
    pub host: String,
    pub proxy_url: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_skills_root() -> PathBuf {
    PathBuf::from("skills")
}
