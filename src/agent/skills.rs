//! 技能描述的解析與快取。
//!
//! 每個技能的描述來自 `{skills_root}/{技能}/SKILL.md`：優先取 `## When to Use` 段落，
//! 其次是第一個標題，最後是原文前 500 個字元。描述以技能名稱為鍵快取，
//! 多個智能體共用同一技能時只會讀取一次。

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use reqwest::Client;
use tokio::sync::RwLock;

use super::config::{AgentProfile, SkillRef};

const SKILL_DOCUMENT: &str = "SKILL.md";
const SKILLS_PREFIX: &str = "./skills/";
const RAW_FALLBACK_CHARS: usize = 500;

static WHEN_TO_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)## When to Use").expect("when-to-use pattern"));
static NEXT_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"##\s").expect("section pattern"));
static FIRST_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s+(.+)").expect("heading pattern"));

/// 技能名稱 → 描述文字的對照表。
#[derive(Debug, Clone, Default)]
pub struct SkillDescriptions {
    entries: HashMap<String, String>,
}

impl SkillDescriptions {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// 只在鍵尚不存在時寫入；回傳最終留在表中的值。
    pub fn insert_once(&mut self, name: &str, description: String) -> &str {
        self.entries
            .entry(name.to_string())
            .or_insert(description)
            .as_str()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 技能描述文件的來源。
#[async_trait]
pub trait SkillSource: Send + Sync {
    /// 讀取指定鍵的 `SKILL.md`。文件不存在時回傳 `Ok(None)`。
    async fn fetch(&self, key: &str) -> Result<Option<String>>;
}

/// 從本機 `skills_root` 目錄讀取技能文件。
pub struct FsSkillSource {
    root: PathBuf,
}

impl FsSkillSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SkillSource for FsSkillSource {
    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        let path = self.root.join(key).join(SKILL_DOCUMENT);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("讀取技能文件失敗: {}", path.display()))?;
        Ok(Some(content))
    }
}

/// 透過 HTTP 取得 `{base_url}/skills/{key}/SKILL.md`。
pub struct HttpSkillSource {
    client: Client,
    base_url: String,
}

impl HttpSkillSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SkillSource for HttpSkillSource {
    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/skills/{}/{}",
            self.base_url.trim_end_matches('/'),
            key,
            SKILL_DOCUMENT
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("無法取得技能文件: {url}"))?;
        if !response.status().is_success() {
            debug!("Skill document {} returned {}", url, response.status());
            return Ok(None);
        }
        Ok(Some(response.text().await.context("讀取技能文件內容失敗")?))
    }
}

/// 將技能的儲存路徑轉成查找鍵：去掉 `./skills/` 或開頭的 `./`。
pub fn skill_key(storage_path: &str) -> &str {
    let key = match storage_path.find(SKILLS_PREFIX) {
        Some(idx) if storage_path.len() > idx + SKILLS_PREFIX.len() => {
            &storage_path[idx + SKILLS_PREFIX.len()..]
        }
        _ => storage_path.strip_prefix("./").unwrap_or(storage_path),
    };
    key.trim_end_matches('/')
}

/// 從技能文件中擷取「何時使用」的描述。
pub fn extract_description(document: &str) -> String {
    if let Some(label) = WHEN_TO_USE.find(document) {
        let rest = &document[label.end()..];
        let body = match NEXT_SECTION.find(rest) {
            Some(next) => &rest[..next.start()],
            None => rest,
        };
        return body.trim().to_string();
    }
    if let Some(captures) = FIRST_HEADING.captures(document) {
        return captures[1].trim().to_string();
    }
    document.chars().take(RAW_FALLBACK_CHARS).collect()
}

/// 讀取並擷取單一技能的描述。任何失敗都回傳空字串。
pub async fn resolve_description(source: &dyn SkillSource, storage_path: &str) -> String {
    let key = skill_key(storage_path);
    if key.is_empty() {
        return String::new();
    }
    match source.fetch(key).await {
        Ok(Some(document)) => extract_description(&document),
        Ok(None) => {
            debug!("Skill document for {} not found", key);
            String::new()
        }
        Err(err) => {
            warn!("Failed to load skill {}: {:#}", key, err);
            String::new()
        }
    }
}

/// 以技能名稱為鍵的唯讀穿透快取。
pub struct SkillResolver {
    source: Arc<dyn SkillSource>,
    cache: RwLock<SkillDescriptions>,
}

impl SkillResolver {
    pub fn new(source: Arc<dyn SkillSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(SkillDescriptions::default()),
        }
    }

    /// 取得技能描述；快取未命中時讀取文件並寫入快取。
    ///
    /// 文件無法取得時退回設定中的 `description`；兩者皆空則回傳 `None` 且不寫入快取。
    pub async fn resolve(&self, skill: &SkillRef) -> Option<String> {
        if let Some(desc) = self.cache.read().await.get(&skill.name) {
            return Some(desc.to_string());
        }

        let mut description = resolve_description(self.source.as_ref(), &skill.storage_path).await;
        if description.is_empty() {
            description = skill.description.trim().to_string();
        }
        if description.is_empty() {
            return None;
        }

        let mut cache = self.cache.write().await;
        Some(cache.insert_once(&skill.name, description).to_string())
    }

    /// 解析所有智能體用到的技能。每個技能名稱在一次載入中最多解析一次。
    pub async fn load_all<'a, I>(&self, agents: I) -> usize
    where
        I: IntoIterator<Item = &'a AgentProfile>,
    {
        let mut attempted = HashSet::new();
        for agent in agents {
            for skill in &agent.skills {
                if attempted.insert(skill.name.clone()) {
                    self.resolve(skill).await;
                }
            }
        }
        let loaded = self.cache.read().await.len();
        debug!(
            "Resolved {} skill description(s) out of {} distinct skill(s)",
            loaded,
            attempted.len()
        );
        loaded
    }

    /// 目前快取內容的快照。
    pub async fn snapshot(&self) -> SkillDescriptions {
        self.cache.read().await.clone()
    }
}
