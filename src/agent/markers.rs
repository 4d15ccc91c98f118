//! 從模型輸出中分離思考區塊、技能啟用標記與主要內容。

use std::sync::LazyLock;

use regex::Regex;

static THINK_REGION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<think(?:ing)?>(.*?)</think(?:ing)?>").expect("think region pattern")
});

static SKILL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)【\s*(?:技能|skill)\s*[:：]\s*([^】]+?)\s*】(?:[ \t]*\n?[ \t]*(?:已激活|已啟用|已启用|already[- ]activated|activated)[ \t]*(?:\r?\n|\z))?",
    )
    .expect("skill marker pattern")
});

static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)^[ \t]*(?:thinking|analysis|reasoning)[ \t]*:.*?(?:\n[ \t]*\n|\z)")
        .expect("reasoning block pattern")
});

/// 對累積文字的解析結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedContent {
    /// 思考區塊的內文，已還原 HTML 實體並去除頭尾空白。
    pub thinking_content: Option<String>,
    /// 由技能標記取得的技能名稱。
    pub skill_activated: Option<String>,
    /// 去掉標記與思考內容後要顯示的文字；不會是空字串，除非原文本身就是空的。
    pub main_content: String,
}

impl ParsedContent {
    /// 對完整文字做最後一次解析。`default_skill` 只在文字中沒有技能標記時使用。
    pub fn parse(full_text: &str, default_skill: Option<&str>) -> Self {
        let skill_activated = extract_skill(full_text).or_else(|| default_skill.map(str::to_string));
        Self {
            thinking_content: extract_thinking(full_text),
            skill_activated,
            main_content: derive_main_content(full_text),
        }
    }
}

/// 取出所有已關閉的思考區塊，以空行連接。尚未收到結尾標籤的區塊不計入。
pub fn extract_thinking(text: &str) -> Option<String> {
    let regions: Vec<String> = THINK_REGION
        .captures_iter(text)
        .map(|captures| unescape_entities(&captures[1]).trim().to_string())
        .filter(|region| !region.is_empty())
        .collect();
    if regions.is_empty() {
        None
    } else {
        Some(regions.join("\n\n"))
    }
}

/// 取出 `【技能: NAME】` 標記中的技能名稱。
pub fn extract_skill(text: &str) -> Option<String> {
    SKILL_MARKER
        .captures(text)
        .map(|captures| captures[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

/// 移除技能標記、思考區塊與 `reasoning:` 之類的段落。結果為空時退回原文。
pub fn derive_main_content(full_text: &str) -> String {
    let without_marker = SKILL_MARKER.replace_all(full_text, "");
    let without_thinking = THINK_REGION.replace_all(&without_marker, "");
    let without_reasoning = REASONING_BLOCK.replace_all(&without_thinking, "");
    let main = without_reasoning.trim();
    if main.is_empty() {
        full_text.to_string()
    } else {
        main.to_string()
    }
}

fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// 串流期間的增量解析狀態。
///
/// 每收到一段內容就以累積文字呼叫 [`MarkerExtractor::update`]，串流結束時呼叫
/// [`MarkerExtractor::finalize`]。
#[derive(Debug, Default)]
pub struct MarkerExtractor {
    thinking: Option<String>,
}

impl MarkerExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重新解析思考區塊；內容有變化時回傳新的思考內容。
    pub fn update(&mut self, accumulated: &str) -> Option<&str> {
        let latest = extract_thinking(accumulated);
        if latest.is_some() && latest != self.thinking {
            self.thinking = latest;
            self.thinking.as_deref()
        } else {
            None
        }
    }

    pub fn finalize(&mut self, full_text: &str, default_skill: Option<&str>) -> ParsedContent {
        let parsed = ParsedContent::parse(full_text, default_skill);
        self.thinking = parsed.thinking_content.clone();
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_region_is_unescaped_and_trimmed() {
        let text = "<think>A &lt;b&gt; C</think>answer";
        assert_eq!(extract_thinking(text).as_deref(), Some("A <b> C"));
        assert_eq!(
            extract_thinking("<THINKING>\n x &amp;&amp; y \n</Thinking>").as_deref(),
            Some("x && y")
        );
    }

    #[test]
    fn unclosed_thinking_region_yields_nothing() {
        assert_eq!(extract_thinking("<think>still going"), None);
        assert_eq!(extract_thinking("plain"), None);
    }

    #[test]
    fn skill_marker_is_extracted_and_removed() {
        let parsed = ParsedContent::parse("【技能: Foo】already-activated\nHello", None);
        assert_eq!(parsed.skill_activated.as_deref(), Some("Foo"));
        assert_eq!(parsed.main_content, "Hello");

        let parsed = ParsedContent::parse("【技能：公文優化】已激活\n\n已完成潤飾。", Some("other"));
        assert_eq!(parsed.skill_activated.as_deref(), Some("公文優化"));
        assert_eq!(parsed.main_content, "已完成潤飾。");
    }

    #[test]
    fn every_thinking_region_is_kept() {
        let parsed = ParsedContent::parse("<think>first</think>Answer.\n<think>second</think>", None);
        assert_eq!(parsed.thinking_content.as_deref(), Some("first\n\nsecond"));
        assert_eq!(parsed.main_content, "Answer.");
    }

    #[test]
    fn activated_prose_on_next_line_is_not_an_annotation() {
        let parsed = ParsedContent::parse("【技能: Foo】\nActivated carbon filters water.", None);
        assert_eq!(parsed.skill_activated.as_deref(), Some("Foo"));
        assert_eq!(parsed.main_content, "Activated carbon filters water.");

        let annotated = ParsedContent::parse("【技能: Foo】\nactivated\nBody", None);
        assert_eq!(annotated.main_content, "Body");
    }

    #[test]
    fn default_skill_applies_without_marker() {
        let parsed = ParsedContent::parse("Hello", Some("polish"));
        assert_eq!(parsed.skill_activated.as_deref(), Some("polish"));
        assert_eq!(ParsedContent::parse("Hello", None).skill_activated, None);
    }

    #[test]
    fn main_content_strips_thinking_and_reasoning_blocks() {
        let text = "<think>plan</think>\nReasoning: first I will\nconsider things\n\nThe answer is 42.";
        let parsed = ParsedContent::parse(text, None);
        assert_eq!(parsed.thinking_content.as_deref(), Some("plan"));
        assert_eq!(parsed.main_content, "The answer is 42.");

        let trailing = ParsedContent::parse("Answer first.\nanalysis: trailing notes", None);
        assert_eq!(trailing.main_content, "Answer first.");
    }

    #[test]
    fn empty_main_content_falls_back_to_full_text() {
        let text = "<think>only thoughts</think>";
        let parsed = ParsedContent::parse(text, None);
        assert_eq!(parsed.main_content, text);
        assert_eq!(parsed.thinking_content.as_deref(), Some("only thoughts"));
    }

    #[test]
    fn final_parse_is_idempotent() {
        let text = "【skill: Foo】\n<think>a &amp; b</think>\nthinking: x\n\nbody";
        let first = ParsedContent::parse(text, Some("d"));
        let second = ParsedContent::parse(text, Some("d"));
        assert_eq!(first, second);
        assert_eq!(first.main_content, "body");
    }

    #[test]
    fn incremental_updates_report_only_changes() {
        let mut extractor = MarkerExtractor::new();
        let mut text = String::from("<think>par");
        assert_eq!(extractor.update(&text), None);
        text.push_str("tial</think>");
        assert_eq!(extractor.update(&text), Some("partial"));
        text.push_str(" more answer");
        assert_eq!(extractor.update(&text), None);
        text.push_str("<think>second</think>");
        assert_eq!(extractor.update(&text), Some("partial\n\nsecond"));

        let parsed = extractor.finalize(&text, None);
        assert_eq!(parsed.main_content, "more answer");
        assert_eq!(parsed.thinking_content.as_deref(), Some("partial\n\nsecond"));
    }
}
