//! 系統提示詞的組裝。純函式，不做任何 I/O。

use super::config::AgentProfile;
use super::skills::SkillDescriptions;

/// 技能區塊的標記格式，模型回覆時也會沿用同樣的括號寫法。
pub const SKILL_MARKER_OPEN: &str = "【技能: ";
pub const SKILL_MARKER_CLOSE: &str = "】";

/// 根據智能體的身分與已解析的技能描述組出系統提示詞。
///
/// 沒有描述的技能直接略過，不會阻擋提示詞的產生。
pub fn build_system_prompt(agent: &AgentProfile, descriptions: &SkillDescriptions) -> String {
    let skill_blocks: Vec<String> = agent
        .skills
        .iter()
        .filter_map(|skill| {
            descriptions.get(&skill.name).map(|desc| {
                format!("{SKILL_MARKER_OPEN}{}{SKILL_MARKER_CLOSE}\n{}", skill.name, desc)
            })
        })
        .collect();

    let mut prompt = format!("你是 {}。{}\n\n", agent.name, agent.description);

    if !skill_blocks.is_empty() {
        prompt.push_str("你可以使用以下技能：\n\n");
        prompt.push_str(&skill_blocks.join("\n\n"));
        prompt.push_str("\n\n");
        prompt.push_str("當使用者請求涉及技能相關內容時，請自動呼叫相應技能。\n");
    }

    prompt
}

/// 技能執行器使用的系統提示詞。
pub fn build_skill_executor_prompt(
    skill_name: &str,
    description: &str,
    parameters: &serde_json::Value,
) -> String {
    format!(
        "你是一個技能執行器。請根據以下技能描述執行使用者的請求。\n\n技能: {skill_name}\n{description}\n\n使用者請求參數: {parameters}"
    )
}

/// 技能執行時送出的使用者訊息。
pub fn build_skill_user_message(skill_name: &str, parameters: &serde_json::Value) -> String {
    format!("請執行技能 {skill_name}，參數: {parameters}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::{EndpointConfig, SkillRef};

    fn agent(skills: &[&str]) -> AgentProfile {
        AgentProfile {
            id: "a1".into(),
            name: "公文助手".into(),
            description: "協助撰寫公文".into(),
            avatar: None,
            kind: String::new(),
            config: EndpointConfig::default(),
            skills: skills
                .iter()
                .map(|name| SkillRef {
                    name: (*name).into(),
                    description: String::new(),
                    kind: String::new(),
                    storage_path: format!("./skills/{name}"),
                    version: "1.0".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn prompt_without_skills_is_only_the_preamble() {
        let prompt = build_system_prompt(&agent(&[]), &SkillDescriptions::default());
        assert_eq!(prompt, "你是 公文助手。協助撰寫公文\n\n");
        assert!(!prompt.contains("技能"));
    }

    #[test]
    fn skills_without_descriptions_are_skipped() {
        let descriptions = SkillDescriptions::from_pairs([("polish", "潤飾文字時使用")]);
        let prompt = build_system_prompt(&agent(&["polish", "unknown"]), &descriptions);
        assert!(prompt.contains("【技能: polish】\n潤飾文字時使用"));
        assert!(!prompt.contains("unknown"));
        assert!(prompt.ends_with("請自動呼叫相應技能。\n"));
    }

    #[test]
    fn skill_blocks_follow_agent_order() {
        let descriptions = SkillDescriptions::from_pairs([("b", "second"), ("a", "first")]);
        let prompt = build_system_prompt(&agent(&["a", "b"]), &descriptions);
        let a = prompt.find("【技能: a】").unwrap();
        let b = prompt.find("【技能: b】").unwrap();
        assert!(a < b);
    }

    #[test]
    fn executor_prompt_embeds_parameters_as_json() {
        let params = serde_json::json!({"text": "x"});
        let prompt = build_skill_executor_prompt("polish", "desc", &params);
        assert!(prompt.contains("技能: polish\ndesc"));
        assert!(prompt.ends_with("使用者請求參數: {\"text\":\"x\"}"));
        assert_eq!(
            build_skill_user_message("polish", &params),
            "請執行技能 polish，參數: {\"text\":\"x\"}"
        );
    }
}
