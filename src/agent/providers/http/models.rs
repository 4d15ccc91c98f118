//! chat-completions 線路格式的請求與回應結構。
//!
//! 回應端的欄位一律為可選，缺少時以空字串處理。

use serde::{Deserialize, Serialize};

use crate::agent::message::ChatMessage;

#[derive(Serialize, Debug)]
pub struct ChatCompletionPayload<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// 只有串流模式會帶上此欄位。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

// --- 非串流回應 ---
#[derive(Deserialize, Debug, Default)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatCompletionChoice {
    #[serde(default)]
    pub message: Option<ChatCompletionMessage>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatCompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// `choices[0].message.content`，缺少時為空字串。
    pub fn into_content(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default()
    }
}

// --- 串流片段 ---
#[derive(Deserialize, Debug, Default)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// `choices[0].delta.content`，缺少時為空字串。
    pub fn into_delta(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_omits_stream_flag_unless_streaming() {
        let messages = vec![ChatMessage::user("hi")];
        let payload = ChatCompletionPayload {
            model: "m",
            messages: &messages,
            temperature: 0.7,
            max_tokens: Some(2000),
            stream: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("stream").is_none());
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn missing_fields_fall_back_to_empty_content() {
        let chunk: ChatCompletionChunk = serde_json::from_str(r#"{"choices":[{}]}"#).unwrap();
        assert_eq!(chunk.into_delta(), "");
        let chunk: ChatCompletionChunk = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(chunk.into_delta(), "");
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(response.into_content(), "");
    }
}
