//! 串流回應的逐行解碼。
//!
//! 伺服器送出的是以換行分隔的 `data: {json}` 行，以 `data: [DONE]` 結束。
//! 一次網路讀取可能只包含半行，所以未完成的最後一段會留在緩衝區等待下一次讀取。

use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use log::trace;

use super::ChatError;
use super::providers::http::models::ChatCompletionChunk;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// 從線路上解出的一個有效單位。可忽略或格式錯誤的行不會產生任何 frame。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFrame {
    /// 一段非空的內容增量。
    Delta(String),
    /// 串流結束。
    Done,
}

/// 推入式解碼器：餵入原始位元組，取回已完整的 frame。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// 尚未遇到換行的文字。
    buffer: String,
    /// 被讀取邊界切開、尚未湊齊的 UTF-8 位元組。
    partial_utf8: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已經產生過 `Done`，之後的輸入都會被忽略。
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 處理一次讀取到的位元組。
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ProtocolFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.decode_utf8(bytes);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return frames;
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        for line in complete.split('\n') {
            if let Some(frame) = parse_line(line) {
                let done = frame == ProtocolFrame::Done;
                frames.push(frame);
                if done {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// 串流關閉時呼叫：嘗試把殘留的內容當作最後一個 frame 解析，然後一律補上 `Done`。
    pub fn finish(&mut self) -> Vec<ProtocolFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.finished = true;

        if !self.partial_utf8.is_empty() {
            let tail = std::mem::take(&mut self.partial_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let leftover = std::mem::take(&mut self.buffer);
        if !leftover.trim().is_empty()
            && let Some(ProtocolFrame::Delta(text)) = parse_leftover(&leftover)
        {
            frames.push(ProtocolFrame::Delta(text));
        }
        frames.push(ProtocolFrame::Done);
        frames
    }

    /// 以串流方式解碼 UTF-8；不完整的結尾位元組留到下一次，無效位元組以替代字元取代。
    fn decode_utf8(&mut self, bytes: &[u8]) {
        self.partial_utf8.extend_from_slice(bytes);
        let mut input = std::mem::take(&mut self.partial_utf8);
        let mut start = 0;
        loop {
            match std::str::from_utf8(&input[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    // valid_up_to 之前的位元組已確認為合法 UTF-8。
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&input[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            input.drain(..valid_end);
                            self.partial_utf8 = input;
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// 解析單一行。非 `data: ` 開頭的行、無法解析的 JSON 與空內容都回傳 `None`。
pub fn parse_line(line: &str) -> Option<ProtocolFrame> {
    let trimmed = line.trim();
    let payload = trimmed.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        return Some(ProtocolFrame::Done);
    }
    parse_payload(payload)
}

fn parse_payload(payload: &str) -> Option<ProtocolFrame> {
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => {
            let delta = chunk.into_delta();
            if delta.is_empty() {
                None
            } else {
                Some(ProtocolFrame::Delta(delta))
            }
        }
        Err(err) => {
            trace!("Dropping unparsable stream frame ({err}): {payload}");
            None
        }
    }
}

/// 殘留內容可能是缺少換行的 `data:` 行，也可能是裸 JSON。
fn parse_leftover(leftover: &str) -> Option<ProtocolFrame> {
    let trimmed = leftover.trim();
    if trimmed.starts_with(DATA_PREFIX) {
        parse_line(trimmed)
    } else {
        parse_payload(trimmed)
    }
}

/// 拉取式的 frame 序列，包裝一個位元組串流。
///
/// 序列是惰性、有限、不可重來的；收到 `Done` 後不再讀取來源。
/// 丟棄此結構即會釋放底層串流。
pub struct FrameStream<S> {
    source: S,
    decoder: FrameDecoder,
    queue: VecDeque<ProtocolFrame>,
    terminated: bool,
}

impl<S> FrameStream<S>
where
    S: Stream<Item = Result<Vec<u8>, ChatError>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            decoder: FrameDecoder::new(),
            queue: VecDeque::new(),
            terminated: false,
        }
    }

    /// 取得下一個 frame。傳輸錯誤只會回傳一次，之後序列結束。
    pub async fn next_frame(&mut self) -> Option<Result<ProtocolFrame, ChatError>> {
        loop {
            if let Some(frame) = self.queue.pop_front() {
                return Some(Ok(frame));
            }
            if self.terminated || self.decoder.is_finished() {
                return None;
            }
            match self.source.next().await {
                Some(Ok(bytes)) => {
                    trace!("Stream read {} byte(s)", bytes.len());
                    self.queue.extend(self.decoder.push(&bytes));
                }
                Some(Err(err)) => {
                    self.terminated = true;
                    return Some(Err(err));
                }
                None => {
                    self.queue.extend(self.decoder.finish());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn data_line(content: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    async fn collect(chunks: Vec<Vec<u8>>) -> Vec<ProtocolFrame> {
        let source = stream::iter(chunks.into_iter().map(Ok::<_, ChatError>));
        let mut frames = FrameStream::new(source);
        let mut out = Vec::new();
        while let Some(frame) = frames.next_frame().await {
            out.push(frame.unwrap());
        }
        out
    }

    fn split_every(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
        bytes.chunks(size).map(<[u8]>::to_vec).collect()
    }

    #[tokio::test]
    async fn deltas_survive_arbitrary_chunking() {
        let mut wire = String::new();
        for piece in ["你好", "，", "world", " <think>x</think>"] {
            wire.push_str(&data_line(piece));
            wire.push('\n');
        }
        wire.push_str("data: [DONE]\n");

        let expected = vec![
            ProtocolFrame::Delta("你好".into()),
            ProtocolFrame::Delta("，".into()),
            ProtocolFrame::Delta("world".into()),
            ProtocolFrame::Delta(" <think>x</think>".into()),
            ProtocolFrame::Done,
        ];
        for size in [1, 2, 3, 5, 7, 13, 64, wire.len()] {
            assert_eq!(
                collect(split_every(wire.as_bytes(), size)).await,
                expected,
                "chunk size {size}"
            );
        }
    }

    #[tokio::test]
    async fn frame_split_mid_line_is_reassembled() {
        let frames = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He".to_vec(),
            b"llo\"}}]}\ndata: [DONE]\n".to_vec(),
        ])
        .await;
        assert_eq!(
            frames,
            vec![ProtocolFrame::Delta("Hello".into()), ProtocolFrame::Done]
        );
    }

    #[tokio::test]
    async fn closure_without_done_still_terminates() {
        let wire = data_line("a");
        let frames = collect(vec![wire.into_bytes()]).await;
        assert_eq!(
            frames,
            vec![ProtocolFrame::Delta("a".into()), ProtocolFrame::Done]
        );
        assert_eq!(collect(vec![]).await, vec![ProtocolFrame::Done]);
    }

    #[tokio::test]
    async fn leftover_without_newline_gets_one_parse_attempt() {
        let wire = data_line("tail");
        let without_newline = wire.trim_end().as_bytes().to_vec();
        assert_eq!(
            collect(vec![without_newline]).await,
            vec![ProtocolFrame::Delta("tail".into()), ProtocolFrame::Done]
        );

        let bare_json = br#"{"choices":[{"delta":{"content":"raw"}}]}"#.to_vec();
        assert_eq!(
            collect(vec![bare_json]).await,
            vec![ProtocolFrame::Delta("raw".into()), ProtocolFrame::Done]
        );

        assert_eq!(
            collect(vec![b"data: {\"choices\":[{\"del".to_vec()]).await,
            vec![ProtocolFrame::Done]
        );
    }

    #[tokio::test]
    async fn irrelevant_and_malformed_lines_are_ignored() {
        let wire = format!(
            ": keep-alive\n\nevent: message\n{}data: not json\ndata:{{\"choices\":[]}}\ndata: {{\"choices\":[{{\"delta\":{{}}}}]}}\n{}data: [DONE]\n",
            data_line("one"),
            data_line("two"),
        );
        assert_eq!(
            collect(vec![wire.into_bytes()]).await,
            vec![
                ProtocolFrame::Delta("one".into()),
                ProtocolFrame::Delta("two".into()),
                ProtocolFrame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn input_after_done_is_not_consumed() {
        let mut first = data_line("x");
        first.push_str("data: [DONE]\n");
        first.push_str(&data_line("ignored"));
        let frames = collect(vec![first.into_bytes(), data_line("later").into_bytes()]).await;
        assert_eq!(
            frames,
            vec![ProtocolFrame::Delta("x".into()), ProtocolFrame::Done]
        );
    }

    #[tokio::test]
    async fn crlf_lines_and_indented_prefix_are_accepted() {
        let wire = format!(
            "  {}\r\ndata: [DONE]\r\n",
            data_line("crlf").trim_end()
        );
        assert_eq!(
            collect(vec![wire.into_bytes()]).await,
            vec![ProtocolFrame::Delta("crlf".into()), ProtocolFrame::Done]
        );
    }

    #[tokio::test]
    async fn transport_error_is_surfaced_once() {
        let source = stream::iter(vec![
            Ok(data_line("ok").into_bytes()),
            Err(ChatError::RequestFailed("reset".into())),
            Ok(data_line("never").into_bytes()),
        ]);
        let mut frames = FrameStream::new(source);
        assert_eq!(
            frames.next_frame().await,
            Some(Ok(ProtocolFrame::Delta("ok".into())))
        );
        assert_eq!(
            frames.next_frame().await,
            Some(Err(ChatError::RequestFailed("reset".into())))
        );
        assert_eq!(frames.next_frame().await, None);
    }

    #[test]
    fn multibyte_characters_split_across_reads() {
        let wire = data_line("漢字");
        let bytes = wire.as_bytes();
        let idx = wire.find('漢').unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..idx]).is_empty());
        assert_eq!(
            decoder.push(&bytes[idx..]),
            vec![ProtocolFrame::Delta("漢字".into())]
        );
        assert_eq!(decoder.finish(), vec![ProtocolFrame::Done]);
        assert!(decoder.finish().is_empty());
    }
}
