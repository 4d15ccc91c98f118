//! 聊天核心的錯誤分類。
//!
//! 所有錯誤的 `Display` 都是可直接呈現給使用者的訊息。

/// 聊天流程中可能發生的錯誤。
///
/// 設定類錯誤（`AgentNotFound`、`MissingCredentials`、`SkillNotFound`）在發出任何
/// 網路請求之前就會被偵測到；其餘的變體由傳輸層產生。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// 找不到指定 ID 的智能體。
    #[error("智能體 {0} 未找到")]
    AgentNotFound(String),
    /// 智能體缺少端點 URL 或 API 金鑰。
    #[error("智能體 {0} 缺少 API 設定")]
    MissingCredentials(String),
    /// 智能體未掛載指定名稱的技能。
    #[error("技能 {0} 未找到")]
    SkillNotFound(String),
    /// 尚未收到任何回應就失敗（DNS、連線被拒等）。
    #[error("網路連線失敗，請檢查網路設定（{0}）")]
    NetworkError(String),
    /// 伺服器回傳了 4xx/5xx 狀態碼。
    #[error("API 錯誤: {status} - {body}")]
    ApiError { status: u16, body: String },
    /// 非串流請求超過用戶端逾時。
    #[error("請求逾時，伺服器未在時限內回應")]
    RequestTimeout,
    /// 其他傳輸層例外。
    #[error("請求失敗: {0}")]
    RequestFailed(String),
    /// 讀取或解析設定失敗。
    #[error("設定錯誤: {0}")]
    Config(String),
}

impl ChatError {
    /// 是否為在送出請求前就能偵測到的設定/查找錯誤。
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ChatError::AgentNotFound(_)
                | ChatError::MissingCredentials(_)
                | ChatError::SkillNotFound(_)
                | ChatError::Config(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    /// 依照 `reqwest` 錯誤的種類轉成對應的變體。
    ///
    /// 帶有狀態碼的錯誤不會經過這裡：狀態碼由呼叫端先行檢查並轉成 `ApiError`。
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::RequestTimeout
        } else if err.is_connect() || err.is_request() {
            ChatError::NetworkError(err.to_string())
        } else if let Some(status) = err.status() {
            ChatError::ApiError {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            ChatError::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_message_carries_status_and_body() {
        let err = ChatError::ApiError {
            status: 429,
            body: "{\"error\":\"rate limited\"}".into(),
        };
        assert_eq!(
            err.to_string(),
            "API 錯誤: 429 - {\"error\":\"rate limited\"}"
        );
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(ChatError::AgentNotFound("a".into()).is_configuration());
        assert!(ChatError::MissingCredentials("a".into()).is_configuration());
        assert!(!ChatError::RequestTimeout.is_configuration());
        assert!(!ChatError::NetworkError("refused".into()).is_configuration());
    }
}
