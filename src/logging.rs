//! 日誌初始化。

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use log::info;

/// 工作區內 log4rs 設定檔的相對路徑。
pub const LOG_CONFIG_FILE: &str = "config/log4rs.yaml";

const DEFAULT_FILTER: &str = "info";

static INITIALISED: OnceLock<LogBackend> = OnceLock::new();

/// 實際啟用的日誌後端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogBackend {
    /// 由設定檔載入的 log4rs。
    Log4rs(PathBuf),
    /// 輸出到 stderr 的 env_logger，可由 `RUST_LOG` 覆寫過濾等級。
    EnvLogger,
}

/// 初始化全域 logger。重複呼叫時直接回傳第一次的結果。
pub fn init(workspace_root: &Path) -> Result<LogBackend> {
    if let Some(backend) = INITIALISED.get() {
        return Ok(backend.clone());
    }

    let config_path = workspace_root.join(LOG_CONFIG_FILE);
    let backend = if config_path.is_file() {
        log4rs::init_file(&config_path, Default::default())
            .with_context(|| format!("無法載入日誌設定 {}", config_path.display()))?;
        LogBackend::Log4rs(config_path)
    } else {
        // 其他程式碼（例如測試）可能已經設定過 logger，這時沿用它。
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(DEFAULT_FILTER),
        )
        .try_init();
        LogBackend::EnvLogger
    };

    let backend = INITIALISED.get_or_init(|| backend).clone();
    info!("Logging initialised with {:?}", backend);
    Ok(backend)
}
