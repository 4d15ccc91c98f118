use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::debug;

use skillchat::agent::markers::ParsedContent;
use skillchat::agent::{ChatSession, SessionState, StreamChunk, StreamHandler};
use skillchat::logging;

#[derive(Parser)]
#[command(author, version, about = "與設定好的智能體聊天", long_about = None)]
struct Cli {
    /// 工作區根目錄，`config/agents.toml` 與 `skills/` 由此解析
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出所有智能體與其技能
    List,
    /// 對智能體送出一則訊息
    Chat {
        agent_id: String,
        message: String,
        /// 等待完整回覆後一次輸出
        #[arg(long)]
        no_stream: bool,
        /// 只輸出原始文字，不做思考內容與技能標記的拆分
        #[arg(long)]
        raw: bool,
        /// 每段增量以一行 JSON 輸出
        #[arg(long, conflicts_with = "no_stream")]
        json: bool,
    },
    /// 直接執行某個技能
    Skill {
        agent_id: String,
        skill: String,
        /// 技能參數（JSON）
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.workspace)?;

    let session = Arc::new(ChatSession::from_workspace(&cli.workspace)?);

    match cli.command {
        Command::List => list_agents(&session),
        Command::Chat {
            agent_id,
            message,
            no_stream,
            raw,
            json,
        } => {
            session.load_skills().await;
            if no_stream {
                send_once(&session, &agent_id, &message, raw).await
            } else {
                stream_reply(session, &agent_id, &message, raw, json).await
            }
        }
        Command::Skill {
            agent_id,
            skill,
            params,
        } => {
            let parameters: serde_json::Value =
                serde_json::from_str(&params).context("--params 不是有效的 JSON")?;
            match session.call_skill(&agent_id, &skill, &parameters).await {
                Ok(output) => {
                    println!("{output}");
                    Ok(())
                }
                Err(err) if err.is_configuration() => {
                    bail!("{err}（請檢查 {} 下的 config/agents.toml）", cli.workspace.display())
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

fn list_agents(session: &ChatSession) -> Result<()> {
    let groups = session.settings().groups();
    if groups.is_empty() {
        println!("尚未設定任何智能體");
        return Ok(());
    }
    for group in groups {
        println!("{}", group.group_name);
        for agent in &group.agents {
            println!("  {} ({}) {}", agent.id, agent.name, agent.description);
            for skill in &agent.skills {
                println!("    - {}", skill.name);
            }
        }
    }
    Ok(())
}

async fn send_once(session: &ChatSession, agent_id: &str, message: &str, raw: bool) -> Result<()> {
    let result = session.send(agent_id, message).await;
    if let Some(error) = &result.error {
        bail!("{error}");
    }
    if raw {
        println!("{}", result.content);
    } else {
        let parsed = ParsedContent::parse(&result.content, result.skill_used.as_deref());
        print_parsed(&parsed);
    }
    Ok(())
}

async fn stream_reply(
    session: Arc<ChatSession>,
    agent_id: &str,
    message: &str,
    raw: bool,
    json: bool,
) -> Result<()> {
    let watcher = tokio::spawn({
        let session = session.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.cancel();
            }
        }
    });

    let default_skill = session
        .agent(agent_id)
        .and_then(|agent| agent.default_skill())
        .map(str::to_string);
    let mut printer = TerminalPrinter {
        raw,
        json,
        default_skill,
        error: None,
    };
    session.stream(agent_id, message, &mut printer).await;
    watcher.abort();

    match session.state() {
        SessionState::Idle => {
            eprintln!("\n(已取消)");
            Ok(())
        }
        _ => match printer.error {
            Some(error) => bail!("{error}"),
            None => Ok(()),
        },
    }
}

/// 把串流回呼輸出到終端機。
struct TerminalPrinter {
    raw: bool,
    json: bool,
    default_skill: Option<String>,
    error: Option<String>,
}

impl TerminalPrinter {
    fn emit_json(chunk: &StreamChunk) {
        match serde_json::to_string(chunk) {
            Ok(line) => println!("{line}"),
            Err(err) => debug!("Failed to encode chunk: {err}"),
        }
    }
}

impl StreamHandler for TerminalPrinter {
    fn on_chunk(&mut self, delta: &str) {
        if self.json {
            Self::emit_json(&StreamChunk::delta(delta));
            return;
        }
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_thinking(&mut self, thinking: &str) {
        if !self.raw && !self.json {
            eprintln!("\n[思考] {thinking}");
        }
    }

    fn on_done(&mut self, full_text: &str) {
        if self.json {
            Self::emit_json(&StreamChunk::done());
            return;
        }
        println!();
        if !self.raw {
            let parsed = ParsedContent::parse(full_text, self.default_skill.as_deref());
            println!("----");
            print_parsed(&parsed);
        }
    }

    fn on_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }
}

fn print_parsed(parsed: &ParsedContent) {
    if let Some(skill) = &parsed.skill_activated {
        println!("[技能] {skill}");
    }
    println!("{}", parsed.main_content);
}
