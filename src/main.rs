//! LBRY 下载监控器（lbry-dm）。
//!
//! 轮询本地 lbrynet 守护进程的 JSON-RPC 接口，计算每个下载的进度 / 速度 / 剩余时间 / 状态，
//! 并提供下载管理操作（暂停、继续、全部继续、删除）、存储管理（库存、置顶）与守护进程二进制下载。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置 / 日志 / 守护进程下载等基础设施
//! - `daemon_api`：JSON-RPC 客户端与返回值解析
//! - `download`：指标估算、URI、分页、轮询循环、管理操作、存储视图
//! - `ui`：进度条与纯文本渲染

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod base_system;
mod daemon_api;
mod download;
mod ui;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::daemon_fetch::{self, DaemonSettings, FetchOutcome};
use base_system::logging::{LogOptions, LogSystem};
use daemon_api::{DaemonClient, DaemonSource};
use download::actions;
use download::storage::{self, PinTarget};
use download::uri::claim_id_from_input;
use download::poller::{
    CancelToken, CycleOutcome, PollClock, PollOptions, PollState, Poller, Shutdown, poll_once,
};
use ui::Renderer;
use ui::bars::BarRenderer;
use ui::noui::{PlainRenderer, StorageQuery, write_list, write_storage};

#[derive(Debug, Parser)]
#[command(name = "lbry-dm", version)]
#[command(about = "Download monitor for a local LBRY daemon")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 覆盖配置中的守护进程地址
    #[arg(long, global = true)]
    daemon_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 持续显示进行中或缺失数据的下载
    Watch {
        /// 逐行文本输出而不是进度条
        #[arg(long)]
        plain: bool,
        /// 紧凑显示
        #[arg(long)]
        compact: bool,
    },
    /// 打印一页下载列表
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// 包含已完成的下载
        #[arg(long)]
        all: bool,
        /// 间隔一个轮询周期取两次快照以估算速度
        #[arg(long)]
        measure: bool,
        #[arg(long)]
        compact: bool,
    },
    /// 暂停下载（参数可以是 claim_id 或 lbry:// 链接）
    Pause { claim_id: String },
    /// 继续下载
    Resume { claim_id: String },
    /// 继续所有未完成且未运行的下载
    ResumeAll,
    /// 删除下载
    Remove {
        claim_id: String,
        /// 保留下载目录中的文件
        #[arg(long)]
        keep_file: bool,
    },
    /// 查看存储库存与置顶
    Storage {
        /// 包含置顶或已保存但本地没有数据的条目
        #[arg(long)]
        all: bool,
        /// 按频道分组
        #[arg(long)]
        group: bool,
        /// 按标题 / 频道 / URI 搜索
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// 置顶（保留）内容
    Pin {
        claim: String,
        /// 参数是 sd_hash 而不是 claim
        #[arg(long)]
        sd_hash: bool,
    },
    /// 取消置顶
    Unpin {
        claim: String,
        #[arg(long)]
        sd_hash: bool,
    },
    /// 下载 lbrynet 守护进程二进制
    FetchDaemon {
        /// 目标平台（linux / mac / windows），默认读取 TARGET 环境变量或当前系统
        #[arg(long)]
        target: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();

    let watching = matches!(cli.command, Command::Watch { .. });
    let _log = init_logging(cli.debug, data_dir, watching)?;

    let config = load_config(data_dir, cli.daemon_url.as_deref())?;
    info!(target: "startup", version = env!("CARGO_PKG_VERSION"), daemon = %config.daemon_url, "lbry-dm 启动");

    match cli.command {
        Command::Watch { plain, compact } => run_watch(&config, plain, compact || config.compact),
        Command::List {
            page,
            all,
            measure,
            compact,
        } => run_list(&config, page, all, measure, compact || config.compact),
        Command::Pause { claim_id } => {
            let claim_id = claim_id_from_input(&claim_id)?;
            let client = DaemonClient::new(&config)?;
            actions::pause(&client, &claim_id).context("暂停失败")?;
            println!("已暂停 {claim_id}");
            Ok(())
        }
        Command::Resume { claim_id } => {
            let claim_id = claim_id_from_input(&claim_id)?;
            let client = DaemonClient::new(&config)?;
            actions::resume(&client, &claim_id).context("继续失败")?;
            println!("已继续 {claim_id}");
            Ok(())
        }
        Command::ResumeAll => run_resume_all(&config),
        Command::Remove {
            claim_id,
            keep_file,
        } => {
            let claim_id = claim_id_from_input(&claim_id)?;
            let client = DaemonClient::new(&config)?;
            let removed = actions::remove(&client, &claim_id, !keep_file).context("删除失败")?;
            if removed {
                println!("已删除 {claim_id}");
            } else {
                println!("守护进程未找到 {claim_id}");
            }
            Ok(())
        }
        Command::Storage {
            all,
            group,
            search,
            page,
        } => run_storage(&config, !all, group, search.unwrap_or_default(), page),
        Command::Pin { claim, sd_hash } => run_pin(&config, &claim, sd_hash, true),
        Command::Unpin { claim, sd_hash } => run_pin(&config, &claim, sd_hash, false),
        Command::FetchDaemon { target } => {
            let platform = daemon_fetch::resolve_platform(target.as_deref());
            let settings = DaemonSettings::from(&config);
            match daemon_fetch::fetch_daemon(&settings, &platform)? {
                FetchOutcome::AlreadyPresent { version } => {
                    println!("守护进程已存在 - v{version}");
                }
                FetchOutcome::Downloaded { version, path, .. } => {
                    println!("守护进程下载完成 - v{version} ({})", path.display());
                }
            }
            Ok(())
        }
    }
}

fn load_config(data_dir: Option<&Path>, daemon_url: Option<&str>) -> Result<Config> {
    let mut config = load_or_create::<Config>(data_dir)
        .map_err(|e| anyhow!(e.to_string()))?
        .with_base_dir(data_dir);
    config.apply_overrides(daemon_url);
    Ok(config)
}

fn run_watch(config: &Config, plain: bool, compact: bool) -> Result<()> {
    let client = DaemonClient::new(config)?;
    let source = DaemonSource {
        client: &client,
        page_size: config.file_list_page_size,
    };

    let (shutdown, wake) = Shutdown::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || handler.trigger()).context("install Ctrl-C handler")?;

    let mut renderer: Box<dyn Renderer> = if plain || !std::io::stderr().is_terminal() {
        Box::new(PlainRenderer::stdout(compact))
    } else {
        Box::new(BarRenderer::new(compact))
    };

    let poller = Poller::new(
        &source,
        Some(&client),
        PollOptions::from(config),
        shutdown.token(),
        wake,
    );
    let final_state = poller.run(PollState::default(), |state, outcome| {
        renderer.render(state, outcome);
    });
    renderer.finish();

    info!(
        target: "startup",
        tracked = final_state.snapshots.len(),
        "watch 已退出"
    );
    Ok(())
}

fn run_list(config: &Config, page: usize, all: bool, measure: bool, compact: bool) -> Result<()> {
    let client = DaemonClient::new(config)?;
    let source = DaemonSource {
        client: &client,
        page_size: config.file_list_page_size,
    };
    let options = PollOptions::from(config);
    let resolver = Some(&client);
    let cancel = CancelToken::default();
    let clock = PollClock::start();

    let (mut state, mut outcome) =
        poll_once(&source, resolver, PollState::default(), clock.tick(), &options, &cancel);
    if measure && outcome == CycleOutcome::Updated {
        std::thread::sleep(options.interval);
        (state, outcome) = poll_once(&source, resolver, state, clock.tick(), &options, &cancel);
    }
    if state.last_success_ms.is_none() {
        return Err(anyhow!("无法连接守护进程 {}", client.url()));
    }
    if outcome != CycleOutcome::Updated {
        warn!(target: "startup", "第二次快照失败，速度不可用");
    }

    let rows = if all {
        state.rows()
    } else {
        state.incomplete_rows()
    };
    let mut out = std::io::stdout().lock();
    write_list(&mut out, &rows, page, config.page_size, compact)?;
    Ok(())
}

fn run_resume_all(config: &Config) -> Result<()> {
    let client = DaemonClient::new(config)?;
    let snapshots = client
        .file_list(config.file_list_page_size)
        .context("获取下载列表失败")?;
    let summary = actions::resume_all(&client, &snapshots);
    println!(
        "已继续 {} 项，失败 {} 项",
        summary.started.len(),
        summary.failed.len()
    );
    for (claim_id, err) in &summary.failed {
        println!("  {claim_id}: {err}");
    }

    // refresh once so the user sees the new state
    let after = client
        .file_list(config.file_list_page_size)
        .context("刷新下载列表失败")?;
    let running = after.iter().filter(|s| s.is_running()).count();
    println!("当前运行中: {running} 项");
    Ok(())
}

fn run_storage(
    config: &Config,
    local_only: bool,
    group: bool,
    search: String,
    page: usize,
) -> Result<()> {
    let client = DaemonClient::new(config)?;
    let resolver = config.resolve_titles.then_some(&client);
    let view = storage::load_storage(&client, resolver, local_only)
        .with_context(|| format!("读取存储信息失败 {}", client.url()))?;

    let query = StorageQuery {
        search,
        group,
        page,
        page_size: config.page_size,
    };
    let mut out = std::io::stdout().lock();
    write_storage(&mut out, &view, &query)?;
    Ok(())
}

fn run_pin(config: &Config, input: &str, sd_hash: bool, pinned: bool) -> Result<()> {
    let target = if sd_hash {
        let hash = input.trim();
        if hash.is_empty() {
            return Err(anyhow!("sd_hash 不能为空"));
        }
        PinTarget::SdHash(hash.to_ascii_lowercase())
    } else {
        PinTarget::ClaimId(claim_id_from_input(input)?)
    };
    let client = DaemonClient::new(config)?;
    storage::set_pinned(&client, &target, pinned).context(if pinned {
        "置顶失败"
    } else {
        "取消置顶失败"
    })?;
    let (_, value) = target.param();
    println!("{} {value}", if pinned { "已置顶" } else { "已取消置顶" });
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>, watching: bool) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: std::io::stderr().is_terminal(),
        archive_on_exit: true,
        console: !watching,
        handle_ctrlc: !watching,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
