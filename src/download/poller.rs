//! 轮询循环：拉取快照 → 计算指标 → 补全标题 → 提交状态 → 渲染。
//!
//! 状态（`PollState`）显式地在每一轮之间传递；一轮完成（或超时）之后才会安排下一轮，
//! 因此不存在重叠请求。取消标记在每次提交状态和渲染前检查，取消后到达的响应会被丢弃。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::metrics::{EstimatorOptions, build_rows, update_metrics};
use super::models::{DownloadRow, FileSnapshot, MetricsState, ResolvedClaim};
use super::uri::build_claim_uri;
use crate::base_system::context::Config;
use crate::daemon_api::RpcError;

pub trait SnapshotSource {
    fn list_files(&self) -> Result<Vec<FileSnapshot>, RpcError>;
}

pub trait UriResolver {
    fn resolve(&self, uris: &[String]) -> Result<HashMap<String, ResolvedClaim>, RpcError>;
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 一轮轮询的采样时间：`mono_ms` 用于速度计算，`wall_ms` 只用于记录最后成功时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub mono_ms: u64,
    pub wall_ms: u64,
}

/// 单调时钟，墙钟被 NTP 调整时速度不受影响。
#[derive(Debug, Clone, Copy)]
pub struct PollClock {
    origin: Instant,
}

impl PollClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn tick(&self) -> Tick {
        Tick {
            mono_ms: self.origin.elapsed().as_millis() as u64,
            wall_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 设置取消标记，并唤醒正在两轮之间等待的轮询循环。
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancelToken,
    tx: Sender<()>,
}

impl Shutdown {
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Self {
                token: CancelToken::default(),
                tx,
            },
            rx,
        )
    }

    pub fn trigger(&self) {
        self.token.cancel();
        let _ = self.tx.try_send(());
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub estimator: EstimatorOptions,
    pub resolve_titles: bool,
    pub interval: Duration,
}

impl From<&Config> for PollOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            estimator: EstimatorOptions::from(cfg),
            resolve_titles: cfg.resolve_titles,
            interval: cfg.poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Updated,
    /// 拉取失败，保留上次的显示状态。
    Failed,
    Cancelled,
}

/// 在轮询循环中逐轮传递的状态。
#[derive(Debug, Clone, Default)]
pub struct PollState {
    pub metrics: MetricsState,
    pub snapshots: Vec<FileSnapshot>,
    /// 以声明 URI 为键的解析结果，只保留当前快照中的条目。
    pub resolved: HashMap<String, ResolvedClaim>,
    pub last_success_ms: Option<u64>,
    pub consecutive_failures: u32,
}

impl PollState {
    pub fn rows(&self) -> Vec<DownloadRow> {
        build_rows(&self.snapshots, &self.metrics, &self.resolved)
    }

    pub fn incomplete_rows(&self) -> Vec<DownloadRow> {
        self.rows().into_iter().filter(|r| !r.completed).collect()
    }
}

fn incomplete_uris(snapshots: &[FileSnapshot]) -> Vec<String> {
    snapshots
        .iter()
        .filter(|s| !s.completed)
        .filter_map(|s| {
            let name = s.claim_name.as_deref()?;
            match build_claim_uri(name, &s.claim_id) {
                Ok(uri) => Some(uri.to_string()),
                Err(err) => {
                    debug!(target: "poller", claim_id = %s.claim_id, "无法构造 URI: {err}");
                    None
                }
            }
        })
        .collect()
}

/// 执行一轮轮询，返回传给下一轮的状态。
pub fn poll_once<S, R>(
    source: &S,
    resolver: Option<&R>,
    state: PollState,
    tick: Tick,
    options: &PollOptions,
    cancel: &CancelToken,
) -> (PollState, CycleOutcome)
where
    S: SnapshotSource + ?Sized,
    R: UriResolver + ?Sized,
{
    let snapshots = match source.list_files() {
        Ok(list) => list,
        Err(err) => {
            warn!(target: "poller", "拉取下载列表失败，保留上次结果: {err}");
            let mut kept = state;
            kept.consecutive_failures = kept.consecutive_failures.saturating_add(1);
            return (kept, CycleOutcome::Failed);
        }
    };

    if cancel.is_cancelled() {
        return (state, CycleOutcome::Cancelled);
    }

    let metrics = update_metrics(&state.metrics, &snapshots, tick.mono_ms, &options.estimator);

    let wanted = incomplete_uris(&snapshots);
    let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();
    let mut resolved: HashMap<String, ResolvedClaim> = state
        .resolved
        .iter()
        .filter(|(uri, _)| wanted_set.contains(uri.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if options.resolve_titles
        && let Some(resolver) = resolver
    {
        let missing: Vec<String> = wanted
            .iter()
            .filter(|uri| !resolved.contains_key(uri.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            match resolver.resolve(&missing) {
                Ok(found) => resolved.extend(found),
                Err(err) => warn!(target: "poller", "resolve 失败，稍后重试: {err}"),
            }
        }
    }

    if cancel.is_cancelled() {
        return (state, CycleOutcome::Cancelled);
    }

    let next = PollState {
        metrics,
        snapshots,
        resolved,
        last_success_ms: Some(tick.wall_ms),
        consecutive_failures: 0,
    };
    (next, CycleOutcome::Updated)
}

/// 顺序轮询循环，收到关闭信号后停止。
pub struct Poller<'a, S: ?Sized, R: ?Sized> {
    source: &'a S,
    resolver: Option<&'a R>,
    options: PollOptions,
    cancel: CancelToken,
    wake: Receiver<()>,
    clock: PollClock,
}

impl<'a, S, R> Poller<'a, S, R>
where
    S: SnapshotSource + ?Sized,
    R: UriResolver + ?Sized,
{
    pub fn new(
        source: &'a S,
        resolver: Option<&'a R>,
        options: PollOptions,
        cancel: CancelToken,
        wake: Receiver<()>,
    ) -> Self {
        Self {
            source,
            resolver,
            options,
            cancel,
            wake,
            clock: PollClock::start(),
        }
    }

    pub fn run<F>(&self, initial: PollState, mut render: F) -> PollState
    where
        F: FnMut(&PollState, CycleOutcome),
    {
        let mut state = initial;
        let mut cycles = 0u64;
        info!(
            target: "poller",
            interval_ms = self.options.interval.as_millis() as u64,
            "开始轮询下载列表"
        );

        while !self.cancel.is_cancelled() {
            let (next, outcome) = poll_once(
                self.source,
                self.resolver,
                state,
                self.clock.tick(),
                &self.options,
                &self.cancel,
            );
            state = next;
            cycles += 1;

            if self.cancel.is_cancelled() {
                break;
            }
            render(&state, outcome);

            match self.wake.recv_timeout(self.options.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(target: "poller", cycles, "轮询结束");
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::RawStatus;
    use std::cell::{Cell, RefCell};

    const ID: &str = "abc123";

    fn running(written: u64) -> FileSnapshot {
        FileSnapshot {
            claim_id: ID.to_string(),
            claim_name: Some("clip".into()),
            written_bytes: written,
            total_bytes: 1000,
            status: RawStatus::new("running"),
            ..FileSnapshot::default()
        }
    }

    /// 按脚本回放响应；`None` 表示拉取失败。
    struct Script {
        responses: RefCell<Vec<Option<Vec<FileSnapshot>>>>,
        calls: Cell<usize>,
        on_call: Option<(usize, Shutdown)>,
    }

    impl Script {
        fn new(responses: Vec<Option<Vec<FileSnapshot>>>) -> Self {
            Self {
                responses: RefCell::new(responses),
                calls: Cell::new(0),
                on_call: None,
            }
        }
    }

    impl SnapshotSource for Script {
        fn list_files(&self) -> Result<Vec<FileSnapshot>, RpcError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if let Some((at, shutdown)) = &self.on_call
                && *at == n
            {
                shutdown.trigger();
            }
            let mut responses = self.responses.borrow_mut();
            let next = if responses.is_empty() {
                None
            } else {
                responses.remove(0)
            };
            next.ok_or(RpcError::Status(503))
        }
    }

    #[derive(Default)]
    struct Titles {
        asked: RefCell<Vec<Vec<String>>>,
        fail: bool,
    }

    impl UriResolver for Titles {
        fn resolve(&self, uris: &[String]) -> Result<HashMap<String, ResolvedClaim>, RpcError> {
            self.asked.borrow_mut().push(uris.to_vec());
            if self.fail {
                return Err(RpcError::Status(500));
            }
            Ok(uris
                .iter()
                .map(|u| {
                    (
                        u.clone(),
                        ResolvedClaim {
                            title: Some(format!("title of {u}")),
                            channel_name: None,
                        },
                    )
                })
                .collect())
        }
    }

    fn at(ms: u64) -> Tick {
        Tick {
            mono_ms: ms,
            wall_ms: ms,
        }
    }

    fn options() -> PollOptions {
        PollOptions {
            estimator: EstimatorOptions::default(),
            resolve_titles: true,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn successive_polls_derive_speed() {
        let src = Script::new(vec![Some(vec![running(0)]), Some(vec![running(500)])]);
        let titles = Titles::default();
        let cancel = CancelToken::default();

        let (s1, o1) = poll_once(&src, Some(&titles), PollState::default(), at(0), &options(), &cancel);
        assert_eq!(o1, CycleOutcome::Updated);
        let (s2, _) = poll_once(&src, Some(&titles), s1, at(1000), &options(), &cancel);

        let rows = s2.rows();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].speed_bps - 500.0).abs() < 1e-9);
        assert_eq!(rows[0].percent, 50);
        assert_eq!(rows[0].title, "title of lbry://clip#abc123");
        assert_eq!(s2.last_success_ms, Some(1000));
    }

    #[test]
    fn wall_clock_step_back_does_not_zero_speed() {
        let src = Script::new(vec![Some(vec![running(0)]), Some(vec![running(500)])]);
        let cancel = CancelToken::default();
        let first = Tick {
            mono_ms: 0,
            wall_ms: 5_000,
        };
        let second = Tick {
            mono_ms: 1_000,
            wall_ms: 1_000,
        };

        let (s1, _) = poll_once::<_, Titles>(&src, None, PollState::default(), first, &options(), &cancel);
        let (s2, _) = poll_once::<_, Titles>(&src, None, s1, second, &options(), &cancel);

        assert!((s2.rows()[0].speed_bps - 500.0).abs() < 1e-9);
        assert_eq!(s2.last_success_ms, Some(1_000));
    }

    #[test]
    fn clock_ticks_are_monotonic() {
        let clock = PollClock::start();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b.mono_ms >= a.mono_ms);
        assert!(a.wall_ms > 0);
    }

    #[test]
    fn failed_fetch_keeps_previous_state() {
        let src = Script::new(vec![Some(vec![running(100)]), None]);
        let cancel = CancelToken::default();

        let (s1, _) = poll_once::<_, Titles>(&src, None, PollState::default(), at(0), &options(), &cancel);
        let (s2, outcome) = poll_once::<_, Titles>(&src, None, s1.clone(), at(1000), &options(), &cancel);

        assert_eq!(outcome, CycleOutcome::Failed);
        assert_eq!(s2.snapshots, s1.snapshots);
        assert_eq!(s2.metrics, s1.metrics);
        assert_eq!(s2.consecutive_failures, 1);
        assert_eq!(s2.last_success_ms, Some(0));
    }

    #[test]
    fn titles_are_resolved_once_and_only_for_incomplete_items() {
        let mut done = running(1000);
        done.claim_id = "def456".into();
        done.claim_name = Some("finished".into());
        done.completed = true;

        let src = Script::new(vec![
            Some(vec![running(0), done.clone()]),
            Some(vec![running(10), done]),
        ]);
        let titles = Titles::default();
        let cancel = CancelToken::default();

        let (s1, _) = poll_once(&src, Some(&titles), PollState::default(), at(0), &options(), &cancel);
        let (s2, _) = poll_once(&src, Some(&titles), s1, at(1000), &options(), &cancel);

        assert_eq!(*titles.asked.borrow(), vec![vec!["lbry://clip#abc123".to_string()]]);
        assert_eq!(s2.resolved.len(), 1);
        assert_eq!(s2.incomplete_rows().len(), 1);
    }

    #[test]
    fn resolve_failure_does_not_block_the_cycle() {
        let src = Script::new(vec![Some(vec![running(0)])]);
        let titles = Titles {
            fail: true,
            ..Titles::default()
        };
        let (s1, outcome) = poll_once(
            &src,
            Some(&titles),
            PollState::default(),
            at(0),
            &options(),
            &CancelToken::default(),
        );
        assert_eq!(outcome, CycleOutcome::Updated);
        assert!(s1.resolved.is_empty());
        assert_eq!(s1.rows()[0].title, "clip");
    }

    #[test]
    fn response_after_cancellation_is_dropped() {
        let (shutdown, _rx) = Shutdown::new();
        let src = Script {
            on_call: Some((1, shutdown.clone())),
            ..Script::new(vec![Some(vec![running(10)])])
        };
        let (state, outcome) = poll_once::<_, Titles>(
            &src,
            None,
            PollState::default(),
            at(0),
            &options(),
            &shutdown.token(),
        );
        assert_eq!(outcome, CycleOutcome::Cancelled);
        assert!(state.snapshots.is_empty());
    }

    #[test]
    fn loop_runs_sequentially_until_shutdown() {
        let (shutdown, rx) = Shutdown::new();
        let src = Script {
            on_call: Some((3, shutdown.clone())),
            ..Script::new(vec![
                Some(vec![running(0)]),
                None,
                Some(vec![running(900)]),
            ])
        };
        let poller: Poller<'_, Script, Titles> =
            Poller::new(&src, None, options(), shutdown.token(), rx);

        let mut seen = Vec::new();
        let final_state = poller.run(PollState::default(), |state, outcome| {
            seen.push((outcome, state.snapshots.len()));
        });

        assert_eq!(src.calls.get(), 3);
        assert_eq!(seen, vec![(CycleOutcome::Updated, 1), (CycleOutcome::Failed, 1)]);
        // third response arrived after shutdown and was not committed
        assert_eq!(final_state.snapshots[0].written_bytes, 0);
    }

    #[test]
    fn shutdown_wakes_the_wait_between_cycles() {
        let (shutdown, rx) = Shutdown::new();
        let src = Script::new(vec![Some(vec![running(0)])]);
        let slow = PollOptions {
            interval: Duration::from_secs(3600),
            ..options()
        };
        let poller: Poller<'_, Script, Titles> = Poller::new(&src, None, slow, shutdown.token(), rx);

        let mut renders = 0;
        poller.run(PollState::default(), |_, _| {
            renders += 1;
            shutdown.trigger();
        });
        assert_eq!(renders, 1);
        assert_eq!(src.calls.get(), 1);
    }
}
