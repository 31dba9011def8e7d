//! 进度 / 速度 / 剩余时间估算与状态归类。
//!
//! 所有函数都是纯函数：上一轮的 `MetricsState` 由调用方（轮询循环）保存并在下一轮传入。

use std::collections::HashMap;

use super::models::{
    DownloadRow, Eta, FileSnapshot, MetricSample, MetricsState, ResolvedClaim, StatusLabel,
};
use super::uri::build_claim_uri;
use crate::base_system::context::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorOptions {
    /// 运行中的传输在没有新字节时沿用上次速度的时长，0 表示不沿用。
    pub stall_timeout_ms: u64,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            stall_timeout_ms: 10_000,
        }
    }
}

impl From<&Config> for EstimatorOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            stall_timeout_ms: cfg.stall_timeout_ms,
        }
    }
}

/// 由上一轮指标和本轮快照得出新的指标表。
///
/// 结果中每个带 claim_id 的快照恰好一条；本轮不存在的 id 被丢弃。
pub fn update_metrics(
    previous: &MetricsState,
    snapshots: &[FileSnapshot],
    now_ms: u64,
    options: &EstimatorOptions,
) -> MetricsState {
    snapshots
        .iter()
        .filter(|snap| !snap.claim_id.is_empty())
        .map(|snap| {
            let sample = next_sample(previous.get(&snap.claim_id), snap, now_ms, options);
            (snap.claim_id.clone(), sample)
        })
        .collect()
}

fn next_sample(
    prev: Option<&MetricSample>,
    snap: &FileSnapshot,
    now_ms: u64,
    options: &EstimatorOptions,
) -> MetricSample {
    let written = snap.written_bytes;
    let total = snap.effective_total();

    let (speed_bps, last_progress_ms) = match prev {
        None => (0.0, now_ms),
        Some(p) if written > p.written_bytes && now_ms > p.timestamp_ms => {
            let delta_bytes = (written - p.written_bytes) as f64;
            let delta_secs = (now_ms - p.timestamp_ms) as f64 / 1000.0;
            (delta_bytes / delta_secs, now_ms)
        }
        Some(p)
            if snap.is_running()
                && p.speed_bps > 0.0
                && now_ms.saturating_sub(p.last_progress_ms) < options.stall_timeout_ms =>
        {
            (p.speed_bps, p.last_progress_ms)
        }
        Some(p) => (0.0, p.last_progress_ms),
    };

    MetricSample {
        speed_bps,
        written_bytes: written,
        total_bytes: total,
        timestamp_ms: now_ms,
        last_progress_ms,
    }
}

/// 依次按 blob 比例、字节比例、完成标记计算，结果在 [0, 100]。
pub fn percent_complete(snap: &FileSnapshot) -> u8 {
    let pct = if snap.blobs_in_stream > 0 {
        ratio_percent(snap.blobs_present(), snap.blobs_in_stream)
    } else if snap.effective_total() > 0 {
        ratio_percent(snap.written_bytes, snap.effective_total())
    } else if snap.completed {
        100
    } else {
        0
    };
    pct.min(100) as u8
}

fn ratio_percent(done: u64, total: u64) -> u64 {
    ((done as u128 * 100) / total as u128).min(100) as u64
}

pub fn estimate_eta(remaining_bytes: u64, speed_bps: f64) -> Eta {
    // also catches NaN
    if remaining_bytes == 0 || !(speed_bps > 0.0) {
        return Eta::Unknown;
    }
    Eta::Seconds((remaining_bytes as f64 / speed_bps).ceil() as u64)
}

pub fn classify_status(snap: &FileSnapshot, percent: u8) -> StatusLabel {
    match snap.status.normalized().as_str() {
        "running" => return StatusLabel::Downloading,
        "stopped" => return StatusLabel::Paused,
        "finished" | "completed" => return StatusLabel::Completed,
        "seeding" => return StatusLabel::Seeding,
        "error" | "failed" => return StatusLabel::Error,
        "queued" | "pending" => return StatusLabel::Queued,
        _ => {}
    }

    if snap.completed || percent >= 100 {
        StatusLabel::Completed
    } else if snap.blobs_remaining > 0 {
        StatusLabel::Paused
    } else if !snap.status.is_empty() {
        StatusLabel::Other(snap.status.as_str().trim().to_string())
    } else {
        StatusLabel::Queued
    }
}

pub fn build_row(
    snap: &FileSnapshot,
    sample: Option<&MetricSample>,
    resolved: Option<&ResolvedClaim>,
) -> DownloadRow {
    let percent = percent_complete(snap);
    let speed_bps = sample.map(|s| s.speed_bps).unwrap_or(0.0);
    let total = snap.effective_total();
    let remaining = total.saturating_sub(snap.written_bytes);

    let uri = snap
        .claim_name
        .as_deref()
        .and_then(|name| build_claim_uri(name, &snap.claim_id).ok())
        .map(|u| u.to_string());

    let title = resolved
        .and_then(|r| r.title.clone())
        .filter(|t| !t.trim().is_empty())
        .or_else(|| snap.claim_name.clone())
        .unwrap_or_else(|| snap.claim_id.clone());

    let channel = resolved
        .and_then(|r| r.channel_name.clone())
        .or_else(|| snap.channel_name.clone());

    DownloadRow {
        claim_id: snap.claim_id.clone(),
        title,
        channel,
        channel_claim_id: snap.channel_claim_id.clone(),
        uri,
        percent,
        speed_bps,
        eta: estimate_eta(remaining, speed_bps),
        status: classify_status(snap, percent),
        blobs_present: snap.blobs_present(),
        blobs_total: snap.blobs_in_stream,
        written_bytes: snap.written_bytes,
        total_bytes: total,
        completed: snap.completed,
    }
}

/// 每个快照一行，保持快照顺序。`resolved` 以声明 URI 为键。
pub fn build_rows(
    snapshots: &[FileSnapshot],
    metrics: &MetricsState,
    resolved: &HashMap<String, ResolvedClaim>,
) -> Vec<DownloadRow> {
    snapshots
        .iter()
        .filter(|snap| !snap.claim_id.is_empty())
        .map(|snap| {
            let claim = snap
                .claim_name
                .as_deref()
                .and_then(|name| build_claim_uri(name, &snap.claim_id).ok())
                .and_then(|uri| resolved.get(&uri.to_string()));
            build_row(snap, metrics.get(&snap.claim_id), claim)
        })
        .collect()
}
