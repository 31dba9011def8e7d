//! 下载相关的数据模型定义。
//!
//! 包含守护进程快照（FileSnapshot）、派生指标（MetricSample / MetricsState）、
//! 解析后的声明信息（ResolvedClaim）以及面向显示的行（DownloadRow）。

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// 一次轮询中单个下载的状态记录。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSnapshot {
    pub claim_id: String,
    pub claim_name: Option<String>,
    pub channel_name: Option<String>,
    pub channel_claim_id: Option<String>,
    pub written_bytes: u64,
    /// 守护进程尚不知道大小时为 0。
    pub total_bytes: u64,
    /// 声明的 `metadata.source.size`，`total_bytes` 为 0 时使用。
    pub metadata_size: Option<u64>,
    pub blobs_in_stream: u64,
    pub blobs_remaining: u64,
    pub completed: bool,
    pub status: RawStatus,
    pub timestamp_ms: u64,
}

impl FileSnapshot {
    pub fn blobs_present(&self) -> u64 {
        self.blobs_in_stream.saturating_sub(self.blobs_remaining)
    }

    pub fn effective_total(&self) -> u64 {
        if self.total_bytes > 0 {
            self.total_bytes
        } else {
            self.metadata_size.unwrap_or(0)
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is("running")
    }
}

/// 守护进程报告的原始状态字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawStatus(pub String);

impl RawStatus {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn normalized(&self) -> String {
        self.0.trim().to_ascii_lowercase()
    }

    pub fn is(&self, expected: &str) -> bool {
        self.0.trim().eq_ignore_ascii_case(expected)
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 一轮轮询中单个声明的派生传输指标。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricSample {
    pub speed_bps: f64,
    pub written_bytes: u64,
    pub total_bytes: u64,
    pub timestamp_ms: u64,
    /// 最近一次出现字节增长的采样时间。
    pub last_progress_ms: u64,
}

/// claim_id → 样本，每轮整体替换。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsState {
    samples: HashMap<String, MetricSample>,
}

impl MetricsState {
    pub fn get(&self, claim_id: &str) -> Option<&MetricSample> {
        self.samples.get(claim_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn contains(&self, claim_id: &str) -> bool {
        self.samples.contains_key(claim_id)
    }
}

impl FromIterator<(String, MetricSample)> for MetricsState {
    fn from_iter<I: IntoIterator<Item = (String, MetricSample)>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

/// `resolve` 得到的显示信息。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedClaim {
    pub title: Option<String>,
    pub channel_name: Option<String>,
}

/// 预计剩余时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Eta {
    Unknown,
    Seconds(u64),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match self {
            Eta::Unknown => return f.write_str("--"),
            Eta::Seconds(s) => *s,
        };
        let days = secs / 86_400;
        let hours = (secs % 86_400) / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;
        if days > 0 {
            write!(f, "{days}:{hours:02}:{minutes:02}:{seconds:02}")
        } else if hours > 0 {
            write!(f, "{hours}:{minutes:02}:{seconds:02}")
        } else {
            write!(f, "{minutes}:{seconds:02}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StatusLabel {
    Downloading,
    Paused,
    Completed,
    Seeding,
    Error,
    Queued,
    Other(String),
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Downloading => f.write_str("Downloading"),
            StatusLabel::Paused => f.write_str("Paused"),
            StatusLabel::Completed => f.write_str("Completed"),
            StatusLabel::Seeding => f.write_str("Seeding"),
            StatusLabel::Error => f.write_str("Error"),
            StatusLabel::Queued => f.write_str("Queued"),
            StatusLabel::Other(raw) => f.write_str(raw),
        }
    }
}

/// 渲染单个下载所需的全部字段。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRow {
    pub claim_id: String,
    pub title: String,
    pub channel: Option<String>,
    pub channel_claim_id: Option<String>,
    pub uri: Option<String>,
    pub percent: u8,
    pub speed_bps: f64,
    pub eta: Eta,
    pub status: StatusLabel,
    pub blobs_present: u64,
    pub blobs_total: u64,
    pub written_bytes: u64,
    pub total_bytes: u64,
    pub completed: bool,
}

impl DownloadRow {
    pub fn blobs_text(&self) -> String {
        if self.blobs_total == 0 {
            "—".to_string()
        } else {
            format!("{}/{}", self.blobs_present, self.blobs_total)
        }
    }
}
