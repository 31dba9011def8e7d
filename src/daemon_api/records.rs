//! 守护进程返回值解析：file_list 记录 → FileSnapshot，resolve 结果 → ResolvedClaim，
//! storage_inventory / storage_pins → InventoryEntry。
//!
//! 解析尽量宽容：缺字段取默认值，数字允许是字符串；缺少 claim_id 的记录直接丢弃。

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::download::models::{FileSnapshot, RawStatus, ResolvedClaim};
use crate::download::storage::{HashLabel, Inventory, InventoryEntry, StorageTotals};
use crate::download::uri::{build_claim_uri, channel_from_uri};

#[derive(Debug, Default, Deserialize)]
struct RawFileRecord {
    #[serde(default)]
    claim_id: Option<String>,
    #[serde(default)]
    claim_name: Option<String>,
    #[serde(default)]
    channel_name: Option<String>,
    #[serde(default)]
    channel_claim_id: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    blobs_in_stream: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    blobs_remaining: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    written_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    total_bytes: Option<u64>,
    #[serde(default)]
    metadata: Option<Value>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_u64))
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl RawFileRecord {
    fn into_snapshot(self, captured_ms: u64) -> Option<FileSnapshot> {
        let claim_id = non_empty(self.claim_id)?;
        let metadata_size = self
            .metadata
            .as_ref()
            .and_then(|m| m.pointer("/source/size"))
            .and_then(value_as_u64)
            .filter(|size| *size > 0);

        Some(FileSnapshot {
            claim_id,
            claim_name: non_empty(self.claim_name),
            channel_name: non_empty(self.channel_name),
            channel_claim_id: non_empty(self.channel_claim_id),
            written_bytes: self.written_bytes.unwrap_or(0),
            total_bytes: self.total_bytes.unwrap_or(0),
            metadata_size,
            blobs_in_stream: self.blobs_in_stream.unwrap_or(0),
            blobs_remaining: self.blobs_remaining.unwrap_or(0),
            completed: self.completed.unwrap_or(false),
            status: RawStatus::new(self.status.unwrap_or_default()),
            timestamp_ms: captured_ms,
        })
    }
}

fn list_items<'a>(result: &'a Value, key: &str) -> &'a [Value] {
    match result {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    }
}

/// 同时接受分页的 `{"items": [...]}` 和裸数组两种形状。
pub fn parse_file_list(result: &Value, captured_ms: u64) -> Vec<FileSnapshot> {
    list_items(result, "items")
        .iter()
        .filter_map(|item| match RawFileRecord::deserialize(item) {
            Ok(record) => {
                let snap = record.into_snapshot(captured_ms);
                if snap.is_none() {
                    debug!(target: "daemon_api", "file_list 记录缺少 claim_id，已跳过");
                }
                snap
            }
            Err(err) => {
                debug!(target: "daemon_api", "无法解析 file_list 记录: {err}");
                None
            }
        })
        .collect()
}

fn str_at(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .find_map(|p| value.pointer(p).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 结果可能被包在 `results` 里，单条也可能是 `{ "claim": {...} }`。
pub fn parse_resolve(result: &Value) -> HashMap<String, ResolvedClaim> {
    let map = match result.get("results") {
        Some(Value::Object(inner)) => inner,
        _ => match result {
            Value::Object(map) => map,
            _ => return HashMap::new(),
        },
    };

    map.iter()
        .filter_map(|(uri, entry)| {
            let claim = match entry.get("claim") {
                Some(inner) if inner.is_object() => inner,
                _ => entry,
            };
            if !claim.is_object() || claim.get("error").is_some() {
                debug!(target: "daemon_api", uri = %uri, "resolve 未返回可用声明");
                return None;
            }
            let title = str_at(claim, &["/value/title"]);
            let channel_name = str_at(
                claim,
                &[
                    "/signing_channel/name",
                    "/value/signing_channel/name",
                    "/meta/signing_channel/name",
                ],
            )
            .or_else(|| {
                str_at(claim, &["/signing_channel/canonical_url"])
                    .and_then(|url| channel_from_uri(&url))
            });
            Some((
                uri.clone(),
                ResolvedClaim {
                    title,
                    channel_name,
                },
            ))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct RawInventoryEntry {
    #[serde(default)]
    claim_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    sd_hash: Option<String>,
    #[serde(default)]
    stream_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    saved_file: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pinned: Option<bool>,
    #[serde(default, deserialize_with = "lenient_u64")]
    blobs_present: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    blobs_total: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    size_mb: Option<f64>,
}

impl From<RawInventoryEntry> for InventoryEntry {
    fn from(raw: RawInventoryEntry) -> Self {
        Self {
            claim_id: non_empty(raw.claim_id),
            name: non_empty(raw.name),
            url: non_empty(raw.url),
            sd_hash: non_empty(raw.sd_hash),
            stream_hash: non_empty(raw.stream_hash),
            saved_file: raw.saved_file.unwrap_or(false),
            pinned: raw.pinned.unwrap_or(false),
            blobs_present: raw.blobs_present,
            blobs_total: raw.blobs_total,
            size_mb: raw.size_mb,
        }
    }
}

fn parse_entries(items: &[Value]) -> Vec<InventoryEntry> {
    items
        .iter()
        .filter_map(|item| match RawInventoryEntry::deserialize(item) {
            Ok(raw) => Some(InventoryEntry::from(raw)),
            Err(err) => {
                debug!(target: "daemon_api", "无法解析存储条目: {err}");
                None
            }
        })
        .collect()
}

pub fn parse_inventory(result: &Value) -> Inventory {
    let totals = result
        .get("totals")
        .filter(|t| t.is_object())
        .map(|t| {
            let mb = |key: &str| t.get(key).and_then(value_as_f64).unwrap_or(0.0);
            StorageTotals {
                network_mb: mb("network_storage"),
                content_mb: mb("content_storage"),
                private_mb: mb("private_storage"),
                total_mb: mb("total"),
            }
        });
    Inventory {
        totals,
        claims: parse_entries(list_items(result, "claims")),
    }
}

/// `storage_pins` 返回数组或 `{ "items": [...] }`；`null` 视为没有置顶。
pub fn parse_pins(result: &Value) -> Vec<InventoryEntry> {
    parse_entries(list_items(result, "items"))
}

/// `file_list` 按哈希查询得到的第一条记录。
pub fn parse_hash_label(result: &Value) -> Option<HashLabel> {
    let item = list_items(result, "items").first()?;
    let claim_name = str_at(item, &["/claim_name"]);
    let claim_id = str_at(item, &["/claim_id"]);
    let uri = str_at(item, &["/permanent_url"]).or_else(|| {
        build_claim_uri(claim_name.as_deref()?, claim_id.as_deref()?)
            .ok()
            .map(|u| u.to_string())
    });
    Some(HashLabel {
        title: str_at(item, &["/metadata/title"]).or(claim_name),
        channel: str_at(item, &["/channel_name", "/signing_channel/name"]),
        uri,
    })
}
