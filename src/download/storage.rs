//! 存储管理：`storage_inventory` / `storage_pins` 的结果整理。
//!
//! - 按“仅本地”或“全部托管”筛选条目
//! - 构造 URI 并去重，置顶条目单独列出
//! - 只有哈希、没有 claim 信息的条目通过 `file_list` 反查标题与频道
//! - 搜索（URI / 标题 / 频道）与按频道分组

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::models::ResolvedClaim;
use super::poller::UriResolver;
use super::uri::{build_claim_uri, channel_from_uri};
use crate::daemon_api::RpcError;

pub const UNSPECIFIED_CHANNEL: &str = "Unspecified";

/// 各类存储占用，单位 MB。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageTotals {
    pub network_mb: f64,
    pub content_mb: f64,
    pub private_mb: f64,
    pub total_mb: f64,
}

/// `storage_inventory.claims` 或 `storage_pins` 中的一项。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryEntry {
    pub claim_id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub sd_hash: Option<String>,
    pub stream_hash: Option<String>,
    pub saved_file: bool,
    pub pinned: bool,
    pub blobs_present: Option<u64>,
    pub blobs_total: Option<u64>,
    pub size_mb: Option<f64>,
}

impl InventoryEntry {
    /// 守护进程给出的 url 优先，否则由 name + claim_id 拼出。
    pub fn uri(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.trim().to_string());
        }
        let name = self.name.as_deref()?;
        let claim_id = self.claim_id.as_deref()?;
        build_claim_uri(name, claim_id).ok().map(|u| u.to_string())
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        self.sd_hash
            .clone()
            .map(HashKey::Sd)
            .or_else(|| self.stream_hash.clone().map(HashKey::Stream))
    }

    /// “仅本地”只看实际占用；“全部托管”还包括置顶和已保存的文件。
    pub fn is_hosted(&self, local_only: bool) -> bool {
        let has_data = self.blobs_present.unwrap_or(0) > 0 || self.size_mb.unwrap_or(0.0) > 0.0;
        if local_only {
            has_data
        } else {
            has_data || self.pinned || self.saved_file
        }
    }

    pub fn pin_target(&self) -> Option<PinTarget> {
        self.claim_id
            .clone()
            .map(PinTarget::ClaimId)
            .or_else(|| self.sd_hash.clone().map(PinTarget::SdHash))
    }

    pub fn blobs_text(&self) -> String {
        match (self.blobs_present, self.blobs_total) {
            (Some(present), Some(total)) => format!("{present}/{total}"),
            _ => "-".to_string(),
        }
    }

    pub fn size_text(&self) -> String {
        match self.size_mb {
            Some(mb) if mb > 0.0 => format!("{mb} MB"),
            _ => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub totals: Option<StorageTotals>,
    pub claims: Vec<InventoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Sd(String),
    Stream(String),
}

impl HashKey {
    pub fn as_str(&self) -> &str {
        match self {
            HashKey::Sd(h) | HashKey::Stream(h) => h.as_str(),
        }
    }
}

/// 通过哈希反查到的显示信息。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashLabel {
    pub title: Option<String>,
    pub channel: Option<String>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinTarget {
    ClaimId(String),
    SdHash(String),
}

impl PinTarget {
    pub fn param(&self) -> (&'static str, &str) {
        match self {
            PinTarget::ClaimId(id) => ("claim_id", id.as_str()),
            PinTarget::SdHash(h) => ("sd_hash", h.as_str()),
        }
    }
}

pub trait StorageSource {
    fn inventory(&self) -> Result<Inventory, RpcError>;
    fn pins(&self) -> Result<Vec<InventoryEntry>, RpcError>;
    fn lookup_hash(&self, key: &HashKey) -> Result<Option<HashLabel>, RpcError>;
}

pub trait PinControl {
    fn pin(&self, target: &PinTarget) -> Result<(), RpcError>;
    fn unpin(&self, target: &PinTarget) -> Result<(), RpcError>;
}

pub fn set_pinned<C: PinControl + ?Sized>(
    control: &C,
    target: &PinTarget,
    pinned: bool,
) -> Result<(), RpcError> {
    let (key, value) = target.param();
    if pinned {
        control.pin(target)?;
        info!(target: "storage", key, value, "已置顶");
    } else {
        control.unpin(target)?;
        info!(target: "storage", key, value, "已取消置顶");
    }
    Ok(())
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// 一次刷新得到的存储视图。
#[derive(Debug, Clone, Default)]
pub struct StorageView {
    pub totals: Option<StorageTotals>,
    pub entries: Vec<InventoryEntry>,
    pub pinned_uris: Vec<String>,
    pub uris: Vec<String>,
    pub resolved: HashMap<String, ResolvedClaim>,
    /// 以 sd_hash / stream_hash 为键。
    pub labels: HashMap<String, HashLabel>,
}

impl StorageView {
    pub fn entry_for_uri(&self, uri: &str) -> Option<&InventoryEntry> {
        self.entries
            .iter()
            .find(|e| e.uri().as_deref() == Some(uri))
    }

    pub fn title_of(&self, uri: &str) -> String {
        self.resolved
            .get(uri)
            .and_then(|r| r.title.clone())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.entry_for_uri(uri).and_then(|e| e.name.clone()))
            .unwrap_or_else(|| uri.to_string())
    }

    /// 解析结果中的频道，其次从 URI 文本里取，最后归入 `Unspecified`。
    pub fn channel_of(&self, uri: &str) -> String {
        self.resolved
            .get(uri)
            .and_then(|r| r.channel_name.clone())
            .filter(|c| !c.is_empty())
            .or_else(|| channel_from_uri(uri))
            .unwrap_or_else(|| UNSPECIFIED_CHANNEL.to_string())
    }

    pub fn matches(&self, uri: &str, search: &str) -> bool {
        let needle = search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let resolved = self.resolved.get(uri);
        let title = resolved.and_then(|r| r.title.as_deref()).unwrap_or("");
        let channel = resolved.and_then(|r| r.channel_name.as_deref()).unwrap_or("");
        [uri, title, channel]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn filtered_uris(&self, search: &str) -> Vec<&str> {
        self.uris
            .iter()
            .map(String::as_str)
            .filter(|uri| self.matches(uri, search))
            .collect()
    }

    /// 频道名排序的分组。
    pub fn grouped(&self, search: &str) -> Vec<(String, Vec<&str>)> {
        let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for uri in self.filtered_uris(search) {
            groups.entry(self.channel_of(uri)).or_default().push(uri);
        }
        groups.into_iter().collect()
    }

    /// 没有 URI 的条目（只有哈希）。
    pub fn unmapped(&self) -> Vec<&InventoryEntry> {
        self.entries.iter().filter(|e| e.uri().is_none()).collect()
    }

    pub fn label_for(&self, entry: &InventoryEntry) -> Option<&HashLabel> {
        [entry.sd_hash.as_deref(), entry.stream_hash.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|h| self.labels.get(h))
    }

    pub fn unmapped_title(&self, entry: &InventoryEntry) -> String {
        self.label_for(entry)
            .and_then(|l| l.title.clone())
            .or_else(|| entry.name.clone())
            .or_else(|| entry.sd_hash.clone())
            .or_else(|| entry.stream_hash.clone())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn unmapped_channel(&self, entry: &InventoryEntry) -> String {
        self.label_for(entry)
            .and_then(|l| l.channel.clone())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// 拉取置顶与库存、解析标题、反查只有哈希的条目。
///
/// 置顶与库存任一失败即整体失败；标题解析和哈希反查失败只记录日志。
pub fn load_storage<S, R>(
    source: &S,
    resolver: Option<&R>,
    local_only: bool,
) -> Result<StorageView, RpcError>
where
    S: StorageSource + ?Sized,
    R: UriResolver + ?Sized,
{
    let pins = source.pins()?;
    let inventory = source.inventory()?;

    let entries: Vec<InventoryEntry> = inventory
        .claims
        .into_iter()
        .filter(|e| e.is_hosted(local_only))
        .collect();

    let mut uris = Vec::new();
    for uri in entries.iter().filter_map(InventoryEntry::uri) {
        push_unique(&mut uris, uri);
    }
    let mut pinned_uris = Vec::new();
    for uri in pins.iter().filter_map(InventoryEntry::uri) {
        push_unique(&mut pinned_uris, uri);
    }

    let resolved = match resolver {
        Some(r) if !uris.is_empty() => r.resolve(&uris).unwrap_or_else(|err| {
            warn!(target: "storage", "resolve 失败，标题不可用: {err}");
            HashMap::new()
        }),
        _ => HashMap::new(),
    };

    let mut labels = HashMap::new();
    for entry in entries.iter().filter(|e| e.uri().is_none()) {
        let Some(key) = entry.hash_key() else {
            continue;
        };
        if labels.contains_key(key.as_str()) {
            continue;
        }
        match source.lookup_hash(&key) {
            Ok(Some(label)) => {
                if let Some(uri) = label.uri.clone() {
                    push_unique(&mut uris, uri);
                }
                labels.insert(key.as_str().to_string(), label);
            }
            Ok(None) => {}
            Err(err) => debug!(target: "storage", hash = key.as_str(), "哈希反查失败: {err}"),
        }
    }

    debug!(
        target: "storage",
        entries = entries.len(),
        uris = uris.len(),
        pins = pinned_uris.len(),
        "存储列表已刷新"
    );

    Ok(StorageView {
        totals: inventory.totals,
        entries,
        pinned_uris,
        uris,
        resolved,
        labels,
    })
}
