use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use super::records::{parse_file_list, parse_hash_label, parse_inventory, parse_pins, parse_resolve};
use crate::base_system::context::Config;
use crate::download::actions::{FileControl, StatusChange};
use crate::download::models::{FileSnapshot, ResolvedClaim};
use crate::download::poller::{SnapshotSource, UriResolver, now_ms};
use crate::download::storage::{
    HashKey, HashLabel, Inventory, InventoryEntry, PinControl, PinTarget, StorageSource,
};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("daemon unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("daemon returned HTTP {0}")]
    Status(u16),
    #[error("daemon error {code}: {message}")]
    Daemon { code: i64, message: String },
    #[error("invalid daemon response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("daemon response to {0} has no result")]
    MissingResult(String),
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn decode_envelope(method: &str, body: Value) -> Result<Value, RpcError> {
    let envelope: RpcEnvelope = serde_json::from_value(body)?;
    if let Some(err) = envelope.error {
        return Err(RpcError::Daemon {
            code: err.code,
            message: err.message,
        });
    }
    match envelope.result {
        Some(Value::Null) | None => Err(RpcError::MissingResult(method.to_string())),
        Some(v) => Ok(v),
    }
}

/// 本地 `lbrynet` 守护进程的 JSON-RPC 客户端。
pub struct DaemonClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl DaemonClient {
    pub fn new(cfg: &Config) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("lbry-dm/", env!("CARGO_PKG_VERSION"))),
        );

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(cfg.request_timeout());
        if let Some(connect) = cfg.connect_timeout() {
            builder = builder.connect_timeout(connect);
        }

        Ok(Self {
            client: builder.build()?,
            url: cfg.daemon_url.trim().to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        debug!(target: "daemon_api", method, id, "rpc call");

        let resp = self.client.post(&self.url).json(&payload).send()?;
        let status = resp.status();
        // lbrynet reports method errors with a JSON body on non-2xx as well
        let body: Value = match resp.json() {
            Ok(v) => v,
            Err(_) if !status.is_success() => return Err(RpcError::Status(status.as_u16())),
            Err(err) => return Err(RpcError::Transport(err)),
        };
        decode_envelope(method, body)
    }

    pub fn file_list(&self, page_size: u32) -> Result<Vec<FileSnapshot>, RpcError> {
        let result = self.call(
            "file_list",
            json!({ "page_size": page_size, "full_status": true }),
        )?;
        Ok(parse_file_list(&result, now_ms()))
    }

    pub fn resolve(&self, uris: &[String]) -> Result<HashMap<String, ResolvedClaim>, RpcError> {
        if uris.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self.call("resolve", json!({ "urls": uris }))?;
        Ok(parse_resolve(&result))
    }

    pub fn file_set_status(&self, claim_id: &str, change: StatusChange) -> Result<(), RpcError> {
        self.call(
            "file_set_status",
            json!({ "status": change.as_str(), "claim_id": claim_id }),
        )?;
        Ok(())
    }

    pub fn file_delete(&self, claim_id: &str, delete_from_download_dir: bool) -> Result<bool, RpcError> {
        let result = self.call(
            "file_delete",
            json!({
                "claim_id": claim_id,
                "delete_from_download_dir": delete_from_download_dir,
            }),
        )?;
        Ok(result.as_bool().unwrap_or(true))
    }
}

impl DaemonClient {
    /// 按占用大小排序的存储库存。
    pub fn storage_inventory(&self) -> Result<Inventory, RpcError> {
        let result = self.call("storage_inventory", json!({ "sort": "size" }))?;
        Ok(parse_inventory(&result))
    }

    pub fn storage_pins(&self) -> Result<Vec<InventoryEntry>, RpcError> {
        match self.call("storage_pins", json!({})) {
            Ok(result) => Ok(parse_pins(&result)),
            Err(RpcError::MissingResult(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub fn storage_pin(&self, target: &PinTarget) -> Result<(), RpcError> {
        self.call("storage_pin", pin_params(target))?;
        Ok(())
    }

    pub fn storage_unpin(&self, target: &PinTarget) -> Result<(), RpcError> {
        self.call("storage_unpin", pin_params(target))?;
        Ok(())
    }

    /// 用 sd_hash / stream_hash 查询单条 file_list 记录。
    pub fn file_by_hash(&self, key: &HashKey) -> Result<Option<HashLabel>, RpcError> {
        let field = match key {
            HashKey::Sd(_) => "sd_hash",
            HashKey::Stream(_) => "stream_hash",
        };
        let mut params = json!({ "page": 1, "page_size": 1 });
        params[field] = Value::from(key.as_str());
        let result = self.call("file_list", params)?;
        Ok(parse_hash_label(&result))
    }
}

fn pin_params(target: &PinTarget) -> Value {
    let (key, value) = target.param();
    let mut params = json!({});
    params[key] = Value::from(value);
    params
}

/// 绑定了分页大小的快照来源。
pub struct DaemonSource<'a> {
    pub client: &'a DaemonClient,
    pub page_size: u32,
}

impl SnapshotSource for DaemonSource<'_> {
    fn list_files(&self) -> Result<Vec<FileSnapshot>, RpcError> {
        self.client.file_list(self.page_size)
    }
}

impl UriResolver for DaemonClient {
    fn resolve(&self, uris: &[String]) -> Result<HashMap<String, ResolvedClaim>, RpcError> {
        DaemonClient::resolve(self, uris)
    }
}

impl FileControl for DaemonClient {
    fn set_status(&self, claim_id: &str, change: StatusChange) -> Result<(), RpcError> {
        self.file_set_status(claim_id, change)
    }

    fn delete(&self, claim_id: &str, delete_file: bool) -> Result<bool, RpcError> {
        self.file_delete(claim_id, delete_file)
    }
}

impl StorageSource for DaemonClient {
    fn inventory(&self) -> Result<Inventory, RpcError> {
        self.storage_inventory()
    }

    fn pins(&self) -> Result<Vec<InventoryEntry>, RpcError> {
        self.storage_pins()
    }

    fn lookup_hash(&self, key: &HashKey) -> Result<Option<HashLabel>, RpcError> {
        self.file_by_hash(key)
    }
}

impl PinControl for DaemonClient {
    fn pin(&self, target: &PinTarget) -> Result<(), RpcError> {
        self.storage_pin(target)
    }

    fn unpin(&self, target: &PinTarget) -> Result<(), RpcError> {
        self.storage_unpin(target)
    }
}
