//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

pub const DAEMON_URL_ENV: &str = "LBRY_DAEMON_URL";

const MIN_POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 守护进程连接
    #[serde(default = "default_daemon_url")]
    pub daemon_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,

    // 轮询
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default = "default_file_list_page_size")]
    pub file_list_page_size: u32,

    // 显示
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_false")]
    pub compact: bool,
    #[serde(default = "default_true")]
    pub resolve_titles: bool,

    // 守护进程二进制下载
    #[serde(default = "default_daemon_version")]
    pub daemon_version: String,
    #[serde(default)]
    pub daemon_fallback_versions: Vec<String>,
    #[serde(default = "default_daemon_url_template")]
    pub daemon_url_template: String,
    #[serde(default)]
    pub daemon_urls: BTreeMap<String, String>,
    #[serde(default = "default_daemon_dir")]
    pub daemon_dir: String,
    #[serde(default = "default_daemon_file_name")]
    pub daemon_file_name: String,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_url: default_daemon_url(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            file_list_page_size: default_file_list_page_size(),
            page_size: default_page_size(),
            compact: default_false(),
            resolve_titles: default_true(),
            daemon_version: default_daemon_version(),
            daemon_fallback_versions: Vec::new(),
            daemon_url_template: default_daemon_url_template(),
            daemon_urls: BTreeMap::new(),
            daemon_dir: default_daemon_dir(),
            daemon_file_name: default_daemon_file_name(),
            base_dir: None,
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 15] = [
            FieldMeta {
                name: "daemon_url",
                description: "lbrynet 守护进程 JSON-RPC 地址（可用环境变量 LBRY_DAEMON_URL 覆盖）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "单次请求超时时间（秒）",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "poll_interval_ms",
                description: "下载列表轮询间隔, 单位ms（最小 250）",
            },
            FieldMeta {
                name: "stall_timeout_ms",
                description: "运行中但无新数据时沿用上次速度的最长时间, 单位ms（0 表示不沿用）",
            },
            FieldMeta {
                name: "file_list_page_size",
                description: "每次 file_list 请求的条目上限",
            },
            FieldMeta {
                name: "page_size",
                description: "list 命令每页显示条目数",
            },
            FieldMeta {
                name: "compact",
                description: "是否使用紧凑显示（隐藏频道与分块信息）",
            },
            FieldMeta {
                name: "resolve_titles",
                description: "是否通过 resolve 获取未完成下载的标题",
            },
            FieldMeta {
                name: "daemon_version",
                description: "fetch-daemon 下载的守护进程版本",
            },
            FieldMeta {
                name: "daemon_fallback_versions",
                description: "首选版本下载失败时依次尝试的备用版本",
            },
            FieldMeta {
                name: "daemon_url_template",
                description: "下载地址模板, DAEMONVER 替换为版本号, OSNAME 替换为平台（linux/mac/windows）",
            },
            FieldMeta {
                name: "daemon_urls",
                description: "按平台指定的下载地址（可含 DAEMONVER），优先于模板",
            },
            FieldMeta {
                name: "daemon_dir",
                description: "守护进程二进制存放目录（相对路径基于数据目录）",
            },
            FieldMeta {
                name: "daemon_file_name",
                description: "守护进程二进制文件名（Windows 自动追加 .exe）",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon_url.trim().is_empty() {
            return Err(ConfigError::Validation("daemon_url 不能为空".to_string()));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::Validation(format!(
                "poll_interval_ms 不能小于 {MIN_POLL_INTERVAL_MS}"
            )));
        }
        if self.page_size == 0 || self.file_list_page_size == 0 {
            return Err(ConfigError::Validation(
                "page_size / file_list_page_size 必须大于 0".to_string(),
            ));
        }
        if self.daemon_file_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "daemon_file_name 不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn with_base_dir(mut self, base: Option<&Path>) -> Self {
        self.base_dir = base.map(Path::to_path_buf);
        self
    }

    /// 环境变量与命令行覆盖，命令行优先。
    pub fn apply_overrides(&mut self, cli_daemon_url: Option<&str>) {
        let from_env = std::env::var(DAEMON_URL_ENV).ok();
        if let Some(url) = cli_daemon_url
            .map(str::to_string)
            .or(from_env)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            self.daemon_url = url;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout <= 0.0 {
            return None;
        }
        Some(Duration::from_millis((self.connect_timeout * 1000.0).round() as u64))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    pub fn daemon_dir(&self) -> PathBuf {
        let dir = PathBuf::from(&self.daemon_dir);
        match &self.base_dir {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir,
        }
    }
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_daemon_url() -> String {
    "http://localhost:5279".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> f64 {
    3.05
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_stall_timeout_ms() -> u64 {
    10_000
}

fn default_file_list_page_size() -> u32 {
    999
}

fn default_page_size() -> usize {
    20
}

fn default_daemon_version() -> String {
    "0.113.0".to_string()
}

fn default_daemon_url_template() -> String {
    "https://github.com/lbryio/lbry-sdk/releases/download/vDAEMONVER/lbrynet-OSNAME.zip"
        .to_string()
}

fn default_daemon_dir() -> String {
    "static/daemon".to_string()
}

fn default_daemon_file_name() -> String {
    "lbrynet".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert_eq!(Config::fields().len(), 15);
    }

    #[test]
    fn every_field_is_serialized() {
        let value = serde_yaml::to_value(Config::default()).unwrap();
        let serde_yaml::Value::Mapping(map) = value else {
            panic!("config must be a mapping");
        };
        assert_eq!(map.len(), Config::fields().len());
        for field in Config::fields() {
            assert!(map.contains_key(serde_yaml::Value::String(field.name.to_string())));
        }
    }

    #[test]
    fn rejects_tight_poll_interval() {
        let cfg = Config {
            poll_interval_ms: 100,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn cli_daemon_url_overrides_config() {
        let mut cfg = Config::default();
        cfg.apply_overrides(Some(" http://10.0.0.2:5279 "));
        assert_eq!(cfg.daemon_url, "http://10.0.0.2:5279");
    }

    #[test]
    fn relative_daemon_dir_follows_base_dir() {
        let cfg = Config::default().with_base_dir(Some(Path::new("/data")));
        assert_eq!(cfg.daemon_dir(), PathBuf::from("/data/static/daemon"));
        assert_eq!(Config::default().daemon_dir(), PathBuf::from("static/daemon"));
    }

    #[test]
    fn connect_timeout_converts_seconds() {
        let cfg = Config::default();
        assert_eq!(cfg.connect_timeout(), Some(Duration::from_millis(3050)));
        let off = Config {
            connect_timeout: 0.0,
            ..Config::default()
        };
        assert_eq!(off.connect_timeout(), None);
    }
}
