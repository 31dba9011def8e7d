//! 下载 lbrynet 守护进程二进制（构建/首次运行前执行）。
//!
//! - 按配置版本与备用版本依次生成候选地址（平台专用地址 → 模板 → 官方 Release）
//! - 已存在二进制且 `daemon.ver` 记录的版本可接受时跳过
//! - `.zip` 资产只解压与二进制同名的条目；其他地址视为二进制直链
//! - 成功后写入实际使用的版本号

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use tempfile::TempDir;
use tracing::{info, warn};

use super::context::Config;

pub const VERSION_FILE: &str = "daemon.ver";
const LEGACY_RELEASE_URL: &str =
    "https://github.com/lbryio/lbry/releases/download/vDAEMONVER/lbrynet-OSNAME.zip";

static RE_VERSION: OnceLock<Regex> = OnceLock::new();
static RE_ZIP: OnceLock<Regex> = OnceLock::new();

fn re_version() -> &'static Regex {
    RE_VERSION.get_or_init(|| Regex::new(r"/v(\d+\.\d+\.\d+)/").expect("compile RE_VERSION"))
}

fn re_zip() -> &'static Regex {
    RE_ZIP.get_or_init(|| Regex::new(r"(?i)\.zip($|[?#])").expect("compile RE_ZIP"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    AlreadyPresent { version: String },
    Downloaded {
        version: String,
        url: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub version: String,
    pub fallback_versions: Vec<String>,
    pub url_template: String,
    pub urls: BTreeMap<String, String>,
    pub dir: PathBuf,
    pub file_name: String,
}

impl From<&Config> for DaemonSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            version: cfg.daemon_version.trim().to_string(),
            fallback_versions: cfg
                .daemon_fallback_versions
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
            url_template: cfg.daemon_url_template.trim().to_string(),
            urls: cfg.daemon_urls.clone(),
            dir: cfg.daemon_dir(),
            file_name: cfg.daemon_file_name.trim().to_string(),
        }
    }
}

impl DaemonSettings {
    fn acceptable_versions(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.version.as_str()).chain(self.fallback_versions.iter().map(String::as_str))
    }
}

/// 归一为 `mac` / `windows`，其余一律视为 `linux`。
pub fn normalize_platform(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mac" | "darwin" | "macos" => "mac".to_string(),
        "win32" | "windows" => "windows".to_string(),
        _ => "linux".to_string(),
    }
}

/// 命令行参数优先，其次 `TARGET` 环境变量，最后是当前系统。
pub fn resolve_platform(cli_target: Option<&str>) -> String {
    let raw = cli_target
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var("TARGET").ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    normalize_platform(&raw)
}

pub fn binary_name(file_name: &str, platform: &str) -> String {
    if platform == "windows" && !file_name.to_ascii_lowercase().ends_with(".exe") {
        format!("{file_name}.exe")
    } else {
        file_name.to_string()
    }
}

pub fn candidate_urls(settings: &DaemonSettings, platform: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !url.is_empty() && !urls.contains(&url) {
            urls.push(url);
        }
    };

    for ver in settings.acceptable_versions() {
        if let Some(url) = settings.urls.get(platform) {
            push(url.replace("DAEMONVER", ver));
        }
        if !settings.url_template.is_empty() {
            push(
                settings
                    .url_template
                    .replace("DAEMONVER", ver)
                    .replace("OSNAME", platform),
            );
        }
        push(
            LEGACY_RELEASE_URL
                .replace("DAEMONVER", ver)
                .replace("OSNAME", platform),
        );
    }
    urls
}

pub fn version_from_url(url: &str) -> Option<String> {
    re_version()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_zip_url(url: &str) -> bool {
    re_zip().is_match(url)
}

fn installed_version(dir: &Path) -> Option<String> {
    fs::read_to_string(dir.join(VERSION_FILE))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn fetch_daemon(settings: &DaemonSettings, platform: &str) -> Result<FetchOutcome> {
    let bin_name = binary_name(&settings.file_name, platform);
    let bin_path = settings.dir.join(&bin_name);

    fs::create_dir_all(&settings.dir)
        .with_context(|| format!("create daemon dir {}", settings.dir.display()))?;

    if bin_path.exists()
        && let Some(installed) = installed_version(&settings.dir)
        && settings.acceptable_versions().any(|v| v == installed)
    {
        info!(target: "daemon_fetch", version = %installed, "守护进程已存在，跳过下载");
        return Ok(FetchOutcome::AlreadyPresent { version: installed });
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("init http client")?;

    let urls = candidate_urls(settings, platform);
    info!(target: "daemon_fetch", platform, candidates = urls.len(), "开始下载守护进程");

    let mut last_error: Option<anyhow::Error> = None;
    for url in &urls {
        match install_from_url(&client, url, &settings.dir, &bin_name) {
            Ok(path) => {
                let version =
                    version_from_url(url).unwrap_or_else(|| settings.version.clone());
                fs::write(settings.dir.join(VERSION_FILE), &version)
                    .context("write daemon.ver")?;
                info!(target: "daemon_fetch", version = %version, path = %path.display(), "守护进程下载完成");
                return Ok(FetchOutcome::Downloaded {
                    version,
                    url: url.clone(),
                    path,
                });
            }
            Err(err) => {
                warn!(target: "daemon_fetch", url = %url, "下载失败: {err:#}");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("no valid download URL")))
}

fn install_from_url(client: &Client, url: &str, dir: &Path, bin_name: &str) -> Result<PathBuf> {
    let tmp_dir = TempDir::new().context("create temp dir")?;
    let file_name = if is_zip_url(url) { "daemon.zip" } else { bin_name };
    let downloaded = download_to(client, url, &tmp_dir.path().join(file_name))?;

    let bin_path = dir.join(bin_name);
    remove_existing(&bin_path)?;

    if is_zip_url(url) {
        extract_binary(&downloaded, dir, bin_name)
    } else {
        fs::copy(&downloaded, &bin_path)
            .with_context(|| format!("write {}", bin_path.display()))?;
        make_executable(&bin_path);
        Ok(bin_path)
    }
}

fn download_to(client: &Client, url: &str, out_path: &Path) -> Result<PathBuf> {
    let resp = client
        .get(url)
        .header(USER_AGENT, concat!("lbry-dm/", env!("CARGO_PKG_VERSION")))
        .send()
        .with_context(|| format!("request {url}"))?
        .error_for_status()
        .map_err(|e| anyhow!("HTTP {}", e.status().map(|s| s.as_u16()).unwrap_or(0)))?;

    let total = resp.content_length().unwrap_or(0);
    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        pb.set_message("Downloading daemon");
        Some(pb)
    } else {
        None
    };

    let mut file = fs::File::create(out_path).context("create temp file")?;
    let mut reader = resp;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).context("read download stream")?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).context("write temp file")?;
        if let Some(pb) = pb.as_ref() {
            pb.inc(n as u64);
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    file.flush().context("flush temp file")?;
    Ok(out_path.to_path_buf())
}

fn remove_existing(bin_path: &Path) -> Result<()> {
    match fs::remove_file(bin_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", bin_path.display())),
    }
}

/// 只解压文件名等于 `bin_name` 的那一项到 `dest_dir`。
pub fn extract_binary(zip_path: &Path, dest_dir: &Path, bin_name: &str) -> Result<PathBuf> {
    let file = fs::File::open(zip_path).with_context(|| format!("open {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("read zip archive")?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("read zip entry")?;
        if entry.is_dir() {
            continue;
        }
        let matches = Path::new(entry.name())
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == bin_name);
        if !matches {
            continue;
        }

        let out_path = dest_dir.join(bin_name);
        let mut out = fs::File::create(&out_path)
            .with_context(|| format!("create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).context("extract daemon binary")?;
        drop(out);
        make_executable(&out_path);
        return Ok(out_path);
    }

    Err(anyhow!("archive does not contain {bin_name}"))
}

fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            let mut perm = meta.permissions();
            perm.set_mode(0o755);
            let _ = fs::set_permissions(path, perm);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::FileOptions;

    fn settings(dir: &Path) -> DaemonSettings {
        DaemonSettings {
            version: "0.113.0".into(),
            fallback_versions: vec!["0.112.0".into()],
            url_template: "https://mirror.example/vDAEMONVER/lbrynet-OSNAME.zip".into(),
            urls: BTreeMap::new(),
            dir: dir.to_path_buf(),
            file_name: "lbrynet".into(),
        }
    }

    #[test]
    fn platform_names_are_normalized() {
        assert_eq!(normalize_platform("darwin"), "mac");
        assert_eq!(normalize_platform("Win32"), "windows");
        assert_eq!(normalize_platform("linux"), "linux");
        assert_eq!(normalize_platform("freebsd"), "linux");
        assert_eq!(resolve_platform(Some("windows")), "windows");
    }

    #[test]
    fn explicit_target_beats_environment() {
        // 无论 TARGET 设为何值，命令行参数都生效
        assert_eq!(resolve_platform(Some("darwin")), "mac");
        assert_eq!(resolve_platform(Some("win32")), "windows");
        let fallback = resolve_platform(Some("  "));
        assert!(["mac", "windows", "linux"].contains(&fallback.as_str()));
    }

    #[test]
    fn windows_binary_gets_exe_suffix() {
        assert_eq!(binary_name("lbrynet", "windows"), "lbrynet.exe");
        assert_eq!(binary_name("lbrynet.exe", "windows"), "lbrynet.exe");
        assert_eq!(binary_name("lbrynet", "mac"), "lbrynet");
    }

    #[test]
    fn candidates_try_each_version_in_order() {
        let mut s = settings(Path::new("/tmp"));
        s.urls
            .insert("linux".into(), "https://cdn.example/DAEMONVER/lbrynet".into());
        let urls = candidate_urls(&s, "linux");
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/0.113.0/lbrynet".to_string(),
                "https://mirror.example/v0.113.0/lbrynet-linux.zip".to_string(),
                "https://github.com/lbryio/lbry/releases/download/v0.113.0/lbrynet-linux.zip"
                    .to_string(),
                "https://cdn.example/0.112.0/lbrynet".to_string(),
                "https://mirror.example/v0.112.0/lbrynet-linux.zip".to_string(),
                "https://github.com/lbryio/lbry/releases/download/v0.112.0/lbrynet-linux.zip"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn duplicate_candidates_are_collapsed() {
        let mut s = settings(Path::new("/tmp"));
        s.fallback_versions.clear();
        s.url_template = LEGACY_RELEASE_URL.to_string();
        assert_eq!(candidate_urls(&s, "mac").len(), 1);
    }

    #[test]
    fn version_and_zip_detection() {
        assert_eq!(
            version_from_url("https://x/releases/download/v0.110.0/lbrynet-linux.zip").as_deref(),
            Some("0.110.0")
        );
        assert_eq!(version_from_url("https://cdn.example/latest/lbrynet"), None);
        assert!(is_zip_url("https://x/a.ZIP"));
        assert!(is_zip_url("https://x/a.zip?token=1"));
        assert!(!is_zip_url("https://x/a.zipper"));
    }

    #[test]
    fn extracts_only_the_named_binary() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("daemon.zip");
        {
            let file = fs::File::create(&zip_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("README.md", FileOptions::default()).unwrap();
            zip.write_all(b"docs").unwrap();
            zip.start_file("dist/lbrynet", FileOptions::default()).unwrap();
            zip.write_all(b"#!/bin/sh\necho daemon\n").unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        let path = extract_binary(&zip_path, &dest, "lbrynet").unwrap();
        assert_eq!(path, dest.join("lbrynet"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "#!/bin/sh\necho daemon\n");
        assert!(!dest.join("README.md").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        assert!(extract_binary(&zip_path, &dest, "lbrynet.exe").is_err());
    }

    #[test]
    fn skips_download_when_accepted_version_is_installed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lbrynet"), b"bin").unwrap();
        fs::write(dir.path().join(VERSION_FILE), "0.112.0\n").unwrap();

        let outcome = fetch_daemon(&settings(dir.path()), "linux").unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::AlreadyPresent {
                version: "0.112.0".into()
            }
        );
    }
}
