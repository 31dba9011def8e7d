//! `lbry://` 声明 URI 的构造与解析。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

pub const SCHEME: &str = "lbry://";

static RE_PART: OnceLock<Regex> = OnceLock::new();
static RE_CHANNEL: OnceLock<Regex> = OnceLock::new();

fn re_part() -> &'static Regex {
    RE_PART.get_or_init(|| {
        Regex::new(r#"^(@?[^=&#:$@%?;/\\"<>{}|^~\[\]`\s]+)(?:[#:]([^/]*))?$"#)
            .expect("compile RE_PART")
    })
}

fn re_channel() -> &'static Regex {
    RE_CHANNEL.get_or_init(|| {
        Regex::new(r"(?i)lbry://(@[A-Za-z0-9_\-.]+)").expect("compile RE_CHANNEL")
    })
}

/// 从任意 URI 文本中取出 `@频道` 名（不含 claim id）。
pub fn channel_from_uri(text: &str) -> Option<String> {
    re_channel()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("empty uri")]
    Empty,
    #[error("invalid claim name: {0:?}")]
    InvalidName(String),
    #[error("invalid claim id: {0:?}")]
    InvalidClaimId(String),
    #[error("malformed uri: {0:?}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriPart {
    pub name: String,
    pub claim_id: Option<String>,
}

impl fmt::Display for UriPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(id) = &self.claim_id {
            write!(f, "#{id}")?;
        }
        Ok(())
    }
}

/// 解析后的 claim URI：频道、内容，或频道下的内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimUri {
    pub channel: Option<UriPart>,
    pub stream: Option<UriPart>,
}

impl ClaimUri {
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let trimmed = input.trim();
        let body = match trimmed.get(..SCHEME.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME) => &trimmed[SCHEME.len()..],
            _ => trimmed,
        };
        if body.is_empty() {
            return Err(UriError::Empty);
        }

        let (first, rest) = match body.split_once('/') {
            Some((a, b)) => (a, Some(b)),
            None => (body, None),
        };

        let first = parse_part(first)?;
        if first.name.starts_with('@') {
            let stream = match rest {
                Some(r) if !r.is_empty() => Some(parse_stream_part(r)?),
                _ => None,
            };
            return Ok(Self {
                channel: Some(first),
                stream,
            });
        }

        if rest.is_some() {
            return Err(UriError::Malformed(input.to_string()));
        }
        Ok(Self {
            channel: None,
            stream: Some(first),
        })
    }

    pub fn claim_id(&self) -> Option<&str> {
        self.stream
            .as_ref()
            .or(self.channel.as_ref())
            .and_then(|p| p.claim_id.as_deref())
    }
}

impl fmt::Display for ClaimUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SCHEME)?;
        match (&self.channel, &self.stream) {
            (Some(c), Some(s)) => write!(f, "{c}/{s}"),
            (Some(c), None) => write!(f, "{c}"),
            (None, Some(s)) => write!(f, "{s}"),
            (None, None) => Ok(()),
        }
    }
}

/// 下载项的近似规范 URI：`lbry://<name>#<claim_id>`。
pub fn build_claim_uri(name: &str, claim_id: &str) -> Result<ClaimUri, UriError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UriError::Empty);
    }
    if name.starts_with('@') {
        return Err(UriError::InvalidName(name.to_string()));
    }
    let part = parse_part(name)?;
    if part.claim_id.is_some() {
        return Err(UriError::InvalidName(name.to_string()));
    }
    let claim_id = validate_claim_id(claim_id.trim())?;
    Ok(ClaimUri {
        channel: None,
        stream: Some(UriPart {
            name: part.name,
            claim_id: Some(claim_id),
        }),
    })
}

/// 接受裸 claim_id，或任何带 claim_id 的 URI。
pub fn claim_id_from_input(input: &str) -> Result<String, UriError> {
    let trimmed = input.trim();
    if let Ok(id) = validate_claim_id(trimmed) {
        return Ok(id);
    }
    let uri = ClaimUri::parse(trimmed)?;
    uri.claim_id()
        .map(str::to_string)
        .ok_or_else(|| UriError::InvalidClaimId(trimmed.to_string()))
}

fn parse_stream_part(raw: &str) -> Result<UriPart, UriError> {
    let part = parse_part(raw)?;
    if part.name.starts_with('@') {
        return Err(UriError::InvalidName(part.name));
    }
    Ok(part)
}

fn parse_part(raw: &str) -> Result<UriPart, UriError> {
    if raw.is_empty() {
        return Err(UriError::Empty);
    }
    let caps = re_part()
        .captures(raw)
        .ok_or_else(|| UriError::InvalidName(raw.to_string()))?;
    let name = caps
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| UriError::InvalidName(raw.to_string()))?;
    if name == "@" {
        return Err(UriError::InvalidName(name));
    }
    let claim_id = match caps.get(2) {
        Some(m) => Some(validate_claim_id(m.as_str())?),
        None => None,
    };
    Ok(UriPart { name, claim_id })
}

fn validate_claim_id(id: &str) -> Result<String, UriError> {
    if id.is_empty() || id.len() > 40 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UriError::InvalidClaimId(id.to_string()));
    }
    Ok(id.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b";

    #[test]
    fn builds_stream_uri() {
        let uri = build_claim_uri("my-video", ID).unwrap();
        assert_eq!(uri.to_string(), format!("lbry://my-video#{ID}"));
        assert_eq!(uri.claim_id(), Some(ID));
    }

    #[test]
    fn build_rejects_bad_input() {
        assert_eq!(build_claim_uri("", ID), Err(UriError::Empty));
        assert!(matches!(build_claim_uri("has space", ID), Err(UriError::InvalidName(_))));
        assert!(matches!(build_claim_uri("a#b", ID), Err(UriError::InvalidName(_))));
        assert!(matches!(build_claim_uri("@chan", ID), Err(UriError::InvalidName(_))));
        assert!(matches!(build_claim_uri("ok", "xyz"), Err(UriError::InvalidClaimId(_))));
        assert!(matches!(build_claim_uri("ok", ""), Err(UriError::InvalidClaimId(_))));
    }

    #[test]
    fn parses_plain_and_channel_forms() {
        let uri = ClaimUri::parse("lbry://what").unwrap();
        assert_eq!(uri.stream.as_ref().unwrap().name, "what");
        assert_eq!(uri.claim_id(), None);

        let uri = ClaimUri::parse("LBRY://what#AB12").unwrap();
        assert_eq!(uri.claim_id(), Some("ab12"));

        let uri = ClaimUri::parse("@chan#1f/episode-3:9e").unwrap();
        assert_eq!(uri.channel.as_ref().unwrap().name, "@chan");
        assert_eq!(uri.channel.as_ref().unwrap().claim_id.as_deref(), Some("1f"));
        assert_eq!(uri.stream.as_ref().unwrap().name, "episode-3");
        assert_eq!(uri.to_string(), "lbry://@chan#1f/episode-3#9e");

        let uri = ClaimUri::parse("lbry://@chan").unwrap();
        assert!(uri.stream.is_none());
        assert_eq!(uri.to_string(), "lbry://@chan");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(ClaimUri::parse("lbry://"), Err(UriError::Empty));
        assert!(matches!(ClaimUri::parse("a/b"), Err(UriError::Malformed(_))));
        assert!(ClaimUri::parse("lbry://@chan/@other").is_err());
        assert!(ClaimUri::parse("lbry://name#zz").is_err());
    }

    #[test]
    fn claim_id_accepted_bare_or_from_uri() {
        assert_eq!(claim_id_from_input(" ABC123 ").unwrap(), "abc123");
        assert_eq!(claim_id_from_input("lbry://clip#9f").unwrap(), "9f");
        assert_eq!(claim_id_from_input("@chan#1f/ep#2e").unwrap(), "2e");
        assert!(matches!(
            claim_id_from_input("lbry://clip"),
            Err(UriError::InvalidClaimId(_))
        ));
    }

    #[test]
    fn channel_name_is_read_from_uri_text() {
        assert_eq!(channel_from_uri("lbry://@chan#1f/ep#2e").as_deref(), Some("@chan"));
        assert_eq!(channel_from_uri("lbry://@a.b_c-d").as_deref(), Some("@a.b_c-d"));
        assert_eq!(channel_from_uri("lbry://clip#9f"), None);
    }

    #[test]
    fn built_uri_parses_back() {
        let built = build_claim_uri("clip", "abc").unwrap();
        assert_eq!(ClaimUri::parse(&built.to_string()).unwrap(), built);
    }
}
