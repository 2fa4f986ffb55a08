use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{RelayError, Result};

/// One upstream browser-session credential. Immutable once loaded — a
/// credentials-file change produces a whole new pool snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Unique id, compared case-insensitively.
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// Opaque bearer sent as `Cookie: sessionKey=...`. Never logged.
    pub session_key: String,
    pub org_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Subscription tier; 0 = free.
    #[serde(default)]
    pub tier: u8,
    #[serde(default = "bool_true")]
    pub active: bool,
    #[serde(default = "bool_true")]
    pub track_usage: bool,
    #[serde(default)]
    pub ping: bool,
}

fn bool_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://claude.ai".to_string()
}

impl Credential {
    /// Display name falling back to the id.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// The credentials file is either a bare array or `{"credentials": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialFile {
    Bare(Vec<Credential>),
    Wrapped { credentials: Vec<Credential> },
}

/// Immutable snapshot of all configured credentials.
#[derive(Debug, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    /// Parse and normalize the credentials file. Fails when the pool is
    /// empty or no credential carries a usable base URL.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let file: CredentialFile = serde_json::from_str(&raw)
            .map_err(|e| RelayError::Credentials(format!("{}: {}", path.display(), e)))?;

        let mut credentials = match file {
            CredentialFile::Bare(c) => c,
            CredentialFile::Wrapped { credentials } => credentials,
        };

        if credentials.is_empty() {
            return Err(RelayError::Credentials(format!(
                "{}: no credentials defined",
                path.display()
            )));
        }

        for cred in &mut credentials {
            cred.base_url = normalize_base_url(&cred.base_url);
        }

        if credentials.iter().all(|c| c.base_url.is_empty()) {
            return Err(RelayError::Credentials(
                "every credential has a blank base URL".to_string(),
            ));
        }

        info!(count = credentials.len(), "loaded credentials");
        Ok(Arc::new(Self { credentials }))
    }

    pub fn all(&self) -> &[Credential] {
        &self.credentials
    }

    /// Case-insensitive lookup by id.
    pub fn get(&self, id: &str) -> Option<&Credential> {
        self.credentials
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(id))
    }

    pub fn active(&self) -> Vec<&Credential> {
        self.credentials.iter().filter(|c| c.active).collect()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

/// Trim, default the scheme to https, drop any trailing slash.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    with_scheme.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> Credential {
        Credential {
            id: id.to_string(),
            display_name: String::new(),
            session_key: "sk-test".to_string(),
            org_id: "org-1".to_string(),
            base_url: "https://claude.ai".to_string(),
            tier: 0,
            active: true,
            track_usage: true,
            ping: false,
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let pool = CredentialPool::new(vec![sample("Work-Main")]);
        assert!(pool.get("work-main").is_some());
        assert!(pool.get("WORK-MAIN").is_some());
        assert!(pool.get("other").is_none());
    }

    #[test]
    fn base_url_normalization() {
        assert_eq!(normalize_base_url(" claude.ai/ "), "https://claude.ai");
        assert_eq!(
            normalize_base_url("https://claude.ai/"),
            "https://claude.ai"
        );
        assert_eq!(
            normalize_base_url("http://localhost:9999"),
            "http://localhost:9999"
        );
        assert_eq!(normalize_base_url("  "), "");
    }

    #[test]
    fn parses_bare_array_and_wrapped_forms() {
        let bare = r#"[{"id":"a","sessionKey":"sk","orgId":"o"}]"#;
        let file: CredentialFile = serde_json::from_str(bare).unwrap();
        let creds = match file {
            CredentialFile::Bare(c) => c,
            _ => panic!("expected bare array"),
        };
        assert_eq!(creds[0].id, "a");
        assert!(creds[0].active);
        assert!(creds[0].track_usage);
        assert!(!creds[0].ping);

        let wrapped = r#"{"credentials":[{"id":"b","sessionKey":"sk","orgId":"o","tier":1,"active":false}]}"#;
        let file: CredentialFile = serde_json::from_str(wrapped).unwrap();
        let creds = match file {
            CredentialFile::Wrapped { credentials } => credentials,
            _ => panic!("expected wrapped form"),
        };
        assert_eq!(creds[0].tier, 1);
        assert!(!creds[0].active);
    }

    #[test]
    fn label_falls_back_to_id() {
        let mut cred = sample("acct");
        assert_eq!(cred.label(), "acct");
        cred.display_name = "Main account".to_string();
        assert_eq!(cred.label(), "Main account");
    }
}
