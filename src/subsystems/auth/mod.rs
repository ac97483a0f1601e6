//! Bearer token store: a flat JSON file of issued API tokens.
//!
//! File shape (rewritten wholesale on every creation):
//! ```text
//! { "tokens": [ { "token": "ak_…", "description": "…", "created_at": "…" } ] }
//! ```
//!
//! Tokens are never revoked, rotated or expired. Lookups re-read the file,
//! so tokens added by another process become valid without a restart.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

const TOKEN_PREFIX: &str = "ak_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub description: String,
    pub created_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: Vec<Token>,
}

pub struct TokenStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    #[cfg(test)]
    fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Issue a new token for `description` and persist it.
    pub fn create(&self, description: &str) -> Result<Token, ApiError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ApiError::Validation("Description is required".into()));
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = self.read_file().map_err(|e| {
            error!(path = %self.path.display(), "cannot load token file: {e}");
            ApiError::Internal("Failed to save token".into())
        })?;

        let token = Token {
            token: generate_token(),
            description: description.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        file.tokens.push(token.clone());

        self.write_file(&file).map_err(|e| {
            error!(path = %self.path.display(), "cannot write token file: {e}");
            ApiError::Internal("Failed to save token".into())
        })?;

        info!(description = %token.description, total = file.tokens.len(), "token created");
        Ok(token)
    }

    /// All tokens with their values masked for display.
    pub fn list(&self) -> Vec<Token> {
        self.load_or_empty()
            .into_iter()
            .map(|t| Token { token: mask(&t.token), ..t })
            .collect()
    }

    /// `true` iff `candidate` exactly matches a stored token value.
    pub fn is_valid(&self, candidate: &str) -> bool {
        let wanted = Sha256::digest(candidate.as_bytes());
        self.load_or_empty()
            .iter()
            .any(|t| Sha256::digest(t.token.as_bytes()) == wanted)
    }

    fn load_or_empty(&self) -> Vec<Token> {
        match self.read_file() {
            Ok(file) => file.tokens,
            Err(e) => {
                warn!(path = %self.path.display(), "cannot load token file: {e}");
                Vec::new()
            }
        }
    }

    /// A missing file is an empty store; anything unreadable is an error so a
    /// corrupt file is never silently overwritten.
    fn read_file(&self) -> Result<TokenFile, String> {
        let data = match fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TokenFile::default()),
            Err(e) => return Err(format!("cannot read {}: {e}", self.path.display())),
        };
        if data.trim().is_empty() {
            return Ok(TokenFile::default());
        }
        serde_json::from_str(&data).map_err(|e| format!("malformed {}: {e}", self.path.display()))
    }

    fn write_file(&self, file: &TokenFile) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(file).map_err(|e| format!("serialise tokens: {e}"))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|e| format!("cannot write {}: {e}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| format!("cannot replace {}: {e}", self.path.display()))
    }
}

/// `ak_` followed by 32 lowercase hex characters (a random UUID v4).
pub fn generate_token() -> String {
    format!("{TOKEN_PREFIX}{}", Uuid::new_v4().simple())
}

/// Show only the first 8 and last 4 characters of tokens longer than 12.
pub fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return token.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("tokens.json"))
    }

    #[test]
    fn generated_tokens_have_prefix_and_hex_body() {
        let t = generate_token();
        assert!(t.starts_with("ak_"));
        assert_eq!(t.len(), 35);
        assert!(t[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(generate_token(), t);
    }

    #[test]
    fn mask_long_and_short() {
        assert_eq!(mask("ak_0123456789abcdef"), "ak_01234...cdef");
        assert_eq!(mask("abcdefghijkl"), "abcdefghijkl");
        assert_eq!(mask("short"), "short");
        assert_eq!(mask("abcdefghijklm"), "abcdefgh...jklm");
    }

    #[test]
    fn create_persists_and_validates() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let token = s.create("  ci runner ").unwrap();
        assert_eq!(token.description, "ci runner");
        assert!(s.is_valid(&token.token));

        let raw = fs::read_to_string(s.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["tokens"][0]["token"], token.token.as_str());

        // A fresh store over the same file sees the token.
        assert!(TokenStore::new(s.path()).is_valid(&token.token));
    }

    #[test]
    fn one_character_mutation_is_invalid() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let token = s.create("laptop").unwrap().token;
        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let mutated: String = chars.into_iter().collect();
        assert!(!s.is_valid(&mutated));
        assert!(!s.is_valid(""));
        assert!(!s.is_valid(&token[..token.len() - 1]));
    }

    #[test]
    fn empty_description_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(matches!(s.create("   "), Err(ApiError::Validation(_))));
        assert!(!s.path().exists());
    }

    #[test]
    fn list_masks_values_and_keeps_order() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let a = s.create("a").unwrap();
        let b = s.create("b").unwrap();
        let listed = s.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].description, "a");
        assert_eq!(listed[0].token, mask(&a.token));
        assert_eq!(listed[1].token, mask(&b.token));
        assert_eq!(listed[1].created_at, b.created_at);
    }

    #[test]
    fn missing_file_lists_empty() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(s.list().is_empty());
        assert!(!s.is_valid("ak_anything"));
    }

    #[test]
    fn malformed_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        fs::write(s.path(), "{ not json").unwrap();
        assert!(s.list().is_empty());
        assert!(matches!(s.create("x"), Err(ApiError::Internal(_))));
        assert_eq!(fs::read_to_string(s.path()).unwrap(), "{ not json");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let s = TokenStore::new(dir.path().join("nested/deeper/tokens.json"));
        let t = s.create("nested").unwrap();
        assert!(s.is_valid(&t.token));
    }

    #[test]
    fn concurrent_creates_keep_every_token() {
        let dir = TempDir::new().unwrap();
        let s = std::sync::Arc::new(store(&dir));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = s.clone();
                std::thread::spawn(move || s.create(&format!("worker {i}")).unwrap())
            })
            .collect();
        let tokens: Vec<Token> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(s.list().len(), 8);
        assert!(tokens.iter().all(|t| s.is_valid(&t.token)));
    }
}
