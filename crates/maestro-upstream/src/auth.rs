//! OAuth credentials from the editor's `apps.json`.

use std::path::Path;

use serde_json::Value;

use crate::{UpstreamError, UpstreamResult};

/// Credentials extracted from `apps.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthInfo {
    /// OAuth token.
    pub token: String,
    /// User login, when recorded.
    pub user: String,
    /// App id (the key suffix after `github.com:`).
    pub app_id: String,
}

impl AuthInfo {
    /// Read credentials from an `apps.json` file.
    ///
    /// Keys look like `github.com:<AppId>`. Tokens starting with `ghu_`
    /// (user/assistant tokens) are preferred over other `oauth_token`
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds no
    /// token at all.
    pub fn read(path: &Path) -> UpstreamResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UpstreamError::Auth(format!("cannot read {}: {e}", path.display())))?;
        let apps: Value = serde_json::from_str(&content)
            .map_err(|e| UpstreamError::Auth(format!("invalid {}: {e}", path.display())))?;

        let Some(entries) = apps.as_object() else {
            return Err(UpstreamError::Auth(format!(
                "{} is not a JSON object",
                path.display()
            )));
        };

        let parse = |key: &str, value: &Value| -> Option<Self> {
            let token = value.get("oauth_token")?.as_str()?.to_string();
            let user = value
                .get("user")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let app_id = key.split_once(':').map(|(_, id)| id).unwrap_or_default();
            Some(Self {
                token,
                user,
                app_id: app_id.to_string(),
            })
        };

        // Prefer user tokens, then any token.
        let preferred = entries
            .iter()
            .filter_map(|(key, value)| parse(key, value))
            .find(|auth| auth.token.starts_with("ghu_"));
        if let Some(auth) = preferred {
            return Ok(auth);
        }
        entries
            .iter()
            .filter_map(|(key, value)| parse(key, value))
            .next()
            .ok_or_else(|| {
                UpstreamError::Auth(format!("no OAuth token found in {}", path.display()))
            })
    }
}
