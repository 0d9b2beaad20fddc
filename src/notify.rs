use std::{collections::HashMap, env, fmt, path::PathBuf};

use anyhow::Result;
use tracing::info;

/// A username/password pair from the secret store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait CredentialProvider {
    fn get_credentials(&self, service: &str, account: &str) -> Option<Credentials>;
}

/// Reads `IMPERVIOUS_<SERVICE>_<ACCOUNT>_PASSWORD` (and optionally
/// `..._USERNAME`, defaulting to the account name) from the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub(crate) fn var_name(service: &str, account: &str, suffix: &str) -> String {
        let clean = |s: &str| -> String {
            s.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' }).collect()
        };
        format!("IMPERVIOUS_{}_{}_{suffix}", clean(service), clean(account))
    }
}

impl CredentialProvider for EnvCredentials {
    fn get_credentials(&self, service: &str, account: &str) -> Option<Credentials> {
        let password = env::var(Self::var_name(service, account, "PASSWORD")).ok()?;
        let username = env::var(Self::var_name(service, account, "USERNAME")).unwrap_or_else(|_| account.to_string());
        Some(Credentials { username, password })
    }
}

/// Fixed credentials, keyed by `(service, account)`.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<(String, String), Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, service: &str, account: &str, username: &str, password: &str) -> Self {
        self.entries.insert(
            (service.to_string(), account.to_string()),
            Credentials { username: username.to_string(), password: password.to_string() },
        );
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn get_credentials(&self, service: &str, account: &str) -> Option<Credentials> {
        self.entries.get(&(service.to_string(), account.to_string())).cloned()
    }
}

/// Delivers the end-of-run summary.
pub trait Notifier {
    fn notify(&self, message: &str, recipients: &[String], attachments: &[PathBuf]) -> Result<()>;
}

/// Emits the summary as a log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, recipients: &[String], attachments: &[PathBuf]) -> Result<()> {
        info!(recipients = %recipients.join(", "), attachments = attachments.len(), "{message}");
        Ok(())
    }
}
