//! Secret masking for anything the orchestrator logs.
//!
//! Credentials pass through the registry exactly once, at fetch time; the
//! registry calls [`Redactor::register`] for every secret value before the
//! credentials leave it, so log forwarding only ever needs [`Redactor::redact`].

use std::sync::RwLock;

/// Seam for secret masking. The credential-fetch step calls `register`
/// synchronously before returning credentials to any caller.
pub trait Redactor: Send + Sync {
    /// Remember a secret so later log text can be masked.
    fn register(&self, secret: &str);

    /// Replace every registered secret occurring in `text`.
    fn redact(&self, text: &str) -> String;
}

const MASK: &str = "*****";

/// Default redactor: literal substring masking over the registered set.
#[derive(Default)]
pub struct MaskingRedactor {
    secrets: RwLock<Vec<String>>,
}

impl MaskingRedactor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Redactor for MaskingRedactor {
    fn register(&self, secret: &str) {
        // Short values would mask unrelated text.
        if secret.len() < 4 {
            return;
        }
        let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        if !secrets.iter().any(|s| s == secret) {
            secrets.push(secret.to_string());
        }
    }

    fn redact(&self, text: &str) -> String {
        let secrets = self.secrets.read().unwrap_or_else(|e| e.into_inner());
        let mut out = text.to_string();
        for secret in secrets.iter() {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_registered_secret() {
        let redactor = MaskingRedactor::new();
        redactor.register("s3cr3t-token");
        assert_eq!(
            redactor.redact("auth with s3cr3t-token done"),
            "auth with ***** done"
        );
    }

    #[test]
    fn masks_every_occurrence() {
        let redactor = MaskingRedactor::new();
        redactor.register("hunter2");
        assert_eq!(redactor.redact("hunter2 hunter2"), "***** *****");
    }

    #[test]
    fn ignores_short_secrets() {
        let redactor = MaskingRedactor::new();
        redactor.register("np");
        assert_eq!(redactor.redact("npm install"), "npm install");
    }

    #[test]
    fn unregistered_text_passes_through() {
        let redactor = MaskingRedactor::new();
        assert_eq!(redactor.redact("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let redactor = MaskingRedactor::new();
        redactor.register("token-abc");
        redactor.register("token-abc");
        assert_eq!(redactor.redact("token-abc"), "*****");
    }
}
