//! HMAC spawn-gate: a signed, expiring authorization artifact on disk, one per worker.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::worker::{is_apex, is_whitelisted};

type HmacSha256 = Hmac<Sha256>;

const CACHE_TTL: Duration = Duration::from_secs(60);

/// On-disk shape of a gate artifact. The external operator tool (out of scope for this crate)
/// writes `authorized_by`/`timestamp` on the wire, so those are renamed here to stay compatible
/// with artifacts issued by that tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateArtifact {
    #[serde(rename = "authorized_by")]
    pub issuer: String,
    pub subject: String,
    #[serde(rename = "timestamp")]
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

impl GateArtifact {
    fn signing_input(&self) -> String {
        format!(
            "{}|{}|{}",
            self.subject,
            self.issued_at.timestamp(),
            self.expires_at.timestamp()
        )
    }

    /// Builds a validly signed artifact for `subject`, issued now with the given TTL. The
    /// operator tool normally produces these on disk; exposed here so callers that need a gate
    /// file for a test harness don't reimplement the HMAC.
    pub fn signed(subject: impl Into<String>, ttl: chrono::Duration, secret: &[u8]) -> Self {
        let issued_at = Utc::now();
        let expires_at = issued_at + ttl;
        let mut artifact = Self {
            issuer: crate::worker::APEX.to_string(),
            subject: subject.into(),
            issued_at,
            expires_at,
            signature: String::new(),
        };
        let mut mac =
            HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
        mac.update(artifact.signing_input().as_bytes());
        artifact.signature = hex::encode(mac.finalize().into_bytes());
        artifact
    }

    /// Writes this artifact to `gate_dir` under the name the verifier expects.
    pub fn write_to(&self, gate_dir: &Path) -> std::io::Result<()> {
        std::fs::write(
            gate_dir.join(format!("{}.gate.json", self.subject)),
            serde_json::to_vec(self).expect("GateArtifact always serializes"),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    mtime: SystemTime,
    decision: bool,
    cached_at: SystemTime,
}

/// Verifies spawn-gate artifacts against a shared secret, with an mtime-keyed cache so that
/// revoking (or reissuing) a gate file invalidates the cached verdict on the very next check.
pub struct GateVerifier {
    secret: Option<Vec<u8>>,
    gate_dir: PathBuf,
    cache: parking_lot::Mutex<HashMap<String, CacheEntry>>,
}

impl GateVerifier {
    pub fn new(secret: Option<Vec<u8>>, gate_dir: impl Into<PathBuf>) -> Self {
        Self {
            secret,
            gate_dir: gate_dir.into(),
            cache: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn gate_path(&self, worker: &str) -> PathBuf {
        self.gate_dir.join(format!("{worker}.gate.json"))
    }

    /// `verify(worker) -> bool`. Never panics, never returns an `Err` — any I/O or parse
    /// failure is treated as "unauthorized" and cached like any other verdict.
    pub fn verify(&self, worker: &str) -> bool {
        if is_apex(worker) {
            return true;
        }
        let Some(secret) = &self.secret else {
            return false;
        };
        if !is_whitelisted(worker) {
            return false;
        }

        let path = self.gate_path(worker);
        let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return false,
        };

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(worker) {
                let fresh = entry.mtime == mtime
                    && entry
                        .cached_at
                        .elapsed()
                        .map(|age| age < CACHE_TTL)
                        .unwrap_or(false);
                if fresh {
                    return entry.decision;
                }
            }
        }

        let decision = self.verify_uncached(&path, worker, secret);
        self.cache.lock().insert(
            worker.to_string(),
            CacheEntry {
                mtime,
                decision,
                cached_at: SystemTime::now(),
            },
        );
        decision
    }

    fn verify_uncached(&self, path: &Path, worker: &str, secret: &[u8]) -> bool {
        let Ok(bytes) = std::fs::read(path) else {
            return false;
        };
        let Ok(artifact) = serde_json::from_slice::<GateArtifact>(&bytes) else {
            return false;
        };
        if artifact.issuer != crate::worker::APEX {
            return false;
        }
        if artifact.subject != worker {
            return false;
        }
        if Utc::now() >= artifact.expires_at {
            return false;
        }

        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            return false;
        };
        mac.update(artifact.signing_input().as_bytes());
        let Ok(sig_bytes) = hex::decode(&artifact.signature) else {
            return false;
        };
        mac.verify_slice(&sig_bytes).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn sign(secret: &[u8], subject: &str, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(format!("{subject}|{}|{}", issued_at.timestamp(), expires_at.timestamp()).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn write_gate(dir: &Path, worker: &str, secret: &[u8], ttl_secs: i64) {
        let issued_at = Utc::now();
        let expires_at = issued_at + chrono::Duration::seconds(ttl_secs);
        let artifact = GateArtifact {
            issuer: crate::worker::APEX.to_string(),
            subject: worker.to_string(),
            issued_at,
            expires_at,
            signature: sign(secret, worker, issued_at, expires_at),
        };
        std::fs::write(
            dir.join(format!("{worker}.gate.json")),
            serde_json::to_vec(&artifact).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn apex_never_gated() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = GateVerifier::new(Some(b"secret".to_vec()), dir.path());
        assert!(verifier.verify(crate::worker::APEX));
    }

    #[test]
    fn fails_closed_without_secret() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = GateVerifier::new(None, dir.path());
        assert!(!verifier.verify("Atlas"));
    }

    #[test]
    fn rejects_non_whitelisted_worker() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = GateVerifier::new(Some(b"secret".to_vec()), dir.path());
        assert!(!verifier.verify("NotAWorker"));
    }

    #[test]
    fn valid_gate_verifies() {
        let dir = tempfile::tempdir().unwrap();
        write_gate(dir.path(), "Atlas", b"secret", 3600);
        let verifier = GateVerifier::new(Some(b"secret".to_vec()), dir.path());
        assert!(verifier.verify("Atlas"));
    }

    #[test]
    fn expired_gate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_gate(dir.path(), "Atlas", b"secret", -10);
        let verifier = GateVerifier::new(Some(b"secret".to_vec()), dir.path());
        assert!(!verifier.verify("Atlas"));
    }

    #[test]
    fn missing_gate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = GateVerifier::new(Some(b"secret".to_vec()), dir.path());
        assert!(!verifier.verify("Atlas"));
    }

    #[test]
    fn cache_invalidated_by_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        write_gate(dir.path(), "Atlas", b"secret", 3600);
        let verifier = GateVerifier::new(Some(b"secret".to_vec()), dir.path());
        assert!(verifier.verify("Atlas"));

        // Revoke by truncating the file in place -- mtime changes, cache must not be trusted.
        std::thread::sleep(Duration::from_millis(10));
        std::fs::write(dir.path().join("Atlas.gate.json"), b"{}").unwrap();
        assert!(!verifier.verify("Atlas"));
    }
}
