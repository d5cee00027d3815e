use sha2::{Digest, Sha256};

/// Short, stable fingerprint of a secret for log correlation.
///
/// Purchase tokens and bearer credentials never appear in logs raw.
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}
