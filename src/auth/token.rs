use sha2::{Digest, Sha256};

const SESSION_PREFIX: &str = "chs_";

/// Generate a session token. Returns `(raw_token, sha256_hash)`.
/// Format: `chs_` + 32 random bytes as hex.
pub fn generate_session_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    let raw = format!("{SESSION_PREFIX}{}", hex::encode(bytes));
    let hash = hash_token(&raw);
    (raw, hash)
}

/// SHA-256 of a token string, lowercase hex. Only this value is persisted.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
