use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use time::format_description::well_known::Rfc3339;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// `<unix seconds>_<8 hex chars>`; sortable by creation time.
pub fn generate_model_code() -> String {
    let ts = time::OffsetDateTime::now_utc().unix_timestamp();
    let uid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", ts, &uid[..8])
}
