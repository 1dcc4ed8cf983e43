use super::Uploader;
use crate::{config::Config, util::ensure_dir};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Publishes artifacts by copying them under `publish_dir/<model_code>/`.
pub struct LocalUploader {
    publish_dir: PathBuf,
    public_base_url: String,
}

impl LocalUploader {
    pub fn new(cfg: &Config) -> Self {
        Self {
            publish_dir: PathBuf::from(&cfg.upload.publish_dir),
            public_base_url: cfg.upload.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn publish(&self, model_code: &str, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("artifact has no file name: {}", path.display()))?;
        let dest_dir = self.publish_dir.join(model_code);
        ensure_dir(&dest_dir)?;
        let dest = dest_dir.join(name);
        std::fs::copy(path, &dest)
            .with_context(|| format!("copy {} -> {}", path.display(), dest.display()))?;
        Ok(format!("{}/{}/{}", self.public_base_url, model_code, name))
    }
}

impl Uploader for LocalUploader {
    fn upload_primary(&self, model_code: &str, path: &Path) -> Result<String> {
        let url = self.publish(model_code, path)?;
        info!(model_code, "primary artifact published: {url}");
        Ok(url)
    }

    fn upload_secondary(&self, model_code: &str, path: &Path) -> Result<()> {
        let url = self.publish(model_code, path)?;
        info!(model_code, "secondary artifact published: {url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_built_from_base_and_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("m_model.tflite");
        std::fs::write(&src, b"bytes").unwrap();

        let mut cfg = Config::default();
        cfg.upload.publish_dir = dir.path().join("pub").display().to_string();
        cfg.upload.public_base_url = "https://cdn.example/models/".into();
        let up = LocalUploader::new(&cfg);

        let url = up.upload_primary("123_abcd1234", &src).unwrap();
        assert_eq!(url, "https://cdn.example/models/123_abcd1234/m_model.tflite");
        assert!(dir.path().join("pub/123_abcd1234/m_model.tflite").is_file());
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.upload.publish_dir = dir.path().display().to_string();
        let up = LocalUploader::new(&cfg);
        assert!(up.upload_secondary("x", &dir.path().join("nope.csv")).is_err());
    }
}
