use super::Normalizer;
use crate::{
    config::Config,
    dataset::{Dataset, LabeledSample},
};
use anyhow::{anyhow, bail, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// In-process landmark normalizer.
///
/// `passthrough` keeps rows as captured; `center_scale` translates every
/// landmark so the wrist (landmark 0) is the origin and divides by the
/// wrist-to-reference distance. The trailing handedness value is kept as is.
pub struct NativeNormalizer {
    mode: Mode,
    feature_len: usize,
    landmark_count: usize,
    reference: usize,
    label_re: Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Passthrough,
    CenterScale,
}

impl NativeNormalizer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mode = match cfg.normalize.mode.as_str() {
            "passthrough" => Mode::Passthrough,
            "center_scale" => Mode::CenterScale,
            other => bail!("unknown normalize.mode: {other}"),
        };
        let landmark_count = cfg.normalize.landmark_count;
        if mode == Mode::CenterScale {
            if cfg.dataset.feature_len != landmark_count * 3 + 1 {
                bail!(
                    "center_scale needs feature_len = landmark_count * 3 + 1 ({}), got {}",
                    landmark_count * 3 + 1,
                    cfg.dataset.feature_len
                );
            }
            if cfg.normalize.scale_reference_landmark >= landmark_count {
                bail!(
                    "scale_reference_landmark {} out of range",
                    cfg.normalize.scale_reference_landmark
                );
            }
        }
        Ok(Self {
            mode,
            feature_len: cfg.dataset.feature_len,
            landmark_count,
            reference: cfg.normalize.scale_reference_landmark,
            label_re: Regex::new(&cfg.security.label_pattern)?,
        })
    }

    fn canonical_label(&self, raw: &str) -> Result<String> {
        let label: String = raw.trim().nfkc().collect();
        if label.is_empty() {
            bail!("gesture label is empty");
        }
        if !self.label_re.is_match(&label) {
            bail!("gesture label {label:?} is not allowed");
        }
        Ok(label)
    }

    fn center_scale(&self, row: &[f64]) -> Vec<f64> {
        let coords = &row[..self.landmark_count * 3];
        let handedness = row[self.landmark_count * 3];
        let (bx, by, bz) = (coords[0], coords[1], coords[2]);

        let mut out: Vec<f64> = coords
            .chunks_exact(3)
            .flat_map(|p| [p[0] - bx, p[1] - by, p[2] - bz])
            .collect();

        let r = self.reference * 3;
        let scale = (out[r].powi(2) + out[r + 1].powi(2) + out[r + 2].powi(2)).sqrt();
        if scale > 0.0 {
            out.iter_mut().for_each(|v| *v /= scale);
        }
        out.push(handedness);
        out
    }
}

impl Normalizer for NativeNormalizer {
    fn normalize(&self, raw_samples: &[Vec<f64>], gesture: &str) -> Result<Dataset> {
        let label = self.canonical_label(gesture)?;
        let mut samples = Vec::with_capacity(raw_samples.len());
        for (i, row) in raw_samples.iter().enumerate() {
            if self.feature_len != 0 && row.len() != self.feature_len {
                return Err(anyhow!(
                    "sample {i} has {} values, expected {}",
                    row.len(),
                    self.feature_len
                ));
            }
            if let Some(pos) = row.iter().position(|v| !v.is_finite()) {
                bail!("sample {i} value {pos} is not finite");
            }
            let features = match self.mode {
                Mode::Passthrough => row.clone(),
                Mode::CenterScale => self.center_scale(row),
            };
            samples.push(LabeledSample::new(label.clone(), features));
        }

        let feature_len = raw_samples.first().map_or(self.feature_len, Vec::len);
        Ok(Dataset::new(feature_len, samples)?)
    }
}
