use super::{types::*, Trainer};
use crate::{config::Config, dataset::Dataset, labels::LabelMap};
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Trainer backed by an external Python script speaking JSON over stdio.
pub struct PythonTrainer {
    cfg: Config,
    script: PathBuf,
    python_exe: PathBuf,
}

impl PythonTrainer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        let script = scripts_dir.join(&cfg.training.script);
        if !script.exists() {
            return Err(anyhow!("missing script: {}", script.display()));
        }
        Ok(Self {
            cfg: cfg.clone(),
            script,
            python_exe: resolve_python_exe(&cfg.training.python_exe),
        })
    }

    fn run_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        input: &I,
        timeout_seconds: Option<u64>,
    ) -> Result<O> {
        debug!(
            "python run {} timeout={:?}",
            self.script.display(),
            timeout_seconds
        );
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.script);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        for (k, v) in &self.cfg.training.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning python: {}", self.script.display()))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            let bytes = serde_json::to_vec(input)?;
            use std::io::Write;
            stdin.write_all(&bytes)?;
            stdin.flush().ok();
        }

        let output = match timeout_seconds {
            Some(secs) => wait_with_timeout(&mut child, Duration::from_secs(secs))?,
            None => child
                .wait_with_output()
                .with_context(|| "waiting for python")?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "python script failed: {}\n{}",
                self.script.display(),
                stderr
            ));
        }

        if self.cfg.debug.keep_python_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("python stderr {}: {}", self.script.display(), stderr.trim());
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing python JSON output: {}", self.script.display()))
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("GESTURE_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl Trainer for PythonTrainer {
    fn doctor(&self) -> Result<DoctorOut> {
        self.run_json(
            &serde_json::json!({"cmd": "doctor"}),
            Some(self.cfg.training.doctor_timeout_seconds),
        )
    }

    fn train(&self, label_map: &LabelMap, dataset: &Dataset, job: &TrainJob) -> Result<TrainedModel> {
        let req = TrainIn {
            cmd: "train",
            label_map,
            sample_count: dataset.len(),
            feature_len: dataset.feature_len(),
            job,
        };
        let timeout = (self.cfg.training.timeout_seconds > 0)
            .then_some(self.cfg.training.timeout_seconds);
        info!(
            model_code = %job.model_code,
            classes = label_map.len(),
            samples = dataset.len(),
            "starting training script"
        );
        let out: TrainOut = self.run_json(&req, timeout)?;
        for w in &out.warnings {
            warn!(model_code = %job.model_code, "trainer: {w}");
        }
        if !out.ok {
            let msg = out.error.unwrap_or_else(|| "trainer returned ok=false".to_string());
            return Err(anyhow!(msg));
        }
        let primary = out
            .primary_artifact
            .unwrap_or_else(|| job.primary_model_path.clone());
        ensure_file(&primary)?;
        Ok(TrainedModel {
            primary_artifact: primary,
            full_model: out.full_model.or_else(|| {
                job.full_model_path
                    .exists()
                    .then(|| job.full_model_path.clone())
            }),
            metrics: out.metrics,
        })
    }
}

fn ensure_file(p: &Path) -> Result<()> {
    if p.is_file() {
        Ok(())
    } else {
        Err(anyhow!("trainer reported success but {} is missing", p.display()))
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so a chatty training loop can't block on a
    // full stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("python process timed out after {:?}", timeout);
            let _ = child.kill();
            child.wait().with_context(|| "wait after kill")?;
            let _ = stdout_thread.join();
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Err(anyhow!(
                "python process exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr)
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
