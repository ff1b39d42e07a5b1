//! Shell-based job execution on the host.

use async_trait::async_trait;
use cinder_core::glob::PathGlob;
use cinder_core::ports::{ExecutionAdapter, ExecutionOutcome, ExecutionRequest};
use cinder_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Runs job scripts with `sh -c` under a per-attempt workspace.
///
/// Input artifacts are unpacked into the workspace before the script
/// starts; files matching the declared artifact paths are collected from
/// it afterwards. Cancellation kills the process group leader and still
/// reports a terminal outcome.
pub struct ShellAdapter {
    workspace_root: PathBuf,
    cancels: Mutex<HashMap<(String, u32), Arc<Notify>>>,
}

impl ShellAdapter {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            workspace_root,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    fn workspace_for(&self, job: &str, attempt: u32) -> PathBuf {
        let sanitized: String = job
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | ' ' => '_',
                c => c,
            })
            .collect();
        self.workspace_root
            .join(format!("{}-{}", sanitized, attempt))
    }

    fn register_cancel(&self, job: &str, attempt: u32) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.cancels
            .lock()
            .expect("cancel registry poisoned")
            .insert((job.to_string(), attempt), notify.clone());
        notify
    }

    fn deregister_cancel(&self, job: &str, attempt: u32) {
        self.cancels
            .lock()
            .expect("cancel registry poisoned")
            .remove(&(job.to_string(), attempt));
    }
}

#[async_trait]
impl ExecutionAdapter for ShellAdapter {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let start = std::time::Instant::now();
        let workspace = self.workspace_for(&request.job, request.attempt);
        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            Error::Adapter(format!("failed to create workspace: {}", e))
        })?;

        for artifact in &request.input_artifacts {
            unpack(&workspace, &artifact.files).await?;
        }

        info!(
            job = %request.job,
            attempt = request.attempt,
            workspace = %workspace.display(),
            "executing script"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&request.script)
            .current_dir(&workspace)
            .envs(&request.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Adapter(format!("failed to spawn: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = stream_lines(&request.job, "stdout", stdout);
        let stderr_handle = stream_lines(&request.job, "stderr", stderr);

        let cancel = self.register_cancel(&request.job, request.attempt);
        let wait_result = tokio::select! {
            status = child.wait() => status,
            _ = cancel.notified() => {
                warn!(job = %request.job, "cancel received, killing process");
                let _ = child.kill().await;
                child.wait().await
            }
        };
        self.deregister_cancel(&request.job, request.attempt);

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status = wait_result
            .map_err(|e| Error::Adapter(format!("failed to wait: {}", e)))?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(job = %request.job, exit_code, duration_ms, "script finished");

        let output_files = collect_outputs(&workspace, &request.output_paths)?;

        Ok(ExecutionOutcome {
            exit_code,
            duration_ms,
            output_files,
        })
    }

    async fn cancel(&self, job: &str, attempt: u32) -> Result<()> {
        let notify = self
            .cancels
            .lock()
            .expect("cancel registry poisoned")
            .get(&(job.to_string(), attempt))
            .cloned();
        if let Some(notify) = notify {
            notify.notify_one();
        }
        Ok(())
    }
}

fn stream_lines(
    job: &str,
    stream: &'static str,
    source: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
) -> tokio::task::JoinHandle<()> {
    let job = job.to_string();
    tokio::spawn(async move {
        let Some(source) = source else {
            return;
        };
        let mut lines = BufReader::new(source).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job = %job, stream, "{}", line);
        }
    })
}

async fn unpack(
    workspace: &Path,
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<()> {
    for (rel_path, contents) in files {
        let target = workspace.join(rel_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Adapter(format!("failed to unpack artifact: {}", e))
            })?;
        }
        tokio::fs::write(&target, contents).await.map_err(|e| {
            Error::Adapter(format!("failed to unpack artifact: {}", e))
        })?;
    }
    Ok(())
}

fn collect_outputs(
    workspace: &Path,
    globs: &[PathGlob],
) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    if globs.is_empty() {
        return Ok(files);
    }
    walk(workspace, workspace, globs, &mut files)?;
    Ok(files)
}

fn walk(
    root: &Path,
    dir: &Path,
    globs: &[PathGlob],
    files: &mut BTreeMap<String, Vec<u8>>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, globs, files)?;
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .map_err(|e| Error::Internal(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        if globs.iter().any(|g| g.matches(&rel)) {
            files.insert(rel, std::fs::read(&path)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::artifact::{ArtifactKey, StoredArtifact};
    use chrono::Utc;

    fn request(job: &str, script: &str) -> ExecutionRequest {
        ExecutionRequest {
            job: job.to_string(),
            attempt: 1,
            script: script.to_string(),
            env: BTreeMap::new(),
            input_artifacts: vec![],
            output_paths: vec![],
        }
    }

    fn adapter() -> (tempfile::TempDir, ShellAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ShellAdapter::new(dir.path().to_path_buf());
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_success_exit_code() {
        let (_dir, adapter) = adapter();
        let outcome = adapter.run(request("ok", "true")).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_failure_exit_code() {
        let (_dir, adapter) = adapter();
        let outcome = adapter.run(request("bad", "exit 3")).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_env_reaches_script() {
        let (_dir, adapter) = adapter();
        let mut req = request("env", "test \"$GREETING\" = hello");
        req.env
            .insert("GREETING".to_string(), "hello".to_string());
        let outcome = adapter.run(req).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn test_outputs_collected_by_glob() {
        let (_dir, adapter) = adapter();
        let mut req = request(
            "build",
            "mkdir -p dist && printf binary > dist/app && printf junk > scratch.tmp",
        );
        req.output_paths = vec![PathGlob::compile("dist/**").unwrap()];
        let outcome = adapter.run(req).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output_files.len(), 1);
        assert_eq!(outcome.output_files["dist/app"], b"binary");
    }

    #[tokio::test]
    async fn test_input_artifacts_unpacked() {
        let (_dir, adapter) = adapter();
        let artifact = Arc::new(StoredArtifact {
            key: ArtifactKey::new("build", "main", "sha"),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            files: [("dist/app".to_string(), b"binary".to_vec())]
                .into_iter()
                .collect(),
            checksum_sha256: String::new(),
        });
        let mut req = request("deploy", "test \"$(cat dist/app)\" = binary");
        req.input_artifacts = vec![artifact];
        let outcome = adapter.run(req).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn test_cancel_terminates_promptly() {
        let (_dir, adapter) = adapter();
        let adapter = Arc::new(adapter);

        let runner = adapter.clone();
        let running =
            tokio::spawn(async move { runner.run(request("slow", "sleep 30")).await });

        // Give the process a moment to start, then cancel.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        adapter.cancel("slow", 1).await.unwrap();

        let outcome = running.await.unwrap().unwrap();
        assert_ne!(outcome.exit_code, 0);
    }
}
