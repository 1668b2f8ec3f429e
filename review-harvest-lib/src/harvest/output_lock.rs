use super::LOG_TARGET;
use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fs4::fs_std::FileExt;
use ohno::IntoAppError;
use std::fs::{self, File, OpenOptions};

/// Guard that releases the output lock when dropped
#[derive(Debug)]
pub struct OutputLockGuard(File);

impl Drop for OutputLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            log::warn!(target: LOG_TARGET, "Could not unlock output: {e:#}");
        }
    }
}

/// Path of the lock file guarding `output_path`.
#[must_use]
pub fn lock_path_for(output_path: &Utf8Path) -> Utf8PathBuf {
    let mut name = output_path.file_name().unwrap_or("output").to_string();
    name.push_str(".lock");
    output_path.with_file_name(name)
}

/// Take an exclusive advisory lock on the output file for the duration of a run.
///
/// Blocks until any other harvester writing to the same output finishes.
pub async fn acquire_output_lock(output_path: &Utf8Path) -> Result<OutputLockGuard> {
    let lock_path = lock_path_for(output_path);

    if let Some(parent) = lock_path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent).into_app_err_with(|| format!("creating directory '{parent}'"))?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .into_app_err_with(|| format!("opening output lock file at '{lock_path}'"))?;

    let file = tokio::task::spawn_blocking(move || {
        file.lock_exclusive()
            .into_app_err_with(|| format!("acquiring exclusive lock on '{lock_path}'"))?;
        log::debug!(target: LOG_TARGET, "Acquired output lock at '{lock_path}'");
        Ok::<_, ohno::AppError>(file)
    })
    .await
    .into_app_err("lock task panicked")??;

    Ok(OutputLockGuard(file))
}
