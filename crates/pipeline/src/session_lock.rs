use crate::config::SessionLockConfig;
use crate::{PipelineError, Result};
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Exclusive hold on a session's lock file, released on drop.
pub struct SessionLock {
    file: std::fs::File,
    waited: Duration,
}

impl SessionLock {
    /// How long acquisition blocked on another holder.
    #[must_use]
    pub const fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_path(config: &SessionLockConfig) -> PathBuf {
    let name: String = config
        .session
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    config.dir.join(format!("intent-{name}.lock"))
}

fn lock_error(action: &str, path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Lock(format!("{action} {}: {err}", path.display()))
}

/// Waits, off the runtime threads, until no other process holds the session.
pub async fn acquire_session_lock(config: &SessionLockConfig) -> Result<SessionLock> {
    let path = lock_path(config);
    tokio::fs::create_dir_all(&config.dir).await?;

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .await
        .map_err(|err| lock_error("open", &path, err))?
        .into_std()
        .await;

    let started = Instant::now();
    let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
        .await
        .map_err(|err| lock_error("join lock task for", &path, err))?
        .map_err(|err| lock_error("lock", &path, err))?;

    let waited = started.elapsed();
    if !waited.is_zero() {
        log::debug!("Session lock {} acquired after {waited:?}", path.display());
    }
    Ok(SessionLock { file, waited })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_name_is_sanitized() {
        let config = SessionLockConfig::new("/tmp/locks", "admin@site/1");
        assert_eq!(
            lock_path(&config),
            PathBuf::from("/tmp/locks/intent-admin_site_1.lock")
        );
    }

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionLockConfig::new(dir.path(), "tab-test");

        let first = acquire_session_lock(&config).await.unwrap();
        let contender_config = config.clone();
        let contender =
            tokio::spawn(async move { acquire_session_lock(&contender_config).await.unwrap() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .unwrap()
            .unwrap();
        assert!(second.waited() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn uncontended_lock_is_taken_at_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionLockConfig::new(dir.path().join("nested"), "solo");

        let lock = acquire_session_lock(&config).await.unwrap();
        assert!(lock.waited() < Duration::from_secs(1));
        assert!(dir.path().join("nested/intent-solo.lock").exists());
    }
}
