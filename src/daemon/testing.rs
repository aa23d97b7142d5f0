//! Recording collaborators for daemon unit tests

use crate::error::{Error, Result};
use crate::media::{AudioFetcher, CoverFetcher, TagWriter};
use crate::types::Tags;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
pub(crate) struct FakeAudio {
    fail: bool,
    rate_limits: AtomicU32,
    calls: Mutex<Vec<String>>,
}

impl FakeAudio {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn rate_limited_times(n: u32) -> Self {
        Self {
            rate_limits: AtomicU32::new(n),
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioFetcher for FakeAudio {
    async fn fetch(&self, source_url: &str, destination: &Path, _quality: u32) -> Result<()> {
        self.calls.lock().unwrap().push(source_url.to_string());
        if self.fail {
            return Err(Error::ExternalTool("video unavailable".into()));
        }
        let limited = self
            .rate_limits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if limited {
            return Err(Error::RateLimited {
                provider: "youtube".into(),
                retry_after: None,
            });
        }
        std::fs::write(destination, b"ID3")?;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeTags {
    written: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeTags {
    pub(crate) fn written(&self) -> Vec<(PathBuf, String)> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagWriter for FakeTags {
    async fn write_tags(&self, _tags: &Tags, path: &Path, source_url: &str) -> Result<()> {
        self.written
            .lock()
            .unwrap()
            .push((path.to_path_buf(), source_url.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeCover {
    calls: Mutex<Vec<String>>,
}

impl FakeCover {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CoverFetcher for FakeCover {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(url.to_string());
        std::fs::write(destination, b"jpeg")?;
        Ok(())
    }
}
