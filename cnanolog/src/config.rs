//! Typed surface behind `init_ex`.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rotation policy owned entirely by the writer; producers never observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
  #[default]
  None,
  Daily,
}

/// Output encoding. `Text` is named for signature stability but not
/// implemented — constructing it from `init_ex` is rejected with `InvalidConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
  #[default]
  Binary,
  Text,
}

#[derive(Debug, Clone)]
pub struct FacadeConfig {
  pub base_path: PathBuf,
  pub rotation: RotationPolicy,
  pub format: WireFormat,
  pub text_pattern: Option<String>,
  pub staging_buffer_size: usize,
  pub flush_batch_size: u32,
  pub flush_interval: Duration,
  pub max_buffers: u32,
  pub writer_affinity: Option<usize>,
}

pub const DEFAULT_STAGING_BUFFER_SIZE: usize = 12 * 1024 * 1024;
pub const DEFAULT_FLUSH_BATCH_SIZE: u32 = 2000;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_MAX_BUFFERS: u32 = 256;

impl FacadeConfig {
  pub fn new(base_path: impl AsRef<Path>) -> FacadeConfig {
    FacadeConfig {
      base_path: base_path.as_ref().to_path_buf(),
      rotation: RotationPolicy::None,
      format: WireFormat::Binary,
      text_pattern: None,
      staging_buffer_size: DEFAULT_STAGING_BUFFER_SIZE,
      flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
      flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
      max_buffers: DEFAULT_MAX_BUFFERS,
      writer_affinity: None,
    }
  }

  pub fn builder(base_path: impl AsRef<Path>) -> FacadeConfigBuilder {
    FacadeConfigBuilder { config: FacadeConfig::new(base_path) }
  }
}

/// Builder preferring named setter methods over public field mutation, since
/// `FacadeConfig`'s surface is too large for a single constructor call to stay
/// readable.
pub struct FacadeConfigBuilder {
  config: FacadeConfig,
}

impl FacadeConfigBuilder {
  pub fn rotation(mut self, policy: RotationPolicy) -> Self {
    self.config.rotation = policy;
    self
  }

  pub fn staging_buffer_size(mut self, bytes: usize) -> Self {
    self.config.staging_buffer_size = bytes;
    self
  }

  pub fn flush_batch_size(mut self, n: u32) -> Self {
    self.config.flush_batch_size = n;
    self
  }

  pub fn flush_interval(mut self, d: Duration) -> Self {
    self.config.flush_interval = d;
    self
  }

  pub fn max_buffers(mut self, n: u32) -> Self {
    self.config.max_buffers = n;
    self
  }

  pub fn writer_affinity(mut self, core: usize) -> Self {
    self.config.writer_affinity = Some(core);
    self
  }

  pub fn build(self) -> FacadeConfig {
    self.config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec() {
    let cfg = FacadeConfig::new("/tmp/app.cnl");
    assert_eq!(cfg.staging_buffer_size, DEFAULT_STAGING_BUFFER_SIZE);
    assert_eq!(cfg.flush_batch_size, DEFAULT_FLUSH_BATCH_SIZE);
    assert_eq!(cfg.max_buffers, DEFAULT_MAX_BUFFERS);
    assert_eq!(cfg.rotation, RotationPolicy::None);
  }

  #[test]
  fn builder_overrides_apply() {
    let cfg = FacadeConfig::builder("/tmp/app.cnl")
      .rotation(RotationPolicy::Daily)
      .flush_batch_size(50)
      .writer_affinity(2)
      .build();
    assert_eq!(cfg.rotation, RotationPolicy::Daily);
    assert_eq!(cfg.flush_batch_size, 50);
    assert_eq!(cfg.writer_affinity, Some(2));
  }
}
