//! Error surface for lifecycle boundaries only. Nothing on the producer hot
//! path or in the writer loop returns one of these — drops and writer I/O failures
//! are counted in `Stats` and reported via `diag`, never propagated as a `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to spawn writer thread")]
  WriterThreadSpawn,

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("cnanolog is already initialized")]
  AlreadyInitialized,

  #[error("cnanolog has not been initialized")]
  NotInitialized,

  #[error("invalid CPU core id: {0}")]
  InvalidCore(usize),

  #[error("register_level called after init")]
  RegisterLevelAfterInit,

  #[error("level value {0} is reserved for a built-in level or already registered")]
  LevelValueTaken(u8),
}
