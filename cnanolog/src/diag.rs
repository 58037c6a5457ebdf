//! Internal fault reporting, independent of the user's own log stream.
//!
//! A logging engine can't log its own writer failures through itself, so the
//! escape hatch for panic and shutdown paths is a bracket-tagged `eprintln!`,
//! nothing more. Only called at lifecycle boundaries and for writer I/O
//! failures — never once per dropped entry.

#[inline]
pub fn writer_io_error(context: &str, err: &std::io::Error) {
  eprintln!("[cnanolog] writer I/O error during {context}: {err}");
}

#[inline]
pub fn writer_fatal(context: &str) {
  eprintln!("[cnanolog] writer entering fatal state at {context}; further writes will drop silently");
}

#[inline]
pub fn shutdown_warning(msg: &str) {
  eprintln!("[cnanolog] shutdown: {msg}");
}
