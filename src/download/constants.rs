//! Timeouts shared by the web-service client and file transfers.

/// Default HTTP connect timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-read idle timeout in seconds.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Capacity of the buffered writer between the response body and the file.
pub(crate) const WRITE_BUFFER_CAPACITY: usize = 64 * 1024;
