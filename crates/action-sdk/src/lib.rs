// action-sdk: Foundation layer for the remote action step runner.
// This crate has ZERO dependencies on other workspace crates and provides
// process, filesystem, string and URL helpers used by the upper layers.

pub mod io_util;
pub mod process_invoker;
pub mod string_util;
pub mod url_util;

// Re-export commonly used items at crate root
pub use io_util::IOUtil;
pub use process_invoker::{
    ProcessCancelledError, ProcessExitCodeError, ProcessInvoker, ProcessOutput, ProcessStartInfo,
};
pub use string_util::StringUtil;
pub use url_util::UrlUtil;
