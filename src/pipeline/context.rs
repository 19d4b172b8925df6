//! Per-request correlation ids.

use uuid::Uuid;

use crate::logging::LogContext;

/// Short correlation id, unique enough to grep one upload out of a log.
pub fn new_upload_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("upload-{}", &id[..8])
}

pub fn upload_context() -> LogContext {
    LogContext::new(&new_upload_id())
}
