//! Process-wide tokio runtime that drives engine calls from C.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::runtime::Runtime;

use coffer_common::{Error, Result};

static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Get or create the global runtime.
pub fn get_runtime() -> Result<Arc<Runtime>> {
    RUNTIME
        .get_or_try_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .thread_name("coffer-worker")
                .enable_all()
                .build()
                .map(Arc::new)
                .map_err(Error::from)
        })
        .cloned()
}
