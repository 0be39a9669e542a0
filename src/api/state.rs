//! Application state for the API server

use crate::{Config, Gateway};
use std::sync::Arc;

/// State shared by all route handlers; cloned per request
#[derive(Clone)]
pub struct AppState {
    /// The gateway that submits and correlates jobs
    pub gateway: Arc<Gateway>,

    /// Configuration, read-only
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(gateway: Arc<Gateway>, config: Arc<Config>) -> Self {
        Self { gateway, config }
    }
}
