use std::sync::Arc;

use library::{Library, ScanSummary};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub config: Arc<ServerConfig>,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

impl AppState {
    pub fn new(library: Library, config: ServerConfig) -> Self {
        Self {
            library,
            config: Arc::new(config),
            watcher: Arc::new(RwLock::new(None)),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// `limit=-1` (or no limit) returns everything.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<usize>,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn limit(&self) -> Option<usize> {
        match self.limit {
            Some(limit) if limit >= 0 => Some(limit as usize),
            _ => None,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }
}

#[derive(Serialize)]
pub struct ScanStartedResponse {
    pub started: bool,
}

#[derive(Serialize)]
pub struct ScanStatusResponse {
    pub scanning: bool,
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub last_scan: Option<ScanSummary>,
}
