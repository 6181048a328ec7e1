use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::store::ScheduleBook;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Mirror of the workspace's `schedules` table. Only placement operations
    /// and master-data cascades write to it.
    pub book: ScheduleBook,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            db: None,
            book: ScheduleBook::default(),
        }
    }
}
