use std::path::PathBuf;
use std::sync::Arc;

use ember_db::Database;
use ember_notify::Notifier;

use crate::error::ApiResult;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub notifier: Notifier,
    pub upload_dir: PathBuf,
}

impl AppStateInner {
    /// Run database work off the async runtime.
    pub async fn blocking<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.db.run_blocking(f).await?)
    }
}
