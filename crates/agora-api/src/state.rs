use std::sync::Arc;

use agora_db::Database;
use agora_gateway::registry::Registry;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub registry: Registry,
    pub jwt_secret: String,
}
