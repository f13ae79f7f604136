use std::sync::Arc;

use feedmerge_crypto::TokenCipher;
use feedmerge_db::Database;
use feedmerge_oauth::OAuthBroker;
use feedmerge_scheduler::Scheduler;

use crate::linker::AccountLinker;
use crate::session::TokenVault;
use crate::uploads::ObjectStorage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub cipher: TokenCipher,
    pub vault: TokenVault,
    pub linker: AccountLinker,
    pub broker: Arc<OAuthBroker>,
    pub scheduler: Arc<Scheduler>,
    /// `None` when no bucket is configured; presigning then answers 500.
    pub storage: Option<ObjectStorage>,
}
