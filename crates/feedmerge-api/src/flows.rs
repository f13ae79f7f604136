use std::sync::Arc;

use async_trait::async_trait;
use feedmerge_db::Database;
use feedmerge_db::models::OAuthStateRow;
use feedmerge_oauth::{FlowStore, OAuthError, PendingFlow};

/// Pending OAuth flows persisted in the `oauth_states` table, so a flow
/// started before a restart can still be completed.
pub struct DbFlowStore(pub Arc<Database>);

fn to_row(flow: PendingFlow) -> OAuthStateRow {
    OAuthStateRow {
        state: flow.state,
        platform: flow.platform,
        user_id: flow.user_id,
        code_verifier: flow.code_verifier,
        redirect_uri: flow.redirect_uri,
        expires_at: flow.expires_at,
        created_at: flow.created_at,
    }
}

fn from_row(row: OAuthStateRow) -> PendingFlow {
    PendingFlow {
        state: row.state,
        platform: row.platform,
        user_id: row.user_id,
        code_verifier: row.code_verifier,
        redirect_uri: row.redirect_uri,
        expires_at: row.expires_at,
        created_at: row.created_at,
    }
}

fn store_error(e: anyhow::Error) -> OAuthError {
    OAuthError::Store(e.to_string())
}

#[async_trait]
impl FlowStore for DbFlowStore {
    async fn save(&self, flow: PendingFlow) -> Result<(), OAuthError> {
        let row = to_row(flow);
        self.0
            .blocking(move |db| db.insert_oauth_state(&row))
            .await
            .map_err(store_error)
    }

    async fn find(&self, state: &str) -> Result<Option<PendingFlow>, OAuthError> {
        let state = state.to_string();
        let row = self
            .0
            .blocking(move |db| db.find_oauth_state(&state))
            .await
            .map_err(store_error)?;
        Ok(row.map(from_row))
    }

    async fn take(&self, state: &str) -> Result<Option<PendingFlow>, OAuthError> {
        let state = state.to_string();
        let row = self
            .0
            .blocking(move |db| db.take_oauth_state(&state))
            .await
            .map_err(store_error)?;
        Ok(row.map(from_row))
    }
}
