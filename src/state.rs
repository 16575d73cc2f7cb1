use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{storage::StorageService, trips::TripService, visibility::VisibilityPolicy},
    ws::hub::SyncHub,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub storage: StorageService,
    pub hub: Arc<SyncHub>,
    pub trips: Arc<TripService>,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, storage: StorageService) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);

        let policy = VisibilityPolicy;
        let store: Arc<StorageService> = Arc::new(storage.clone());
        let hub = Arc::new(SyncHub::new(store.clone(), policy));
        let trips = Arc::new(TripService::new(
            store.clone(),
            store,
            policy,
            hub.clone(),
            config.edit_window(),
            config.listing_floor(),
        ));

        Self {
            config,
            db,
            storage,
            hub,
            trips,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
