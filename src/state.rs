use crate::{config::AppConfig, db::DbPool, services::trips::TripStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub trips: TripStore,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let trips = TripStore::new(db.clone());
        Self { config, db, trips }
    }
}
