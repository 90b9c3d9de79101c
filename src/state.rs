use std::sync::Arc;

use crate::config::Config;
use crate::services::{
    Aggregator, Credentials, IdentityResolver, Lifecycle, LoginRateLimiter, SessionManager,
};
use crate::store::{DataFetcher, ReadStore, WriteStore};

/// Everything a handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn WriteStore>,
    pub fetcher: Arc<DataFetcher>,
    pub identities: IdentityResolver,
    pub aggregator: Aggregator,
    pub lifecycle: Arc<Lifecycle>,
    pub sessions: Arc<SessionManager>,
    pub limiter: Arc<LoginRateLimiter>,
    pub credentials: Credentials,
}

impl AppState {
    /// `primary` is the authoritative store; it is passed once as a writer and
    /// once as a reader so neither role needs the other's trait object.
    pub fn new(
        config: Config,
        primary: Arc<dyn WriteStore>,
        primary_reader: Arc<dyn ReadStore>,
        secondary: Option<Arc<dyn ReadStore>>,
    ) -> Self {
        let sessions = SessionManager::new(config.session_ttl, config.production);
        let limiter = LoginRateLimiter::new(config.rate_limit.clone());
        Self::with_services(config, primary, primary_reader, secondary, sessions, limiter)
    }

    /// Like [`AppState::new`] with prebuilt session and rate-limit components,
    /// e.g. ones driven by a manual clock.
    pub fn with_services(
        config: Config,
        primary: Arc<dyn WriteStore>,
        primary_reader: Arc<dyn ReadStore>,
        secondary: Option<Arc<dyn ReadStore>>,
        sessions: SessionManager,
        limiter: LoginRateLimiter,
    ) -> Self {
        let fetcher = Arc::new(DataFetcher::new(
            primary_reader,
            secondary,
            config.store_timeout,
        ));
        let identities =
            IdentityResolver::new(fetcher.clone(), config.user_scan_cap, config.store_timeout);
        let aggregator = Aggregator::new(fetcher.clone(), identities.clone(), config.slot_policy);
        let lifecycle = Lifecycle::new(
            primary.clone(),
            fetcher.clone(),
            identities.clone(),
            config.store_timeout,
        );
        let credentials = Credentials::new(
            config.main_coordinator_id.clone(),
            config.main_coordinator_pass_hash.clone(),
        );

        Self {
            config: Arc::new(config),
            store: primary,
            fetcher,
            identities,
            aggregator,
            lifecycle: Arc::new(lifecycle),
            sessions: Arc::new(sessions),
            limiter: Arc::new(limiter),
            credentials,
        }
    }
}
