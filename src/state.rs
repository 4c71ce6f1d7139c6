//! Shared application state for all routes.

use crate::config::DocumentLoader;
use crate::service::CrudService;
use crate::settings::PageLimits;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub crud: CrudService,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, loader: DocumentLoader, limits: PageLimits) -> Self {
        AppState {
            crud: CrudService::new(store, loader, limits),
        }
    }
}
