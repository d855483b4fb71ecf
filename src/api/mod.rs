pub mod handlers;
pub mod routes;

pub use routes::{build_query_router, build_receiver_router};

use std::sync::Arc;

use crate::ingest::Receiver;
use crate::query::QueryService;
use crate::store::TraceStore;

/// Shared state for both HTTP servers
#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<Receiver>,
    pub query: QueryService,
    pub store: Arc<dyn TraceStore>,
}

impl AppState {
    pub fn new(receiver: Arc<Receiver>, query: QueryService, store: Arc<dyn TraceStore>) -> Self {
        Self {
            receiver,
            query,
            store,
        }
    }
}
