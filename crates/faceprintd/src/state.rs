use crate::config::Config;
use faceprint_core::{CorpusStore, FaceService};
use std::sync::Arc;

pub type SharedService = Arc<FaceService<Arc<dyn CorpusStore>>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: SharedService,
}

impl AppState {
    pub fn new(config: Config, service: FaceService<Arc<dyn CorpusStore>>) -> Self {
        Self {
            config: Arc::new(config),
            service: Arc::new(service),
        }
    }
}
