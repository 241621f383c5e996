use std::sync::Arc;

use crate::services::{
    draft::DraftClient, queue::JobStore, storage::LocalStorage, vision::VisionAnalyzer,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub draft: Arc<DraftClient>,
    pub vision: Arc<VisionAnalyzer>,
    pub uploads: Arc<LocalStorage>,
}

impl AppState {
    pub fn new(
        store: JobStore,
        draft: DraftClient,
        vision: VisionAnalyzer,
        uploads: LocalStorage,
    ) -> Self {
        Self {
            store,
            draft: Arc::new(draft),
            vision: Arc::new(vision),
            uploads: Arc::new(uploads),
        }
    }
}
