use std::sync::Arc;
use dx_inference::Classifier;

pub struct AppState {
    pub classifier: Arc<Classifier>,
}

impl AppState {
    pub fn new(classifier: Arc<Classifier>) -> Self {
        Self { classifier }
    }
}
