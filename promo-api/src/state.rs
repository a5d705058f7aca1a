use std::sync::Arc;

use promo_core::{OfferStore, TransitionQueue};
use promo_offer::{OfferLifecycle, TransitionScheduler};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: OfferLifecycle,
}

impl AppState {
    pub fn new(store: Arc<dyn OfferStore>, queue: Arc<dyn TransitionQueue>) -> Self {
        Self {
            lifecycle: OfferLifecycle::new(store, TransitionScheduler::new(queue)),
        }
    }
}
