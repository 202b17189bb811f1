// Application state shared across handlers
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    config::RateLimitingConfig,
    db::DieselPool,
    services::{
        HttpPaymentClient, ObjectStorage, PurchaseService, QuotaService, RateLimitService,
        VisionProvider,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub quota_service: Arc<QuotaService>,
    pub purchase_service: Arc<PurchaseService>,
    pub rate_limit_service: Arc<RateLimitService>,
    pub rate_limit_config: Arc<RateLimitingConfig>,
    pub vision: Arc<dyn VisionProvider>,
    pub storage: Arc<dyn ObjectStorage>,
    pub payments: Arc<HttpPaymentClient>,
    pub max_connections: u32,
}
