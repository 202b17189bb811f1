// Services module for SnapList Backend Core
// Business logic layer: the quota/ledger core plus the external collaborator
// clients the handlers compose.

pub mod background_tasks;
pub mod payments;
pub mod purchases;
pub mod quota;
pub mod rate_limit;
pub mod storage;
pub mod vision;

// Re-export commonly used services
pub use background_tasks::initialize_background_tasks;
pub use payments::{CheckoutSession, HttpPaymentClient, PaymentError, PaymentEvent};
pub use purchases::{
    infer_credits_from_amount, CheckoutInitiation, PackGrant, PurchaseError, PurchaseService,
};
pub use quota::{
    should_reset, split_creation_debit, QuotaError, QuotaService, DEFAULT_DAILY_CREATIONS,
    DEFAULT_SAVE_SLOTS,
};
pub use rate_limit::{
    rate_limit_identifier, window_start, RateLimitDecision, RateLimitError, RateLimitService,
};
pub use storage::{HttpObjectStore, ObjectStorage, StorageError};
pub use vision::{parse_listing_draft, ListingDraft, OpenAiVisionClient, VisionError, VisionProvider};
