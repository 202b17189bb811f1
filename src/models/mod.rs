pub mod listing;
pub mod pack;
pub mod profile;
pub mod purchase;
pub mod quota;

// Re-export common types
pub use listing::{
    CreateListingRequest, ListListingsParams, Listing, ListingResponse, NewListing,
};
pub use pack::{CreditPack, PackResponse};
pub use profile::{Plan, Profile};
pub use purchase::{NewPurchase, Purchase, PurchaseResponse, PurchaseStatus};
pub use quota::{QuotaSnapshot, UserQuota};
