pub mod models;

pub use models::offer::{
    ChangedFields, NewOffer, Offer, OfferChange, OfferDraft, OfferField, OfferPatch, OfferState,
};
pub use models::transition::{job_key, TransitionJob, TransitionKind};
