//! Stripe integration: webhook authentication, event decoding and hosted checkout.

pub mod checkout;
pub mod event;
pub mod signature;
