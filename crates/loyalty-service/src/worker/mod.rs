//! 后台维护任务
//!
//! - `expiry_worker`: 优惠过期清扫

pub mod expiry_worker;

pub use expiry_worker::OfferExpiryWorker;
