// Domain and bridge models
pub mod bridge;
pub mod catalog;
pub mod common;
pub mod purchase;
pub mod verification;
