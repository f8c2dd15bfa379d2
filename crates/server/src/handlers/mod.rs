//! HTTP request handlers.

pub mod common;
pub mod confirm;
pub mod health;
pub mod offset;
pub mod signed_urls;
pub mod uploads;

pub use common::*;
pub use confirm::*;
pub use health::*;
pub use offset::*;
pub use signed_urls::*;
pub use uploads::*;
