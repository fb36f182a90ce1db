//! Application services layer.

pub mod context;
pub mod error;
pub mod repos;
pub mod seckill;
pub mod shop_types;
pub mod shops;
