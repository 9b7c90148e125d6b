pub mod entity;
pub mod payload;
pub mod query;
pub mod value;
