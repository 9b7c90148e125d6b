pub mod entities;

pub use entities::Entities;
