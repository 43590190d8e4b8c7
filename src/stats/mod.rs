pub mod catalog;
pub mod filter;
pub mod flatten;

pub use catalog::TypeCatalog;
pub use filter::{TypeFilter, TypeFilterSettings};
pub use flatten::flatten;
