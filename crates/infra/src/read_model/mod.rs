//! Disposable read model storage abstractions.

pub mod keyed_store;
pub mod page;

pub use keyed_store::{InMemoryKeyedStore, KeyedStore};
pub use page::{Page, Pagination};
