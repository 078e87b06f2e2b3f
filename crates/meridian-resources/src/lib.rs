//! Resource federation for meridian
//!
//! A [`ResourceProcessor`] answers get/list for any registered resource kind
//! in any member cluster. Providers share one list pipeline
//! ([`query::default_list`]) so every kind sorts and paginates the same way.

#![deny(missing_docs)]

pub mod kinds;
pub mod processor;
pub mod provider;
pub mod query;

pub use kinds::builtin_lookup;
pub use processor::{KindNameLookup, ProviderLookup, ResourceKey, ResourceProcessor, Scope};
pub use provider::{ClusterTarget, KubeResourceProvider, ResourceProvider};
pub use query::{ListResult, Page, ResourceQuery};
