//! Remote resource cache: keys, subscriptions, invalidation, and mutations.

mod client;
mod key;
mod mutation;
mod registry;
mod state;

pub use client::{CacheConfig, Fetcher, QueryClient, QueryError, SubscriberId, Subscription};
pub use key::{IntoResourceKey, KeyError, KeyPart, QueryKey, ResourceKey};
pub use mutation::{MutationDescriptor, MutationExecutor};
pub use registry::KeyRegistry;
pub use state::{QueryResult, QueryStatus};
