pub mod azure;
pub mod credential;
pub mod error;
pub mod local;
pub mod provider;

pub use azure::{AzureProvider, AzureProviderConfig};
pub use error::DriverError;
pub use local::InMemoryProvider;
pub use provider::{
    ExistenceOutcome, IdentityLookup, NameAvailability, OperationHandle, OperationStatus, Provider,
};
