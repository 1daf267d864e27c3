pub mod connector;
pub mod credentials;
pub mod filter;
pub mod merger;

pub use connector::{ConnectorFactory, SourceConnector};
pub use credentials::CredentialResolver;
pub use merger::SourceLoader;
