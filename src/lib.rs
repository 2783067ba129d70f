//! Graft: Federated Hierarchical Content Repositories
//!
//! Presents several hierarchical content sources as one repository. Requests
//! are typed values processed by connectors; federated reads merge what every
//! projected source contributes and cache the merged nodes; committed changes
//! are published to observers as batches and reduced to net changes per node.

pub mod config;
pub mod connector;
pub mod error;
pub mod execution;
pub mod federation;
pub mod graph;
pub mod logging;
pub mod observe;
pub mod processor;
pub mod request;

pub use error::{ConfigError, GraphError};
pub use federation::FederatedRepository;
