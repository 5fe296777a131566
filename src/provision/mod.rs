//! Machine-to-machine client provisioning.
//!
//! - [`api`]: the upstream management API contract and its HTTP client
//! - [`service`]: ownership-enforcing create/list/delete on top of it

pub mod api;
pub mod service;

pub use api::{HttpManagementApi, ManagementApi};
pub use service::{CreateClientInput, ProvisionError, ProvisioningService};
