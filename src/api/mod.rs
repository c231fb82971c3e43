//! Talking to the REST server, online or not.

mod error;
#[cfg(test)]
pub(crate) mod mock;
mod offline_client;
mod transport;
mod types;

pub use error::ApiError;
pub use offline_client::OfflineClient;
pub(crate) use offline_client::refresh_list;
pub use transport::{form_value, HttpTransport, RestTransport, METHOD_OVERRIDE_FIELD};
pub use types::{unwrap_envelope, ApiResponse};
