//! Request trait - typed requests
//!
//! Binding the opcode to the request type means a typed route cannot be
//! registered under the wrong opcode by accident.

use serde::de::DeserializeOwned;

use crate::domain::Opcode;

/// Binds an opcode to a payload type.
///
/// # Example
/// ```ignore
/// #[derive(Deserialize)]
/// struct Login {
///     token: String,
/// }
///
/// impl Request for Login {
///     const OPCODE: Opcode = Opcode::new(100);
///     const NAME: &'static str = "login";
/// }
/// ```
pub trait Request: DeserializeOwned + Send + Sync + 'static {
    const OPCODE: Opcode;

    const NAME: &'static str;
}
