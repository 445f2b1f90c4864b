pub mod credential;
pub mod resolver;

pub use credential::{mask_secret, Credential, CredentialSource};
pub use resolver::{CredentialResolver, TOKEN_PREFIX};
