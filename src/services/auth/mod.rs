pub mod factory;
pub mod issuer;
pub mod verifier;

pub use factory::{build_issuer, build_verifier};
pub use issuer::{IssueError, JwtIssuer};
pub use verifier::{JwtVerifier, VerifyError};
