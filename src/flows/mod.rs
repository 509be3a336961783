//! Token Flows
//!
//! Token acquisition against the ShareDo identity server.

pub mod impersonation;

pub use impersonation::{
    create_mock_token_grant, GrantRequest, ImpersonationGrant, MockTokenGrant, TokenGrant,
};
