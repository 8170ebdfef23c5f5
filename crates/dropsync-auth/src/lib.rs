//! Authorization handshake primitives.
//!
//! A change feed backed by a remote service needs an access token before it
//! can be used. Obtaining one is an interactive redirect flow: the user is
//! sent to the provider, and the provider redirects back with a code. This
//! crate models the waiting side of that flow:
//!
//! - [`AuthorizationContext`] is created per attempt and awaited with
//!   [`AuthorizationContext::wait`].
//! - [`RedirectCallback`] is handed to whatever receives the redirect (a
//!   loopback HTTP handler, a test) and completes the context at most once.
//! - [`AuthorizationBroker`] is the contract a provider-specific
//!   implementation fulfils.

mod broker;
mod context;

pub use broker::{AuthorizationBroker, StaticTokenBroker};
pub use context::{AuthorizationContext, RedirectCallback};
