//! # Reference Resolver
//!
//! Access to user-granted folders and files outside the app's own storage.
//!
//! ## Overview
//!
//! - [`ReferenceResolver::acquire`] turns a location the user picked into a
//!   persisted [`Handle`]
//! - [`ReferenceResolver::resolve`] turns a handle into a temporary
//!   [`Grant`], re-deriving stale handles on the way
//! - [`ReferenceResolver::with_grant`] scopes a grant to one async block
//!
//! Grants must be released on every exit path; `Grant::release` does so
//! deterministically and `Drop` covers the paths that never reach it.

pub mod error;
pub mod grant;
pub mod resolver;

pub use error::{AccessError, Result};
pub use grant::{Grant, Handle};
pub use resolver::ReferenceResolver;
