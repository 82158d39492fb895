//! Admission webhook transport for kube-secrets-init
//!
//! Command line parsing, HTTP(S) serving and the `/pods` admission handler.
//! The mutation decisions themselves live in `secrets-init-mutator`.

#![deny(missing_docs)]

pub mod config;
pub mod server;
pub mod webhook;
