//! FastCGI gateway: record codec and client
//!
//! [`FcgiClient`] translates a [`Request`](crate::Request) into the record
//! sequence `BeginRequest`, `Params`, empty `Params`, `Stdin`, empty `Stdin`
//! and reassembles the `Stdout` stream of the reply into a
//! [`Response`](crate::Response).

pub mod record;

mod client;

pub use client::{gateway, Completion, FcgiClient, FcgiParam};
