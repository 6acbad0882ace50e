//! # Reprovision a booted system into a bootc image
//!
//! This crate implements the entrypoint injected into a freshly booted
//! cloud instance to convert it into a bootc container image: it
//! generates a chain of systemd units which pull the target image (with
//! retries, optionally from an ephemeral registry on the default
//! gateway) and then install it over the running root before rebooting.
//! The entrypoint itself exits once the chain is handed to systemd.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]

pub mod cli;
pub(crate) mod config;
pub(crate) mod image;
pub(crate) mod net;
pub(crate) mod podman;
pub(crate) mod provision;
pub(crate) mod pull;
pub(crate) mod statefile;
pub(crate) mod systemd;
pub(crate) mod task;
