//! A simple but easy to use library for controlling NAD receivers.
//!
//! NAD receivers accept line-oriented ASCII commands on their telnet port
//! (23). The same connection carries the responses to those commands and
//! status lines the receiver pushes on its own, such as temperatures or power
//! changes made with the remote. This crate correlates responses with their
//! commands, watches for power changes in the background and recovers lost
//! connections.
//!
//! ```rust
//! use nadproto::ClientOptions;
//!
//! # fn wrapper() -> Result<(), nadproto::Error> {
//! let client = ClientOptions::new().open("192.168.1.50")?;
//! if !client.get_power()? {
//!     client.set_power(true)?;
//! }
//! client.start_power_monitoring(|on| println!("power is now {}", if on { "on" } else { "off" }))?;
//! # Ok(())
//! # }
//! ```
//!
//! The building blocks are public too: a [`Port`](port::Port) sends commands
//! and waits for their responses over any [`Backend`](backend::Backend).

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(all(doc, feature = "doc_cfg"), feature(doc_cfg))]

pub mod backend;
pub mod client;
pub mod codec;
pub mod command;
pub mod error;
pub mod port;
pub mod registry;
pub mod timeout_guard;
pub mod volume;

pub use client::{Client, ClientOptions};
pub use error::Error;
