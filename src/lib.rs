//! # Rust Instrument
//!
//! Declarative, serialized command access to SCPI-style instruments.
//!
//! A driver declares an instrument's commands once, as read-only measurements, write-only
//! settings or read/write controls bound to textual templates. A `Session` owns the
//! transport and runs every command as one transaction: it waits for the instrument to
//! report completion, talks to it, and drains the error queue afterwards.
//!
//! USBTMC devices are reached through libusb (feature `usbtmc`, on by default). Any other
//! byte-stream can be plugged in by implementing `Transport`.
//!
//! ## Usage
//!
//! To use, add the following line to your project's Cargo.toml dependencies:
//! ```toml
//! rs-instrument = "0.1"
//! ```
//!
//! ## Example
//!
//! The example below declares a two-level source, talks to a simulated device, and sets
//! and reads the level by name.
//!
//! ```rust,no_run
//! use rs_instrument::transport::mock::SimTransport;
//! use rs_instrument::validators::strict_discrete_set;
//! use rs_instrument::{CommandSpec, CommandTable, Profile, Session, Value, Values};
//!
//! fn main() -> rs_instrument::Result<()> {
//!     // declare the commands
//!     let commands = CommandTable::builder("source")
//!         .command(
//!             "level",
//!             CommandSpec::control("V?", "V %d", "Output level")
//!                 .values(Values::mapping([("LOW", 0), ("HIGH", 1)]))
//!                 .map_values(true)
//!                 .validator(strict_discrete_set),
//!         )
//!         .build()?;
//!     let profile = Profile::new("Source", "ACME,SRC").with_commands(commands);
//!
//!     // a simulated device speaking SCPI
//!     let mut level = 0;
//!     let device = SimTransport::new(move |command| match command {
//!         "*OPC?" => Some("1".to_string()),
//!         "SYST:ERR?" => Some("+0,\"No error\"".to_string()),
//!         "*IDN?" => Some("ACME,SRC-1,0,1.0".to_string()),
//!         "V?" => Some(level.to_string()),
//!         _ => {
//!             if let Some(code) = command.strip_prefix("V ") {
//!                 level = code.parse().unwrap_or(level);
//!             }
//!             None
//!         }
//!     });
//!
//!     // connect, set and read back
//!     let session = Session::new(profile, device)?;
//!     session.set("level", "HIGH")?;
//!     assert_eq!(session.get("level")?, Value::from("HIGH"));
//!     Ok(())
//! }
//! ```
//!

pub mod channel;
pub mod coder;
pub mod command;
pub mod config;
pub mod constants;
pub mod dialect;
pub mod error;
pub mod session;
pub mod transport;
pub mod validators;

pub use channel::Channel;
pub use coder::{ElementType, Value, Values};
pub use command::{CommandSpec, CommandTable, Field, Override, Overrides};
pub use config::SessionConfig;
pub use dialect::{Bare, Completion, Dialect, Scpi, Tsp};
pub use error::{Error, QueuedError, Result};
pub use session::{Health, Profile, Session, Transaction};
pub use transport::{Resource, Transport};
