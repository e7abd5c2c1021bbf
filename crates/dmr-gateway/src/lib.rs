//! DMR Gateway Engine
//!
//! This crate connects one local repeater to any number of upstream DMR
//! network cores and an optional reflector network, deciding per timeslot
//! which upstream each call belongs to and rewriting its addressing on the
//! way.
//!
//! # Architecture
//!
//! - **Rewrite rules** ([`rewrite`]): talkgroup and private-call remaps,
//!   call-type conversion, source remaps, dynamic talkgroups and pass-all
//!   rules, evaluated first-match-wins in declaration order
//! - **Links**: the [`RepeaterLink`] the repeater logs in to, one
//!   [`NetworkLink`] per core with its login/keep-alive state machine, and
//!   the [`ReflectorLink`] that follows the selected reflector
//! - **Arbitration** ([`SlotOwnership`]): one source per slot until the slot
//!   goes quiet
//! - **Dispatcher** ([`Gateway`]): the single-threaded tick that moves
//!   frames between all of the above
//!
//! Sockets sit behind the [`Transport`] trait. [`UdpTransport`] runs one
//! receive task per socket feeding a bounded channel, so the dispatcher
//! never blocks; [`VirtualTransport`] scripts the far end in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use dmr_gateway::{setup, GatewayConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_file("dmrgateway.toml")?;
//! let cancel = CancellationToken::new();
//! let mut gateway = setup::build(&config, &cancel)?;
//! gateway.run(cancel).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod linking;
pub mod network;
pub mod ownership;
pub mod reflector;
pub mod repeater;
pub mod rewrite;
pub mod setup;
pub mod timer;
pub mod transport;
pub mod voice;

// Re-export configuration types
pub use config::{GatewayConfig, NetworkConfig, ReflectorConfig, RewriteConfig};

// Re-export engine types
pub use dispatcher::Gateway;
pub use error::{ConfigError, GatewayError, LinkError};
pub use events::{DropReason, FrameSource, GatewayEvent};
pub use ownership::{SlotOwner, SlotOwnership};

// Re-export link types
pub use linking::{LinkCommand, ReflectorLink, ReflectorSettings};
pub use network::{LinkState, NetworkLink, NetworkSettings};
pub use reflector::{Reflector, ReflectorDirectory};
pub use repeater::{RepeaterLink, RepeaterState};
pub use transport::{Connector, Transport, UdpTransport, VirtualPeer, VirtualTransport};

// Re-export rule types
pub use rewrite::{DynTgTable, RewriteRule, RuleResult, RuleSet};
pub use voice::{Announcement, VoicePrompt};
