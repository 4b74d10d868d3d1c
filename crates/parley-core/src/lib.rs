//! # parley-core
//!
//! Presence lifecycle and message visibility engine for the Parley chat relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Presence** - Participant identity, joins and heartbeats
//! - **Router** - Message creation with validated addressing, filtered history
//! - **Sweeper** - Periodic eviction of participants that went silent
//! - **Store** - The persistence interface the core runs against
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│    Room     │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Presence   │────▶│    Store    │
//!                     └─────────────┘     └─────────────┘
//!                            ▲
//!                     ┌─────────────┐
//!                     │   Sweeper   │
//!                     └─────────────┘
//! ```

pub mod clock;
pub mod error;
pub mod message;
pub mod presence;
pub mod room;
pub mod router;
pub mod store;
pub mod sweeper;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FieldError, RelayError, StoreError, ValidationErrors};
pub use message::{Message, MessageId, MessageKind, BROADCAST};
pub use presence::{Announcer, Participant, PresenceRegistry};
pub use room::Room;
pub use router::MessageRouter;
pub use store::{MemoryStore, ResilientStore, Store, StorePolicy};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig, SweeperHandle};
