//! # Offkit Page
//!
//! The page side of the offline layer.
//!
//! ## Features
//!
//! - **ConnectivityMonitor**: online/offline state with transition callbacks
//! - **StatusIndicator**: "Back online" / "Offline mode" view model
//! - **FetchGateway**: `fetch` with capture into, and fallback from, the offline store
//! - **NetworkProbe**: periodic `HEAD` checks feeding the monitor
//! - **UpdatePrompt**: refresh notice when a new worker is installed
//!
//! ## Architecture
//!
//! ```text
//! PageContext
//!     ├── ConnectivityMonitor ◄── NetworkProbe / platform signals
//!     │       └── StatusIndicator (callbacks)
//!     ├── OfflineStore
//!     ├── FetchGateway ──► Fetcher
//!     └── UpdatePrompt ◄── WorkerEvent
//! ```

pub mod connectivity;
pub mod context;
pub mod gateway;
pub mod indicator;
pub mod probe;
pub mod update;

pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use context::PageContext;
pub use gateway::FetchGateway;
pub use indicator::{IndicatorView, StatusIndicator};
pub use probe::NetworkProbe;
pub use update::{UpdateNotice, UpdatePrompt};
