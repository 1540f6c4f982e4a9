//! Testing support for `streamgroup`
//!
//! - [`contract`]: a reusable contract suite every `LogStore` implementation
//!   should pass, exposed through [`log_store_contract_tests!`]
//! - [`chaos`]: a `LogStore` wrapper injecting transient failures
//! - [`recording`]: a `LogStore` wrapper recording every call
//! - [`collector`]: a scriptable handler recording delivered entries

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod collector;
pub mod contract;
pub mod recording;

pub use chaos::{ChaosConfig, ChaosLogStore, ChaosLogStoreExt, Probability};
pub use collector::{EntryCollector, Reply};
pub use recording::{RecordingLogStore, StoreCall};
