//! Control plane of a Pulsar-style broker cluster: topic lookup, namespace bundle ownership and
//! distribution of namespace and topic policies over per-namespace system topics.
//!
//! Brokers coordinate solely through a shared [`MetadataStore`](store::MetadataStore) and a partitioned
//! [`EventLog`](event_log::EventLog); nothing here assumes an in-process lock shared between brokers.
//!
//! ```no_run
//! # async fn run() -> pulsar_control::Result<()> {
//! use std::sync::Arc;
//!
//! use pulsar_control::{
//!     BrokerBuilder,
//!     event_log::MemoryEventLog,
//!     listener::{AdvertisedListener, ListenerRegistry},
//!     lookup::LookupRequest,
//!     store::MemoryMetadataStore,
//! };
//!
//! let listeners = ListenerRegistry::new(AdvertisedListener {
//!     broker_service_url: Some("pulsar://10.0.0.1:6650".parse().unwrap()),
//!     ..Default::default()
//! });
//! let broker = BrokerBuilder::new(
//!     "broker-1",
//!     Arc::new(MemoryMetadataStore::new()),
//!     Arc::new(MemoryEventLog::new()),
//! )
//! .with_listeners(listeners)
//! .build()
//! .await?;
//!
//! let response = broker
//!     .lookup()
//!     .lookup(&LookupRequest::new("persistent://public/default/my-topic"))
//!     .await;
//! # Ok(())
//! # }
//! ```
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]
mod backoff;
pub mod broker;
pub mod config;
pub mod error;
pub mod event_log;
pub mod intercept;
pub mod listener;
pub mod lookup;
pub mod naming;
pub mod ownership;
pub mod policies;
pub mod store;
pub mod system_topic;

pub use backoff::BackoffConfig;
pub use broker::{Broker, BrokerBuilder};
pub use error::{Error, Result};
