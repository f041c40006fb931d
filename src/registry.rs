//! Startup-time registry mapping stable string keys to stage factories.
//!
//! Configuration refers to filters and channels by key; the registry turns
//! those keys into instances at dispatch time. Factories are plain
//! closures registered at startup — there is no reflection or by-name type
//! resolution anywhere.

use crate::channel::{Channel, ChannelConfig};
use crate::error::{PipelineError, Result};
use crate::events::ChannelEvent;
use crate::filter::Filter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Builds a filter from its JSON configuration fragment.
pub type FilterFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Filter>> + Send + Sync>;

/// Builds a channel (and its event receiver) from a [`ChannelConfig`].
pub type ChannelFactory = Box<
    dyn Fn(&ChannelConfig) -> Result<(Channel, mpsc::UnboundedReceiver<ChannelEvent>)>
        + Send
        + Sync,
>;

/// Factory registry populated at startup, looked up at dispatch time.
#[derive(Default)]
pub struct Registry {
    filters: HashMap<String, FilterFactory>,
    channels: HashMap<String, ChannelFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter factory under `key`. Re-registering replaces the
    /// earlier factory.
    pub fn register_filter<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Filter>> + Send + Sync + 'static,
    {
        self.filters.insert(key.into(), Box::new(factory));
    }

    /// Register a channel factory under `key`.
    pub fn register_channel<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&ChannelConfig) -> Result<(Channel, mpsc::UnboundedReceiver<ChannelEvent>)>
            + Send
            + Sync
            + 'static,
    {
        self.channels.insert(key.into(), Box::new(factory));
    }

    /// Build a filter from the factory registered under `key`.
    pub fn build_filter(&self, key: &str, config: &serde_json::Value) -> Result<Arc<dyn Filter>> {
        let factory = self
            .filters
            .get(key)
            .ok_or_else(|| PipelineError::UnknownKey(key.to_string()))?;
        factory(config)
    }

    /// Build a channel from the factory registered under `key`.
    pub fn build_channel(
        &self,
        key: &str,
        config: &ChannelConfig,
    ) -> Result<(Channel, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let factory = self
            .channels
            .get(key)
            .ok_or_else(|| PipelineError::UnknownKey(key.to_string()))?;
        factory(config)
    }

    /// Registered filter keys, unordered.
    pub fn filter_keys(&self) -> Vec<&str> {
        self.filters.keys().map(|k| k.as_str()).collect()
    }

    /// Registered channel keys, unordered.
    pub fn channel_keys(&self) -> Vec<&str> {
        self.channels.keys().map(|k| k.as_str()).collect()
    }
}
