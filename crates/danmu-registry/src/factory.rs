//! Building sessions from configs.

use std::sync::Arc;

use async_trait::async_trait;

use danmu_core::adapter::AdapterFactory;
use danmu_core::config::StreamConfig;
use danmu_core::handler::HandlerFactory;
use danmu_ws::{Connector, Session, SessionOptions};

use crate::error::BuildError;

/// Turns a config into a ready (not yet started) session with its handlers
/// subscribed.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    async fn build(&self, config: &StreamConfig) -> Result<Session, BuildError>;
}

/// Adapter from an [`AdapterFactory`], a shared connector, handlers from an
/// optional [`HandlerFactory`].
pub struct DefaultSessionFactory {
    adapters: Arc<dyn AdapterFactory>,
    connector: Arc<dyn Connector>,
    handlers: Option<Arc<dyn HandlerFactory>>,
    options: SessionOptions,
}

impl DefaultSessionFactory {
    pub fn new(
        adapters: Arc<dyn AdapterFactory>,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Self {
        Self {
            adapters,
            connector,
            handlers: None,
            options,
        }
    }

    pub fn with_handlers(mut self, handlers: Arc<dyn HandlerFactory>) -> Self {
        self.handlers = Some(handlers);
        self
    }
}

#[async_trait]
impl SessionFactory for DefaultSessionFactory {
    async fn build(&self, config: &StreamConfig) -> Result<Session, BuildError> {
        config.validate()?;
        let adapter = self.adapters.create(&config.url).await?;
        let session = Session::new(config, adapter, self.connector.clone(), self.options.clone())?;

        if let Some(factory) = &self.handlers {
            for handler in factory.handlers_for(config)? {
                session.subscribe(handler);
            }
        }
        tracing::debug!(
            task_id = config.id,
            handlers = session.dispatcher().handler_count(),
            "session built"
        );
        Ok(session)
    }
}
