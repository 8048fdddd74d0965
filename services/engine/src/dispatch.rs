//! Message Dispatch
//!
//! Decodes inbound superkey messages and runs each one on its own task
//! against the engine.

use async_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::engine::SuperkeyEngine;
use crate::error::SuperkeyError;
use crate::superkey::{CreateRequest, DestroyRequest};

pub const EVENT_TYPE_HEADER: &str = "event_type";
pub const IDENTITY_HEADER: &str = "x-rh-identity";
pub const ORG_ID_HEADER: &str = "x-rh-sources-org-id";

pub const CREATE_EVENT: &str = "create_application";
pub const DESTROY_EVENT: &str = "destroy_application";

/// An inbound message: string headers plus a JSON body
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub headers: HashMap<String, String>,
    pub value: Vec<u8>,
}

impl Message {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            value: value.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Header value, empty when absent. Names are case-insensitive.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub enum Event {
    Create(CreateRequest),
    Destroy(DestroyRequest),
}

impl Event {
    /// Decode a message. The event kind comes from the `event_type` header
    /// and the caller identity from the identity/org-id headers.
    pub fn decode(message: &Message) -> Result<Self, SuperkeyError> {
        let identity_header = message.header(IDENTITY_HEADER);
        let org_id_header = message.header(ORG_ID_HEADER);
        if identity_header.is_empty() && org_id_header.is_empty() {
            return Err(SuperkeyError::Validation(format!(
                "no \"{}\" or \"{}\" header found",
                IDENTITY_HEADER, ORG_ID_HEADER
            )));
        }

        match message.header(EVENT_TYPE_HEADER) {
            CREATE_EVENT => {
                let mut request: CreateRequest = serde_json::from_slice(&message.value)
                    .map_err(|e| parse_error(CREATE_EVENT, e))?;
                request.identity_header = identity_header.to_string();
                request.org_id_header = org_id_header.to_string();
                Ok(Event::Create(request))
            }
            DESTROY_EVENT => {
                let mut request: DestroyRequest = serde_json::from_slice(&message.value)
                    .map_err(|e| parse_error(DESTROY_EVENT, e))?;
                request.identity_header = identity_header.to_string();
                request.org_id_header = org_id_header.to_string();
                Ok(Event::Destroy(request))
            }
            other => Err(SuperkeyError::Validation(format!(
                "unknown event type \"{}\"",
                other
            ))),
        }
    }
}

fn parse_error(event: &str, e: serde_json::Error) -> SuperkeyError {
    SuperkeyError::Validation(format!("failed to parse \"{}\" request: {}", event, e))
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub disable_creation: bool,
    pub disable_deletion: bool,
}

pub struct Dispatcher {
    engine: Arc<SuperkeyEngine>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(engine: Arc<SuperkeyEngine>, config: DispatcherConfig) -> Self {
        Self { engine, config }
    }

    /// Decode and process one message.
    pub async fn handle(&self, message: Message) -> Result<(), SuperkeyError> {
        let event = Event::decode(&message)?;
        debug!(org_id = %message.header(ORG_ID_HEADER), "Processing superkey message");

        match event {
            Event::Create(request) => {
                if self.config.disable_creation {
                    info!(tenant_id = %request.tenant_id, "Skipping \"create_application\" request, resource creation is disabled");
                    return Ok(());
                }
                self.engine.create_resources(request).await
            }
            Event::Destroy(request) => {
                if self.config.disable_deletion {
                    info!(tenant_id = %request.tenant_id, "Skipping \"destroy_application\" request, resource deletion is disabled");
                    return Ok(());
                }
                self.engine.destroy_resources(request).await
            }
        }
    }

    /// Consume messages until the channel closes, one task per message.
    /// In-flight tasks are drained before returning.
    pub async fn run(self: Arc<Self>, receiver: Receiver<Message>) {
        let mut tasks = JoinSet::new();
        info!("Superkey dispatcher started");

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Ok(message) => {
                        let dispatcher = self.clone();
                        tasks.spawn(async move {
                            if let Err(e) = dispatcher.handle(message).await {
                                error!(error = %e, "Superkey request failed");
                            }
                        });
                    }
                    Err(_) => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Superkey task panicked or was cancelled");
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "Queue closed, draining in-flight requests");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Superkey task panicked or was cancelled");
            }
        }
        info!("Superkey dispatcher stopped");
    }
}
