use serenity::{builder::CreateMessage, http::Http};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::{
    audio::track::RequestContext,
    ui::embeds::{create_error_embed, create_success_embed},
};

/// Fire-and-forget status messages to a request's reply destination.
///
/// Implementations must not block the caller; the scheduler calls these from
/// its event loop and the result of the send is never consumed.
#[cfg_attr(test, mockall::automock)]
pub trait Messenger: Send + Sync {
    fn send_success(&self, destination: &RequestContext, text: String);
    fn send_error(&self, destination: &RequestContext, text: String);
}

/// Envía embeds a Discord en una tarea aparte
pub struct SerenityMessenger {
    http: Arc<Http>,
    runtime: Handle,
}

impl SerenityMessenger {
    pub fn new(http: Arc<Http>, runtime: Handle) -> Self {
        Self { http, runtime }
    }

    fn send(&self, destination: &RequestContext, message: CreateMessage) {
        let http = self.http.clone();
        let channel_id = destination.channel_id;
        self.runtime.spawn(async move {
            match channel_id.send_message(&http, message).await {
                Ok(_) => debug!("💬 Mensaje enviado a {}", channel_id),
                Err(e) => error!("Error al enviar mensaje a {}: {:?}", channel_id, e),
            }
        });
    }
}

impl Messenger for SerenityMessenger {
    fn send_success(&self, destination: &RequestContext, text: String) {
        self.send(
            destination,
            CreateMessage::new().embed(create_success_embed(&text)),
        );
    }

    fn send_error(&self, destination: &RequestContext, text: String) {
        self.send(
            destination,
            CreateMessage::new().embed(create_error_embed(&text)),
        );
    }
}
