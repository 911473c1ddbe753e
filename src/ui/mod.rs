//! Presentación: embeds y envío de mensajes de estado a Discord.

pub mod embeds;
pub mod messenger;
