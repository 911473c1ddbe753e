use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::track::TrackInfo;

/// Paleta de colores del bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Crea un embed de éxito
pub fn create_success_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(format!("✅ {}", description))
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(format!("❌ {}", description))
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Título de un track con su duración, si se conoce
pub fn describe_track(info: &TrackInfo) -> String {
    let mut text = format!("**{}**", info.title);
    if let Some(artist) = &info.artist {
        text.push_str(&format!(" - {}", artist));
    }
    if let Some(duration) = info.duration {
        text.push_str(&format!(" `{}`", format_duration(duration)));
    }
    text
}

/// Formatea una duración en formato legible
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
