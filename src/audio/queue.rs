use std::collections::VecDeque;
use tracing::{debug, info};

use crate::audio::track::Track;

/// Cola FIFO de un guild. No incluye nunca el track activo.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final y devuelve su posición (1 = siguiente)
    pub fn push(&mut self, track: Track) -> usize {
        info!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
        self.items.len()
    }

    /// Obtiene el siguiente track (FIFO - First In, First Out)
    pub fn pop(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => info!("➡️ Siguiente en cola (FIFO): {}", track.title()),
            None => info!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Limpia la cola
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        if removed > 0 {
            debug!("🗑️ Cola limpiada ({} tracks)", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::testing::track;
    use pretty_assertions::assert_eq;

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue
            .snapshot()
            .iter()
            .map(|t| t.title().to_string())
            .collect()
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = TrackQueue::new();
        assert_eq!(queue.push(track("a")), 1);
        assert_eq!(queue.push(track("b")), 2);
        assert_eq!(queue.push(track("c")), 3);

        assert_eq!(queue.pop().map(|t| t.title().to_string()), Some("a".into()));
        assert_eq!(titles(&queue), vec!["b", "c"]);
    }

    #[test]
    fn pop_on_empty_queue_is_none() {
        let mut queue = TrackQueue::new();
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_reports_removed_tracks() {
        let mut queue = TrackQueue::new();
        queue.push(track("a"));
        queue.push(track("b"));
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
    }
}
