//! Type-erased registry of cross-rank payload decoders.

use lockstep_core::EventPayload;
use std::collections::HashMap;
use std::sync::RwLock;

/// Decodes a received payload into an invocable event, given the frame's
/// context node. Returning the payload (rather than invoking anything)
/// keeps decoding on the coordinator thread and execution inside the owning
/// LP's round.
pub type PayloadDecoder = Box<dyn Fn(u32, &[u8]) -> EventPayload + Send + Sync>;

/// Registry of payload decoders keyed by handler id.
///
/// Thread-safe via `RwLock`: registrations happen once at setup, lookups on
/// every received frame.
pub struct HandlerRegistry {
    decoders: RwLock<HashMap<u32, PayloadDecoder>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// Register the decoder for `handler`. Replaces any previous decoder
    /// under the same id.
    pub fn register(&self, handler: u32, decoder: PayloadDecoder) {
        self.decoders
            .write()
            .expect("handler registry lock poisoned")
            .insert(handler, decoder);
    }

    /// Decode a received payload, or `None` when the handler is unknown.
    pub fn decode(&self, handler: u32, context: u32, payload: &[u8]) -> Option<EventPayload> {
        let decoders = self
            .decoders
            .read()
            .expect("handler registry lock poisoned");
        decoders.get(&handler).map(|d| d(context, payload))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
