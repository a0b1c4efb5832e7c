//! Inbound messages and duplicate suppression across reconnects.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use snafu::prelude::*;

use crate::transport::Payload;

/// how many sequence numbers above the high-water mark are remembered
const MAX_TRACKED_AHEAD: usize = 1024;

/// Error when read the sequence number of an inbound message
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum SequenceError {
    /// data is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("message is not a json object"))]
    MessageNotObject,
}

/// Error when decode an inbound message into a typed value
#[derive(Debug, Snafu)]
#[snafu(display("decode message as {type_name} failed: {source}"))]
pub struct DecodeError {
    /// target type
    pub type_name: &'static str,
    /// source error
    pub source: serde_json::Error,
}

/// Message delivered by the server, emitted as a `Message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// message content
    pub payload: Payload,
    /// server assigned sequence number, when sequence tracking is enabled
    /// and the message carries one
    pub sequence: Option<u64>,
}

impl InboundMessage {
    /// Decode a JSON payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_slice(self.payload.as_bytes()).context(DecodeSnafu {
            type_name: std::any::type_name::<T>(),
        })
    }
}

/// Read the unsigned integer `field` of a JSON object payload.
///
/// A payload that is not a JSON object is a framing violation; a missing or
/// non integer field simply means the message is unsequenced.
pub(crate) fn sequence_of(payload: &Payload, field: &str) -> Result<Option<u64>, SequenceError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload.as_bytes()).context(error::ParseJSONFailed)?;

    let obj = value.as_object().context(error::MessageNotObject)?;

    Ok(obj.get(field).and_then(serde_json::Value::as_u64))
}

/// Drops replays of already delivered sequence numbers.
///
/// Within one connection the transport keeps order; duplicates appear when
/// the server replays its backlog after a reconnect. The high-water mark
/// lives as long as the client.
#[derive(Debug, Default)]
pub(crate) struct InboundTracker {
    high_water: Option<u64>,
    seen_ahead: HashSet<u64>,
}

impl InboundTracker {
    /// true if the message should be delivered.
    pub fn accept(&mut self, sequence: u64) -> bool {
        if matches!(self.high_water, Some(hw) if sequence <= hw)
            || self.seen_ahead.contains(&sequence)
        {
            log::trace!("Duplicated message {} received, drop it", sequence);
            return false;
        }

        match self.high_water {
            Some(hw) if hw.checked_add(1).is_some_and(|next| sequence > next) => {
                log::debug!("Message sequence jumped from {} to {}", hw, sequence);
                self.seen_ahead.insert(sequence);
                self.compact();
            }
            _ => {
                self.high_water = Some(sequence);
                self.compact();
            }
        }

        true
    }

    /// Advance the high-water mark over contiguous numbers seen ahead, and
    /// bound memory by giving up on gaps that never filled.
    fn compact(&mut self) {
        // the mark stops at u64::MAX, nothing can follow it
        while let Some(next) = self.high_water.and_then(|hw| hw.checked_add(1)) {
            if !self.seen_ahead.remove(&next) {
                break;
            }
            self.high_water = Some(next);
        }

        if self.seen_ahead.len() > MAX_TRACKED_AHEAD {
            if let Some(&max) = self.seen_ahead.iter().max() {
                log::warn!("Giving up on message gap, skipping to sequence {}", max);
                self.high_water = Some(max);
                self.seen_ahead.clear();
            }
        }
    }
}
