//! Messages delivered by event sources

use serde::{Deserialize, Serialize};

use crate::{Payload, PayloadResult, Topic};

/// A message received on one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T = Payload> {
    /// The topic the message arrived on
    pub topic: Topic,

    /// The decoded payload
    pub payload: T,
}

impl<T> Message<T> {
    /// Create a new message
    pub fn new(topic: impl Into<Topic>, payload: T) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Transform the payload, keeping the topic
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            topic: self.topic,
            payload: f(self.payload),
        }
    }
}

impl Message<Payload> {
    /// Deserialize the payload into a typed message
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> PayloadResult<Message<T>> {
        Ok(Message {
            topic: self.topic.clone(),
            payload: self.payload.parse()?,
        })
    }
}
