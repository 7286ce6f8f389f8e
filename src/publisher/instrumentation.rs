//! Enabled/disabled switch chosen once from configuration.

use serde::Serialize;

use crate::{config::PublisherConfig, encoding::EncodeError, error::BuildError};

use super::Publisher;

/// Either a live [`Publisher`] or a no-op stand-in.
///
/// Application code holds one of these and calls [`send_message`]
/// unconditionally; whether anything is published was decided when the
/// value was built.
///
/// [`send_message`]: Instrumentation::send_message
#[derive(Debug, Default)]
pub enum Instrumentation {
    #[default]
    Disabled,
    Active(Publisher),
}

impl Instrumentation {
    /// Build the strategy selected by `config.enabled`.
    pub fn from_config(config: &PublisherConfig) -> Result<Self, BuildError> {
        if !config.enabled {
            return Ok(Self::Disabled);
        }
        Ok(Self::Active(config.builder().build()?))
    }

    pub fn send_message<T>(&self, message: &T) -> Result<(), EncodeError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Self::Disabled => Ok(()),
            Self::Active(publisher) => publisher.send_message(message),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn publisher(&self) -> Option<&Publisher> {
        match self {
            Self::Disabled => None,
            Self::Active(publisher) => Some(publisher),
        }
    }

    pub fn close(&self) {
        if let Self::Active(publisher) = self {
            publisher.close();
        }
    }
}
