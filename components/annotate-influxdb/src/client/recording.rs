//! In-memory [`Connect`] implementation that records instead of sending.

// Local crates
use crate::client::client::{Connect, Endpoint, WriteClient, WriteError};
use crate::point::point::BatchPoints;

// External crates
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingConnector {
    pub connects: Arc<Mutex<Vec<Endpoint>>>,
    pub writes: Arc<Mutex<Vec<BatchPoints>>>,
    /// When set, every write is rejected with this cause.
    pub reject_with: Option<String>,
}

impl RecordingConnector {
    pub fn rejecting(cause: &str) -> Self {
        Self {
            reject_with: Some(cause.to_string()),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn written(&self) -> Vec<BatchPoints> {
        self.writes.lock().unwrap().clone()
    }
}

#[derive(Debug)]
pub(crate) struct RecordingClient {
    writes: Arc<Mutex<Vec<BatchPoints>>>,
    reject_with: Option<String>,
}

impl Connect for RecordingConnector {
    type Client = RecordingClient;

    fn connect(&self, endpoint: Endpoint) -> RecordingClient {
        self.connects.lock().unwrap().push(endpoint);
        RecordingClient {
            writes: Arc::clone(&self.writes),
            reject_with: self.reject_with.clone(),
        }
    }
}

impl WriteClient for RecordingClient {
    async fn write(&self, batch: &BatchPoints) -> Result<(), WriteError> {
        self.writes.lock().unwrap().push(batch.clone());
        match &self.reject_with {
            Some(cause) => Err(WriteError::Rejected {
                status: 404,
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }
}
