use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    /// Fails the response at this point.
    #[serde(rename = "error")]
    Error(String),
}

/// The preset response for one assistant reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, sending the request fails right away with this message.
    pub dispatch_error: Option<String>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            dispatch_error: None,
        }
    }

    /// Creates a `PresetResponse` that streams the given fragments.
    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = fragments
            .into_iter()
            .map(|f| PresetEvent::MessageDelta(f.into()))
            .collect::<Vec<_>>();
        Self::with_events(events)
    }

    /// Creates a `PresetResponse` whose request fails before any reply.
    #[inline]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            events: vec![],
            dispatch_error: Some(message.into()),
        }
    }

    /// Makes the response fail after the first `count` events.
    pub fn with_failure_after<S: Into<String>>(
        mut self,
        count: usize,
        message: S,
    ) -> Self {
        let at = count.min(self.events.len());
        self.events.insert(at, PresetEvent::Error(message.into()));
        self
    }

    /// Returns the reply text as a whole-response backend would deliver it,
    /// or the failure message if the response fails anywhere.
    pub(crate) fn whole_text(&self) -> Result<String, String> {
        if let Some(message) = &self.dispatch_error {
            return Err(message.clone());
        }
        let mut text = String::new();
        for event in &self.events {
            match event {
                PresetEvent::MessageDelta(delta) => text.push_str(delta),
                PresetEvent::Error(message) => return Err(message.clone()),
            }
        }
        Ok(text)
    }
}
