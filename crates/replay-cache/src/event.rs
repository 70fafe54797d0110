use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One entry of a persisted event history.
///
/// A history is the JSON array of everything a producer emitted, in emission
/// order, and replaying it reproduces the producer's output without running
/// the producer again. The wire form is one object per event: `{"next": V}`,
/// `{"error": "..."}` or `{"completed": true}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
    /// A value the producer emitted.
    Next(T),
    /// The producer failed with this message. Terminal.
    Error(String),
    /// The producer finished. Terminal.
    Completed,
}

#[derive(Serialize, Deserialize)]
struct RawEvent<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<bool>,
}

impl<T: Serialize> Serialize for Event<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: RawEvent<&T> = match self {
            Event::Next(value) => RawEvent {
                next: Some(value),
                error: None,
                completed: None,
            },
            Event::Error(message) => RawEvent {
                next: None,
                error: Some(message.clone()),
                completed: None,
            },
            Event::Completed => RawEvent {
                next: None,
                error: None,
                completed: Some(true),
            },
        };
        raw.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Event<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::<T>::deserialize(deserializer)?;
        if let Some(value) = raw.next {
            Ok(Event::Next(value))
        } else if let Some(message) = raw.error {
            Ok(Event::Error(message))
        } else if raw.completed.is_some() {
            Ok(Event::Completed)
        } else {
            Err(D::Error::custom("event is neither next, error nor completed"))
        }
    }
}
