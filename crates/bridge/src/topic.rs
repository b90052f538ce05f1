//! Topic scheme shared by every component that touches the wire.
//!
//! Events travel on topics of the form
//!
//! ```text
//! iot/type/{device_type}/id/{device_id}/evt/{event_name}/fmt/{encoding}
//! ```
//!
//! Devices publish with all four values filled in. Applications subscribe
//! with `+` wildcards wherever a [`SubscriptionSpec`] leaves a field
//! unconstrained; the format segment is always `+` because subscribers
//! accept every encoding and pick the codec from the received topic.
//!
//! Inbound topics that do not follow this shape are not an error at this
//! layer: parsing returns `None` and the receive path counts the message
//! as unmatched.

/// Constraint on one topic field of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Match every value. Rendered as `+` in the subscription topic.
    Any,
    /// Match exactly this value.
    Exact(String),
}

impl Filter {
    /// Shorthand for [`Filter::Exact`].
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    /// Parses a configuration string. `any` and `+` map to [`Filter::Any`],
    /// everything else is taken literally.
    pub fn parse(value: &str) -> Self {
        match value {
            "any" | "+" => Self::Any,
            other => Self::Exact(other.to_string()),
        }
    }

    /// Whether a concrete topic value satisfies this constraint.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
        }
    }

    fn segment(&self) -> &str {
        match self {
            Self::Any => "+",
            Self::Exact(value) => value,
        }
    }
}

/// Which events a subscription covers.
///
/// Useful shapes are built by starting from [`SubscriptionSpec::any`] and
/// narrowing with struct update syntax:
///
/// ```ignore
/// let spec = SubscriptionSpec {
///     device_type: Filter::exact("thermostat"),
///     event_name: Filter::exact("temperature"),
///     ..SubscriptionSpec::any()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub device_type: Filter,
    pub device_id: Filter,
    pub event_name: Filter,
}

impl SubscriptionSpec {
    /// A subscription covering every event from every device.
    pub fn any() -> Self {
        Self {
            device_type: Filter::Any,
            device_id: Filter::Any,
            event_name: Filter::Any,
        }
    }

    /// A subscription covering every event from one device.
    pub fn for_device(device_type: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_type: Filter::exact(device_type),
            device_id: Filter::exact(device_id),
            event_name: Filter::Any,
        }
    }

    /// Renders the broker-side subscription topic for this spec.
    pub fn to_topic_filter(&self) -> String {
        format!(
            "iot/type/{}/id/{}/evt/{}/fmt/+",
            self.device_type.segment(),
            self.device_id.segment(),
            self.event_name.segment()
        )
    }

    /// Whether an inbound event address satisfies every constraint.
    pub fn matches(&self, address: &EventAddress) -> bool {
        self.device_type.matches(&address.device_type)
            && self.device_id.matches(&address.device_id)
            && self.event_name.matches(&address.event_name)
    }
}

/// The four values carried by an event topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAddress {
    pub device_type: String,
    pub device_id: String,
    pub event_name: String,
    pub encoding: String,
}

/// Renders the publish topic for one event.
pub fn event_topic(
    device_type: &str,
    device_id: &str,
    event_name: &str,
    encoding: &str,
) -> String {
    format!("iot/type/{device_type}/id/{device_id}/evt/{event_name}/fmt/{encoding}")
}

/// Parses an inbound topic against the event scheme.
///
/// Returns `None` for topics with the wrong number of segments, wrong
/// literal markers, or empty values. Such messages are counted as
/// unmatched by the receive path rather than treated as errors.
pub fn parse_event_topic(topic: &str) -> Option<EventAddress> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() != 9 {
        return None;
    }
    if segments[0] != "iot"
        || segments[1] != "type"
        || segments[3] != "id"
        || segments[5] != "evt"
        || segments[7] != "fmt"
    {
        return None;
    }

    let values = [segments[2], segments[4], segments[6], segments[8]];
    if values.iter().any(|value| value.is_empty()) {
        return None;
    }

    Some(EventAddress {
        device_type: values[0].to_string(),
        device_id: values[1].to_string(),
        event_name: values[2].to_string(),
        encoding: values[3].to_string(),
    })
}
