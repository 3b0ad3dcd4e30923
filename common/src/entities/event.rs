use super::{entity, DeploymentInstanceUid, Family};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

uid_type!(
    /// Prefixed by the source of the event
    EventUid
);

impl EventUid {
    /// Event reported by the cluster, keyed by the cluster event UID
    #[must_use]
    pub fn kubernetes(event_id: &str) -> Self {
        Self(format!("kubernetes/{event_id}"))
    }

    /// Restarts of either the platform container or the customer containers of an instance
    #[must_use]
    pub fn restart(instance: &DeploymentInstanceUid, platform: bool) -> Self {
        let containers = if platform { "platform" } else { "customer" };
        Self(format!("restart/{instance}/{containers}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    FailedToStart,
    FailedToPull,
    Restart,
}

impl EventKind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::FailedToStart => "FailedToStartEvent",
            EventKind::FailedToPull => "FailedToPullEvent",
            EventKind::Restart => "RestartEvent",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventProperties {
    pub count: i32,
    pub first_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
    /// Happened to the platform container rather than the customer ones
    pub platform: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventLinks {
    pub happened_to: DeploymentInstanceUid,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub uid: EventUid,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: EventProperties,
    pub links: EventLinks,
}
entity!(Event, Family::Event);

impl Event {
    #[must_use]
    pub fn new(
        uid: EventUid,
        kind: EventKind,
        count: i32,
        first_time: DateTime<Utc>,
        last_time: DateTime<Utc>,
        platform: bool,
        instance: &DeploymentInstanceUid,
    ) -> Self {
        Self {
            uid,
            kind: kind.type_name().to_string(),
            properties: EventProperties {
                count,
                first_time,
                last_time,
                platform,
            },
            links: EventLinks {
                happened_to: instance.clone(),
            },
        }
    }

    /// Merges an accumulated counter event with the previously stored one.
    ///
    /// Returns the event to store, or `None` when the stored one must be kept:
    /// the count only ever grows, and the time window only ever widens.
    #[must_use]
    pub fn merge_counter(mut self, stored: Option<&Event>) -> Option<Event> {
        let Some(stored) = stored else {
            return Some(self);
        };
        if self.properties.count <= stored.properties.count {
            return None;
        }
        let properties = &mut self.properties;
        properties.first_time = properties.first_time.min(stored.properties.first_time);
        properties.last_time = properties.last_time.max(stored.properties.last_time);
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DeploymentUid;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn restart(count: i32, first: u32, last: u32) -> Event {
        let instance = DeploymentInstanceUid::new(&DeploymentUid::new("t1", "a1", "Dev", "1"), "pod");
        Event::new(
            EventUid::restart(&instance, true),
            EventKind::Restart,
            count,
            at(first),
            at(last),
            true,
            &instance,
        )
    }

    #[test]
    fn test_restart_uid_distinguishes_container_groups() {
        let instance = DeploymentInstanceUid::new(&DeploymentUid::new("t1", "a1", "Dev", "1"), "pod");
        assert_eq!(
            EventUid::restart(&instance, true).as_str(),
            "restart/t1/a1/Dev/1/pod/platform"
        );
        assert_eq!(
            EventUid::restart(&instance, false).as_str(),
            "restart/t1/a1/Dev/1/pod/customer"
        );
        assert_eq!(EventUid::kubernetes("abc").as_str(), "kubernetes/abc");
    }

    #[test]
    fn test_merge_without_stored_event_keeps_new() {
        let event = restart(2, 3, 4);
        assert_eq!(event.clone().merge_counter(None), Some(event));
    }

    #[test]
    fn test_merge_with_smaller_count_keeps_stored() {
        let stored = restart(5, 1, 9);
        assert_eq!(restart(3, 0, 10).merge_counter(Some(&stored)), None);
        assert_eq!(restart(5, 0, 10).merge_counter(Some(&stored)), None);
    }

    #[test]
    fn test_merge_with_larger_count_widens_window() {
        let stored = restart(5, 1, 9);
        let merged = restart(6, 4, 6).merge_counter(Some(&stored)).unwrap();
        assert_eq!(merged.properties.count, 6);
        assert_eq!(merged.properties.first_time, at(1));
        assert_eq!(merged.properties.last_time, at(9));

        let merged = restart(7, 0, 12).merge_counter(Some(&stored)).unwrap();
        assert_eq!(merged.properties.first_time, at(0));
        assert_eq!(merged.properties.last_time, at(12));
    }
}
