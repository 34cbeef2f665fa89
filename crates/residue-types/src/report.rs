use facet::Facet;
use std::collections::BTreeMap;

use crate::ObjectKey;

/// One tracked object that was still alive when a report was taken.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Runtime type name, cached when the object was constructed.
    pub type_name: String,

    /// Address-derived identity of the object.
    pub object: ObjectKey,

    /// Human-readable description supplied by the host, if any.
    pub label: Option<String>,

    /// Registration order within the tracer. Strictly increasing, so a
    /// reused address always gets a fresh generation.
    pub generation: u64,
}

/// What a [`LeakReport`] was taken for.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ReportKind {
    /// Teardown report: every object listed is a leak.
    Leaks,

    /// Mid-run dump of live objects. Nothing in it is a failure yet.
    LiveObjects,
}

/// A point-in-time listing of tracked objects, oldest first.
#[derive(Facet, Debug, Clone)]
pub struct LeakReport {
    pub kind: ReportKind,
    pub objects: Vec<ObjectRecord>,
}

impl LeakReport {
    pub fn new(kind: ReportKind, objects: Vec<ObjectRecord>) -> Self {
        Self { kind, objects }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of listed objects per type name.
    pub fn count_by_type(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.objects {
            *counts.entry(record.type_name.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Short form of an object used in checkpoints.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ObjectLog {
    pub type_name: String,
    pub object: ObjectKey,
}

/// Objects created and removed since the previous checkpoint.
///
/// An object both created and removed inside the same window shows up in
/// neither list.
#[derive(Facet, Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub created: Vec<ObjectLog>,
    pub removed: Vec<ObjectLog>,
}

impl Checkpoint {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(type_name: &str, addr: u64, generation: u64) -> ObjectRecord {
        ObjectRecord {
            type_name: type_name.to_string(),
            object: ObjectKey::new(addr).expect("non-zero address"),
            label: None,
            generation,
        }
    }

    #[test]
    fn count_by_type_groups_records() {
        let report = LeakReport::new(
            ReportKind::Leaks,
            vec![
                record("Buffer", 0x10, 1),
                record("Event", 0x20, 2),
                record("Buffer", 0x30, 3),
            ],
        );
        let counts = report.count_by_type();
        assert_eq!(counts.get("Buffer"), Some(&2));
        assert_eq!(counts.get("Event"), Some(&1));
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn report_serializes_with_snake_case_kind() {
        let report = LeakReport::new(ReportKind::LiveObjects, vec![record("Buffer", 0x10, 1)]);
        let json = facet_json::to_string(&report).expect("report should serialize");
        assert!(json.contains("\"live_objects\""), "{json}");
        assert!(json.contains("\"Buffer\""), "{json}");
    }
}
