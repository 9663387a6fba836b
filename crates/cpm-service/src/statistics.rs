//! Observability events emitted by [`CpService`][crate::service::CpService].
//!
//! Every event is a [`Statistic`] handed to the configured
//! [`StatisticsSink`]. Events serialize as `{"signal": ..., "value": ...}`
//! so a sink can stream them as newline-delimited JSON.

use cpm_types::StationId;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// One measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "value", rename_all = "snake_case")]
pub enum Statistic {
    // ── per cycle ───────────────────────────────────────────────────────────
    /// Locally tracked objects after synchronization.
    SeenByLocal(usize),
    SeenByAwareness(usize),
    SeenByCpm(usize),
    /// Distinct stations known locally or remotely.
    SeenByAll(usize),

    // ── per generated message ───────────────────────────────────────────────
    GeneratedPocCount(usize),
    MitigatedPocCount(usize),
    ChannelBusyRatio(f64),
    SegmentCount(usize),
    PocIncluded(bool),
    /// Perceived objects in one sent segment.
    ObjectsPerSegment(usize),
    /// Segment number carrying the sensor information container.
    SensorInformationSegment(u8),
    /// Encoded size of one sent segment in bytes.
    MessageSize(usize),
    Sender(StationId),

    // ── per received message ────────────────────────────────────────────────
    ReceivedSender(StationId),
    /// Reception delay in ms.
    ReceiveDelay(i64),
    /// Age of the received information in ms.
    ReceivedAge(i64),
    DistanceToSender(f64),
    /// Distance between the receiver and a received object or sender.
    ReceivedDistance(f64),
    ReceivedObjectsPerSegment(usize),
    ReceivedObject(StationId),
    /// ms between the two newest reports about one station.
    TimeSinceLastUpdate(i64),
    DistanceSinceLastUpdate(f64),
    /// Stations currently reporting a given object.
    SenderRedundancy(usize),
    /// Stored reports about a given object.
    ObjectRedundancy(usize),
    SenderHistoryOverflow(StationId),
    ObjectHistoryOverflow(StationId),
    SenderDuplicateDrop(StationId),
    ObjectDuplicateDrop(StationId),
    SenderDuplicateReplace(StationId),
    ObjectDuplicateReplace(StationId),
}

/// Receiver of [`Statistic`] events.
pub trait StatisticsSink {
    fn record(&mut self, statistic: Statistic);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StatisticsSink for NullSink {
    fn record(&mut self, _statistic: Statistic) {}
}

/// Keeps every event in memory. Clones share the same buffer, so one clone
/// can be handed to the service while another is read by the caller.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<Statistic>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Statistic> {
        self.events.borrow().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<Statistic> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn count(&self, mut predicate: impl FnMut(&Statistic) -> bool) -> usize {
        self.events.borrow().iter().filter(|s| predicate(s)).count()
    }
}

impl StatisticsSink for RecordingSink {
    fn record(&mut self, statistic: Statistic) {
        self.events.borrow_mut().push(statistic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_clones_share_events() {
        let reader = RecordingSink::new();
        let mut writer = reader.clone();
        writer.record(Statistic::SegmentCount(2));
        writer.record(Statistic::Sender(7));

        assert_eq!(reader.count(|s| matches!(s, Statistic::Sender(_))), 1);
        assert_eq!(reader.take().len(), 2);
        assert!(reader.snapshot().is_empty());
    }

    #[test]
    fn statistic_serializes_as_signal_value_pair() {
        let json = serde_json::to_string(&Statistic::MessageSize(412)).unwrap();
        assert_eq!(json, r#"{"signal":"message_size","value":412}"#);

        let back: Statistic = serde_json::from_str(r#"{"signal":"poc_included","value":true}"#).unwrap();
        assert_eq!(back, Statistic::PocIncluded(true));
    }
}
