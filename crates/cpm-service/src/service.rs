//! [`CpService`] – the collective perception engine of one station.
//!
//! The scheduler drives the service through two entry points that never
//! overlap:
//!
//! - [`CpService::trigger`] runs a generation cycle:
//!
//!   1. **Synchronize** local tracking against the environment model
//!      (configured sensor category only) and remote tracking against the
//!      awareness store.
//!   2. **Check timing** – continue only when at least the generation
//!      interval has passed since the last sent CPM. With DCC restriction
//!      the interval is the throttle's, clamped to
//!      `gen_cpm_min..=gen_cpm_max`.
//!   3. **Select** candidates through the [`GenerationRule`].
//!   4. **Mitigate** redundancy, always or only above the configured
//!      channel load.
//!   5. **Assemble** object records and let the [`Segmenter`] pack them;
//!      validate every segment.
//!   6. **Send** all segments, then update the per-object bookkeeping.
//!
//! - [`CpService::indicate`] records a received CPM in remote tracking: the
//!   sender itself, and every perceived object except this station.
//!
//! Nothing is sent and no bookkeeping changes when assembly or validation
//! fails; the error is returned to the scheduler.

use crate::config::ServiceConfig;
use crate::encoder;
use crate::facilities::Facilities;
use crate::segmenter::Segmenter;
use crate::statistics::{Statistic, StatisticsSink};
use cpm_rules::config::build_chain;
use cpm_rules::generation::{GenerationRule, PocSelection};
use cpm_rules::redundancy::{MitigationContext, RedundancyChain};
use cpm_tracking::arena::{ObjectArena, ObjectHandle};
use cpm_tracking::awareness::AwarenessStore;
use cpm_tracking::environment::EnvironmentModel;
use cpm_tracking::local::LocalTracking;
use cpm_tracking::remote::{InsertResult, RemoteObjectEntry, RemoteTrackingStore, ReportedDynamics};
use cpm_types::message::{
    domain, CollectivePerceptionMessage, ItsPduHeader, PerceivedObject, MAX_PERCEIVED_OBJECTS,
};
use cpm_types::{
    Angle, ConfigError, CpmError, DriveDirection, EgoState, GeoPosition, ItsClock, Position, SimTime, StationId,
    TrackedDynamics,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

/// Per-call view of the station's surroundings.
///
/// Everything here is owned by the caller; the service only reads it.
#[derive(Clone, Copy)]
pub struct World<'a> {
    pub arena: &'a dyn ObjectArena,
    pub environment: &'a EnvironmentModel,
    pub awareness: &'a AwarenessStore,
    pub ego: &'a EgoState,
}

/// What one [`CpService::trigger`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The generation interval had elapsed.
    pub triggered: bool,
    /// Candidates chosen by the generation rule.
    pub generated: usize,
    /// Candidates left after redundancy mitigation.
    pub mitigated: usize,
    /// Segments handed to the transport.
    pub segments: usize,
    /// Perceived objects across all sent segments.
    pub objects_sent: usize,
    /// A sensor information container was sent.
    pub sensor_information: bool,
}

/// What one [`CpService::indicate`] call recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveReport {
    pub sender: StationId,
    pub sender_result: InsertResult,
    /// Perceived objects stored in remote tracking.
    pub objects_recorded: usize,
    /// Perceived objects dropped as duplicates.
    pub objects_dropped: usize,
    /// The message listed this station among its perceived objects.
    pub ego_skipped: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// CpService
// ────────────────────────────────────────────────────────────────────────────

pub struct CpService {
    config: ServiceConfig,
    facilities: Facilities,
    generation: Box<dyn GenerationRule>,
    redundancy: RedundancyChain,
    clock: ItsClock,
    local: LocalTracking,
    remote: RemoteTrackingStore,
    last_cpm: SimTime,
    last_sensor_information: SimTime,
}

impl CpService {
    /// Validate `config`, check the facilities it requires and build its
    /// rules. The first CPM is due one minimum interval after `now`; the
    /// first one always carries sensor information.
    pub fn new(config: ServiceConfig, facilities: Facilities, now: SimTime) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.with_dcc_restriction && facilities.throttle.is_none() {
            return Err(ConfigError::MissingFacility("transmit rate throttle"));
        }
        if config.dynamic_redundancy_mitigation && facilities.probe.is_none() {
            return Err(ConfigError::MissingFacility("channel probe"));
        }
        let generation = config.generation.build()?;
        let redundancy = build_chain(&config.redundancy)?;

        info!(
            generation = generation.name(),
            redundancy = ?redundancy.names().collect::<Vec<_>>(),
            mtu = config.mtu,
            dcc = config.with_dcc_restriction,
            "CP service initialised"
        );

        Ok(Self {
            clock: ItsClock::new(config.its_epoch_offset_ms),
            last_cpm: now,
            last_sensor_information: now - config.add_sensor_information(),
            config,
            facilities,
            generation,
            redundancy,
            local: LocalTracking::new(),
            remote: RemoteTrackingStore::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn local_tracking(&self) -> &LocalTracking {
        &self.local
    }

    pub fn remote_tracking(&self) -> &RemoteTrackingStore {
        &self.remote
    }

    /// Time the last CPM was sent (or the service was created).
    pub fn last_cpm(&self) -> SimTime {
        self.last_cpm
    }

    /// Minimum spacing between two CPMs right now.
    pub fn generation_interval(&self) -> Duration {
        let min = self.config.gen_cpm_min();
        match &self.facilities.throttle {
            Some(throttle) if self.config.with_dcc_restriction => throttle
                .interval(self.config.dcc_profile())
                .clamp(min, self.config.gen_cpm_max()),
            _ => min,
        }
    }

    // ── generation ──────────────────────────────────────────────────────────

    /// Run one generation cycle at `now`.
    #[instrument(skip_all, fields(station = world.ego.station_id, now = %now))]
    pub fn trigger(&mut self, world: &World<'_>, now: SimTime) -> Result<CycleReport, CpmError> {
        trace!("trigger");
        let category = self.config.local_tracking_category;
        self.local
            .synchronize(world.environment.handles_by_category(category), world.arena);
        self.remote.synchronize_awareness(world.awareness, now);
        self.record_seen_by(world);

        let mut report = CycleReport::default();
        let interval = self.generation_interval();
        if now.elapsed_since(self.last_cpm) < interval {
            return Ok(report);
        }
        report.triggered = true;
        debug!(?interval, "CPM creation triggered");

        let PocSelection { mut candidates, force } =
            self.generation.candidates(&self.local, world.arena, now, interval);
        report.generated = candidates.len();

        let channel_busy_ratio = self.facilities.probe.as_ref().map(|p| p.channel_busy_ratio());
        let mitigate = !self.config.dynamic_redundancy_mitigation
            || channel_busy_ratio.is_some_and(|cbr| cbr > self.config.redundancy_load);
        if mitigate {
            let ctx = MitigationContext {
                remote: &self.remote,
                arena: world.arena,
                ego: world.ego,
                now,
            };
            self.redundancy.filter(&mut candidates, &ctx);
        }
        report.mitigated = candidates.len();

        let sensor_information_due =
            now.elapsed_since(self.last_sensor_information) >= self.config.add_sensor_information();

        let statistics = &mut self.facilities.statistics;
        statistics.record(Statistic::GeneratedPocCount(report.generated));
        statistics.record(Statistic::MitigatedPocCount(report.mitigated));

        if candidates.is_empty() && !force && !sensor_information_due {
            debug!("nothing to report");
            return Ok(report);
        }

        let sent = self.generate(world, now, candidates, sensor_information_due, channel_busy_ratio)?;
        report.segments = sent.segments;
        report.objects_sent = sent.objects;
        report.sensor_information = sent.sensor_information;
        Ok(report)
    }

    fn generate(
        &mut self,
        world: &World<'_>,
        now: SimTime,
        mut candidates: Vec<ObjectHandle>,
        with_sensor_information: bool,
        channel_busy_ratio: Option<f64>,
    ) -> Result<Sent, CpmError> {
        debug!(candidates = candidates.len(), sic = with_sensor_information, "creating CPM");

        let mut number_of_perceived_objects = self.local.len();
        if number_of_perceived_objects > MAX_PERCEIVED_OBJECTS {
            error!(
                excess = number_of_perceived_objects - MAX_PERCEIVED_OBJECTS,
                "number of perceived objects exceeds maximum, capping"
            );
            number_of_perceived_objects = MAX_PERCEIVED_OBJECTS;
        }
        if candidates.len() > MAX_PERCEIVED_OBJECTS {
            error!(
                excess = candidates.len() - MAX_PERCEIVED_OBJECTS,
                "perceived object candidates exceed maximum, removing"
            );
            candidates.truncate(MAX_PERCEIVED_OBJECTS);
        }

        let category = self.config.local_tracking_category;
        let records: Vec<(ObjectHandle, PerceivedObject)> = candidates
            .iter()
            .filter_map(|&handle| {
                let object = world.arena.resolve(handle)?;
                let tracking = world
                    .environment
                    .get(handle)
                    .and_then(|t| t.tracking_time(category));
                Some((handle, encoder::perceived_object(object, tracking, world.ego)))
            })
            .collect();
        let poc_included = !records.is_empty();

        let template = CollectivePerceptionMessage {
            header: ItsPduHeader::cpm(world.ego.station_id),
            generation_delta_time: self.clock.generation_delta_time(world.ego.updated),
            management: encoder::management_container(world.ego, None),
            station_data: Some(encoder::station_data(world.ego)),
            sensor_information: None,
            perceived_objects: Vec::new(),
            number_of_perceived_objects: number_of_perceived_objects as u8,
        };
        let sensor_information = with_sensor_information.then(encoder::sensor_information);

        let segmentation = Segmenter::new(self.facilities.codec.as_ref(), self.config.mtu).segment(
            &template,
            records,
            sensor_information,
        )?;

        // All or nothing: a single invalid segment aborts the cycle.
        for message in &segmentation.messages {
            self.facilities
                .codec
                .validate(message)
                .map_err(|e| CpmError::InvalidMessage(e.to_string()))?;
        }

        let sizes: Vec<(usize, usize)> = segmentation
            .messages
            .iter()
            .map(|m| (self.facilities.codec.encoded_size(m), m.perceived_objects.len()))
            .collect();
        let segments = segmentation.messages.len();
        for message in segmentation.messages {
            self.facilities.transport.send(message)?;
        }
        debug!(segments, objects = segmentation.included.len(), "CPM transmitted");

        let statistics = &mut self.facilities.statistics;
        if let Some(cbr) = channel_busy_ratio {
            statistics.record(Statistic::ChannelBusyRatio(cbr));
        }
        statistics.record(Statistic::SegmentCount(segments));
        statistics.record(Statistic::PocIncluded(poc_included));
        for (size, objects) in sizes {
            statistics.record(Statistic::MessageSize(size));
            statistics.record(Statistic::ObjectsPerSegment(objects));
            statistics.record(Statistic::Sender(world.ego.station_id));
        }
        if let Some(segment) = segmentation.sensor_information_segment {
            statistics.record(Statistic::SensorInformationSegment(segment));
        }

        self.last_cpm = now;
        if segmentation.sensor_information_segment.is_some() {
            self.last_sensor_information = now;
        }
        for &handle in &segmentation.included {
            if let Some(object) = world.arena.resolve(handle) {
                self.local.set_prev_dynamics(handle, object.dynamics(now));
            }
        }

        Ok(Sent {
            segments,
            objects: segmentation.included.len(),
            sensor_information: segmentation.sensor_information_segment.is_some(),
        })
    }

    fn record_seen_by(&mut self, world: &World<'_>) {
        let mut unique: BTreeSet<StationId> = self
            .local
            .handles()
            .filter_map(|h| world.arena.resolve(h).map(|o| o.station_id))
            .collect();
        unique.extend(self.remote.iter().map(|(id, _)| id));

        let statistics = &mut self.facilities.statistics;
        statistics.record(Statistic::SeenByLocal(self.local.len()));
        statistics.record(Statistic::SeenByAwareness(self.remote.seen_by_awareness()));
        statistics.record(Statistic::SeenByCpm(self.remote.seen_by_perception()));
        statistics.record(Statistic::SeenByAll(unique.len()));
    }

    // ── reception ───────────────────────────────────────────────────────────

    /// Record a received CPM at `now`.
    #[instrument(skip_all, fields(station = world.ego.station_id, sender = message.station_id(), now = %now))]
    pub fn indicate(
        &mut self,
        world: &World<'_>,
        now: SimTime,
        message: &CollectivePerceptionMessage,
    ) -> Result<ReceiveReport, CpmError> {
        if let Err(e) = self.facilities.codec.validate(message) {
            warn!(error = %e, "invalid CPM received");
            return Err(CpmError::InvalidMessage(e.to_string()));
        }
        let sender_id = message.station_id();
        let sender_geo = reference_geo(message)?;
        let Some(vehicle) = message.station_data else {
            warn!("CPM without station data received");
            return Err(CpmError::InvalidMessage("missing originating vehicle container".into()));
        };

        // Drop expired history first so the ring buffers cannot overflow.
        self.remote.synchronize_awareness(world.awareness, now);

        let receiver = world.ego.position;
        let sender_now = self.clock.reconstruct(message.generation_delta_time, now);
        let sender_delay = now.millis_since(sender_now);
        let sender_position = self.facilities.projection.to_local(sender_geo);
        let sender_dynamics = ReportedDynamics {
            received: now,
            reporter_position: sender_position,
            object: TrackedDynamics {
                timestamp: sender_now,
                position: sender_position,
                speed: sender_speed(vehicle.speed, vehicle.drive_direction),
                heading: sender_heading(vehicle.heading),
            },
        };
        debug!(
            delay_ms = sender_delay,
            distance = receiver.distance(&sender_position),
            "CPM received"
        );

        let policy = self.config.duplicate_policy;
        let statistics = &mut self.facilities.statistics;
        let entry = self.remote.entry(sender_id);
        let previous = entry.latest();
        let (current, sender_result) = entry.add_history(sender_id, sender_dynamics, policy);
        let mut report = ReceiveReport {
            sender: sender_id,
            sender_result,
            objects_recorded: 0,
            objects_dropped: 0,
            ego_skipped: false,
        };

        match sender_result {
            InsertResult::DuplicateDrop => {
                debug!("dropping duplicate CPM");
                statistics.record(Statistic::SenderDuplicateDrop(sender_id));
                return Ok(report);
            }
            InsertResult::DuplicateReplace => {
                debug!("replacing duplicate CPM");
                statistics.record(Statistic::SenderDuplicateReplace(sender_id));
            }
            InsertResult::Ok | InsertResult::HistoryReplace => {}
        }

        let sender_distance = receiver.distance(&sender_position);
        statistics.record(Statistic::ReceivedSender(sender_id));
        statistics.record(Statistic::ReceiveDelay(sender_delay));
        statistics.record(Statistic::ReceivedAge(sender_delay));
        statistics.record(Statistic::DistanceToSender(sender_distance));
        statistics.record(Statistic::ReceivedDistance(sender_distance));
        if sender_result == InsertResult::HistoryReplace {
            statistics.record(Statistic::SenderHistoryOverflow(sender_id));
        }
        record_update(statistics.as_mut(), entry, previous, &current);

        statistics.record(Statistic::ReceivedObjectsPerSegment(message.perceived_objects.len()));
        for object in &message.perceived_objects {
            if object.object_id == world.ego.station_id {
                report.ego_skipped = true;
                continue;
            }

            let timestamp = measured_at(sender_now, object.time_of_measurement);
            let position = sender_position
                + Position::new(f64::from(object.x_distance) / 100.0, f64::from(object.y_distance) / 100.0);
            let speed = if object.x_speed == domain::SPEED_EXTENDED_UNAVAILABLE {
                0.0
            } else {
                f64::from(object.x_speed) / 100.0
            };
            let dynamics = ReportedDynamics {
                received: now,
                reporter_position: sender_position,
                object: TrackedDynamics {
                    timestamp,
                    position,
                    speed,
                    // Not carried by the object record.
                    heading: Angle::default(),
                },
            };
            trace!(object = object.object_id, x = position.x, y = position.y, speed, "perceived object received");

            let entry = self.remote.entry(object.object_id);
            let previous = entry.latest();
            let (current, result) = entry.add_history(sender_id, dynamics, policy);
            match result {
                InsertResult::DuplicateDrop => {
                    debug!(object = object.object_id, "dropping duplicate object");
                    statistics.record(Statistic::ObjectDuplicateDrop(object.object_id));
                    report.objects_dropped += 1;
                    continue;
                }
                InsertResult::DuplicateReplace => {
                    statistics.record(Statistic::ObjectDuplicateReplace(object.object_id));
                }
                InsertResult::Ok | InsertResult::HistoryReplace => {}
            }
            report.objects_recorded += 1;

            statistics.record(Statistic::ReceivedObject(object.object_id));
            statistics.record(Statistic::ReceivedAge(now.millis_since(timestamp)));
            statistics.record(Statistic::ReceivedDistance(receiver.distance(&position)));
            if result == InsertResult::HistoryReplace {
                statistics.record(Statistic::ObjectHistoryOverflow(object.object_id));
            }
            record_update(statistics.as_mut(), entry, previous, &current);
        }

        Ok(report)
    }
}

struct Sent {
    segments: usize,
    objects: usize,
    sensor_information: bool,
}

fn record_update(
    statistics: &mut dyn StatisticsSink,
    entry: &RemoteObjectEntry,
    previous: Option<ReportedDynamics>,
    current: &ReportedDynamics,
) {
    if let Some(previous) = previous {
        statistics.record(Statistic::TimeSinceLastUpdate(current.received.millis_since(previous.received)));
        statistics.record(Statistic::DistanceSinceLastUpdate(
            current.object.position.distance(&previous.object.position),
        ));
    }
    statistics.record(Statistic::SenderRedundancy(entry.reporter_count()));
    statistics.record(Statistic::ObjectRedundancy(entry.history_len()));
}

fn reference_geo(message: &CollectivePerceptionMessage) -> Result<GeoPosition, CpmError> {
    let reference = message.management.reference_position;
    if reference.latitude == domain::LATITUDE_UNAVAILABLE || reference.longitude == domain::LONGITUDE_UNAVAILABLE {
        warn!("CPM without reference position received");
        return Err(CpmError::InvalidMessage("reference position unavailable".into()));
    }
    Ok(GeoPosition {
        latitude: f64::from(reference.latitude) / 1e7,
        longitude: f64::from(reference.longitude) / 1e7,
    })
}

fn sender_speed(speed: u16, direction: DriveDirection) -> f64 {
    if speed == domain::SPEED_UNAVAILABLE {
        return 0.0;
    }
    let magnitude = f64::from(speed) / 100.0;
    match direction {
        DriveDirection::Forward => magnitude,
        DriveDirection::Backward => -magnitude,
    }
}

fn sender_heading(heading: u16) -> Angle {
    if heading > domain::HEADING_MAX {
        Angle::default()
    } else {
        Angle::from_degrees(f64::from(heading) / 10.0)
    }
}

/// `reference` shifted by a signed time of measurement in ms.
fn measured_at(reference: SimTime, time_of_measurement: i16) -> SimTime {
    SimTime::from_micros(reference.as_micros() + i64::from(time_of_measurement) * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, CpmCodec};
    use crate::facilities::{ChannelProbe, CpmTransport, DccProfile, FlatEarthProjection, GeoProjection, TransmitRateThrottle};
    use crate::statistics::RecordingSink;
    use cpm_rules::config::{GenerationRuleConfig, RedundancyRuleConfig};
    use cpm_tracking::arena::{GenerationalArena, TrackedObject};
    use cpm_tracking::awareness::AwarenessReport;
    use cpm_tracking::remote::DuplicatePolicy;
    use cpm_types::{SensorCategory, StationType, TransportError};
    use std::cell::RefCell;
    use std::rc::Rc;

    // ------------------------------------------------------------------ helpers

    #[derive(Clone, Default)]
    struct Outbox {
        sent: Rc<RefCell<Vec<CollectivePerceptionMessage>>>,
    }

    impl Outbox {
        fn take(&self) -> Vec<CollectivePerceptionMessage> {
            std::mem::take(&mut *self.sent.borrow_mut())
        }
    }

    impl CpmTransport for Outbox {
        fn send(&mut self, message: CollectivePerceptionMessage) -> Result<(), TransportError> {
            self.sent.borrow_mut().push(message);
            Ok(())
        }
    }

    struct Unreachable;

    impl CpmTransport for Unreachable {
        fn send(&mut self, _message: CollectivePerceptionMessage) -> Result<(), TransportError> {
            Err(TransportError::Unavailable)
        }
    }

    struct FixedThrottle(Duration);

    impl TransmitRateThrottle for FixedThrottle {
        fn interval(&self, _profile: DccProfile) -> Duration {
            self.0
        }
    }

    struct FixedLoad(f64);

    impl ChannelProbe for FixedLoad {
        fn channel_busy_ratio(&self) -> f64 {
            self.0
        }
    }

    struct UniformCodec;

    impl CpmCodec for UniformCodec {
        fn encoded_size(&self, message: &CollectivePerceptionMessage) -> usize {
            40 + 14 * message.perceived_objects.len()
        }

        fn validate(&self, _message: &CollectivePerceptionMessage) -> Result<(), CodecError> {
            Ok(())
        }
    }

    struct RejectingCodec;

    impl CpmCodec for RejectingCodec {
        fn encoded_size(&self, _message: &CollectivePerceptionMessage) -> usize {
            100
        }

        fn validate(&self, _message: &CollectivePerceptionMessage) -> Result<(), CodecError> {
            Err(CodecError::TooManyObjects(999))
        }
    }

    /// One station's surroundings: what it senses and where it is.
    struct Scene {
        arena: GenerationalArena,
        environment: EnvironmentModel,
        awareness: AwarenessStore,
        ego: EgoState,
        handles: Vec<ObjectHandle>,
    }

    impl Scene {
        fn new(station_id: StationId, x: f64) -> Self {
            let mut ego = EgoState::new(station_id, StationType::PassengerCar);
            ego.position = Position::new(x, 0.0);
            ego.geo = FlatEarthProjection::default().to_geo(ego.position);
            ego.heading = Angle::from_degrees(90.0);
            ego.speed = 10.0;
            Self {
                arena: GenerationalArena::new(),
                environment: EnvironmentModel::new(),
                awareness: AwarenessStore::new(),
                ego,
                handles: Vec::new(),
            }
        }

        /// Add a vehicle seen by the radar at `x` metres.
        fn sense(&mut self, station_id: StationId, x: f64, now: SimTime) -> ObjectHandle {
            let mut object = TrackedObject::new(station_id, StationType::PassengerCar);
            object.position = Position::new(x, 0.0);
            object.speed = 10.0;
            object.heading = Angle::from_degrees(90.0);
            let handle = self.arena.insert(object);
            self.environment.record(handle, 1, SensorCategory::Radar, now);
            self.handles.push(handle);
            handle
        }

        /// Refresh every sighting and the ego state.
        fn tick(&mut self, now: SimTime) {
            for &handle in &self.handles {
                if self.arena.resolve(handle).is_some() {
                    self.environment.record(handle, 1, SensorCategory::Radar, now);
                }
            }
            self.ego.updated = now;
        }

        fn world(&self) -> World<'_> {
            World {
                arena: &self.arena,
                environment: &self.environment,
                awareness: &self.awareness,
                ego: &self.ego,
            }
        }
    }

    fn ms(millis: i64) -> SimTime {
        SimTime::from_millis(millis)
    }

    fn service(config: ServiceConfig, facilities: Facilities) -> CpService {
        CpService::new(config, facilities, SimTime::ZERO).unwrap()
    }

    fn static_config() -> ServiceConfig {
        ServiceConfig {
            generation: GenerationRuleConfig::Static,
            ..ServiceConfig::default()
        }
    }

    // ------------------------------------------------------------------ construction

    #[test]
    fn dcc_restriction_requires_throttle() {
        let config = ServiceConfig {
            with_dcc_restriction: true,
            ..ServiceConfig::default()
        };
        let err = CpService::new(config, Facilities::new(Outbox::default()), SimTime::ZERO).err();
        assert_eq!(err, Some(ConfigError::MissingFacility("transmit rate throttle")));
    }

    #[test]
    fn dynamic_mitigation_requires_probe() {
        let config = ServiceConfig {
            dynamic_redundancy_mitigation: true,
            ..ServiceConfig::default()
        };
        let err = CpService::new(config, Facilities::new(Outbox::default()), SimTime::ZERO).err();
        assert_eq!(err, Some(ConfigError::MissingFacility("channel probe")));
    }

    #[test]
    fn invalid_rule_config_is_rejected_at_construction() {
        let config = ServiceConfig {
            redundancy: vec![RedundancyRuleConfig::Frequency {
                window_ms: 0,
                number: 5,
            }],
            ..ServiceConfig::default()
        };
        assert!(CpService::new(config, Facilities::new(Outbox::default()), SimTime::ZERO).is_err());
    }

    // ------------------------------------------------------------------ timing

    #[test]
    fn no_cpm_before_minimum_interval() {
        let outbox = Outbox::default();
        let mut cp = service(static_config(), Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);
        scene.sense(2, 20.0, ms(0));
        scene.tick(ms(50));

        let report = cp.trigger(&scene.world(), ms(50)).unwrap();
        assert!(!report.triggered);
        assert!(outbox.take().is_empty());
        // Local tracking is synchronized regardless.
        assert_eq!(cp.local_tracking().len(), 1);
    }

    #[test]
    fn dcc_interval_is_clamped_between_bounds() {
        let config = ServiceConfig {
            with_dcc_restriction: true,
            ..static_config()
        };
        let facilities = |d| Facilities::new(Outbox::default()).with_throttle(FixedThrottle(Duration::from_millis(d)));

        assert_eq!(service(config.clone(), facilities(400)).generation_interval(), Duration::from_millis(400));
        assert_eq!(service(config.clone(), facilities(20)).generation_interval(), Duration::from_millis(100));
        assert_eq!(service(config, facilities(5_000)).generation_interval(), Duration::from_millis(1_000));
    }

    #[test]
    fn dcc_throttle_delays_generation() {
        let config = ServiceConfig {
            with_dcc_restriction: true,
            ..static_config()
        };
        let outbox = Outbox::default();
        let facilities = Facilities::new(outbox.clone()).with_throttle(FixedThrottle(Duration::from_millis(400)));
        let mut cp = service(config, facilities);
        let mut scene = Scene::new(1, 0.0);

        for t in [100, 200, 300] {
            scene.tick(ms(t));
            assert!(!cp.trigger(&scene.world(), ms(t)).unwrap().triggered);
        }
        scene.tick(ms(400));
        assert!(cp.trigger(&scene.world(), ms(400)).unwrap().triggered);
        assert_eq!(outbox.take().len(), 1);
    }

    // ------------------------------------------------------------------ generation

    #[test]
    fn few_candidates_produce_single_unsegmented_message() {
        let outbox = Outbox::default();
        let mut cp = service(ServiceConfig::default(), Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);
        let handles: Vec<_> = (0..3).map(|i| scene.sense(10 + i, 20.0 * f64::from(i + 1), ms(0))).collect();
        scene.tick(ms(100));

        let report = cp.trigger(&scene.world(), ms(100)).unwrap();
        assert_eq!(report.generated, 3);
        assert_eq!(report.segments, 1);
        assert!(report.sensor_information);

        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        let cpm = &sent[0];
        assert!(cpm.management.segment_info.is_none());
        assert_eq!(cpm.perceived_objects.len(), 3);
        assert_eq!(cpm.number_of_perceived_objects, 3);
        assert!(cpm.sensor_information.is_some());
        assert_eq!(cpm.station_id(), 1);

        for handle in handles {
            let prev = cp.local_tracking().get(handle).unwrap().prev_dynamics.unwrap();
            assert_eq!(prev.timestamp, ms(100));
        }
        assert_eq!(cp.last_cpm(), ms(100));
    }

    #[test]
    fn many_candidates_are_capped_and_segmented() {
        let outbox = Outbox::default();
        let facilities = Facilities::new(outbox.clone()).with_codec(UniformCodec);
        let config = ServiceConfig {
            mtu: 1_440,
            ..static_config()
        };
        let mut cp = service(config, facilities);
        let mut scene = Scene::new(1, 0.0);
        for i in 0..300 {
            scene.sense(100 + i, f64::from(i), ms(0));
        }
        scene.tick(ms(100));

        let report = cp.trigger(&scene.world(), ms(100)).unwrap();
        assert_eq!(report.generated, 300);
        assert_eq!(report.segments, 3);
        assert_eq!(report.objects_sent, 255);

        let sent = outbox.take();
        let layout: Vec<_> = sent
            .iter()
            .map(|m| {
                let info = m.management.segment_info.unwrap();
                (info.this_segment_num, info.total_msg_segments, m.perceived_objects.len())
            })
            .collect();
        assert_eq!(layout, vec![(1, 3, 100), (2, 3, 100), (3, 3, 55)]);
        assert!(sent.iter().all(|m| m.number_of_perceived_objects == 255));
    }

    #[test]
    fn unchanged_objects_are_not_repeated_by_dynamic_rule() {
        let outbox = Outbox::default();
        let mut cp = service(ServiceConfig::default(), Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);
        scene.sense(2, 20.0, ms(0));

        scene.tick(ms(100));
        assert_eq!(cp.trigger(&scene.world(), ms(100)).unwrap().segments, 1);
        outbox.take();

        // Nothing moved, the sensor information is not due yet.
        scene.tick(ms(200));
        let report = cp.trigger(&scene.world(), ms(200)).unwrap();
        assert!(report.triggered);
        assert_eq!(report.generated, 0);
        assert_eq!(report.segments, 0);
        assert!(outbox.take().is_empty());
    }

    #[test]
    fn sensor_information_follows_its_own_period() {
        let outbox = Outbox::default();
        let mut cp = service(static_config(), Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);

        let mut with_sic = Vec::new();
        for t in (100..=1_100).step_by(100) {
            scene.tick(ms(t));
            let report = cp.trigger(&scene.world(), ms(t)).unwrap();
            if report.sensor_information {
                with_sic.push(t);
            }
        }
        assert_eq!(with_sic, vec![100, 1_100]);
        assert_eq!(outbox.take().len(), 11);
    }

    #[test]
    fn sensor_information_alone_triggers_a_message() {
        let outbox = Outbox::default();
        let mut cp = service(ServiceConfig::default(), Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);
        scene.tick(ms(100));

        let report = cp.trigger(&scene.world(), ms(100)).unwrap();
        assert_eq!(report.generated, 0);
        assert!(report.sensor_information);
        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].perceived_objects.is_empty());
    }

    // ------------------------------------------------------------------ failure handling

    #[test]
    fn transport_failure_leaves_bookkeeping_untouched() {
        let mut cp = service(ServiceConfig::default(), Facilities::new(Unreachable));
        let mut scene = Scene::new(1, 0.0);
        let handle = scene.sense(2, 20.0, ms(0));
        scene.tick(ms(100));

        let err = cp.trigger(&scene.world(), ms(100)).unwrap_err();
        assert_eq!(err, CpmError::Transport(TransportError::Unavailable));
        assert!(cp.local_tracking().get(handle).unwrap().prev_dynamics.is_none());
        assert_eq!(cp.last_cpm(), SimTime::ZERO);
    }

    #[test]
    fn validation_failure_aborts_cycle() {
        let outbox = Outbox::default();
        let facilities = Facilities::new(outbox.clone()).with_codec(RejectingCodec);
        let mut cp = service(ServiceConfig::default(), facilities);
        let mut scene = Scene::new(1, 0.0);
        let handle = scene.sense(2, 20.0, ms(0));
        scene.tick(ms(100));

        let err = cp.trigger(&scene.world(), ms(100)).unwrap_err();
        assert!(matches!(err, CpmError::InvalidMessage(_)));
        assert!(outbox.take().is_empty());
        assert!(cp.local_tracking().get(handle).unwrap().prev_dynamics.is_none());
    }

    #[test]
    fn oversize_object_is_an_error() {
        let config = ServiceConfig {
            mtu: 40,
            ..ServiceConfig::default()
        };
        let outbox = Outbox::default();
        let mut cp = service(config, Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);
        scene.sense(2, 20.0, ms(0));
        scene.tick(ms(100));

        assert!(matches!(
            cp.trigger(&scene.world(), ms(100)),
            Err(CpmError::ExceedsMtu { .. })
        ));
        assert!(outbox.take().is_empty());
    }

    // ------------------------------------------------------------------ redundancy mitigation

    fn self_announcing_scene() -> Scene {
        let mut scene = Scene::new(1, 0.0);
        scene.sense(2, 20.0, ms(0));
        scene.awareness.update(AwarenessReport {
            station_id: 2,
            received: ms(90),
            position: Position::new(20.0, 0.0),
            speed: 10.0,
        });
        scene.tick(ms(100));
        scene
    }

    fn mitigating_config() -> ServiceConfig {
        ServiceConfig {
            dynamic_redundancy_mitigation: true,
            redundancy: vec![RedundancyRuleConfig::SelfAnnouncement],
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn mitigation_skipped_below_channel_load() {
        let facilities = Facilities::new(Outbox::default()).with_probe(FixedLoad(0.1));
        let mut cp = service(mitigating_config(), facilities);
        let scene = self_announcing_scene();

        let report = cp.trigger(&scene.world(), ms(100)).unwrap();
        assert_eq!((report.generated, report.mitigated), (1, 1));
    }

    #[test]
    fn mitigation_applied_above_channel_load() {
        let sink = RecordingSink::new();
        let facilities = Facilities::new(Outbox::default())
            .with_probe(FixedLoad(0.6))
            .with_statistics(sink.clone());
        let mut cp = service(mitigating_config(), facilities);
        let scene = self_announcing_scene();

        let report = cp.trigger(&scene.world(), ms(100)).unwrap();
        assert_eq!((report.generated, report.mitigated), (1, 0));
        assert_eq!(report.objects_sent, 0);
        assert!(sink.snapshot().contains(&Statistic::ChannelBusyRatio(0.6)));
        assert!(sink.snapshot().contains(&Statistic::SeenByAwareness(1)));
    }

    // ------------------------------------------------------------------ reception

    /// Station 1 senses stations 2 and 3; station 3 receives the CPM.
    fn exchange(policy: DuplicatePolicy) -> (CpService, Scene, CollectivePerceptionMessage, RecordingSink) {
        let outbox = Outbox::default();
        let mut sender = service(ServiceConfig::default(), Facilities::new(outbox.clone()));
        let mut scene = Scene::new(1, 0.0);
        scene.sense(2, 20.0, ms(0));
        scene.sense(3, 45.0, ms(0));
        scene.tick(ms(100));
        sender.trigger(&scene.world(), ms(100)).unwrap();
        let message = outbox.take().remove(0);

        let sink = RecordingSink::new();
        let config = ServiceConfig {
            duplicate_policy: policy,
            ..ServiceConfig::default()
        };
        let receiver = service(config, Facilities::new(Outbox::default()).with_statistics(sink.clone()));
        let mut receiver_scene = Scene::new(3, 45.0);
        receiver_scene.tick(ms(105));
        (receiver, receiver_scene, message, sink)
    }

    #[test]
    fn received_cpm_populates_remote_tracking() {
        let (mut cp, scene, message, sink) = exchange(DuplicatePolicy::None);

        let report = cp.indicate(&scene.world(), ms(105), &message).unwrap();
        assert_eq!(report.sender, 1);
        assert_eq!(report.sender_result, InsertResult::Ok);
        assert_eq!(report.objects_recorded, 1);
        assert!(report.ego_skipped);

        let remote = cp.remote_tracking();
        assert!(remote.contains(1));
        assert!(remote.contains(2));
        assert!(!remote.contains(3));

        let object = remote.get(2).unwrap().latest().unwrap();
        assert_eq!(object.received, ms(105));
        assert!((object.object.position.x - 20.0).abs() < 0.05);
        assert!((object.object.speed - 10.0).abs() < 1e-9);
        assert!(object.reporter_position.distance(&Position::new(0.0, 0.0)) < 0.05);

        let sender = remote.get(1).unwrap().latest().unwrap();
        assert!((sender.object.speed - 10.0).abs() < 1e-9);

        assert!(sink.snapshot().contains(&Statistic::ReceiveDelay(5)));
        // Sender and object were both measured 5 ms before reception.
        assert_eq!(sink.count(|s| *s == Statistic::ReceivedAge(5)), 2);
        assert!(sink.snapshot().contains(&Statistic::ReceivedObject(2)));
        assert_eq!(sink.count(|s| matches!(s, Statistic::ReceivedObject(_))), 1);
    }

    #[test]
    fn duplicate_cpm_is_dropped_when_configured() {
        let (mut cp, scene, message, sink) = exchange(DuplicatePolicy::DropOnDuplicate);

        cp.indicate(&scene.world(), ms(105), &message).unwrap();
        let report = cp.indicate(&scene.world(), ms(105), &message).unwrap();
        assert_eq!(report.sender_result, InsertResult::DuplicateDrop);
        assert_eq!(report.objects_recorded, 0);
        assert_eq!(cp.remote_tracking().get(1).unwrap().history_len(), 1);
        assert_eq!(cp.remote_tracking().get(2).unwrap().history_len(), 1);
        assert_eq!(sink.count(|s| *s == Statistic::SenderDuplicateDrop(1)), 1);
    }

    #[test]
    fn repeated_cpm_is_recorded_without_policy() {
        let (mut cp, scene, message, sink) = exchange(DuplicatePolicy::None);

        cp.indicate(&scene.world(), ms(105), &message).unwrap();
        cp.indicate(&scene.world(), ms(105), &message).unwrap();
        assert_eq!(cp.remote_tracking().get(2).unwrap().history_len(), 2);
        assert!(sink.snapshot().contains(&Statistic::TimeSinceLastUpdate(0)));
    }

    #[test]
    fn cpm_without_reference_position_is_rejected() {
        let (mut cp, scene, mut message, _) = exchange(DuplicatePolicy::None);
        message.management.reference_position.latitude = domain::LATITUDE_UNAVAILABLE;

        let err = cp.indicate(&scene.world(), ms(105), &message).unwrap_err();
        assert!(matches!(err, CpmError::InvalidMessage(_)));
        assert!(cp.remote_tracking().is_empty());
    }

    #[test]
    fn malformed_cpm_is_rejected() {
        let (mut cp, scene, mut message, _) = exchange(DuplicatePolicy::None);
        message.header.message_id = 2;

        assert!(matches!(
            cp.indicate(&scene.world(), ms(105), &message),
            Err(CpmError::InvalidMessage(_))
        ));
    }

    #[test]
    fn received_history_expires_on_next_cycle() {
        let (mut cp, mut scene, message, _) = exchange(DuplicatePolicy::None);
        cp.indicate(&scene.world(), ms(105), &message).unwrap();
        assert_eq!(cp.remote_tracking().len(), 2);

        scene.tick(ms(1_205));
        cp.trigger(&scene.world(), ms(1_205)).unwrap();
        assert!(cp.remote_tracking().is_empty());
    }

    #[test]
    fn sender_speed_honours_drive_direction() {
        assert_eq!(sender_speed(1_250, DriveDirection::Forward), 12.5);
        assert_eq!(sender_speed(1_250, DriveDirection::Backward), -12.5);
        assert_eq!(sender_speed(domain::SPEED_UNAVAILABLE, DriveDirection::Forward), 0.0);
    }

    #[test]
    fn negative_time_of_measurement_moves_back() {
        assert_eq!(measured_at(ms(1_000), -250), ms(750));
        assert_eq!(measured_at(ms(1_000), 40), ms(1_040));
    }
}
