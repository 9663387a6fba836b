//! Synthetic road scenario driving one [`CpService`] per vehicle.
//!
//! Vehicles share a single lane heading east. Each step:
//!
//! 1. every vehicle moves at its constant speed;
//! 2. each vehicle's front radar records the vehicles ahead within range,
//!    and each vehicle receives the awareness reports of all vehicles
//!    within radio range;
//! 3. CPMs whose latency has elapsed are delivered to every vehicle within
//!    radio range of the sender;
//! 4. every service is triggered.
//!
//! The radio is a shared loopback channel: sent messages are queued
//! with their delivery time, and the bytes sent during the last second give
//! the channel busy ratio used for DCC.

use crate::config::{ScenarioConfig, SimConfig};
use cpm_service::{
    ChannelProbe, CpService, CpmCodec, CpmTransport, DccProfile, Facilities, FixedLayoutCodec, FlatEarthProjection,
    GeoProjection, RecordingSink, Statistic, TransmitRateThrottle, World,
};
use cpm_tracking::arena::{GenerationalArena, ObjectArena, ObjectHandle, TrackedObject};
use cpm_tracking::awareness::{AwarenessReport, AwarenessStore};
use cpm_tracking::environment::EnvironmentModel;
use cpm_types::message::CollectivePerceptionMessage;
use cpm_types::{
    Angle, ConfigError, EgoState, Position, SensorCategory, SimTime, StationId, StationType, TransportError,
};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sensor id of the front radar in every environment model.
const RADAR_SENSOR_ID: u32 = 1;
/// Sightings not refreshed for this long are forgotten.
const SIGHTING_LIFETIME: Duration = Duration::from_millis(200);
/// Channel capacity used to turn sent bytes into a busy ratio.
const CHANNEL_BYTES_PER_SECOND: f64 = 750_000.0;
const LOAD_WINDOW: Duration = Duration::from_secs(1);
/// First station id; ids increase along the column.
const FIRST_STATION_ID: StationId = 100;

// ────────────────────────────────────────────────────────────────────────────
// Radio channel
// ────────────────────────────────────────────────────────────────────────────

struct InFlight {
    deliver_at: SimTime,
    sender_position: Position,
    message: CollectivePerceptionMessage,
}

/// Shared medium between all stations.
struct Channel {
    now: SimTime,
    latency: Duration,
    codec: FixedLayoutCodec,
    in_flight: VecDeque<InFlight>,
    /// Send time and size of recent transmissions.
    load: VecDeque<(SimTime, usize)>,
    positions: Vec<(StationId, Position)>,
}

impl Channel {
    fn new(latency: Duration) -> Self {
        Self {
            now: SimTime::ZERO,
            latency,
            codec: FixedLayoutCodec,
            in_flight: VecDeque::new(),
            load: VecDeque::new(),
            positions: Vec::new(),
        }
    }

    fn advance(&mut self, now: SimTime, positions: Vec<(StationId, Position)>) {
        self.now = now;
        self.positions = positions;
        while self
            .load
            .front()
            .is_some_and(|(sent, _)| *sent + LOAD_WINDOW <= now)
        {
            self.load.pop_front();
        }
    }

    fn channel_busy_ratio(&self) -> f64 {
        let bytes: usize = self.load.iter().map(|(_, size)| size).sum();
        (bytes as f64 / CHANNEL_BYTES_PER_SECOND).min(1.0)
    }

    /// Messages whose delivery time has come, in sending order.
    fn due(&mut self) -> Vec<InFlight> {
        let mut due = Vec::new();
        while self.in_flight.front().is_some_and(|m| m.deliver_at <= self.now) {
            if let Some(m) = self.in_flight.pop_front() {
                due.push(m);
            }
        }
        due
    }
}

/// One station's access to the [`Channel`]; also its DCC and load probe.
#[derive(Clone)]
struct Radio {
    channel: Rc<RefCell<Channel>>,
}

impl CpmTransport for Radio {
    fn send(&mut self, message: CollectivePerceptionMessage) -> Result<(), TransportError> {
        let mut channel = self.channel.borrow_mut();
        let sender = message.station_id();
        let Some(sender_position) = channel
            .positions
            .iter()
            .find(|(id, _)| *id == sender)
            .map(|(_, p)| *p)
        else {
            return Err(TransportError::Rejected(format!("unknown station {sender}")));
        };
        let size = channel.codec.encoded_size(&message);
        let now = channel.now;
        let deliver_at = now + channel.latency;
        channel.load.push_back((now, size));
        channel.in_flight.push_back(InFlight {
            deliver_at,
            sender_position,
            message,
        });
        Ok(())
    }
}

impl ChannelProbe for Radio {
    fn channel_busy_ratio(&self) -> f64 {
        self.channel.borrow().channel_busy_ratio()
    }
}

impl TransmitRateThrottle for Radio {
    /// Reactive DCC: the busier the channel, the longer the gap.
    fn interval(&self, profile: DccProfile) -> Duration {
        let cbr = self.channel.borrow().channel_busy_ratio();
        let millis = match cbr {
            c if c < 0.30 => 100,
            c if c < 0.40 => 200,
            c if c < 0.50 => 400,
            c if c < 0.60 => 500,
            _ => 1_000,
        };
        // Lower priority traffic backs off further.
        let factor = if profile >= DccProfile::Dp3 { 2 } else { 1 };
        Duration::from_millis(millis * factor)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stations
// ────────────────────────────────────────────────────────────────────────────

struct Station {
    handle: ObjectHandle,
    ego: EgoState,
    environment: EnvironmentModel,
    awareness: AwarenessStore,
    service: CpService,
    statistics: RecordingSink,
}

/// Totals of one simulation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StepSummary {
    pub time_ms: i64,
    /// Stations whose generation interval elapsed.
    pub triggered: usize,
    pub messages: usize,
    pub segments: usize,
    pub objects_sent: usize,
    pub generated: usize,
    pub mitigated: usize,
    /// Successful receptions, counted per receiving station.
    pub receptions: usize,
    pub errors: usize,
    pub channel_busy_ratio: f64,
}

/// Statistics recorded by one station.
#[derive(Debug, Clone, Serialize)]
pub struct StationStatistics {
    pub station: StationId,
    pub events: Vec<Statistic>,
}

pub struct Simulation {
    scenario: ScenarioConfig,
    arena: GenerationalArena,
    stations: Vec<Station>,
    channel: Rc<RefCell<Channel>>,
    projection: FlatEarthProjection,
    now: SimTime,
}

impl Simulation {
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        let scenario = config.scenario.clone();
        scenario.validate()?;
        config.service.validate()?;

        let channel = Rc::new(RefCell::new(Channel::new(Duration::from_millis(scenario.latency_ms))));
        let projection = FlatEarthProjection::new(scenario.origin);
        let mut arena = GenerationalArena::new();
        let mut stations = Vec::with_capacity(scenario.vehicles);

        for i in 0..scenario.vehicles {
            let station_id = FIRST_STATION_ID + i as StationId;
            let mut object = TrackedObject::new(station_id, StationType::PassengerCar);
            object.position = Position::new(i as f64 * scenario.spacing, 0.0);
            object.speed = scenario.base_speed + i as f64 * scenario.speed_step;
            object.heading = Angle::from_degrees(90.0);
            let handle = arena.insert(object);

            let radio = Radio {
                channel: Rc::clone(&channel),
            };
            let statistics = RecordingSink::new();
            let facilities = Facilities::new(radio.clone())
                .with_throttle(radio.clone())
                .with_probe(radio)
                .with_projection(projection)
                .with_statistics(statistics.clone());
            let service = CpService::new(config.service.clone(), facilities, SimTime::ZERO)?;

            let mut ego = EgoState::new(station_id, StationType::PassengerCar);
            sync_ego(&mut ego, &object, &projection, SimTime::ZERO);
            stations.push(Station {
                handle,
                ego,
                environment: EnvironmentModel::new(),
                awareness: AwarenessStore::new(),
                service,
                statistics,
            });
        }

        Ok(Self {
            scenario,
            arena,
            stations,
            channel,
            projection,
            now: SimTime::ZERO,
        })
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn is_finished(&self) -> bool {
        self.now.as_millis() >= self.scenario.duration_ms as i64
    }

    /// Advance by one scheduler step.
    pub fn step(&mut self) -> StepSummary {
        let dt = Duration::from_millis(self.scenario.step_ms);
        self.now = self.now + dt;
        let now = self.now;
        let mut summary = StepSummary {
            time_ms: now.as_millis(),
            ..StepSummary::default()
        };

        self.move_vehicles(dt);
        self.sense(now);
        let positions = self.stations.iter().map(|s| (s.ego.station_id, s.ego.position)).collect();
        self.channel.borrow_mut().advance(now, positions);

        self.deliver(now, &mut summary);
        self.trigger(now, &mut summary);

        summary.channel_busy_ratio = self.channel.borrow().channel_busy_ratio();
        summary
    }

    /// Drain every station's recorded statistics.
    pub fn take_statistics(&self) -> Vec<StationStatistics> {
        self.stations
            .iter()
            .map(|s| StationStatistics {
                station: s.ego.station_id,
                events: s.statistics.take(),
            })
            .collect()
    }

    fn move_vehicles(&mut self, dt: Duration) {
        for station in &mut self.stations {
            if let Some(object) = self.arena.get_mut(station.handle) {
                object.position = object.position.advance(object.heading, object.speed * dt.as_secs_f64());
            }
        }
    }

    fn sense(&mut self, now: SimTime) {
        let vehicles: Vec<(ObjectHandle, TrackedObject)> = self
            .stations
            .iter()
            .filter_map(|s| self.arena.resolve(s.handle).map(|o| (s.handle, *o)))
            .collect();

        for station in &mut self.stations {
            let Some(me) = self.arena.resolve(station.handle).copied() else {
                continue;
            };
            sync_ego(&mut station.ego, &me, &self.projection, now);

            for (handle, other) in &vehicles {
                if *handle == station.handle {
                    continue;
                }
                let ahead = other.position.x - me.position.x;
                if ahead > 0.0 && ahead <= self.scenario.radar_range {
                    station.environment.record(*handle, RADAR_SENSOR_ID, SensorCategory::Radar, now);
                }
                if me.position.distance(&other.position) <= self.scenario.radio_range {
                    station.environment.record(*handle, 0, SensorCategory::Awareness, now);
                    station.awareness.update(AwarenessReport {
                        station_id: other.station_id,
                        received: now,
                        position: other.position,
                        speed: other.speed,
                    });
                }
            }
            let expired = station.environment.expire(now, SIGHTING_LIFETIME);
            if expired > 0 {
                debug!(station = station.ego.station_id, expired, "sightings expired");
            }
            station.awareness.expire(now);
        }
    }

    fn deliver(&mut self, now: SimTime, summary: &mut StepSummary) {
        let due = self.channel.borrow_mut().due();
        for in_flight in due {
            let sender = in_flight.message.station_id();
            for station in &mut self.stations {
                if station.ego.station_id == sender
                    || station.ego.position.distance(&in_flight.sender_position) > self.scenario.radio_range
                {
                    continue;
                }
                let world = World {
                    arena: &self.arena,
                    environment: &station.environment,
                    awareness: &station.awareness,
                    ego: &station.ego,
                };
                match station.service.indicate(&world, now, &in_flight.message) {
                    Ok(_) => summary.receptions += 1,
                    Err(e) => {
                        warn!(station = station.ego.station_id, sender, error = %e, "CPM reception failed");
                        summary.errors += 1;
                    }
                }
            }
        }
    }

    fn trigger(&mut self, now: SimTime, summary: &mut StepSummary) {
        for station in &mut self.stations {
            let world = World {
                arena: &self.arena,
                environment: &station.environment,
                awareness: &station.awareness,
                ego: &station.ego,
            };
            match station.service.trigger(&world, now) {
                Ok(report) => {
                    if report.triggered {
                        summary.triggered += 1;
                        summary.generated += report.generated;
                        summary.mitigated += report.mitigated;
                    }
                    if report.segments > 0 {
                        summary.messages += 1;
                        summary.segments += report.segments;
                        summary.objects_sent += report.objects_sent;
                    }
                }
                Err(e) => {
                    warn!(station = station.ego.station_id, error = %e, "CPM generation failed");
                    summary.errors += 1;
                }
            }
        }
    }
}

fn sync_ego(ego: &mut EgoState, object: &TrackedObject, projection: &FlatEarthProjection, now: SimTime) {
    ego.acceleration = object.acceleration;
    ego.position = object.position;
    ego.geo = projection.to_geo(object.position);
    ego.heading = object.heading;
    ego.speed = object.speed;
    ego.updated = now;
}
