//! Recording session state machine.
//!
//! `Idle → Recording ⇄ Paused → Finalizing → Submitted | Discarded`
//!
//! The session is synchronous and takes the current monotonic time as an
//! argument, so it can be driven by an actor task or directly by tests.
//! Elapsed time only advances on ticks; readings never move the clock.

use crate::metrics::analytics::activity_stress;
use crate::metrics::smoothing::{normalized_power, resample_per_second, PowerFilter};
use crate::metrics::zones::{AthleteThresholds, HRZones, PowerZones, ZoneHistogram};
use crate::recording::types::{
    ActivityPayload, ActivitySummary, MetricAggregate, RecordingConfig, RecordingError,
    SessionSnapshot, SessionState,
};
use crate::recording::validation::{check, validate, Preflight, ValidationIssue};
use crate::sensors::types::{DeviceReading, MetricKind, ReadingValue};
use crate::streams::{compress, CompressedStream, RawStream, StreamType};
use crate::workouts::{Plan, PlanCursor, PlanStep, StepChange, StepCursor};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// Credits time between consecutive readings to the earlier reading's zone.
#[derive(Debug, Clone)]
struct ZoneClock {
    histogram: ZoneHistogram,
    last: Option<(f64, u8)>,
    gap_cap: f64,
}

impl ZoneClock {
    fn new(zones: usize, gap_cap: f64) -> Self {
        Self {
            histogram: ZoneHistogram::new(zones),
            last: None,
            gap_cap,
        }
    }

    fn observe(&mut self, at: f64, zone: u8) {
        self.flush(at);
        self.last = Some((at, zone));
    }

    /// Credit the open interval up to `at` and close it.
    fn flush(&mut self, at: f64) {
        if let Some((since, zone)) = self.last.take() {
            self.histogram.add(zone, (at - since).clamp(0.0, self.gap_cap));
        }
    }
}

/// Raw samples kept for the final streams.
#[derive(Debug, Clone, Default)]
struct StreamBuffers {
    scalars: BTreeMap<StreamType, (Vec<f64>, Vec<f64>)>,
    locations: (Vec<f64>, Vec<(f64, f64)>),
    moving: (Vec<f64>, Vec<bool>),
}

impl StreamBuffers {
    fn push(&mut self, stream_type: StreamType, at: f64, value: f64) {
        let (timestamps, values) = self.scalars.entry(stream_type).or_default();
        timestamps.push(at);
        values.push(value);
    }

    fn into_raw(self) -> Vec<RawStream> {
        let mut streams: Vec<RawStream> = self
            .scalars
            .into_iter()
            .map(|(stream_type, (timestamps, values))| {
                RawStream::floats(stream_type, timestamps, values)
            })
            .collect();
        streams.push(RawStream::coordinates(self.locations.0, self.locations.1));
        streams.push(RawStream::booleans(StreamType::Moving, self.moving.0, self.moving.1));
        streams.retain(|s| !s.is_empty());
        streams
    }
}

fn stream_for(metric: MetricKind) -> Option<StreamType> {
    match metric {
        MetricKind::Power => Some(StreamType::Power),
        MetricKind::HeartRate => Some(StreamType::HeartRate),
        MetricKind::Cadence => Some(StreamType::Cadence),
        MetricKind::Speed => Some(StreamType::Speed),
        // The distance stream carries the session's own integrated distance.
        MetricKind::Distance | MetricKind::Location => None,
    }
}

/// A single recorded activity.
#[derive(Debug)]
pub struct RecordingSession {
    session_id: Uuid,
    state: SessionState,
    config: RecordingConfig,
    thresholds: AthleteThresholds,
    power_filter: PowerFilter,
    plan: Option<Plan>,
    cursor: Option<PlanCursor>,
    started_at: Option<DateTime<Utc>>,
    /// Start of the current recording segment
    anchor: Option<Instant>,
    /// Elapsed seconds before `anchor`
    elapsed_base: f64,
    elapsed: f64,
    distance: f64,
    aggregates: BTreeMap<MetricKind, MetricAggregate>,
    latest: BTreeMap<MetricKind, (ReadingValue, Instant)>,
    buffers: StreamBuffers,
    power_zones: Option<(PowerZones, ZoneClock)>,
    hr_zones: Option<(HRZones, ZoneClock)>,
    payload: Option<ActivityPayload>,
}

impl RecordingSession {
    /// Create an idle session.
    pub fn new(config: RecordingConfig, thresholds: AthleteThresholds) -> Self {
        let gap_cap = config.zone_gap_cap.as_secs_f64();
        Self {
            session_id: Uuid::new_v4(),
            state: SessionState::Idle,
            power_filter: PowerFilter::with_max_power(config.max_power),
            power_zones: thresholds
                .power_zones()
                .map(|z| (z, ZoneClock::new(7, gap_cap))),
            hr_zones: thresholds
                .hr_zones()
                .map(|z| (z, ZoneClock::new(5, gap_cap))),
            config,
            thresholds,
            plan: None,
            cursor: None,
            started_at: None,
            anchor: None,
            elapsed_base: 0.0,
            elapsed: 0.0,
            distance: 0.0,
            aggregates: BTreeMap::new(),
            latest: BTreeMap::new(),
            buffers: StreamBuffers::default(),
            payload: None,
        }
    }

    /// Create an idle session with default configuration.
    pub fn with_defaults(thresholds: AthleteThresholds) -> Self {
        Self::new(RecordingConfig::default(), thresholds)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &AthleteThresholds {
        &self.thresholds
    }

    /// Elapsed seconds as of the last tick.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed
    }

    /// Distance in meters as of the last tick.
    pub fn distance_meters(&self) -> f64 {
        self.distance
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Plan position, `None` without a plan.
    pub fn cursor(&self) -> Option<StepCursor> {
        self.cursor.as_ref().map(|c| c.position())
    }

    /// Current plan step.
    pub fn current_step(&self) -> Option<&PlanStep> {
        let plan = self.plan.as_ref()?;
        self.cursor.as_ref()?.current_step(plan)
    }

    /// Aggregate for a metric, if any reading was recorded.
    pub fn aggregate(&self, metric: MetricKind) -> Option<&MetricAggregate> {
        self.aggregates.get(&metric)
    }

    fn transition_error(&self, action: &'static str) -> RecordingError {
        RecordingError::InvalidTransition {
            state: self.state,
            action,
        }
    }

    /// Start recording after validation.
    ///
    /// Returns the advisories the caller acknowledged.
    pub fn start(
        &mut self,
        plan: Option<Plan>,
        preflight: &Preflight,
        acknowledge_advisories: bool,
        now: Instant,
    ) -> Result<Vec<ValidationIssue>, RecordingError> {
        if self.state != SessionState::Idle {
            return Err(self.transition_error("start"));
        }

        let issues = validate(plan.as_ref(), preflight, &self.thresholds);
        let acknowledged = check(issues, acknowledge_advisories)?;
        for issue in &acknowledged {
            tracing::warn!("Starting with acknowledged issue: {}", issue);
        }

        self.cursor = plan.as_ref().map(PlanCursor::start);
        self.plan = plan;
        self.started_at = Some(Utc::now());
        self.anchor = Some(now);
        self.state = SessionState::Recording;

        tracing::info!(
            session = %self.session_id,
            plan = self.plan.as_ref().map(|p| p.name.as_str()).unwrap_or("free ride"),
            "Started recording"
        );
        Ok(acknowledged)
    }

    /// Seconds since start for an instant in the current segment.
    fn session_time(&self, at: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => self.elapsed_base + at.saturating_duration_since(anchor).as_secs_f64(),
            None => self.elapsed,
        }
    }

    /// Fold a reading into aggregates, buffers and zone time.
    ///
    /// Returns whether the reading was kept. Readings outside `Recording`
    /// and implausible values are dropped.
    pub fn record(&mut self, reading: &DeviceReading) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        let at = self.session_time(reading.timestamp);

        match reading.value {
            ReadingValue::Coordinate { lat, lon } => {
                if !(lat.is_finite() && lon.is_finite()) {
                    return false;
                }
                self.buffers.locations.0.push(at);
                self.buffers.locations.1.push((lat, lon));
            }
            ReadingValue::Scalar(value) => {
                let value = match reading.metric {
                    MetricKind::Power => match self.power_filter.filter(value) {
                        Some(v) => v,
                        None => {
                            tracing::debug!(
                                "Dropped implausible power {} from {}",
                                value,
                                reading.device_id
                            );
                            return false;
                        }
                    },
                    _ if !value.is_finite() || value < 0.0 => return false,
                    _ => value,
                };

                self.aggregates.entry(reading.metric).or_default().add(value);
                if let Some(stream_type) = stream_for(reading.metric) {
                    self.buffers.push(stream_type, at, value);
                }

                match reading.metric {
                    MetricKind::Power => {
                        if let Some((zones, clock)) = self.power_zones.as_mut() {
                            let watts = value.round().min(u16::MAX as f64) as u16;
                            clock.observe(at, zones.get_zone(watts));
                        }
                    }
                    MetricKind::HeartRate => {
                        if let Some((zones, clock)) = self.hr_zones.as_mut() {
                            let bpm = value.round().min(u8::MAX as f64) as u8;
                            clock.observe(at, zones.get_zone(bpm));
                        }
                    }
                    _ => {}
                }
            }
        }

        self.latest
            .insert(reading.metric, (reading.value, reading.timestamp));
        true
    }

    /// Speed to integrate at `now`; stale speed counts as stopped.
    fn current_speed_kmh(&self, now: Instant) -> f64 {
        match self.latest.get(&MetricKind::Speed) {
            Some((ReadingValue::Scalar(kmh), at))
                if now.saturating_duration_since(*at) <= self.config.speed_staleness =>
            {
                *kmh
            }
            _ => 0.0,
        }
    }

    /// Move elapsed time and distance forward to `now`.
    fn advance_clock(&mut self, now: Instant) {
        let elapsed = self.session_time(now).max(self.elapsed);
        let dt = elapsed - self.elapsed;
        let speed = self.current_speed_kmh(now);

        self.distance += speed / 3.6 * dt;
        self.elapsed = elapsed;

        self.buffers.push(StreamType::Distance, elapsed, self.distance);
        self.buffers.moving.0.push(elapsed);
        self.buffers.moving.1.push(speed > 0.0);
    }

    /// Elapsed-time tick. Plan advancement is evaluated after the clock
    /// moves, so the crossing tick still belongs to the outgoing step.
    pub fn tick(&mut self, now: Instant) -> Vec<StepChange> {
        if self.state != SessionState::Recording {
            return Vec::new();
        }
        self.advance_clock(now);

        let (Some(plan), Some(cursor)) = (self.plan.as_ref(), self.cursor.as_mut()) else {
            return Vec::new();
        };
        let changes = cursor.evaluate(plan, self.elapsed, self.distance);
        for change in &changes {
            tracing::info!("Step {:?} -> {:?} ({:?})", change.from, change.to, change.reason);
        }
        changes
    }

    /// Pause recording. Elapsed time and the plan cursor are kept.
    pub fn pause(&mut self, now: Instant) -> Result<(), RecordingError> {
        if self.state != SessionState::Recording {
            return Err(self.transition_error("pause"));
        }
        self.advance_clock(now);
        self.elapsed_base = self.elapsed;
        self.anchor = None;
        self.flush_zones();
        self.state = SessionState::Paused;

        tracing::info!(elapsed = self.elapsed, "Paused recording");
        Ok(())
    }

    /// Resume recording; the paused interval is not counted.
    pub fn resume(&mut self, now: Instant) -> Result<(), RecordingError> {
        if self.state != SessionState::Paused {
            return Err(self.transition_error("resume"));
        }
        self.anchor = Some(now);
        self.state = SessionState::Recording;

        tracing::info!(elapsed = self.elapsed, "Resumed recording");
        Ok(())
    }

    /// Move to the next plan step regardless of thresholds.
    pub fn advance_step(&mut self) -> Result<StepChange, RecordingError> {
        if !self.state.is_active() {
            return Err(self.transition_error("advance step"));
        }
        let (Some(plan), Some(cursor)) = (self.plan.as_ref(), self.cursor.as_mut()) else {
            return Err(RecordingError::NoPlan);
        };
        let change = cursor
            .advance(plan, self.elapsed, self.distance)
            .ok_or(RecordingError::PlanComplete)?;

        tracing::info!("Manual advance {:?} -> {:?}", change.from, change.to);
        Ok(change)
    }

    fn flush_zones(&mut self) {
        let at = self.elapsed;
        if let Some((_, clock)) = self.power_zones.as_mut() {
            clock.flush(at);
        }
        if let Some((_, clock)) = self.hr_zones.as_mut() {
            clock.flush(at);
        }
    }

    /// Compute the summary and compress streams. Allowed once.
    pub fn finalize(&mut self, now: Instant) -> Result<ActivityPayload, RecordingError> {
        if !self.state.is_active() {
            return Err(self.transition_error("finalize"));
        }
        if self.state == SessionState::Recording {
            self.advance_clock(now);
        }
        self.flush_zones();
        self.anchor = None;
        self.state = SessionState::Finalizing;

        let duration = self.elapsed;
        let metrics = self
            .aggregates
            .iter()
            .filter_map(|(metric, agg)| agg.summary().map(|s| (*metric, s)))
            .collect();

        let normalized_power = self
            .buffers
            .scalars
            .get(&StreamType::Power)
            .and_then(|(timestamps, values)| {
                normalized_power(&resample_per_second(timestamps, values, duration))
            });
        let average_hr = self
            .aggregates
            .get(&MetricKind::HeartRate)
            .and_then(|a| a.average());
        let stress = activity_stress(duration, normalized_power, average_hr, &self.thresholds);

        let steps_completed = match (self.plan.as_ref(), self.cursor()) {
            (Some(plan), Some(StepCursor::Complete)) => plan.steps.len(),
            (Some(_), Some(StepCursor::Step(index))) => index,
            _ => 0,
        };

        let summary = ActivitySummary {
            session_id: self.session_id,
            plan_name: self.plan.as_ref().map(|p| p.name.clone()),
            started_at: self.started_at.unwrap_or_else(Utc::now),
            duration_seconds: duration,
            distance_meters: self.distance,
            metrics,
            normalized_power,
            intensity_factor: stress.map(|s| s.intensity_factor),
            tss: stress.map(|s| s.tss),
            stress_source: stress.map(|s| s.source),
            power_zone_seconds: self.power_zones.as_ref().map(|(_, c)| c.histogram.clone()),
            hr_zone_seconds: self.hr_zones.as_ref().map(|(_, c)| c.histogram.clone()),
            thresholds: self.thresholds,
            steps_completed,
        };

        let streams: Vec<CompressedStream> = std::mem::take(&mut self.buffers)
            .into_raw()
            .iter()
            .filter_map(|raw| match compress(raw) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    tracing::warn!("Skipping {} stream: {}", raw.stream_type, e);
                    None
                }
            })
            .collect();

        tracing::info!(
            session = %self.session_id,
            duration_s = duration,
            distance_m = self.distance,
            streams = streams.len(),
            "Finalized recording"
        );

        let payload = ActivityPayload { summary, streams };
        self.payload = Some(payload.clone());
        Ok(payload)
    }

    /// The finalized payload, once available.
    pub fn payload(&self) -> Option<&ActivityPayload> {
        self.payload.as_ref()
    }

    /// Mark the finalized activity as submitted.
    pub fn submit(&mut self) -> Result<(), RecordingError> {
        if self.state != SessionState::Finalizing {
            return Err(self.transition_error("submit"));
        }
        self.state = SessionState::Submitted;
        tracing::info!(session = %self.session_id, "Submitted recording");
        Ok(())
    }

    /// Throw the activity away.
    pub fn discard(&mut self) -> Result<(), RecordingError> {
        if !(self.state.is_active() || self.state == SessionState::Finalizing) {
            return Err(self.transition_error("discard"));
        }
        self.state = SessionState::Discarded;
        self.anchor = None;
        self.buffers = StreamBuffers::default();
        self.payload = None;
        tracing::info!(session = %self.session_id, "Discarded recording");
        Ok(())
    }

    /// Read-only view for observers.
    pub fn snapshot(&self) -> SessionSnapshot {
        let step_remaining = match (self.plan.as_ref(), self.cursor.as_ref()) {
            (Some(plan), Some(cursor)) => cursor.remaining(plan, self.elapsed, self.distance),
            _ => None,
        };

        SessionSnapshot {
            session_id: self.session_id,
            state: self.state,
            elapsed_seconds: self.elapsed,
            distance_meters: self.distance,
            plan_name: self.plan.as_ref().map(|p| p.name.clone()),
            cursor: self.cursor(),
            current_step: self.current_step().cloned(),
            step_remaining,
            latest: self
                .latest
                .iter()
                .map(|(metric, (value, _))| (*metric, *value))
                .collect(),
        }
    }
}
