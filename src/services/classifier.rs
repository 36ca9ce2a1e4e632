//! Streams `Record`/`Workout`/`ActivitySummary` end-events out of the export
//! XML and turns each into a typed, normalised record or a skip diagnostic
//! (component C2), applying the unit conversions of C3 along the way.
//!
//! The parser never materialises more than the element currently being
//! built: `quick_xml` is a true pull parser (it does not build a DOM), and
//! the shared read buffer is cleared on every iteration, so memory stays
//! bounded regardless of file size.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::units;
use crate::error::IngestError;

const QUANTITATIVE_PREFIX: &str = "HKQuantityTypeIdentifier";
const CATEGORICAL_PREFIX: &str = "HKCategoryTypeIdentifier";
const WORKOUT_TYPE_PREFIX: &str = "HKWorkoutActivityType";
const CATEGORY_VALUE_PREFIX: &str = "HKCategoryValue";

/// Fixed namespace for deriving deterministic workout ids. Any
/// implementation computing ids over the same bytes must reproduce the same
/// uuid, so this value is part of the on-disk contract, not an
/// implementation detail.
const WORKOUT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x14, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

static APPLE_DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2})\s+([+-]\d{4})$").unwrap()
});

/// Parse the vendor date form `YYYY-MM-DD HH:MM:SS ±HHMM` into a
/// timezone-aware instant.
pub fn parse_apple_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let caps = APPLE_DATETIME_RE.captures(raw.trim())?;
    let naive = format!("{} {}", &caps[1], &caps[2]);
    let offset_str = &caps[3];
    let sign = if offset_str.starts_with('-') { -1 } else { 1 };
    let hours: i32 = offset_str[1..3].parse().ok()?;
    let minutes: i32 = offset_str[3..5].parse().ok()?;
    let offset_secs = sign * (hours * 3600 + minutes * 60);
    let offset = FixedOffset::east_opt(offset_secs)?;
    let naive_dt = chrono::NaiveDateTime::parse_from_str(&naive, "%Y-%m-%d %H:%M:%S").ok()?;
    let dt = offset.from_local_datetime(&naive_dt).single()?;
    Some(dt.with_timezone(&Utc))
}

/// Parse a bare `YYYY-MM-DD` into a calendar date.
pub fn parse_apple_date_only(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Strip a known vendor prefix from a type identifier, e.g.
/// `HKQuantityTypeIdentifierStepCount` -> `StepCount`.
pub fn strip_type_prefix<'a>(raw: &'a str, prefix: &str) -> &'a str {
    raw.strip_prefix(prefix).unwrap_or(raw)
}

/// Derive a human label from a categorical value: drop the known prefix,
/// then insert a space at every lowercase->uppercase boundary.
pub fn derive_category_label(raw_value: &str) -> String {
    let stripped = raw_value.strip_prefix(CATEGORY_VALUE_PREFIX).unwrap_or("");
    if stripped.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(stripped.len() + 4);
    let mut prev_lower = false;
    for ch in stripped.chars() {
        if prev_lower && ch.is_uppercase() {
            out.push(' ');
        }
        out.push(ch);
        prev_lower = ch.is_lowercase();
    }
    out
}

/// Deterministic uuid derived from `(owner_id, start_time, activity_type)`
/// via the fixed namespace above, so reruns produce the same id and land
/// via conflict-skip rather than producing duplicate workout rows.
pub fn deterministic_workout_id(
    owner_id: Uuid,
    start_time: DateTime<Utc>,
    activity_type: &str,
) -> Uuid {
    let name = format!("{owner_id}|{}|{activity_type}", start_time.to_rfc3339());
    Uuid::new_v5(&WORKOUT_NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingType,
    UnrecognisedTypePrefix,
    MissingStartDate,
    UnparseableStartDate,
    MissingValue,
    NonNumericValue,
    MissingActivityType,
    MissingDate,
}

impl SkipReason {
    pub fn diagnostic(&self, tag: &str) -> String {
        let reason = match self {
            Self::MissingType => "missing type attribute",
            Self::UnrecognisedTypePrefix => "type does not match a recognised prefix",
            Self::MissingStartDate => "missing startDate attribute",
            Self::UnparseableStartDate => "startDate could not be parsed",
            Self::MissingValue => "missing value attribute",
            Self::NonNumericValue => "value is not numeric",
            Self::MissingActivityType => "missing workoutActivityType attribute",
            Self::MissingDate => "missing dateComponents attribute",
        };
        format!("{tag} skipped: {reason}")
    }
}

#[derive(Debug, Clone)]
pub struct RawQuantitativeSample {
    pub metric_type: String,
    pub time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub value: f64,
    pub unit: Option<String>,
    pub source_name: Option<String>,
    pub source_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawCategoricalSample {
    pub category_type: String,
    pub time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub raw_value: String,
    pub label: String,
    pub source_name: Option<String>,
    pub source_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawRoutePoint {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_meters: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RawWorkout {
    pub activity_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub distance_meters: Option<f64>,
    pub energy_kj: Option<f64>,
    pub source_name: Option<String>,
    pub source_version: Option<String>,
    pub metadata: JsonValue,
    pub route_points: Vec<RawRoutePoint>,
}

#[derive(Debug, Clone)]
pub struct RawActivitySummary {
    pub date: NaiveDate,
    pub active_energy_burned_kj: Option<f64>,
    pub active_energy_burned_goal_kj: Option<f64>,
    pub exercise_minutes: Option<f64>,
    pub exercise_minutes_goal: Option<f64>,
    pub stand_hours: Option<f64>,
    pub stand_hours_goal: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum ClassifiedElement {
    Quantitative(RawQuantitativeSample),
    Categorical(RawCategoricalSample),
    Workout(RawWorkout),
    ActivitySummary(RawActivitySummary),
}

fn attrs_map(start: &BytesStart) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if let Ok(value) = attr.unescape_value() {
            map.insert(key, value.to_string());
        }
    }
    map
}

fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

/// Classify a `Record` element's attributes into a quantitative or
/// categorical sample, or a skip reason.
pub fn classify_record(
    attrs: &BTreeMap<String, String>,
) -> Result<ClassifiedElement, SkipReason> {
    let raw_type = attrs.get("type").ok_or(SkipReason::MissingType)?;
    let start_date = attrs
        .get("startDate")
        .ok_or(SkipReason::MissingStartDate)?;
    let time =
        parse_apple_datetime(start_date).ok_or(SkipReason::UnparseableStartDate)?;
    let end_time = attrs.get("endDate").and_then(|s| parse_apple_datetime(s));
    let source_name = attrs.get("sourceName").cloned();
    let source_version = attrs.get("sourceVersion").cloned();

    if let Some(metric_type) = raw_type.strip_prefix(QUANTITATIVE_PREFIX) {
        let raw_value = attrs.get("value").ok_or(SkipReason::MissingValue)?;
        let value = parse_f64(raw_value).ok_or(SkipReason::NonNumericValue)?;
        let unit = attrs.get("unit").cloned();
        return Ok(ClassifiedElement::Quantitative(RawQuantitativeSample {
            metric_type: metric_type.to_string(),
            time,
            end_time,
            value,
            unit,
            source_name,
            source_version,
        }));
    }

    if let Some(category_type) = raw_type.strip_prefix(CATEGORICAL_PREFIX) {
        let raw_value = attrs.get("value").cloned().unwrap_or_default();
        let label = derive_category_label(&raw_value);
        return Ok(ClassifiedElement::Categorical(RawCategoricalSample {
            category_type: category_type.to_string(),
            time,
            end_time,
            raw_value,
            label,
            source_name,
            source_version,
        }));
    }

    Err(SkipReason::UnrecognisedTypePrefix)
}

/// Classify an `ActivitySummary` element's attributes.
pub fn classify_activity_summary(
    attrs: &BTreeMap<String, String>,
) -> Result<ClassifiedElement, SkipReason> {
    let date = attrs
        .get("dateComponents")
        .and_then(|s| parse_apple_date_only(s))
        .ok_or(SkipReason::MissingDate)?;

    let energy = attr_with_unit(attrs, "activeEnergyBurned", "activeEnergyBurnedUnit", |v, u| {
        units::energy_to_kj(v, u).value
    });
    let energy_goal = attr_with_unit(
        attrs,
        "activeEnergyBurnedGoal",
        "activeEnergyBurnedUnit",
        |v, u| units::energy_to_kj(v, u).value,
    );
    let exercise_minutes = attrs.get("appleExerciseTime").and_then(|s| parse_f64(s));
    let exercise_minutes_goal = attrs
        .get("appleExerciseTimeGoal")
        .and_then(|s| parse_f64(s));
    let stand_hours = attrs.get("appleStandHours").and_then(|s| parse_f64(s));
    let stand_hours_goal = attrs.get("appleStandHoursGoal").and_then(|s| parse_f64(s));

    Ok(ClassifiedElement::ActivitySummary(RawActivitySummary {
        date,
        active_energy_burned_kj: energy,
        active_energy_burned_goal_kj: energy_goal,
        exercise_minutes,
        exercise_minutes_goal,
        stand_hours,
        stand_hours_goal,
    }))
}

fn attr_with_unit(
    attrs: &BTreeMap<String, String>,
    value_key: &str,
    unit_key: &str,
    convert: impl Fn(f64, &str) -> f64,
) -> Option<f64> {
    let value = attrs.get(value_key).and_then(|s| parse_f64(s))?;
    match attrs.get(unit_key) {
        Some(unit) => Some(convert(value, unit)),
        None => Some(value),
    }
}

/// Accumulates a `Workout` element's attributes and nested
/// `MetadataEntry`/`WorkoutRoute > Location` children while the stream is
/// positioned between its start and end tags.
#[derive(Debug, Default)]
pub struct WorkoutBuilder {
    attrs: BTreeMap<String, String>,
    metadata: serde_json::Map<String, JsonValue>,
    route_points: Vec<RawRoutePoint>,
}

impl WorkoutBuilder {
    pub fn new(attrs: BTreeMap<String, String>) -> Self {
        Self {
            attrs,
            metadata: serde_json::Map::new(),
            route_points: Vec::new(),
        }
    }

    pub fn add_metadata_entry(&mut self, entry_attrs: &BTreeMap<String, String>) {
        if let (Some(key), Some(value)) = (entry_attrs.get("key"), entry_attrs.get("value")) {
            self.metadata.insert(key.clone(), JsonValue::String(value.clone()));
        }
    }

    pub fn add_location(&mut self, loc_attrs: &BTreeMap<String, String>) {
        let time = match loc_attrs.get("date").and_then(|s| parse_apple_datetime(s)) {
            Some(t) => t,
            None => return,
        };
        let latitude = match loc_attrs.get("latitude").and_then(|s| parse_f64(s)) {
            Some(v) => v,
            None => return,
        };
        let longitude = match loc_attrs.get("longitude").and_then(|s| parse_f64(s)) {
            Some(v) => v,
            None => return,
        };
        let altitude_meters = loc_attrs.get("altitude").and_then(|s| parse_f64(s));
        self.route_points.push(RawRoutePoint {
            time,
            latitude,
            longitude,
            altitude_meters,
        });
    }

    pub fn finish(self) -> Result<RawWorkout, SkipReason> {
        let raw_type = self
            .attrs
            .get("workoutActivityType")
            .ok_or(SkipReason::MissingActivityType)?;
        let activity_type = strip_type_prefix(raw_type, WORKOUT_TYPE_PREFIX).to_string();
        let start_date = self
            .attrs
            .get("startDate")
            .ok_or(SkipReason::MissingStartDate)?;
        let start_time =
            parse_apple_datetime(start_date).ok_or(SkipReason::UnparseableStartDate)?;
        let end_time = self.attrs.get("endDate").and_then(|s| parse_apple_datetime(s));

        let duration_seconds = attr_with_unit(&self.attrs, "duration", "durationUnit", |v, u| {
            units::duration_to_seconds(v, u).value
        });
        let distance_meters = attr_with_unit(
            &self.attrs,
            "totalDistance",
            "totalDistanceUnit",
            |v, u| units::distance_to_metres(v, u).value,
        );
        let energy_kj = attr_with_unit(
            &self.attrs,
            "totalEnergyBurned",
            "totalEnergyBurnedUnit",
            |v, u| units::energy_to_kj(v, u).value,
        );

        Ok(RawWorkout {
            activity_type,
            start_time,
            end_time,
            duration_seconds,
            distance_meters,
            energy_kj,
            source_name: self.attrs.get("sourceName").cloned(),
            source_version: self.attrs.get("sourceVersion").cloned(),
            metadata: JsonValue::Object(self.metadata),
            route_points: self.route_points,
        })
    }
}

/// Outcome of advancing the stream by one structural event.
pub enum StreamItem {
    Classified(ClassifiedElement),
    Skipped { tag: &'static str, reason: SkipReason },
    /// Nothing to report yet (e.g. a non-recognised tag, or a tag we're
    /// still accumulating children for).
    Continue,
    Eof,
}

/// Drives the pull parser over the export XML, yielding one `StreamItem` per
/// call to `next`. Tolerates malformed bytes outside the structural grammar
/// in a best-effort mode; a run of consecutive read errors is treated as an
/// irrecoverable structural failure.
pub struct ElementStream {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
    current_workout: Option<WorkoutBuilder>,
    consecutive_errors: u32,
}

const MAX_CONSECUTIVE_READ_ERRORS: u32 = 50;

impl ElementStream {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let file = File::open(path)?;
        let buf_reader = BufReader::with_capacity(8 * 1024 * 1024, file);
        let mut reader = Reader::from_reader(buf_reader);
        reader.config_mut().trim_text(true);
        reader.config_mut().check_end_names = false;
        Ok(Self {
            reader,
            buf: Vec::with_capacity(4096),
            current_workout: None,
            consecutive_errors: 0,
        })
    }

    pub fn next(&mut self) -> Result<StreamItem, IngestError> {
        self.buf.clear();
        match self.reader.read_event_into(&mut self.buf) {
            Err(e) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > MAX_CONSECUTIVE_READ_ERRORS {
                    return Err(IngestError::ParseFatal(format!(
                        "too many consecutive malformed-byte errors: {e}"
                    )));
                }
                tracing::warn!("tolerating malformed XML bytes: {e}");
                Ok(StreamItem::Continue)
            }
            Ok(Event::Eof) => Ok(StreamItem::Eof),
            Ok(event) => {
                let event = event.into_owned();
                self.consecutive_errors = 0;
                self.handle_event(event)
            }
        }
    }

    fn handle_event(&mut self, event: Event<'_>) -> Result<StreamItem, IngestError> {
        match event {
            Event::Start(start) => match start.name().as_ref() {
                b"Workout" => {
                    self.current_workout = Some(WorkoutBuilder::new(attrs_map(&start)));
                    Ok(StreamItem::Continue)
                }
                _ => Ok(StreamItem::Continue),
            },
            Event::Empty(start) => match start.name().as_ref() {
                b"Record" => Ok(self.classify_or_skip_record(&start)),
                b"MetadataEntry" => {
                    if let Some(workout) = self.current_workout.as_mut() {
                        workout.add_metadata_entry(&attrs_map(&start));
                    }
                    Ok(StreamItem::Continue)
                }
                b"Location" => {
                    if let Some(workout) = self.current_workout.as_mut() {
                        workout.add_location(&attrs_map(&start));
                    }
                    Ok(StreamItem::Continue)
                }
                b"ActivitySummary" => {
                    let attrs = attrs_map(&start);
                    match classify_activity_summary(&attrs) {
                        Ok(classified) => Ok(StreamItem::Classified(classified)),
                        Err(reason) => Ok(StreamItem::Skipped {
                            tag: "ActivitySummary",
                            reason,
                        }),
                    }
                }
                b"Workout" => {
                    // A workout with no children still closes as Empty.
                    let builder = WorkoutBuilder::new(attrs_map(&start));
                    self.finish_workout(builder)
                }
                _ => Ok(StreamItem::Continue),
            },
            Event::End(end) => match end.name().as_ref() {
                b"Workout" => match self.current_workout.take() {
                    Some(builder) => self.finish_workout(builder),
                    None => Ok(StreamItem::Continue),
                },
                _ => Ok(StreamItem::Continue),
            },
            _ => Ok(StreamItem::Continue),
        }
    }

    fn classify_or_skip_record(&self, start: &BytesStart) -> StreamItem {
        let attrs = attrs_map(start);
        match classify_record(&attrs) {
            Ok(classified) => StreamItem::Classified(classified),
            Err(reason) => StreamItem::Skipped {
                tag: "Record",
                reason,
            },
        }
    }

    fn finish_workout(&mut self, builder: WorkoutBuilder) -> Result<StreamItem, IngestError> {
        match builder.finish() {
            Ok(workout) => Ok(StreamItem::Classified(ClassifiedElement::Workout(workout))),
            Err(reason) => Ok(StreamItem::Skipped {
                tag: "Workout",
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apple_datetime_with_negative_offset() {
        let parsed = parse_apple_datetime("2024-01-15 08:30:00 -0500").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T13:30:00+00:00");
    }

    #[test]
    fn parses_apple_datetime_with_positive_offset() {
        let parsed = parse_apple_datetime("2024-06-01 12:00:00 +0200").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T10:00:00+00:00");
    }

    #[test]
    fn bare_date_parses_without_time() {
        assert_eq!(
            parse_apple_date_only("2024-01-15"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
    }

    #[test]
    fn strips_vendor_prefix() {
        assert_eq!(
            strip_type_prefix("HKQuantityTypeIdentifierStepCount", QUANTITATIVE_PREFIX),
            "StepCount"
        );
    }

    #[test]
    fn category_label_inserts_spaces_at_case_boundaries() {
        assert_eq!(
            derive_category_label("HKCategoryValueSleepAnalysisInBed"),
            "Sleep Analysis In Bed"
        );
    }

    #[test]
    fn category_label_is_empty_for_unknown_prefix() {
        assert_eq!(derive_category_label("SomethingElse"), "");
    }

    #[test]
    fn workout_id_is_deterministic() {
        let owner = Uuid::new_v4();
        let start = parse_apple_datetime("2024-01-15 08:30:00 -0500").unwrap();
        let a = deterministic_workout_id(owner, start, "Running");
        let b = deterministic_workout_id(owner, start, "Running");
        assert_eq!(a, b);
        let c = deterministic_workout_id(owner, start, "Cycling");
        assert_ne!(a, c);
    }

    #[test]
    fn classify_record_builds_quantitative_sample() {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".to_string(), "HKQuantityTypeIdentifierStepCount".to_string());
        attrs.insert("startDate".to_string(), "2024-01-15 08:30:00 -0500".to_string());
        attrs.insert("unit".to_string(), "count".to_string());
        attrs.insert("value".to_string(), "1234".to_string());
        match classify_record(&attrs).unwrap() {
            ClassifiedElement::Quantitative(sample) => {
                assert_eq!(sample.metric_type, "StepCount");
                assert_eq!(sample.value, 1234.0);
            }
            _ => panic!("expected quantitative sample"),
        }
    }

    #[test]
    fn classify_record_leaves_quantitative_value_and_unit_unconverted() {
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "type".to_string(),
            "HKQuantityTypeIdentifierDistanceWalkingRunning".to_string(),
        );
        attrs.insert("startDate".to_string(), "2024-01-15 08:30:00 -0500".to_string());
        attrs.insert("unit".to_string(), "mi".to_string());
        attrs.insert("value".to_string(), "3".to_string());
        match classify_record(&attrs).unwrap() {
            ClassifiedElement::Quantitative(sample) => {
                assert_eq!(sample.value, 3.0);
                assert_eq!(sample.unit.as_deref(), Some("mi"));
            }
            _ => panic!("expected quantitative sample"),
        }
    }

    #[test]
    fn classify_record_skips_missing_value() {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".to_string(), "HKQuantityTypeIdentifierStepCount".to_string());
        attrs.insert("startDate".to_string(), "2024-01-15 08:30:00 -0500".to_string());
        let err = classify_record(&attrs).unwrap_err();
        assert_eq!(err, SkipReason::MissingValue);
    }

    #[test]
    fn classify_record_skips_unparseable_start_date() {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".to_string(), "HKQuantityTypeIdentifierStepCount".to_string());
        attrs.insert("startDate".to_string(), "not-a-date".to_string());
        attrs.insert("value".to_string(), "1".to_string());
        let err = classify_record(&attrs).unwrap_err();
        assert_eq!(err, SkipReason::UnparseableStartDate);
    }

    #[test]
    fn classify_record_skips_unrecognised_type_prefix() {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".to_string(), "SomeOtherThing".to_string());
        attrs.insert("startDate".to_string(), "2024-01-15 08:30:00 -0500".to_string());
        let err = classify_record(&attrs).unwrap_err();
        assert_eq!(err, SkipReason::UnrecognisedTypePrefix);
    }

    #[test]
    fn classify_categorical_with_unknown_prefix_has_empty_label() {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".to_string(), "HKCategoryTypeIdentifierSleepAnalysis".to_string());
        attrs.insert("startDate".to_string(), "2024-01-15 08:30:00 -0500".to_string());
        attrs.insert("value".to_string(), "UnknownRaw".to_string());
        match classify_record(&attrs).unwrap() {
            ClassifiedElement::Categorical(sample) => {
                assert_eq!(sample.raw_value, "UnknownRaw");
                assert_eq!(sample.label, "");
            }
            _ => panic!("expected categorical sample"),
        }
    }
}
