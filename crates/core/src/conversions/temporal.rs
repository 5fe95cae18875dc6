use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::{AvrosubError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};

use super::{datum_mismatch, wire_mismatch, LogicalTypeConversion, WireType};
use crate::datum::Datum;

const MILLIS_PER_DAY: i64 = 86_400_000;
const MICROS_PER_DAY: i64 = MILLIS_PER_DAY * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    Date,
    TimeMillis,
    TimeMicros,
    TimestampMillis,
    TimestampMicros,
    TimestampNanos,
    LocalTimestampMillis,
    LocalTimestampMicros,
    LocalTimestampNanos,
}

/// Dates, times of day and timestamps, all carried as counts since the Unix
/// epoch (or since midnight) at the precision named by the logical type.
/// Timestamps decode to UTC instants; local timestamps to wall-clock values.
#[derive(Debug, Clone, Copy)]
pub struct TemporalConversion {
    kind: TemporalKind,
}

impl TemporalConversion {
    pub fn new(kind: TemporalKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TemporalKind {
        self.kind
    }

    fn out_of_range(&self, raw: i64) -> AvrosubError {
        AvrosubError::DecodeFailure(format!(
            "{} value {raw} is out of range",
            self.logical_type()
        ))
    }

    fn instant(&self, raw: i64) -> Result<DateTime<Utc>> {
        let instant = match self.kind {
            TemporalKind::TimestampMillis | TemporalKind::LocalTimestampMillis => {
                DateTime::from_timestamp_millis(raw)
            }
            TemporalKind::TimestampMicros | TemporalKind::LocalTimestampMicros => {
                DateTime::from_timestamp_micros(raw)
            }
            TemporalKind::TimestampNanos | TemporalKind::LocalTimestampNanos => {
                Some(DateTime::from_timestamp_nanos(raw))
            }
            _ => None,
        };
        instant.ok_or_else(|| self.out_of_range(raw))
    }

    fn epoch_count(&self, instant: &DateTime<Utc>) -> Result<i64> {
        match self.kind {
            TemporalKind::TimestampMillis | TemporalKind::LocalTimestampMillis => {
                Ok(instant.timestamp_millis())
            }
            TemporalKind::TimestampMicros | TemporalKind::LocalTimestampMicros => {
                Ok(instant.timestamp_micros())
            }
            _ => instant.timestamp_nanos_opt().ok_or_else(|| {
                AvrosubError::EncodeFailure(format!(
                    "{instant} cannot be represented in nanoseconds"
                ))
            }),
        }
    }
}

impl LogicalTypeConversion for TemporalConversion {
    fn logical_type(&self) -> &'static str {
        match self.kind {
            TemporalKind::Date => "date",
            TemporalKind::TimeMillis => "time-millis",
            TemporalKind::TimeMicros => "time-micros",
            TemporalKind::TimestampMillis => "timestamp-millis",
            TemporalKind::TimestampMicros => "timestamp-micros",
            TemporalKind::TimestampNanos => "timestamp-nanos",
            TemporalKind::LocalTimestampMillis => "local-timestamp-millis",
            TemporalKind::LocalTimestampMicros => "local-timestamp-micros",
            TemporalKind::LocalTimestampNanos => "local-timestamp-nanos",
        }
    }

    fn wire_type(&self) -> WireType {
        match self.kind {
            TemporalKind::Date | TemporalKind::TimeMillis => WireType::Int,
            _ => WireType::Long,
        }
    }

    fn decode(&self, raw: Value, _schema: &Schema) -> Result<Datum> {
        let raw = match (self.wire_type(), raw) {
            (WireType::Int, Value::Int(v)) => i64::from(v),
            (WireType::Long, Value::Long(v)) => v,
            (_, other) => return Err(wire_mismatch(self.logical_type(), &other)),
        };

        match self.kind {
            TemporalKind::Date => {
                let days = epoch_date()?
                    .checked_add_signed(chrono::Duration::days(raw))
                    .ok_or_else(|| self.out_of_range(raw))?;
                Ok(Datum::Date(days))
            }
            TemporalKind::TimeMillis => time_of_day(raw, 1_000, MILLIS_PER_DAY)
                .map(Datum::Time)
                .ok_or_else(|| self.out_of_range(raw)),
            TemporalKind::TimeMicros => time_of_day(raw, 1_000_000, MICROS_PER_DAY)
                .map(Datum::Time)
                .ok_or_else(|| self.out_of_range(raw)),
            TemporalKind::TimestampMillis
            | TemporalKind::TimestampMicros
            | TemporalKind::TimestampNanos => self.instant(raw).map(Datum::Timestamp),
            TemporalKind::LocalTimestampMillis
            | TemporalKind::LocalTimestampMicros
            | TemporalKind::LocalTimestampNanos => self
                .instant(raw)
                .map(|instant| Datum::LocalTimestamp(instant.naive_utc())),
        }
    }

    fn encode(&self, datum: &Datum, _schema: &Schema) -> Result<Value> {
        match (self.kind, datum) {
            (TemporalKind::Date, Datum::Date(date)) => {
                let days = date.signed_duration_since(epoch_date()?).num_days();
                i32::try_from(days).map(Value::Int).map_err(|_| {
                    AvrosubError::EncodeFailure(format!("date {date} is out of range"))
                })
            }
            (TemporalKind::TimeMillis, Datum::Time(time)) => {
                let millis = i64::from(time.num_seconds_from_midnight()) * 1_000
                    + i64::from(time.nanosecond() / 1_000_000);
                Ok(Value::Int(millis as i32))
            }
            (TemporalKind::TimeMicros, Datum::Time(time)) => Ok(Value::Long(
                i64::from(time.num_seconds_from_midnight()) * 1_000_000
                    + i64::from(time.nanosecond() / 1_000),
            )),
            (
                TemporalKind::TimestampMillis
                | TemporalKind::TimestampMicros
                | TemporalKind::TimestampNanos,
                Datum::Timestamp(instant),
            ) => self.epoch_count(instant).map(Value::Long),
            (
                TemporalKind::LocalTimestampMillis
                | TemporalKind::LocalTimestampMicros
                | TemporalKind::LocalTimestampNanos,
                Datum::LocalTimestamp(local),
            ) => self.epoch_count(&local.and_utc()).map(Value::Long),
            (_, other) => Err(datum_mismatch(self.logical_type(), other)),
        }
    }
}

fn epoch_date() -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| AvrosubError::DecodeFailure("invalid epoch date".to_string()))
}

fn time_of_day(raw: i64, units_per_second: i64, units_per_day: i64) -> Option<NaiveTime> {
    if !(0..units_per_day).contains(&raw) {
        return None;
    }
    let seconds = (raw / units_per_second) as u32;
    let nanos = ((raw % units_per_second) * (1_000_000_000 / units_per_second)) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
}
