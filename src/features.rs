use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

use crate::error::InferenceError;

/// Column order the bundled models were fitted with.
pub const DEFAULT_FEATURES: [&str; 19] = [
    "temperature_2m_",
    "relative_humidity_2m_",
    "dew_point_2m_",
    "apparent_temperature_",
    "cloud_cover_",
    "surface_pressure_hPa",
    "wind_speed_100m_km/h",
    "wind_gusts_10m_km/h",
    "vapour_pressure_deficit_kPa",
    "hour",
    "day",
    "month",
    "weekday",
    "temperature_2m__lag1",
    "temperature_2m__lag3",
    "relative_humidity_2m__lag1",
    "relative_humidity_2m__lag3",
    "temperature_2m__roll3",
    "relative_humidity_2m__roll3",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("feature schema is empty")]
    Empty,
    #[error("feature '{0}' appears more than once in the schema")]
    Duplicate(String),
}

// ---------- Schema ----------

/// Ordered feature slots, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Result<Self, SchemaError> {
        if names.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(SchemaError::Duplicate(name.clone()));
            }
        }
        Ok(Self { names, index })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Names in `columns` that have no slot in this schema.
    pub fn missing<'c>(&self, columns: &'c [String]) -> Vec<&'c str> {
        columns
            .iter()
            .filter(|c| !self.index.contains_key(c.as_str()))
            .map(String::as_str)
            .collect()
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        let names: Vec<String> = DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, index }
    }
}

// ---------- Vector ----------

/// One request's values, laid out in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector<'s> {
    schema: &'s FeatureSchema,
    values: Vec<f32>,
}

impl<'s> FeatureVector<'s> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.schema.position(name).map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Re-lay the vector in `columns` order; every column must exist.
    pub fn select(&self, columns: &[String]) -> Result<Vec<f32>, InferenceError> {
        let mut v = Vec::with_capacity(columns.len());
        for c in columns {
            let i = self
                .schema
                .position(c)
                .ok_or_else(|| InferenceError::ColumnMismatch(c.clone()))?;
            v.push(self.values[i]);
        }
        Ok(v)
    }
}

// ---------- Builder ----------

/// Mock feature row for `date`: temporal slots from the calendar, every
/// other slot zero.
pub fn build(date: NaiveDate, schema: &FeatureSchema) -> FeatureVector<'_> {
    let values = schema
        .names()
        .iter()
        .map(|name| match name.as_str() {
            // input carries no time of day
            "hour" => 0.0,
            "day" => date.day() as f32,
            "month" => date.month() as f32,
            "weekday" => date.weekday().num_days_from_monday() as f32,
            _ => 0.0,
        })
        .collect();
    FeatureVector { schema, values }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn default_schema_has_nineteen_slots_in_order() {
        let schema = FeatureSchema::default();
        assert_eq!(schema.len(), 19);
        assert_eq!(schema.names()[0], "temperature_2m_");
        assert_eq!(schema.position("hour"), Some(9));
        assert_eq!(schema.position("weekday"), Some(12));
        assert_eq!(schema.names()[18], "relative_humidity_2m__roll3");
    }

    #[test]
    fn schema_rejects_empty_and_duplicates() {
        assert_eq!(FeatureSchema::new(vec![]).unwrap_err(), SchemaError::Empty);
        let err = FeatureSchema::new(vec!["day".into(), "month".into(), "day".into()]).unwrap_err();
        assert_eq!(err, SchemaError::Duplicate("day".into()));
    }

    #[test]
    fn temporal_slots_follow_the_calendar() {
        let schema = FeatureSchema::default();
        // 2024-02-26 is a Monday
        let v = build(d(2024, 2, 26), &schema);
        assert_eq!(v.get("hour"), Some(0.0));
        assert_eq!(v.get("day"), Some(26.0));
        assert_eq!(v.get("month"), Some(2.0));
        assert_eq!(v.get("weekday"), Some(0.0));

        // 2023-12-31 is a Sunday
        let v = build(d(2023, 12, 31), &schema);
        assert_eq!(v.get("day"), Some(31.0));
        assert_eq!(v.get("month"), Some(12.0));
        assert_eq!(v.get("weekday"), Some(6.0));
    }

    #[test]
    fn non_temporal_slots_are_zero_for_a_year_of_dates() {
        let schema = FeatureSchema::default();
        let temporal = ["hour", "day", "month", "weekday"];
        let mut date = d(2024, 1, 1);
        while date.year() == 2024 {
            let v = build(date, &schema);
            assert_eq!(v.len(), schema.len());
            for (name, value) in v.iter() {
                if !temporal.contains(&name) {
                    assert_eq!(value, 0.0, "{name} on {date}");
                }
            }
            assert_eq!(v.get("weekday"), Some(date.weekday().num_days_from_monday() as f32));
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn schema_without_temporal_slots_is_all_zero() {
        let schema = FeatureSchema::new(vec!["a".into(), "b".into()]).unwrap();
        let v = build(d(2024, 7, 4), &schema);
        assert_eq!(v.values(), &[0.0, 0.0]);
    }

    #[test]
    fn select_reorders_and_reports_unknown_columns() {
        let schema = FeatureSchema::default();
        let v = build(d(2024, 3, 15), &schema);
        let cols = vec!["month".to_string(), "day".to_string(), "cloud_cover_".to_string()];
        assert_eq!(v.select(&cols).unwrap(), vec![3.0, 15.0, 0.0]);

        let bad = vec!["rain_lag1".to_string()];
        let err = v.select(&bad).unwrap_err();
        assert!(matches!(err, InferenceError::ColumnMismatch(ref c) if c == "rain_lag1"));
        assert_eq!(schema.missing(&bad), vec!["rain_lag1"]);
    }
}
