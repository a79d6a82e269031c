//! Bus stop table and nearest-stop search

use anyhow::{Context, Result};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::storage::Database;

/// Stop lookup failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    #[error("no stops to search")]
    Empty,
    #[error("no stop has a finite distance to the rider")]
    NoFiniteDistance,
    #[error("coordinate lists differ in length: {xs} x values, {ys} y values")]
    LengthMismatch { xs: usize, ys: usize },
    #[error("stop columns differ in length: {ids} ids, {names} names, {xs} x, {ys} y")]
    ColumnMismatch {
        ids: usize,
        names: usize,
        xs: usize,
        ys: usize,
    },
}

/// Index of the point closest to `(lon, lat)` by planar distance
///
/// Ties go to the lowest index. Points at a non-finite distance (NaN or
/// infinite coordinates) are skipped.
pub fn nearest_stop_index(lon: f64, lat: f64, xs: &[f64], ys: &[f64]) -> Result<usize, StopError> {
    if xs.len() != ys.len() {
        return Err(StopError::LengthMismatch {
            xs: xs.len(),
            ys: ys.len(),
        });
    }

    let mut best: Option<(usize, f64)> = None;
    for (index, (x, y)) in xs.iter().zip(ys).enumerate() {
        // Squared distance preserves the ordering
        let distance = (x - lon).powi(2) + (y - lat).powi(2);
        if !distance.is_finite() {
            continue;
        }
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((index, distance)),
        }
    }

    match best {
        Some((index, _)) => Ok(index),
        None if xs.is_empty() => Err(StopError::Empty),
        None => Err(StopError::NoFiniteDistance),
    }
}

/// A single bus stop
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub name: String,
    /// Longitude
    pub x: f64,
    /// Latitude
    pub y: f64,
}

/// All known stops as index-aligned columns
#[derive(Debug, Clone, Default)]
pub struct StopTable {
    ids: Vec<String>,
    names: Vec<String>,
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl StopTable {
    /// Build a table from parallel columns
    pub fn new(
        ids: Vec<String>,
        names: Vec<String>,
        xs: Vec<f64>,
        ys: Vec<f64>,
    ) -> Result<Self, StopError> {
        let len = ids.len();
        if names.len() != len || xs.len() != len || ys.len() != len {
            return Err(StopError::ColumnMismatch {
                ids: ids.len(),
                names: names.len(),
                xs: xs.len(),
                ys: ys.len(),
            });
        }
        Ok(Self { ids, names, xs, ys })
    }

    /// Read the stop table from the lookup database
    pub fn load(db: &Database, config: &DatabaseConfig) -> Result<Self> {
        let table = config.station_table.as_str();
        let ids = db.query_all_column(table, &config.station_id_column)?;
        let names = db.query_all_column(table, &config.station_name_column)?;
        let xs = parse_coordinates(db.query_all_column(table, &config.station_x_column)?)
            .context("Invalid stop longitude")?;
        let ys = parse_coordinates(db.query_all_column(table, &config.station_y_column)?)
            .context("Invalid stop latitude")?;

        Ok(Self::new(ids, names, xs, ys)?)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Stop at `index`
    pub fn get(&self, index: usize) -> Option<Stop> {
        Some(Stop {
            id: self.ids.get(index)?.clone(),
            name: self.names.get(index)?.clone(),
            x: *self.xs.get(index)?,
            y: *self.ys.get(index)?,
        })
    }

    /// Stop closest to the rider
    pub fn nearest(&self, lon: f64, lat: f64) -> Result<Stop, StopError> {
        let index = nearest_stop_index(lon, lat, &self.xs, &self.ys)?;
        self.get(index).ok_or(StopError::Empty)
    }
}

fn parse_coordinates(values: Vec<String>) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .with_context(|| format!("not a coordinate: {:?}", v))
        })
        .collect()
}
