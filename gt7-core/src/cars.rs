//! Car metadata lookup
//!
//! Resolves the packet's `car_id` to a name, maker and preview image using
//! the community `cars.csv` / `maker.csv` tables.

use crate::error::CarDataError;
use crate::model::CarInfo;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

pub const CARS_FILE: &str = "cars.csv";
pub const MAKERS_FILE: &str = "maker.csv";

const UNKNOWN_MAKER: &str = "Unknown";

#[derive(Deserialize)]
struct MakerRow {
    #[serde(rename = "ID")]
    id: i32,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct CarRow {
    #[serde(rename = "ID")]
    id: i32,
    #[serde(rename = "ShortName")]
    name: String,
    #[serde(rename = "Maker")]
    maker_id: i32,
}

/// Car id to [`CarInfo`] map
#[derive(Debug, Clone, Default)]
pub struct CarDatabase {
    cars: HashMap<i32, CarInfo>,
}

impl CarDatabase {
    /// Database with no entries; every lookup misses
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load `maker.csv` and `cars.csv` from `dir`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, CarDataError> {
        let dir = dir.as_ref();
        let makers = File::open(dir.join(MAKERS_FILE))?;
        let cars = File::open(dir.join(CARS_FILE))?;
        let db = Self::from_readers(makers, cars)?;
        info!(car_count = db.len(), dir = %dir.display(), "car database loaded");
        Ok(db)
    }

    /// Build from CSV sources. Rows that fail to parse are skipped.
    pub fn from_readers<M: Read, C: Read>(makers: M, cars: C) -> Result<Self, CarDataError> {
        let mut maker_names = HashMap::new();
        for row in csv::Reader::from_reader(makers).deserialize::<MakerRow>() {
            match row {
                Ok(row) => {
                    maker_names.insert(row.id, row.name.trim().to_string());
                }
                Err(err) => warn!(%err, "skipping maker row"),
            }
        }

        let mut by_id = HashMap::new();
        for row in csv::Reader::from_reader(cars).deserialize::<CarRow>() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    warn!(%err, "skipping car row");
                    continue;
                }
            };
            let name = row.name.trim().to_string();
            let maker_name = maker_names
                .get(&row.maker_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_MAKER.to_string());
            let image_url = image_url(&maker_name, &name);
            by_id.insert(
                row.id,
                CarInfo {
                    car_id: row.id,
                    name,
                    maker_id: row.maker_id,
                    maker_name,
                    image_url,
                },
            );
        }

        Ok(Self { cars: by_id })
    }

    pub fn get_car_info(&self, car_id: i32) -> Option<&CarInfo> {
        self.cars.get(&car_id)
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }
}

/// Preview image on gtplus.app for a car.
///
/// The slug is `{maker}-{model}` lowercased and hyphenated, without the maker
/// prefix when the model name already contains it.
pub fn image_url(maker: &str, model: &str) -> String {
    let maker = maker.to_lowercase();
    let model = model.to_lowercase();
    let slug = if model.contains(&maker) {
        model
    } else {
        format!("{}-{}", maker, model)
    };
    let slug = slug
        .replace(' ', "-")
        .replace(['\'', '"'], "")
        .replace("--", "-");
    format!(
        "https://gtplus.app/_next/image?url=%2Fimages%2Fcars%2F{}.jpg&w=1920&q=75",
        slug
    )
}
