//! Blood groups and per-group stock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::text_enum;

text_enum! {
    /// The eight canonical ABO/Rh groups.
    pub enum BloodGroup {
        APos => "A+",
        ANeg => "A-",
        BPos => "B+",
        BNeg => "B-",
        AbPos => "AB+",
        AbNeg => "AB-",
        OPos => "O+",
        ONeg => "O-",
    }
}

impl BloodGroup {
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::APos,
        BloodGroup::ANeg,
        BloodGroup::BPos,
        BloodGroup::BNeg,
        BloodGroup::AbPos,
        BloodGroup::AbNeg,
        BloodGroup::OPos,
        BloodGroup::ONeg,
    ];

    /// Rare groups get critical priority and inflated unit estimates.
    pub const RARE: [BloodGroup; 4] = [
        BloodGroup::ONeg,
        BloodGroup::AbNeg,
        BloodGroup::BNeg,
        BloodGroup::ANeg,
    ];

    pub fn is_rare(&self) -> bool {
        Self::RARE.contains(self)
    }

    /// JSON path of this group inside an inventory document.
    pub fn json_path(&self) -> String {
        format!("$.\"{}\"", self.as_str())
    }
}

/// How a stored inventory document was shaped before coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryShape {
    /// A mapping with at least one key.
    Mapping,
    /// An empty mapping or null.
    Empty,
    /// Anything else (array, string, number).
    Malformed,
}

/// Non-negative unit counts for every blood group.
///
/// Groups absent from the underlying document read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory(BTreeMap<BloodGroup, u32>);

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: BloodGroup, units: u32) -> Self {
        self.0.insert(group, units);
        self
    }

    pub fn get(&self, group: BloodGroup) -> u32 {
        self.0.get(&group).copied().unwrap_or(0)
    }

    pub fn set(&mut self, group: BloodGroup, units: u32) {
        self.0.insert(group, units);
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(|&u| u64::from(u)).sum()
    }

    /// Coerce a stored document into an inventory.
    ///
    /// Non-mapping documents become all-zero. Within a mapping, unknown keys
    /// are ignored, negative numbers clamp to zero, fractional numbers are
    /// floored and non-numeric values count as zero.
    pub fn coerce(document: &Value) -> (Self, InventoryShape) {
        let map = match document {
            Value::Object(map) if map.is_empty() => return (Self::new(), InventoryShape::Empty),
            Value::Object(map) => map,
            Value::Null => return (Self::new(), InventoryShape::Empty),
            _ => return (Self::new(), InventoryShape::Malformed),
        };

        let mut inventory = Self::new();
        for group in BloodGroup::ALL {
            if let Some(value) = map.get(group.as_str()) {
                inventory.set(group, coerce_units(value));
            }
        }
        (inventory, InventoryShape::Mapping)
    }

    /// Document form persisted by the store.
    pub fn to_document(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .map(|(group, units)| (group.as_str().to_string(), Value::from(*units)))
            .collect();
        Value::Object(map)
    }
}

impl FromIterator<(BloodGroup, u32)> for Inventory {
    fn from_iter<I: IntoIterator<Item = (BloodGroup, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn coerce_units(value: &Value) -> u32 {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u32::try_from(u).unwrap_or(u32::MAX)
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() && f > 0.0 {
                    f.floor().min(f64::from(u32::MAX)) as u32
                } else {
                    0
                }
            } else {
                0
            }
        }
        _ => 0,
    }
}
