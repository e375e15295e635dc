use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blood::{Inventory, InventoryShape};
use super::{new_id, text_enum};
use crate::geo::{GeoPoint, Located};

text_enum! {
    /// Operational status. Only active hospitals are monitored or searched.
    pub enum HospitalStatus {
        Active => "active",
        Pending => "pending",
        Inactive => "inactive",
    }
}

/// A facility holding blood stock.
///
/// The inventory is kept as the raw stored document so that a malformed
/// value survives a round trip; read it through [`Hospital::inventory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub location: Option<GeoPoint>,
    pub status: HospitalStatus,
    pub inventory_document: Value,
}

impl Hospital {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            code: None,
            address: None,
            phone: None,
            location: None,
            status: HospitalStatus::Active,
            inventory_document: Value::Object(Default::default()),
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint::new(latitude, longitude));
        self
    }

    pub fn with_status(mut self, status: HospitalStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_inventory(mut self, inventory: &Inventory) -> Self {
        self.inventory_document = inventory.to_document();
        self
    }

    pub fn with_inventory_document(mut self, document: Value) -> Self {
        self.inventory_document = document;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn inventory(&self) -> Inventory {
        Inventory::coerce(&self.inventory_document).0
    }

    pub fn inventory_shape(&self) -> InventoryShape {
        Inventory::coerce(&self.inventory_document).1
    }

    pub fn is_active(&self) -> bool {
        self.status == HospitalStatus::Active
    }
}

impl Located for Hospital {
    fn location(&self) -> Option<GeoPoint> {
        self.location
    }
}
