//! Property fixtures shared by the integration tests

use listing_verify::models::verification::{ListingType, PropertyContext};

/// Number every non-production call must be routed to
pub const SANDBOX_NUMBER: &str = "+44 7700 900123";

/// Test fixture describing a listing in the property store
#[derive(Debug, Clone)]
pub struct PropertyFixture {
    pub id: i64,
    pub address: &'static str,
    pub agent_phone: Option<&'static str>,
    pub listing_type: &'static str,
    pub description: &'static str,
}

impl PropertyFixture {
    pub fn context(&self) -> PropertyContext {
        PropertyContext {
            property_id: self.id,
            address: self.address.to_string(),
            agent_phone: self.agent_phone.map(str::to_string),
            listing_type: ListingType::from_listing(Some(self.listing_type)),
        }
    }
}

pub const PROPERTIES: &[PropertyFixture] = &[
    PropertyFixture {
        id: 42,
        address: "14 Albion Street, Leeds LS1 6HX",
        agent_phone: Some("+44 113 496 0000"),
        listing_type: "rent",
        description: "Rental flat with a reachable agent",
    },
    PropertyFixture {
        id: 43,
        address: "2 Quay Road, Bristol BS1 4QA",
        agent_phone: None,
        listing_type: "sale",
        description: "Listing without an agent phone number",
    },
    PropertyFixture {
        id: 44,
        address: "9 Market Place, York YO1 8SL",
        agent_phone: Some("+44 1904 496 001"),
        listing_type: "sale",
        description: "House for sale with a reachable agent",
    },
];

/// Get a fixture by property id
pub fn property(id: i64) -> &'static PropertyFixture {
    PROPERTIES
        .iter()
        .find(|p| p.id == id)
        .unwrap_or_else(|| panic!("no fixture for property {}", id))
}
