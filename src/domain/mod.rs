//! Domain models - regions, sites and distance helpers
//!
//! - `region` - fixed-point bounding boxes and quadrant subdivision
//! - `site` - `SiteId`, `SiteStub`, `Site` and the id-keyed `Dataset`
//! - `geo` - haversine distance used by the enrichment pass

pub mod geo;
pub mod region;
pub mod site;

pub use region::{Region, RegionError};
pub use site::{Dataset, Site, SiteDetail, SiteId, SiteStub};
