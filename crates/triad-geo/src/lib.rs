//! §4.H Venue Enrichment — fan out to Google Geocoding/Places/Routes and
//! TomTom, merge by planner index, derive opening-hours state.
//!
//! Grounded in the teacher's external-API client modules (per-vendor
//! request builder + typed response struct + classified-error mapping),
//! applied here against geospatial rather than LLM endpoints.

pub mod enrichment;
pub mod geocoding;
pub mod hours;
pub mod places;
pub mod routes;
pub mod tomtom;

pub use enrichment::{enrich_venues, EnrichedVenue, EnrichmentClients, PlannedVenue};
pub use geocoding::{GeocodingClient, ReverseGeocodeResult};
pub use hours::{is_open_now, parse_day_status, DayStatus};
pub use places::{PlaceMatch, PlacesClient};
pub use routes::{RouteResult, RoutesClient};
pub use tomtom::{FlowSegment, TomTomClient, TrafficIncident};
