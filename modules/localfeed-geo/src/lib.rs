//! City catalog proximity search and "nearby" range resolution.

pub mod distance;
pub mod index;
pub mod range;
pub mod store;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use distance::{haversine_distance_miles, EARTH_RADIUS_MILES};
pub use index::GeoIndex;
pub use range::{RangeEvent, RangeResolver, RangeResult, RangeState};
pub use store::{JsonFileRangeStore, MemoryRangeStore};
pub use traits::{AuthorizationState, PositionProvider, PositionUpdate, RangeStateStore};
