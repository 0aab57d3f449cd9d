//! Services backing the endpoints.

mod aggregator;
mod health_check;

pub use self::aggregator::*;
pub use self::health_check::*;
