pub mod market_data;
pub mod performance;
pub mod recommendation;
pub mod signal;
pub mod timeframe;
pub mod weights;

pub use market_data::*;
pub use performance::*;
pub use recommendation::*;
pub use signal::*;
pub use timeframe::Timeframe;
pub use weights::*;
