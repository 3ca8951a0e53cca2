pub mod forecast;
pub mod lag_features;
pub mod linear;
pub mod params;

pub use self::forecast::*;
pub use lag_features::*;
pub use linear::*;
pub use params::*;
