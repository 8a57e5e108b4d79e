pub mod delivery;
pub mod error;
pub mod services;
pub mod traits;
