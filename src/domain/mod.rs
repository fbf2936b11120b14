pub mod ids;
pub mod load_number;
pub mod types;

pub use ids::{IdAllocator, LoadId};
pub use load_number::format_load_number;
pub use types::*;
