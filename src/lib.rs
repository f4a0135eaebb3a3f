pub mod device;
pub mod errors;
pub mod program;
pub mod sequence;
pub mod sink;
pub mod timeline;
pub mod utils;
pub mod wrap;

#[cfg(feature = "python")]
pub mod python;

pub use device::*;
pub use errors::*;
pub use program::*;
pub use sequence::*;
pub use sink::*;
pub use timeline::*;
pub use utils::*;
