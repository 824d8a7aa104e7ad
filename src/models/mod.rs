pub mod candidate;
pub mod entry;
pub mod enums;
pub mod report;
pub mod week;

pub use candidate::*;
pub use entry::*;
pub use enums::*;
pub use report::*;
pub use week::*;
