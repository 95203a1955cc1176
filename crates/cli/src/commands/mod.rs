pub mod analyze;
pub mod backends;
pub mod binaries;
pub mod project;
pub mod scan;
pub mod util;

pub use analyze::*;
pub use backends::*;
pub use binaries::*;
pub use project::*;
pub use scan::*;
pub use util::*;
