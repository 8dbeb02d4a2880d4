mod protect;
mod region;

pub(crate) use protect::write_cell;
pub use region::*;
