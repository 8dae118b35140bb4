pub mod text_generation;
pub mod utils;

pub use text_generation::*;
pub use utils::{DeviceMap, DeviceSelectable};
