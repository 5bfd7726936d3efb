mod mix_policy;
mod system_desc;

pub use mix_policy::{ClampPolicy, PanLaw};
pub use system_desc::{AudioSystemDesc, MAX_CHANNEL_COUNT};
