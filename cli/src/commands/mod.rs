mod helpers;
mod status;
mod sync;
mod trend;

pub(crate) use status::{cmd_reset, cmd_status};
pub(crate) use sync::cmd_sync;
pub(crate) use trend::cmd_trend;
