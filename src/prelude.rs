#[allow(unused_imports)]
pub use anyhow::Context;
#[allow(unused_imports)]
pub use tracing::{debug, debug_span, error, info, instrument, trace, warn};
