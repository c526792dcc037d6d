pub mod confirm;
pub mod preview;

pub use confirm::{ConfirmConfig, OrderConfirmRequest, OrderConfirmService};
pub use preview::{OrderPreviewRequest, OrderPreviewService};
