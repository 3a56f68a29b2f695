//! UI module for consistent CLI output
//!
//! Uses `cliclack` spinners and `indicatif` progress bars in interactive
//! terminals, with automatic fallback to plain output in CI/non-interactive
//! environments.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermit::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//!
//! ui::intro(&ctx, "hermit fetch-deps");
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Fetching dependencies...");
//! // ... do work ...
//! spinner.stop("Fetched 12 components");
//!
//! ui::step_warn(&ctx, "Missing checksum for left-pad@1.3.0");
//! ui::outro_success(&ctx, "Done");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, step_info, step_ok, step_ok_detail, step_warn,
};
pub use progress::{DownloadProgress, TaskSpinner};
