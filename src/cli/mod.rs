//! CLI output formatting
//!
//! Human-readable, colored terminal output for staging runs and preflight
//! reports.

pub mod display;

pub use display::fatal_line;
pub use display::print_fatal;
pub use display::render_diagnostic_report;
pub use display::StageDisplay;
