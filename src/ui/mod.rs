pub mod progress;
pub mod report;


pub use progress::{format_hhmmss, header, ProgressRow, ProgressTable};
pub use report::{format_stats, DeviceReport, RunReport};
