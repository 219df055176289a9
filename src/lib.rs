pub mod browser;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod export;
pub mod identifier;
pub mod input;
pub mod logger;
pub mod portal;
pub mod record;
pub mod scan;
pub mod validity;

pub use checkpoint::{Checkpoint, ResumeMode};
pub use identifier::{CellValue, ProjectId};
pub use record::{Credentials, Region, ResultRow};
pub use scan::{ScanError, ScanOutcome, ScanRequest, Scanner};
