pub mod report;
pub mod transcribe;

pub use transcribe::transcribe;
