pub mod package;
pub mod run;
pub mod status;
