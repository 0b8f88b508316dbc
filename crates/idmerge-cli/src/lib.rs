pub mod input;
pub mod output;
pub mod prompt;
pub mod runner;
