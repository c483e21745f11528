pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod fec;
pub mod format;
pub mod history;
pub mod io;
pub mod token;
pub mod vault;
