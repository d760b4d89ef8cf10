pub mod app;
pub mod calendar;
pub mod cli;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod store;
pub mod sync;
pub mod util;
