//! Page cloner library.
//!
//! Fetches a web page, through cross-origin relays when the origin refuses
//! direct requests, and inlines its stylesheets, scripts, images and icons so
//! the result renders offline as a single HTML file.

pub mod config;
pub mod constants;
pub mod fetch;
pub mod output;
pub mod snapshot;

pub use snapshot::{clone_page, clone_page_with, CloneError, Snapshotter};
