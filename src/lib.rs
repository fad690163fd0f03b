pub mod app;
pub mod checksum;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod fs_util;
pub mod layout;
pub mod merge;
pub mod output;
pub mod providers;
pub mod resolver;
pub mod retry;
