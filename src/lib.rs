#[macro_use]
extern crate log;

#[macro_use]
extern crate derive_builder;

#[macro_use]
pub mod time;

pub mod app;
pub mod builtins;
pub mod configuration;
pub mod connection;
pub mod database;
pub mod reporter;
