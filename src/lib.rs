#![doc = include_str!("../README.md")]

pub mod blocking;
pub mod database;
pub mod jokes;
pub mod logger;
