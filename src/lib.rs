pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod images;
pub mod meals;
pub mod orders;
pub mod state;
pub mod storage;
