pub mod activity;
pub mod ai;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod news;
