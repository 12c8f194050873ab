pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod hub;
pub mod ids;
pub mod models;
pub mod service;
pub mod tasks;
pub mod voting;
