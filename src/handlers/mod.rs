pub mod admin;
pub mod dev;
pub mod health;
pub mod services;
pub mod webhook;
