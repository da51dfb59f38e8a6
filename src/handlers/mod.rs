// src/handlers/mod.rs

pub mod comments;
pub mod confirm;
pub mod likes;
