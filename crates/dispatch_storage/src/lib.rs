#![forbid(unsafe_code)]

pub mod collaborators;
pub mod feed;
pub mod repo;
pub mod roster;
