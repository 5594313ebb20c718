mod common;
mod compliance;
mod engine;
mod interview;
mod job;
mod offer;
