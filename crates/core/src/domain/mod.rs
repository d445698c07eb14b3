pub mod appointment;
pub mod policy;
pub mod resource;
pub mod schedule;
