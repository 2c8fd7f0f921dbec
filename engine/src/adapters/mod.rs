//! Driving adapters

pub mod rest;
