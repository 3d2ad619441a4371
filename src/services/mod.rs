//! Background services

pub mod reconciler;
