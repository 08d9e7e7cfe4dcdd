// Request guards for the network transport

pub mod auth;
