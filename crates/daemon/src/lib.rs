//! vCenter port-group utility daemon
//!
//! Joins the endpoint's host, network and VM collections into one inventory,
//! moves VM NICs between port groups, and serves both over HTTP.

pub mod cache;
pub mod config;
pub mod connection;
pub mod http;
pub mod reconciler;
pub mod reconfig;
pub mod service;
pub mod vsphere;
