//! Integration test suite for plangraph.
//!
//! These tests exercise planning from goal to committed graph, re-planning
//! against shared graphs, the HTTP gateway against a local server, and the
//! graph invariants under randomized construction.
//!
//! # Test Categories
//!
//! - `planning_e2e`: plan and re-plan through a scripted gateway
//! - `http_gateway`: the HTTP adapter against a loopback server
//! - `graph_properties`: property tests for the task graph
//!
//! # CI Compatibility
//!
//! No test talks to a real model endpoint.


mod graph_properties;
mod planning_e2e;
